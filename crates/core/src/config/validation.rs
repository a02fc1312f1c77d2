use regex::Regex;
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("File system error: {message}")]
    FileSystemError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Trait for validating configuration values
pub trait ConfigValidator<T: ?Sized> {
    /// Validate a configuration value
    fn validate(&self, field: &str, value: &T) -> Result<(), ConfigError>;
}

/// Database URL validator
pub struct UrlValidator {
    pub schemes: Vec<String>,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self {
            schemes: vec![
                "postgres".to_string(),
                "postgresql".to_string(),
                "memory".to_string(),
            ],
        }
    }
}

impl ConfigValidator<str> for UrlValidator {
    fn validate(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        if value.is_empty() {
            return Err(ConfigError::invalid_value(field, value, "non-empty URL"));
        }

        let has_valid_scheme = self
            .schemes
            .iter()
            .any(|scheme| value.starts_with(&format!("{}://", scheme)));

        if !has_valid_scheme {
            return Err(ConfigError::invalid_value(
                field,
                value,
                format!("URL with scheme: {}", self.schemes.join(", ")),
            ));
        }

        Ok(())
    }
}

/// SQL identifier validator. Identifiers are interpolated into statements,
/// so only plain (optionally schema-qualified) names are accepted.
pub struct IdentifierValidator;

impl ConfigValidator<str> for IdentifierValidator {
    fn validate(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        let valid = value.split('.').count() <= 2
            && value.split('.').all(|part| {
                let mut chars = part.chars();
                matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            });

        if !valid {
            return Err(ConfigError::invalid_value(
                field,
                value,
                "a plain SQL identifier such as 'changelog' or 'public.changelog'",
            ));
        }
        Ok(())
    }
}

/// Regular expression validator
pub struct RegexValidator;

impl ConfigValidator<str> for RegexValidator {
    fn validate(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        Regex::new(value)
            .map(|_| ())
            .map_err(|e| {
                let expected = format!("a valid regular expression ({})", e);
                ConfigError::invalid_value(field, value, expected)
            })
    }
}

/// Zero-padding id pattern validator (`"0000"` pads ids to four digits)
pub struct IdPatternValidator;

impl ConfigValidator<str> for IdPatternValidator {
    fn validate(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        if value.is_empty() || !value.chars().all(|c| c == '0') {
            return Err(ConfigError::invalid_value(
                field,
                value,
                "a run of zeros such as '0000'",
            ));
        }
        Ok(())
    }
}

/// String length validator
pub struct LengthValidator {
    pub min_length: usize,
    pub max_length: Option<usize>,
}

impl LengthValidator {
    pub fn min(min_length: usize) -> Self {
        Self {
            min_length,
            max_length: None,
        }
    }

    pub fn range(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length: Some(max_length),
        }
    }
}

impl ConfigValidator<str> for LengthValidator {
    fn validate(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        if value.len() < self.min_length {
            return Err(ConfigError::invalid_value(
                field,
                value,
                format!("string with at least {} characters", self.min_length),
            ));
        }

        if let Some(max_length) = self.max_length {
            if value.len() > max_length {
                return Err(ConfigError::invalid_value(
                    field,
                    value,
                    format!("string with at most {} characters", max_length),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validator() {
        let validator = UrlValidator::default();

        assert!(validator.validate("database_url", "postgres://localhost/app").is_ok());
        assert!(validator.validate("database_url", "postgresql://u:p@db:5432/app").is_ok());
        assert!(validator.validate("database_url", "memory://").is_ok());
        assert!(validator.validate("database_url", "mysql://localhost/app").is_err());
        assert!(validator.validate("database_url", "").is_err());
    }

    #[test]
    fn test_identifier_validator() {
        let validator = IdentifierValidator;

        assert!(validator.validate("changelog_table", "changelog").is_ok());
        assert!(validator.validate("changelog_table", "ops.changelog_v2").is_ok());
        assert!(validator.validate("changelog_table", "changelog; DROP TABLE x").is_err());
        assert!(validator.validate("changelog_table", "1changelog").is_err());
        assert!(validator.validate("changelog_table", "a.b.c").is_err());
    }

    #[test]
    fn test_id_pattern_and_regex_validators() {
        assert!(IdPatternValidator.validate("id_pattern", "0000").is_ok());
        assert!(IdPatternValidator.validate("id_pattern", "00x0").is_err());
        assert!(RegexValidator.validate("filename_filter", "^\\d+_JIRA").is_ok());
        assert!(RegexValidator.validate("filename_filter", "([").is_err());
    }

    #[test]
    fn test_length_validator() {
        let validator = LengthValidator::range(1, 3);

        assert!(validator.validate("delimiter", ";").is_ok());
        assert!(validator.validate("delimiter", "").is_err());
        assert!(validator.validate("delimiter", "GO;;").is_err());
    }
}
