use crate::config::ConfigError;
use std::env;
use std::str::FromStr;

/// Environment variable selecting the active environment
pub const ENVIRONMENT_VAR: &str = "SHIFT_ENV";

/// Target environment. Each environment maps to one settings file
/// (`environments/<name>.yaml`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Environment {
    Development,
    Testing,
    Production,
    /// Any other environment name, e.g. `staging`
    Named(String),
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            other => {
                let valid = !other.is_empty()
                    && other
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
                if valid {
                    Ok(Environment::Named(other.to_string()))
                } else {
                    Err(ConfigError::InvalidValue {
                        field: "environment".to_string(),
                        value: s.to_string(),
                        expected: "development, testing, production, or a name of [a-z0-9_-]"
                            .to_string(),
                    })
                }
            }
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_str = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
            Environment::Named(name) => name.as_str(),
        };
        write!(f, "{}", env_str)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl Environment {
    /// Resolve the environment from `SHIFT_ENV`, defaulting to development
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(ENVIRONMENT_VAR) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Environment::Development),
        }
    }

    /// Check if environment is production
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Settings file name for this environment
    pub fn file_name(&self) -> String {
        format!("{}.yaml", self)
    }
}
