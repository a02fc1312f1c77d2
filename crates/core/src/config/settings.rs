use crate::config::{
    ConfigError, ConfigValidator, Environment, IdPatternValidator, IdentifierValidator,
    LengthValidator, MigrationPaths, RegexValidator, SettingSource, UrlValidator,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration trait for migration settings
pub trait SettingsTrait: Sized {
    /// Load configuration from environment variables only
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Where each setting got its value
    fn config_sources(&self) -> HashMap<String, SettingSource>;
}

/// Where transaction boundaries are drawn while running a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Every script commits or rolls back on its own, together with its ledger row
    PerScript,
    /// The whole plan is a single transaction
    PerPlan,
}

impl Default for TransactionMode {
    fn default() -> Self {
        TransactionMode::PerScript
    }
}

impl FromStr for TransactionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per_script" | "script" => Ok(TransactionMode::PerScript),
            "per_plan" | "plan" => Ok(TransactionMode::PerPlan),
            _ => Err(ConfigError::invalid_value(
                "transaction_mode",
                s,
                "per_script or per_plan",
            )),
        }
    }
}

/// What to do with script files that do not follow the naming convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedScriptPolicy {
    Fail,
    Skip,
}

impl Default for MalformedScriptPolicy {
    fn default() -> Self {
        MalformedScriptPolicy::Fail
    }
}

impl FromStr for MalformedScriptPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(MalformedScriptPolicy::Fail),
            "skip" => Ok(MalformedScriptPolicy::Skip),
            _ => Err(ConfigError::invalid_value("malformed_scripts", s, "fail or skip")),
        }
    }
}

/// Hook script settings, each in `<kind>:<file>[:option...]` form
/// (e.g. `sql:before_up.sql` or `cmd:check.sh:_arg=strict:team=core`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookSettings {
    pub before_up: Option<String>,
    pub before_each_up: Option<String>,
    pub after_each_up: Option<String>,
    pub after_up: Option<String>,
    pub before_down: Option<String>,
    pub before_each_down: Option<String>,
    pub after_each_down: Option<String>,
    pub after_down: Option<String>,
    pub before_new: Option<String>,
    pub after_new: Option<String>,
}

impl HookSettings {
    /// All configured hook settings with their setting names
    pub fn configured(&self) -> Vec<(&'static str, &str)> {
        [
            ("before_up", &self.before_up),
            ("before_each_up", &self.before_each_up),
            ("after_each_up", &self.after_each_up),
            ("after_up", &self.after_up),
            ("before_down", &self.before_down),
            ("before_each_down", &self.before_each_down),
            ("after_each_down", &self.after_each_down),
            ("after_down", &self.after_down),
            ("before_new", &self.before_new),
            ("after_new", &self.after_new),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }
}

/// Settings of one migration environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    pub database_url: Option<String>,
    pub changelog_table: String,
    pub delimiter: String,
    pub full_line_delimiter: bool,
    pub send_full_script: bool,
    pub transaction_mode: TransactionMode,
    pub malformed_scripts: MalformedScriptPolicy,
    pub filename_filter: Option<String>,
    pub id_pattern: Option<String>,
    pub new_template: Option<PathBuf>,
    pub lock_key: i64,
    pub variables: BTreeMap<String, String>,
    pub hooks: HookSettings,
    #[serde(skip)]
    loaded_from: Option<PathBuf>,
}

/// Default advisory lock key ("shiftmig" as ASCII)
pub const DEFAULT_LOCK_KEY: i64 = 0x7368_6966_746d_6967;

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            changelog_table: "changelog".to_string(),
            delimiter: ";".to_string(),
            full_line_delimiter: false,
            send_full_script: false,
            transaction_mode: TransactionMode::default(),
            malformed_scripts: MalformedScriptPolicy::default(),
            filename_filter: None,
            id_pattern: None,
            new_template: None,
            lock_key: DEFAULT_LOCK_KEY,
            variables: BTreeMap::new(),
            hooks: HookSettings::default(),
            loaded_from: None,
        }
    }
}

const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_CHANGELOG_TABLE: &str = "SHIFT_CHANGELOG_TABLE";
const ENV_DELIMITER: &str = "SHIFT_DELIMITER";
const ENV_FULL_LINE_DELIMITER: &str = "SHIFT_FULL_LINE_DELIMITER";
const ENV_SEND_FULL_SCRIPT: &str = "SHIFT_SEND_FULL_SCRIPT";
const ENV_TRANSACTION_MODE: &str = "SHIFT_TRANSACTION_MODE";
const ENV_MALFORMED_SCRIPTS: &str = "SHIFT_MALFORMED_SCRIPTS";
const ENV_FILENAME_FILTER: &str = "SHIFT_FILENAME_FILTER";
const ENV_LOCK_KEY: &str = "SHIFT_LOCK_KEY";

impl MigrationSettings {
    /// Settings for an environment: the environment file (if present),
    /// then environment variable overrides, then validation.
    pub fn load(paths: &MigrationPaths, environment: &Environment) -> Result<Self, ConfigError> {
        let file = paths.environment_file(environment);
        let mut settings = if file.exists() {
            Self::from_yaml_file(&file)?
        } else {
            tracing::debug!("No settings file at {}, using defaults", file.display());
            Self::default()
        };

        settings.apply_env_overrides()?;
        settings.validate_for(environment)?;

        for (field, source) in settings.config_sources() {
            if source.is_override() {
                tracing::debug!(field = %field, source = %source, "Setting overridden");
            }
        }
        tracing::debug!(
            environment = %environment,
            changelog_table = %settings.changelog_table,
            "Migration settings loaded"
        );
        Ok(settings)
    }

    /// Parse settings from a YAML file without env overrides
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::FileSystemError {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let mut settings = Self::from_yaml_str(&content)?;
        settings.loaded_from = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Parse settings from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// File the settings were read from, if any
    pub fn loaded_from(&self) -> Option<&Path> {
        self.loaded_from.as_deref()
    }

    /// Apply environment variable overrides on top of the current values
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var(ENV_DATABASE_URL) {
            self.database_url = Some(url);
        }

        if let Ok(table) = env::var(ENV_CHANGELOG_TABLE) {
            self.changelog_table = table;
        }

        if let Ok(delimiter) = env::var(ENV_DELIMITER) {
            self.delimiter = delimiter;
        }

        if let Ok(value) = env::var(ENV_FULL_LINE_DELIMITER) {
            self.full_line_delimiter = parse_bool(ENV_FULL_LINE_DELIMITER, &value)?;
        }

        if let Ok(value) = env::var(ENV_SEND_FULL_SCRIPT) {
            self.send_full_script = parse_bool(ENV_SEND_FULL_SCRIPT, &value)?;
        }

        if let Ok(mode) = env::var(ENV_TRANSACTION_MODE) {
            self.transaction_mode = mode.parse()?;
        }

        if let Ok(policy) = env::var(ENV_MALFORMED_SCRIPTS) {
            self.malformed_scripts = policy.parse()?;
        }

        if let Ok(filter) = env::var(ENV_FILENAME_FILTER) {
            self.filename_filter = Some(filter);
        }

        if let Ok(key) = env::var(ENV_LOCK_KEY) {
            self.lock_key = key.parse().map_err(|_| {
                ConfigError::invalid_value(ENV_LOCK_KEY, key.clone(), "a 64-bit signed integer")
            })?;
        }

        Ok(())
    }

    /// Validate, including the rules that only apply to some environments
    pub fn validate_for(&self, environment: &Environment) -> Result<(), ConfigError> {
        self.validate()?;

        if environment.is_production() && self.database_url.is_none() {
            return Err(ConfigError::missing_required(
                "database_url",
                "DATABASE_URL is required in production",
            ));
        }

        if environment.is_production()
            && self.database_url.as_deref().is_some_and(|url| url.starts_with("memory://"))
        {
            return Err(ConfigError::invalid_value(
                "database_url",
                "memory://",
                "a real database in production",
            ));
        }

        Ok(())
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid_value(field, value, "true or false")),
    }
}

impl SettingsTrait for MigrationSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.database_url {
            UrlValidator::default().validate("database_url", url)?;
        }

        IdentifierValidator.validate("changelog_table", &self.changelog_table)?;
        LengthValidator::range(1, 16).validate("delimiter", &self.delimiter)?;

        if let Some(filter) = &self.filename_filter {
            RegexValidator.validate("filename_filter", filter)?;
        }

        if let Some(pattern) = &self.id_pattern {
            IdPatternValidator.validate("id_pattern", pattern)?;
        }

        for (name, setting) in self.hooks.configured() {
            if setting.split(':').filter(|s| !s.is_empty()).count() < 2 {
                return Err(ConfigError::invalid_value(
                    format!("hooks.{}", name),
                    setting,
                    "'<kind>:<file>' such as 'sql:post_up.sql'",
                ));
            }
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, SettingSource> {
        let mut sources = HashMap::new();
        let fallback = |default: &'static str| match &self.loaded_from {
            Some(path) => SettingSource::File(path.clone()),
            None => SettingSource::Default(default),
        };

        let fields = [
            ("database_url", ENV_DATABASE_URL, "none"),
            ("changelog_table", ENV_CHANGELOG_TABLE, "changelog"),
            ("delimiter", ENV_DELIMITER, ";"),
            ("full_line_delimiter", ENV_FULL_LINE_DELIMITER, "false"),
            ("send_full_script", ENV_SEND_FULL_SCRIPT, "false"),
            ("transaction_mode", ENV_TRANSACTION_MODE, "per_script"),
            ("malformed_scripts", ENV_MALFORMED_SCRIPTS, "fail"),
            ("filename_filter", ENV_FILENAME_FILTER, "none"),
            ("lock_key", ENV_LOCK_KEY, "default"),
        ];

        for (field, var, default) in fields {
            let source = if env::var(var).is_ok() {
                SettingSource::EnvVar(var)
            } else {
                fallback(default)
            };
            sources.insert(field.to_string(), source);
        }

        sources
    }
}
