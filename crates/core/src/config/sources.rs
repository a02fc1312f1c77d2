use std::fmt;
use std::path::PathBuf;

/// Where a migration setting got its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingSource {
    /// Built-in default, rendered as shown to users
    Default(&'static str),
    /// The environment's settings file
    File(PathBuf),
    /// A `SHIFT_*` variable overriding the file
    EnvVar(&'static str),
}

impl SettingSource {
    pub fn is_default(&self) -> bool {
        matches!(self, SettingSource::Default(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, SettingSource::File(_))
    }

    pub fn is_override(&self) -> bool {
        matches!(self, SettingSource::EnvVar(_))
    }
}

impl fmt::Display for SettingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingSource::Default(value) => write!(f, "default ({})", value),
            SettingSource::File(path) => write!(f, "{}", path.display()),
            SettingSource::EnvVar(var) => write!(f, "${}", var),
        }
    }
}
