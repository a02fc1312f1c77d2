//! # shift-core
//!
//! Configuration foundation for the shift migration tool: environments,
//! the migrations home layout, and validated per-environment settings.

pub mod config;

pub use config::{
    ConfigError, Environment, HookSettings, MalformedScriptPolicy, MigrationPaths,
    MigrationSettings, SettingSource, SettingsTrait, TransactionMode,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get crate version
pub fn version() -> &'static str {
    VERSION
}
