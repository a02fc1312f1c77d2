use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::Environment;

/// Directory layout of a migrations home.
///
/// ```text
/// <base>/
///   environments/   one settings file per environment
///   scripts/        numbered migration scripts, bootstrap.sql, onabort.sql
///   hooks/          hook scripts referenced from settings
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPaths {
    base: PathBuf,
    env: PathBuf,
    scripts: PathBuf,
    hooks: PathBuf,
}

impl MigrationPaths {
    /// Standard layout rooted at `base`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            env: base.join("environments"),
            scripts: base.join("scripts"),
            hooks: base.join("hooks"),
            base,
        }
    }

    /// Override the environments directory
    pub fn with_env_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.env = dir.into();
        self
    }

    /// Override the scripts directory
    pub fn with_scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts = dir.into();
        self
    }

    /// Override the hooks directory
    pub fn with_hooks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hooks = dir.into();
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn env_dir(&self) -> &Path {
        &self.env
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts
    }

    pub fn hooks_dir(&self) -> &Path {
        &self.hooks
    }

    /// Settings file for the given environment
    pub fn environment_file(&self, environment: &Environment) -> PathBuf {
        self.env.join(environment.file_name())
    }
}
