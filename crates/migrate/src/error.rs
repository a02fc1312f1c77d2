//! Error types for the migration engine
//!
//! Every failure of a single script aborts the remainder of its plan; callers
//! translate these into user-facing messages and exit codes.

use std::path::PathBuf;

use shift_core::ConfigError;
use thiserror::Error;

use crate::change::ChangeId;
use crate::hooks::HookPhase;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Script file name or content does not follow the conventions
    #[error("Malformed migration script '{filename}': {reason}")]
    MalformedScript { filename: String, reason: String },

    /// The changelog could not be read or written
    #[error("Changelog persistence failed: {message}")]
    Persistence { message: String },

    /// A statement of a migration script failed
    #[error("Migration {id} failed: {source}")]
    Execution {
        id: ChangeId,
        #[source]
        source: Box<MigrateError>,
    },

    /// Rollback requested for a script without an undo section
    #[error("Migration {id} ({filename}) cannot be undone: it has no undo section")]
    Irreversible { id: ChangeId, filename: String },

    /// A hook rejected or failed the operation
    #[error("Hook '{hook}' failed during {phase}: {source}")]
    Hook {
        hook: String,
        phase: HookPhase,
        /// Script the hook ran for, in `*_each` phases
        id: Option<ChangeId>,
        #[source]
        source: HookError,
    },

    /// The run lock is held by another invocation
    #[error("Another migration run holds the lock (key {key})")]
    ConcurrentMigration { key: i64 },

    /// A ledger entry the operation must act on has no script
    #[error("Migration script for applied change {id} ('{description}') is missing")]
    MissingScript { id: ChangeId, description: String },

    /// No script carries the requested version
    #[error("No migration script exists for version {0}")]
    UnknownVersion(ChangeId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Target database error
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MigrateError {
    /// Create a malformed script error
    pub fn malformed(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedScript {
            filename: filename.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an error raised while executing the script `id`
    pub fn execution(id: ChangeId, source: MigrateError) -> Self {
        match source {
            // Hook and lock failures keep their identity
            MigrateError::Hook { .. } | MigrateError::Irreversible { .. } => source,
            MigrateError::Execution { .. } => source,
            other => Self::Execution {
                id,
                source: Box::new(other),
            },
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// The script id this error is attributed to, if any
    pub fn change_id(&self) -> Option<ChangeId> {
        match self {
            MigrateError::Execution { id, .. }
            | MigrateError::Irreversible { id, .. }
            | MigrateError::MissingScript { id, .. }
            | MigrateError::UnknownVersion(id) => Some(*id),
            MigrateError::Hook { id, .. } => *id,
            _ => None,
        }
    }
}

impl From<sqlx::Error> for MigrateError {
    fn from(err: sqlx::Error) -> Self {
        MigrateError::Database(err.to_string())
    }
}

/// Errors raised by hook scripts
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook refused the operation; the message is meant for the user
    #[error("{0}")]
    Rejected(String),

    #[error("Hook script not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A statement issued by the hook failed
    #[error("{0}")]
    Statement(String),

    #[error("Failed to encode hook context: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_wraps_database_errors() {
        let id = ChangeId::new(3);
        let err = MigrateError::execution(id, MigrateError::Database("syntax error".to_string()));
        assert_eq!(err.change_id(), Some(id));
        assert_eq!(err.to_string(), "Migration 3 failed: Database error: syntax error");
    }

    #[test]
    fn test_execution_keeps_hook_errors() {
        let hook = MigrateError::Hook {
            hook: "check".to_string(),
            phase: HookPhase::BeforeEach,
            id: Some(ChangeId::new(1)),
            source: HookError::Rejected("ticket required".to_string()),
        };
        let err = MigrateError::execution(ChangeId::new(1), hook);
        assert!(matches!(err, MigrateError::Hook { .. }));
        assert_eq!(err.change_id(), Some(ChangeId::new(1)));
        assert!(err.to_string().contains("ticket required"));
    }
}
