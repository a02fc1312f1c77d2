//! Database Backend Abstractions
//!
//! Migration targets are selected from the scheme of the database URL.
//! PostgreSQL is the production backend; the in-memory backend serves
//! tests and dry runs.

pub mod core;
pub mod memory;
pub mod postgres;

pub use self::core::*;
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

use std::sync::Arc;

use crate::error::{MigrateError, MigrateResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    PostgreSQL,
    Memory,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::PostgreSQL => write!(f, "postgresql"),
            BackendType::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(BackendType::PostgreSQL),
            "memory" => Ok(BackendType::Memory),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

impl BackendType {
    /// Detect the backend from the scheme of a database URL
    pub fn from_url(url: &str) -> MigrateResult<Self> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| {
                MigrateError::InvalidArgument(format!("Invalid database URL: {}", url))
            })?;
        scheme.parse().map_err(MigrateError::InvalidArgument)
    }
}

/// Connect to the database named by `url`
pub async fn connect(url: &str) -> MigrateResult<Arc<dyn MigrationBackend>> {
    let backend: Arc<dyn MigrationBackend> = match BackendType::from_url(url)? {
        BackendType::PostgreSQL => Arc::new(PostgresBackend::connect(url).await?),
        BackendType::Memory => Arc::new(MemoryBackend::new()),
    };
    tracing::debug!(backend = %backend.backend_type(), "Connected migration backend");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_detection() {
        assert_eq!(
            BackendType::from_url("postgres://localhost/db").unwrap(),
            BackendType::PostgreSQL
        );
        assert_eq!(
            BackendType::from_url("postgresql://localhost/db").unwrap(),
            BackendType::PostgreSQL
        );
        assert_eq!(BackendType::from_url("memory://").unwrap(), BackendType::Memory);
        assert!(BackendType::from_url("mysql://localhost/db").is_err());
        assert!(BackendType::from_url("localhost").is_err());
    }

    #[tokio::test]
    async fn test_connect_memory() {
        let backend = connect("memory://").await.unwrap();
        assert_eq!(backend.backend_type(), BackendType::Memory);
        assert!(!backend.changelog_exists("changelog").await.unwrap());
    }
}
