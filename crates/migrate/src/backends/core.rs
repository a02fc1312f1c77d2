//! Core Migration Backend Traits
//!
//! The engine only needs a handful of capabilities from a target database:
//! transactions that run raw script statements and ledger writes, ledger
//! reads, and a lock that keeps concurrent runs apart. These traits hide the
//! database-specific parts behind that surface.

use async_trait::async_trait;

use crate::backends::BackendType;
use crate::change::{Change, ChangeId};
use crate::error::MigrateResult;

/// A unit of work on the target database.
///
/// Dropping a transaction without committing discards its work.
#[async_trait]
pub trait MigrationTransaction: Send {
    /// Execute one raw statement and return the affected row count
    async fn execute(&mut self, sql: &str) -> MigrateResult<u64>;

    /// Add a ledger row for `change`
    async fn insert_change(&mut self, table: &str, change: &Change) -> MigrateResult<()>;

    /// Remove the ledger row for `id`; returns whether a row existed
    async fn delete_change(&mut self, table: &str, id: ChangeId) -> MigrateResult<bool>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// A target database able to run migrations
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Begin a transaction
    async fn begin(&self) -> MigrateResult<Box<dyn MigrationTransaction>>;

    /// Whether the ledger table exists
    async fn changelog_exists(&self, table: &str) -> MigrateResult<bool>;

    /// Create the ledger table if it does not exist
    async fn create_changelog(&self, table: &str) -> MigrateResult<()>;

    /// All ledger rows ordered by id
    async fn select_changes(&self, table: &str) -> MigrateResult<Vec<Change>>;

    /// Try to take the run lock without waiting
    async fn try_lock(&self, key: i64) -> MigrateResult<bool>;

    /// Release a lock taken by `try_lock`
    async fn unlock(&self, key: i64) -> MigrateResult<()>;

    /// Close all connections
    async fn close(&self) -> MigrateResult<()>;
}
