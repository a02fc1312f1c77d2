//! ChangeLog Store - The ledger of applied migrations
//!
//! Reads go straight to the backend. Writes always happen inside the
//! transaction of the script they describe, so a ledger row commits or rolls
//! back together with the script's statements.

use chrono::Utc;
use std::sync::Arc;

use crate::backends::{MigrationBackend, MigrationTransaction};
use crate::change::{Change, ChangeId};
use crate::error::{MigrateError, MigrateResult};

/// Access to the ledger table of one environment
#[derive(Clone)]
pub struct ChangeLogStore {
    backend: Arc<dyn MigrationBackend>,
    table: String,
}

impl ChangeLogStore {
    pub fn new(backend: Arc<dyn MigrationBackend>, table: impl Into<String>) -> Self {
        Self {
            backend,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the ledger table exists
    pub async fn exists(&self) -> MigrateResult<bool> {
        self.backend
            .changelog_exists(&self.table)
            .await
            .map_err(|e| persistence("check for", &self.table, e))
    }

    /// Create the ledger table if missing
    pub async fn ensure(&self) -> MigrateResult<()> {
        if self.exists().await? {
            return Ok(());
        }
        tracing::info!(table = %self.table, "Creating changelog table");
        self.backend
            .create_changelog(&self.table)
            .await
            .map_err(|e| persistence("create", &self.table, e))
    }

    /// All applied changes ordered by id; empty when the table does not exist
    pub async fn query(&self) -> MigrateResult<Vec<Change>> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }
        let mut changes = self
            .backend
            .select_changes(&self.table)
            .await
            .map_err(|e| persistence("read", &self.table, e))?;
        changes.sort();
        Ok(changes)
    }

    /// Most recently applied change, by id
    pub async fn latest(&self) -> MigrateResult<Option<Change>> {
        Ok(self.query().await?.pop())
    }

    /// Record `change` as applied within `tx`; stamps the time if unset
    pub async fn record(
        &self,
        tx: &mut dyn MigrationTransaction,
        change: &Change,
    ) -> MigrateResult<Change> {
        let mut applied = change.clone();
        applied.applied_at.get_or_insert_with(Utc::now);
        tx.insert_change(&self.table, &applied)
            .await
            .map_err(|e| persistence("write", &self.table, e))?;
        Ok(applied)
    }

    /// Remove the entry of `id` within `tx`
    pub async fn remove(
        &self,
        tx: &mut dyn MigrationTransaction,
        id: ChangeId,
    ) -> MigrateResult<()> {
        let existed = tx
            .delete_change(&self.table, id)
            .await
            .map_err(|e| persistence("write", &self.table, e))?;
        if !existed {
            tracing::warn!(id = %id, table = %self.table, "No changelog entry to remove");
        }
        Ok(())
    }
}

fn persistence(action: &str, table: &str, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::Persistence { .. } => err,
        other => MigrateError::persistence(format!(
            "Failed to {} changelog '{}': {}",
            action, table, other
        )),
    }
}
