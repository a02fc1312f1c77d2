//! In-memory migration backend
//!
//! Keeps ledger tables, the log of committed statements and held locks in
//! process memory. Transactions buffer their work and apply it on commit,
//! so atomicity behaves like a real database. Statements can be made to
//! fail on demand.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backends::{BackendType, MigrationBackend, MigrationTransaction};
use crate::change::{Change, ChangeId};
use crate::error::{MigrateError, MigrateResult};

#[derive(Debug, Default)]
struct MemoryState {
    /// Ledger rows per table; a present key means the table exists
    changelogs: BTreeMap<String, BTreeMap<ChangeId, Change>>,
    statements: Vec<String>,
    locks: HashSet<i64>,
    failures: Vec<String>,
    changelog_unavailable: bool,
    unlock_failing: bool,
}

impl MemoryState {
    fn check_changelog(&self, table: &str) -> MigrateResult<&BTreeMap<ChangeId, Change>> {
        if self.changelog_unavailable {
            return Err(MigrateError::Database(format!(
                "connection lost while accessing {}",
                table
            )));
        }
        self.changelogs.get(table).ok_or_else(|| {
            MigrateError::Database(format!("relation \"{}\" does not exist", table))
        })
    }
}

/// Migration backend living in process memory.
///
/// Clones share the same state, which lets several migrators act on one
/// "database" and lets tests inspect it afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MigrateResult<MutexGuard<'_, MemoryState>> {
        lock_state(&self.state)
    }

    /// Make every statement containing `pattern` fail
    pub fn fail_on(&self, pattern: impl Into<String>) -> MigrateResult<()> {
        self.state()?.failures.push(pattern.into());
        Ok(())
    }

    pub fn clear_failures(&self) -> MigrateResult<()> {
        self.state()?.failures.clear();
        Ok(())
    }

    /// Simulate an unreachable ledger
    pub fn set_changelog_unavailable(&self, unavailable: bool) -> MigrateResult<()> {
        self.state()?.changelog_unavailable = unavailable;
        Ok(())
    }

    /// Make lock release fail, as when the lock connection drops
    pub fn set_unlock_failing(&self, failing: bool) -> MigrateResult<()> {
        self.state()?.unlock_failing = failing;
        Ok(())
    }

    /// Committed statements in execution order
    pub fn executed_statements(&self) -> MigrateResult<Vec<String>> {
        Ok(self.state()?.statements.clone())
    }

    /// Ids recorded in `table`, ascending
    pub fn applied_ids(&self, table: &str) -> MigrateResult<Vec<ChangeId>> {
        Ok(self
            .state()?
            .changelogs
            .get(table)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default())
    }

    /// Insert a ledger row directly, creating the table when needed
    pub fn seed_change(&self, table: &str, change: Change) -> MigrateResult<()> {
        let mut state = self.state()?;
        let mut change = change;
        change.applied_at.get_or_insert_with(Utc::now);
        state
            .changelogs
            .entry(table.to_string())
            .or_default()
            .insert(change.id, change);
        Ok(())
    }

    pub fn is_locked(&self, key: i64) -> MigrateResult<bool> {
        Ok(self.state()?.locks.contains(&key))
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MigrateResult<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|_| MigrateError::Database("memory backend state is poisoned".to_string()))
}

#[async_trait]
impl MigrationBackend for MemoryBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    async fn begin(&self) -> MigrateResult<Box<dyn MigrationTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }

    async fn changelog_exists(&self, table: &str) -> MigrateResult<bool> {
        let state = self.state()?;
        if state.changelog_unavailable {
            return Err(MigrateError::Database("connection refused".to_string()));
        }
        Ok(state.changelogs.contains_key(table))
    }

    async fn create_changelog(&self, table: &str) -> MigrateResult<()> {
        self.state()?.changelogs.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn select_changes(&self, table: &str) -> MigrateResult<Vec<Change>> {
        let state = self.state()?;
        Ok(state.check_changelog(table)?.values().cloned().collect())
    }

    async fn try_lock(&self, key: i64) -> MigrateResult<bool> {
        Ok(self.state()?.locks.insert(key))
    }

    async fn unlock(&self, key: i64) -> MigrateResult<()> {
        let mut state = self.state()?;
        if state.unlock_failing {
            return Err(MigrateError::Database(format!("could not release lock {}", key)));
        }
        state.locks.remove(&key);
        Ok(())
    }

    async fn close(&self) -> MigrateResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
enum PendingOp {
    Statement(String),
    Insert(String, Change),
    Delete(String, ChangeId),
}

/// Buffered transaction of the in-memory backend
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<PendingOp>,
}

impl MemoryTransaction {
    /// Whether `id` is in `table` as seen from inside this transaction
    fn row_visible(&self, committed: bool, table: &str, id: ChangeId) -> bool {
        self.pending.iter().fold(committed, |present, op| match op {
            PendingOp::Insert(t, change) if t == table && change.id == id => true,
            PendingOp::Delete(t, deleted) if t == table && *deleted == id => false,
            _ => present,
        })
    }
}

#[async_trait]
impl MigrationTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> MigrateResult<u64> {
        let failing = {
            let state = lock_state(&self.state)?;
            state.failures.iter().find(|pattern| sql.contains(pattern.as_str())).cloned()
        };
        if let Some(pattern) = failing {
            return Err(MigrateError::Database(format!(
                "statement failed (matched '{}'): {}",
                pattern, sql
            )));
        }
        self.pending.push(PendingOp::Statement(sql.to_string()));
        Ok(0)
    }

    async fn insert_change(&mut self, table: &str, change: &Change) -> MigrateResult<()> {
        let committed = {
            let state = lock_state(&self.state)?;
            state.check_changelog(table)?.contains_key(&change.id)
        };
        if self.row_visible(committed, table, change.id) {
            return Err(MigrateError::Database(format!(
                "duplicate key value violates unique constraint: id {} already in {}",
                change.id, table
            )));
        }
        self.pending
            .push(PendingOp::Insert(table.to_string(), change.clone()));
        Ok(())
    }

    async fn delete_change(&mut self, table: &str, id: ChangeId) -> MigrateResult<bool> {
        let committed = {
            let state = lock_state(&self.state)?;
            state.check_changelog(table)?.contains_key(&id)
        };
        let existed = self.row_visible(committed, table, id);
        self.pending.push(PendingOp::Delete(table.to_string(), id));
        Ok(existed)
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        let this = *self;
        let mut state = lock_state(&this.state)?;
        for op in this.pending {
            match op {
                PendingOp::Statement(sql) => state.statements.push(sql),
                PendingOp::Insert(table, change) => {
                    state
                        .changelogs
                        .entry(table)
                        .or_default()
                        .insert(change.id, change);
                }
                PendingOp::Delete(table, id) => {
                    if let Some(rows) = state.changelogs.get_mut(&table) {
                        rows.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "changelog";

    #[tokio::test]
    async fn test_commit_applies_buffered_work() {
        let backend = MemoryBackend::new();
        backend.create_changelog(TABLE).await.unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.execute("CREATE TABLE t (id INT)").await.unwrap();
        tx.insert_change(TABLE, &Change::applied(ChangeId::new(1), "init", Utc::now()))
            .await
            .unwrap();
        assert!(backend.applied_ids(TABLE).unwrap().is_empty());

        tx.commit().await.unwrap();
        assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![ChangeId::new(1)]);
        assert_eq!(backend.executed_statements().unwrap(), vec!["CREATE TABLE t (id INT)"]);
    }

    #[tokio::test]
    async fn test_rollback_discards_work() {
        let backend = MemoryBackend::new();
        backend.create_changelog(TABLE).await.unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.execute("CREATE TABLE t (id INT)").await.unwrap();
        tx.insert_change(TABLE, &Change::pending(ChangeId::new(1), "init"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(backend.applied_ids(TABLE).unwrap().is_empty());
        assert!(backend.executed_statements().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MemoryBackend::new();
        backend.fail_on("BROKEN").unwrap();

        let mut tx = backend.begin().await.unwrap();
        assert!(tx.execute("SELECT 1").await.is_ok());
        assert!(matches!(
            tx.execute("SELECT BROKEN").await,
            Err(MigrateError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_constraints() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        // Table does not exist yet
        assert!(tx
            .insert_change(TABLE, &Change::pending(ChangeId::new(1), "init"))
            .await
            .is_err());

        backend.create_changelog(TABLE).await.unwrap();
        let change = Change::pending(ChangeId::new(1), "init");
        tx.insert_change(TABLE, &change).await.unwrap();
        assert!(tx.insert_change(TABLE, &change).await.is_err());
        assert!(tx.delete_change(TABLE, change.id).await.unwrap());
        assert!(!tx.delete_change(TABLE, change.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let backend = MemoryBackend::new();
        let other = backend.clone();

        assert!(backend.try_lock(7).await.unwrap());
        assert!(!other.try_lock(7).await.unwrap());
        backend.unlock(7).await.unwrap();
        assert!(other.try_lock(7).await.unwrap());
    }
}
