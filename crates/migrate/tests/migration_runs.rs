//! Integration tests for up/down runs through the Migrator
//!
//! Scripts live in a temporary migrations home; the database is the shared
//! in-memory backend so the ledger and executed statements can be inspected.

use shift_core::{MigrationPaths, MigrationSettings, TransactionMode};
use shift_migrate::{
    Change, ChangeId, MemoryBackend, MigrateError, MigrationBackend, MigrationDirection, Migrator,
    Target,
};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const TABLE: &str = "changelog";

const INIT: &str = "CREATE TABLE t (id INT);\n-- //@UNDO\nDROP TABLE t;\n";
const ADD_COL: &str =
    "ALTER TABLE t ADD c INT;\nUPDATE t SET c = 0;\n-- //@UNDO\nALTER TABLE t DROP c;\n";
const ADD_IDX: &str = "CREATE INDEX i ON t (c);\n-- //@UNDO\nDROP INDEX i;\n";

fn id(value: u64) -> ChangeId {
    ChangeId::new(value)
}

fn home(scripts: &[(&str, &str)]) -> (TempDir, MigrationPaths) {
    let dir = TempDir::new().unwrap();
    let paths = MigrationPaths::new(dir.path());
    fs::create_dir_all(paths.scripts_dir()).unwrap();
    for (name, body) in scripts {
        fs::write(paths.scripts_dir().join(name), body).unwrap();
    }
    (dir, paths)
}

fn standard_home() -> (TempDir, MigrationPaths) {
    home(&[
        ("1_init.sql", INIT),
        ("2_add_col.sql", ADD_COL),
        ("3_add_idx.sql", ADD_IDX),
    ])
}

fn migrator(
    paths: &MigrationPaths,
    backend: &MemoryBackend,
    settings: MigrationSettings,
) -> Migrator {
    Migrator::new(paths.clone(), settings, Arc::new(backend.clone())).unwrap()
}

#[tokio::test]
async fn test_pending_apply_and_partial_rollback() {
    let (_dir, paths) = standard_home();
    let backend = MemoryBackend::new();
    backend.seed_change(TABLE, Change::pending(id(1), "init")).unwrap();
    let migrator = migrator(&paths, &backend, MigrationSettings::default());

    let pending = migrator.pending().await.unwrap();
    assert_eq!(pending.ids(), vec![id(2), id(3)]);
    assert!(pending.warnings().is_empty());

    let report = migrator.up(Target::Latest).await.unwrap();
    assert_eq!(report.committed(), vec![id(2), id(3)]);
    assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![id(1), id(2), id(3)]);

    let down = migrator
        .plan(MigrationDirection::Down, Target::Through(id(2)))
        .await
        .unwrap();
    assert_eq!(down.ids(), vec![id(3), id(2)]);
}

#[tokio::test]
async fn test_second_up_is_a_no_op() {
    let (_dir, paths) = standard_home();
    let backend = MemoryBackend::new();
    let migrator = migrator(&paths, &backend, MigrationSettings::default());

    migrator.up(Target::Latest).await.unwrap();
    let ledger = backend.select_changes(TABLE).await.unwrap();
    let statements = backend.executed_statements().unwrap().len();

    let report = migrator.up(Target::Latest).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(backend.select_changes(TABLE).await.unwrap(), ledger);
    assert_eq!(backend.executed_statements().unwrap().len(), statements);
}

#[tokio::test]
async fn test_up_then_down_restores_ledger() {
    let (_dir, paths) = standard_home();
    let backend = MemoryBackend::new();
    let migrator = migrator(&paths, &backend, MigrationSettings::default());

    migrator.up(Target::Steps(2)).await.unwrap();
    assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![id(1), id(2)]);

    // Latest undoes only the most recent change
    let report = migrator.down(Target::Latest).await.unwrap();
    assert_eq!(report.committed(), vec![id(2)]);

    migrator.down(Target::Latest).await.unwrap();
    assert!(backend.applied_ids(TABLE).unwrap().is_empty());
    assert_eq!(
        backend.executed_statements().unwrap(),
        vec![
            "CREATE TABLE t (id INT)",
            "ALTER TABLE t ADD c INT",
            "UPDATE t SET c = 0",
            "ALTER TABLE t DROP c",
            "DROP TABLE t",
        ]
    );
}

#[tokio::test]
async fn test_failed_statement_leaves_no_ledger_entry() {
    let (_dir, paths) = standard_home();
    let backend = MemoryBackend::new();
    backend.fail_on("UPDATE t").unwrap();
    let migrator = migrator(&paths, &backend, MigrationSettings::default());

    let err = migrator.up(Target::Latest).await.unwrap_err();
    assert!(matches!(err, MigrateError::Execution { id: failed, .. } if failed == id(2)));
    assert_eq!(err.change_id(), Some(id(2)));
    assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![id(1)]);

    // The next run picks up where the failed one stopped
    backend.clear_failures().unwrap();
    let report = migrator.up(Target::Latest).await.unwrap();
    assert_eq!(report.committed(), vec![id(2), id(3)]);
}

#[tokio::test]
async fn test_per_plan_mode_is_all_or_nothing() {
    let (_dir, paths) = standard_home();
    let backend = MemoryBackend::new();
    backend.fail_on("CREATE INDEX").unwrap();
    let mut settings = MigrationSettings::default();
    settings.transaction_mode = TransactionMode::PerPlan;
    let migrator = migrator(&paths, &backend, settings);

    assert!(migrator.up(Target::Latest).await.is_err());
    assert!(backend.applied_ids(TABLE).unwrap().is_empty());
}

#[tokio::test]
async fn test_irreversible_script_blocks_down() {
    let (_dir, paths) = home(&[
        ("1_init.sql", INIT),
        ("2_seed.sql", "INSERT INTO t VALUES (1);\n"),
    ]);
    let backend = MemoryBackend::new();
    let migrator = migrator(&paths, &backend, MigrationSettings::default());
    migrator.up(Target::Latest).await.unwrap();

    let err = migrator.down(Target::Latest).await.unwrap_err();
    assert!(matches!(err, MigrateError::Irreversible { id: failed, .. } if failed == id(2)));
    assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![id(1), id(2)]);
}

#[tokio::test]
async fn test_down_with_missing_script_fails() {
    let (_dir, paths) = home(&[("1_init.sql", INIT)]);
    let backend = MemoryBackend::new();
    backend.seed_change(TABLE, Change::pending(id(1), "init")).unwrap();
    backend.seed_change(TABLE, Change::pending(id(7), "deleted")).unwrap();
    let migrator = migrator(&paths, &backend, MigrationSettings::default());

    let pending = migrator.pending().await.unwrap();
    assert!(pending.is_empty());
    assert_eq!(pending.missing.len(), 1);

    assert!(matches!(
        migrator.down(Target::Latest).await,
        Err(MigrateError::MissingScript { id: missing, .. }) if missing == id(7)
    ));
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let (_dir, paths) = standard_home();
    let backend = MemoryBackend::new();
    let settings = MigrationSettings::default();
    let key = settings.lock_key;
    let first = migrator(&paths, &backend, settings.clone());
    let second = migrator(&paths, &backend, settings);

    // Another migrator holds the lock
    assert!(first.backend().try_lock(key).await.unwrap());
    assert!(matches!(
        second.up(Target::Latest).await,
        Err(MigrateError::ConcurrentMigration { key: held }) if held == key
    ));
    assert!(backend.applied_ids(TABLE).unwrap().is_empty());

    first.backend().unlock(key).await.unwrap();
    second.up(Target::Latest).await.unwrap();
    assert!(!backend.is_locked(key).unwrap());
}

#[tokio::test]
async fn test_lock_is_released_after_failure() {
    let (_dir, paths) = standard_home();
    let backend = MemoryBackend::new();
    backend.fail_on("CREATE TABLE").unwrap();
    let settings = MigrationSettings::default();
    let key = settings.lock_key;
    let migrator = migrator(&paths, &backend, settings);

    assert!(migrator.up(Target::Latest).await.is_err());
    assert!(!backend.is_locked(key).unwrap());
}

#[tokio::test]
async fn test_lock_release_failure_keeps_run_result() {
    let (_dir, paths) = standard_home();
    let backend = MemoryBackend::new();
    let key = MigrationSettings::default().lock_key;
    backend.set_unlock_failing(true).unwrap();
    let migrator = migrator(&paths, &backend, MigrationSettings::default());

    let report = migrator.up(Target::Steps(1)).await.unwrap();
    assert_eq!(report.committed(), vec![id(1)]);
    assert!(backend.is_locked(key).unwrap());

    backend.set_unlock_failing(false).unwrap();
    backend.unlock(key).await.unwrap();
    backend.set_unlock_failing(true).unwrap();
    backend.fail_on("UPDATE t").unwrap();

    let err = migrator.up(Target::Latest).await.unwrap_err();
    assert!(matches!(err, MigrateError::Execution { id: failed, .. } if failed == id(2)));
}

#[tokio::test]
async fn test_variables_and_delimiter_settings() {
    let (_dir, paths) = home(&[(
        "1_schema.sql",
        "CREATE SCHEMA ${schema}\nGO\nCREATE TABLE ${schema}.t (id INT)\nGO\n",
    )]);
    let backend = MemoryBackend::new();
    let mut settings = MigrationSettings::default();
    settings.delimiter = "GO".to_string();
    settings.full_line_delimiter = true;
    settings.variables.insert("schema".to_string(), "app".to_string());
    let migrator = migrator(&paths, &backend, settings);

    migrator.up(Target::Latest).await.unwrap();
    assert_eq!(
        backend.executed_statements().unwrap(),
        vec!["CREATE SCHEMA app", "CREATE TABLE app.t (id INT)"]
    );
}

#[tokio::test]
async fn test_on_abort_script_runs_after_failed_up() {
    let (_dir, paths) = home(&[("1_init.sql", INIT), ("onabort.sql", "NOTIFY aborted;\n")]);
    let backend = MemoryBackend::new();
    backend.fail_on("CREATE TABLE").unwrap();
    let migrator = migrator(&paths, &backend, MigrationSettings::default());

    assert!(migrator.up(Target::Latest).await.is_err());
    assert_eq!(backend.executed_statements().unwrap(), vec!["NOTIFY aborted"]);
}
