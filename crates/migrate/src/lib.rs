//! # shift-migrate
//!
//! Schema migration engine: a ledger of applied changes kept in the target
//! database, a directory of numbered SQL scripts with apply and undo
//! sections, a planner comparing the two, and an engine applying or rolling
//! back the plan with one transaction per script. User hooks run around
//! each script.
//!
//! ```no_run
//! use shift_core::{Environment, MigrationPaths, MigrationSettings};
//! use shift_migrate::{Migrator, Target};
//!
//! # async fn run() -> shift_migrate::MigrateResult<()> {
//! let paths = MigrationPaths::new("db");
//! let settings = MigrationSettings::load(&paths, &Environment::Development)?;
//! let migrator = Migrator::connect(paths, settings).await?;
//!
//! let report = migrator.up(Target::Latest).await?;
//! println!("applied {} migrations", report.committed().len());
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod change;
pub mod changelog;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod lock;
pub mod operations;
pub mod repository;

pub use backends::{
    BackendType, MemoryBackend, MigrationBackend, MigrationTransaction, PostgresBackend,
};
pub use change::{Change, ChangeId, MigrationDirection, ScriptState, Target};
pub use changelog::ChangeLogStore;
pub use diff::ExecutionPlan;
pub use engine::{MigrationEngine, RunReport, ScriptOutcome};
pub use error::{HookError, MigrateError, MigrateResult};
pub use hooks::{HookContext, HookDispatcher, HookPhase, HookScript, HookSlot};
pub use operations::{init, BootstrapOutcome, Migrator, StatusReport};
pub use repository::{MigrationScript, ScriptRepository, ScriptSet, StatementSplitter};
