//! Migration Operations - The commands of the migration tool
//!
//! [`Migrator`] ties one environment's settings, its script directory and a
//! database backend together and exposes every command as an async method.
//! Commands that change the database run under the run lock.

mod bootstrap;
mod init;
mod new;
mod script;
mod status;
mod version;

pub use bootstrap::BootstrapOutcome;
pub use init::init;
pub use new::DEFAULT_TEMPLATE;
pub use status::StatusReport;

use shift_core::{ConfigError, MigrationPaths, MigrationSettings};
use std::future::Future;
use std::sync::Arc;

use crate::backends::{self, MigrationBackend};
use crate::change::{MigrationDirection, Target};
use crate::changelog::ChangeLogStore;
use crate::diff::{self, ExecutionPlan};
use crate::engine::{MigrationEngine, RunReport};
use crate::error::MigrateResult;
use crate::hooks::HookDispatcher;
use crate::lock::RunLock;
use crate::repository::{ScriptRepository, StatementSplitter};

/// Entry point for migration commands on one environment
pub struct Migrator {
    paths: MigrationPaths,
    settings: MigrationSettings,
    backend: Arc<dyn MigrationBackend>,
    changelog: ChangeLogStore,
    repository: ScriptRepository,
    hooks: Arc<HookDispatcher>,
}

impl Migrator {
    /// Create a migrator over an existing backend
    pub fn new(
        paths: MigrationPaths,
        settings: MigrationSettings,
        backend: Arc<dyn MigrationBackend>,
    ) -> MigrateResult<Self> {
        let repository = ScriptRepository::from_settings(paths.scripts_dir(), &settings)?;
        let hooks = HookDispatcher::from_settings(&paths, &settings)?;
        let changelog = ChangeLogStore::new(Arc::clone(&backend), settings.changelog_table.clone());

        Ok(Self {
            paths,
            settings,
            backend,
            changelog,
            repository,
            hooks: Arc::new(hooks),
        })
    }

    /// Connect to `database_url` and create a migrator
    pub async fn connect(
        paths: MigrationPaths,
        settings: MigrationSettings,
    ) -> MigrateResult<Self> {
        let url = settings.database_url.clone().ok_or_else(|| {
            ConfigError::missing_required("database_url", "Set database_url or DATABASE_URL")
        })?;
        let backend = backends::connect(&url).await?;
        Self::new(paths, settings, backend)
    }

    /// Replace the configured hooks
    pub fn with_hooks(mut self, hooks: HookDispatcher) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn paths(&self) -> &MigrationPaths {
        &self.paths
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn MigrationBackend> {
        &self.backend
    }

    pub fn changelog(&self) -> &ChangeLogStore {
        &self.changelog
    }

    pub fn repository(&self) -> &ScriptRepository {
        &self.repository
    }

    /// Apply pending migrations up to `target`
    pub async fn up(&self, target: Target) -> MigrateResult<RunReport> {
        self.locked(self.run_target(MigrationDirection::Up, target)).await
    }

    /// Roll back applied migrations down to `target`
    pub async fn down(&self, target: Target) -> MigrateResult<RunReport> {
        self.locked(self.run_target(MigrationDirection::Down, target)).await
    }

    /// What `up` would run, without running it
    pub async fn pending(&self) -> MigrateResult<ExecutionPlan> {
        self.plan(MigrationDirection::Up, Target::Latest).await
    }

    /// Plan a run from the current scripts and ledger
    pub async fn plan(
        &self,
        direction: MigrationDirection,
        target: Target,
    ) -> MigrateResult<ExecutionPlan> {
        let scripts = self.repository.scan()?;
        let ledger = self.changelog.query().await?;
        diff::plan(&scripts, &ledger, direction, target)
    }

    async fn run_target(
        &self,
        direction: MigrationDirection,
        target: Target,
    ) -> MigrateResult<RunReport> {
        let plan = self.plan(direction, target).await?;
        self.engine()?.run(&plan).await
    }

    fn engine(&self) -> MigrateResult<MigrationEngine> {
        Ok(MigrationEngine::new(
            Arc::clone(&self.backend),
            self.changelog.clone(),
            Arc::clone(&self.hooks),
        )
        .with_splitter(self.splitter())
        .with_mode(self.settings.transaction_mode)
        .with_on_abort(self.repository.on_abort_script()?))
    }

    fn splitter(&self) -> StatementSplitter {
        StatementSplitter::from_settings(&self.settings)
    }

    /// Run `work` while holding the run lock.
    ///
    /// The outcome of `work` is returned even when releasing the lock fails.
    async fn locked<T>(&self, work: impl Future<Output = MigrateResult<T>>) -> MigrateResult<T> {
        let key = self.settings.lock_key;
        let lock = RunLock::acquire(Arc::clone(&self.backend), key).await?;
        let result = work.await;
        if let Err(err) = lock.release().await {
            tracing::error!(key, "Failed to release migration lock: {}", err);
        }
        result
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("paths", &self.paths)
            .field("backend", &self.backend.backend_type())
            .field("changelog", &self.changelog.table())
            .field("hooks", &self.hooks)
            .finish()
    }
}
