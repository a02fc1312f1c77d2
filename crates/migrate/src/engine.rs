//! Apply/Rollback Engine - Executes migration plans against the database
//!
//! Each script runs as: `before_each` hook, its statements, `after_each`
//! hook, then the ledger write. In per-script mode that sequence is one
//! transaction per script, so a failure leaves earlier scripts committed and
//! nothing of the failing one. In per-plan mode the whole run, run-level
//! hooks included, is a single transaction.

use serde::Serialize;
use shift_core::TransactionMode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backends::{MigrationBackend, MigrationTransaction};
use crate::change::{Change, ChangeId, MigrationDirection, ScriptState};
use crate::changelog::ChangeLogStore;
use crate::diff::ExecutionPlan;
use crate::error::{MigrateError, MigrateResult};
use crate::hooks::{HookDispatcher, HookPhase, HookSlot};
use crate::repository::{MigrationScript, StatementSplitter};

/// What happened to one script of a run
#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutcome {
    pub id: ChangeId,
    pub filename: String,
    pub description: String,
    pub state: ScriptState,
    /// Statements executed for the script itself
    pub statements: usize,
}

impl ScriptOutcome {
    fn pending(script: &MigrationScript) -> Self {
        Self {
            id: script.id,
            filename: script.filename.clone(),
            description: script.description.clone(),
            state: ScriptState::Pending,
            statements: 0,
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub direction: MigrationDirection,
    pub outcomes: Vec<ScriptOutcome>,
    pub warnings: Vec<String>,
    pub execution_time_ms: u128,
}

impl RunReport {
    /// Ids of the scripts committed by the run, in execution order
    pub fn committed(&self) -> Vec<ChangeId> {
        self.outcomes
            .iter()
            .filter(|o| o.state == ScriptState::Committed)
            .map(|o| o.id)
            .collect()
    }

    /// Id of the script that stopped the run, if any
    pub fn failed(&self) -> Option<ChangeId> {
        self.outcomes
            .iter()
            .find(|o| o.state == ScriptState::Failed)
            .map(|o| o.id)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Runs execution plans
pub struct MigrationEngine {
    backend: Arc<dyn MigrationBackend>,
    changelog: ChangeLogStore,
    hooks: Arc<HookDispatcher>,
    splitter: StatementSplitter,
    mode: TransactionMode,
    on_abort: Option<String>,
}

impl MigrationEngine {
    pub fn new(
        backend: Arc<dyn MigrationBackend>,
        changelog: ChangeLogStore,
        hooks: Arc<HookDispatcher>,
    ) -> Self {
        Self {
            backend,
            changelog,
            hooks,
            splitter: StatementSplitter::default(),
            mode: TransactionMode::default(),
            on_abort: None,
        }
    }

    pub fn with_splitter(mut self, splitter: StatementSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_mode(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Statements to run when an up run fails
    pub fn with_on_abort(mut self, script: Option<String>) -> Self {
        self.on_abort = script;
        self
    }

    /// Execute `plan` and report the outcome of every script.
    ///
    /// The first failure stops the run and is returned as the error.
    pub async fn run(&self, plan: &ExecutionPlan) -> MigrateResult<RunReport> {
        let (report, result) = self.execute(plan).await;
        result.map(|()| report)
    }

    /// Execute `plan`, keeping the report when the run fails.
    ///
    /// After a failure the report shows the scripts committed before it, the
    /// one that `Failed`, and the rest still `Pending`.
    pub async fn execute(&self, plan: &ExecutionPlan) -> (RunReport, MigrateResult<()>) {
        let run_id = Uuid::new_v4();
        let start_time = Instant::now();
        let direction = plan.direction;

        let warnings = plan.warnings();
        for warning in &warnings {
            warn!(%run_id, "{}", warning);
        }

        let mut outcomes: Vec<ScriptOutcome> =
            plan.scripts.iter().map(ScriptOutcome::pending).collect();

        let result = if plan.is_empty() {
            info!(%run_id, direction = %direction, "No migrations to run");
            Ok(())
        } else {
            info!(
                %run_id,
                direction = %direction,
                scripts = plan.len(),
                mode = ?self.mode,
                "Starting migration run"
            );
            self.run_plan(plan, &mut outcomes).await
        };

        let report = RunReport {
            run_id,
            direction,
            outcomes,
            warnings,
            execution_time_ms: start_time.elapsed().as_millis(),
        };

        match &result {
            Ok(()) => info!(
                %run_id,
                committed = report.committed().len(),
                elapsed_ms = report.execution_time_ms as u64,
                "Migration run finished"
            ),
            Err(err) => {
                error!(
                    %run_id,
                    direction = %direction,
                    committed = report.committed().len(),
                    "Migration run failed: {}",
                    err
                );
                if direction.is_up() {
                    self.run_on_abort(run_id).await;
                }
            }
        }

        (report, result)
    }

    async fn run_plan(
        &self,
        plan: &ExecutionPlan,
        outcomes: &mut [ScriptOutcome],
    ) -> MigrateResult<()> {
        if plan.direction.is_up() {
            self.changelog.ensure().await?;
        }
        match self.mode {
            TransactionMode::PerScript => self.run_per_script(plan, outcomes).await,
            TransactionMode::PerPlan => self.run_per_plan(plan, outcomes).await,
        }
    }

    async fn run_per_script(
        &self,
        plan: &ExecutionPlan,
        outcomes: &mut [ScriptOutcome],
    ) -> MigrateResult<()> {
        let direction = plan.direction;
        self.run_level_hook(direction, HookPhase::Before).await?;

        for (sequence, script) in plan.scripts.iter().enumerate() {
            let outcome = &mut outcomes[sequence];
            outcome.state = ScriptState::Running;

            let body = match script.section(direction) {
                Ok(body) => body,
                Err(err) => {
                    outcome.state = ScriptState::Failed;
                    return Err(err);
                }
            };

            let mut tx = match self.backend.begin().await {
                Ok(tx) => tx,
                Err(err) => {
                    outcome.state = ScriptState::Failed;
                    return Err(err);
                }
            };
            let applied = self.apply(tx.as_mut(), direction, script, body, sequence).await;
            match applied {
                Ok(statements) => {
                    if let Err(err) = tx.commit().await {
                        outcome.state = ScriptState::Failed;
                        return Err(MigrateError::execution(script.id, err));
                    }
                    outcome.state = ScriptState::Committed;
                    outcome.statements = statements;
                    info!(
                        id = %script.id,
                        file = %script.filename,
                        direction = %direction,
                        "Migration committed"
                    );
                }
                Err(err) => {
                    rollback(tx).await;
                    outcome.state = ScriptState::Failed;
                    return Err(err);
                }
            }
        }

        self.run_level_hook(direction, HookPhase::After).await
    }

    async fn run_per_plan(
        &self,
        plan: &ExecutionPlan,
        outcomes: &mut [ScriptOutcome],
    ) -> MigrateResult<()> {
        let mut tx = self.backend.begin().await?;
        let applied = self.apply_all(tx.as_mut(), plan, outcomes).await;
        match applied {
            Ok(()) => {
                if let Err(err) = tx.commit().await {
                    mark_plan_failed(outcomes);
                    return Err(MigrateError::persistence(format!(
                        "Failed to commit migration plan: {}",
                        err
                    )));
                }
                mark_running(outcomes, ScriptState::Committed);
                Ok(())
            }
            Err(err) => {
                rollback(tx).await;
                mark_plan_failed(outcomes);
                Err(err)
            }
        }
    }

    async fn apply_all(
        &self,
        tx: &mut dyn MigrationTransaction,
        plan: &ExecutionPlan,
        outcomes: &mut [ScriptOutcome],
    ) -> MigrateResult<()> {
        let direction = plan.direction;
        self.hook(HookSlot::Run(direction, HookPhase::Before), None, &mut *tx).await?;

        for (sequence, script) in plan.scripts.iter().enumerate() {
            outcomes[sequence].state = ScriptState::Running;
            let body = script.section(direction)?;
            outcomes[sequence].statements =
                self.apply(&mut *tx, direction, script, body, sequence).await?;
        }

        self.hook(HookSlot::Run(direction, HookPhase::After), None, tx).await
    }

    /// One script inside `tx`: hooks, statements and the ledger write
    async fn apply(
        &self,
        tx: &mut dyn MigrationTransaction,
        direction: MigrationDirection,
        script: &MigrationScript,
        body: &str,
        sequence: usize,
    ) -> MigrateResult<usize> {
        info!(
            id = %script.id,
            file = %script.filename,
            direction = %direction,
            "Running migration"
        );
        let change = script.change();

        self.hook(
            HookSlot::Run(direction, HookPhase::BeforeEach),
            Some((&change, sequence)),
            &mut *tx,
        )
        .await?;

        let statements = self.splitter.split(body);
        for statement in &statements {
            tracing::debug!(id = %script.id, "{}", statement);
            tx.execute(statement)
                .await
                .map_err(|e| MigrateError::execution(script.id, e))?;
        }

        self.hook(
            HookSlot::Run(direction, HookPhase::AfterEach),
            Some((&change, sequence)),
            &mut *tx,
        )
        .await?;

        match direction {
            MigrationDirection::Up => {
                self.changelog.record(tx, &change).await?;
            }
            MigrationDirection::Down => self.changelog.remove(tx, script.id).await?,
        }

        Ok(statements.len())
    }

    async fn hook(
        &self,
        slot: HookSlot,
        change: Option<(&Change, usize)>,
        tx: &mut dyn MigrationTransaction,
    ) -> MigrateResult<()> {
        if !self.hooks.has(slot) {
            return Ok(());
        }
        let mut context = self.hooks.context(slot);
        if let Some((change, sequence)) = change {
            context = context.with_change(change.clone(), sequence);
        }
        self.hooks.dispatch(slot, context, Some(tx)).await
    }

    /// Run-level hook in its own transaction (per-script mode)
    async fn run_level_hook(
        &self,
        direction: MigrationDirection,
        phase: HookPhase,
    ) -> MigrateResult<()> {
        let slot = HookSlot::Run(direction, phase);
        if !self.hooks.has(slot) {
            return Ok(());
        }

        let mut tx = self.backend.begin().await?;
        let dispatched = self.hook(slot, None, tx.as_mut()).await;
        if let Err(err) = dispatched {
            rollback(tx).await;
            return Err(err);
        }
        tx.commit().await
    }

    async fn run_on_abort(&self, run_id: Uuid) {
        let Some(script) = &self.on_abort else {
            return;
        };

        warn!(%run_id, "Running onabort script");
        let result: MigrateResult<()> = async {
            let mut tx = self.backend.begin().await?;
            for statement in self.splitter.split(script) {
                let executed = tx.execute(&statement).await;
                if let Err(err) = executed {
                    rollback(tx).await;
                    return Err(err);
                }
            }
            tx.commit().await
        }
        .await;

        if let Err(err) = result {
            error!(%run_id, "onabort script failed: {}", err);
        }
    }
}

fn mark_running(outcomes: &mut [ScriptOutcome], state: ScriptState) {
    for outcome in outcomes.iter_mut().filter(|o| o.state == ScriptState::Running) {
        outcome.state = state;
    }
}

/// The last script reached failed; the ones before it were rolled back
fn mark_plan_failed(outcomes: &mut [ScriptOutcome]) {
    if let Some(last) = outcomes.iter_mut().rfind(|o| o.state == ScriptState::Running) {
        last.state = ScriptState::Failed;
    }
    for outcome in outcomes.iter_mut().filter(|o| o.state == ScriptState::Running) {
        outcome.state = ScriptState::Pending;
        outcome.statements = 0;
    }
}

async fn rollback(tx: Box<dyn MigrationTransaction>) {
    if let Err(err) = tx.rollback().await {
        warn!("Transaction rollback failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::change::Target;
    use crate::diff::plan;
    use crate::error::HookError;
    use crate::hooks::FnHook;
    use crate::repository::ScriptSet;
    use shift_core::MigrationPaths;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    const TABLE: &str = "changelog";

    fn id(value: u64) -> ChangeId {
        ChangeId::new(value)
    }

    fn scripts() -> ScriptSet {
        ScriptSet::from_scripts(vec![
            MigrationScript::new(id(1), "init", "CREATE TABLE t (id INT);")
                .with_down("DROP TABLE t;"),
            MigrationScript::new(id(2), "add col", "ALTER TABLE t ADD c INT;\nUPDATE t SET c = 0;")
                .with_down("ALTER TABLE t DROP c;"),
            MigrationScript::new(id(3), "add idx", "CREATE INDEX i ON t (c);"),
        ])
        .unwrap()
    }

    fn dispatcher() -> HookDispatcher {
        HookDispatcher::new(MigrationPaths::new("/tmp/db"), BTreeMap::new())
    }

    fn engine(backend: &MemoryBackend, hooks: HookDispatcher) -> MigrationEngine {
        let backend: Arc<dyn MigrationBackend> = Arc::new(backend.clone());
        let changelog = ChangeLogStore::new(Arc::clone(&backend), TABLE);
        MigrationEngine::new(backend, changelog, Arc::new(hooks))
    }

    async fn ledger(backend: &MemoryBackend) -> Vec<Change> {
        backend.select_changes(TABLE).await.unwrap_or_default()
    }

    #[tokio::test]
    async fn test_up_applies_and_records() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend, dispatcher());

        let up = plan(&scripts(), &[], MigrationDirection::Up, Target::Latest).unwrap();
        let report = engine.run(&up).await.unwrap();

        assert_eq!(report.committed(), vec![id(1), id(2), id(3)]);
        assert_eq!(report.outcomes[1].statements, 2);
        assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![id(1), id(2), id(3)]);
        assert!(ledger(&backend).await.iter().all(Change::is_applied));
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_scripts() {
        let backend = MemoryBackend::new();
        backend.fail_on("UPDATE t").unwrap();
        let engine = engine(&backend, dispatcher());

        let up = plan(&scripts(), &[], MigrationDirection::Up, Target::Latest).unwrap();
        let err = engine.run(&up).await.unwrap_err();

        assert!(matches!(err, MigrateError::Execution { id: failed, .. } if failed == id(2)));
        assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![id(1)]);
        // The statement that succeeded before the failure was rolled back too
        assert!(!backend
            .executed_statements()
            .unwrap()
            .iter()
            .any(|s| s.contains("ADD c")));
    }

    #[tokio::test]
    async fn test_failed_run_still_reports_script_states() {
        let backend = MemoryBackend::new();
        backend.fail_on("UPDATE t").unwrap();
        let engine = engine(&backend, dispatcher());

        let up = plan(&scripts(), &[], MigrationDirection::Up, Target::Latest).unwrap();
        let (report, result) = engine.execute(&up).await;

        assert!(result.is_err());
        let states: Vec<_> = report.outcomes.iter().map(|o| o.state).collect();
        assert_eq!(
            states,
            vec![ScriptState::Committed, ScriptState::Failed, ScriptState::Pending]
        );
        assert_eq!(report.committed(), vec![id(1)]);
        assert_eq!(report.failed(), Some(id(2)));
    }

    #[tokio::test]
    async fn test_per_plan_failure_reports_failing_script() {
        let backend = MemoryBackend::new();
        backend.fail_on("UPDATE t").unwrap();
        let engine = engine(&backend, dispatcher()).with_mode(TransactionMode::PerPlan);

        let up = plan(&scripts(), &[], MigrationDirection::Up, Target::Latest).unwrap();
        let (report, result) = engine.execute(&up).await;

        assert!(result.is_err());
        assert!(report.committed().is_empty());
        assert_eq!(report.failed(), Some(id(2)));
        assert_eq!(report.outcomes[0].state, ScriptState::Pending);
        assert_eq!(report.outcomes[2].state, ScriptState::Pending);
    }

    #[tokio::test]
    async fn test_per_plan_failure_rolls_back_everything() {
        let backend = MemoryBackend::new();
        backend.fail_on("CREATE INDEX").unwrap();
        let engine = engine(&backend, dispatcher()).with_mode(TransactionMode::PerPlan);

        let up = plan(&scripts(), &[], MigrationDirection::Up, Target::Latest).unwrap();
        assert!(engine.run(&up).await.is_err());
        assert!(backend.applied_ids(TABLE).unwrap().is_empty());
        assert!(backend.executed_statements().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_down_stops_at_irreversible_script() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend, dispatcher());
        let set = scripts();

        let up = plan(&set, &[], MigrationDirection::Up, Target::Latest).unwrap();
        engine.run(&up).await.unwrap();

        let applied = ledger(&backend).await;
        let down = plan(&set, &applied, MigrationDirection::Down, Target::Steps(3)).unwrap();
        let err = engine.run(&down).await.unwrap_err();
        assert!(matches!(err, MigrateError::Irreversible { id: failed, .. } if failed == id(3)));
        assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![id(1), id(2), id(3)]);
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_with_contexts() {
        let backend = MemoryBackend::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut hooks = dispatcher();
        for phase in [
            HookPhase::Before,
            HookPhase::BeforeEach,
            HookPhase::AfterEach,
            HookPhase::After,
        ] {
            let calls = Arc::clone(&calls);
            hooks = hooks.register(
                HookSlot::Run(MigrationDirection::Up, phase),
                Arc::new(FnHook::new(phase.to_string(), move |context| {
                    let id = context.change.map(|c| c.id.to_string()).unwrap_or_default();
                    let call = format!("{}:{}:{}", context.phase, id, context.sequence);
                    calls.lock().unwrap().push(call);
                    Ok(())
                })),
            );
        }

        let engine = engine(&backend, hooks);
        let first_two: Vec<_> = scripts().iter().take(2).collect::<MigrateResult<_>>().unwrap();
        let set = ScriptSet::from_scripts(first_two).unwrap();
        let up = plan(&set, &[], MigrationDirection::Up, Target::Latest).unwrap();
        engine.run(&up).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "before::0",
                "before_each:1:0",
                "after_each:1:0",
                "before_each:2:1",
                "after_each:2:1",
                "after::0",
            ]
        );
    }

    #[tokio::test]
    async fn test_before_each_rejection_aborts_script() {
        let backend = MemoryBackend::new();
        let hooks = dispatcher().register(
            HookSlot::Run(MigrationDirection::Up, HookPhase::BeforeEach),
            Arc::new(FnHook::new("gate", |context| match context.change {
                Some(change) if change.id == ChangeId::new(2) => {
                    Err(HookError::Rejected("not approved".to_string()))
                }
                _ => Ok(()),
            })),
        );
        let engine = engine(&backend, hooks);

        let up = plan(&scripts(), &[], MigrationDirection::Up, Target::Latest).unwrap();
        let err = engine.run(&up).await.unwrap_err();
        assert!(matches!(err, MigrateError::Hook { .. }));
        assert_eq!(backend.applied_ids(TABLE).unwrap(), vec![id(1)]);
    }

    #[tokio::test]
    async fn test_on_abort_runs_after_failed_up() {
        let backend = MemoryBackend::new();
        backend.fail_on("CREATE INDEX").unwrap();
        let engine = engine(&backend, dispatcher())
            .with_on_abort(Some("NOTIFY migration_failed;".to_string()));

        let up = plan(&scripts(), &[], MigrationDirection::Up, Target::Latest).unwrap();
        assert!(engine.run(&up).await.is_err());
        assert_eq!(
            backend.executed_statements().unwrap().last().map(String::as_str),
            Some("NOTIFY migration_failed")
        );
    }

    #[tokio::test]
    async fn test_empty_plan_touches_nothing() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend, dispatcher());

        let down = plan(&scripts(), &[], MigrationDirection::Down, Target::Latest).unwrap();
        let report = engine.run(&down).await.unwrap();
        assert!(report.is_empty());
        assert!(!backend.changelog_exists(TABLE).await.unwrap());
    }
}
