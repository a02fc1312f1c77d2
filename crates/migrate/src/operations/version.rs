use std::cmp::Ordering;

use super::Migrator;
use crate::change::{ChangeId, MigrationDirection, Target};
use crate::diff::{self, ExecutionPlan};
use crate::engine::RunReport;
use crate::error::{MigrateError, MigrateResult};

impl Migrator {
    /// Migrate up or down until `id` is the latest applied change
    pub async fn version(&self, id: ChangeId) -> MigrateResult<RunReport> {
        self.locked(self.run_version(id)).await
    }

    async fn run_version(&self, id: ChangeId) -> MigrateResult<RunReport> {
        let scripts = self.repository.scan()?;
        if !scripts.contains(id) {
            return Err(MigrateError::UnknownVersion(id));
        }

        let ledger = self.changelog.query().await?;
        let latest = ledger.iter().map(|change| change.id).max();

        let plan = match latest.map(|latest| latest.cmp(&id)) {
            Some(Ordering::Greater) => {
                tracing::info!(version = %id, "Downgrading");
                // Everything applied after `id`, newest first
                let oldest_after = ledger
                    .iter()
                    .map(|change| change.id)
                    .filter(|applied| *applied > id)
                    .min()
                    .unwrap_or(id);
                let target = Target::Through(oldest_after);
                diff::plan(&scripts, &ledger, MigrationDirection::Down, target)?
            }
            Some(Ordering::Equal) => {
                tracing::info!(version = %id, "Already at version");
                ExecutionPlan {
                    direction: MigrationDirection::Up,
                    scripts: Vec::new(),
                    missing: diff::missing(&scripts, &ledger),
                    skipped: diff::skipped(&scripts, &ledger),
                }
            }
            _ => {
                tracing::info!(version = %id, "Upgrading");
                diff::plan(&scripts, &ledger, MigrationDirection::Up, Target::Through(id))?
            }
        };

        self.engine()?.run(&plan).await
    }
}
