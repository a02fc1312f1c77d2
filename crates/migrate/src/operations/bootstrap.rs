use serde::Serialize;

use super::Migrator;
use crate::error::MigrateResult;
use crate::repository::BOOTSTRAP_SCRIPT;

/// What `bootstrap` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// `bootstrap.sql` ran with this many statements
    Applied { statements: usize },
    /// The ledger already exists and the run was not forced
    ChangelogExists,
    /// There is no `bootstrap.sql`
    NoScript,
}

impl Migrator {
    /// Run `bootstrap.sql` against a database that has no ledger yet.
    ///
    /// With `force` the script runs even when the ledger exists. The whole
    /// script is a single transaction.
    pub async fn bootstrap(&self, force: bool) -> MigrateResult<BootstrapOutcome> {
        self.locked(self.run_bootstrap(force)).await
    }

    async fn run_bootstrap(&self, force: bool) -> MigrateResult<BootstrapOutcome> {
        if !force && self.changelog.exists().await? {
            tracing::warn!(
                table = %self.changelog.table(),
                "The changelog already exists; bootstrap only runs against a fresh database"
            );
            return Ok(BootstrapOutcome::ChangelogExists);
        }

        let Some(script) = self.repository.bootstrap_script()? else {
            tracing::warn!(
                dir = %self.repository.dir().display(),
                "No {} found, nothing to bootstrap",
                BOOTSTRAP_SCRIPT
            );
            return Ok(BootstrapOutcome::NoScript);
        };

        let statements = self.splitter().split(&script);
        let mut tx = self.backend.begin().await?;
        for statement in &statements {
            tracing::debug!(script = BOOTSTRAP_SCRIPT, "{}", statement);
            let executed = tx.execute(statement).await;
            if let Err(err) = executed {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!("Transaction rollback failed: {}", rollback_err);
                }
                return Err(err);
            }
        }
        tx.commit().await?;

        tracing::info!(statements = statements.len(), "Bootstrap script applied");
        Ok(BootstrapOutcome::Applied {
            statements: statements.len(),
        })
    }
}
