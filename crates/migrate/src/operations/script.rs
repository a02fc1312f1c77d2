use chrono::Utc;

use super::Migrator;
use crate::change::{ChangeId, MigrationDirection, APPLIED_AT_FORMAT};
use crate::diff;
use crate::error::{MigrateError, MigrateResult};
use crate::repository::MigrationScript;

impl Migrator {
    /// SQL applying the scripts in `(from, to]`, or undoing `(to, from]`
    /// newest first when `from > to`, for running by hand.
    ///
    /// Use `0` as `from` to include the first script.
    pub fn script(&self, from: ChangeId, to: ChangeId) -> MigrateResult<String> {
        if from == to {
            return Err(MigrateError::InvalidArgument(
                "The script range needs two different versions; use 0 to include the first one"
                    .to_string(),
            ));
        }
        let direction = if from < to {
            MigrationDirection::Up
        } else {
            MigrationDirection::Down
        };
        let (low, high) = if from < to { (from, to) } else { (to, from) };

        let scripts = self.repository.scan()?;
        let mut selected = Vec::new();
        for entry in scripts.entries().iter().filter(|e| e.id > low && e.id <= high) {
            selected.push(scripts.load(entry)?);
        }
        if !direction.is_up() {
            selected.reverse();
        }

        self.render(&selected, direction)
    }

    /// SQL applying every pending script
    pub async fn script_pending(&self) -> MigrateResult<String> {
        let selected = self.pending_scripts().await?;
        self.render(&selected, MigrationDirection::Up)
    }

    /// SQL undoing every pending script, newest first
    pub async fn script_pending_undo(&self) -> MigrateResult<String> {
        let mut selected = self.pending_scripts().await?;
        selected.reverse();
        self.render(&selected, MigrationDirection::Down)
    }

    async fn pending_scripts(&self) -> MigrateResult<Vec<MigrationScript>> {
        let scripts = self.repository.scan()?;
        let ledger = self.changelog.query().await?;
        diff::pending(&scripts, &ledger)
            .into_iter()
            .filter_map(|change| scripts.load_id(change.id).transpose())
            .collect()
    }

    fn render(
        &self,
        scripts: &[MigrationScript],
        direction: MigrationDirection,
    ) -> MigrateResult<String> {
        let table = self.changelog.table();
        let applied_at = Utc::now().format(APPLIED_AT_FORMAT).to_string();
        let mut out = String::new();

        for script in scripts {
            let section = script.section(direction)?;
            let ledger = match direction {
                MigrationDirection::Up => format!(
                    "INSERT INTO {} (id, applied_at, description) VALUES ({}, '{}', '{}')",
                    table,
                    script.id,
                    applied_at,
                    script.description.replace('\'', "''")
                ),
                MigrationDirection::Down => {
                    format!("DELETE FROM {} WHERE id = {}", table, script.id)
                }
            };

            out.push_str(&format!(
                "-- {}\n{}\n\n{}{}\n\n",
                script.filename,
                section.trim_end(),
                ledger,
                self.statement_terminator()
            ));
        }

        Ok(out)
    }

    fn statement_terminator(&self) -> String {
        if self.settings.full_line_delimiter {
            format!("\n{}", self.settings.delimiter)
        } else {
            self.settings.delimiter.clone()
        }
    }
}
