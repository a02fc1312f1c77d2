use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::Migrator;
use crate::change::{Change, ChangeId};
use crate::error::MigrateResult;
use crate::repository::ScriptSet;

const HEADER: &str = "ID             Applied At          Description";
const RULE_WIDTH: usize = 80;

/// Every known change, from scripts and ledger, with its state
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Merged changes ordered by id
    pub changes: Vec<Change>,
    /// Applied changes whose script no longer exists
    pub missing: Vec<ChangeId>,
    pub applied: usize,
    pub pending: usize,
}

impl StatusReport {
    /// Merge the scripts with the ledger.
    ///
    /// Ledger rows win for applied changes but take the script's file name.
    pub fn merge(scripts: &ScriptSet, ledger: &[Change]) -> Self {
        let mut changes = Vec::with_capacity(scripts.len() + ledger.len());
        let mut applied = 0;
        let mut pending = 0;

        for entry in scripts.entries() {
            match ledger.iter().find(|change| change.id == entry.id) {
                Some(change) => {
                    changes.push(change.clone().with_filename(entry.filename.clone()));
                    applied += 1;
                }
                None => {
                    changes.push(entry.change());
                    pending += 1;
                }
            }
        }

        let known: BTreeSet<ChangeId> = scripts.ids().into_iter().collect();
        let mut missing = Vec::new();
        for change in ledger.iter().filter(|change| !known.contains(&change.id)) {
            missing.push(change.id);
            changes.push(change.clone());
        }

        changes.sort();
        missing.sort();

        Self {
            changes,
            missing,
            applied,
            pending,
        }
    }

    pub fn is_missing(&self, id: ChangeId) -> bool {
        self.missing.binary_search(&id).is_ok()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", HEADER)?;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        for change in &self.changes {
            if self.is_missing(change.id) {
                writeln!(f, "{}    <== missing script", change)?;
            } else {
                writeln!(f, "{}", change)?;
            }
        }
        Ok(())
    }
}

impl Migrator {
    /// Applied, pending and missing changes of the environment
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let scripts = self.repository.scan()?;
        let ledger = self.changelog.query().await?;
        let report = StatusReport::merge(&scripts, &ledger);

        tracing::debug!(
            applied = report.applied,
            pending = report.pending,
            missing = report.missing.len(),
            "Computed migration status"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MigrationScript;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_merge_counts_and_order() {
        let scripts = ScriptSet::from_scripts(vec![
            MigrationScript::new(ChangeId::new(1), "first", "SELECT 1;"),
            MigrationScript::new(ChangeId::new(3), "third", "SELECT 3;"),
        ])
        .unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let ledger = vec![
            Change::applied(ChangeId::new(1), "first", at),
            Change::applied(ChangeId::new(2), "gone", at),
        ];

        let report = StatusReport::merge(&scripts, &ledger);
        let ids: Vec<_> = report.changes.iter().map(|c| c.id.value()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!((report.applied, report.pending), (1, 1));
        assert_eq!(report.missing, vec![ChangeId::new(2)]);
        assert_eq!(report.changes[0].filename.as_deref(), Some("1_first.sql"));

        let text = report.to_string();
        assert!(text.starts_with(HEADER));
        assert!(text.contains("1 2024-05-01 08:30:00 first"));
        assert!(text.contains("2 2024-05-01 08:30:00 gone    <== missing script"));
        assert!(text.contains("3    ...pending...    third"));
    }
}
