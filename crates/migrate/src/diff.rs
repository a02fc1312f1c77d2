//! Diff Engine - Computes which scripts a run executes
//!
//! Planning compares the script repository with the ledger and never touches
//! the database. Up plans hold pending scripts in ascending id order, down
//! plans hold applied changes in descending id order.

use std::collections::BTreeSet;

use crate::change::{Change, ChangeId, MigrationDirection, Target};
use crate::error::{MigrateError, MigrateResult};
use crate::repository::{MigrationScript, ScriptSet};

/// Ordered scripts selected for one run, with the inconsistencies found
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub direction: MigrationDirection,
    pub scripts: Vec<MigrationScript>,
    /// Applied changes whose script no longer exists
    pub missing: Vec<Change>,
    /// Pending scripts older than the latest applied change
    pub skipped: Vec<Change>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn ids(&self) -> Vec<ChangeId> {
        self.scripts.iter().map(|s| s.id).collect()
    }

    /// Human readable warnings for missing and out-of-order scripts
    pub fn warnings(&self) -> Vec<String> {
        let missing = self.missing.iter().map(|change| {
            format!(
                "Migration script for applied change {} ('{}') was not found",
                change.id, change.description
            )
        });
        let skipped = self.skipped.iter().map(|change| {
            format!(
                "Migration {} ('{}') is older than the latest applied change and was never applied",
                change.id, change.description
            )
        });
        missing.chain(skipped).collect()
    }
}

/// Build the plan for `direction` and `target`
pub fn plan(
    scripts: &ScriptSet,
    ledger: &[Change],
    direction: MigrationDirection,
    target: Target,
) -> MigrateResult<ExecutionPlan> {
    if target == Target::Steps(0) {
        return Err(MigrateError::InvalidArgument(
            "The number of steps must be greater than zero".to_string(),
        ));
    }

    let selected = match direction {
        MigrationDirection::Up => select_up(scripts, ledger, target)?,
        MigrationDirection::Down => select_down(scripts, ledger, target)?,
    };

    let plan = ExecutionPlan {
        direction,
        scripts: selected,
        missing: missing(scripts, ledger),
        skipped: skipped(scripts, ledger),
    };

    tracing::debug!(
        direction = %direction,
        scripts = plan.len(),
        missing = plan.missing.len(),
        skipped = plan.skipped.len(),
        "Planned migration run"
    );
    Ok(plan)
}

/// Scripts without a ledger entry, ascending
pub fn pending(scripts: &ScriptSet, ledger: &[Change]) -> Vec<Change> {
    let applied = applied_ids(ledger);
    scripts
        .entries()
        .iter()
        .filter(|entry| !applied.contains(&entry.id))
        .map(|entry| entry.change())
        .collect()
}

/// Ledger entries without a script
pub fn missing(scripts: &ScriptSet, ledger: &[Change]) -> Vec<Change> {
    let mut missing: Vec<Change> = ledger
        .iter()
        .filter(|change| !scripts.contains(change.id))
        .cloned()
        .collect();
    missing.sort();
    missing
}

/// Pending scripts with an id below the latest applied one
pub fn skipped(scripts: &ScriptSet, ledger: &[Change]) -> Vec<Change> {
    let Some(latest) = ledger.iter().map(|c| c.id).max() else {
        return Vec::new();
    };
    pending(scripts, ledger)
        .into_iter()
        .filter(|change| change.id < latest)
        .collect()
}

fn applied_ids(ledger: &[Change]) -> BTreeSet<ChangeId> {
    ledger.iter().map(|c| c.id).collect()
}

fn select_up(
    scripts: &ScriptSet,
    ledger: &[Change],
    target: Target,
) -> MigrateResult<Vec<MigrationScript>> {
    let applied = applied_ids(ledger);
    let candidates = scripts
        .entries()
        .iter()
        .filter(|entry| !applied.contains(&entry.id))
        .filter(|entry| match target {
            Target::Through(id) => entry.id <= id,
            _ => true,
        });

    let limit = match target {
        Target::Steps(n) => n,
        _ => usize::MAX,
    };

    candidates
        .take(limit)
        .map(|entry| scripts.load(entry))
        .collect()
}

fn select_down(
    scripts: &ScriptSet,
    ledger: &[Change],
    target: Target,
) -> MigrateResult<Vec<MigrationScript>> {
    let mut applied: Vec<&Change> = ledger.iter().collect();
    applied.sort_by(|a, b| b.id.cmp(&a.id));
    applied.dedup_by_key(|c| c.id);

    let selected: Vec<&Change> = match target {
        Target::Latest => applied.into_iter().take(1).collect(),
        Target::Through(id) => applied.into_iter().filter(|c| c.id >= id).collect(),
        Target::Steps(n) => applied.into_iter().take(n).collect(),
    };

    selected
        .into_iter()
        .map(|change| {
            scripts
                .load_id(change.id)?
                .ok_or_else(|| MigrateError::MissingScript {
                    id: change.id,
                    description: change.description.clone(),
                })
        })
        .collect()
}
