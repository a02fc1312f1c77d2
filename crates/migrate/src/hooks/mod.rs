//! Migration Hooks - User callbacks around migration runs
//!
//! Hooks run at fixed points of a run (before it, around every script, after
//! it) and around the creation of new scripts. Each invocation receives its
//! own copy of a [`HookContext`]; a hook that fails aborts the operation.
//!
//! Hooks are configured per environment as `<kind>:<file>[:option...]`:
//!
//! - `sql:audit.sql:team=core` runs the statements of `hooks/audit.sql`
//!   inside the current migration transaction.
//! - `cmd:check.sh:_arg=--strict` runs `hooks/check.sh` as a child process
//!   with the context as JSON on stdin. A non-zero exit rejects the
//!   operation with the process output as the message.

pub mod command;
pub mod dispatcher;
pub mod factory;
pub mod function;
pub mod sql;

pub use command::CommandHookScript;
pub use dispatcher::{HookDispatcher, HookSlot};
pub use factory::HookFactory;
pub use function::FnHook;
pub use sql::SqlHookScript;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shift_core::MigrationPaths;
use std::collections::BTreeMap;
use std::fmt;

use crate::backends::MigrationTransaction;
use crate::change::{Change, MigrationDirection};
use crate::error::HookError;

/// Point of an operation at which a hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Before,
    BeforeEach,
    AfterEach,
    After,
    BeforeNew,
    AfterNew,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            HookPhase::Before => "before",
            HookPhase::BeforeEach => "before_each",
            HookPhase::AfterEach => "after_each",
            HookPhase::After => "after",
            HookPhase::BeforeNew => "before_new",
            HookPhase::AfterNew => "after_new",
        };
        write!(f, "{}", phase)
    }
}

/// What a hook gets to see about the operation it runs in
#[derive(Debug, Clone, Serialize)]
pub struct HookContext {
    pub phase: HookPhase,
    pub direction: Option<MigrationDirection>,
    /// Script being applied or reverted (`*_each` phases)
    pub change: Option<Change>,
    /// Description of the script being created (`*_new` phases)
    pub description: Option<String>,
    /// File name of the script being created (`*_new` phases)
    pub filename: Option<String>,
    pub paths: MigrationPaths,
    /// Environment variables of the migrations home
    pub variables: BTreeMap<String, String>,
    /// Position of the script in the run, starting at zero
    pub sequence: usize,
}

impl HookContext {
    pub fn new(
        phase: HookPhase,
        paths: MigrationPaths,
        variables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            phase,
            direction: None,
            change: None,
            description: None,
            filename: None,
            paths,
            variables,
            sequence: 0,
        }
    }

    pub fn with_direction(mut self, direction: MigrationDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_change(mut self, change: Change, sequence: usize) -> Self {
        self.filename = change.filename.clone();
        self.description = Some(change.description.clone());
        self.change = Some(change);
        self.sequence = sequence;
        self
    }

    pub fn with_new_script(
        mut self,
        description: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        self.description = Some(description.into());
        self.filename = Some(filename.into());
        self
    }

    /// Context values exposed to hook scripts as variables
    pub fn hook_variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("hook_phase".to_string(), self.phase.to_string());
        if let Some(direction) = self.direction {
            vars.insert("hook_direction".to_string(), direction.to_string());
        }
        if let Some(change) = &self.change {
            vars.insert("change_id".to_string(), change.id.to_string());
        }
        if let Some(description) = &self.description {
            vars.insert("description".to_string(), description.clone());
        }
        if let Some(filename) = &self.filename {
            vars.insert("filename".to_string(), filename.clone());
        }
        vars.insert("sequence".to_string(), self.sequence.to_string());
        vars
    }
}

/// A callback invoked at a hook point.
///
/// `tx` is the transaction of the surrounding work when there is one; hooks
/// that write to the database must do so through it.
#[async_trait]
pub trait HookScript: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    async fn execute(
        &self,
        context: HookContext,
        tx: Option<&mut dyn MigrationTransaction>,
    ) -> Result<(), HookError>;
}
