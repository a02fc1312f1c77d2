use shift_core::{MigrationPaths, MigrationSettings};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{HookContext, HookFactory, HookPhase, HookScript};
use crate::backends::MigrationTransaction;
use crate::change::MigrationDirection;
use crate::error::{MigrateError, MigrateResult};
use crate::repository::StatementSplitter;

/// Where a hook is registered: a phase, and for runs also a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookSlot {
    Run(MigrationDirection, HookPhase),
    New(HookPhase),
}

impl HookSlot {
    pub fn phase(self) -> HookPhase {
        match self {
            HookSlot::Run(_, phase) | HookSlot::New(phase) => phase,
        }
    }

    pub fn direction(self) -> Option<MigrationDirection> {
        match self {
            HookSlot::Run(direction, _) => Some(direction),
            HookSlot::New(_) => None,
        }
    }
}

impl fmt::Display for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookSlot::Run(direction, phase) => write!(f, "{}_{}", phase, direction),
            HookSlot::New(phase) => write!(f, "{}", phase),
        }
    }
}

impl FromStr for HookSlot {
    type Err = String;

    /// Parses setting names such as `before_each_up` or `after_new`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slot = match s {
            "before_new" => HookSlot::New(HookPhase::BeforeNew),
            "after_new" => HookSlot::New(HookPhase::AfterNew),
            _ => {
                let (phase, direction) = s
                    .rsplit_once('_')
                    .ok_or_else(|| format!("Unknown hook point: {}", s))?;
                let direction = match direction {
                    "up" => MigrationDirection::Up,
                    "down" => MigrationDirection::Down,
                    _ => return Err(format!("Unknown hook point: {}", s)),
                };
                let phase = match phase {
                    "before" => HookPhase::Before,
                    "before_each" => HookPhase::BeforeEach,
                    "after_each" => HookPhase::AfterEach,
                    "after" => HookPhase::After,
                    _ => return Err(format!("Unknown hook point: {}", s)),
                };
                HookSlot::Run(direction, phase)
            }
        };
        Ok(slot)
    }
}

/// Holds the registered hooks and invokes them with fresh contexts
#[derive(Clone)]
pub struct HookDispatcher {
    hooks: HashMap<HookSlot, Arc<dyn HookScript>>,
    paths: MigrationPaths,
    variables: BTreeMap<String, String>,
}

impl HookDispatcher {
    /// Dispatcher without hooks
    pub fn new(paths: MigrationPaths, variables: BTreeMap<String, String>) -> Self {
        Self {
            hooks: HashMap::new(),
            paths,
            variables,
        }
    }

    /// Dispatcher with the hooks configured in `settings`
    pub fn from_settings(
        paths: &MigrationPaths,
        settings: &MigrationSettings,
    ) -> MigrateResult<Self> {
        let factory = HookFactory::new(paths, StatementSplitter::from_settings(settings));
        let mut dispatcher = Self::new(paths.clone(), settings.variables.clone());

        for (name, setting) in settings.hooks.configured() {
            let slot: HookSlot = name.parse().map_err(MigrateError::InvalidArgument)?;
            let hook = factory.create(name, setting)?;
            tracing::debug!(slot = %slot, hook = %hook.name(), "Registered hook");
            dispatcher.hooks.insert(slot, hook);
        }

        Ok(dispatcher)
    }

    /// Register `hook` at `slot`, replacing any previous one
    pub fn register(mut self, slot: HookSlot, hook: Arc<dyn HookScript>) -> Self {
        self.hooks.insert(slot, hook);
        self
    }

    pub fn has(&self, slot: HookSlot) -> bool {
        self.hooks.contains_key(&slot)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// A new context for `slot`
    pub fn context(&self, slot: HookSlot) -> HookContext {
        let context = HookContext::new(slot.phase(), self.paths.clone(), self.variables.clone());
        match slot.direction() {
            Some(direction) => context.with_direction(direction),
            None => context,
        }
    }

    /// Invoke the hook at `slot`, if any
    pub async fn dispatch(
        &self,
        slot: HookSlot,
        context: HookContext,
        tx: Option<&mut dyn MigrationTransaction>,
    ) -> MigrateResult<()> {
        let Some(hook) = self.hooks.get(&slot) else {
            return Ok(());
        };
        let id = context.change.as_ref().map(|change| change.id);

        tracing::debug!(
            slot = %slot,
            hook = %hook.name(),
            sequence = context.sequence,
            "Running hook"
        );
        hook.execute(context, tx)
            .await
            .map_err(|source| MigrateError::Hook {
                hook: hook.name().to_string(),
                phase: slot.phase(),
                id,
                source,
            })
    }
}

impl fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut slots: Vec<String> = self.hooks.keys().map(HookSlot::to_string).collect();
        slots.sort();
        f.debug_struct("HookDispatcher")
            .field("hooks", &slots)
            .field("paths", &self.paths)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use crate::hooks::FnHook;
    use std::sync::Mutex;

    #[test]
    fn test_slot_names() {
        assert_eq!(
            "before_each_up".parse::<HookSlot>().unwrap(),
            HookSlot::Run(MigrationDirection::Up, HookPhase::BeforeEach)
        );
        assert_eq!(
            "after_down".parse::<HookSlot>().unwrap(),
            HookSlot::Run(MigrationDirection::Down, HookPhase::After)
        );
        assert_eq!("after_new".parse::<HookSlot>().unwrap(), HookSlot::New(HookPhase::AfterNew));
        assert!("during_up".parse::<HookSlot>().is_err());
        assert!("before_sideways".parse::<HookSlot>().is_err());

        for name in ["before_up", "after_each_down", "before_new"] {
            assert_eq!(name.parse::<HookSlot>().unwrap().to_string(), name);
        }
    }

    #[tokio::test]
    async fn test_dispatch_passes_independent_contexts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let slot = HookSlot::Run(MigrationDirection::Up, HookPhase::BeforeEach);
        let dispatcher = HookDispatcher::new(MigrationPaths::new("/tmp/db"), BTreeMap::new())
            .register(
                slot,
                Arc::new(FnHook::new("record", move |mut context: HookContext| {
                    context.variables.insert("mutated".to_string(), "yes".to_string());
                    recorder.lock().unwrap().push(context);
                    Ok(())
                })),
            );

        dispatcher.dispatch(slot, dispatcher.context(slot), None).await.unwrap();
        dispatcher.dispatch(slot, dispatcher.context(slot), None).await.unwrap();

        // Mutations made by a hook never reach the next invocation
        assert!(dispatcher.context(slot).variables.is_empty());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_hook_failure_becomes_hook_error() {
        let slot = HookSlot::New(HookPhase::BeforeNew);
        let dispatcher = HookDispatcher::new(MigrationPaths::new("/tmp/db"), BTreeMap::new())
            .register(
                slot,
                Arc::new(FnHook::new("naming", |_| {
                    Err(HookError::Rejected("bad name".to_string()))
                })),
            );

        let err = dispatcher.dispatch(slot, dispatcher.context(slot), None).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Hook { ref hook, phase: HookPhase::BeforeNew, .. } if hook == "naming"
        ));

        // Unregistered slots are no-ops
        let other = HookSlot::New(HookPhase::AfterNew);
        assert!(dispatcher.dispatch(other, dispatcher.context(other), None).await.is_ok());
    }
}
