use async_trait::async_trait;

use super::{HookContext, HookScript};
use crate::backends::MigrationTransaction;
use crate::error::HookError;

/// Hook backed by a Rust closure, for embedding applications and tests
pub struct FnHook<F> {
    name: String,
    callback: F,
}

impl<F> FnHook<F>
where
    F: Fn(HookContext) -> Result<(), HookError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

#[async_trait]
impl<F> HookScript for FnHook<F>
where
    F: Fn(HookContext) -> Result<(), HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        context: HookContext,
        _tx: Option<&mut dyn MigrationTransaction>,
    ) -> Result<(), HookError> {
        (self.callback)(context)
    }
}
