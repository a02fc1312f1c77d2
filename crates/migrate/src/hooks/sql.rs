use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{HookContext, HookScript};
use crate::backends::MigrationTransaction;
use crate::error::HookError;
use crate::repository::{StatementSplitter, VariableReplacer};

/// Runs the statements of a SQL file inside the current transaction.
///
/// The file is read on every invocation. Placeholders are filled from the
/// environment variables, then the context values, then the hook's own
/// options.
pub struct SqlHookScript {
    name: String,
    path: PathBuf,
    options: BTreeMap<String, String>,
    splitter: StatementSplitter,
}

impl SqlHookScript {
    pub fn new(path: impl Into<PathBuf>, splitter: StatementSplitter) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            path,
            options: BTreeMap::new(),
            splitter,
        }
    }

    pub fn with_options(mut self, options: BTreeMap<String, String>) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl HookScript for SqlHookScript {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        context: HookContext,
        tx: Option<&mut dyn MigrationTransaction>,
    ) -> Result<(), HookError> {
        let Some(tx) = tx else {
            return Err(HookError::Statement(format!(
                "SQL hook '{}' can only run inside a migration transaction",
                self.name
            )));
        };

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HookError::NotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let replacer = VariableReplacer::new(context.variables.clone())
            .layered(context.hook_variables())
            .layered(self.options.clone());

        for statement in self.splitter.split(&replacer.replace(&content)) {
            tracing::debug!(hook = %self.name, "{}", statement);
            tx.execute(&statement)
                .await
                .map_err(|e| HookError::Statement(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryBackend, MigrationBackend};
    use crate::hooks::HookPhase;
    use shift_core::MigrationPaths;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runs_statements_with_variables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.sql");
        std::fs::write(&path, "INSERT INTO audit VALUES ('${team}', '${hook_phase}');\n").unwrap();

        let hook = SqlHookScript::new(&path, StatementSplitter::default())
            .with_options([("team".to_string(), "core".to_string())].into_iter().collect());
        let backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let context =
            HookContext::new(HookPhase::After, MigrationPaths::new(dir.path()), BTreeMap::new());

        hook.execute(context, Some(tx.as_mut())).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(
            backend.executed_statements().unwrap(),
            vec!["INSERT INTO audit VALUES ('core', 'after')"]
        );
    }

    #[tokio::test]
    async fn test_requires_transaction() {
        let hook = SqlHookScript::new("/nonexistent/x.sql", StatementSplitter::default());
        let context =
            HookContext::new(HookPhase::BeforeNew, MigrationPaths::new("/tmp"), BTreeMap::new());
        assert!(matches!(
            hook.execute(context, None).await,
            Err(HookError::Statement(_))
        ));
    }
}
