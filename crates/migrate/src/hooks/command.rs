use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{HookContext, HookScript};
use crate::backends::MigrationTransaction;
use crate::error::HookError;

/// Runs an external program as a hook.
///
/// The program gets the context as JSON on stdin and as `SHIFT_HOOK_*`
/// environment variables, plus the hook's own options as environment
/// variables. A non-zero exit status rejects the operation; stderr (or
/// stdout when stderr is empty) becomes the rejection message.
pub struct CommandHookScript {
    name: String,
    path: PathBuf,
    program: Option<String>,
    args: Vec<String>,
    options: BTreeMap<String, String>,
}

impl CommandHookScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            path,
            program: None,
            args: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    /// Run the file through `program` (e.g. `sh`) instead of executing it directly
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_options(mut self, options: BTreeMap<String, String>) -> Self {
        self.options = options;
        self
    }

    fn command(&self, context: &HookContext) -> Command {
        let mut command = match &self.program {
            Some(program) => {
                let mut command = Command::new(program);
                command.arg(&self.path);
                command
            }
            None => Command::new(&self.path),
        };

        command
            .args(&self.args)
            .envs(&self.options)
            .env("SHIFT_HOOK_PHASE", context.phase.to_string())
            .env("SHIFT_HOOK_SEQUENCE", context.sequence.to_string())
            .env("SHIFT_BASE_DIR", context.paths.base())
            .env("SHIFT_SCRIPTS_DIR", context.paths.scripts_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(direction) = context.direction {
            command.env("SHIFT_HOOK_DIRECTION", direction.to_string());
        }
        if let Some(change) = &context.change {
            command.env("SHIFT_HOOK_CHANGE_ID", change.id.to_string());
        }
        if let Some(description) = &context.description {
            command.env("SHIFT_HOOK_DESCRIPTION", description);
        }
        if let Some(filename) = &context.filename {
            command.env("SHIFT_HOOK_FILENAME", filename);
        }
        command
    }
}

#[async_trait]
impl HookScript for CommandHookScript {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        context: HookContext,
        _tx: Option<&mut dyn MigrationTransaction>,
    ) -> Result<(), HookError> {
        if !self.path.is_file() {
            return Err(HookError::NotFound(self.path.clone()));
        }

        let payload = serde_json::to_vec(&context)?;
        let mut child = self.command(&context).spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // Programs that ignore stdin may exit before reading it
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::info!(hook = %self.name, "{}", line);
        }

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|text| !text.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exited with {}", output.status));
        Err(HookError::Rejected(message))
    }
}
