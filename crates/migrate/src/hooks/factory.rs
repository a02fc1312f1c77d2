use shift_core::{ConfigError, MigrationPaths};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{CommandHookScript, HookScript, HookSlot, SqlHookScript};
use crate::error::MigrateResult;
use crate::repository::StatementSplitter;

const ARG_OPTION: &str = "_arg";
const PROGRAM_OPTION: &str = "_program";

/// Builds hooks from `<kind>:<file>[:option...]` settings.
///
/// Options of the form `_arg=value` become command arguments, `_program=sh`
/// selects an interpreter for command hooks, and any other `key=value`
/// becomes a variable local to the hook.
pub struct HookFactory<'a> {
    paths: &'a MigrationPaths,
    splitter: StatementSplitter,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct HookOptions {
    args: Vec<String>,
    program: Option<String>,
    variables: BTreeMap<String, String>,
}

impl<'a> HookFactory<'a> {
    pub fn new(paths: &'a MigrationPaths, splitter: StatementSplitter) -> Self {
        Self { paths, splitter }
    }

    /// Create the hook configured as `setting` under the setting name `name`
    pub fn create(&self, name: &str, setting: &str) -> MigrateResult<Arc<dyn HookScript>> {
        let field = format!("hooks.{}", name);
        let mut segments = setting.split(':');
        let kind = segments.next().unwrap_or_default().trim().to_lowercase();
        let file = segments.next().unwrap_or_default().trim();
        if kind.is_empty() || file.is_empty() {
            return Err(
                ConfigError::invalid_value(field, setting, "'<kind>:<file>[:option...]'").into(),
            );
        }

        let options = parse_options(&field, setting, segments)?;

        if !self.paths.hooks_dir().is_dir() {
            return Err(ConfigError::FileSystemError {
                message: format!(
                    "Hooks directory '{}' does not exist",
                    self.paths.hooks_dir().display()
                ),
            }
            .into());
        }

        let path = self.paths.hooks_dir().join(file);
        if !path.is_file() {
            return Err(ConfigError::FileSystemError {
                message: format!("Hook script '{}' does not exist", path.display()),
            }
            .into());
        }

        let hook: Arc<dyn HookScript> = match kind.as_str() {
            "sql" => {
                if matches!(name.parse::<HookSlot>(), Ok(HookSlot::New(_))) {
                    return Err(ConfigError::invalid_value(
                        field,
                        setting,
                        "a cmd hook; sql hooks need a migration transaction",
                    )
                    .into());
                }
                if options.program.is_some() || !options.args.is_empty() {
                    return Err(ConfigError::invalid_value(
                        field,
                        setting,
                        "no _arg or _program options for sql hooks",
                    )
                    .into());
                }
                Arc::new(
                    SqlHookScript::new(path, self.splitter.clone()).with_options(options.variables),
                )
            }
            "cmd" | "exec" => {
                let mut hook = CommandHookScript::new(path)
                    .with_args(options.args)
                    .with_options(options.variables);
                if let Some(program) = options.program {
                    hook = hook.with_program(program);
                }
                Arc::new(hook)
            }
            _ => {
                return Err(ConfigError::invalid_value(
                    field,
                    kind,
                    "a supported hook kind (sql, cmd)",
                )
                .into())
            }
        };

        Ok(hook)
    }
}

fn parse_options<'s>(
    field: &str,
    setting: &str,
    segments: impl Iterator<Item = &'s str>,
) -> Result<HookOptions, ConfigError> {
    let mut options = HookOptions::default();

    for segment in segments.filter(|s| !s.trim().is_empty()) {
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            ConfigError::invalid_value(field, setting, "options in 'key=value' form")
        })?;
        let key = key.trim();
        match key {
            ARG_OPTION => options.args.push(value.to_string()),
            PROGRAM_OPTION => options.program = Some(value.to_string()),
            _ if key.is_empty() => {
                return Err(ConfigError::invalid_value(field, setting, "non-empty option names"))
            }
            _ => {
                options.variables.insert(key.to_string(), value.to_string());
            }
        }
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use tempfile::TempDir;

    fn home() -> (TempDir, MigrationPaths) {
        let dir = TempDir::new().unwrap();
        let paths = MigrationPaths::new(dir.path());
        std::fs::create_dir_all(paths.hooks_dir()).unwrap();
        std::fs::write(paths.hooks_dir().join("audit.sql"), "SELECT 1;").unwrap();
        std::fs::write(paths.hooks_dir().join("check.sh"), "exit 0").unwrap();
        (dir, paths)
    }

    #[test]
    fn test_option_parsing() {
        let options = parse_options(
            "hooks.before_up",
            "cmd:x.sh:_arg=-v:_arg=--strict:_program=sh:team=core",
            ["_arg=-v", "_arg=--strict", "_program=sh", "team=core"].into_iter(),
        )
        .unwrap();
        assert_eq!(options.args, vec!["-v", "--strict"]);
        assert_eq!(options.program.as_deref(), Some("sh"));
        assert_eq!(options.variables["team"], "core");

        assert!(parse_options("f", "s", ["novalue"].into_iter()).is_err());
    }

    #[test]
    fn test_creates_supported_kinds() {
        let (_dir, paths) = home();
        let factory = HookFactory::new(&paths, StatementSplitter::default());

        let sql = factory.create("before_up", "sql:audit.sql:who=ci").unwrap();
        assert_eq!(sql.name(), "audit.sql");

        let cmd = factory.create("before_new", "CMD:check.sh:_program=sh").unwrap();
        assert_eq!(cmd.name(), "check.sh");
    }

    #[test]
    fn test_rejects_bad_settings() {
        let (_dir, paths) = home();
        let factory = HookFactory::new(&paths, StatementSplitter::default());

        for setting in ["js:check.js", "sql:missing.sql", "sql:audit.sql:_arg=x", "sql:"] {
            assert!(
                matches!(factory.create("after_up", setting), Err(MigrateError::Config(_))),
                "{} should be rejected",
                setting
            );
        }
    }

    #[test]
    fn test_sql_hooks_are_rejected_around_new() {
        let (_dir, paths) = home();
        let factory = HookFactory::new(&paths, StatementSplitter::default());

        for name in ["before_new", "after_new"] {
            assert!(matches!(
                factory.create(name, "sql:audit.sql"),
                Err(MigrateError::Config(_))
            ));
        }
        assert!(factory.create("after_new", "cmd:check.sh").is_ok());
    }
}
