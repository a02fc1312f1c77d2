use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use super::Migrator;
use crate::change::ChangeId;
use crate::error::{MigrateError, MigrateResult};
use crate::hooks::{HookPhase, HookSlot};
use crate::repository::script_filename;

/// Body of a new script when no `new_template` is configured
pub const DEFAULT_TEMPLATE: &str = "-- // ${description}
-- Migration SQL that makes the change goes here.



-- //@UNDO
-- SQL to undo the change goes here.
";

pub(super) const TIMESTAMP_ID_FORMAT: &str = "%Y%m%d%H%M%S";

impl Migrator {
    /// Create a script file for a new migration and return its path
    pub async fn new_migration(&self, description: &str) -> MigrateResult<PathBuf> {
        let description = description.trim();
        validate_description(description)?;

        let latest = self.repository.scan()?.ids().last().copied();
        let id_text = self.next_id_text(latest)?;
        let filename = script_filename(&id_text, description);
        self.repository.check_filename(&filename)?;
        let path = self.repository.dir().join(&filename);

        let slot = HookSlot::New(HookPhase::BeforeNew);
        let context = self.hooks.context(slot).with_new_script(description, filename.clone());
        self.hooks.dispatch(slot, context, None).await?;

        let template = self.template()?;
        let mut variables = BTreeMap::new();
        variables.insert("description".to_string(), description.to_string());
        let body = self.repository.variables().clone().layered(variables).replace(&template);

        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(body.as_bytes())?;
        tracing::info!(file = %path.display(), "Created migration script");

        let slot = HookSlot::New(HookPhase::AfterNew);
        let context = self.hooks.context(slot).with_new_script(description, filename);
        self.hooks.dispatch(slot, context, None).await?;

        Ok(path)
    }

    fn next_id_text(&self, latest: Option<ChangeId>) -> MigrateResult<String> {
        if let Some(pattern) = &self.settings.id_pattern {
            let next = match latest {
                Some(id) => id.next().ok_or_else(|| {
                    MigrateError::InvalidArgument(format!("No id available after {}", id))
                })?,
                None => ChangeId::new(1),
            };
            return Ok(format!("{:0width$}", next.value(), width = pattern.len()));
        }

        let stamp = Utc::now().format(TIMESTAMP_ID_FORMAT).to_string();
        let mut id: ChangeId = stamp
            .parse()
            .map_err(|_| MigrateError::InvalidArgument(format!("Invalid timestamp id {}", stamp)))?;
        if let Some(latest) = latest.filter(|latest| *latest >= id) {
            id = latest.next().ok_or_else(|| {
                MigrateError::InvalidArgument(format!("No id available after {}", latest))
            })?;
        }
        Ok(id.to_string())
    }

    fn template(&self) -> MigrateResult<String> {
        let Some(template) = &self.settings.new_template else {
            return Ok(DEFAULT_TEMPLATE.to_string());
        };

        let path = if template.is_absolute() {
            template.clone()
        } else {
            self.paths.base().join(template)
        };
        if !path.is_file() {
            return Err(MigrateError::InvalidArgument(format!(
                "Template file '{}' does not exist",
                path.display()
            )));
        }
        Ok(fs::read_to_string(path)?)
    }
}

fn validate_description(description: &str) -> MigrateResult<()> {
    if description.is_empty() {
        return Err(MigrateError::InvalidArgument(
            "A description is required for a new migration".to_string(),
        ));
    }
    if description.contains(['/', '\\']) {
        return Err(MigrateError::InvalidArgument(format!(
            "Description '{}' must not contain path separators",
            description
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_description() {
        assert!(validate_description("add orders").is_ok());
        assert!(validate_description("").is_err());
        assert!(validate_description("../escape").is_err());
        assert!(validate_description("a\\b").is_err());
    }

    #[test]
    fn test_default_template_is_reversible() {
        let sections = crate::repository::split_sections(DEFAULT_TEMPLATE);
        assert!(sections.down.is_some());
        assert!(sections.up.contains("${description}"));
    }
}
