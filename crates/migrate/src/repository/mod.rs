//! Script Repository - Discovers and loads migration scripts
//!
//! Scripts live in a single directory and are named `<id>_<description>.sql`,
//! for example `20240501083000_add_orders_table.sql`. Underscores in the
//! description become spaces. `bootstrap.sql` and `onabort.sql` are reserved
//! and never part of the migration sequence.

pub mod sections;
pub mod splitter;
pub mod variables;

pub use sections::{split_sections, ScriptSections};
pub use splitter::StatementSplitter;
pub use variables::VariableReplacer;

use regex::{Regex, RegexBuilder};
use shift_core::{MalformedScriptPolicy, MigrationSettings};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::change::{Change, ChangeId, MigrationDirection};
use crate::error::{MigrateError, MigrateResult};

pub const BOOTSTRAP_SCRIPT: &str = "bootstrap.sql";
pub const ON_ABORT_SCRIPT: &str = "onabort.sql";
const SCRIPT_EXTENSION: &str = ".sql";

/// A migration script with its sections loaded and variables substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub id: ChangeId,
    pub description: String,
    pub filename: String,
    /// Statements applying the change
    pub up: String,
    /// Statements reverting the change; `None` makes the script irreversible
    pub down: Option<String>,
}

impl MigrationScript {
    pub fn new(id: ChangeId, description: impl Into<String>, up: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id,
            filename: script_filename(&id.to_string(), &description),
            description,
            up: up.into(),
            down: None,
        }
    }

    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    /// The pending ledger entry for this script
    pub fn change(&self) -> Change {
        Change::pending(self.id, self.description.clone()).with_filename(self.filename.clone())
    }

    /// Section to run for `direction`
    pub fn section(&self, direction: MigrationDirection) -> MigrateResult<&str> {
        match direction {
            MigrationDirection::Up => Ok(&self.up),
            MigrationDirection::Down => {
                self.down.as_deref().ok_or_else(|| MigrateError::Irreversible {
                    id: self.id,
                    filename: self.filename.clone(),
                })
            }
        }
    }
}

/// Where a script's body comes from
#[derive(Debug, Clone)]
enum ScriptSource {
    File(PathBuf),
    Loaded(MigrationScript),
}

/// A discovered script whose body has not necessarily been read yet
#[derive(Debug, Clone)]
pub struct ScriptEntry {
    pub id: ChangeId,
    pub description: String,
    pub filename: String,
    source: ScriptSource,
}

impl ScriptEntry {
    pub fn change(&self) -> Change {
        Change::pending(self.id, self.description.clone()).with_filename(self.filename.clone())
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ScriptSource::File(path) => Some(path),
            ScriptSource::Loaded(_) => None,
        }
    }
}

/// The scripts of a repository, ordered by id.
///
/// Bodies are read when a script is loaded, so iterating twice re-reads
/// the files and picks up edits made in between.
#[derive(Debug, Clone, Default)]
pub struct ScriptSet {
    entries: Vec<ScriptEntry>,
    skipped: Vec<String>,
    variables: VariableReplacer,
}

impl ScriptSet {
    /// A set backed by scripts already in memory
    pub fn from_scripts(scripts: Vec<MigrationScript>) -> MigrateResult<Self> {
        let entries = scripts
            .into_iter()
            .map(|script| ScriptEntry {
                id: script.id,
                description: script.description.clone(),
                filename: script.filename.clone(),
                source: ScriptSource::Loaded(script),
            })
            .collect();
        Self::from_entries(entries, Vec::new(), VariableReplacer::default())
    }

    fn from_entries(
        mut entries: Vec<ScriptEntry>,
        skipped: Vec<String>,
        variables: VariableReplacer,
    ) -> MigrateResult<Self> {
        entries.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.filename.cmp(&b.filename)));

        for pair in entries.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(MigrateError::malformed(
                    pair[1].filename.clone(),
                    format!("id {} is also used by '{}'", pair[1].id, pair[0].filename),
                ));
            }
        }

        Ok(Self {
            entries,
            skipped,
            variables,
        })
    }

    pub fn entries(&self) -> &[ScriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<ChangeId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn contains(&self, id: ChangeId) -> bool {
        self.entry(id).is_some()
    }

    pub fn entry(&self, id: ChangeId) -> Option<&ScriptEntry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(&id))
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Pending-form changes for every script
    pub fn changes(&self) -> Vec<Change> {
        self.entries.iter().map(ScriptEntry::change).collect()
    }

    /// File names ignored because they did not follow the naming convention
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Read and parse one script
    pub fn load(&self, entry: &ScriptEntry) -> MigrateResult<MigrationScript> {
        match &entry.source {
            ScriptSource::Loaded(script) => Ok(script.clone()),
            ScriptSource::File(path) => {
                let content = read_script(path, &entry.filename)?;
                let sections = split_sections(&content);
                Ok(MigrationScript {
                    id: entry.id,
                    description: entry.description.clone(),
                    filename: entry.filename.clone(),
                    up: self.variables.replace(&sections.up),
                    down: sections.down.map(|down| self.variables.replace(&down)),
                })
            }
        }
    }

    pub fn load_id(&self, id: ChangeId) -> MigrateResult<Option<MigrationScript>> {
        self.entry(id).map(|entry| self.load(entry)).transpose()
    }

    /// Lazily load every script in id order
    pub fn iter(&self) -> impl Iterator<Item = MigrateResult<MigrationScript>> + '_ {
        self.entries.iter().map(move |entry| self.load(entry))
    }
}

/// Reads migration scripts from a directory
#[derive(Debug, Clone)]
pub struct ScriptRepository {
    dir: PathBuf,
    filter: Option<Regex>,
    policy: MalformedScriptPolicy,
    variables: VariableReplacer,
}

impl ScriptRepository {
    /// Repository with the default policy and no variables
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            filter: None,
            policy: MalformedScriptPolicy::default(),
            variables: VariableReplacer::default(),
        }
    }

    pub fn from_settings(
        dir: impl Into<PathBuf>,
        settings: &MigrationSettings,
    ) -> MigrateResult<Self> {
        let mut repository = Self::new(dir)
            .with_policy(settings.malformed_scripts)
            .with_variables(settings.variables.clone());
        if let Some(filter) = &settings.filename_filter {
            repository = repository.with_filter(filter)?;
        }
        Ok(repository)
    }

    /// Only consider file names matching `pattern` (case-insensitive)
    pub fn with_filter(mut self, pattern: &str) -> MigrateResult<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                MigrateError::InvalidArgument(format!(
                    "invalid filename filter '{}': {}",
                    pattern, e
                ))
            })?;
        self.filter = Some(regex);
        Ok(self)
    }

    pub fn with_policy(mut self, policy: MalformedScriptPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = VariableReplacer::new(variables);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn variables(&self) -> &VariableReplacer {
        &self.variables
    }

    /// List the scripts of the directory.
    ///
    /// Only file names are inspected here; bodies are read on load.
    pub fn scan(&self) -> MigrateResult<ScriptSet> {
        if !self.dir.is_dir() {
            return Err(MigrateError::InvalidArgument(format!(
                "Scripts directory '{}' does not exist",
                self.dir.display()
            )));
        }

        let mut entries = Vec::new();
        let mut skipped = Vec::new();

        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }

            let Some(filename) = dir_entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(
                    "Ignoring script with a non UTF-8 file name: {}",
                    dir_entry.path().display()
                );
                continue;
            };

            if !is_script_name(&filename) {
                continue;
            }

            match self.check_filename(&filename) {
                Ok((id, description)) => entries.push(ScriptEntry {
                    id,
                    description,
                    filename,
                    source: ScriptSource::File(dir_entry.path()),
                }),
                Err(err) => match self.policy {
                    MalformedScriptPolicy::Fail => return Err(err),
                    MalformedScriptPolicy::Skip => {
                        tracing::warn!("Skipping script: {}", err);
                        skipped.push(filename);
                    }
                },
            }
        }

        skipped.sort();
        let set = ScriptSet::from_entries(entries, skipped, self.variables.clone())?;
        tracing::debug!(
            dir = %self.dir.display(),
            scripts = set.len(),
            skipped = set.skipped().len(),
            "Scanned migration scripts"
        );
        Ok(set)
    }

    /// Body of `bootstrap.sql`, if present
    pub fn bootstrap_script(&self) -> MigrateResult<Option<String>> {
        self.reserved_script(BOOTSTRAP_SCRIPT)
    }

    /// Body of `onabort.sql`, if present
    pub fn on_abort_script(&self) -> MigrateResult<Option<String>> {
        self.reserved_script(ON_ABORT_SCRIPT)
    }

    fn reserved_script(&self, filename: &str) -> MigrateResult<Option<String>> {
        let path = self.dir.join(filename);
        if !path.is_file() {
            return Ok(None);
        }
        let content = read_script(&path, filename)?;
        Ok(Some(self.variables.replace(&content)))
    }

    /// Id and description of a script file name that also passes the
    /// filename filter
    pub fn check_filename(&self, filename: &str) -> MigrateResult<(ChangeId, String)> {
        if let Some(filter) = &self.filter {
            if !filter.is_match(filename) {
                return Err(MigrateError::malformed(
                    filename,
                    format!("does not match the required filename filter '{}'", filter.as_str()),
                ));
            }
        }
        parse_filename(filename)
    }
}

fn is_script_name(filename: &str) -> bool {
    filename.ends_with(SCRIPT_EXTENSION)
        && filename != BOOTSTRAP_SCRIPT
        && filename != ON_ABORT_SCRIPT
}

/// Split `<id>_<description>.sql` into its id and space-separated description
pub fn parse_filename(filename: &str) -> MigrateResult<(ChangeId, String)> {
    let stem = filename
        .strip_suffix(SCRIPT_EXTENSION)
        .ok_or_else(|| MigrateError::malformed(filename, "expected a .sql extension"))?;

    let mut parts = stem.split('_');
    let id_part = parts.next().unwrap_or_default();
    let id = id_part.parse::<ChangeId>().map_err(|e| {
        MigrateError::malformed(filename, format!("file name must start with a numeric id: {}", e))
    })?;

    let description = parts.filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ");
    Ok((id, description))
}

/// File name for a script with the given id text and description
pub fn script_filename(id: &str, description: &str) -> String {
    let slug = description.split_whitespace().collect::<Vec<_>>().join("_");
    if slug.is_empty() {
        format!("{}{}", id, SCRIPT_EXTENSION)
    } else {
        format!("{}_{}{}", id, slug, SCRIPT_EXTENSION)
    }
}

fn read_script(path: &Path, filename: &str) -> MigrateResult<String> {
    let bytes = fs::read(path)?;
    String::from_utf8(bytes)
        .map_err(|_| MigrateError::malformed(filename, "script is not valid UTF-8"))
}
