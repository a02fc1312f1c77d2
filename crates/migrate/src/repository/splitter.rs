//! Statement splitting for script sections.
//!
//! Line comments (`--` or `//`) are dropped. A statement ends on the line
//! containing the delimiter, or, with `full_line_delimiter`, on a line that
//! consists of the delimiter alone. A comment of the form
//! `-- @DELIMITER $$` switches the delimiter for the rest of the section.

use once_cell::sync::Lazy;
use regex::Regex;
use shift_core::MigrationSettings;

static DELIMITER_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*((--)|(//))?\s*(//)?\s*@DELIMITER\s+(\S+)")
        .expect("delimiter directive regex")
});

/// Breaks a script section into the statements sent to the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementSplitter {
    delimiter: String,
    full_line_delimiter: bool,
    send_full_script: bool,
}

impl Default for StatementSplitter {
    fn default() -> Self {
        Self {
            delimiter: ";".to_string(),
            full_line_delimiter: false,
            send_full_script: false,
        }
    }
}

impl StatementSplitter {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            ..Self::default()
        }
    }

    pub fn from_settings(settings: &MigrationSettings) -> Self {
        Self {
            delimiter: settings.delimiter.clone(),
            full_line_delimiter: settings.full_line_delimiter,
            send_full_script: settings.send_full_script,
        }
    }

    pub fn full_line_delimiter(mut self, enabled: bool) -> Self {
        self.full_line_delimiter = enabled;
        self
    }

    pub fn send_full_script(mut self, enabled: bool) -> Self {
        self.send_full_script = enabled;
        self
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Statements of `sql` in execution order.
    ///
    /// Trailing text without a delimiter is returned as a final statement.
    pub fn split(&self, sql: &str) -> Vec<String> {
        if self.send_full_script {
            let script = sql.replace("\r\n", "\n");
            if script.lines().all(|line| {
                let trimmed = line.trim();
                trimmed.is_empty() || is_comment(trimmed)
            }) {
                return Vec::new();
            }
            return vec![script];
        }

        let mut delimiter = self.delimiter.clone();
        let mut statements = Vec::new();
        let mut command = String::new();

        for line in sql.lines() {
            let trimmed = line.trim();
            if is_comment(trimmed) {
                if let Some(captures) = DELIMITER_DIRECTIVE.captures(trimmed) {
                    if let Some(found) = captures.get(5) {
                        delimiter = found.as_str().to_string();
                    }
                }
            } else if self.ends_statement(trimmed, &delimiter) {
                if let Some(position) = line.rfind(delimiter.as_str()) {
                    command.push_str(&line[..position]);
                }
                push_statement(&mut statements, &mut command);
            } else if !trimmed.is_empty() {
                command.push_str(line);
                command.push('\n');
            }
        }

        push_statement(&mut statements, &mut command);
        statements
    }

    fn ends_statement(&self, trimmed: &str, delimiter: &str) -> bool {
        if self.full_line_delimiter {
            trimmed == delimiter
        } else {
            trimmed.contains(delimiter)
        }
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("--") || trimmed.starts_with("//")
}

fn push_statement(statements: &mut Vec<String>, command: &mut String) {
    let statement = command.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    command.clear();
}
