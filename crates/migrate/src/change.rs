//! Change Definitions - Core types shared by the ledger and the script repository
//!
//! A `Change` is one migration as known to the changelog: an ordered id, a
//! description and, once applied, the time it was applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Timestamp format used for ledger rows and generated scripts
pub const APPLIED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const PENDING: &str = "   ...pending...   ";

/// Ordered identifier of a migration, taken from the leading digits of its file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(u64);

impl ChangeId {
    /// Largest id that still fits the ledger's signed 64-bit column
    pub const MAX: ChangeId = ChangeId(i64::MAX as u64);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// Ledger column representation; ids above `MAX` are rejected at parse time
    pub(crate) fn as_i64(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    pub(crate) fn from_i64(value: i64) -> Option<Self> {
        u64::try_from(value).ok().map(Self)
    }

    /// The following id, if it stays in range
    pub fn next(self) -> Option<Self> {
        let next = self.0.checked_add(1).map(Self)?;
        (next <= Self::MAX).then_some(next)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChangeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Error returned when text is not a valid change id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{0}' is not a valid change id (expected decimal digits up to 9223372036854775807)")]
pub struct ParseChangeIdError(pub String);

impl FromStr for ChangeId {
    type Err = ParseChangeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseChangeIdError(s.to_string()));
        }
        let value: u64 = s.parse().map_err(|_| ParseChangeIdError(s.to_string()))?;
        let id = ChangeId(value);
        if id > ChangeId::MAX {
            return Err(ParseChangeIdError(s.to_string()));
        }
        Ok(id)
    }
}

/// A migration as recorded in (or destined for) the changelog.
///
/// Equality, hashing and ordering consider the id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub description: String,
    /// When the change was applied; `None` while pending
    pub applied_at: Option<DateTime<Utc>>,
    /// Script file name, when the change is backed by a script
    pub filename: Option<String>,
}

impl Change {
    /// A change that has not been applied yet
    pub fn pending(id: ChangeId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            applied_at: None,
            filename: None,
        }
    }

    /// A change as read back from the ledger
    pub fn applied(
        id: ChangeId,
        description: impl Into<String>,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            applied_at: Some(applied_at),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    /// Applied timestamp as stored in the ledger, or the pending marker
    pub fn applied_at_display(&self) -> String {
        match &self.applied_at {
            Some(at) => at.format(APPLIED_AT_FORMAT).to_string(),
            None => PENDING.to_string(),
        }
    }
}

impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Change {}

impl Hash for Change {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Change {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Change {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.id,
            self.applied_at_display(),
            self.description
        )
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    Up,
    Down,
}

impl MigrationDirection {
    pub fn is_up(self) -> bool {
        matches!(self, MigrationDirection::Up)
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// How far a plan reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Up: every pending script. Down: the most recently applied change only.
    Latest,
    /// Up: pending scripts with id <= the given id.
    /// Down: applied changes with id >= the given id.
    Through(ChangeId),
    /// At most this many scripts, in plan order
    Steps(usize),
}

/// Lifecycle of a script within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptState {
    Pending,
    Running,
    Committed,
    Failed,
}

impl fmt::Display for ScriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ScriptState::Pending => "pending",
            ScriptState::Running => "running",
            ScriptState::Committed => "committed",
            ScriptState::Failed => "failed",
        };
        write!(f, "{}", state)
    }
}
