//! `HistoryEntry` - Represents rows of the `migrations_history` audit table

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// What a history row records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Up,
    Down,
    Rollback,
    SafeForce,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Up => "up",
            HistoryAction::Down => "down",
            HistoryAction::Rollback => "rollback",
            HistoryAction::SafeForce => "safe-force",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(HistoryAction::Up),
            "down" => Ok(HistoryAction::Down),
            "rollback" => Ok(HistoryAction::Rollback),
            "safe-force" => Ok(HistoryAction::SafeForce),
            other => Err(format!("unknown history action '{other}'")),
        }
    }
}

/// One audit row
///
/// Rows are append-only. `committed` is flipped from false to true in bulk
/// by `commit` and never back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: i64,
    pub executed_at: DateTime<Utc>,
    pub action: HistoryAction,
    pub version: i64,
    pub executed_by: String,
    pub committed: bool,
    /// Content hash of the up-file; empty for non-`up` rows
    pub sha256: String,
}

/// Row to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub action: HistoryAction,
    pub version: i64,
    pub executed_by: String,
    pub sha256: String,
}

impl NewHistoryEntry {
    #[must_use]
    pub fn new(action: HistoryAction, version: i64, executed_by: &str) -> Self {
        Self {
            action,
            version,
            executed_by: if executed_by.is_empty() {
                "unknown".to_string()
            } else {
                executed_by.to_string()
            },
            sha256: String::new(),
        }
    }

    #[must_use]
    pub fn with_hash(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = sha256.into();
        self
    }
}

/// Parse the stored `executed_at` text back into a timestamp
///
/// RFC 3339 is what the manager writes; the space-separated forms cover rows
/// inserted by hand or by database defaults.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
