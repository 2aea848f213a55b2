//! Migration status reporting

use crate::migration::file::MigrationSource;
use crate::migration::state_table::SchemaVersion;
use std::fmt;
use std::path::PathBuf;

/// Migration status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Current database version (`None` before the first migration)
    pub version: Option<i64>,

    /// Whether the last operation was interrupted
    pub dirty: bool,

    /// Up-files on disk newer than `version`, ascending
    pub pending: Vec<PendingMigration>,
}

/// Represents a pending migration (not yet applied)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub version: i64,
    pub name: String,
    pub path: PathBuf,
}

impl MigrationStatus {
    /// Combine the persisted state with what is on disk
    #[must_use]
    pub fn new(state: SchemaVersion, source: &MigrationSource) -> Self {
        let pending = source
            .pending_after(state.version)
            .into_iter()
            .filter_map(|m| {
                m.up.clone().map(|path| PendingMigration {
                    version: m.version,
                    name: m.name.clone(),
                    path,
                })
            })
            .collect();

        Self {
            version: state.version,
            dirty: state.dirty,
            pending,
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if all migrations are applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && !self.dirty
    }

    /// Get the next pending migration version
    #[must_use]
    pub fn next_pending_version(&self) -> Option<i64> {
        self.pending.first().map(|m| m.version)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Current version: {}", self.version.unwrap_or(0))?;
        if self.dirty {
            write!(f, " (DIRTY)")?;
        }
        write!(f, "\nPending migrations: {}", self.pending_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_pending_counts_only_newer_up_files() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["000001_a.up.sql", "000002_b.up.sql", "000002_b.down.sql", "000003_c.up.sql"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        let source = MigrationSource::load(tmp.path()).unwrap();

        let status = MigrationStatus::new(SchemaVersion::clean(Some(1)), &source);
        assert_eq!(status.pending_count(), 2);
        assert_eq!(status.next_pending_version(), Some(2));
        assert_eq!(status.to_string(), "Current version: 1\nPending migrations: 2");

        let status = MigrationStatus::new(SchemaVersion::dirty(3), &source);
        assert_eq!(status.pending_count(), 0);
        assert!(!status.is_up_to_date());
        assert_eq!(status.to_string(), "Current version: 3 (DIRTY)\nPending migrations: 0");
    }
}
