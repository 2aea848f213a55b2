//! Migration-specific error types

use crate::backend::UnknownDriver;
use crate::executor::DbError;
use crate::migration::file::Direction;
use crate::validate::ValidateError;

/// Migration-specific errors
///
/// Every variant that concerns a particular migration names its version so
/// the operator can act on the message alone.
#[derive(Debug)]
pub enum MigrationError {
    /// Database execution error
    Database(DbError),
    /// Could not open the manager's connection
    Connect(DbError),
    /// Driver name not present in the backend registry
    UnknownDriver(UnknownDriver),
    /// Reading or writing a migration file failed
    Io { path: String, error: String },
    /// Invalid migration file name or content layout
    InvalidFormat(String),
    /// Two files claim the same version for the same direction
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },
    /// The database is marked dirty at this version
    Dirty { version: i64 },
    /// A candidate file is not ahead of the current database version
    VersionNotAhead { version: i64, file: String, current: i64 },
    /// The version is part of committed history
    Committed { version: i64 },
    /// Content hash differs from the committed `up` record
    HashMismatch {
        version: i64,
        file: String,
        current: String,
        recorded: String,
    },
    /// SQL validation rejected a file before anything was executed
    Validation { file: String, source: ValidateError },
    /// Migration failed during execution
    ExecutionFailed {
        version: i64,
        file: String,
        error: DbError,
    },
    /// The operation finished but left the database dirty
    LeftDirty { operation: String, version: i64 },
    /// No file for a version that the operation needs
    MissingFile { version: i64, direction: Direction },
    /// `steps(n)` asked for more migrations than exist
    NotEnoughMigrations { requested: u64, available: u64 },
    /// SafeForce on a clean database
    NotDirty { version: Option<i64> },
    /// SafeForce target outside the one-step-back window
    ForceWindow { current: i64, target: i64 },
    /// SafeForce target beyond the newest file on disk
    TargetBeyondLastFile { target: i64, last: i64 },
    /// Invalid migration name passed to create
    InvalidName(String),
    /// Create needs an author
    MissingAuthor,
    /// The manager was already closed
    Closed,
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Database(e) => write!(f, "Database error: {}", e),
            MigrationError::Connect(e) => write!(f, "open database: {}", e),
            MigrationError::UnknownDriver(e) => write!(f, "{}", e),
            MigrationError::Io { path, error } => write!(f, "Migration file error ({}): {}", path, error),
            MigrationError::InvalidFormat(msg) => write!(f, "Invalid migration format: {}", msg),
            MigrationError::DuplicateVersion { version, first, second } => write!(
                f,
                "duplicate migration version {}: '{}' and '{}'\n\
                 Suggestion: resequence one of the files so every version is unique",
                version, first, second
            ),
            MigrationError::Dirty { version } => write!(
                f,
                "database dirty at version {}; manual intervention required (see safe-force)",
                version
            ),
            MigrationError::VersionNotAhead { version, file, current } => write!(
                f,
                "migration version {} (file {}) is less than or equal to current DB version {}; \
                 refusing to apply, please rebase or resequence your migrations",
                version, file, current
            ),
            MigrationError::Committed { version } => write!(
                f,
                "migration version {} has been committed; cannot modify committed migrations",
                version
            ),
            MigrationError::HashMismatch {
                version,
                file,
                current,
                recorded,
            } => write!(
                f,
                "migration version {} (file {}) has been applied with a different hash; refusing to apply.\n\
                 Current hash: {}\n\
                 Recorded hash: {}\n\
                 This indicates the migration file was edited after it was committed.",
                version, file, current, recorded
            ),
            MigrationError::Validation { file, source } => write!(f, "invalid SQL in {}: {}", file, source),
            MigrationError::ExecutionFailed { version, file, error } => write!(
                f,
                "migration version {} (file {}) failed during execution: {}",
                version, file, error
            ),
            MigrationError::LeftDirty { operation, version } => {
                write!(f, "{} left database dirty at version {}", operation, version)
            }
            MigrationError::MissingFile { version, direction } => write!(
                f,
                "no {} migration file found for version {}\n\
                 Suggestion: Ensure all migration files are present in the migrations directory",
                direction, version
            ),
            MigrationError::NotEnoughMigrations { requested, available } => write!(
                f,
                "cannot move {} steps: only {} migration(s) available",
                requested, available
            ),
            MigrationError::NotDirty { version } => write!(
                f,
                "database is NOT dirty (version {}); refusing to force",
                display_version(*version)
            ),
            MigrationError::ForceWindow { current, .. } => write!(
                f,
                "dirty at {}; only allowed force to {}",
                current,
                current - 1
            ),
            MigrationError::TargetBeyondLastFile { target, last } => write!(
                f,
                "target version {} exceeds the last migration file {}",
                target, last
            ),
            MigrationError::InvalidName(name) => write!(
                f,
                "invalid migration name '{}': use letters, digits, '_' or '-'",
                name
            ),
            MigrationError::MissingAuthor => write!(f, "--user or config.user is required"),
            MigrationError::Closed => write!(f, "migration manager is closed"),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Database(e) | MigrationError::Connect(e) => Some(e),
            MigrationError::ExecutionFailed { error, .. } => Some(error),
            MigrationError::Validation { source, .. } => Some(source),
            MigrationError::UnknownDriver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for MigrationError {
    fn from(error: DbError) -> Self {
        MigrationError::Database(error)
    }
}

impl From<UnknownDriver> for MigrationError {
    fn from(error: UnknownDriver) -> Self {
        MigrationError::UnknownDriver(error)
    }
}

impl MigrationError {
    /// Whether another attempt of the same operation could succeed
    ///
    /// Only database errors raised around a script qualify. A failed script
    /// leaves the version dirty, so `ExecutionFailed` is final like every
    /// precondition and state error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationError::Database(_))
    }
}

/// Render an optional version the way status output does (`nil` when absent)
pub fn display_version(version: Option<i64>) -> String {
    version.map_or_else(|| "nil".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_version() {
        assert_eq!(
            MigrationError::ForceWindow { current: 5, target: 3 }.to_string(),
            "dirty at 5; only allowed force to 4"
        );
        assert!(MigrationError::Committed { version: 7 }
            .to_string()
            .contains("migration version 7 has been committed"));
        assert_eq!(
            MigrationError::NotDirty { version: None }.to_string(),
            "database is NOT dirty (version nil); refusing to force"
        );
        assert!(MigrationError::Dirty { version: 3 }.to_string().contains("dirty at version 3"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(MigrationError::Database(DbError::Driver("conn reset".into())).is_retryable());
        assert!(!MigrationError::Dirty { version: 1 }.is_retryable());
        assert!(!MigrationError::Committed { version: 1 }.is_retryable());
        assert!(!MigrationError::ExecutionFailed {
            version: 1,
            file: "000001_a.up.sql".into(),
            error: DbError::Driver("syntax error".into()),
        }
        .is_retryable());
    }
}
