//! Dry-run SQL validation
//!
//! A script is split into statements, grouped into blocks by the dialect and
//! each block is executed inside a transaction that is always rolled back.
//! Statements that cannot be dry-run are handed to an operator confirmation
//! callback, or rejected when none is configured.
//!
//! ```no_run
//! use harbormaster::backend::BackendRegistry;
//! use harbormaster::validate::{validate_sql, ValidateOptions};
//!
//! let registry = BackendRegistry::with_builtin();
//! let backend = registry.get("sqlite")?;
//! validate_sql(
//!     "CREATE TABLE t (id INTEGER)",
//!     "app.db",
//!     &ValidateOptions::default(),
//!     backend.dialect.as_ref(),
//!     backend.connector.as_ref(),
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod block;
mod confirm;
mod dialect;
mod error;
mod mysql;
mod postgres;
mod splitter;
mod sqlite;

pub use block::{parse_transaction_blocks, singleton_blocks, transaction_marker, Block, Marker};
pub use confirm::{fallback_confirm, ConfirmFn};
pub use dialect::{Dialect, StatementType};
pub use error::{BlockError, ConfirmError, ValidateError, ValidationCause, ValidationError};
pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use splitter::{leading_keywords, split_statements, strip_leading_comments};
pub use sqlite::SqliteDialect;

use crate::executor::{Connection, Connector};
use std::time::Duration;

/// Largest script accepted, in bytes
pub const MAX_SQL_BYTES: usize = 100 * 1024;
/// Largest number of statements accepted in one script
pub const MAX_STATEMENTS: usize = 100;
/// Per-statement timeout when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

const REASON_NOT_CHECKABLE: &str = "statement not automatically checkable";
const REASON_NOT_IN_TXN: &str = "cannot run in transaction";
const REASON_CONFIRM_FAILED: &str = "confirmation failed";
const REASON_EXECUTION: &str = "execution failed";

/// Options controlling validation behavior
#[derive(Clone)]
pub struct ValidateOptions {
    /// Ask `confirm` instead of failing on statements that cannot be dry-run
    pub skip_on_confirmation: bool,
    pub confirm: Option<ConfirmFn>,
    /// Per-statement execution deadline
    pub timeout: Duration,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            skip_on_confirmation: false,
            confirm: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ValidateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidateOptions")
            .field("skip_on_confirmation", &self.skip_on_confirmation)
            .field("confirm", &self.confirm.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ValidateOptions {
    /// Options that route uncheckable statements to `confirm`
    pub fn with_confirm(confirm: ConfirmFn) -> Self {
        Self {
            skip_on_confirmation: true,
            confirm: Some(confirm),
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Validate `sql` against the database behind `dsn` without changing it
///
/// Input limits are checked before any connection is opened. Each block runs
/// in its own transaction which is rolled back whatever the outcome; the
/// first failing block aborts the whole validation.
///
/// # Errors
///
/// See [`ValidateError`]. Statement failures carry the statement, the reason
/// and the underlying cause.
pub fn validate_sql(
    sql: &str,
    dsn: &str,
    opts: &ValidateOptions,
    dialect: &dyn Dialect,
    connector: &dyn Connector,
) -> Result<(), ValidateError> {
    if dsn.trim().is_empty() {
        return Err(ValidateError::MissingDsn);
    }

    let blocks = prepare_blocks(sql, dialect)?;

    let mut conn = connector.connect(dsn).map_err(ValidateError::Connect)?;
    let result = blocks
        .iter()
        .try_for_each(|block| validate_block(conn.as_mut(), block, opts, dialect));

    if let Err(e) = conn.close() {
        tracing::warn!(error = %e, "failed to close validation connection");
    }
    result
}

/// Apply the input limits and group the script into blocks
///
/// # Errors
///
/// Empty, oversized or over-long input and unbalanced transaction markers.
pub fn prepare_blocks(sql: &str, dialect: &dyn Dialect) -> Result<Vec<Block>, ValidateError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(ValidateError::Empty);
    }
    if trimmed.len() > MAX_SQL_BYTES {
        return Err(ValidateError::TooLarge {
            size: trimmed.len(),
            limit: MAX_SQL_BYTES,
        });
    }

    let statements = dialect.split_statements(trimmed);
    if statements.is_empty() {
        return Err(ValidateError::NoStatements);
    }
    if statements.len() > MAX_STATEMENTS {
        return Err(ValidateError::TooManyStatements {
            count: statements.len(),
            limit: MAX_STATEMENTS,
        });
    }

    Ok(dialect.parse_blocks(statements)?)
}

/// Validate one block inside a transaction that is always rolled back
///
/// # Errors
///
/// `ValidateError::Transaction` if the transaction cannot be opened,
/// `ValidateError::Statement` for the first statement that fails.
pub fn validate_block(
    conn: &mut dyn Connection,
    block: &[String],
    opts: &ValidateOptions,
    dialect: &dyn Dialect,
) -> Result<(), ValidateError> {
    conn.begin().map_err(ValidateError::Transaction)?;

    let result = block
        .iter()
        .try_for_each(|stmt| validate_statement(&mut *conn, stmt.trim(), opts, dialect));

    if let Err(e) = conn.rollback() {
        tracing::warn!(error = %e, "failed to roll back validation transaction");
    }
    result.map_err(ValidateError::Statement)
}

fn validate_statement(
    conn: &mut dyn Connection,
    stmt: &str,
    opts: &ValidateOptions,
    dialect: &dyn Dialect,
) -> Result<(), ValidationError> {
    let statement_type = dialect.statement_type(stmt);
    let fail = |reason: &str, cause: ValidationCause| ValidationError {
        statement: stmt.to_string(),
        reason: reason.to_string(),
        cause: Some(cause),
        statement_type,
    };

    let unverifiable = if !dialect.is_checkable(stmt) {
        Some(REASON_NOT_CHECKABLE)
    } else if !dialect.is_safe_in_txn(stmt) {
        Some(REASON_NOT_IN_TXN)
    } else {
        None
    };

    if let Some(reason) = unverifiable {
        if !opts.skip_on_confirmation {
            return Err(fail(
                reason,
                ConfirmError::Required {
                    reason: reason.to_string(),
                }
                .into(),
            ));
        }
        tracing::warn!(statement_type = %statement_type, reason, "statement needs operator confirmation");
        return fallback_confirm(opts.confirm.as_ref(), stmt, reason)
            .map_err(|e| fail(REASON_CONFIRM_FAILED, e.into()));
    }

    tracing::debug!(statement_type = %statement_type, "validating statement");
    dialect
        .validate_stmt(conn, stmt, opts.timeout)
        .map_err(|e| fail(REASON_EXECUTION, e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DriverKind;
    use crate::executor::testing::{Journal, RecordingConnection};
    use crate::executor::DbError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Connector handing out recording connections that share one journal
    fn recording(journal: &Journal, fail_on: &[&str]) -> impl Connector {
        let journal = journal.clone();
        let fail_on: Vec<String> = fail_on.iter().map(|s| s.to_string()).collect();
        move |_dsn: &str| -> Result<Box<dyn Connection>, DbError> {
            let mut conn = RecordingConnection::new(DriverKind::Postgres);
            conn.journal = journal.clone();
            conn.fail_on = fail_on.clone();
            Ok(Box::new(conn))
        }
    }

    #[test]
    fn test_validate_runs_each_block_in_rolled_back_transaction() {
        let journal = Journal::default();
        validate_sql(
            "CREATE TABLE foo(id int); INSERT INTO foo VALUES(1);",
            "mock",
            &ValidateOptions::default(),
            &PostgresDialect,
            &recording(&journal, &[]),
        )
        .unwrap();

        assert_eq!(
            journal.entries(),
            vec![
                "BEGIN",
                "CREATE TABLE foo(id int)",
                "ROLLBACK",
                "BEGIN",
                "EXPLAIN INSERT INTO foo VALUES(1)",
                "ROLLBACK",
                "CLOSE",
            ]
        );
    }

    #[test]
    fn test_bracketed_block_shares_one_transaction() {
        let journal = Journal::default();
        validate_sql(
            "BEGIN; CREATE TABLE a(id int); INSERT INTO a VALUES(1); COMMIT;",
            "mock",
            &ValidateOptions::default(),
            &PostgresDialect,
            &recording(&journal, &[]),
        )
        .unwrap();

        assert_eq!(
            journal.entries(),
            vec!["BEGIN", "CREATE TABLE a(id int)", "EXPLAIN INSERT INTO a VALUES(1)", "ROLLBACK", "CLOSE"]
        );
    }

    #[test]
    fn test_confirmation_allows_unsafe_statement() {
        let journal = Journal::default();
        let called = Arc::new(AtomicBool::new(false));
        let called_in = Arc::clone(&called);
        let opts = ValidateOptions::with_confirm(Arc::new(move |prompt: &str| -> std::io::Result<bool> {
            assert!(prompt.starts_with("cannot run in transaction\n"));
            called_in.store(true, Ordering::SeqCst);
            Ok(true)
        }));

        validate_sql("VACUUM", "mock", &opts, &PostgresDialect, &recording(&journal, &[])).unwrap();

        assert!(called.load(Ordering::SeqCst));
        // the statement itself is never executed
        assert_eq!(journal.entries(), vec!["BEGIN", "ROLLBACK", "CLOSE"]);
    }

    #[test]
    fn test_uncheckable_without_confirmation_fails() {
        let journal = Journal::default();
        let err = validate_sql(
            "DO $$ BEGIN PERFORM 1; END $$;",
            "mock",
            &ValidateOptions::default(),
            &PostgresDialect,
            &recording(&journal, &[]),
        )
        .unwrap_err();

        let stmt_err = err.statement().unwrap();
        assert!(stmt_err.is_confirm_required());
        assert_eq!(stmt_err.reason, "statement not automatically checkable");
        assert_eq!(journal.entries(), vec!["BEGIN", "ROLLBACK", "CLOSE"]);
    }

    #[test]
    fn test_execution_failure_aborts_remaining_blocks() {
        let journal = Journal::default();
        let err = validate_sql(
            "CREATE TABLE t(id int); SYNTAX ERROR HERE; CREATE TABLE u(id int);",
            "mock",
            &ValidateOptions::default(),
            &PostgresDialect,
            &recording(&journal, &["SYNTAX"]),
        )
        .unwrap_err();

        let stmt_err = err.statement().unwrap();
        assert_eq!(stmt_err.reason, "execution failed");
        assert_eq!(stmt_err.statement, "SYNTAX ERROR HERE");
        assert_eq!(stmt_err.statement_type, StatementType::Unknown);
        assert!(!journal.entries().iter().any(|s| s.contains("CREATE TABLE u")));
        assert_eq!(journal.entries().last().map(String::as_str), Some("CLOSE"));
    }

    #[test]
    fn test_preconditions_never_touch_database() {
        let journal = Journal::default();
        let connector = recording(&journal, &[]);
        let opts = ValidateOptions::default();

        assert!(matches!(
            validate_sql("SELECT 1", "  ", &opts, &PostgresDialect, &connector),
            Err(ValidateError::MissingDsn)
        ));
        assert!(matches!(
            validate_sql(" \n ", "mock", &opts, &PostgresDialect, &connector),
            Err(ValidateError::Empty)
        ));
        assert!(matches!(
            validate_sql(";;", "mock", &opts, &PostgresDialect, &connector),
            Err(ValidateError::NoStatements)
        ));

        let huge = format!("SELECT '{}'", "x".repeat(MAX_SQL_BYTES));
        assert!(matches!(
            validate_sql(&huge, "mock", &opts, &PostgresDialect, &connector),
            Err(ValidateError::TooLarge { .. })
        ));

        let many = "SELECT 1;".repeat(MAX_STATEMENTS + 1);
        assert!(matches!(
            validate_sql(&many, "mock", &opts, &PostgresDialect, &connector),
            Err(ValidateError::TooManyStatements { count: 101, .. })
        ));

        assert!(matches!(
            validate_sql("COMMIT", "mock", &opts, &PostgresDialect, &connector),
            Err(ValidateError::Blocks(BlockError::CommitWithoutBegin { .. }))
        ));

        assert!(journal.entries().is_empty());
    }
}
