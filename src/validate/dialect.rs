//! Per-engine SQL capabilities used by the validator and the engine

use super::block::Block;
use super::error::BlockError;
use super::splitter::{self, leading_keywords};
use crate::executor::{Connection, DbError};
use std::fmt;
use std::time::Duration;

/// Coarse statement class, decided by the leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Dml,
    Ddl,
    Unknown,
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementType::Dml => "DML",
            StatementType::Ddl => "DDL",
            StatementType::Unknown => "UNKNOWN",
        })
    }
}

/// Classify `stmt` by its first keyword against the dialect's keyword sets
pub fn classify(stmt: &str, dml: &[&str], ddl: &[&str]) -> StatementType {
    let Some(first) = leading_keywords(stmt, 1).into_iter().next() else {
        return StatementType::Unknown;
    };
    if dml.contains(&first.as_str()) {
        StatementType::Dml
    } else if ddl.contains(&first.as_str()) {
        StatementType::Ddl
    } else {
        StatementType::Unknown
    }
}

/// True when `stmt` starts with any of the keyword sequences
pub fn starts_with_any(stmt: &str, prefixes: &[&[&str]]) -> bool {
    prefixes
        .iter()
        .any(|keywords| splitter::starts_with_keywords(stmt, keywords))
}

/// SQL dialect capability set
///
/// Implementations are stateless; every method is a pure function of the
/// statement text except [`Dialect::validate_stmt`], which runs against an
/// open transaction.
pub trait Dialect: Send + Sync {
    /// Driver name this dialect belongs to
    fn name(&self) -> &'static str;

    /// Split a script into statements
    fn split_statements(&self, sql: &str) -> Vec<String> {
        splitter::split_statements(sql)
    }

    /// Group statements into blocks validated in one transaction each
    fn parse_blocks(&self, statements: Vec<String>) -> Result<Vec<Block>, BlockError>;

    fn statement_type(&self, stmt: &str) -> StatementType;

    /// False when the statement cannot be safely dry-run
    fn is_checkable(&self, stmt: &str) -> bool;

    /// False when the statement aborts or misbehaves inside a transaction
    fn is_safe_in_txn(&self, stmt: &str) -> bool;

    /// Dry-run one statement inside the caller's open transaction
    ///
    /// DML is only planned (`EXPLAIN`); everything else is executed and
    /// relies on the caller rolling the transaction back.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the statement (or its plan) fails or the
    /// timeout expires.
    fn validate_stmt(&self, conn: &mut dyn Connection, stmt: &str, timeout: Duration) -> Result<(), DbError> {
        let sql = match self.statement_type(stmt) {
            StatementType::Dml => format!("EXPLAIN {stmt}"),
            StatementType::Ddl | StatementType::Unknown => stmt.to_string(),
        };
        conn.execute_with_timeout(&sql, timeout).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DriverKind;
    use crate::executor::testing::RecordingConnection;
    use crate::validate::SqliteDialect;

    #[test]
    fn test_classify_skips_leading_comments() {
        let dml = &["SELECT", "INSERT"];
        let ddl = &["CREATE"];
        assert_eq!(classify("-- note\ninsert into t values (1)", dml, ddl), StatementType::Dml);
        assert_eq!(classify("/* x */ CREATE TABLE t (id int)", dml, ddl), StatementType::Ddl);
        assert_eq!(classify("VACUUM", dml, ddl), StatementType::Unknown);
        assert_eq!(classify("   ", dml, ddl), StatementType::Unknown);
    }

    #[test]
    fn test_validate_stmt_explains_dml_only() {
        let mut conn = RecordingConnection::new(DriverKind::Sqlite);
        let timeout = Duration::from_secs(1);

        SqliteDialect
            .validate_stmt(&mut conn, "UPDATE t SET a = 1", timeout)
            .unwrap();
        SqliteDialect
            .validate_stmt(&mut conn, "CREATE TABLE t (id int)", timeout)
            .unwrap();

        assert_eq!(
            conn.journal.entries(),
            vec!["EXPLAIN UPDATE t SET a = 1", "CREATE TABLE t (id int)"]
        );
    }
}
