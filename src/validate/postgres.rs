//! PostgreSQL dialect

use super::block::{parse_transaction_blocks, Block};
use super::dialect::{classify, starts_with_any, Dialect, StatementType};
use super::error::BlockError;

const DML: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"];
const DDL: &[&str] = &["CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME"];

const UNCHECKABLE: &[&[&str]] = &[&["DO"], &["COPY"], &["SET"], &["GRANT"], &["REVOKE"]];

const NOT_IN_TRANSACTION: &[&[&str]] = &[
    &["VACUUM"],
    &["CREATE", "DATABASE"],
    &["DROP", "DATABASE"],
    &["CREATE", "TABLESPACE"],
    &["DROP", "TABLESPACE"],
    &["CREATE", "INDEX", "CONCURRENTLY"],
    &["CREATE", "UNIQUE", "INDEX", "CONCURRENTLY"],
    &["DROP", "INDEX", "CONCURRENTLY"],
    &["REINDEX"],
    &["CLUSTER"],
    &["ALTER", "SYSTEM"],
    &["REFRESH", "MATERIALIZED", "VIEW", "CONCURRENTLY"],
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn parse_blocks(&self, statements: Vec<String>) -> Result<Vec<Block>, BlockError> {
        parse_transaction_blocks(statements)
    }

    fn statement_type(&self, stmt: &str) -> StatementType {
        classify(stmt, DML, DDL)
    }

    fn is_checkable(&self, stmt: &str) -> bool {
        !starts_with_any(stmt, UNCHECKABLE)
    }

    fn is_safe_in_txn(&self, stmt: &str) -> bool {
        !starts_with_any(stmt, NOT_IN_TRANSACTION)
    }
}
