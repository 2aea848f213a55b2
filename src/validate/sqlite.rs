//! SQLite dialect

use super::block::{singleton_blocks, Block};
use super::dialect::{classify, Dialect, StatementType};
use super::error::BlockError;

const DML: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE"];
const DDL: &[&str] = &["CREATE", "ALTER", "DROP"];

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn parse_blocks(&self, statements: Vec<String>) -> Result<Vec<Block>, BlockError> {
        Ok(singleton_blocks(statements))
    }

    fn statement_type(&self, stmt: &str) -> StatementType {
        classify(stmt, DML, DDL)
    }

    fn is_checkable(&self, _stmt: &str) -> bool {
        true
    }

    fn is_safe_in_txn(&self, _stmt: &str) -> bool {
        true
    }
}
