//! MySQL dialect
//!
//! MySQL commits implicitly around DDL, so every statement is validated in a
//! block of its own.

use super::block::{singleton_blocks, Block};
use super::dialect::{classify, starts_with_any, Dialect, StatementType};
use super::error::BlockError;

const DML: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE"];
const DDL: &[&str] = &["CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME"];

const NOT_IN_TRANSACTION: &[&[&str]] = &[&["CREATE", "DATABASE"], &["DROP", "DATABASE"]];

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn parse_blocks(&self, statements: Vec<String>) -> Result<Vec<Block>, BlockError> {
        Ok(singleton_blocks(statements))
    }

    fn statement_type(&self, stmt: &str) -> StatementType {
        classify(stmt, DML, DDL)
    }

    fn is_checkable(&self, stmt: &str) -> bool {
        !starts_with_any(stmt, &[&["DELIMITER"]])
    }

    fn is_safe_in_txn(&self, stmt: &str) -> bool {
        !starts_with_any(stmt, NOT_IN_TRANSACTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_rules() {
        let d = MysqlDialect;
        assert!(!d.is_checkable("DELIMITER //"));
        assert!(d.is_checkable("SET @x = 1"));
        assert!(!d.is_safe_in_txn("CREATE DATABASE shop"));
        assert!(d.is_safe_in_txn("CREATE TABLE t (id int)"));
        assert_eq!(d.statement_type("WITH x AS (SELECT 1) SELECT 1"), StatementType::Unknown);
        assert_eq!(d.statement_type("RENAME TABLE a TO b"), StatementType::Ddl);

        let blocks = d
            .parse_blocks(vec!["BEGIN".into(), "SELECT 1".into()])
            .unwrap();
        assert_eq!(blocks.len(), 2);
    }
}
