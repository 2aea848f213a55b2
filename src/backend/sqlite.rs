//! SQLite backend over `rusqlite`
//!
//! SQLite serializes writers through its file lock, so the advisory lock is a
//! no-op here. Statement timeouts use the progress handler.

use super::DriverKind;
use crate::connection::{sqlite_path, validate_dsn};
use crate::executor::{Connection, Connector, DbError, Row, SqlValue};
use rusqlite::types::{Value, ValueRef};
use rusqlite::params_from_iter;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const PROGRESS_OPS: i32 = 1_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError> {
        validate_dsn(DriverKind::Sqlite, dsn).map_err(|e| DbError::Connect(e.to_string()))?;

        let conn = rusqlite::Connection::open(sqlite_path(dsn))
            .map_err(|e| DbError::Connect(format!("{}: {e}", sqlite_path(dsn))))?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| DbError::Connect(e.to_string()))?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Wrap an already-open connection
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }
}

fn to_values(params: &[SqlValue]) -> Vec<Value> {
    params
        .iter()
        .map(|v| match v {
            SqlValue::Null => Value::Null,
            SqlValue::Int(i) => Value::Integer(*i),
            SqlValue::Text(s) => Value::Text(s.clone()),
            SqlValue::Bool(b) => Value::Integer(i64::from(*b)),
        })
        .collect()
}

fn from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Text(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

fn driver_err(e: rusqlite::Error) -> DbError {
    DbError::Driver(e.to_string())
}

impl Connection for SqliteConnection {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let mut stmt = self.conn.prepare(sql).map_err(driver_err)?;
        // Step through any rows so EXPLAIN and friends run to completion
        let mut rows = stmt.query(params_from_iter(to_values(params))).map_err(driver_err)?;
        while rows.next().map_err(driver_err)?.is_some() {}
        Ok(self.conn.changes())
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let mut stmt = self.conn.prepare(sql).map_err(driver_err)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(to_values(params))).map_err(driver_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(driver_err)? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(from_ref(row.get_ref(idx).map_err(|e| DbError::Parse(e.to_string()))?));
            }
            out.push(Row::new(cells));
        }
        Ok(out)
    }

    fn execute_with_timeout(&mut self, sql: &str, timeout: Duration) -> Result<u64, DbError> {
        let deadline = Instant::now() + timeout;
        self.conn
            .progress_handler(PROGRESS_OPS, Some(move || Instant::now() > deadline));

        let result = self.execute(sql, &[]);
        self.conn.progress_handler(0, None::<fn() -> bool>);

        result.map_err(|e| match e {
            DbError::Driver(msg) if msg.contains("interrupted") => DbError::Timeout(timeout),
            other => other,
        })
    }

    fn lock(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    fn unlock(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), DbError> {
        self.conn.close().map_err(|(_, e)| driver_err(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> SqliteConnection {
        SqliteConnection::new(rusqlite::Connection::open_in_memory().unwrap())
    }

    #[test]
    fn test_execute_and_query_round_values() {
        let mut conn = memory();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT, flag BOOLEAN)", &[]).unwrap();
        let n = conn
            .execute(
                "INSERT INTO t VALUES (?, ?, ?)",
                &[SqlValue::Int(1), SqlValue::Text("a".into()), SqlValue::Bool(true)],
            )
            .unwrap();
        assert_eq!(n, 1);

        let rows = conn.query("SELECT id, name, flag FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64(0).unwrap(), Some(1));
        assert_eq!(rows[0].get_string(1).unwrap(), Some("a".to_string()));
        assert_eq!(rows[0].get_bool(2).unwrap(), Some(true));
    }

    #[test]
    fn test_transaction_rollback_discards_ddl() {
        let mut conn = memory();
        conn.begin().unwrap();
        conn.execute_with_timeout("CREATE TABLE gone (id INTEGER)", Duration::from_secs(4))
            .unwrap();
        conn.rollback().unwrap();

        let rows = conn
            .query("SELECT name FROM sqlite_master WHERE name = 'gone'", &[])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_explain_runs_without_side_effects() {
        let mut conn = memory();
        conn.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();
        conn.execute("EXPLAIN INSERT INTO t VALUES (1)", &[]).unwrap();
        assert!(conn.query("SELECT * FROM t", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_syntax_error_is_driver_error() {
        let mut conn = memory();
        let err = conn.execute("SYNTAX ERROR HERE", &[]).unwrap_err();
        assert!(matches!(err, DbError::Driver(_)));
    }
}
