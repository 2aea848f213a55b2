//! Connection abstraction shared by every backend.
//!
//! The manager, the migration engine and the SQL validator never talk to a
//! driver directly. They go through [`Connection`], which each backend
//! (`postgres`, `mysql`, `sqlite`) implements over its native client. Values
//! crossing the boundary are expressed as [`SqlValue`] so that statements
//! built with `sea-query` can be bound by any driver.

use crate::backend::DriverKind;
use std::fmt;
use std::time::Duration;

/// Database error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Could not open or use the underlying connection
    Connect(String),
    /// Error reported by the driver while executing a statement
    Driver(String),
    /// Row parsing/conversion error
    Parse(String),
    /// Statement exceeded its execution deadline
    Timeout(Duration),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Connect(s) => write!(f, "Connection error: {s}"),
            DbError::Driver(s) => write!(f, "Database error: {s}"),
            DbError::Parse(s) => write!(f, "Parse error: {s}"),
            DbError::Timeout(d) => write!(f, "Statement timed out after {}ms", d.as_millis()),
            DbError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for DbError {}

/// A driver-neutral parameter or result cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Bool(bool),
}

impl SqlValue {
    /// Convert the values produced by a `sea-query` builder.
    ///
    /// Only the value kinds the version and audit tables bind are supported:
    /// booleans, integers (including the unsigned `LIMIT`/`OFFSET` operands)
    /// and strings.
    ///
    /// # Errors
    ///
    /// `DbError::Parse` for an unsigned value above `i64::MAX` or a value kind
    /// no backend binds.
    pub fn from_sea_values(values: &sea_query::Values) -> Result<Vec<SqlValue>, DbError> {
        use sea_query::Value;

        let unsigned = |u: u64| {
            i64::try_from(u).map(SqlValue::Int).map_err(|_| {
                DbError::Parse(format!("unsigned parameter {u} does not fit in a signed 64-bit integer"))
            })
        };

        values
            .iter()
            .map(|value| match value {
                Value::Bool(Some(b)) => Ok(SqlValue::Bool(*b)),
                Value::TinyInt(Some(i)) => Ok(SqlValue::Int(i64::from(*i))),
                Value::SmallInt(Some(i)) => Ok(SqlValue::Int(i64::from(*i))),
                Value::Int(Some(i)) => Ok(SqlValue::Int(i64::from(*i))),
                Value::BigInt(Some(i)) => Ok(SqlValue::Int(*i)),
                Value::TinyUnsigned(Some(u)) => Ok(SqlValue::Int(i64::from(*u))),
                Value::SmallUnsigned(Some(u)) => Ok(SqlValue::Int(i64::from(*u))),
                Value::Unsigned(Some(u)) => Ok(SqlValue::Int(i64::from(*u))),
                Value::BigUnsigned(Some(u)) => unsigned(*u),
                Value::String(Some(s)) => Ok(SqlValue::Text(s.to_string())),
                Value::Bool(None)
                | Value::TinyInt(None)
                | Value::SmallInt(None)
                | Value::Int(None)
                | Value::BigInt(None)
                | Value::TinyUnsigned(None)
                | Value::SmallUnsigned(None)
                | Value::Unsigned(None)
                | Value::BigUnsigned(None)
                | Value::String(None) => Ok(SqlValue::Null),
                other => Err(DbError::Parse(format!("unsupported parameter type: {other:?}"))),
            })
            .collect()
    }
}

/// One result row, cells in select-list order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    pub fn new(cells: Vec<SqlValue>) -> Self {
        Self(cells)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn cell(&self, idx: usize) -> Result<&SqlValue, DbError> {
        self.0
            .get(idx)
            .ok_or_else(|| DbError::Parse(format!("column {idx} out of range ({} columns)", self.0.len())))
    }

    /// Read an integer column. `NULL` becomes `None`.
    pub fn get_i64(&self, idx: usize) -> Result<Option<i64>, DbError> {
        match self.cell(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(i) => Ok(Some(*i)),
            SqlValue::Bool(b) => Ok(Some(i64::from(*b))),
            SqlValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|e| DbError::Parse(format!("column {idx}: '{s}' is not an integer: {e}"))),
        }
    }

    /// Read a boolean column.
    ///
    /// MySQL and SQLite have no native boolean storage, so `0`/`1` integers
    /// and the usual textual spellings are accepted.
    pub fn get_bool(&self, idx: usize) -> Result<Option<bool>, DbError> {
        match self.cell(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Bool(b) => Ok(Some(*b)),
            SqlValue::Int(i) => Ok(Some(*i != 0)),
            SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "1" => Ok(Some(true)),
                "f" | "false" | "0" => Ok(Some(false)),
                other => Err(DbError::Parse(format!("column {idx}: '{other}' is not a boolean"))),
            },
        }
    }

    /// Read a text column.
    pub fn get_string(&self, idx: usize) -> Result<Option<String>, DbError> {
        match self.cell(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            SqlValue::Int(i) => Ok(Some(i.to_string())),
            SqlValue::Bool(b) => Ok(Some(b.to_string())),
        }
    }
}

/// Trait for executing database operations
///
/// One implementation per backend. A `Connection` is owned by exactly one
/// caller at a time; the manager keeps one for its whole lifetime and the
/// validator opens a short-lived one per validation call.
pub trait Connection: Send {
    /// Which SQL flavour this connection speaks
    fn kind(&self) -> DriverKind;

    /// Execute a statement and return the number of rows affected
    ///
    /// Statements that produce rows (e.g. `EXPLAIN`) are run to completion and
    /// their rows discarded.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails or a cell cannot be converted.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError>;

    /// Execute a statement that must finish within `timeout`
    ///
    /// # Errors
    ///
    /// Returns `DbError::Timeout` (or the driver's cancellation error) when the
    /// deadline passes, otherwise as [`Connection::execute`].
    fn execute_with_timeout(&mut self, sql: &str, timeout: Duration) -> Result<u64, DbError>;

    /// Acquire the database-level advisory lock that serializes migrators
    fn lock(&mut self) -> Result<(), DbError>;

    /// Release the advisory lock taken by [`Connection::lock`]
    fn unlock(&mut self) -> Result<(), DbError>;

    /// Close the connection. Consumes it so it cannot be closed twice.
    fn close(self: Box<Self>) -> Result<(), DbError>;

    fn begin(&mut self) -> Result<(), DbError> {
        self.execute("BEGIN", &[]).map(|_| ())
    }

    fn commit(&mut self) -> Result<(), DbError> {
        self.execute("COMMIT", &[]).map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        self.execute("ROLLBACK", &[]).map(|_| ())
    }

    /// Execute a statement built by `sea-query` with its bound values
    fn execute_built(&mut self, built: (String, sea_query::Values)) -> Result<u64, DbError> {
        let (sql, values) = built;
        self.execute(&sql, &SqlValue::from_sea_values(&values)?)
    }

    /// Run a query built by `sea-query` with its bound values
    fn query_built(&mut self, built: (String, sea_query::Values)) -> Result<Vec<Row>, DbError> {
        let (sql, values) = built;
        self.query(&sql, &SqlValue::from_sea_values(&values)?)
    }
}

/// Factory that opens a [`Connection`] from a DSN
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// Returns `DbError::Connect` if the DSN is malformed or the server refuses.
    fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError>;
}

impl<F> Connector for F
where
    F: Fn(&str) -> Result<Box<dyn Connection>, DbError> + Send + Sync,
{
    fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError> {
        self(dsn)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording connection used by validator and engine unit tests.

    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared log of every statement a [`RecordingConnection`] saw
    #[derive(Debug, Clone, Default)]
    pub struct Journal(pub Arc<Mutex<Vec<String>>>);

    impl Journal {
        pub fn entries(&self) -> Vec<String> {
            self.0.lock().map(|j| j.clone()).unwrap_or_default()
        }

        fn push(&self, sql: &str) {
            if let Ok(mut j) = self.0.lock() {
                j.push(sql.to_string());
            }
        }
    }

    /// Accepts everything except statements containing one of `fail_on`
    pub struct RecordingConnection {
        pub journal: Journal,
        pub fail_on: Vec<String>,
        pub kind: DriverKind,
    }

    impl RecordingConnection {
        pub fn new(kind: DriverKind) -> Self {
            Self {
                journal: Journal::default(),
                fail_on: Vec::new(),
                kind,
            }
        }

        pub fn failing_on(mut self, needle: &str) -> Self {
            self.fail_on.push(needle.to_string());
            self
        }
    }

    impl Connection for RecordingConnection {
        fn kind(&self) -> DriverKind {
            self.kind
        }

        fn execute(&mut self, sql: &str, _params: &[SqlValue]) -> Result<u64, DbError> {
            self.journal.push(sql);
            if self.fail_on.iter().any(|n| sql.contains(n.as_str())) {
                return Err(DbError::Driver(format!("syntax error near '{sql}'")));
            }
            Ok(0)
        }

        fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
            self.execute(sql, params).map(|_| Vec::new())
        }

        fn execute_with_timeout(&mut self, sql: &str, _timeout: Duration) -> Result<u64, DbError> {
            self.execute(sql, &[])
        }

        fn lock(&mut self) -> Result<(), DbError> {
            self.journal.push("LOCK");
            Ok(())
        }

        fn unlock(&mut self) -> Result<(), DbError> {
            self.journal.push("UNLOCK");
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<(), DbError> {
            self.journal.push("CLOSE");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_display() {
        let err = DbError::Driver("relation \"t\" does not exist".to_string());
        assert!(err.to_string().contains("Database error"));

        let err = DbError::Timeout(Duration::from_millis(4000));
        assert_eq!(err.to_string(), "Statement timed out after 4000ms");
    }

    #[test]
    fn test_row_accessors_coerce_driver_representations() {
        let row = Row::new(vec![
            SqlValue::Int(5),
            SqlValue::Int(1),
            SqlValue::Text("abc".to_string()),
            SqlValue::Null,
            SqlValue::Text("f".to_string()),
        ]);

        assert_eq!(row.get_i64(0).unwrap(), Some(5));
        assert_eq!(row.get_bool(1).unwrap(), Some(true));
        assert_eq!(row.get_string(2).unwrap(), Some("abc".to_string()));
        assert_eq!(row.get_i64(3).unwrap(), None);
        assert_eq!(row.get_bool(4).unwrap(), Some(false));
        assert!(row.get_i64(9).is_err());
        assert!(row.get_i64(2).is_err());
    }

    #[test]
    fn test_from_sea_values() {
        let values = sea_query::Values(vec![
            sea_query::Value::BigInt(Some(7)),
            sea_query::Value::Bool(Some(false)),
            sea_query::Value::String(None),
        ]);
        assert_eq!(
            SqlValue::from_sea_values(&values).unwrap(),
            vec![SqlValue::Int(7), SqlValue::Bool(false), SqlValue::Null]
        );
    }

    #[test]
    fn test_from_sea_values_binds_limit_as_integer() {
        use sea_query::{Order, Query};

        let select = Query::select()
            .columns(["version", "dirty"])
            .from("schema_migrations")
            .order_by("version", Order::Desc)
            .limit(1)
            .to_owned();
        let (sql, values) = DriverKind::Sqlite.build_query(&select);

        assert!(sql.ends_with("LIMIT ?"), "unexpected sql: {sql}");
        assert_eq!(SqlValue::from_sea_values(&values).unwrap(), vec![SqlValue::Int(1)]);
    }

    #[test]
    fn test_from_sea_values_rejects_overflow_and_unknown_kinds() {
        let too_big = sea_query::Values(vec![sea_query::Value::BigUnsigned(Some(u64::MAX))]);
        assert!(matches!(SqlValue::from_sea_values(&too_big), Err(DbError::Parse(_))));

        let float = sea_query::Values(vec![sea_query::Value::Double(Some(1.5))]);
        assert!(matches!(SqlValue::from_sea_values(&float), Err(DbError::Parse(_))));
    }
}
