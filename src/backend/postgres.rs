//! PostgreSQL backend over `may_postgres`

use super::{DriverKind, ADVISORY_LOCK_KEY};
use crate::connection::validate_dsn;
use crate::executor::{Connection, Connector, DbError, Row, SqlValue};
use may_postgres::types::{ToSql, Type};
use may_postgres::Client;
use std::time::Duration;

/// Opens [`PostgresConnection`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

impl Connector for PostgresConnector {
    fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError> {
        validate_dsn(DriverKind::Postgres, dsn).map_err(|e| DbError::Connect(e.to_string()))?;

        // may_postgres::connect is blocking and returns the client directly
        let client = may_postgres::connect(dsn).map_err(|e| DbError::Connect(e.to_string()))?;
        Ok(Box::new(PostgresConnection { client }))
    }
}

pub struct PostgresConnection {
    client: Client,
}

/// Convert neutral values into owned `ToSql` boxes and run `f` with borrowed params
fn with_params<R>(
    values: &[SqlValue],
    f: impl FnOnce(&[&dyn ToSql]) -> Result<R, may_postgres::Error>,
) -> Result<R, DbError> {
    let owned: Vec<Box<dyn ToSql + Sync>> = values
        .iter()
        .map(|v| -> Box<dyn ToSql + Sync> {
            match v {
                SqlValue::Null => Box::new(Option::<String>::None),
                SqlValue::Int(i) => Box::new(*i),
                SqlValue::Text(s) => Box::new(s.clone()),
                SqlValue::Bool(b) => Box::new(*b),
            }
        })
        .collect();
    let params: Vec<&dyn ToSql> = owned.iter().map(|b| &**b as &dyn ToSql).collect();

    f(&params).map_err(|e| DbError::Driver(e.to_string()))
}

fn convert_row(row: &may_postgres::Row) -> Result<Row, DbError> {
    let parse = |idx: usize, e: may_postgres::Error| DbError::Parse(format!("column {idx}: {e}"));

    let mut cells = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let cell = match *column.type_() {
            Type::INT8 => row.try_get::<usize, Option<i64>>(idx).map_err(|e| parse(idx, e))?.map(SqlValue::Int),
            Type::INT4 => row
                .try_get::<usize, Option<i32>>(idx)
                .map_err(|e| parse(idx, e))?
                .map(|i| SqlValue::Int(i64::from(i))),
            Type::INT2 => row
                .try_get::<usize, Option<i16>>(idx)
                .map_err(|e| parse(idx, e))?
                .map(|i| SqlValue::Int(i64::from(i))),
            Type::BOOL => row.try_get::<usize, Option<bool>>(idx).map_err(|e| parse(idx, e))?.map(SqlValue::Bool),
            _ => row
                .try_get::<usize, Option<String>>(idx)
                .map_err(|e| parse(idx, e))?
                .map(SqlValue::Text),
        };
        cells.push(cell.unwrap_or(SqlValue::Null));
    }
    Ok(Row::new(cells))
}

impl Connection for PostgresConnection {
    fn kind(&self) -> DriverKind {
        DriverKind::Postgres
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        if params.is_empty() {
            // Simple protocol: allows statements that cannot be prepared (BEGIN, DO, VACUUM...)
            return self
                .client
                .batch_execute(sql)
                .map(|_| 0)
                .map_err(|e| DbError::Driver(e.to_string()));
        }
        with_params(params, |p| self.client.execute(sql, p))
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let rows = with_params(params, |p| self.client.query(sql, p))?;
        rows.iter().map(convert_row).collect()
    }

    fn execute_with_timeout(&mut self, sql: &str, timeout: Duration) -> Result<u64, DbError> {
        // Callers run this inside a transaction, so SET LOCAL ends with it
        self.execute(&format!("SET LOCAL statement_timeout = {}", timeout.as_millis()), &[])?;
        self.execute(sql, &[]).map_err(|e| match e {
            DbError::Driver(msg) if msg.contains("statement timeout") => DbError::Timeout(timeout),
            other => other,
        })
    }

    fn lock(&mut self) -> Result<(), DbError> {
        self.query("SELECT pg_advisory_lock($1)", &[SqlValue::Int(ADVISORY_LOCK_KEY)])
            .map(|_| ())
    }

    fn unlock(&mut self) -> Result<(), DbError> {
        self.query("SELECT pg_advisory_unlock($1)", &[SqlValue::Int(ADVISORY_LOCK_KEY)])
            .map(|_| ())
    }

    fn close(self: Box<Self>) -> Result<(), DbError> {
        drop(self.client);
        Ok(())
    }
}
