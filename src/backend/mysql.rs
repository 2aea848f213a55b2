//! MySQL backend over the `mysql` crate

use super::DriverKind;
use crate::connection::validate_dsn;
use crate::executor::{Connection, Connector, DbError, Row, SqlValue};
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, Params, Value};
use std::time::Duration;

const LOCK_NAME: &str = "harbormaster_migrate";
const LOCK_WAIT_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlConnector;

impl Connector for MysqlConnector {
    fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError> {
        validate_dsn(DriverKind::Mysql, dsn).map_err(|e| DbError::Connect(e.to_string()))?;
        let opts = Opts::from_url(dsn).map_err(|e| DbError::Connect(e.to_string()))?;
        let conn = Conn::new(opts).map_err(|e| DbError::Connect(e.to_string()))?;
        Ok(Box::new(MysqlConnection { conn }))
    }
}

pub struct MysqlConnection {
    conn: Conn,
}

fn to_params(values: &[SqlValue]) -> Params {
    if values.is_empty() {
        return Params::Empty;
    }
    Params::Positional(
        values
            .iter()
            .map(|v| match v {
                SqlValue::Null => Value::NULL,
                SqlValue::Int(i) => Value::Int(*i),
                SqlValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
                SqlValue::Bool(b) => Value::Int(i64::from(*b)),
            })
            .collect(),
    )
}

fn from_value(value: Option<Value>) -> Result<SqlValue, DbError> {
    Ok(match value {
        None | Some(Value::NULL) => SqlValue::Null,
        Some(Value::Int(i)) => SqlValue::Int(i),
        Some(Value::UInt(u)) => SqlValue::Int(
            i64::try_from(u).map_err(|_| DbError::Parse(format!("unsigned value {u} exceeds i64")))?,
        ),
        Some(Value::Bytes(b)) => SqlValue::Text(String::from_utf8_lossy(&b).into_owned()),
        Some(other) => SqlValue::Text(other.as_sql(true)),
    })
}

fn driver_err(e: mysql::Error) -> DbError {
    DbError::Driver(e.to_string())
}

impl Connection for MysqlConnection {
    fn kind(&self) -> DriverKind {
        DriverKind::Mysql
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        if params.is_empty() {
            // Text protocol: DDL and transaction control cannot always be prepared
            self.conn.query_drop(sql).map_err(driver_err)?;
        } else {
            self.conn.exec_drop(sql, to_params(params)).map_err(driver_err)?;
        }
        Ok(self.conn.affected_rows())
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let rows: Vec<mysql::Row> = if params.is_empty() {
            self.conn.query(sql).map_err(driver_err)?
        } else {
            self.conn.exec(sql, to_params(params)).map_err(driver_err)?
        };

        rows.into_iter()
            .map(|row| {
                row.unwrap_raw()
                    .into_iter()
                    .map(from_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Row::new)
            })
            .collect()
    }

    fn execute_with_timeout(&mut self, sql: &str, timeout: Duration) -> Result<u64, DbError> {
        // max_execution_time only bounds SELECT; other statements run to completion
        self.execute(&format!("SET SESSION max_execution_time = {}", timeout.as_millis()), &[])?;
        let result = self.execute(sql, &[]).map_err(|e| match e {
            DbError::Driver(msg) if msg.contains("maximum statement execution time exceeded") => {
                DbError::Timeout(timeout)
            }
            other => other,
        });
        self.execute("SET SESSION max_execution_time = 0", &[])?;
        result
    }

    fn lock(&mut self) -> Result<(), DbError> {
        let rows = self.query(
            "SELECT GET_LOCK(?, ?)",
            &[SqlValue::Text(LOCK_NAME.to_string()), SqlValue::Int(LOCK_WAIT_SECONDS)],
        )?;
        match rows.first().map(|r| r.get_i64(0)).transpose()?.flatten() {
            Some(1) => Ok(()),
            _ => Err(DbError::Other(format!(
                "could not acquire migration lock '{LOCK_NAME}' within {LOCK_WAIT_SECONDS}s"
            ))),
        }
    }

    fn unlock(&mut self) -> Result<(), DbError> {
        self.query("SELECT RELEASE_LOCK(?)", &[SqlValue::Text(LOCK_NAME.to_string())])
            .map(|_| ())
    }

    fn close(self: Box<Self>) -> Result<(), DbError> {
        drop(self.conn);
        Ok(())
    }
}
