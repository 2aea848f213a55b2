//! Reads and writes of the `migrations_history` audit log

use crate::executor::{Connection, DbError, Row};
use crate::migration::record::{parse_timestamp, HistoryAction, HistoryEntry, NewHistoryEntry};
use crate::migration::state_table::MIGRATIONS_HISTORY;
use chrono::Utc;
use sea_query::{Expr, ExprTrait, Order, Query};

/// Append one audit row
pub fn record(conn: &mut dyn Connection, entry: &NewHistoryEntry) -> Result<(), DbError> {
    let insert = Query::insert()
        .into_table(MIGRATIONS_HISTORY)
        .columns(["executed_at", "action", "version", "executed_by", "committed", "sha256"])
        .values_panic([
            Utc::now().to_rfc3339().into(),
            entry.action.as_str().into(),
            entry.version.into(),
            entry.executed_by.as_str().into(),
            false.into(),
            entry.sha256.as_str().into(),
        ])
        .to_owned();
    let kind = conn.kind();
    conn.execute_built(kind.build_query(&insert)).map(|_| ())
}

/// Whether `version` has any committed row
///
/// Later uncommitted rows for the same version (a rollback landing on it, a
/// safe-force to it) do not lift the freeze.
pub fn version_committed(conn: &mut dyn Connection, version: i64) -> Result<bool, DbError> {
    let select = Query::select()
        .column("id")
        .from(MIGRATIONS_HISTORY)
        .and_where(Expr::col("version").eq(version))
        .and_where(Expr::col("committed").eq(true))
        .limit(1)
        .to_owned();
    let kind = conn.kind();
    Ok(!conn.query_built(kind.build_query(&select))?.is_empty())
}

/// Whether any row at all has been committed
pub fn any_committed(conn: &mut dyn Connection) -> Result<bool, DbError> {
    let select = Query::select()
        .column("id")
        .from(MIGRATIONS_HISTORY)
        .and_where(Expr::col("committed").eq(true))
        .limit(1)
        .to_owned();
    let kind = conn.kind();
    Ok(!conn.query_built(kind.build_query(&select))?.is_empty())
}

/// Hash of the latest committed `up` row for `version`
///
/// Uncommitted rows are ignored: only committed history is frozen.
pub fn committed_up_hash(conn: &mut dyn Connection, version: i64) -> Result<Option<String>, DbError> {
    let select = Query::select()
        .column("sha256")
        .from(MIGRATIONS_HISTORY)
        .and_where(Expr::col("version").eq(version))
        .and_where(Expr::col("action").eq(HistoryAction::Up.as_str()))
        .and_where(Expr::col("committed").eq(true))
        .order_by("id", Order::Desc)
        .limit(1)
        .to_owned();
    let kind = conn.kind();
    let rows = conn.query_built(kind.build_query(&select))?;
    match rows.first() {
        Some(row) => Ok(row.get_string(0)?.filter(|h| !h.is_empty())),
        None => Ok(None),
    }
}

/// Mark every uncommitted row committed, in one transaction
///
/// Returns how many rows were flipped.
pub fn commit_all(conn: &mut dyn Connection) -> Result<u64, DbError> {
    let update = Query::update()
        .table(MIGRATIONS_HISTORY)
        .value("committed", true)
        .and_where(Expr::col("committed").eq(false))
        .to_owned();
    let kind = conn.kind();

    conn.begin()?;
    match conn.execute_built(kind.build_query(&update)) {
        Ok(flipped) => {
            conn.commit()?;
            Ok(flipped)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.rollback() {
                tracing::warn!(error = %rollback_err, "rollback of commit failed");
            }
            Err(e)
        }
    }
}

/// All rows in insertion order
pub fn entries(conn: &mut dyn Connection) -> Result<Vec<HistoryEntry>, DbError> {
    let select = Query::select()
        .columns(["id", "executed_at", "action", "version", "executed_by", "committed", "sha256"])
        .from(MIGRATIONS_HISTORY)
        .order_by("id", Order::Asc)
        .to_owned();
    let kind = conn.kind();
    conn.query_built(kind.build_query(&select))?
        .iter()
        .map(entry_from_row)
        .collect()
}

fn entry_from_row(row: &Row) -> Result<HistoryEntry, DbError> {
    let missing = |col: &str| DbError::Parse(format!("{MIGRATIONS_HISTORY}.{col} is NULL"));

    let raw_time = row.get_string(1)?.ok_or_else(|| missing("executed_at"))?;
    let executed_at = parse_timestamp(&raw_time)
        .ok_or_else(|| DbError::Parse(format!("unrecognised executed_at '{raw_time}'")))?;
    let action = row
        .get_string(2)?
        .ok_or_else(|| missing("action"))?
        .parse::<HistoryAction>()
        .map_err(DbError::Parse)?;

    Ok(HistoryEntry {
        id: row.get_i64(0)?.ok_or_else(|| missing("id"))?,
        executed_at,
        action,
        version: row.get_i64(3)?.ok_or_else(|| missing("version"))?,
        executed_by: row.get_string(4)?.unwrap_or_default(),
        committed: row.get_bool(5)?.unwrap_or(false),
        sha256: row.get_string(6)?.unwrap_or_default(),
    })
}
