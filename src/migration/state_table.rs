//! Version and audit table management
//!
//! `schema_migrations` holds at most one `(version, dirty)` row; no row means
//! the database has never been migrated. `migrations_history` is the
//! append-only audit log.

use crate::executor::{Connection, DbError};
use sea_query::{ColumnDef, Query, Table, TableCreateStatement};

pub const SCHEMA_MIGRATIONS: &str = "schema_migrations";
pub const MIGRATIONS_HISTORY: &str = "migrations_history";

/// Create statement for the `schema_migrations` version table
pub fn schema_migrations_table() -> TableCreateStatement {
    Table::create()
        .table(SCHEMA_MIGRATIONS)
        .if_not_exists()
        .col(ColumnDef::new("version").big_integer().not_null().primary_key())
        .col(ColumnDef::new("dirty").boolean().not_null())
        .to_owned()
}

/// Create statement for the `migrations_history` audit table
pub fn history_table() -> TableCreateStatement {
    Table::create()
        .table(MIGRATIONS_HISTORY)
        .if_not_exists()
        .col(
            ColumnDef::new("id")
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new("executed_at").string_len(64).not_null())
        .col(ColumnDef::new("action").string_len(32).not_null())
        .col(ColumnDef::new("version").big_integer().not_null())
        .col(ColumnDef::new("executed_by").string_len(255).not_null())
        .col(ColumnDef::new("committed").boolean().not_null().default(false))
        .col(ColumnDef::new("sha256").string_len(64).not_null().default(""))
        .to_owned()
}

/// Create both tables if they don't exist
pub fn ensure_tables(conn: &mut dyn Connection) -> Result<(), DbError> {
    let kind = conn.kind();
    conn.execute(&kind.build_schema(&schema_migrations_table()), &[])?;
    conn.execute(&kind.build_schema(&history_table()), &[])?;
    Ok(())
}

/// The persisted `(version, dirty)` pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaVersion {
    /// `None` until the first migration is applied
    pub version: Option<i64>,
    pub dirty: bool,
}

impl SchemaVersion {
    pub fn clean(version: Option<i64>) -> Self {
        Self { version, dirty: false }
    }

    pub fn dirty(version: i64) -> Self {
        Self {
            version: Some(version),
            dirty: true,
        }
    }

    /// Version as a number, nil counted as zero
    pub fn number(&self) -> i64 {
        self.version.unwrap_or(0)
    }
}

/// Read the current version row
pub fn read_version(conn: &mut dyn Connection) -> Result<SchemaVersion, DbError> {
    let select = Query::select()
        .columns(["version", "dirty"])
        .from(SCHEMA_MIGRATIONS)
        .limit(1)
        .to_owned();
    let kind = conn.kind();
    let rows = conn.query_built(kind.build_query(&select))?;

    match rows.first() {
        None => Ok(SchemaVersion::default()),
        Some(row) => Ok(SchemaVersion {
            version: row.get_i64(0)?,
            dirty: row.get_bool(1)?.unwrap_or(false),
        }),
    }
}

/// Replace the version row
///
/// Runs in its own transaction. A `None` version clears the table, which is
/// how a full rollback is recorded.
pub fn write_version(conn: &mut dyn Connection, state: SchemaVersion) -> Result<(), DbError> {
    conn.begin()?;
    match replace_version(conn, state) {
        Ok(()) => conn.commit(),
        Err(e) => {
            if let Err(rollback_err) = conn.rollback() {
                tracing::warn!(error = %rollback_err, "rollback of version update failed");
            }
            Err(e)
        }
    }
}

fn replace_version(conn: &mut dyn Connection, state: SchemaVersion) -> Result<(), DbError> {
    let kind = conn.kind();
    let delete = Query::delete().from_table(SCHEMA_MIGRATIONS).to_owned();
    conn.execute_built(kind.build_query(&delete))?;

    if let Some(version) = state.version {
        let insert = Query::insert()
            .into_table(SCHEMA_MIGRATIONS)
            .columns(["version", "dirty"])
            .values_panic([version.into(), state.dirty.into()])
            .to_owned();
        conn.execute_built(kind.build_query(&insert))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DriverKind;
    use crate::executor::testing::RecordingConnection;

    #[test]
    fn test_table_ddl_per_engine() {
        let pg = DriverKind::Postgres.build_schema(&schema_migrations_table());
        assert!(pg.contains("CREATE TABLE IF NOT EXISTS \"schema_migrations\""));
        assert!(pg.contains("bigint"));

        let lite = DriverKind::Sqlite.build_schema(&history_table());
        assert!(lite.contains("\"migrations_history\""));
        assert!(lite.to_lowercase().contains("autoincrement"));

        let my = DriverKind::Mysql.build_schema(&history_table());
        assert!(my.contains("`migrations_history`"));
    }

    #[test]
    fn test_write_version_is_transactional() {
        let mut conn = RecordingConnection::new(DriverKind::Sqlite);
        write_version(&mut conn, SchemaVersion::dirty(3)).unwrap();

        let journal = conn.journal.entries();
        assert_eq!(journal.first().map(String::as_str), Some("BEGIN"));
        assert!(journal[1].starts_with("DELETE FROM \"schema_migrations\""));
        assert!(journal[2].starts_with("INSERT INTO \"schema_migrations\""));
        assert_eq!(journal.last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn test_write_nil_version_only_clears() {
        let mut conn = RecordingConnection::new(DriverKind::Postgres);
        write_version(&mut conn, SchemaVersion::clean(None)).unwrap();
        let journal = conn.journal.entries();
        assert_eq!(journal.len(), 3);
        assert!(!journal.iter().any(|s| s.starts_with("INSERT")));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let mut conn = RecordingConnection::new(DriverKind::Sqlite).failing_on("INSERT");
        assert!(write_version(&mut conn, SchemaVersion::clean(Some(1))).is_err());
        assert_eq!(conn.journal.entries().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn test_empty_table_reads_nil() {
        let mut conn = RecordingConnection::new(DriverKind::Sqlite);
        assert_eq!(read_version(&mut conn).unwrap(), SchemaVersion::default());
        assert_eq!(SchemaVersion::default().number(), 0);
    }
}
