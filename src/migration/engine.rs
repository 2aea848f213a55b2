//! Applies migration scripts and maintains `schema_migrations`
//!
//! Every mutating call holds the advisory lock for its whole duration. A
//! single version is moved in three steps: mark dirty, run the script, mark
//! the resulting version clean. A failure in the middle leaves the dirty
//! marker in place for an operator to resolve with a safe force.

use crate::executor::{Connection, DbError};
use crate::migration::file::{Direction, Migration, MigrationSource};
use crate::migration::lock::MigrationLockGuard;
use crate::migration::state_table::{read_version, write_version, SchemaVersion};
use crate::migration::MigrationError;
use crate::validate::{transaction_marker, Dialect};

/// What an engine call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Nothing to apply or roll back
    NoChange,
}

/// Runs migrations from `source` using `dialect` to split scripts
pub struct Engine<'a> {
    source: &'a MigrationSource,
    dialect: &'a dyn Dialect,
}

impl<'a> Engine<'a> {
    pub fn new(source: &'a MigrationSource, dialect: &'a dyn Dialect) -> Self {
        Self { source, dialect }
    }

    pub fn version(&self, conn: &mut dyn Connection) -> Result<SchemaVersion, MigrationError> {
        Ok(read_version(conn)?)
    }

    /// Apply every pending migration
    pub fn up(&self, conn: &mut dyn Connection) -> Result<Outcome, MigrationError> {
        let mut guard = MigrationLockGuard::acquire(conn)?;
        let conn = guard.conn();
        let state = clean_state(conn)?;

        let pending = self.source.pending_after(state.version);
        if pending.is_empty() {
            return Ok(Outcome::NoChange);
        }
        for migration in pending {
            self.apply_up(conn, migration)?;
        }
        Ok(Outcome::Applied)
    }

    /// Roll back every applied migration
    pub fn down(&self, conn: &mut dyn Connection) -> Result<Outcome, MigrationError> {
        let mut guard = MigrationLockGuard::acquire(conn)?;
        let conn = guard.conn();
        let state = clean_state(conn)?;

        let Some(current) = state.version else {
            return Ok(Outcome::NoChange);
        };
        let plan = self.rollback_plan(current, None)?;
        for migration in plan {
            self.apply_down(conn, migration)?;
        }
        Ok(Outcome::Applied)
    }

    /// Move `n` versions: forward when positive, backward when negative
    ///
    /// Fails without touching the database when fewer than `|n|` migrations
    /// are available in that direction.
    pub fn steps(&self, conn: &mut dyn Connection, n: i64) -> Result<Outcome, MigrationError> {
        if n == 0 {
            return Ok(Outcome::NoChange);
        }
        let mut guard = MigrationLockGuard::acquire(conn)?;
        let conn = guard.conn();
        let state = clean_state(conn)?;
        let count = n.unsigned_abs();

        if n > 0 {
            let pending = self.source.pending_after(state.version);
            if (pending.len() as u64) < count {
                return Err(MigrationError::NotEnoughMigrations {
                    requested: count,
                    available: pending.len() as u64,
                });
            }
            for migration in pending.into_iter().take(count as usize) {
                self.apply_up(conn, migration)?;
            }
        } else {
            let Some(current) = state.version else {
                return Err(MigrationError::NotEnoughMigrations {
                    requested: count,
                    available: 0,
                });
            };
            for migration in self.rollback_plan(current, Some(count))? {
                self.apply_down(conn, migration)?;
            }
        }
        Ok(Outcome::Applied)
    }

    /// Set the version row without running anything and clear dirty
    pub fn force(&self, conn: &mut dyn Connection, version: Option<i64>) -> Result<(), MigrationError> {
        let mut guard = MigrationLockGuard::acquire(conn)?;
        write_version(guard.conn(), SchemaVersion::clean(version))?;
        Ok(())
    }

    /// Migrations to roll back from `current`, newest first, all with down files
    fn rollback_plan(&self, current: i64, limit: Option<u64>) -> Result<Vec<&'a Migration>, MigrationError> {
        if self.source.get(current).is_none() {
            return Err(MigrationError::MissingFile {
                version: current,
                direction: Direction::Down,
            });
        }

        let mut plan = self.source.applied_through(current);
        if let Some(limit) = limit {
            if (plan.len() as u64) < limit {
                return Err(MigrationError::NotEnoughMigrations {
                    requested: limit,
                    available: plan.len() as u64,
                });
            }
            plan.truncate(limit as usize);
        }

        if let Some(missing) = plan.iter().find(|m| m.down.is_none()) {
            return Err(MigrationError::MissingFile {
                version: missing.version,
                direction: Direction::Down,
            });
        }
        Ok(plan)
    }

    fn apply_up(&self, conn: &mut dyn Connection, migration: &Migration) -> Result<(), MigrationError> {
        self.apply(conn, migration, Direction::Up, Some(migration.version))
    }

    fn apply_down(&self, conn: &mut dyn Connection, migration: &Migration) -> Result<(), MigrationError> {
        let target = self.source.prev(migration.version);
        self.apply(conn, migration, Direction::Down, target)
    }

    fn apply(
        &self,
        conn: &mut dyn Connection,
        migration: &Migration,
        direction: Direction,
        target: Option<i64>,
    ) -> Result<(), MigrationError> {
        let file = migration.file_name(direction);
        let script = migration.read(direction)?;

        tracing::info!(version = migration.version, file = %file, %direction, "running migration");
        write_version(conn, SchemaVersion::dirty(migration.version))?;

        self.run_script(conn, &script)
            .map_err(|error| MigrationError::ExecutionFailed {
                version: migration.version,
                file: file.clone(),
                error,
            })?;

        write_version(conn, SchemaVersion::clean(target))?;
        tracing::debug!(version = migration.version, file = %file, "migration finished");
        Ok(())
    }

    /// Execute a script statement by statement
    ///
    /// Wrapped in one transaction unless the script manages its own
    /// transactions or contains statements that refuse to run inside one.
    fn run_script(&self, conn: &mut dyn Connection, script: &str) -> Result<(), DbError> {
        let statements = self.dialect.split_statements(script);
        let wrap = statements
            .iter()
            .all(|s| transaction_marker(s).is_none() && self.dialect.is_safe_in_txn(s));

        if !wrap {
            for stmt in &statements {
                conn.execute(stmt, &[])?;
            }
            return Ok(());
        }

        conn.begin()?;
        for stmt in &statements {
            if let Err(e) = conn.execute(stmt, &[]) {
                if let Err(rollback_err) = conn.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback of failed migration failed");
                }
                return Err(e);
            }
        }
        conn.commit()
    }
}

/// Current state, refusing to continue from a dirty database
fn clean_state(conn: &mut dyn Connection) -> Result<SchemaVersion, MigrationError> {
    let state = read_version(conn)?;
    if state.dirty {
        return Err(MigrationError::Dirty {
            version: state.number(),
        });
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DriverKind;
    use crate::executor::testing::RecordingConnection;
    use crate::validate::{PostgresDialect, SqliteDialect};
    use std::fs;

    fn source_with(files: &[(&str, &str)]) -> (tempfile::TempDir, MigrationSource) {
        let tmp = tempfile::tempdir().unwrap();
        for (name, body) in files {
            fs::write(tmp.path().join(name), body).unwrap();
        }
        let source = MigrationSource::load(tmp.path()).unwrap();
        (tmp, source)
    }

    #[test]
    fn test_up_wraps_script_in_transaction() {
        let (_tmp, source) = source_with(&[("000001_a.up.sql", "CREATE TABLE a (id int); CREATE TABLE b (id int);")]);
        let engine = Engine::new(&source, &SqliteDialect);
        let mut conn = RecordingConnection::new(DriverKind::Sqlite);

        assert_eq!(engine.up(&mut conn).unwrap(), Outcome::Applied);

        let journal = conn.journal.entries();
        assert_eq!(journal.first().map(String::as_str), Some("LOCK"));
        assert_eq!(journal.last().map(String::as_str), Some("UNLOCK"));
        let create_a = journal.iter().position(|s| s.starts_with("CREATE TABLE a")).unwrap();
        assert_eq!(journal[create_a - 1], "BEGIN");
        assert_eq!(journal[create_a + 2], "COMMIT");
    }

    #[test]
    fn test_concurrent_index_runs_outside_transaction() {
        let (_tmp, source) = source_with(&[("000001_idx.up.sql", "CREATE INDEX CONCURRENTLY i ON t (c);")]);
        let engine = Engine::new(&source, &PostgresDialect);
        let mut conn = RecordingConnection::new(DriverKind::Postgres);

        engine.up(&mut conn).unwrap();

        let journal = conn.journal.entries();
        let idx = journal.iter().position(|s| s.contains("CONCURRENTLY")).unwrap();
        assert_ne!(journal[idx - 1], "BEGIN");
    }

    #[test]
    fn test_failed_script_rolls_back_and_stops() {
        let (_tmp, source) = source_with(&[
            ("000001_a.up.sql", "CREATE TABLE a (id int);"),
            ("000002_b.up.sql", "CREATE TABLE broken (;"),
            ("000003_c.up.sql", "CREATE TABLE c (id int);"),
        ]);
        let engine = Engine::new(&source, &SqliteDialect);
        let mut conn = RecordingConnection::new(DriverKind::Sqlite).failing_on("broken");

        let err = engine.up(&mut conn).unwrap_err();
        assert!(matches!(err, MigrationError::ExecutionFailed { version: 2, .. }));

        let journal = conn.journal.entries();
        assert!(journal.iter().any(|s| s == "ROLLBACK"));
        assert!(!journal.iter().any(|s| s.starts_with("CREATE TABLE c")));
        assert_eq!(journal.last().map(String::as_str), Some("UNLOCK"));
    }

    #[test]
    fn test_steps_requires_enough_migrations() {
        let (_tmp, source) = source_with(&[("000001_a.up.sql", "SELECT 1;")]);
        let engine = Engine::new(&source, &SqliteDialect);
        let mut conn = RecordingConnection::new(DriverKind::Sqlite);

        let err = engine.steps(&mut conn, 2).unwrap_err();
        assert!(matches!(err, MigrationError::NotEnoughMigrations { requested: 2, available: 1 }));
        assert!(!conn.journal.entries().iter().any(|s| s.starts_with("SELECT 1")));

        let err = engine.steps(&mut conn, -1).unwrap_err();
        assert!(matches!(err, MigrationError::NotEnoughMigrations { available: 0, .. }));
    }

    #[test]
    fn test_nothing_pending_is_no_change() {
        let (_tmp, source) = source_with(&[]);
        let engine = Engine::new(&source, &SqliteDialect);
        let mut conn = RecordingConnection::new(DriverKind::Sqlite);
        assert_eq!(engine.up(&mut conn).unwrap(), Outcome::NoChange);
        assert_eq!(engine.down(&mut conn).unwrap(), Outcome::NoChange);
        assert_eq!(engine.steps(&mut conn, 0).unwrap(), Outcome::NoChange);
    }

    #[test]
    fn test_rollback_plan_requires_down_files() {
        let (_tmp, source) = source_with(&[
            ("000001_a.up.sql", "SELECT 1;"),
            ("000001_a.down.sql", "SELECT 1;"),
            ("000002_b.up.sql", "SELECT 1;"),
        ]);
        let engine = Engine::new(&source, &SqliteDialect);

        let err = engine.rollback_plan(2, None).unwrap_err();
        assert!(matches!(err, MigrationError::MissingFile { version: 2, direction: Direction::Down }));

        let plan = engine.rollback_plan(1, Some(1)).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(matches!(
            engine.rollback_plan(7, None),
            Err(MigrationError::MissingFile { version: 7, .. })
        ));
    }
}
