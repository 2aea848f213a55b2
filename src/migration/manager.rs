//! The migration manager: the guarded entry point for every operation
//!
//! The manager owns one database connection for its lifetime. Before any
//! script runs it checks the dirty flag, the committed history, version
//! ordering and (in strict mode) content hashes, and dry-runs every script
//! through the validator. Only then does the engine apply, under a bounded
//! retry. Afterwards it re-reads the version, refuses a dirty result and
//! appends to the audit history.

use crate::backend::{Backend, BackendRegistry};
use crate::connection::{dsn_database_name, validate_dsn};
use crate::executor::{Connection, DbError};
use crate::metrics::MigrationMetrics;
use crate::migration::checksum::calculate_checksum;
use crate::migration::engine::{Engine, Outcome};
use crate::migration::error::display_version;
use crate::migration::file::{Direction, Migration, MigrationSource};
use crate::migration::generate::{next_version, validate_name, write_migration_pair};
use crate::migration::history;
use crate::migration::record::{HistoryAction, HistoryEntry, NewHistoryEntry};
use crate::migration::retry::RetryPolicy;
use crate::migration::state_table::{ensure_tables, read_version, SchemaVersion};
use crate::migration::status::MigrationStatus;
use crate::migration::MigrationError;
use crate::notifier::{EventStatus, MigrationEvent, NoopNotifier, Notifier};
use crate::validate::{validate_sql, ValidateOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything needed to construct a [`Manager`]
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Registry key (`postgres`, `mysql`, `sqlite`)
    pub driver: String,
    pub dsn: String,
    pub migrations_dir: PathBuf,
    /// Extra attempts after the first failed engine call
    pub retries: u32,
    /// Recorded as `executed_by` in the history
    pub actor: String,
    /// Compare file hashes against committed `up` rows before applying
    pub strict_hash: bool,
    pub validate: ValidateOptions,
}

impl ManagerConfig {
    pub fn new(driver: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            dsn: dsn.into(),
            migrations_dir: PathBuf::from("migrations"),
            retries: 3,
            actor: String::new(),
            strict_hash: false,
            validate: ValidateOptions::default(),
        }
    }
}

/// Guarded migration operations over one database
pub struct Manager {
    conn: Option<Box<dyn Connection>>,
    backend: Backend,
    dsn: String,
    database: String,
    migrations_dir: PathBuf,
    actor: String,
    strict_hash: bool,
    validate_opts: ValidateOptions,
    retry: RetryPolicy,
    metrics: Option<Arc<MigrationMetrics>>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("backend", &self.backend)
            .field("database", &self.database)
            .field("migrations_dir", &self.migrations_dir)
            .field("actor", &self.actor)
            .field("strict_hash", &self.strict_hash)
            .field("open", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Look up the backend, connect and create the bookkeeping tables
    ///
    /// # Errors
    ///
    /// `UnknownDriver` when the driver is not registered, `Connect` when the
    /// DSN is malformed or the database refuses.
    pub fn new(registry: &BackendRegistry, config: ManagerConfig) -> Result<Self, MigrationError> {
        let backend = registry.get(&config.driver)?.clone();
        validate_dsn(backend.kind, &config.dsn)
            .map_err(|e| MigrationError::Connect(DbError::Connect(e.to_string())))?;

        let mut conn = backend.connect(&config.dsn).map_err(MigrationError::Connect)?;
        ensure_tables(conn.as_mut())?;

        let metrics = match MigrationMetrics::new() {
            Ok(m) => Some(Arc::new(m)),
            Err(e) => {
                tracing::warn!(error = %e, "migration metrics unavailable");
                None
            }
        };

        tracing::debug!(
            driver = %backend.name,
            dir = %config.migrations_dir.display(),
            strict_hash = config.strict_hash,
            "migration manager ready"
        );

        Ok(Self {
            conn: Some(conn),
            database: dsn_database_name(backend.kind, &config.dsn),
            backend,
            dsn: config.dsn,
            migrations_dir: config.migrations_dir,
            actor: config.actor,
            strict_hash: config.strict_hash,
            validate_opts: config.validate,
            retry: RetryPolicy::new(config.retries),
            metrics,
            notifier: Arc::new(NoopNotifier),
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MigrationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(&self) -> Option<&Arc<MigrationMetrics>> {
        self.metrics.as_ref()
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Apply every pending migration
    ///
    /// Nothing is executed unless every candidate passes the ordering,
    /// committed, hash and validation checks.
    pub fn up(&mut self) -> Result<(), MigrationError> {
        self.instrumented("up", Self::run_up)
    }

    /// Roll back every applied migration
    ///
    /// Refused while any history row is committed.
    pub fn down(&mut self) -> Result<(), MigrationError> {
        self.instrumented("down", Self::run_down)
    }

    /// Apply (`n > 0`) or roll back (`n < 0`) exactly `|n|` migrations
    pub fn steps(&mut self, n: i64) -> Result<(), MigrationError> {
        self.instrumented("steps", |mgr| mgr.run_steps(n))
    }

    /// Clear a dirty flag by stepping back exactly one version
    pub fn safe_force(&mut self, target: i64) -> Result<(), MigrationError> {
        self.instrumented("safe-force", |mgr| mgr.run_safe_force(target))
    }

    /// Freeze all history recorded so far
    ///
    /// Irreversible: committed versions can no longer be re-applied, rolled
    /// back or forced, and their hashes are enforced in strict mode.
    pub fn commit_all(&mut self) -> Result<u64, MigrationError> {
        let conn = self.conn.as_deref_mut().ok_or(MigrationError::Closed)?;
        let flipped = history::commit_all(conn)?;
        tracing::info!(actor = %self.actor, rows = flipped, "migration history committed");
        Ok(flipped)
    }

    /// Current version, dirty flag and pending files
    pub fn status(&mut self) -> Result<MigrationStatus, MigrationError> {
        let source = MigrationSource::load(&self.migrations_dir)?;
        let state = self.version()?;
        if state.dirty {
            tracing::warn!(
                version = state.number(),
                actor = %self.actor,
                "database is in dirty state"
            );
        }
        Ok(MigrationStatus::new(state, &source))
    }

    pub fn version(&mut self) -> Result<SchemaVersion, MigrationError> {
        let conn = self.conn.as_deref_mut().ok_or(MigrationError::Closed)?;
        Ok(read_version(conn)?)
    }

    /// Whether any history row for `version` is committed
    pub fn version_committed(&mut self, version: i64) -> Result<bool, MigrationError> {
        let conn = self.conn.as_deref_mut().ok_or(MigrationError::Closed)?;
        Ok(history::version_committed(conn, version)?)
    }

    /// All audit rows, oldest first
    pub fn history(&mut self) -> Result<Vec<HistoryEntry>, MigrationError> {
        let conn = self.conn.as_deref_mut().ok_or(MigrationError::Closed)?;
        Ok(history::entries(conn)?)
    }

    /// Scaffold the next migration pair and return its base name
    ///
    /// The version is one past the larger of the database version and the
    /// highest file on disk.
    pub fn create(&mut self, name: &str, author: &str) -> Result<String, MigrationError> {
        validate_name(name)?;
        if author.trim().is_empty() {
            return Err(MigrationError::MissingAuthor);
        }

        let source = MigrationSource::load(&self.migrations_dir)?;
        let current = self.version()?;
        let version = next_version(current.version, &source);
        if self.version_committed(version)? {
            return Err(MigrationError::Committed { version });
        }

        let base = write_migration_pair(&self.migrations_dir, version, name, author)?;
        tracing::info!(version, name, author, file = %base, "migration files created");
        Ok(base)
    }

    /// Release the connection
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub fn close(&mut self) -> Result<(), MigrationError> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(MigrationError::Database),
            None => Ok(()),
        }
    }

    /// Time, measure and report one operation
    fn instrumented<F>(&mut self, operation: &str, op: F) -> Result<(), MigrationError>
    where
        F: FnOnce(&mut Self) -> Result<(), MigrationError>,
    {
        tracing::info!(operation, actor = %self.actor, "migration operation started");
        let start = Instant::now();
        let result = op(self);
        let elapsed = start.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics.observe_duration(elapsed);
        }
        let version = self.version().ok().and_then(|s| s.version);
        self.notify(result.as_ref().err(), version, elapsed);

        match &result {
            Ok(()) => tracing::info!(
                operation,
                actor = %self.actor,
                version = %display_version(version),
                elapsed_ms = elapsed.as_millis() as u64,
                "migration operation succeeded"
            ),
            Err(e) => tracing::error!(
                operation,
                actor = %self.actor,
                error = %e,
                "migration operation failed"
            ),
        }
        result
    }

    fn notify(&self, error: Option<&MigrationError>, version: Option<i64>, elapsed: Duration) {
        let status = if error.is_some() {
            EventStatus::Fail
        } else {
            EventStatus::Success
        };
        let mut event = MigrationEvent::new(status, self.actor.clone(), self.database.clone())
            .with_duration(elapsed);
        if let Some(v) = version {
            event = event.with_version(v.to_string());
        }
        if let Some(e) = error {
            event = event.with_error(e);
        }
        if let Err(e) = self.notifier.notify(&event) {
            tracing::warn!(error = %e, "failed to deliver migration notification");
        }
    }

    fn run_up(&mut self) -> Result<(), MigrationError> {
        let source = MigrationSource::load(&self.migrations_dir)?;
        let conn = self.conn.as_deref_mut().ok_or(MigrationError::Closed)?;

        let before = read_version(conn)?;
        if before.dirty {
            return Err(MigrationError::Dirty {
                version: before.number(),
            });
        }

        let candidates = source.pending_after(before.version);
        if candidates.is_empty() {
            tracing::info!(actor = %self.actor, "no pending migrations to apply");
            return Ok(());
        }

        for migration in &candidates {
            if let Some(current) = before.version.filter(|c| migration.version <= *c) {
                return Err(MigrationError::VersionNotAhead {
                    version: migration.version,
                    file: migration.file_name(Direction::Up),
                    current,
                });
            }
        }

        // In strict mode content drift is reported ahead of the committed refusal
        if self.strict_hash {
            for migration in &candidates {
                check_committed_hash(conn, migration)?;
            }
        }

        for migration in &candidates {
            if history::version_committed(conn, migration.version)? {
                return Err(MigrationError::Committed {
                    version: migration.version,
                });
            }
        }

        for migration in &candidates {
            let file = migration.file_name(Direction::Up);
            tracing::debug!(actor = %self.actor, file = %file, "validating migration file");
            let script = migration.read(Direction::Up)?;
            validate_file(&self.backend, &self.dsn, &self.validate_opts, &file, &script)?;
        }

        let engine = Engine::new(&source, self.backend.dialect.as_ref());
        let result = self.retry.run("up", |_| engine.up(&mut *conn));
        let after = read_version(conn)?;

        // Versions that finished cleanly get an audit row even if a later one failed
        let recorded_through = if after.dirty {
            after.number() - 1
        } else {
            after.number()
        };
        record_applied(conn, &source, &self.actor, before.number(), recorded_through);

        if let Err(e) = result {
            tracing::error!(
                from = before.number(),
                to = after.number(),
                actor = %self.actor,
                error = %e,
                "Up migration failed"
            );
            return Err(e);
        }
        if after.dirty {
            return Err(MigrationError::LeftDirty {
                operation: "Up migration".to_string(),
                version: after.number(),
            });
        }

        let applied = after.number() - before.number();
        if applied > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_applied(applied.unsigned_abs());
            }
        }
        Ok(())
    }

    fn run_down(&mut self) -> Result<(), MigrationError> {
        let source = MigrationSource::load(&self.migrations_dir)?;
        let conn = self.conn.as_deref_mut().ok_or(MigrationError::Closed)?;

        let before = read_version(conn)?;
        if before.dirty {
            return Err(MigrationError::Dirty {
                version: before.number(),
            });
        }
        if history::any_committed(conn)? {
            return Err(MigrationError::Committed {
                version: before.number(),
            });
        }

        if let Some(current) = before.version {
            for migration in source.applied_through(current) {
                tracing::debug!(file = %migration.file_name(Direction::Down), "rolling back migration file");
            }
        }

        let engine = Engine::new(&source, self.backend.dialect.as_ref());
        let outcome = self.retry.run("down", |_| engine.down(&mut *conn));
        let after = read_version(conn)?;

        if let Err(e) = outcome {
            tracing::error!(actor = %self.actor, error = %e, "Down migration failed");
            return Err(e);
        }
        if after.dirty {
            return Err(MigrationError::LeftDirty {
                operation: "Down migration".to_string(),
                version: after.number(),
            });
        }

        if before.number() > after.number() {
            tracing::info!(
                from = before.number(),
                to = after.number(),
                actor = %self.actor,
                "migrations rolled back (Down)"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_rollback((before.number() - after.number()).unsigned_abs());
            }
            record_history(conn, NewHistoryEntry::new(HistoryAction::Down, after.number(), &self.actor));
        } else {
            tracing::info!(actor = %self.actor, "no migrations to roll back (Down)");
        }
        Ok(())
    }

    fn run_steps(&mut self, n: i64) -> Result<(), MigrationError> {
        let source = MigrationSource::load(&self.migrations_dir)?;
        let conn = self.conn.as_deref_mut().ok_or(MigrationError::Closed)?;

        let before = read_version(conn)?;
        if before.dirty {
            return Err(MigrationError::Dirty {
                version: before.number(),
            });
        }

        if n < 0 {
            if history::version_committed(conn, before.number())? {
                return Err(MigrationError::Committed {
                    version: before.number(),
                });
            }
            if let Some(migration) = before.version.and_then(|v| source.get(v)) {
                if migration.down.is_some() {
                    let file = migration.file_name(Direction::Down);
                    let script = migration.read(Direction::Down)?;
                    validate_file(&self.backend, &self.dsn, &self.validate_opts, &file, &script)?;
                }
            }
        }

        let engine = Engine::new(&source, self.backend.dialect.as_ref());
        let outcome = self.retry.run("steps", |_| engine.steps(&mut *conn, n));
        let after = read_version(conn)?;

        let outcome = outcome?;
        if after.dirty {
            return Err(MigrationError::LeftDirty {
                operation: format!("Steps({})", n),
                version: after.number(),
            });
        }

        let (from, to) = (before.number(), after.number());
        if outcome == Outcome::NoChange || from == to {
            tracing::info!(actor = %self.actor, "no effect from Steps migration");
        } else if to > from {
            tracing::info!(from, to, actor = %self.actor, "migrations applied {} steps", n);
            if let Some(metrics) = &self.metrics {
                metrics.record_applied((to - from).unsigned_abs());
            }
            record_applied(conn, &source, &self.actor, from, to);
        } else {
            tracing::info!(from, to, actor = %self.actor, "migrations rolled back {} steps", -n);
            if let Some(metrics) = &self.metrics {
                metrics.record_rollback((from - to).unsigned_abs());
            }
            record_history(conn, NewHistoryEntry::new(HistoryAction::Rollback, to, &self.actor));
        }
        Ok(())
    }

    fn run_safe_force(&mut self, target: i64) -> Result<(), MigrationError> {
        let source = MigrationSource::load(&self.migrations_dir)?;
        let conn = self.conn.as_deref_mut().ok_or(MigrationError::Closed)?;
        let current = read_version(conn)?;

        if history::version_committed(conn, target)? {
            return Err(MigrationError::Committed { version: target });
        }
        let last = source.last_up_version().unwrap_or(0);
        if target > last {
            return Err(MigrationError::TargetBeyondLastFile { target, last });
        }
        if !current.dirty {
            return Err(MigrationError::NotDirty {
                version: current.version,
            });
        }
        if target != current.number() - 1 {
            return Err(MigrationError::ForceWindow {
                current: current.number(),
                target,
            });
        }

        let engine = Engine::new(&source, self.backend.dialect.as_ref());
        engine.force(conn, (target > 0).then_some(target))?;

        tracing::warn!(
            from = current.number(),
            to = target,
            actor = %self.actor,
            "SAFE-FORCE executed, dirty cleared"
        );
        record_history(conn, NewHistoryEntry::new(HistoryAction::SafeForce, target, &self.actor));
        Ok(())
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close migration connection");
        }
    }
}

/// Dry-run one script through the backend's validator
fn validate_file(
    backend: &Backend,
    dsn: &str,
    opts: &ValidateOptions,
    file: &str,
    script: &str,
) -> Result<(), MigrationError> {
    validate_sql(script, dsn, opts, backend.dialect.as_ref(), backend.connector.as_ref()).map_err(|source| {
        tracing::error!(file, error = %source, "SQL validation failed");
        MigrationError::Validation {
            file: file.to_string(),
            source,
        }
    })
}

/// Refuse a file whose content changed since its version was committed
fn check_committed_hash(conn: &mut dyn Connection, migration: &Migration) -> Result<(), MigrationError> {
    let Some(path) = migration.path(Direction::Up) else {
        return Ok(());
    };
    let Some(recorded) = history::committed_up_hash(conn, migration.version)? else {
        return Ok(());
    };

    let current = calculate_checksum(path)?;
    if current != recorded {
        return Err(MigrationError::HashMismatch {
            version: migration.version,
            file: migration.file_name(Direction::Up),
            current,
            recorded,
        });
    }
    Ok(())
}

/// Append `up` rows with file hashes for versions in `(from, to]`
fn record_applied(conn: &mut dyn Connection, source: &MigrationSource, actor: &str, from: i64, to: i64) {
    for migration in source.iter().filter(|m| m.version > from && m.version <= to) {
        let Some(path) = migration.path(Direction::Up) else {
            continue;
        };
        let hash = calculate_checksum(path).unwrap_or_else(|e| {
            tracing::warn!(file = %path.display(), error = %e, "cannot compute hash");
            String::new()
        });
        let entry = NewHistoryEntry::new(HistoryAction::Up, migration.version, actor).with_hash(hash.clone());
        if record_history(conn, entry) {
            tracing::info!(
                version = migration.version,
                file = %migration.file_name(Direction::Up),
                actor,
                hash = %hash,
                "migration up applied and recorded"
            );
        }
    }
}

/// Append one audit row; a failure is logged and otherwise ignored
fn record_history(conn: &mut dyn Connection, entry: NewHistoryEntry) -> bool {
    match history::record(conn, &entry) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                action = %entry.action,
                version = entry.version,
                error = %e,
                "failed to record history"
            );
            false
        }
    }
}
