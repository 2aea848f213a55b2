//! Database backends and the registry that maps driver names to them.
//!
//! A [`Backend`] pairs a connection factory with the SQL dialect used to
//! validate scripts for that engine. The [`BackendRegistry`] is built once at
//! start-up and handed to [`crate::migration::Manager::new`] by reference.

use crate::executor::{Connection, Connector, DbError};
use crate::validate::{Dialect, MysqlDialect, PostgresDialect, SqliteDialect};
use sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SchemaStatementBuilder,
    SqliteQueryBuilder, Values,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Advisory lock key shared by every migrator instance
pub const ADVISORY_LOCK_KEY: i64 = 7_263_551_904_118_502_731;

/// SQL flavour spoken by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Postgres,
    Mysql,
    Sqlite,
}

impl DriverKind {
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::Postgres => "postgres",
            DriverKind::Mysql => "mysql",
            DriverKind::Sqlite => "sqlite",
        }
    }

    /// Render a query statement with this engine's placeholders and quoting
    pub fn build_query<S: QueryStatementWriter>(&self, stmt: &S) -> (String, Values) {
        match self {
            DriverKind::Postgres => stmt.build(PostgresQueryBuilder),
            DriverKind::Mysql => stmt.build(MysqlQueryBuilder),
            DriverKind::Sqlite => stmt.build(SqliteQueryBuilder),
        }
    }

    /// Render a schema statement (DDL) for this engine
    pub fn build_schema<S: SchemaStatementBuilder>(&self, stmt: &S) -> String {
        match self {
            DriverKind::Postgres => stmt.build(PostgresQueryBuilder),
            DriverKind::Mysql => stmt.build(MysqlQueryBuilder),
            DriverKind::Sqlite => stmt.build(SqliteQueryBuilder),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A registered engine: how to connect and how to validate SQL for it
#[derive(Clone)]
pub struct Backend {
    pub name: String,
    pub kind: DriverKind,
    pub connector: Arc<dyn Connector>,
    pub dialect: Arc<dyn Dialect>,
}

impl Backend {
    pub fn new(
        name: impl Into<String>,
        kind: DriverKind,
        connector: Arc<dyn Connector>,
        dialect: Arc<dyn Dialect>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            connector,
            dialect,
        }
    }

    /// Open a connection through this backend's factory
    pub fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError> {
        self.connector.connect(dsn)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

/// Driver name was not registered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported database driver '{driver}' (registered: {})", .registered.join(", "))]
pub struct UnknownDriver {
    pub driver: String,
    pub registered: Vec<String>,
}

/// Mapping from driver name to [`Backend`]
///
/// Write-once at start-up; lookups afterwards are read-only.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Backend>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every backend compiled into this build
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "postgres")]
        registry.register(Backend::new(
            "postgres",
            DriverKind::Postgres,
            Arc::new(postgres::PostgresConnector),
            Arc::new(PostgresDialect),
        ));

        #[cfg(feature = "mysql")]
        registry.register(Backend::new(
            "mysql",
            DriverKind::Mysql,
            Arc::new(mysql::MysqlConnector),
            Arc::new(MysqlDialect),
        ));

        #[cfg(feature = "sqlite")]
        registry.register(Backend::new(
            "sqlite",
            DriverKind::Sqlite,
            Arc::new(sqlite::SqliteConnector),
            Arc::new(SqliteDialect),
        ));

        registry
    }

    /// Register (or replace) a backend under its name
    pub fn register(&mut self, backend: Backend) {
        tracing::debug!(driver = %backend.name, "registered database backend");
        self.backends.insert(backend.name.clone(), backend);
    }

    /// Look up a backend by driver name
    ///
    /// # Errors
    ///
    /// Returns [`UnknownDriver`] when nothing is registered under `driver`.
    pub fn get(&self, driver: &str) -> Result<&Backend, UnknownDriver> {
        self.backends.get(driver).ok_or_else(|| UnknownDriver {
            driver: driver.to_string(),
            registered: self.names(),
        })
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Dialect for a driver kind, used when a backend is registered by hand
pub fn dialect_for(kind: DriverKind) -> Arc<dyn Dialect> {
    match kind {
        DriverKind::Postgres => Arc::new(PostgresDialect),
        DriverKind::Mysql => Arc::new(MysqlDialect),
        DriverKind::Sqlite => Arc::new(SqliteDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::RecordingConnection;

    fn fake_backend(name: &str) -> Backend {
        let connector = |_dsn: &str| -> Result<Box<dyn Connection>, DbError> {
            Ok(Box::new(RecordingConnection::new(DriverKind::Postgres)))
        };
        Backend::new(name, DriverKind::Postgres, Arc::new(connector), dialect_for(DriverKind::Postgres))
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = BackendRegistry::new();
        registry.register(fake_backend("fake"));

        let backend = registry.get("fake").unwrap();
        assert_eq!(backend.kind, DriverKind::Postgres);
        assert_eq!(backend.dialect.name(), "postgres");
        assert!(backend.connect("anything").is_ok());
    }

    #[test]
    fn test_unknown_driver_names_registered_drivers() {
        let mut registry = BackendRegistry::new();
        registry.register(fake_backend("fake"));

        let err = registry.get("oracle").unwrap_err();
        assert_eq!(err.driver, "oracle");
        assert!(err.to_string().contains("unsupported database driver 'oracle'"));
        assert!(err.to_string().contains("fake"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_builtin_registry_has_sqlite() {
        let registry = BackendRegistry::with_builtin();
        assert!(registry.names().contains(&"sqlite".to_string()));
        assert_eq!(registry.get("sqlite").unwrap().kind, DriverKind::Sqlite);
    }

    #[test]
    fn test_build_schema_per_engine() {
        use sea_query::{ColumnDef, Table};

        let stmt = Table::create()
            .table("t")
            .if_not_exists()
            .col(ColumnDef::new("id").big_integer().not_null().primary_key())
            .to_owned();

        assert!(DriverKind::Postgres.build_schema(&stmt).contains("\"t\""));
        assert!(DriverKind::Mysql.build_schema(&stmt).contains("`t`"));
        assert!(DriverKind::Sqlite.build_schema(&stmt).contains("IF NOT EXISTS"));
    }
}
