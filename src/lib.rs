//! # Harbormaster
//!
//! Versioned SQL migrations for PostgreSQL, MySQL and SQLite with dry-run
//! validation, a dirty-state guard and a tamper-resistant audit history.
//!
//! See the README for the command-line tool built on this crate.

pub mod backend;
pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod migration;
pub mod notifier;
pub mod validate;

pub use backend::{Backend, BackendRegistry, DriverKind};
pub use config::AppConfig;
pub use executor::{Connection, Connector, DbError};
pub use migration::{Manager, ManagerConfig, MigrationError};
