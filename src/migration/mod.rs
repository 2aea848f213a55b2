//! Versioned SQL migrations
//!
//! Migrations are pairs of plain SQL files named
//! `{version}_{name}.up.sql` / `{version}_{name}.down.sql`. The [`Manager`]
//! applies them through the [`engine`], records every state change in the
//! `migrations_history` audit table and refuses to touch versions that have
//! been committed.
//!
//! # Example
//!
//! ```rust,no_run
//! use harbormaster::backend::BackendRegistry;
//! use harbormaster::migration::{Manager, ManagerConfig};
//!
//! let registry = BackendRegistry::with_builtin();
//! let mut config = ManagerConfig::new("sqlite", "app.db");
//! config.actor = "alice".to_string();
//!
//! let mut manager = Manager::new(&registry, config)?;
//! manager.up()?;
//! println!("{}", manager.status()?);
//! manager.close()?;
//! # Ok::<(), harbormaster::migration::MigrationError>(())
//! ```

pub mod checksum;
pub mod engine;
pub mod error;
pub mod file;
pub mod generate;
pub mod history;
pub mod lock;
pub mod manager;
pub mod record;
pub mod retry;
pub mod state_table;
pub mod status;

pub use engine::{Engine, Outcome};
pub use error::MigrationError;
pub use file::{Direction, Migration, MigrationSource};
pub use manager::{Manager, ManagerConfig};
pub use record::{HistoryAction, HistoryEntry, NewHistoryEntry};
pub use retry::RetryPolicy;
pub use state_table::SchemaVersion;
pub use status::{MigrationStatus, PendingMigration};
