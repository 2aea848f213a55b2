//! Scaffolding of new migration file pairs

use crate::migration::file::MigrationSource;
use crate::migration::MigrationError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Next free version: one past the larger of the database and on-disk maxima
pub fn next_version(db_version: Option<i64>, source: &MigrationSource) -> i64 {
    let on_disk = source.iter().map(|m| m.version).max().unwrap_or(0);
    db_version.unwrap_or(0).max(on_disk) + 1
}

/// Names become part of file names, so only `[A-Za-z0-9_-]` is allowed
pub fn validate_name(name: &str) -> Result<(), MigrationError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(MigrationError::InvalidName(name.to_string()))
    }
}

/// Comment header written at the top of both generated files
pub fn migration_header(author: &str, name: &str, version: i64) -> String {
    format!(
        "-- Author: {}\n-- Migration: {}\n-- Version: {:06}\n\n-- Write your SQL here\n",
        author, name, version
    )
}

/// Write `{version:06}_{name}.up.sql` and `.down.sql` into `dir`
///
/// Returns the shared base name. Existing files are never overwritten.
pub fn write_migration_pair(dir: &Path, version: i64, name: &str, author: &str) -> Result<String, MigrationError> {
    validate_name(name)?;
    if author.trim().is_empty() {
        return Err(MigrationError::MissingAuthor);
    }

    fs::create_dir_all(dir).map_err(|e| MigrationError::Io {
        path: dir.display().to_string(),
        error: e.to_string(),
    })?;

    let base = format!("{:06}_{}", version, name);
    let header = migration_header(author, name, version);
    for suffix in ["up", "down"] {
        let path = dir.join(format!("{}.{}.sql", base, suffix));
        let io_err = |e: std::io::Error| MigrationError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err)?;
        file.write_all(header.as_bytes()).map_err(io_err)?;
    }

    Ok(base)
}
