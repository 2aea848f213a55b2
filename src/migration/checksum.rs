//! Checksum calculation for migration files

use crate::migration::file::read_script;
use crate::migration::MigrationError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// SHA-256 of a script's content, lowercase hex
pub fn content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Calculate SHA-256 checksum of a migration file
///
/// Used to detect that a file was edited after its version was committed.
///
/// # Errors
///
/// Returns `MigrationError::Io` if the file cannot be read
pub fn calculate_checksum(path: &Path) -> Result<String, MigrationError> {
    read_script(path).map(|content| content_checksum(&content))
}
