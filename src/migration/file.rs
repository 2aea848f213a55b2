//! Migration file discovery and parsing

use crate::migration::MigrationError;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Which script of a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

/// Both scripts of one version as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    /// Slug from the file name (`000003_add_users` → `add_users`)
    pub name: String,
    pub up: Option<PathBuf>,
    pub down: Option<PathBuf>,
}

impl Migration {
    pub fn path(&self, direction: Direction) -> Option<&Path> {
        match direction {
            Direction::Up => self.up.as_deref(),
            Direction::Down => self.down.as_deref(),
        }
    }

    /// File name of the given script, for messages
    pub fn file_name(&self, direction: Direction) -> String {
        self.path(direction)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{:06}_{}.{}.sql", self.version, self.name, direction))
    }

    /// Read the script for `direction`
    ///
    /// # Errors
    ///
    /// `MissingFile` when the script does not exist, `Io` when it cannot be read.
    pub fn read(&self, direction: Direction) -> Result<String, MigrationError> {
        let path = self.path(direction).ok_or(MigrationError::MissingFile {
            version: self.version,
            direction,
        })?;
        read_script(path)
    }
}

/// Read a migration script from disk
pub fn read_script(path: &Path) -> Result<String, MigrationError> {
    fs::read_to_string(path).map_err(|e| MigrationError::Io {
        path: path.display().to_string(),
        error: e.to_string(),
    })
}

/// Parse `{version}_{name}.{up|down}.sql`
///
/// Returns `None` for files that are not migration scripts.
///
/// # Example
/// - `000001_create_users.up.sql` → version: 1, name: "create_users", Up
pub fn parse_filename(pattern: &Regex, filename: &str) -> Result<Option<(i64, String, Direction)>, MigrationError> {
    let Some(caps) = pattern.captures(filename) else {
        return Ok(None);
    };

    let version_str = &caps[1];
    let version = version_str.parse::<i64>().map_err(|e| {
        MigrationError::InvalidFormat(format!("version '{}' in '{}' is not a valid number: {}", version_str, filename, e))
    })?;
    let direction = if &caps[3] == "up" { Direction::Up } else { Direction::Down };

    Ok(Some((version, caps[2].to_string(), direction)))
}

fn filename_pattern() -> Result<Regex, MigrationError> {
    Regex::new(r"^(\d+)_(.+)\.(up|down)\.sql$")
        .map_err(|e| MigrationError::InvalidFormat(format!("Invalid regex: {}", e)))
}

/// The set of migrations found in a directory, ordered by version
#[derive(Debug, Clone, Default)]
pub struct MigrationSource {
    dir: PathBuf,
    migrations: BTreeMap<i64, Migration>,
}

impl MigrationSource {
    /// Discover all migration files in `dir`
    ///
    /// A missing directory is an empty source. Files not matching the naming
    /// pattern are ignored.
    ///
    /// # Errors
    ///
    /// Returns errors if:
    /// - The path exists but is not a readable directory
    /// - A version number does not fit in an `i64`
    /// - Two files share a version for the same direction
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let dir = dir.as_ref().to_path_buf();
        let mut migrations: BTreeMap<i64, Migration> = BTreeMap::new();

        if !dir.exists() {
            return Ok(Self { dir, migrations });
        }
        if !dir.is_dir() {
            return Err(MigrationError::InvalidFormat(format!(
                "Path is not a directory: {}",
                dir.display()
            )));
        }

        let pattern = filename_pattern()?;
        let io_err = |e: std::io::Error| MigrationError::Io {
            path: dir.display().to_string(),
            error: e.to_string(),
        };

        for entry in fs::read_dir(&dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((version, name, direction)) = parse_filename(&pattern, filename)? else {
                continue;
            };

            let migration = migrations.entry(version).or_insert_with(|| Migration {
                version,
                name: name.clone(),
                up: None,
                down: None,
            });
            let slot = match direction {
                Direction::Up => &mut migration.up,
                Direction::Down => &mut migration.down,
            };
            if let Some(existing) = slot {
                return Err(MigrationError::DuplicateVersion {
                    version,
                    first: existing.display().to_string(),
                    second: path.display().to_string(),
                });
            }
            *slot = Some(path);
        }

        Ok(Self { dir, migrations })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.migrations.get(&version)
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// All migrations, ascending
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    /// Migrations with an up-script newer than `current` (all when nil), ascending
    pub fn pending_after(&self, current: Option<i64>) -> Vec<&Migration> {
        self.migrations
            .values()
            .filter(|m| m.up.is_some() && current.map_or(true, |c| m.version > c))
            .collect()
    }

    /// Migrations at or below `current`, newest first
    pub fn applied_through(&self, current: i64) -> Vec<&Migration> {
        self.migrations.range(..=current).rev().map(|(_, m)| m).collect()
    }

    /// Version immediately below `version`, if any
    pub fn prev(&self, version: i64) -> Option<i64> {
        self.migrations.range(..version).next_back().map(|(v, _)| *v)
    }

    /// Highest version with an up-script
    pub fn last_up_version(&self) -> Option<i64> {
        self.migrations
            .values()
            .rev()
            .find(|m| m.up.is_some())
            .map(|m| m.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "SELECT 1;").unwrap();
    }

    #[test]
    fn test_parse_filename() {
        let pattern = filename_pattern().unwrap();
        assert_eq!(
            parse_filename(&pattern, "000001_create_users.up.sql").unwrap(),
            Some((1, "create_users".to_string(), Direction::Up))
        );
        assert_eq!(
            parse_filename(&pattern, "42_x-y.down.sql").unwrap(),
            Some((42, "x-y".to_string(), Direction::Down))
        );
        assert_eq!(parse_filename(&pattern, "README.md").unwrap(), None);
        assert_eq!(parse_filename(&pattern, "000001_init.sql").unwrap(), None);
        assert!(parse_filename(&pattern, "99999999999999999999_big.up.sql").is_err());
    }

    #[test]
    fn test_load_pairs_and_orders() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "000002_b.up.sql");
        touch(tmp.path(), "000001_a.up.sql");
        touch(tmp.path(), "000001_a.down.sql");
        touch(tmp.path(), "000005_gap.up.sql");
        touch(tmp.path(), "notes.txt");

        let source = MigrationSource::load(tmp.path()).unwrap();
        let versions: Vec<i64> = source.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 5]);
        assert!(source.get(1).unwrap().down.is_some());
        assert!(source.get(2).unwrap().down.is_none());

        assert_eq!(source.pending_after(Some(1)).len(), 2);
        assert_eq!(source.pending_after(None).len(), 3);
        assert_eq!(source.prev(5), Some(2));
        assert_eq!(source.prev(1), None);
        assert_eq!(source.last_up_version(), Some(5));
        let through: Vec<i64> = source.applied_through(2).iter().map(|m| m.version).collect();
        assert_eq!(through, vec![2, 1]);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "000001_a.up.sql");
        touch(tmp.path(), "1_b.up.sql");

        let err = MigrationSource::load(tmp.path()).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 1, .. }));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let source = MigrationSource::load(tmp.path().join("nope")).unwrap();
        assert!(source.is_empty());
        assert_eq!(source.last_up_version(), None);
    }

    #[test]
    fn test_read_missing_script() {
        let m = Migration {
            version: 3,
            name: "x".into(),
            up: None,
            down: None,
        };
        assert!(matches!(
            m.read(Direction::Down),
            Err(MigrationError::MissingFile { version: 3, direction: Direction::Down })
        ));
        assert_eq!(m.file_name(Direction::Up), "000003_x.up.sql");
    }
}
