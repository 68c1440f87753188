//! Migration file discovery and parsing

use crate::migration::source::{order_units, MigrationSource};
use crate::migration::{MigrationUnit, SourceError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// `<version>_<name>.<up|down>.sql`
static FILENAME_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^(\d+)_(.+)\.(up|down)\.sql$"));

/// Direction encoded in a migration file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Version, name and direction parsed from a migration file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFileName {
    pub version: i64,
    pub name: String,
    pub direction: Direction,
}

impl MigrationFileName {
    /// Parse a migration file name
    ///
    /// Expected format: `<version>_<name>.up.sql` (or `.down.sql`), where the
    /// version is a possibly zero-padded integer.
    ///
    /// # Example
    /// - `000001_init_schema.up.sql` → version: 1, name: "init_schema", direction: Up
    /// - `20240120120000_add_streaks.down.sql` → version: 20240120120000, direction: Down
    pub fn parse(filename: &str) -> Result<Self, SourceError> {
        let re = FILENAME_PATTERN
            .as_ref()
            .map_err(|e| SourceError::InvalidFilename(format!("{filename} ({e})")))?;

        let caps = re
            .captures(filename)
            .ok_or_else(|| SourceError::InvalidFilename(filename.to_string()))?;

        // Digits only, so parsing fails only on overflow
        let version = caps[1]
            .parse::<i64>()
            .map_err(|_| SourceError::InvalidFilename(filename.to_string()))?;

        let direction = match &caps[3] {
            "up" => Direction::Up,
            _ => Direction::Down,
        };

        Ok(Self {
            version,
            name: caps[2].to_string(),
            direction,
        })
    }
}

/// Discovers migration units in a single directory
///
/// Only `*.up.sql` files become units. `*.down.sql` files are skipped since
/// migrations only move forward, files without a `.sql` extension and
/// subdirectories are ignored, and any other `.sql` file is an error.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
}

impl DirectorySource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MigrationSource for DirectorySource {
    fn load(&self) -> Result<Vec<MigrationUnit>, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::NotFound(self.path.clone()));
        }

        if !self.path.is_dir() {
            return Err(SourceError::NotADirectory(self.path.clone()));
        }

        let io_err = |source| SourceError::Io {
            path: self.path.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.path)
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        entries.sort_by_key(fs::DirEntry::file_name);

        let mut units = Vec::new();

        for entry in entries {
            let path = entry.path();
            let filename = entry.file_name().to_string_lossy().into_owned();

            if path.is_dir() {
                log::debug!("Skipping directory {}", path.display());
                continue;
            }

            if !filename.ends_with(".sql") {
                log::debug!("Skipping non-SQL file {}", path.display());
                continue;
            }

            let parsed = MigrationFileName::parse(&filename)?;

            if parsed.direction == Direction::Down {
                log::debug!("Skipping down migration {filename}");
                continue;
            }

            let sql = fs::read_to_string(&path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;

            let unit = MigrationUnit::new(parsed.version, parsed.name, sql);
            if unit.statements().is_empty() {
                log::warn!("Migration {filename} contains no statements");
            }
            units.push(unit);
        }

        order_units(units)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_parse_filename_up() {
        let parsed = MigrationFileName::parse("000001_init_schema.up.sql").unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.name, "init_schema");
        assert_eq!(parsed.direction, Direction::Up);
    }

    #[test]
    fn test_parse_filename_down_and_timestamp() {
        let parsed = MigrationFileName::parse("20240120120000_add.streaks.down.sql").unwrap();
        assert_eq!(parsed.version, 20240120120000);
        assert_eq!(parsed.name, "add.streaks");
        assert_eq!(parsed.direction, Direction::Down);
    }

    #[test]
    fn test_parse_filename_invalid() {
        for name in [
            "init_schema.up.sql",
            "0001-init.up.sql",
            "0001_init.sql",
            "0001_.up.sql",
            "v1_init.up.sql",
            "99999999999999999999_overflow.up.sql",
        ] {
            assert!(
                matches!(MigrationFileName::parse(name), Err(SourceError::InvalidFilename(_))),
                "should reject {name}"
            );
        }
    }

    #[test]
    fn test_load_sorts_numerically_and_skips_down_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "10_add_index.up.sql", "CREATE INDEX habits_name ON habits (name);");
        write(dir.path(), "2_add_column.up.sql", "ALTER TABLE habits ADD COLUMN name TEXT;");
        write(dir.path(), "2_add_column.down.sql", "ALTER TABLE habits DROP COLUMN name;");
        write(dir.path(), "1_create_table.up.sql", "CREATE TABLE habits (id BIGSERIAL PRIMARY KEY);");
        write(dir.path(), "README.md", "not a migration");
        fs::create_dir(dir.path().join("archive")).unwrap();

        let units = DirectorySource::new(dir.path()).load().unwrap();
        let versions: Vec<i64> = units.iter().map(MigrationUnit::version).collect();
        assert_eq!(versions, vec![1, 2, 10]);
        assert_eq!(units[1].name(), "add_column");
        assert_eq!(units[1].statements(), ["ALTER TABLE habits ADD COLUMN name TEXT"]);
    }

    #[test]
    fn test_load_rejects_duplicate_versions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "0001_create_users.up.sql", "CREATE TABLE users (id INT);");
        write(dir.path(), "1_create_accounts.up.sql", "CREATE TABLE accounts (id INT);");

        match DirectorySource::new(dir.path()).load() {
            Err(SourceError::DuplicateVersion { version, .. }) => assert_eq!(version, 1),
            other => panic!("expected duplicate version, got {other:?}"),
        }
    }

    #[test]
    fn test_load_rejects_unparseable_sql_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "0001_create_users.up.sql", "CREATE TABLE users (id INT);");
        write(dir.path(), "seed.sql", "INSERT INTO users VALUES (1);");

        let err = DirectorySource::new(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("seed.sql"));
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(matches!(
            DirectorySource::new(&missing).load(),
            Err(SourceError::NotFound(path)) if path == missing
        ));
    }

    #[test]
    fn test_load_path_is_a_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "000001_init_schema.up.sql", "SELECT 1;");
        let file = dir.path().join("000001_init_schema.up.sql");
        assert!(matches!(
            DirectorySource::new(&file).load(),
            Err(SourceError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_load_empty_directory_and_empty_file() {
        let dir = TempDir::new().unwrap();
        assert!(DirectorySource::new(dir.path()).load().unwrap().is_empty());

        write(dir.path(), "000001_placeholder.up.sql", "-- intentionally empty\n");
        let units = DirectorySource::new(dir.path()).load().unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].statements().is_empty());
    }
}
