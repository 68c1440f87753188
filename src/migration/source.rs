//! Migration sources
//!
//! A [`MigrationSource`] yields migration units ordered by version. The engine
//! only depends on this trait, so units can come from a directory on disk
//! ([`DirectorySource`](crate::migration::DirectorySource)), from scripts
//! compiled into the binary ([`EmbeddedSource`]) or from a plain `Vec`.

use crate::migration::{MigrationUnit, SourceError};

/// Anything that can produce the full, ordered list of migration units
pub trait MigrationSource {
    /// Load every unit, sorted strictly ascending by version
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if units cannot be read or parsed, or if two units
    /// share a version.
    fn load(&self) -> Result<Vec<MigrationUnit>, SourceError>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Sort units by version and reject duplicates
pub(crate) fn order_units(
    mut units: Vec<MigrationUnit>,
) -> Result<Vec<MigrationUnit>, SourceError> {
    units.sort_by_key(MigrationUnit::version);

    if let Some(pair) = units.windows(2).find(|pair| pair[0].version() == pair[1].version()) {
        return Err(SourceError::DuplicateVersion {
            version: pair[0].version(),
            first: pair[0].label(),
            second: pair[1].label(),
        });
    }

    Ok(units)
}

/// A migration script compiled into the binary
///
/// ```
/// use tidemark::migration::{EmbeddedMigration, EmbeddedSource, MigrationSource};
///
/// static MIGRATIONS: &[EmbeddedMigration] = &[
///     EmbeddedMigration::new(1, "create_users", "CREATE TABLE users (id BIGSERIAL PRIMARY KEY);"),
///     EmbeddedMigration::new(2, "add_email", "ALTER TABLE users ADD COLUMN email TEXT;"),
/// ];
///
/// let units = EmbeddedSource::new(MIGRATIONS).load().unwrap();
/// assert_eq!(units.len(), 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedMigration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

impl EmbeddedMigration {
    pub const fn new(version: i64, name: &'static str, sql: &'static str) -> Self {
        Self { version, name, sql }
    }
}

/// Source backed by a static slice of [`EmbeddedMigration`]s
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource {
    migrations: &'static [EmbeddedMigration],
}

impl EmbeddedSource {
    pub const fn new(migrations: &'static [EmbeddedMigration]) -> Self {
        Self { migrations }
    }
}

impl MigrationSource for EmbeddedSource {
    fn load(&self) -> Result<Vec<MigrationUnit>, SourceError> {
        let units = self
            .migrations
            .iter()
            .map(|m| MigrationUnit::new(m.version, m.name, m.sql))
            .collect();
        order_units(units)
    }

    fn describe(&self) -> String {
        format!("{} embedded migration(s)", self.migrations.len())
    }
}

impl MigrationSource for Vec<MigrationUnit> {
    fn load(&self) -> Result<Vec<MigrationUnit>, SourceError> {
        order_units(self.clone())
    }

    fn describe(&self) -> String {
        format!("{} in-memory migration(s)", self.len())
    }
}
