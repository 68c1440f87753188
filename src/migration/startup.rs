//! In-process migration execution helpers

use crate::config::MigrateConfig;
use crate::migration::{DirectorySource, MigrationError, MigrationSource, Migrator, PgVersionStore};
use crate::Executor;

/// Run migrations on application startup
///
/// Builds a [`DirectorySource`] over `config.dir` and a [`PgVersionStore`] on
/// `config.table`, verifies already-applied units against their files, then
/// applies everything pending. Meant to be called before the application
/// starts serving; an error should abort startup.
///
/// In multi-instance deployments the first instance applies the migrations
/// while the others wait on the lock (up to `config.timeout` seconds) and then
/// find nothing pending.
///
/// # Example
///
/// ```rust,no_run
/// use tidemark::config::Settings;
/// use tidemark::migration::startup_migrations;
/// use tidemark::{connect, PgExecutor};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = Settings::load(None)?;
///     let executor = PgExecutor::new(connect(&settings.db.connection_string())?);
///
///     startup_migrations(&executor, &settings.migrate)?;
///
///     // Continue with application startup...
///     Ok(())
/// }
/// ```
pub fn startup_migrations(
    executor: &dyn Executor,
    config: &MigrateConfig,
) -> Result<usize, MigrationError> {
    let source = DirectorySource::new(&config.dir);
    startup_migrations_from(executor, &source, config)
}

/// Like [`startup_migrations`], with units from any source
///
/// `config.dir` is ignored. Useful with an
/// [`EmbeddedSource`](crate::migration::EmbeddedSource) so the binary does not
/// need the migration files at runtime.
pub fn startup_migrations_from(
    executor: &dyn Executor,
    source: &dyn MigrationSource,
    config: &MigrateConfig,
) -> Result<usize, MigrationError> {
    let store = PgVersionStore::with_table(executor, &config.table)?;
    let migrator = Migrator::new().with_lock_timeout(config.lock_timeout());

    // Applied units must not have changed since deployment
    migrator.validate(source, &store)?;

    let applied = migrator.up(source, &store)?;
    if applied > 0 {
        log::info!("Applied {} migration(s) on startup", applied);
    } else {
        log::debug!("No pending migrations to apply");
    }
    Ok(applied)
}
