//! Tidemark Migration CLI Tool
//!
//! Command-line interface for applying Tidemark migrations, suitable for
//! deploy scripts and CI/CD pipelines.

pub mod cli;
pub mod commands;

use anyhow::Context;
use cli::{Cli, Commands};
use tidemark::migration::{DirectorySource, Migrator, PgVersionStore};
use tidemark::{connect, redact, PgExecutor};

/// Connect, then run the selected command
pub fn run(cli: &Cli) -> anyhow::Result<()> {
    let settings = cli.settings()?;
    let connection_string = settings.db.connection_string();

    log::debug!("Connecting to {}", redact(&connection_string));
    let client = connect(&connection_string)
        .with_context(|| format!("Error connecting to database {}", redact(&connection_string)))?;
    let executor = PgExecutor::new(client);
    executor.ping().context("Database did not answer SELECT 1")?;
    log::info!("Successfully connected to database");

    let store = PgVersionStore::with_table(&executor, &settings.migrate.table)?;
    let source = DirectorySource::new(&settings.migrate.dir);
    let migrator = Migrator::new().with_lock_timeout(settings.migrate.lock_timeout());

    match &cli.command {
        Commands::Up { steps, dry_run } => {
            commands::handle_up(&migrator, &source, &store, *steps, *dry_run)?;
        }
        Commands::Status => {
            commands::handle_status(&migrator, &source, &store)?;
        }
        Commands::Validate => {
            commands::handle_validate(&migrator, &source, &store)?;
        }
        Commands::Info { version } => {
            commands::handle_info(&migrator, &source, &store, *version)?;
        }
        command @ Commands::Resolve { .. } => {
            if let Some(resolution) = command.resolution() {
                commands::handle_resolve(&migrator, &source, &store, resolution)?;
            }
        }
    }
    Ok(())
}
