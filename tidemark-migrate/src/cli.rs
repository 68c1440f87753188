//! Command-line arguments and settings resolution

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tidemark::config::Settings;
use tidemark::migration::Resolution;

#[derive(Parser, Debug)]
#[command(name = "tidemark-migrate")]
#[command(about = "Apply forward-only SQL migrations to PostgreSQL")]
#[command(version)]
pub struct Cli {
    /// Database connection URL (overrides DB_* settings)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Settings file (default: config/migrate.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Migrations directory path
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Bookkeeping table, optionally schema-qualified
    #[arg(long, global = true)]
    pub table: Option<String>,

    /// Seconds to wait for another process to release the migration lock
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Apply pending migrations
    Up {
        /// Number of migrations to apply (default: all pending)
        #[arg(long)]
        steps: Option<usize>,

        /// Dry run - show what would be executed without running
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status (applied vs pending)
    Status,

    /// Validate checksums of applied migrations
    Validate,

    /// Show detailed migration information
    Info {
        /// Show information for a specific migration version
        #[arg(long)]
        version: Option<i64>,
    },

    /// Clear the dirty marker after repairing a failed migration by hand
    #[command(group(ArgGroup::new("resolution").required(true).args(["applied", "rolled_back"])))]
    Resolve {
        /// The failed migration's changes are in place; record it as applied
        #[arg(long)]
        applied: bool,

        /// The failed migration's changes were undone; run it again next time
        #[arg(long)]
        rolled_back: bool,
    },
}

impl Commands {
    /// Resolution requested by `resolve`, `None` for other commands
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            Commands::Resolve { applied: true, .. } => Some(Resolution::Applied),
            Commands::Resolve { .. } => Some(Resolution::RolledBack),
            _ => None,
        }
    }
}

impl Cli {
    /// Default `env_logger` filter for the chosen verbosity
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Load settings from file and environment, then apply command-line overrides
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings = Settings::load(self.config.as_deref()).context("Failed to load settings")?;
        Ok(self.apply_overrides(settings, std::env::var("DATABASE_URL").ok()))
    }

    /// Command-line flags win over settings.
    ///
    /// The connection URL is taken from `--database-url`, then `db.url`
    /// (`DB_URL`), then `DATABASE_URL`; without any of them the `DB_*` parts
    /// are used.
    pub fn apply_overrides(
        &self,
        mut settings: Settings,
        database_url_env: Option<String>,
    ) -> Settings {
        let has_url = |url: &Option<String>| url.as_deref().is_some_and(|u| !u.trim().is_empty());

        if has_url(&self.database_url) {
            settings.db.url = self.database_url.clone();
        } else if !has_url(&settings.db.url) && has_url(&database_url_env) {
            settings.db.url = database_url_env;
        }

        if let Some(dir) = &self.migrations_dir {
            settings.migrate.dir = dir.clone();
        }
        if let Some(table) = &self.table {
            settings.migrate.table = table.clone();
        }
        if let Some(timeout) = self.lock_timeout {
            settings.migrate.timeout = timeout;
        }
        settings
    }
}
