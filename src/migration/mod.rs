//! Forward-only SQL schema migrations
//!
//! This module provides:
//! - [`MigrationSource`]: where units come from (a directory of
//!   `<version>_<name>.up.sql` files, or scripts embedded in the binary)
//! - [`VersionStore`]: bookkeeping of applied versions plus the cross-process
//!   lock, implemented for PostgreSQL by [`PgVersionStore`]
//! - [`Migrator`]: applies pending units in order, one transaction per unit,
//!   marking each version dirty until it completes
//!
//! # Example
//!
//! ```rust,no_run
//! use tidemark::migration::{DirectorySource, Migrator, PgVersionStore};
//! use tidemark::{connect, PgExecutor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = PgExecutor::new(connect("host=localhost user=postgres dbname=app")?);
//! let store = PgVersionStore::new(&executor)?;
//!
//! let applied = Migrator::new().up(&DirectorySource::new("migrations"), &store)?;
//! # let _ = applied;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod error;
pub mod file;
pub mod lock;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod migrator;
pub mod record;
pub mod source;
pub mod startup;
pub mod state_table;
pub mod statements;
pub mod status;
pub mod store;
pub mod unit;

/// Bookkeeping table used when none is configured
pub const DEFAULT_TABLE: &str = "schema_migrations";

pub use error::{LockError, MigrationError, SourceError, StoreError};
pub use file::{Direction, DirectorySource, MigrationFileName};
pub use lock::MigrationLockGuard;
#[cfg(any(test, feature = "test-helpers"))]
pub use memory::MemoryStore;
pub use migrator::{Migrator, Resolution, DEFAULT_LOCK_TIMEOUT};
pub use record::AppliedVersionRecord;
pub use source::{EmbeddedMigration, EmbeddedSource, MigrationSource};
pub use startup::{startup_migrations, startup_migrations_from};
pub use state_table::{PgVersionStore, TableName};
pub use status::{MigrationStatus, PendingMigration};
pub use store::{summarize, StoreSummary, VersionStore, LOCK_POLL_INTERVAL};
pub use unit::MigrationUnit;
