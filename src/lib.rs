//! # Tidemark
//!
//! Forward-only SQL schema migrations for PostgreSQL on the `may` runtime.
//!
//! Migrations are plain `<version>_<name>.up.sql` files applied in version
//! order, each in its own transaction, under a PostgreSQL advisory lock so
//! that several instances of a service can start at once. See
//! [`migration`] for the engine and [`config`] for settings.

pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod migration;
pub mod transaction;

pub use connection::{connect, redact, validate_connection_string, ConnectionError};
pub use executor::{DbError, Executor, PgExecutor};
pub use migration::{MigrationError, Migrator};
pub use transaction::{Transaction, TransactionError};
