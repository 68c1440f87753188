//! Migration-specific error types

use crate::DbError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to discover or parse migration units
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Migration directory not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Migration path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Migration file name '{0}' does not match the expected pattern <version>_<name>.up.sql"
    )]
    InvalidFilename(String),

    #[error("Migration version {version} is defined twice: '{first}' and '{second}'")]
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },
}

/// Failure to read or write the bookkeeping table
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version store query failed: {0}")]
    Database(#[from] DbError),

    #[error("Version store is corrupted: {0}")]
    Corrupted(String),

    #[error("Invalid bookkeeping table name '{0}': expected [schema.]identifier")]
    InvalidTableName(String),
}

/// Failure to take the cross-process migration lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "Failed to acquire the migration lock within {}s. Another process may be running \
         migrations; retry once it finishes.",
        .waited.as_secs()
    )]
    Timeout { waited: Duration },

    #[error("Migration lock query failed: {0}")]
    Database(#[from] DbError),
}

/// Every way a migration run can fail
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(
        "Database is dirty at version {version}: a previous migration did not complete.\n\
         Inspect the schema, fix it by hand, then clear the marker with \
         `resolve --applied` or `resolve --rolled-back`."
    )]
    Dirty { version: i64 },

    #[error("Migration {version} ({name}) failed: {cause}")]
    Apply {
        version: i64,
        name: String,
        #[source]
        cause: DbError,
    },

    #[error(
        "Migration '{name}' (version {version}) has been modified after being applied.\n\
         Stored checksum: {stored}\n\
         Current checksum: {current}"
    )]
    ChecksumMismatch {
        version: i64,
        name: String,
        stored: String,
        current: String,
    },

    #[error(
        "Applied migration {version} is missing from the migration source.\n\
         Suggestion: restore the {version}_*.up.sql file"
    )]
    MissingUnit { version: i64 },
}

impl MigrationError {
    /// Whether retrying the whole run later can succeed without operator action
    ///
    /// Only lock contention is transient. Everything else needs a fixed source,
    /// a repaired database or a cleared dirty marker first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationError::Lock(LockError::Timeout { .. }))
    }

    /// Version the error is about, when there is one
    pub fn version(&self) -> Option<i64> {
        match self {
            MigrationError::Dirty { version }
            | MigrationError::Apply { version, .. }
            | MigrationError::ChecksumMismatch { version, .. }
            | MigrationError::MissingUnit { version } => Some(*version),
            MigrationError::Source(SourceError::DuplicateVersion { version, .. }) => Some(*version),
            _ => None,
        }
    }
}
