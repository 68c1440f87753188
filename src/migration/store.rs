//! The `VersionStore` trait - durable bookkeeping of migration progress

use crate::migration::{AppliedVersionRecord, LockError, MigrationUnit, StoreError};
use crate::DbError;
use std::time::{Duration, Instant};

/// Delay between two lock attempts
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bookkeeping of applied versions, kept inside the database being migrated
///
/// Every version has at most one row. A clean row means the version applied
/// completely; a dirty row means its application started and never finished.
/// The current version is the highest clean row.
///
/// Implementations must also be able to run a unit's statements atomically
/// and provide a lock that excludes other engine instances working on the
/// same database.
pub trait VersionStore {
    /// Create the bookkeeping table if it does not exist
    ///
    /// Must be safe when several processes call it at the same time.
    fn ensure_initialized(&self) -> Result<(), StoreError>;

    /// All version rows, ascending
    fn applied(&self) -> Result<Vec<AppliedVersionRecord>, StoreError>;

    /// Record `dirty` for `version`, inserting the row if needed
    fn set_version(&self, version: i64, dirty: bool) -> Result<(), StoreError>;

    /// Attach the unit's name, checksum and timing to its row
    ///
    /// Stores that do not keep metadata can ignore this.
    fn annotate(
        &self,
        _version: i64,
        _unit: &MigrationUnit,
        _execution_time_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    /// Run all statements of `unit` as one transaction
    ///
    /// Either every statement takes effect or none does.
    fn apply(&self, unit: &MigrationUnit) -> Result<(), DbError>;

    /// Clear the dirty marker of `version` after manual repair
    ///
    /// With `keep` the row becomes clean (the unit is considered applied);
    /// without it the row is removed (the unit is considered never applied).
    fn clear_dirty(&self, version: i64, keep: bool) -> Result<(), StoreError>;

    /// Try to take the migration lock without waiting
    fn try_lock(&self) -> Result<bool, LockError>;

    /// Release the migration lock
    fn unlock(&self) -> Result<(), LockError>;

    /// Take the migration lock, polling until `timeout` elapses
    ///
    /// A zero timeout makes a single attempt. The wait yields to other
    /// coroutines when called from inside the `may` runtime.
    fn lock(&self, timeout: Duration) -> Result<(), LockError> {
        let start = Instant::now();
        loop {
            if self.try_lock()? {
                return Ok(());
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout { waited: timeout });
            }

            log::debug!(
                "Migration lock is held elsewhere, waiting ({}ms so far)",
                waited.as_millis()
            );
            may::coroutine::sleep(LOCK_POLL_INTERVAL.min(timeout - waited));
        }
    }

    /// Highest cleanly applied version, `None` for an empty store
    fn current_version(&self) -> Result<Option<i64>, StoreError> {
        Ok(summarize(&self.applied()?)?.current)
    }

    /// Version left dirty by an interrupted run
    fn dirty_version(&self) -> Result<Option<i64>, StoreError> {
        Ok(summarize(&self.applied()?)?.dirty)
    }

    /// Whether the last recorded attempt did not complete
    fn is_dirty(&self) -> Result<bool, StoreError> {
        Ok(self.dirty_version()?.is_some())
    }
}

/// Current and dirty versions derived from the rows of a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub current: Option<i64>,
    pub dirty: Option<i64>,
}

/// Derive the store state from its rows, rejecting impossible states
///
/// A store is corrupted when more than one row is dirty, or when a dirty row
/// sits below a clean one (units only ever move forward).
pub fn summarize(records: &[AppliedVersionRecord]) -> Result<StoreSummary, StoreError> {
    let current = records.iter().filter(|r| !r.dirty).map(|r| r.version).max();

    let mut dirty = records.iter().filter(|r| r.dirty).map(|r| r.version);
    let first_dirty = dirty.next();
    if let Some(second) = dirty.next() {
        return Err(StoreError::Corrupted(format!(
            "versions {} and {} are both marked dirty",
            first_dirty.unwrap_or_default(),
            second
        )));
    }

    if let (Some(dirty), Some(current)) = (first_dirty, current) {
        if dirty < current {
            return Err(StoreError::Corrupted(format!(
                "dirty version {dirty} is below applied version {current}"
            )));
        }
    }

    Ok(StoreSummary {
        current,
        dirty: first_dirty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(i64, bool)]) -> Vec<AppliedVersionRecord> {
        pairs.iter()
            .map(|&(version, dirty)| AppliedVersionRecord::new(version, dirty))
            .collect()
    }

    #[test]
    fn test_summarize_empty() {
        assert_eq!(summarize(&[]).unwrap(), StoreSummary::default());
    }

    #[test]
    fn test_summarize_clean_and_dirty() {
        let summary = summarize(&rows(&[(1, false), (2, false), (3, true)])).unwrap();
        assert_eq!(summary.current, Some(2));
        assert_eq!(summary.dirty, Some(3));
    }

    #[test]
    fn test_summarize_single_row_table() {
        // A table holding only the latest version, as other tools keep it
        let summary = summarize(&rows(&[(20240101000000, false)])).unwrap();
        assert_eq!(summary.current, Some(20240101000000));
        assert_eq!(summary.dirty, None);

        let summary = summarize(&rows(&[(7, true)])).unwrap();
        assert_eq!(summary.current, None);
        assert_eq!(summary.dirty, Some(7));
    }

    #[test]
    fn test_summarize_rejects_two_dirty_rows() {
        let err = summarize(&rows(&[(1, true), (2, true)])).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted(_)));
    }

    #[test]
    fn test_summarize_rejects_dirty_below_current() {
        let err = summarize(&rows(&[(1, true), (2, false)])).unwrap_err();
        assert!(err.to_string().contains("below applied version 2"));
    }
}
