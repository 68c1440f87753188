//! Scoped migration lock

use crate::migration::{LockError, VersionStore};
use std::ops::Deref;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Lock guard that releases the migration lock when dropped
///
/// The engine takes the guard before it reads any state, so the lock is
/// released on success, on error and on panic alike. Dereferences to the
/// store it locks.
pub struct MigrationLockGuard<'a, S: VersionStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: VersionStore + ?Sized> MigrationLockGuard<'a, S> {
    /// Acquire the migration lock, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns `LockError::Timeout` if another process keeps the lock for the
    /// whole wait, or `LockError::Database` if the lock query itself fails.
    pub fn acquire(store: &'a S, timeout: Duration) -> Result<Self, LockError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_lock_span().entered();

        let start = Instant::now();
        store.lock(timeout)?;
        let waited = start.elapsed();

        #[cfg(feature = "metrics")]
        METRICS.record_lock_wait(waited);

        log::debug!("Acquired migration lock after {}ms", waited.as_millis());
        Ok(Self { store })
    }

    pub fn store(&self) -> &'a S {
        self.store
    }
}

impl<S: VersionStore + ?Sized> Deref for MigrationLockGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}

impl<S: VersionStore + ?Sized> Drop for MigrationLockGuard<'_, S> {
    fn drop(&mut self) {
        match self.store.unlock() {
            Ok(()) => log::debug!("Released migration lock"),
            // The lock also goes away with the session
            Err(e) => log::warn!("Failed to release migration lock: {e}"),
        }
    }
}
