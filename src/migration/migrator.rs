//! Migrator - Core migration execution engine

use crate::migration::checksum::checksums_match;
use crate::migration::{
    summarize, MigrationError, MigrationLockGuard, MigrationSource, MigrationStatus,
    MigrationUnit, VersionStore,
};
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Default time to wait for another process to release the migration lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// How an operator repaired the schema after a failed migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The dirty unit's changes are fully in place; record it as applied
    Applied,
    /// The dirty unit's changes were undone; it will run again on the next `up`
    RolledBack,
}

/// Core migration execution engine
///
/// The `Migrator` holds no connection and no paths: every operation takes
/// the migration source and the version store as parameters.
///
/// ```rust,no_run
/// use tidemark::migration::{DirectorySource, Migrator, PgVersionStore};
/// use tidemark::{connect, PgExecutor};
/// use std::time::Duration;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let executor = PgExecutor::new(connect("postgresql://postgres@localhost/app")?);
///     let store = PgVersionStore::new(&executor)?;
///     let source = DirectorySource::new("./migrations");
///
///     let applied = Migrator::new()
///         .with_lock_timeout(Duration::from_secs(30))
///         .up(&source, &store)?;
///     println!("applied {applied} migration(s)");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migrator {
    lock_timeout: Duration,
}

impl Default for Migrator {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum wait for the migration lock; zero fails immediately when it is taken
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Apply every pending migration in ascending version order
    ///
    /// Returns the number of units applied; `0` when the database is already
    /// up to date.
    ///
    /// # Errors
    ///
    /// - `MigrationError::Lock` if the lock cannot be taken; nothing is touched.
    /// - `MigrationError::Dirty` if a previous run was interrupted.
    /// - `MigrationError::Apply` for the first unit that fails. Units before it
    ///   stay applied and the failed version stays dirty.
    /// - `MigrationError::Source` / `MigrationError::Store` for unreadable
    ///   units or bookkeeping.
    ///
    /// The lock is released on every path.
    pub fn up(
        &self,
        source: &dyn MigrationSource,
        store: &dyn VersionStore,
    ) -> Result<usize, MigrationError> {
        self.run_up(source, store, None)
    }

    /// Like [`Migrator::up`], applying at most `steps` pending units
    pub fn up_steps(
        &self,
        source: &dyn MigrationSource,
        store: &dyn VersionStore,
        steps: usize,
    ) -> Result<usize, MigrationError> {
        self.run_up(source, store, Some(steps))
    }

    fn run_up(
        &self,
        source: &dyn MigrationSource,
        store: &dyn VersionStore,
        steps: Option<usize>,
    ) -> Result<usize, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migrate_up_span(&source.describe()).entered();

        let guard = MigrationLockGuard::acquire(store, self.lock_timeout)?;

        guard.ensure_initialized()?;

        if let Some(version) = guard.dirty_version()? {
            log::error!("Refusing to migrate: version {version} is dirty");
            return Err(MigrationError::Dirty { version });
        }

        let units = source.load()?;
        let current = guard.current_version()?;
        let pending: Vec<&MigrationUnit> = pending_units(&units, current)
            .take(steps.unwrap_or(usize::MAX))
            .collect();

        if pending.is_empty() {
            log::info!("No pending migrations (current version: {})", display_version(current));
            return Ok(0);
        }

        log::info!(
            "Applying {} migration(s) from {} (current version: {})",
            pending.len(),
            source.describe(),
            display_version(current)
        );

        for unit in &pending {
            apply_unit(guard.store(), unit)?;
        }

        let applied = pending.len();
        log::info!(
            "Applied {applied} migration(s); now at version {}",
            pending.last().map_or(0, |u| u.version())
        );
        Ok(applied)
    }

    /// Pending units `up` would apply, without applying them
    ///
    /// # Errors
    ///
    /// `MigrationError::Dirty` when a previous run was interrupted, since `up`
    /// would refuse to run.
    pub fn plan(
        &self,
        source: &dyn MigrationSource,
        store: &dyn VersionStore,
    ) -> Result<Vec<MigrationUnit>, MigrationError> {
        store.ensure_initialized()?;

        if let Some(version) = store.dirty_version()? {
            return Err(MigrationError::Dirty { version });
        }

        let units = source.load()?;
        let current = store.current_version()?;
        Ok(pending_units(&units, current).cloned().collect())
    }

    /// Compare the source with the version table
    pub fn status(
        &self,
        source: &dyn MigrationSource,
        store: &dyn VersionStore,
    ) -> Result<MigrationStatus, MigrationError> {
        store.ensure_initialized()?;

        let units = source.load()?;
        let records = store.applied()?;
        let current = store.current_version()?;
        let dirty = store.dirty_version()?;

        let status = MigrationStatus::new(&units, records, current, dirty);
        for skipped in &status.skipped {
            log::warn!(
                "Migration {}_{} is below the current version {} and will never be applied",
                skipped.version,
                skipped.name,
                display_version(current)
            );
        }
        Ok(status)
    }

    /// Check every applied version against the source
    ///
    /// Returns the number of applied versions that were verified.
    ///
    /// # Errors
    ///
    /// - `MigrationError::MissingUnit` if an applied version has no unit.
    /// - `MigrationError::ChecksumMismatch` if a unit changed after it was
    ///   applied. Rows without a stored checksum are only checked for presence.
    pub fn validate(
        &self,
        source: &dyn MigrationSource,
        store: &dyn VersionStore,
    ) -> Result<usize, MigrationError> {
        store.ensure_initialized()?;

        let units = source.load()?;
        let records = store.applied()?;
        let mut verified = 0;

        for record in records.iter().filter(|r| !r.dirty) {
            let unit = units
                .binary_search_by_key(&record.version, MigrationUnit::version)
                .map(|idx| &units[idx])
                .map_err(|_| MigrationError::MissingUnit {
                    version: record.version,
                })?;

            if let Some(stored) = &record.checksum {
                if !checksums_match(stored, unit.checksum()) {
                    return Err(MigrationError::ChecksumMismatch {
                        version: record.version,
                        name: unit.name().to_string(),
                        stored: stored.clone(),
                        current: unit.checksum().to_string(),
                    });
                }
            }
            verified += 1;
        }

        log::info!("Validated {verified} applied migration(s)");
        Ok(verified)
    }

    /// Clear the dirty marker after the schema was repaired by hand
    ///
    /// Returns the resolved version, or `None` when nothing was dirty.
    ///
    /// A table that only ever held one watermark row (no name, no checksum)
    /// loses the record of every lower version when that row is removed. In
    /// that case rolling back records the highest source version below the
    /// dirty one as applied, so `up` resumes from the interrupted unit.
    pub fn resolve_dirty(
        &self,
        source: &dyn MigrationSource,
        store: &dyn VersionStore,
        resolution: Resolution,
    ) -> Result<Option<i64>, MigrationError> {
        let guard = MigrationLockGuard::acquire(store, self.lock_timeout)?;
        guard.ensure_initialized()?;

        let records = guard.applied()?;
        let Some(version) = summarize(&records)?.dirty else {
            log::info!("Nothing to resolve: no version is dirty");
            return Ok(None);
        };

        let lone_watermark = matches!(records.as_slice(), [record] if record.is_watermark());
        if resolution == Resolution::RolledBack && lone_watermark {
            let units = source.load()?;
            let previous = units
                .iter()
                .map(MigrationUnit::version)
                .filter(|&v| v < version)
                .last();
            if let Some(previous) = previous {
                guard.set_version(previous, false)?;
                log::warn!(
                    "Recorded version {previous} as applied below rolled back version {version}"
                );
            }
        }

        guard.clear_dirty(version, resolution == Resolution::Applied)?;
        match resolution {
            Resolution::Applied => log::warn!("Marked version {version} as applied"),
            Resolution::RolledBack => {
                log::warn!("Marked version {version} as rolled back; it will run again")
            }
        }
        Ok(Some(version))
    }
}

/// Units above `current`, in the order the source yields them
fn pending_units(
    units: &[MigrationUnit],
    current: Option<i64>,
) -> impl Iterator<Item = &MigrationUnit> {
    units
        .iter()
        .filter(move |u| current.map_or(true, |current| u.version() > current))
}

/// Mark dirty, run, mark clean
fn apply_unit(store: &dyn VersionStore, unit: &MigrationUnit) -> Result<(), MigrationError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::apply_migration_span(unit.version(), unit.name()).entered();

    log::info!("Applying migration {}", unit.label());
    let start = Instant::now();

    store.set_version(unit.version(), true)?;
    store.annotate(unit.version(), unit, None)?;

    if let Err(cause) = store.apply(unit) {
        log::error!("Migration {} failed: {cause}", unit.label());

        #[cfg(feature = "metrics")]
        METRICS.record_failure(unit.version());

        return Err(MigrationError::Apply {
            version: unit.version(),
            name: unit.name().to_string(),
            cause,
        });
    }

    let elapsed = start.elapsed();
    store.set_version(unit.version(), false)?;
    store.annotate(unit.version(), unit, Some(elapsed.as_millis() as i64))?;

    #[cfg(feature = "metrics")]
    METRICS.record_applied(unit.version(), elapsed);

    log::info!("Applied migration {} in {}ms", unit.label(), elapsed.as_millis());
    Ok(())
}

fn display_version(version: Option<i64>) -> String {
    version.map_or_else(|| "none".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{
        AppliedVersionRecord, LockError, MemoryStore, SourceError, StoreError,
    };
    use crate::DbError;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::thread;

    fn habits_units() -> Vec<MigrationUnit> {
        vec![
            MigrationUnit::new(1, "create_habits", "CREATE TABLE habits (id BIGSERIAL PRIMARY KEY);"),
            MigrationUnit::new(2, "add_name", "ALTER TABLE habits ADD COLUMN name TEXT;"),
            MigrationUnit::new(
                3,
                "create_checkins",
                "CREATE TABLE checkins (id BIGSERIAL PRIMARY KEY, habit_id BIGINT REFERENCES habits (id));\n\
                 CREATE INDEX checkins_habit ON checkins (habit_id);",
            ),
        ]
    }

    fn statements(units: &[MigrationUnit]) -> Vec<String> {
        units.iter().flat_map(|u| u.statements().to_vec()).collect()
    }

    fn fast() -> Migrator {
        Migrator::new().with_lock_timeout(Duration::ZERO)
    }

    #[test]
    fn test_up_applies_all_units_in_order() {
        let units = habits_units();
        let store = MemoryStore::new();

        let applied = fast().up(&units, &store).unwrap();

        assert_eq!(applied, 3);
        assert_eq!(store.current_version().unwrap(), Some(3));
        assert!(!store.is_dirty().unwrap());
        assert_eq!(store.executed(), statements(&units));
        assert!(!store.lock_held());

        let rows = store.applied().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].name.as_deref(), Some("add_name"));
        assert_eq!(rows[1].checksum.as_deref(), Some(units[1].checksum()));
        assert!(rows.iter().all(|r| r.execution_time_ms.is_some()));
    }

    #[test]
    fn test_second_up_is_a_no_op() {
        let units = habits_units();
        let store = MemoryStore::new();
        fast().up(&units, &store).unwrap();
        let rows_before = store.applied().unwrap();

        assert_eq!(fast().up(&units, &store).unwrap(), 0);
        assert_eq!(store.applied().unwrap(), rows_before);
        assert_eq!(store.executed().len(), statements(&units).len());
    }

    #[test]
    fn test_up_applies_only_newer_units() {
        let units = habits_units()[..2].to_vec();
        let store = MemoryStore::new();
        store.insert_row(AppliedVersionRecord::new(1, false));

        assert_eq!(fast().up(&units, &store).unwrap(), 1);
        assert_eq!(store.executed(), units[1].statements().to_vec());
        assert_eq!(store.current_version().unwrap(), Some(2));
    }

    #[test]
    fn test_failed_unit_leaves_store_dirty() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.fail_on(2);

        match fast().up(&units, &store) {
            Err(MigrationError::Apply { version, name, cause }) => {
                assert_eq!(version, 2);
                assert_eq!(name, "add_name");
                assert!(matches!(cause, DbError::QueryError(_)));
            }
            other => panic!("expected apply error, got {other:?}"),
        }

        assert_eq!(store.current_version().unwrap(), Some(1));
        assert!(store.is_dirty().unwrap());
        assert_eq!(store.dirty_version().unwrap(), Some(2));
        assert_eq!(store.executed(), units[0].statements().to_vec());
        assert!(!store.lock_held());
    }

    #[test]
    fn test_dirty_store_fails_fast() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.fail_on(2);
        let _ = fast().up(&units, &store);
        store.heal(2);
        let executed_before = store.executed();

        match fast().up(&units, &store) {
            Err(MigrationError::Dirty { version }) => assert_eq!(version, 2),
            other => panic!("expected dirty error, got {other:?}"),
        }
        assert_eq!(store.executed(), executed_before);
        assert!(!store.lock_held());
    }

    #[test]
    fn test_resolve_rolled_back_reruns_unit() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.fail_on(2);
        let _ = fast().up(&units, &store);
        store.heal(2);

        assert_eq!(fast().resolve_dirty(&units, &store, Resolution::RolledBack).unwrap(), Some(2));
        assert_eq!(store.current_version().unwrap(), Some(1));
        assert!(!store.is_dirty().unwrap());

        assert_eq!(fast().up(&units, &store).unwrap(), 2);
        assert_eq!(store.executed(), statements(&units));
    }

    #[test]
    fn test_resolve_applied_skips_unit() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.fail_on(2);
        let _ = fast().up(&units, &store);

        assert_eq!(fast().resolve_dirty(&units, &store, Resolution::Applied).unwrap(), Some(2));
        assert_eq!(store.current_version().unwrap(), Some(2));

        assert_eq!(fast().up(&units, &store).unwrap(), 1);
        assert_eq!(store.current_version().unwrap(), Some(3));
    }

    #[test]
    fn test_resolve_clean_store() {
        let units = habits_units();
        let store = MemoryStore::new();
        assert_eq!(fast().resolve_dirty(&units, &store, Resolution::Applied).unwrap(), None);
    }

    #[test]
    fn test_resolve_rolled_back_watermark_keeps_lower_versions() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.insert_row(AppliedVersionRecord::new(2, true));

        let status = fast().status(&units, &store).unwrap();
        assert_eq!(status.pending.iter().map(|m| m.version).collect::<Vec<_>>(), vec![2, 3]);

        assert_eq!(fast().resolve_dirty(&units, &store, Resolution::RolledBack).unwrap(), Some(2));
        assert_eq!(store.current_version().unwrap(), Some(1));
        assert!(!store.is_dirty().unwrap());

        assert_eq!(fast().up(&units, &store).unwrap(), 2);
        assert_eq!(store.executed(), statements(&units[1..]));
    }

    #[test]
    fn test_resolve_rolled_back_watermark_at_first_version() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.insert_row(AppliedVersionRecord::new(1, true));

        assert_eq!(fast().resolve_dirty(&units, &store, Resolution::RolledBack).unwrap(), Some(1));
        assert!(store.applied().unwrap().is_empty());
        assert_eq!(fast().up(&units, &store).unwrap(), 3);
    }

    #[test]
    fn test_up_steps_limits_units() {
        let units = habits_units();
        let store = MemoryStore::new();

        assert_eq!(fast().up_steps(&units, &store, 2).unwrap(), 2);
        assert_eq!(store.current_version().unwrap(), Some(2));
        assert_eq!(fast().up_steps(&units, &store, 0).unwrap(), 0);
        assert_eq!(fast().up_steps(&units, &store, 5).unwrap(), 1);
    }

    #[test]
    fn test_plan_does_not_apply() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.insert_row(AppliedVersionRecord::new(1, false));

        let plan = fast().plan(&units, &store).unwrap();
        assert_eq!(plan.iter().map(MigrationUnit::version).collect::<Vec<_>>(), vec![2, 3]);
        assert!(store.executed().is_empty());
        assert_eq!(store.current_version().unwrap(), Some(1));
    }

    #[test]
    fn test_status_reports_pending_and_skipped() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.insert_row(AppliedVersionRecord {
            name: Some(units[1].name().to_string()),
            checksum: Some(units[1].checksum().to_string()),
            ..AppliedVersionRecord::new(2, false)
        });

        let status = fast().status(&units, &store).unwrap();
        assert_eq!(status.current_version, Some(2));
        assert_eq!(status.skipped.iter().map(|m| m.version).collect::<Vec<_>>(), vec![1]);
        assert_eq!(status.next_pending_version(), Some(3));
        assert!(!status.is_up_to_date());
    }

    #[test]
    fn test_status_of_adopted_watermark() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.insert_row(AppliedVersionRecord::new(2, false));

        let status = fast().status(&units, &store).unwrap();
        assert_eq!(status.current_version, Some(2));
        assert!(status.skipped.is_empty());
        assert_eq!(status.next_pending_version(), Some(3));
    }

    #[test]
    fn test_validate_detects_modified_unit() {
        let store = MemoryStore::new();
        fast().up(&habits_units(), &store).unwrap();
        assert_eq!(fast().validate(&habits_units(), &store).unwrap(), 3);

        let mut edited = habits_units();
        edited[1] = MigrationUnit::new(2, "add_name", "ALTER TABLE habits ADD COLUMN name VARCHAR(80);");
        match fast().validate(&edited, &store) {
            Err(MigrationError::ChecksumMismatch { version, .. }) => assert_eq!(version, 2),
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_detects_missing_unit() {
        let store = MemoryStore::new();
        fast().up(&habits_units(), &store).unwrap();

        let truncated = habits_units()[..2].to_vec();
        match fast().validate(&truncated, &store) {
            Err(MigrationError::MissingUnit { version }) => assert_eq!(version, 3),
            other => panic!("expected missing unit, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_accepts_rows_without_checksum() {
        let store = MemoryStore::new();
        store.insert_row(AppliedVersionRecord::new(1, false));
        assert_eq!(fast().validate(&habits_units(), &store).unwrap(), 1);
    }

    #[test]
    fn test_lock_timeout_touches_nothing() {
        let units = habits_units();
        let store = MemoryStore::new();
        let other = store.session();
        assert!(other.try_lock().unwrap());

        let err = fast().up(&units, &store).unwrap_err();
        assert!(matches!(err, MigrationError::Lock(LockError::Timeout { .. })));
        assert!(err.is_retryable());
        assert!(!store.is_initialized());
        assert!(store.executed().is_empty());
    }

    #[test]
    fn test_source_error_releases_lock() {
        let units = vec![
            MigrationUnit::new(1, "create_habits", "SELECT 1;"),
            MigrationUnit::new(1, "create_users", "SELECT 1;"),
        ];
        let store = MemoryStore::new();

        let err = fast().up(&units, &store).unwrap_err();
        assert!(matches!(err, MigrationError::Source(SourceError::DuplicateVersion { .. })));
        assert!(!store.lock_held());
    }

    #[test]
    fn test_corrupted_store_is_reported() {
        let store = MemoryStore::new();
        store.insert_row(AppliedVersionRecord::new(1, true));
        store.insert_row(AppliedVersionRecord::new(2, true));

        let err = fast().up(&habits_units(), &store).unwrap_err();
        assert!(matches!(err, MigrationError::Store(StoreError::Corrupted(_))));
        assert!(!store.lock_held());
    }

    /// Delegates to a `MemoryStore` but panics while applying
    struct PanickingStore(MemoryStore);

    impl VersionStore for PanickingStore {
        fn ensure_initialized(&self) -> Result<(), StoreError> {
            self.0.ensure_initialized()
        }
        fn applied(&self) -> Result<Vec<AppliedVersionRecord>, StoreError> {
            self.0.applied()
        }
        fn set_version(&self, version: i64, dirty: bool) -> Result<(), StoreError> {
            self.0.set_version(version, dirty)
        }
        fn apply(&self, _unit: &MigrationUnit) -> Result<(), DbError> {
            panic!("connection handler crashed")
        }
        fn clear_dirty(&self, version: i64, keep: bool) -> Result<(), StoreError> {
            self.0.clear_dirty(version, keep)
        }
        fn try_lock(&self) -> Result<bool, LockError> {
            self.0.try_lock()
        }
        fn unlock(&self) -> Result<(), LockError> {
            self.0.unlock()
        }
    }

    #[test]
    fn test_panic_releases_lock() {
        let inner = MemoryStore::new();
        let store = PanickingStore(inner.clone());
        let units = habits_units();

        let result = catch_unwind(AssertUnwindSafe(|| fast().up(&units, &store)));
        assert!(result.is_err());
        assert!(!inner.lock_held());
        assert_eq!(inner.dirty_version().unwrap(), Some(1));
    }

    #[test]
    fn test_concurrent_runs_do_not_interleave() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.set_apply_delay(Duration::from_millis(50));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let session = store.session();
                let units = units.clone();
                thread::spawn(move || {
                    Migrator::new()
                        .with_lock_timeout(Duration::from_secs(10))
                        .up(&units, &session)
                })
            })
            .collect();

        let mut counts: Vec<usize> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        counts.sort_unstable();

        assert_eq!(counts, vec![0, 3]);
        assert_eq!(store.executed(), statements(&units));
        assert_eq!(store.current_version().unwrap(), Some(3));
    }

    #[test]
    fn test_concurrent_run_without_wait_fails_with_lock_error() {
        let units = habits_units();
        let store = MemoryStore::new();
        store.set_apply_delay(Duration::from_millis(200));

        let first = {
            let session = store.session();
            let units = units.clone();
            thread::spawn(move || fast().up(&units, &session))
        };

        // Wait until the first run holds the lock
        let start = Instant::now();
        while !store.lock_held() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }

        let second = fast().up(&units, &store.session());
        assert!(matches!(second, Err(MigrationError::Lock(LockError::Timeout { .. }))));
        assert_eq!(first.join().unwrap().unwrap(), 3);
        assert_eq!(store.executed(), statements(&units));
    }
}
