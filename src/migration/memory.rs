//! In-memory `VersionStore` for tests
//!
//! A [`MemoryStore`] models one database. Cloning it shares the database and
//! the session; [`MemoryStore::session`] opens another session on the same
//! database, which is what separate engine instances look like to the lock.

use crate::migration::{AppliedVersionRecord, LockError, MigrationUnit, StoreError, VersionStore};
use crate::DbError;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Database {
    initialized: bool,
    rows: BTreeMap<i64, AppliedVersionRecord>,
    lock_owner: Option<u64>,
    next_session: u64,
    executed: Vec<String>,
    failing: HashSet<i64>,
    apply_delay: Duration,
}

/// A thread-safe in-memory version store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    db: Arc<Mutex<Database>>,
    session: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A fresh, uninitialized database with one open session
    pub fn new() -> Self {
        let db = Database {
            next_session: 1,
            ..Database::default()
        };
        Self {
            db: Arc::new(Mutex::new(db)),
            session: 0,
        }
    }

    /// Open another session on the same database
    pub fn session(&self) -> Self {
        let mut db = self.db();
        let session = db.next_session;
        db.next_session += 1;
        Self {
            db: Arc::clone(&self.db),
            session,
        }
    }

    /// Make every later `apply` of `version` fail without side effects
    pub fn fail_on(&self, version: i64) {
        self.db().failing.insert(version);
    }

    /// Stop failing `version`
    pub fn heal(&self, version: i64) {
        self.db().failing.remove(&version);
    }

    /// Sleep this long inside every `apply`
    pub fn set_apply_delay(&self, delay: Duration) {
        self.db().apply_delay = delay;
    }

    /// Write a row directly, bypassing the engine
    pub fn insert_row(&self, record: AppliedVersionRecord) {
        let mut db = self.db();
        db.initialized = true;
        db.rows.insert(record.version, record);
    }

    /// Statements committed so far, in execution order
    pub fn executed(&self) -> Vec<String> {
        self.db().executed.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.db().initialized
    }

    /// Whether any session holds the lock
    pub fn lock_held(&self) -> bool {
        self.db().lock_owner.is_some()
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialized_db(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        let db = self.db();
        if !db.initialized {
            return Err(StoreError::Database(DbError::QueryError(
                "relation \"schema_migrations\" does not exist".to_string(),
            )));
        }
        Ok(db)
    }
}

impl VersionStore for MemoryStore {
    fn ensure_initialized(&self) -> Result<(), StoreError> {
        self.db().initialized = true;
        Ok(())
    }

    fn applied(&self) -> Result<Vec<AppliedVersionRecord>, StoreError> {
        Ok(self.initialized_db()?.rows.values().cloned().collect())
    }

    fn set_version(&self, version: i64, dirty: bool) -> Result<(), StoreError> {
        let mut db = self.initialized_db()?;
        let row = db
            .rows
            .entry(version)
            .or_insert_with(|| AppliedVersionRecord::new(version, dirty));
        row.dirty = dirty;
        row.applied_at = Some(Utc::now());
        Ok(())
    }

    fn annotate(
        &self,
        version: i64,
        unit: &MigrationUnit,
        execution_time_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut db = self.initialized_db()?;
        if let Some(row) = db.rows.get_mut(&version) {
            row.name = Some(unit.name().to_string());
            row.checksum = Some(unit.checksum().to_string());
            row.execution_time_ms = execution_time_ms;
        }
        Ok(())
    }

    fn apply(&self, unit: &MigrationUnit) -> Result<(), DbError> {
        let delay = {
            let db = self.db();
            if db.failing.contains(&unit.version()) {
                return Err(DbError::QueryError(format!(
                    "syntax error in migration {}",
                    unit.label()
                )));
            }
            db.apply_delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.db().executed.extend(unit.statements().iter().cloned());
        Ok(())
    }

    fn clear_dirty(&self, version: i64, keep: bool) -> Result<(), StoreError> {
        let mut db = self.initialized_db()?;
        match db.rows.get(&version) {
            Some(row) if row.dirty => {}
            _ => {
                return Err(StoreError::Corrupted(format!(
                    "version {version} is not marked dirty"
                )))
            }
        }

        if keep {
            if let Some(row) = db.rows.get_mut(&version) {
                row.dirty = false;
            }
        } else {
            db.rows.remove(&version);
        }
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        let mut db = self.db();
        match db.lock_owner {
            Some(owner) if owner != self.session => Ok(false),
            _ => {
                db.lock_owner = Some(self.session);
                Ok(true)
            }
        }
    }

    fn unlock(&self) -> Result<(), LockError> {
        let mut db = self.db();
        if db.lock_owner == Some(self.session) {
            db.lock_owner = None;
        }
        Ok(())
    }
}
