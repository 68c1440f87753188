//! PostgreSQL version store backed by the `schema_migrations` table

use crate::migration::{
    AppliedVersionRecord, LockError, MigrationUnit, StoreError, VersionStore, DEFAULT_TABLE,
};
use crate::transaction::Transaction;
use crate::{DbError, Executor};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// `[schema.]identifier`, unquoted
static TABLE_NAME_PATTERN: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r"^(?:([A-Za-z_][A-Za-z0-9_]{0,62})\.)?([A-Za-z_][A-Za-z0-9_]{0,62})$")
});

/// A validated, optionally schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    table: String,
}

impl TableName {
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTableName` unless `name` is `[schema.]identifier`
    /// made of ASCII letters, digits and underscores.
    pub fn parse(name: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidTableName(name.to_string());
        let re = TABLE_NAME_PATTERN.as_ref().map_err(|_| invalid())?;
        let caps = re.captures(name).ok_or_else(invalid)?;

        Ok(Self {
            schema: caps.get(1).map(|m| m.as_str().to_string()),
            table: caps[2].to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Quoted form for use in SQL text
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{}\".\"{}\"", schema, self.table),
            None => format!("\"{}\"", self.table),
        }
    }

    /// Advisory lock key for `purpose` on this table
    ///
    /// First 8 bytes of the SHA-256 of `tidemark:<purpose>:<name>`, so every
    /// bookkeeping table gets its own lock.
    pub fn lock_key(&self, purpose: &str) -> i64 {
        let digest = Sha256::digest(format!("tidemark:{purpose}:{self}").as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// Version store kept in a PostgreSQL table
///
/// The table holds one row per attempted version:
///
/// ```sql
/// version           BIGINT PRIMARY KEY
/// dirty             BOOLEAN NOT NULL
/// name              TEXT
/// checksum          VARCHAR(64)
/// applied_at        TIMESTAMPTZ
/// execution_time_ms BIGINT
/// ```
///
/// An existing `(version, dirty)` table is adopted as-is; the metadata columns
/// are added on first use. The migration lock is a session-level advisory lock,
/// so it is released by PostgreSQL when the connection drops.
pub struct PgVersionStore<'a> {
    executor: &'a dyn Executor,
    table: TableName,
    quoted: String,
    lock_key: i64,
    init_key: i64,
}

impl<'a> PgVersionStore<'a> {
    /// Store using the default `schema_migrations` table
    pub fn new(executor: &'a dyn Executor) -> Result<Self, StoreError> {
        Self::with_table(executor, DEFAULT_TABLE)
    }

    /// Store using a custom, optionally schema-qualified table
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTableName` if `table` is not a plain identifier.
    pub fn with_table(executor: &'a dyn Executor, table: &str) -> Result<Self, StoreError> {
        let table = TableName::parse(table)?;
        Ok(Self {
            executor,
            quoted: table.quoted(),
            lock_key: table.lock_key("migrate"),
            init_key: table.lock_key("init"),
            table,
        })
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn executor(&self) -> &'a dyn Executor {
        self.executor
    }
}

impl VersionStore for PgVersionStore<'_> {
    fn ensure_initialized(&self) -> Result<(), StoreError> {
        let tx = Transaction::begin(self.executor).map_err(DbError::from)?;

        // Serializes concurrent first runs; released at commit
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&self.init_key])?;

        if let Some(schema) = self.table.schema() {
            tx.execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""), &[])?;
        }

        tx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} \
                 (version BIGINT NOT NULL PRIMARY KEY, dirty BOOLEAN NOT NULL)",
                self.quoted
            ),
            &[],
        )?;

        tx.execute(
            &format!(
                "ALTER TABLE {} \
                 ADD COLUMN IF NOT EXISTS name TEXT, \
                 ADD COLUMN IF NOT EXISTS checksum VARCHAR(64), \
                 ADD COLUMN IF NOT EXISTS applied_at TIMESTAMPTZ, \
                 ADD COLUMN IF NOT EXISTS execution_time_ms BIGINT",
                self.quoted
            ),
            &[],
        )?;

        tx.commit().map_err(DbError::from)?;
        log::debug!("Version table {} is ready", self.table);
        Ok(())
    }

    fn applied(&self) -> Result<Vec<AppliedVersionRecord>, StoreError> {
        let sql = format!(
            "SELECT version, dirty, name, checksum, applied_at, execution_time_ms \
             FROM {} ORDER BY version ASC",
            self.quoted
        );

        self.executor
            .query_all(&sql, &[])?
            .iter()
            .map(|row| AppliedVersionRecord::from_row(row).map_err(StoreError::Corrupted))
            .collect()
    }

    fn set_version(&self, version: i64, dirty: bool) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (version, dirty, applied_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (version) DO UPDATE \
             SET dirty = EXCLUDED.dirty, applied_at = EXCLUDED.applied_at",
            self.quoted
        );
        self.executor.execute(&sql, &[&version, &dirty])?;
        Ok(())
    }

    fn annotate(
        &self,
        version: i64,
        unit: &MigrationUnit,
        execution_time_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET name = $2, checksum = $3, execution_time_ms = $4 WHERE version = $1",
            self.quoted
        );
        let name = unit.name();
        let checksum = unit.checksum();
        self.executor
            .execute(&sql, &[&version, &name, &checksum, &execution_time_ms])?;
        Ok(())
    }

    fn apply(&self, unit: &MigrationUnit) -> Result<(), DbError> {
        let tx = Transaction::begin(self.executor)?;
        for statement in unit.statements() {
            tx.execute(statement, &[])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn clear_dirty(&self, version: i64, keep: bool) -> Result<(), StoreError> {
        let sql = if keep {
            format!("UPDATE {} SET dirty = FALSE WHERE version = $1 AND dirty", self.quoted)
        } else {
            format!("DELETE FROM {} WHERE version = $1 AND dirty", self.quoted)
        };

        match self.executor.execute(&sql, &[&version])? {
            1 => Ok(()),
            _ => Err(StoreError::Corrupted(format!(
                "version {version} is not marked dirty in {}",
                self.table
            ))),
        }
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        let row = self
            .executor
            .query_one("SELECT pg_try_advisory_lock($1)", &[&self.lock_key])?;
        row.try_get::<_, bool>(0)
            .map_err(|e| LockError::Database(DbError::ParseError(e.to_string())))
    }

    fn unlock(&self) -> Result<(), LockError> {
        let row = self
            .executor
            .query_one("SELECT pg_advisory_unlock($1)", &[&self.lock_key])?;
        let released = row
            .try_get::<_, bool>(0)
            .map_err(|e| LockError::Database(DbError::ParseError(e.to_string())))?;
        if !released {
            log::warn!("Migration lock on {} was not held by this session", self.table);
        }
        Ok(())
    }
}
