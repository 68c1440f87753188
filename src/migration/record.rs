//! `AppliedVersionRecord` - one row of the bookkeeping table

use chrono::{DateTime, Utc};

/// Represents a version row in the bookkeeping table
///
/// `dirty` rows mark a unit whose application started but never finished.
/// The metadata columns are optional: tables created by other tools only carry
/// `version` and `dirty`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedVersionRecord {
    pub version: i64,

    /// Whether the application of this version did not complete
    pub dirty: bool,

    pub name: Option<String>,

    /// `SHA-256` checksum of the applied script
    pub checksum: Option<String>,

    /// When the version was last marked (`None` if not recorded)
    pub applied_at: Option<DateTime<Utc>>,

    /// Execution time in milliseconds (`None` if not recorded)
    pub execution_time_ms: Option<i64>,
}

impl AppliedVersionRecord {
    /// Create a bare record with no metadata
    #[must_use]
    pub fn new(version: i64, dirty: bool) -> Self {
        Self {
            version,
            dirty,
            name: None,
            checksum: None,
            applied_at: None,
            execution_time_ms: None,
        }
    }

    /// Create an `AppliedVersionRecord` from a database row
    ///
    /// Expected column order: `version`, `dirty`, `name`, `checksum`, `applied_at`,
    /// `execution_time_ms`
    ///
    /// # Errors
    ///
    /// Returns a description of the first column that could not be decoded.
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, String> {
        fn column<'a, T: may_postgres::types::FromSql<'a>>(
            row: &'a may_postgres::Row,
            idx: usize,
            label: &str,
        ) -> Result<T, String> {
            row.try_get(idx)
                .map_err(|e| format!("column '{label}' could not be decoded: {e}"))
        }

        Ok(Self {
            version: column(row, 0, "version")?,
            dirty: column(row, 1, "dirty")?,
            name: column(row, 2, "name")?,
            checksum: column(row, 3, "checksum")?,
            applied_at: column(row, 4, "applied_at")?,
            execution_time_ms: column(row, 5, "execution_time_ms")?,
        })
    }

    /// Row with neither name nor checksum, as left by tools that track only
    /// the latest version
    ///
    /// Such a row stands for every lower version as well.
    pub fn is_watermark(&self) -> bool {
        self.name.is_none() && self.checksum.is_none()
    }

    /// Whether this row accounts for `version` having been applied
    ///
    /// A dirty watermark only covers the versions below it.
    pub fn covers(&self, version: i64) -> bool {
        if version == self.version {
            return !self.dirty;
        }
        self.is_watermark() && version < self.version
    }

    /// `<version>_<name>` when a name was recorded, the bare version otherwise
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{}_{}", self.version, name),
            None => self.version.to_string(),
        }
    }
}
