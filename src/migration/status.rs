//! Migration status reporting

use crate::migration::{AppliedVersionRecord, MigrationUnit};

/// Snapshot of a database compared with a migration source
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Highest cleanly applied version
    pub current_version: Option<i64>,

    /// Version left dirty by an interrupted run
    pub dirty_version: Option<i64>,

    /// Clean rows from the version table, ascending
    pub applied: Vec<AppliedVersionRecord>,

    /// Units above the current version, in apply order
    pub pending: Vec<PendingMigration>,

    /// Units at or below the current version that were never recorded
    ///
    /// These were added after a later version had already been applied and
    /// will never run. Units below a watermark row are not reported.
    pub skipped: Vec<PendingMigration>,
}

/// A unit from the source that is not recorded as applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
}

impl From<&MigrationUnit> for PendingMigration {
    fn from(unit: &MigrationUnit) -> Self {
        Self {
            version: unit.version(),
            name: unit.name().to_string(),
            checksum: unit.checksum().to_string(),
        }
    }
}

impl MigrationStatus {
    /// Build a status from the source units and all version rows
    #[must_use]
    pub fn new(
        units: &[MigrationUnit],
        records: Vec<AppliedVersionRecord>,
        current_version: Option<i64>,
        dirty_version: Option<i64>,
    ) -> Self {
        let recorded = |version: i64| records.iter().any(|r| r.version == version);
        let covered = |version: i64| records.iter().any(|r| r.covers(version));

        let pending = units
            .iter()
            .filter(|u| current_version.map_or(true, |current| u.version() > current))
            .filter(|u| !covered(u.version()))
            .map(PendingMigration::from)
            .collect();

        let skipped = units
            .iter()
            .filter(|u| current_version.is_some_and(|current| u.version() <= current))
            .filter(|u| !recorded(u.version()) && !covered(u.version()))
            .map(PendingMigration::from)
            .collect();

        let applied = records.into_iter().filter(|r| !r.dirty).collect();

        Self {
            current_version,
            dirty_version,
            applied,
            pending,
            skipped,
        }
    }

    /// No pending units and no dirty marker
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && self.dirty_version.is_none()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_version.is_some()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Get the next pending migration version
    #[must_use]
    pub fn next_pending_version(&self) -> Option<i64> {
        self.pending.first().map(|m| m.version)
    }
}
