//! `MigrationUnit` - a single forward schema change

use crate::migration::checksum::calculate_checksum;
use crate::migration::statements::split_statements;

/// A versioned migration, immutable once discovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    version: i64,
    name: String,
    sql: String,
    statements: Vec<String>,
    checksum: String,
}

impl MigrationUnit {
    /// Build a unit from its version, label and script body
    pub fn new(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let statements = split_statements(&sql);
        let checksum = calculate_checksum(&sql);
        Self {
            version,
            name: name.into(),
            sql,
            statements,
            checksum,
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The script exactly as it was read
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Executable statements in script order
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// SHA-256 of the script body
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// `<version>_<name>` label used in logs
    pub fn label(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }
}
