//! Checksum calculation for migration units

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of a migration body
///
/// Stored next to each applied version so later edits to an already applied
/// file can be detected by [`Migrator::validate`](crate::migration::Migrator::validate).
/// Returns 64 lowercase hex characters.
pub fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare a stored checksum with the current one
///
/// Comparison ignores ASCII case so checksums written by other tools in
/// uppercase hex still match.
pub fn checksums_match(stored: &str, current: &str) -> bool {
    stored.trim().eq_ignore_ascii_case(current.trim())
}
