//! Backup artifact handle.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ArtifactId;

/// Opaque, checksummed snapshot produced by a successful backup.
///
/// Lifecycle: created while backing up, consumed once by the restore, then
/// either discarded or left in place for manual recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub id: ArtifactId,
    pub location: PathBuf,
    /// Hex-encoded SHA-256 of the file contents.
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Instance the dump was taken from.
    pub source: String,
}

impl BackupArtifact {
    pub fn short_checksum(&self) -> &str {
        &self.sha256[..self.sha256.len().min(12)]
    }
}
