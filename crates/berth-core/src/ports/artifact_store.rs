//! ArtifactStore port - where backup artifacts live.
//!
//! An artifact goes through three states: allocated (a path the dump streams
//! into), sealed (checksummed, safe to restore from) and discarded. Only
//! sealed artifacts are ever handed to `restore`.
//!
//! # Implementations
//! - `LocalArtifactStore`: a directory on the operator's machine

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ArtifactId, BackupArtifact};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {path}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// ArtifactStore allocates, seals, checks and discards backup files.
///
/// # Lifecycle
/// - `allocate`: reserve a path for a dump
/// - `seal`: checksum the written file and hand back the artifact
/// - `verify`: re-check before the artifact is consumed by a restore
/// - `discard`: remove once it is no longer needed
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn allocate(&self, id: ArtifactId) -> Result<PathBuf, ArtifactError>;

    async fn seal(
        &self,
        id: ArtifactId,
        path: &Path,
        source: &str,
    ) -> Result<BackupArtifact, ArtifactError>;

    async fn verify(&self, artifact: &BackupArtifact) -> Result<(), ArtifactError>;

    async fn discard(&self, artifact: &BackupArtifact) -> Result<(), ArtifactError>;

    /// Remove a partially written file that was never sealed.
    async fn abandon(&self, path: &Path) -> Result<(), ArtifactError>;

    /// Most recent artifact file, for recovery hints.
    async fn latest(&self) -> Result<Option<PathBuf>, ArtifactError>;
}
