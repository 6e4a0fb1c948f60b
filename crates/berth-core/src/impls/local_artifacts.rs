//! LocalArtifactStore - backup artifacts in a local directory.
//!
//! Files are named `<artifact id>.dump`. `latest` parses the id back out of
//! each file name and picks the largest, which is the newest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::domain::{ArtifactId, BackupArtifact};
use crate::ports::{ArtifactError, ArtifactStore, Clock};

const EXTENSION: &str = "dump";

pub struct LocalArtifactStore<C> {
    root: PathBuf,
    clock: C,
}

impl<C: Clock> LocalArtifactStore<C> {
    pub fn new(root: impl Into<PathBuf>, clock: C) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError {
    let path = path.to_path_buf();
    move |source| ArtifactError::Io { path, source }
}

/// Stream the file through SHA-256; returns (hex digest, size).
async fn digest_file(path: &Path) -> Result<(String, u64), ArtifactError> {
    let mut file = tokio::fs::File::open(path).await.map_err(io_error(path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await.map_err(io_error(path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

#[async_trait]
impl<C: Clock> ArtifactStore for LocalArtifactStore<C> {
    async fn allocate(&self, id: ArtifactId) -> Result<PathBuf, ArtifactError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(io_error(&self.root))?;
        Ok(self.root.join(format!("{id}.{EXTENSION}")))
    }

    async fn seal(
        &self,
        id: ArtifactId,
        path: &Path,
        source: &str,
    ) -> Result<BackupArtifact, ArtifactError> {
        let (sha256, size_bytes) = digest_file(path).await?;
        tracing::debug!(artifact = %id, size_bytes, sha256 = %sha256, "artifact sealed");
        Ok(BackupArtifact {
            id,
            location: path.to_path_buf(),
            sha256,
            size_bytes,
            created_at: self.clock.now(),
            source: source.to_string(),
        })
    }

    async fn verify(&self, artifact: &BackupArtifact) -> Result<(), ArtifactError> {
        let (actual, _) = digest_file(&artifact.location).await?;
        if actual != artifact.sha256 {
            return Err(ArtifactError::ChecksumMismatch {
                path: artifact.location.clone(),
                expected: artifact.sha256.clone(),
                actual,
            });
        }
        Ok(())
    }

    async fn discard(&self, artifact: &BackupArtifact) -> Result<(), ArtifactError> {
        self.abandon(&artifact.location).await
    }

    async fn abandon(&self, path: &Path) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path)(e)),
        }
    }

    async fn latest(&self) -> Result<Option<PathBuf>, ArtifactError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&self.root)(e)),
        };
        let mut newest: Option<(ArtifactId, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.root))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            // partial or foreign files never name a valid id
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ArtifactId>().ok())
            else {
                continue;
            };
            if newest.as_ref().is_none_or(|(current, _)| id > *current) {
                newest = Some((id, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}
