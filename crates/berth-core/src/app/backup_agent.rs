//! BackupAgent - dump and restore against a live instance.
//!
//! Unreachable instances are retried with backoff; anything else is handed
//! straight back to the caller, which decides whether it is fatal.
//!
//! An instance that stops answering between the emptiness check and the
//! dump is not reported as unreachable: it is known to hold data, so losing
//! it mid-backup is `SourceLost`, never something to skip past.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use super::retry::RetryPolicy;
use crate::domain::{BackupArtifact, ErrorKind, InstanceRef};
use crate::ports::{AdminChannel, AdminError, ArtifactError, ArtifactStore, IdGenerator};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Non-empty source that became unreachable before the dump finished.
    #[error("source holds data but the dump could not reach it: {0}")]
    SourceLost(AdminError),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Admin(e) => e.kind(),
            AgentError::Artifact(_) | AgentError::SourceLost(_) => ErrorKind::DataIntegrityRisk,
        }
    }

    /// The instance never answered, even after retries.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, AgentError::Admin(AdminError::Unreachable { .. }))
    }
}

pub struct BackupAgent {
    admin: Arc<dyn AdminChannel>,
    store: Arc<dyn ArtifactStore>,
    ids: Arc<dyn IdGenerator>,
    retry: RetryPolicy,
}

impl BackupAgent {
    pub fn new(
        admin: Arc<dyn AdminChannel>,
        store: Arc<dyn ArtifactStore>,
        ids: Arc<dyn IdGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            admin,
            store,
            ids,
            retry,
        }
    }

    /// Dump `instance` into a sealed artifact.
    ///
    /// Returns `Ok(None)` when the instance holds no user data.
    pub async fn backup(&self, instance: &InstanceRef) -> Result<Option<BackupArtifact>, AgentError> {
        let empty = self
            .with_retry("is_empty", instance, || self.admin.is_empty(instance))
            .await?;
        if empty {
            tracing::info!(%instance, "source holds no user data, nothing to back up");
            return Ok(None);
        }

        let id = self.ids.generate_artifact_id();
        let path = self.store.allocate(id).await?;
        let written = self
            .with_retry("dump", instance, || self.admin.dump(instance, &path))
            .await;
        if let Err(e) = written {
            if let Err(cleanup) = self.store.abandon(&path).await {
                tracing::warn!(error = %cleanup, "failed to remove partial dump");
            }
            return Err(match e {
                AdminError::Unreachable { .. } => AgentError::SourceLost(e),
                other => other.into(),
            });
        }

        let artifact = self.store.seal(id, &path, &instance.to_string()).await?;
        tracing::info!(
            artifact = %artifact.id,
            size_bytes = artifact.size_bytes,
            sha256 = artifact.short_checksum(),
            "backup complete"
        );
        Ok(Some(artifact))
    }

    /// Check the artifact's checksum, then load it into `instance`.
    pub async fn restore(
        &self,
        instance: &InstanceRef,
        artifact: &BackupArtifact,
    ) -> Result<(), AgentError> {
        self.store.verify(artifact).await?;
        self.with_retry("restore", instance, || {
            self.admin.restore(instance, &artifact.location)
        })
        .await?;
        tracing::info!(%instance, artifact = %artifact.id, "restore complete");
        Ok(())
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: &str,
        instance: &InstanceRef,
        mut call: F,
    ) -> Result<T, AdminError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdminError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.retry.allows_another(attempts) => {
                    let delay = self.retry.next_delay(attempts);
                    tracing::warn!(%instance, op, attempts, ?delay, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BerthConfig;
    use crate::impls::{InMemoryCluster, LocalArtifactStore};
    use crate::ports::{ClusterClient, SystemClock, UlidGenerator};
    use serde_json::json;
    use std::time::Duration;

    const LEGACY_POD: &str = "mongo-5d8c7b-0";

    fn retry() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_attempts: 3,
            max_delay: None,
        }
    }

    fn agent(cluster: &InMemoryCluster, dir: &std::path::Path) -> BackupAgent {
        BackupAgent::new(
            Arc::new(cluster.admin()),
            Arc::new(LocalArtifactStore::new(dir, SystemClock)),
            Arc::new(UlidGenerator::new(SystemClock)),
            retry(),
        )
    }

    fn legacy() -> InstanceRef {
        InstanceRef::new("mongo", LEGACY_POD)
    }

    #[tokio::test]
    async fn empty_source_yields_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster.seed_legacy("mongo", "mongo-pvc", "mongo-pv", vec![]).await;

        let artifact = agent(&cluster, dir.path()).backup(&legacy()).await.unwrap();
        assert!(artifact.is_none());
    }

    #[tokio::test]
    async fn backup_and_restore_carry_records() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster
            .seed_legacy("mongo", "mongo-pvc", "mongo-pv", vec![json!({"_id": 1}), json!({"_id": 2})])
            .await;
        cluster.apply_workload(&BerthConfig::default().managed_spec()).await.unwrap();
        let agent = agent(&cluster, dir.path());

        let artifact = agent.backup(&legacy()).await.unwrap().unwrap();
        assert!(artifact.size_bytes > 0);
        agent
            .restore(&InstanceRef::new("mongo", "mongo-0"), &artifact)
            .await
            .unwrap();

        assert_eq!(cluster.records_behind_claim("data-mongo-0").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transient_unreachability_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster
            .seed_legacy("mongo", "mongo-pvc", "mongo-pv", vec![json!({"_id": 1})])
            .await;
        cluster.fail_next_admin_calls(2).await;

        let artifact = agent(&cluster, dir.path()).backup(&legacy()).await.unwrap();
        assert!(artifact.is_some());
    }

    #[tokio::test]
    async fn unreachable_source_gives_up_after_bound() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster
            .seed_legacy("mongo", "mongo-pvc", "mongo-pv", vec![json!({"_id": 1})])
            .await;
        cluster
            .set_unreachable(crate::domain::WorkloadKind::Deployment, "mongo")
            .await;

        let err = agent(&cluster, dir.path()).backup(&legacy()).await.unwrap_err();
        assert!(err.is_unreachable());
        let empty_checks = cluster
            .journal()
            .await
            .into_iter()
            .filter(|c| matches!(c, crate::impls::SimCall::IsEmpty { .. }))
            .count();
        assert_eq!(empty_checks, 3);
    }

    #[tokio::test]
    async fn losing_a_non_empty_source_mid_dump_is_a_data_risk() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster
            .seed_legacy("mongo", "mongo-pvc", "mongo-pv", vec![json!({"_id": 1})])
            .await;
        cluster
            .fail_dump(AdminError::unreachable(&legacy(), "connection reset by peer"))
            .await;

        let err = agent(&cluster, dir.path()).backup(&legacy()).await.unwrap_err();
        assert!(matches!(err, AgentError::SourceLost(_)));
        assert!(!err.is_unreachable());
        assert_eq!(err.kind(), ErrorKind::DataIntegrityRisk);
    }

    #[tokio::test]
    async fn dump_failure_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster
            .seed_legacy("mongo", "mongo-pvc", "mongo-pv", vec![json!({"_id": 1})])
            .await;
        cluster
            .fail_dump(AdminError::data_error(&legacy(), "mongodump: cursor killed"))
            .await;

        let err = agent(&cluster, dir.path()).backup(&legacy()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrityRisk);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn tampered_artifact_is_not_restored() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster
            .seed_legacy("mongo", "mongo-pvc", "mongo-pv", vec![json!({"_id": 1})])
            .await;
        cluster.apply_workload(&BerthConfig::default().managed_spec()).await.unwrap();
        let agent = agent(&cluster, dir.path());

        let artifact = agent.backup(&legacy()).await.unwrap().unwrap();
        std::fs::write(&artifact.location, b"{\"_id\": 99}\n").unwrap();

        let err = agent
            .restore(&InstanceRef::new("mongo", "mongo-0"), &artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Artifact(ArtifactError::ChecksumMismatch { .. })));
        assert_eq!(cluster.records_behind_claim("data-mongo-0").await.unwrap().len(), 0);
    }
}
