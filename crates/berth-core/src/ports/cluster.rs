//! ClusterClient port - the control plane.
//!
//! The cluster is treated as an opaque imperative API over two resource
//! classes: workloads and storage bindings. Reads return `Ok(None)` when an
//! object does not exist; "not found" is a normal answer, not an error.
//!
//! # Implementations
//! - `KubectlCluster`: drives the `kubectl` binary
//! - `InMemoryCluster`: simulated cluster for tests and rehearsals

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    ErrorKind, Instance, StorageBinding, StorageKind, Workload, WorkloadKind, WorkloadSpec,
};

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server could not be reached.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    /// Credentials or RBAC rejected the request.
    #[error("cluster rejected the request: {0}")]
    Forbidden(String),

    /// The client tool itself could not be started.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unexpected response from cluster: {0}")]
    Decode(String),
}

impl ClusterError {
    /// Operational class of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::Unavailable(_) | ClusterError::Command { .. } => {
                ErrorKind::TransientInfra
            }
            ClusterError::Forbidden(_) | ClusterError::Launch { .. } => {
                ErrorKind::ConfigurationError
            }
            ClusterError::Decode(_) => ErrorKind::Internal,
        }
    }
}

/// ClusterClient creates, inspects, scales and deletes workloads and storage.
///
/// Every call is a single synchronous step from the caller's point of view;
/// waiting for convergence is the caller's job (see `app::retry::poll_until`).
///
/// # Design principles
/// - The cluster is the only state: nothing here caches between calls
/// - Deletes are idempotent; deleting a missing object is `Ok(false)`
/// - Errors carry an `ErrorKind` so the state machine never inspects stderr
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// `Ok(None)` when no workload of that kind and name exists.
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<Option<Workload>, ClusterError>;

    /// Instances (pods) currently selected by the workload, terminating ones included.
    async fn list_instances(&self, workload: &Workload) -> Result<Vec<Instance>, ClusterError>;

    /// Create or update the managed workload together with its per-replica storage.
    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError>;

    /// Set the desired replica count. Returns once the change is accepted,
    /// not once instances have started or stopped.
    async fn scale_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        replicas: u32,
    ) -> Result<(), ClusterError>;

    /// Returns whether anything was deleted.
    async fn delete_workload(&self, kind: WorkloadKind, name: &str) -> Result<bool, ClusterError>;

    async fn get_storage(
        &self,
        kind: StorageKind,
        name: &str,
    ) -> Result<Option<StorageBinding>, ClusterError>;

    /// Returns whether anything was deleted.
    async fn delete_storage(&self, kind: StorageKind, name: &str) -> Result<bool, ClusterError>;
}
