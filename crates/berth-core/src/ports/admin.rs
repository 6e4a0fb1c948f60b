//! AdminChannel port - administrative commands against a live database.
//!
//! Credentials never travel through this interface: implementations resolve
//! them at the instance (e.g. from a cluster secret mounted as environment).
//!
//! # Implementations
//! - `KubectlExecAdmin`: `kubectl exec` into the instance
//! - `InMemoryAdmin`: reads and writes the simulated volumes of `InMemoryCluster`

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ErrorKind, InstanceRef};

/// Classified failure of an admin command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    /// Instance not accepting connections. Retried with backoff.
    #[error("{instance} unreachable: {detail}")]
    Unreachable { instance: String, detail: String },

    /// Credentials rejected. Configuration problem, never retried.
    #[error("{instance} rejected credentials: {detail}")]
    AuthFailure { instance: String, detail: String },

    /// The command itself could not run: missing tool, bad template, no
    /// shell in the image. Same class as bad credentials.
    #[error("{instance} cannot run the admin command: {detail}")]
    Misconfigured { instance: String, detail: String },

    /// The database answered but the operation failed.
    #[error("{instance} data error: {detail}")]
    DataError { instance: String, detail: String },
}

impl AdminError {
    pub fn unreachable(instance: &InstanceRef, detail: impl Into<String>) -> Self {
        AdminError::Unreachable {
            instance: instance.to_string(),
            detail: detail.into(),
        }
    }

    pub fn auth_failure(instance: &InstanceRef, detail: impl Into<String>) -> Self {
        AdminError::AuthFailure {
            instance: instance.to_string(),
            detail: detail.into(),
        }
    }

    pub fn misconfigured(instance: &InstanceRef, detail: impl Into<String>) -> Self {
        AdminError::Misconfigured {
            instance: instance.to_string(),
            detail: detail.into(),
        }
    }

    pub fn data_error(instance: &InstanceRef, detail: impl Into<String>) -> Self {
        AdminError::DataError {
            instance: instance.to_string(),
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AdminError::Unreachable { .. } => ErrorKind::TransientInfra,
            AdminError::AuthFailure { .. } | AdminError::Misconfigured { .. } => {
                ErrorKind::ConfigurationError
            }
            AdminError::DataError { .. } => ErrorKind::DataIntegrityRisk,
        }
    }
}

/// AdminChannel issues ping/dump/restore to one database instance.
///
/// `dump` and `restore` must succeed as no-ops on an empty or freshly
/// created instance.
#[async_trait]
pub trait AdminChannel: Send + Sync {
    /// Cheapest round trip that proves the instance accepts authenticated
    /// commands.
    async fn ping(&self, instance: &InstanceRef) -> Result<(), AdminError>;

    /// Whether the instance holds no user data.
    async fn is_empty(&self, instance: &InstanceRef) -> Result<bool, AdminError>;

    /// Stream a full dump into `destination`; returns bytes written.
    async fn dump(&self, instance: &InstanceRef, destination: &Path) -> Result<u64, AdminError>;

    /// Load a dump previously produced by `dump`.
    async fn restore(&self, instance: &InstanceRef, source: &Path) -> Result<(), AdminError>;
}
