//! Errors - migration failure taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::MigrationPhase;

/// Operational classification of a migration failure.
///
/// The kind decides whether the failure is retried, whether it aborts, and
/// what the operator is told about data safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instance or control plane temporarily unavailable.
    TransientInfra,
    /// Bad credentials, paths, names or permissions. Never retried.
    ConfigurationError,
    /// Backup failed on a non-empty source; aborted before cutover.
    DataIntegrityRisk,
    /// Restore or verification failed after the legacy instance was stopped.
    PostCutoverDegradation,
    /// Operator interrupt honoured before cutover.
    Interrupted,
    /// The controller broke one of its own invariants.
    Internal,
}

impl ErrorKind {
    /// Data may be lost unless the operator recovers by hand.
    pub fn is_data_loss_risk(self) -> bool {
        matches!(self, ErrorKind::PostCutoverDegradation)
    }

    /// Only transient failures get another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientInfra)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransientInfra => "transient-infra",
            ErrorKind::ConfigurationError => "configuration-error",
            ErrorKind::DataIntegrityRisk => "data-integrity-risk",
            ErrorKind::PostCutoverDegradation => "post-cutover-degradation",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal migration error: which phase, what kind, and why.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{phase} failed ({kind}): {message}")]
pub struct MigrationError {
    pub kind: ErrorKind,
    pub phase: MigrationPhase,
    pub message: String,
}

impl MigrationError {
    pub fn new(kind: ErrorKind, phase: MigrationPhase, message: impl Into<String>) -> Self {
        Self {
            kind,
            phase,
            message: message.into(),
        }
    }
}

/// A downgraded error: recorded and reported, but the attempt continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub phase: MigrationPhase,
    pub message: String,
    /// Whether the condition leaves data only recoverable by hand.
    pub data_loss_risk: bool,
}

impl Warning {
    pub fn new(phase: MigrationPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            data_loss_risk: false,
        }
    }

    pub fn risky(phase: MigrationPhase, message: impl Into<String>) -> Self {
        Self {
            data_loss_risk: true,
            ..Self::new(phase, message)
        }
    }
}
