//! Report model: the end result of a `migrate` invocation.
//!
//! This is what the CLI prints and what decides the exit code. It is
//! serializable so `--json` output is the same data as the text output.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::artifact::BackupArtifact;
use super::attempt::{MigrationAttempt, PhaseTransition};
use super::errors::{ErrorKind, MigrationError, Warning};
use super::ids::AttemptId;
use super::state::MigrationPhase;
use super::topology::WorkloadTopology;

/// Exit code for a configuration or usage error (also used by the CLI for
/// config-loading failures that never reach the controller).
pub const EXIT_CONFIGURATION: i32 = 3;

/// Overall result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationOutcome {
    Migrated,
    AlreadyMigrated,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub outcome: MigrationOutcome,
    pub topology_before: Option<WorkloadTopology>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<AttemptId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_phase: Option<MigrationPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MigrationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<PhaseTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<BackupArtifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    pub data_loss_risk: bool,
    /// The legacy workload was scaled back up after a pre-cutover failure.
    pub rolled_back: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guidance: Vec<String>,
}

impl MigrationReport {
    pub fn already_migrated(endpoints: Vec<String>, residue_guidance: Vec<String>) -> Self {
        Self {
            outcome: MigrationOutcome::AlreadyMigrated,
            topology_before: Some(WorkloadTopology::Managed),
            attempt_id: None,
            final_phase: None,
            error: None,
            warnings: Vec::new(),
            history: Vec::new(),
            artifact: None,
            endpoints,
            data_loss_risk: false,
            rolled_back: false,
            guidance: residue_guidance,
        }
    }

    /// A failure that happened before any attempt existed (e.g. the cluster
    /// could not be inspected).
    pub fn failed_before_attempt(error: MigrationError) -> Self {
        Self {
            outcome: MigrationOutcome::Failed,
            topology_before: None,
            attempt_id: None,
            final_phase: Some(MigrationPhase::Start),
            error: Some(error),
            warnings: Vec::new(),
            history: Vec::new(),
            artifact: None,
            endpoints: Vec::new(),
            data_loss_risk: false,
            rolled_back: false,
            guidance: Vec::new(),
        }
    }

    /// Build a report from a finished attempt.
    pub fn from_attempt(
        topology_before: WorkloadTopology,
        attempt: &MigrationAttempt,
        artifact: Option<BackupArtifact>,
        endpoints: Vec<String>,
    ) -> Self {
        let outcome = match attempt.phase() {
            MigrationPhase::Done => MigrationOutcome::Migrated,
            _ => MigrationOutcome::Failed,
        };
        Self {
            outcome,
            topology_before: Some(topology_before),
            attempt_id: Some(attempt.id),
            final_phase: Some(attempt.phase()),
            error: attempt.last_error().cloned(),
            warnings: attempt.warnings().to_vec(),
            history: attempt.history().to_vec(),
            artifact,
            endpoints,
            data_loss_risk: attempt.has_data_loss_risk(),
            rolled_back: false,
            guidance: Vec::new(),
        }
    }

    /// Phase the failure occurred in, if the run failed.
    pub fn failed_phase(&self) -> Option<MigrationPhase> {
        self.error.as_ref().map(|e| e.phase)
    }

    /// 0 done or already migrated; 1 failed with legacy intact; 2 failed
    /// after cutover; 3 configuration; 130 interrupted.
    pub fn exit_code(&self) -> i32 {
        match (&self.outcome, &self.error) {
            (MigrationOutcome::Migrated | MigrationOutcome::AlreadyMigrated, _) => 0,
            (MigrationOutcome::Failed, Some(err)) => match err.kind {
                ErrorKind::PostCutoverDegradation => 2,
                ErrorKind::ConfigurationError => EXIT_CONFIGURATION,
                ErrorKind::Interrupted => 130,
                ErrorKind::TransientInfra | ErrorKind::DataIntegrityRisk | ErrorKind::Internal => 1,
            },
            (MigrationOutcome::Failed, None) => 1,
        }
    }

    /// Human-readable summary for stdout.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        match self.outcome {
            MigrationOutcome::Migrated => {
                let _ = writeln!(out, "migration complete");
            }
            MigrationOutcome::AlreadyMigrated => {
                let _ = writeln!(out, "already migrated: managed topology is in place");
            }
            MigrationOutcome::Failed => {
                let phase = self
                    .failed_phase()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let _ = writeln!(out, "migration FAILED in phase {phase}");
                if let Some(err) = &self.error {
                    let _ = writeln!(out, "  cause: {}", err.message);
                    let _ = writeln!(out, "  kind:  {}", err.kind);
                }
                if self.rolled_back {
                    let _ = writeln!(out, "  legacy workload was scaled back up");
                }
            }
        }
        if let Some(id) = &self.attempt_id {
            let _ = writeln!(out, "attempt: {id}");
        }
        if self.outcome != MigrationOutcome::AlreadyMigrated {
            let _ = writeln!(
                out,
                "data loss risk: {}",
                if self.data_loss_risk { "YES" } else { "no" }
            );
        }
        for warning in &self.warnings {
            let marker = if warning.data_loss_risk { "!" } else { "-" };
            let _ = writeln!(out, "  {marker} warning [{}] {}", warning.phase, warning.message);
        }
        if let Some(artifact) = &self.artifact {
            let _ = writeln!(
                out,
                "backup: {} ({} bytes, sha256 {})",
                artifact.location.display(),
                artifact.size_bytes,
                artifact.short_checksum()
            );
        }
        if !self.endpoints.is_empty() {
            let _ = writeln!(out, "endpoints:");
            for endpoint in &self.endpoints {
                let _ = writeln!(out, "  {endpoint}");
            }
        }
        if !self.guidance.is_empty() {
            let _ = writeln!(out, "next steps:");
            for (i, step) in self.guidance.iter().enumerate() {
                let _ = writeln!(out, "  {}. {step}", i + 1);
            }
        }
        out
    }
}
