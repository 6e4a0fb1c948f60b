//! Migration attempt: the record of one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::errors::{MigrationError, Warning};
use super::ids::AttemptId;
use super::state::MigrationPhase;

/// Rejected phase change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal phase transition {from} -> {to}")]
pub struct TransitionError {
    pub from: MigrationPhase,
    pub to: MigrationPhase,
}

/// One entry of the phase history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: MigrationPhase,
    pub to: MigrationPhase,
    pub at: DateTime<Utc>,
}

/// One migration run. Lives for the duration of the process; never persisted.
///
/// Design: state changes only through methods, so the history and the
/// rollback flag cannot drift from the current phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationAttempt {
    pub id: AttemptId,
    pub started_at: DateTime<Utc>,
    phase: MigrationPhase,
    last_error: Option<MigrationError>,
    /// True until the legacy storage binding is released.
    rollback_eligible: bool,
    history: Vec<PhaseTransition>,
    warnings: Vec<Warning>,
}

impl MigrationAttempt {
    pub fn new(id: AttemptId, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            phase: MigrationPhase::Start,
            last_error: None,
            rollback_eligible: true,
            history: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&MigrationError> {
        self.last_error.as_ref()
    }

    pub fn is_rollback_eligible(&self) -> bool {
        self.rollback_eligible
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Whether the attempt ever entered `phase`.
    pub fn visited(&self, phase: MigrationPhase) -> bool {
        self.history.iter().any(|t| t.to == phase)
    }

    /// Move to the next phase along a legal edge.
    pub fn advance(&mut self, to: MigrationPhase, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.phase.can_transition_to(to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }
        self.history.push(PhaseTransition {
            from: self.phase,
            to,
            at,
        });
        self.phase = to;
        Ok(())
    }

    /// Terminate in `Failed`, keeping the error for the report.
    ///
    /// Once terminal, later failures are ignored; the first cause wins.
    pub fn fail(&mut self, error: MigrationError, at: DateTime<Utc>) {
        if self.phase.is_terminal() {
            return;
        }
        self.history.push(PhaseTransition {
            from: self.phase,
            to: MigrationPhase::Failed,
            at,
        });
        self.phase = MigrationPhase::Failed;
        self.last_error = Some(error);
    }

    pub fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// The legacy binding is about to be released; from here on there is no
    /// automatic way back.
    pub fn mark_cutover(&mut self) {
        self.rollback_eligible = false;
    }

    pub fn has_data_loss_risk(&self) -> bool {
        self.warnings.iter().any(|w| w.data_loss_risk)
            || self
                .last_error
                .as_ref()
                .is_some_and(|e| e.kind.is_data_loss_risk())
    }
}
