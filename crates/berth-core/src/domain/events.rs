//! Events - what the controller reports while it runs.

use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, Warning};
use super::ids::AttemptId;
use super::state::MigrationPhase;
use super::topology::WorkloadTopology;

/// MigrationEvent is emitted to the `EventSink` as the run progresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    Inspected {
        topology: WorkloadTopology,
    },
    PhaseEntered {
        attempt_id: AttemptId,
        phase: MigrationPhase,
    },
    Warning(Warning),
    /// An interrupt arrived after cutover; the attempt keeps going.
    CancelDeferred {
        phase: MigrationPhase,
    },
    RolledBack {
        workload: String,
        replicas: u32,
    },
    Failed {
        phase: MigrationPhase,
        kind: ErrorKind,
        message: String,
    },
    Completed {
        endpoints: Vec<String>,
    },
    AlreadyMigrated,
}
