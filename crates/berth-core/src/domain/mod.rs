//! Domain model (topology, phases, attempts, artifacts, errors, reports).
//!
//! Nothing in here talks to a cluster or a database; these are the shapes the
//! ports exchange and the state machine reasons about.

pub mod artifact;
pub mod attempt;
pub mod errors;
pub mod events;
pub mod ids;
pub mod report;
pub mod resource;
pub mod state;
pub mod topology;

pub use self::artifact::BackupArtifact;
pub use self::attempt::{MigrationAttempt, PhaseTransition, TransitionError};
pub use self::errors::{ErrorKind, MigrationError, Warning};
pub use self::events::MigrationEvent;
pub use self::ids::{ArtifactId, AttemptId};
pub use self::report::{MigrationOutcome, MigrationReport};
pub use self::resource::{
    AccessMode, Instance, InstanceRef, StorageBinding, StorageKind, StorageTemplate, Workload,
    WorkloadKind, WorkloadSpec,
};
pub use self::state::MigrationPhase;
pub use self::topology::{Inspection, WorkloadTopology};
