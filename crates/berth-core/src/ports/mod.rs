//! Ports - the seams to the outside world.
//!
//! Each trait hides one external collaborator: the cluster control plane,
//! the database's admin channel, artifact storage, time, IDs and progress
//! reporting. The state machine only ever sees these traits.

pub mod admin;
pub mod artifact_store;
pub mod clock;
pub mod cluster;
pub mod event_sink;
pub mod id_generator;

pub use self::admin::{AdminChannel, AdminError};
pub use self::artifact_store::{ArtifactError, ArtifactStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::cluster::{ClusterClient, ClusterError};
pub use self::event_sink::{EventSink, NoopEventSink, RecordingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
