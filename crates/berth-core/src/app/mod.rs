//! App - the application layer.
//!
//! Combines the ports into the migration procedure.
//!
//! # Components
//! - **ControllerBuilder**: wiring and fail-fast validation
//! - **Controller**: `migrate`, `status`, `rollback_hint`
//! - **TopologyInspector**: read-only view of the current shape
//! - **BackupAgent**: dump and restore with bounded retries
//! - **Verifier**: liveness probe of the new instance
//! - **machine**: the phase-by-phase migration itself

pub mod backup_agent;
pub mod builder;
pub mod cancel;
pub mod controller;
pub mod hint;
pub mod inspector;
mod machine;
pub mod retry;
pub mod status;
pub mod verifier;

pub use self::backup_agent::{AgentError, BackupAgent};
pub use self::builder::{BuildError, ControllerBuilder};
pub use self::cancel::{cancel_pair, CancelHandle, CancelToken};
pub use self::controller::Controller;
pub use self::hint::RollbackHint;
pub use self::inspector::TopologyInspector;
pub use self::retry::{poll_until, PollError, RetryPolicy};
pub use self::status::StatusView;
pub use self::verifier::Verifier;
