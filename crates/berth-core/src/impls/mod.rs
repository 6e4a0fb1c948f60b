//! Impls - concrete adapters for the ports.
//!
//! # Contents
//! - **KubectlCluster** / **KubectlExecAdmin**: a real cluster through `kubectl`
//! - **InMemoryCluster** / **InMemoryAdmin**: simulated cluster for tests and `--simulate`
//! - **LocalArtifactStore**: backup files on the local filesystem

pub mod inmem_cluster;
pub mod kubectl;
pub mod kubectl_exec;
pub mod local_artifacts;

pub use self::inmem_cluster::{InMemoryAdmin, InMemoryCluster, Record, SimCall};
pub use self::kubectl::KubectlCluster;
pub use self::kubectl_exec::KubectlExecAdmin;
pub use self::local_artifacts::LocalArtifactStore;
