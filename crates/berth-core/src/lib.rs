//! berth-core
//!
//! Moves a database workload from a single-replica deployment with a hand-bound
//! volume to a statefulset with per-replica storage, without losing data.
//!
//! # Modules
//! - **domain**: topology, phases, attempts, artifacts, errors, events, reports
//! - **ports**: ClusterClient, AdminChannel, ArtifactStore, Clock, IdGenerator, EventSink
//! - **app**: inspector, backup agent, verifier, state machine, controller, builder
//! - **impls**: kubectl-backed adapters, in-memory simulation, local artifact store
//! - **config**: TOML configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
