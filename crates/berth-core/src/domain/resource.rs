//! Cluster resource model: workloads, instances and storage bindings.
//!
//! These are the shapes the cluster boundary hands back and accepts. They
//! hold only what the migration needs to decide on, not full manifests.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The two workload classes the controller deals with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    /// Single replaceable instance; storage bound by hand (legacy).
    Deployment,
    /// Ordered replicas with one claim per replica (managed).
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub desired_replicas: u32,
    pub ready_replicas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Pod selector labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

impl Workload {
    /// All desired replicas report ready (and there is at least one).
    pub fn is_ready(&self) -> bool {
        self.desired_replicas > 0 && self.ready_replicas >= self.desired_replicas
    }

    pub fn is_stopped(&self) -> bool {
        self.desired_replicas == 0
    }
}

/// One running (or terminating) instance of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub ready: bool,
}

/// Access mode of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccessMode {
    #[default]
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ReadWriteOnce" => Some(AccessMode::ReadWriteOnce),
            "ReadOnlyMany" => Some(AccessMode::ReadOnlyMany),
            "ReadWriteMany" => Some(AccessMode::ReadWriteMany),
            "ReadWriteOncePod" => Some(AccessMode::ReadWriteOncePod),
            _ => None,
        }
    }
}

/// Which side of a storage binding an object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// The workload-facing claim (what a pod mounts).
    Claim,
    /// The durable volume backing a claim.
    Volume,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Claim => "pvc",
            StorageKind::Volume => "pv",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation between a workload instance and its durable storage.
///
/// For a claim, `bound_to` names the volume behind it; for a volume, it names
/// the claim currently holding it. At most one claim holds a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBinding {
    pub kind: StorageKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_to: Option<String>,
    /// Workload that owns the binding, when the cluster records one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Per-replica storage requested by a managed workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTemplate {
    /// Template name; replica claims are named `<template>-<workload>-<ordinal>`.
    pub name: String,
    pub capacity: String,
    pub access_mode: AccessMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    pub mount_path: String,
}

impl StorageTemplate {
    pub fn claim_name(&self, workload: &str, ordinal: u32) -> String {
        format!("{}-{}-{}", self.name, workload, ordinal)
    }
}

/// Desired state of the managed workload.
///
/// Credentials are never part of this: `secret_name` names a cluster secret
/// whose keys are injected into the container environment by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    /// Headless service giving each replica a stable DNS name.
    pub service_name: String,
    pub image: String,
    pub replicas: u32,
    pub container_name: String,
    pub container_port: u16,
    pub labels: BTreeMap<String, String>,
    pub storage: StorageTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

impl WorkloadSpec {
    pub fn instance_name(&self, ordinal: u32) -> String {
        format!("{}-{}", self.name, ordinal)
    }

    pub fn claim_names(&self) -> Vec<String> {
        (0..self.replicas)
            .map(|ordinal| self.storage.claim_name(&self.name, ordinal))
            .collect()
    }
}

/// Address of a live database instance for the admin channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceRef {
    pub workload: String,
    pub instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl InstanceRef {
    pub fn new(workload: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            instance: instance.into(),
            container: None,
        }
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workload, self.instance)
    }
}
