//! Workload topology: which deployment shape the database currently has.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::resource::{StorageBinding, Workload};

/// Deployment shape of the logical database.
///
/// Re-derived from the cluster on every run; never cached or persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadTopology {
    /// Single replaceable instance with an externally bound volume.
    Legacy,
    /// Self-provisioning workload, one volume per replica.
    Managed,
    /// No instance exists.
    Absent,
}

impl WorkloadTopology {
    /// Decision table:
    ///
    /// | managed | legacy | result  |
    /// |---------|--------|---------|
    /// | yes     | any    | Managed |
    /// | no      | yes    | Legacy  |
    /// | no      | no     | Absent  |
    pub fn derive(managed_exists: bool, legacy_exists: bool) -> Self {
        match (managed_exists, legacy_exists) {
            (true, _) => WorkloadTopology::Managed,
            (false, true) => WorkloadTopology::Legacy,
            (false, false) => WorkloadTopology::Absent,
        }
    }

    /// Whether `migrate` has anything to do.
    pub fn needs_migration(self) -> bool {
        !matches!(self, WorkloadTopology::Managed)
    }
}

impl fmt::Display for WorkloadTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadTopology::Legacy => "legacy",
            WorkloadTopology::Managed => "managed",
            WorkloadTopology::Absent => "absent",
        };
        f.write_str(s)
    }
}

/// Snapshot of everything the inspector observed in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    pub legacy: Option<Workload>,
    pub legacy_claim: Option<StorageBinding>,
    pub legacy_volume: Option<StorageBinding>,
    pub managed: Option<Workload>,
    /// Per-replica claims of the managed workload that currently exist.
    pub managed_claims: Vec<StorageBinding>,
}

impl Inspection {
    pub fn topology(&self) -> WorkloadTopology {
        WorkloadTopology::derive(self.managed.is_some(), self.legacy.is_some())
    }

    /// Legacy storage still present without a legacy workload to serve it.
    pub fn has_orphaned_legacy_storage(&self) -> bool {
        self.legacy.is_none() && (self.legacy_claim.is_some() || self.legacy_volume.is_some())
    }

    /// Legacy objects left behind next to a managed workload.
    pub fn has_legacy_residue(&self) -> bool {
        self.managed.is_some()
            && (self.legacy.is_some() || self.legacy_claim.is_some() || self.legacy_volume.is_some())
    }
}
