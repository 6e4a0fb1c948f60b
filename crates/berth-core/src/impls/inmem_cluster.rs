//! InMemoryCluster - simulated cluster and database.
//!
//! Database records live on simulated volumes, so data only survives a
//! migration if it really travels through dump and restore: deleting a
//! claim's volume loses its records, and a freshly provisioned replica starts
//! empty. `InMemoryAdmin` reads and writes the same volumes.
//!
//! Every call is journaled in order, and faults can be injected per workload
//! or per admin operation. Used by the integration tests and by
//! `berth --simulate`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    Instance, InstanceRef, StorageBinding, StorageKind, Workload, WorkloadKind, WorkloadSpec,
};
use crate::ports::{AdminChannel, AdminError, ClusterClient, ClusterError};

/// A database document.
pub type Record = serde_json::Value;

// Stand-in for the replica-set hash in deployment pod names.
const POD_HASH: &str = "5d8c7b";

/// One journaled call against the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    GetWorkload { kind: WorkloadKind, name: String },
    ListInstances { name: String },
    ApplyWorkload { name: String },
    ScaleWorkload { kind: WorkloadKind, name: String, replicas: u32 },
    DeleteWorkload { kind: WorkloadKind, name: String },
    GetStorage { kind: StorageKind, name: String },
    DeleteStorage { kind: StorageKind, name: String },
    Ping { instance: String },
    IsEmpty { instance: String },
    Dump { instance: String },
    Restore { instance: String },
}

impl SimCall {
    /// Changes cluster or database state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            SimCall::ApplyWorkload { .. }
                | SimCall::ScaleWorkload { .. }
                | SimCall::DeleteWorkload { .. }
                | SimCall::DeleteStorage { .. }
                | SimCall::Restore { .. }
        )
    }
}

struct SimWorkload {
    workload: Workload,
    /// Claim mounted by each ordinal; a deployment shares its single claim.
    claims: Vec<String>,
    instances: Vec<Instance>,
}

struct SimVolume {
    binding: StorageBinding,
    records: Vec<Record>,
}

#[derive(Default)]
struct SimFaults {
    never_ready: BTreeSet<(WorkloadKind, String)>,
    linger_on_scale_down: BTreeSet<(WorkloadKind, String)>,
    unreachable: BTreeSet<(WorkloadKind, String)>,
    failing_admin_calls: u32,
    ping_error: Option<AdminError>,
    dump_error: Option<AdminError>,
    restore_error: Option<AdminError>,
    apply_error: Option<String>,
    delete_workload_error: Option<String>,
}

#[derive(Default)]
struct SimState {
    workloads: BTreeMap<(WorkloadKind, String), SimWorkload>,
    claims: BTreeMap<String, StorageBinding>,
    volumes: BTreeMap<String, SimVolume>,
    journal: Vec<SimCall>,
    faults: SimFaults,
    next_volume: u32,
}

impl SimState {
    fn instances_for(&self, kind: WorkloadKind, name: &str, replicas: u32) -> Vec<Instance> {
        let ready = !self.faults.never_ready.contains(&(kind, name.to_string()));
        (0..replicas)
            .map(|ordinal| Instance {
                name: match kind {
                    WorkloadKind::Deployment => format!("{name}-{POD_HASH}-{ordinal}"),
                    WorkloadKind::StatefulSet => format!("{name}-{ordinal}"),
                },
                ready,
            })
            .collect()
    }

    fn refresh(&mut self, key: &(WorkloadKind, String)) {
        let Some(desired) = self.workloads.get(key).map(|w| w.workload.desired_replicas) else {
            return;
        };
        let lingering = desired == 0 && self.faults.linger_on_scale_down.contains(key);
        let instances = if lingering {
            self.workloads[key].instances.clone()
        } else {
            self.instances_for(key.0, &key.1, desired)
        };
        let ready = instances.iter().filter(|i| i.ready).count() as u32;
        if let Some(sim) = self.workloads.get_mut(key) {
            sim.workload.ready_replicas = ready.min(desired);
            sim.instances = instances;
        }
    }

    fn provision_volume(&mut self, claim: &str, owner: &str, capacity: &str) -> String {
        self.next_volume += 1;
        let volume = format!("pvc-{:08x}", self.next_volume);
        self.volumes.insert(
            volume.clone(),
            SimVolume {
                binding: StorageBinding {
                    kind: StorageKind::Volume,
                    name: volume.clone(),
                    capacity: Some(capacity.to_string()),
                    access_mode: None,
                    bound_to: Some(claim.to_string()),
                    owner: None,
                },
                records: Vec::new(),
            },
        );
        self.claims.insert(
            claim.to_string(),
            StorageBinding {
                kind: StorageKind::Claim,
                name: claim.to_string(),
                capacity: Some(capacity.to_string()),
                access_mode: None,
                bound_to: Some(volume.clone()),
                owner: Some(owner.to_string()),
            },
        );
        volume
    }

    fn transient_failure(&mut self, instance: &InstanceRef) -> Result<(), AdminError> {
        if self.faults.failing_admin_calls > 0 {
            self.faults.failing_admin_calls -= 1;
            return Err(AdminError::unreachable(instance, "server selection timed out"));
        }
        Ok(())
    }

    /// Volume mounted by a running instance.
    fn volume_of(&self, instance: &InstanceRef) -> Result<&SimVolume, AdminError> {
        let volume = self.volume_name_of(instance)?;
        self.volumes
            .get(&volume)
            .ok_or_else(|| AdminError::data_error(instance, format!("volume {volume} is gone")))
    }

    fn volume_name_of(&self, instance: &InstanceRef) -> Result<String, AdminError> {
        let (sim, ordinal) = self
            .workloads
            .values()
            .find_map(|sim| {
                sim.instances
                    .iter()
                    .position(|i| i.name == instance.instance)
                    .map(|ordinal| (sim, ordinal))
            })
            .ok_or_else(|| AdminError::unreachable(instance, "no such instance"))?;
        if self
            .faults
            .unreachable
            .contains(&(sim.workload.kind, sim.workload.name.clone()))
        {
            return Err(AdminError::unreachable(instance, "connection refused"));
        }
        let claim = match sim.workload.kind {
            WorkloadKind::Deployment => sim.claims.first(),
            WorkloadKind::StatefulSet => sim.claims.get(ordinal),
        }
        .ok_or_else(|| AdminError::data_error(instance, "no volume mounted"))?;
        self.claims
            .get(claim)
            .and_then(|c| c.bound_to.clone())
            .ok_or_else(|| AdminError::data_error(instance, format!("claim {claim} is unbound")))
    }
}

/// Simulated cluster. Cheap to clone; clones share state.
///
/// # Implementation details
/// - One `tokio::sync::Mutex` over all state; every call journals first,
///   then checks injected faults, then mutates
/// - Scaling and applying converge instantly unless a fault says otherwise
///   (`never_ready`, `linger_on_scale_down`)
/// - Deleting a claim only releases its volume; the records stay on the
///   volume, as with a `Retain` reclaim policy
///
/// # Example
/// ```ignore
/// let cluster = InMemoryCluster::new();
/// cluster.seed_legacy("mongo", "mongo-pvc", "mongo-pv", records).await;
/// cluster.never_ready(WorkloadKind::StatefulSet, "mongo").await;
/// let controller = ControllerBuilder::new()
///     .admin(cluster.admin())
///     .cluster(cluster.clone())
///     .build()?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<SimState>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admin channel over the same simulated volumes.
    pub fn admin(&self) -> InMemoryAdmin {
        InMemoryAdmin {
            state: Arc::clone(&self.state),
        }
    }

    /// Seed a legacy single-replica deployment whose claim is bound to a
    /// manually created volume holding `records`.
    pub async fn seed_legacy(&self, deployment: &str, claim: &str, volume: &str, records: Vec<Record>) {
        let mut state = self.state.lock().await;
        state.volumes.insert(
            volume.to_string(),
            SimVolume {
                binding: StorageBinding {
                    kind: StorageKind::Volume,
                    name: volume.to_string(),
                    capacity: Some("1Gi".to_string()),
                    access_mode: None,
                    bound_to: Some(claim.to_string()),
                    owner: None,
                },
                records,
            },
        );
        state.claims.insert(
            claim.to_string(),
            StorageBinding {
                kind: StorageKind::Claim,
                name: claim.to_string(),
                capacity: Some("1Gi".to_string()),
                access_mode: None,
                bound_to: Some(volume.to_string()),
                owner: None,
            },
        );
        let key = (WorkloadKind::Deployment, deployment.to_string());
        state.workloads.insert(
            key.clone(),
            SimWorkload {
                workload: Workload {
                    kind: WorkloadKind::Deployment,
                    name: deployment.to_string(),
                    desired_replicas: 1,
                    ready_replicas: 0,
                    image: Some("mongo:4.4".to_string()),
                    selector: BTreeMap::from([("app".to_string(), deployment.to_string())]),
                },
                claims: vec![claim.to_string()],
                instances: Vec::new(),
            },
        );
        state.refresh(&key);
    }

    /// Observe a workload without journaling.
    pub async fn workload(&self, kind: WorkloadKind, name: &str) -> Option<Workload> {
        let state = self.state.lock().await;
        state
            .workloads
            .get(&(kind, name.to_string()))
            .map(|sim| sim.workload.clone())
    }

    /// Observe a storage object without journaling.
    pub async fn storage(&self, kind: StorageKind, name: &str) -> Option<StorageBinding> {
        let state = self.state.lock().await;
        match kind {
            StorageKind::Claim => state.claims.get(name).cloned(),
            StorageKind::Volume => state.volumes.get(name).map(|v| v.binding.clone()),
        }
    }

    /// Records on the volume behind `claim`.
    pub async fn records_behind_claim(&self, claim: &str) -> Option<Vec<Record>> {
        let state = self.state.lock().await;
        let volume = state.claims.get(claim)?.bound_to.clone()?;
        state.volumes.get(&volume).map(|v| v.records.clone())
    }

    /// Records on a volume, bound or not.
    pub async fn records_on_volume(&self, volume: &str) -> Option<Vec<Record>> {
        let state = self.state.lock().await;
        state.volumes.get(volume).map(|v| v.records.clone())
    }

    pub async fn journal(&self) -> Vec<SimCall> {
        self.state.lock().await.journal.clone()
    }

    pub async fn mutating_calls(&self) -> Vec<SimCall> {
        self.journal()
            .await
            .into_iter()
            .filter(SimCall::is_mutating)
            .collect()
    }

    pub async fn clear_journal(&self) {
        self.state.lock().await.journal.clear();
    }

    // ---- fault injection ----

    pub async fn never_ready(&self, kind: WorkloadKind, name: &str) {
        let mut state = self.state.lock().await;
        state.faults.never_ready.insert((kind, name.to_string()));
        state.refresh(&(kind, name.to_string()));
    }

    /// Instances keep running after the workload is scaled to zero.
    pub async fn linger_on_scale_down(&self, kind: WorkloadKind, name: &str) {
        let mut state = self.state.lock().await;
        state.faults.linger_on_scale_down.insert((kind, name.to_string()));
    }

    /// Admin calls to the workload's instances are refused.
    pub async fn set_unreachable(&self, kind: WorkloadKind, name: &str) {
        let mut state = self.state.lock().await;
        state.faults.unreachable.insert((kind, name.to_string()));
    }

    /// The next `count` admin calls fail as unreachable.
    pub async fn fail_next_admin_calls(&self, count: u32) {
        self.state.lock().await.faults.failing_admin_calls = count;
    }

    /// Every ping fails with `error`.
    pub async fn fail_every_ping(&self, error: AdminError) {
        self.state.lock().await.faults.ping_error = Some(error);
    }

    pub async fn fail_dump(&self, error: AdminError) {
        self.state.lock().await.faults.dump_error = Some(error);
    }

    pub async fn fail_restore(&self, error: AdminError) {
        self.state.lock().await.faults.restore_error = Some(error);
    }

    pub async fn fail_apply(&self, message: &str) {
        self.state.lock().await.faults.apply_error = Some(message.to_string());
    }

    pub async fn fail_delete_workload(&self, message: &str) {
        self.state.lock().await.faults.delete_workload_error = Some(message.to_string());
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<Option<Workload>, ClusterError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::GetWorkload {
            kind,
            name: name.to_string(),
        });
        Ok(state
            .workloads
            .get(&(kind, name.to_string()))
            .map(|sim| sim.workload.clone()))
    }

    async fn list_instances(&self, workload: &Workload) -> Result<Vec<Instance>, ClusterError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::ListInstances {
            name: workload.name.clone(),
        });
        Ok(state
            .workloads
            .get(&(workload.kind, workload.name.clone()))
            .map(|sim| sim.instances.clone())
            .unwrap_or_default())
    }

    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::ApplyWorkload {
            name: spec.name.clone(),
        });
        if let Some(message) = state.faults.apply_error.clone() {
            return Err(ClusterError::Command {
                command: "apply".to_string(),
                stderr: message,
            });
        }
        let claims = spec.claim_names();
        for claim in &claims {
            if !state.claims.contains_key(claim) {
                state.provision_volume(claim, &spec.name, &spec.storage.capacity);
            }
        }
        let key = (WorkloadKind::StatefulSet, spec.name.clone());
        state.workloads.insert(
            key.clone(),
            SimWorkload {
                workload: Workload {
                    kind: WorkloadKind::StatefulSet,
                    name: spec.name.clone(),
                    desired_replicas: spec.replicas,
                    ready_replicas: 0,
                    image: Some(spec.image.clone()),
                    selector: spec.labels.clone(),
                },
                claims,
                instances: Vec::new(),
            },
        );
        state.refresh(&key);
        Ok(())
    }

    async fn scale_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        replicas: u32,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::ScaleWorkload {
            kind,
            name: name.to_string(),
            replicas,
        });
        let key = (kind, name.to_string());
        let Some(sim) = state.workloads.get_mut(&key) else {
            return Err(ClusterError::Command {
                command: format!("scale {kind}/{name}"),
                stderr: format!("{kind} {name} not found"),
            });
        };
        sim.workload.desired_replicas = replicas;
        state.refresh(&key);
        Ok(())
    }

    async fn delete_workload(&self, kind: WorkloadKind, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::DeleteWorkload {
            kind,
            name: name.to_string(),
        });
        if let Some(message) = state.faults.delete_workload_error.clone() {
            return Err(ClusterError::Command {
                command: format!("delete {kind}/{name}"),
                stderr: message,
            });
        }
        Ok(state.workloads.remove(&(kind, name.to_string())).is_some())
    }

    async fn get_storage(
        &self,
        kind: StorageKind,
        name: &str,
    ) -> Result<Option<StorageBinding>, ClusterError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::GetStorage {
            kind,
            name: name.to_string(),
        });
        Ok(match kind {
            StorageKind::Claim => state.claims.get(name).cloned(),
            StorageKind::Volume => state.volumes.get(name).map(|v| v.binding.clone()),
        })
    }

    async fn delete_storage(&self, kind: StorageKind, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::DeleteStorage {
            kind,
            name: name.to_string(),
        });
        match kind {
            StorageKind::Claim => {
                let Some(claim) = state.claims.remove(name) else {
                    return Ok(false);
                };
                // Released volumes keep their data (reclaim policy Retain).
                if let Some(volume) = claim.bound_to.and_then(|v| state.volumes.get_mut(&v)) {
                    volume.binding.bound_to = None;
                }
                Ok(true)
            }
            StorageKind::Volume => Ok(state.volumes.remove(name).is_some()),
        }
    }
}

/// Admin channel backed by `InMemoryCluster` volumes.
#[derive(Clone)]
pub struct InMemoryAdmin {
    state: Arc<Mutex<SimState>>,
}

fn encode_records(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(record.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

fn decode_records(raw: &str) -> Result<Vec<Record>, serde_json::Error> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

#[async_trait]
impl AdminChannel for InMemoryAdmin {
    async fn ping(&self, instance: &InstanceRef) -> Result<(), AdminError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::Ping {
            instance: instance.instance.clone(),
        });
        if let Some(err) = state.faults.ping_error.clone() {
            return Err(err);
        }
        state.transient_failure(instance)?;
        state.volume_of(instance).map(|_| ())
    }

    async fn is_empty(&self, instance: &InstanceRef) -> Result<bool, AdminError> {
        let mut state = self.state.lock().await;
        state.journal.push(SimCall::IsEmpty {
            instance: instance.instance.clone(),
        });
        state.transient_failure(instance)?;
        state.volume_of(instance).map(|v| v.records.is_empty())
    }

    async fn dump(&self, instance: &InstanceRef, destination: &Path) -> Result<u64, AdminError> {
        let bytes = {
            let mut state = self.state.lock().await;
            state.journal.push(SimCall::Dump {
                instance: instance.instance.clone(),
            });
            if let Some(err) = state.faults.dump_error.clone() {
                return Err(err);
            }
            state.transient_failure(instance)?;
            encode_records(&state.volume_of(instance)?.records)
        };
        tokio::fs::write(destination, &bytes)
            .await
            .map_err(|e| AdminError::data_error(instance, format!("write dump: {e}")))?;
        Ok(bytes.len() as u64)
    }

    async fn restore(&self, instance: &InstanceRef, source: &Path) -> Result<(), AdminError> {
        let raw = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| AdminError::data_error(instance, format!("read dump: {e}")))?;
        let records = decode_records(&raw)
            .map_err(|e| AdminError::data_error(instance, format!("corrupt dump: {e}")))?;

        let mut state = self.state.lock().await;
        state.journal.push(SimCall::Restore {
            instance: instance.instance.clone(),
        });
        if let Some(err) = state.faults.restore_error.clone() {
            return Err(err);
        }
        state.transient_failure(instance)?;
        let volume = state.volume_name_of(instance)?;
        let target = state
            .volumes
            .get_mut(&volume)
            .ok_or_else(|| AdminError::data_error(instance, format!("volume {volume} is gone")))?;
        target.records = records;
        Ok(())
    }
}
