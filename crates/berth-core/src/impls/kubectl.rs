//! KubectlCluster - ClusterClient over the `kubectl` binary.
//!
//! Reads use `get -o json --ignore-not-found`, so a missing object is an empty
//! stdout rather than an error. Writes go through `apply -f -`, `scale` and
//! `delete --ignore-not-found`. kubectl's own credentials (kubeconfig, context)
//! are used as-is; nothing here handles secrets.
//!
//! # Mapping
//! - Legacy workload: `Deployment`; its instances are pods owned by one of
//!   its ReplicaSets
//! - Managed workload: `StatefulSet` plus headless `Service`, rendered as one
//!   `List` manifest
//! - Storage: `PersistentVolumeClaim` and `PersistentVolume`; a claim's
//!   `volumeName` and a volume's `claimRef` become `bound_to`
//!
//! # Error classification
//! stderr is matched against kubectl's wording: RBAC and `Forbidden` become
//! `ClusterError::Forbidden`, connection failures `Unavailable`, everything
//! else a plain command failure.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ClusterConfig;
use crate::domain::{
    AccessMode, Instance, StorageBinding, StorageKind, Workload, WorkloadKind, WorkloadSpec,
};
use crate::ports::{ClusterClient, ClusterError};

#[derive(Debug, Clone)]
pub struct KubectlCluster {
    program: String,
    context: Option<String>,
    namespace: String,
}

impl KubectlCluster {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            program: config.kubectl.clone(),
            context: config.context.clone(),
            namespace: config.namespace.clone(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--namespace").arg(&self.namespace);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run kubectl, optionally feeding `stdin`; returns stdout.
    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>, ClusterError> {
        let rendered = args.join(" ");
        tracing::debug!(command = %rendered, "kubectl");

        let mut cmd = self.command(args);
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|source| ClusterError::Launch {
            program: self.program.clone(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .map_err(|e| ClusterError::Command {
                    command: rendered.clone(),
                    stderr: format!("writing stdin: {e}"),
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ClusterError::Command {
                command: rendered.clone(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&rendered, stderr.trim()));
        }
        Ok(output.stdout)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        resource: &str,
        name: &str,
    ) -> Result<Option<T>, ClusterError> {
        let stdout = self
            .run(&["get", resource, name, "-o", "json", "--ignore-not-found"], None)
            .await?;
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&stdout)
            .map(Some)
            .map_err(|e| ClusterError::Decode(format!("{resource}/{name}: {e}")))
    }
}

/// Map kubectl's stderr onto the cluster error classes.
pub(crate) fn classify_failure(command: &str, stderr: &str) -> ClusterError {
    let lower = stderr.to_lowercase();
    const FORBIDDEN: &[&str] = &["forbidden", "unauthorized", "you must be logged in"];
    const UNAVAILABLE: &[&str] = &[
        "unable to connect to the server",
        "connection refused",
        "i/o timeout",
        "tls handshake timeout",
        "no route to host",
        "the server is currently unable",
    ];
    if FORBIDDEN.iter().any(|p| lower.contains(p)) {
        ClusterError::Forbidden(stderr.to_string())
    } else if UNAVAILABLE.iter().any(|p| lower.contains(p)) {
        ClusterError::Unavailable(stderr.to_string())
    } else {
        ClusterError::Command {
            command: command.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

// ---- wire shapes (only the fields we read) ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    owner_references: Vec<OwnerReference>,
    #[serde(default)]
    deletion_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerReference {
    kind: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WorkloadObject {
    metadata: ObjectMeta,
    spec: WorkloadObjectSpec,
    #[serde(default)]
    status: WorkloadObjectStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadObjectSpec {
    #[serde(default)]
    replicas: Option<u32>,
    #[serde(default)]
    selector: LabelSelector,
    #[serde(default)]
    template: Option<PodTemplate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelSelector {
    #[serde(default)]
    match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodTemplate {
    spec: PodTemplateSpec,
}

#[derive(Debug, Deserialize)]
struct PodTemplateSpec {
    #[serde(default)]
    containers: Vec<ContainerSpec>,
}

#[derive(Debug, Deserialize)]
struct ContainerSpec {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadObjectStatus {
    #[serde(default)]
    ready_replicas: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodObject>,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    metadata: ObjectMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StorageObject {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: StorageObjectSpec,
    #[serde(default)]
    status: StorageObjectStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageObjectSpec {
    #[serde(default)]
    access_modes: Vec<String>,
    /// Claim side: bound volume.
    #[serde(default)]
    volume_name: Option<String>,
    /// Volume side: holding claim.
    #[serde(default)]
    claim_ref: Option<ClaimRef>,
    /// Volume side.
    #[serde(default)]
    capacity: BTreeMap<String, String>,
    /// Claim side, when not yet bound.
    #[serde(default)]
    resources: Option<ResourceRequests>,
}

#[derive(Debug, Deserialize)]
struct ClaimRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResourceRequests {
    #[serde(default)]
    requests: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageObjectStatus {
    #[serde(default)]
    capacity: BTreeMap<String, String>,
}

impl WorkloadObject {
    fn into_workload(self, kind: WorkloadKind) -> Workload {
        let image = self
            .spec
            .template
            .and_then(|t| t.spec.containers.into_iter().next())
            .and_then(|c| c.image);
        Workload {
            kind,
            name: self.metadata.name,
            // the API server defaults an omitted replica count to 1
            desired_replicas: self.spec.replicas.unwrap_or(1),
            ready_replicas: self.status.ready_replicas.unwrap_or(0),
            image,
            selector: self.spec.selector.match_labels,
        }
    }
}

impl StorageObject {
    fn into_binding(self, kind: StorageKind) -> StorageBinding {
        let spec = self.spec;
        let capacity = match kind {
            StorageKind::Claim => self
                .status
                .capacity
                .get("storage")
                .cloned()
                .or_else(|| spec.resources.and_then(|r| r.requests.get("storage").cloned())),
            StorageKind::Volume => spec.capacity.get("storage").cloned(),
        };
        StorageBinding {
            kind,
            name: self.metadata.name,
            capacity,
            access_mode: spec.access_modes.first().and_then(|m| AccessMode::parse(m)),
            bound_to: match kind {
                StorageKind::Claim => spec.volume_name.filter(|v| !v.is_empty()),
                StorageKind::Volume => spec.claim_ref.map(|c| c.name),
            },
            owner: self.metadata.owner_references.into_iter().next().map(|o| o.name),
        }
    }
}

/// Pods belong to a deployment through a ReplicaSet named `<deployment>-<hash>`,
/// and to a statefulset directly. The hash is a single alphanumeric segment,
/// so `mongo-express-6c8b` is not a ReplicaSet of `mongo`.
fn owned_by(pod: &PodObject, workload: &Workload) -> bool {
    pod.metadata.owner_references.iter().any(|owner| match workload.kind {
        WorkloadKind::Deployment => {
            owner.kind == "ReplicaSet"
                && owner
                    .name
                    .strip_prefix(workload.name.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .is_some_and(is_template_hash)
        }
        WorkloadKind::StatefulSet => owner.kind == "StatefulSet" && owner.name == workload.name,
    })
}

fn is_template_hash(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric())
}

fn pod_ready(pod: &PodObject) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
}

/// Headless service plus statefulset with per-replica claim templates.
pub(crate) fn render_manifest(spec: &WorkloadSpec) -> serde_json::Value {
    let mut container = json!({
        "name": spec.container_name,
        "image": spec.image,
        "ports": [{ "name": "db", "containerPort": spec.container_port }],
        "volumeMounts": [{ "name": spec.storage.name, "mountPath": spec.storage.mount_path }],
    });
    if let Some(secret) = &spec.secret_name {
        container["envFrom"] = json!([{ "secretRef": { "name": secret } }]);
    }

    let mut claim_spec = json!({
        "accessModes": [spec.storage.access_mode.as_str()],
        "resources": { "requests": { "storage": spec.storage.capacity } },
    });
    if let Some(class) = &spec.storage.storage_class {
        claim_spec["storageClassName"] = json!(class);
    }

    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": { "name": spec.service_name, "labels": spec.labels },
                "spec": {
                    "clusterIP": "None",
                    "selector": spec.labels,
                    "ports": [{ "name": "db", "port": spec.container_port, "targetPort": spec.container_port }],
                },
            },
            {
                "apiVersion": "apps/v1",
                "kind": "StatefulSet",
                "metadata": { "name": spec.name, "labels": spec.labels },
                "spec": {
                    "serviceName": spec.service_name,
                    "replicas": spec.replicas,
                    "selector": { "matchLabels": spec.labels },
                    "template": {
                        "metadata": { "labels": spec.labels },
                        "spec": { "containers": [container] },
                    },
                    "volumeClaimTemplates": [
                        { "metadata": { "name": spec.storage.name }, "spec": claim_spec },
                    ],
                },
            },
        ],
    })
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ClusterClient for KubectlCluster {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<Option<Workload>, ClusterError> {
        let object: Option<WorkloadObject> = self.get_json(kind.as_str(), name).await?;
        Ok(object.map(|o| o.into_workload(kind)))
    }

    async fn list_instances(&self, workload: &Workload) -> Result<Vec<Instance>, ClusterError> {
        let mut args = vec!["get", "pods", "-o", "json"];
        let selector = label_selector(&workload.selector);
        if !selector.is_empty() {
            args.extend(["-l", selector.as_str()]);
        }
        let stdout = self.run(&args, None).await?;
        let pods: PodList = serde_json::from_slice(&stdout)
            .map_err(|e| ClusterError::Decode(format!("pods of {}: {e}", workload.name)))?;
        Ok(pods
            .items
            .iter()
            .filter(|pod| owned_by(pod, workload))
            .map(|pod| Instance {
                name: pod.metadata.name.clone(),
                ready: pod_ready(pod),
            })
            .collect())
    }

    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        let manifest = serde_json::to_vec(&render_manifest(spec))
            .map_err(|e| ClusterError::Decode(e.to_string()))?;
        self.run(&["apply", "-f", "-"], Some(&manifest)).await?;
        tracing::info!(statefulset = %spec.name, replicas = spec.replicas, "managed workload applied");
        Ok(())
    }

    async fn scale_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        replicas: u32,
    ) -> Result<(), ClusterError> {
        let target = format!("{kind}/{name}");
        let replicas_flag = format!("--replicas={replicas}");
        self.run(&["scale", &target, &replicas_flag], None).await?;
        Ok(())
    }

    async fn delete_workload(&self, kind: WorkloadKind, name: &str) -> Result<bool, ClusterError> {
        let stdout = self
            .run(&["delete", kind.as_str(), name, "--ignore-not-found", "-o", "name"], None)
            .await?;
        Ok(!stdout.iter().all(u8::is_ascii_whitespace))
    }

    async fn get_storage(
        &self,
        kind: StorageKind,
        name: &str,
    ) -> Result<Option<StorageBinding>, ClusterError> {
        let object: Option<StorageObject> = self.get_json(kind.as_str(), name).await?;
        Ok(object.map(|o| o.into_binding(kind)))
    }

    async fn delete_storage(&self, kind: StorageKind, name: &str) -> Result<bool, ClusterError> {
        let stdout = self
            .run(&["delete", kind.as_str(), name, "--ignore-not-found", "-o", "name"], None)
            .await?;
        Ok(!stdout.iter().all(u8::is_ascii_whitespace))
    }
}
