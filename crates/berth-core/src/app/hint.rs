//! Operator guidance: recovery steps after a failure, and the standalone
//! `rollback-hint` derived from a fresh inspection.
//!
//! Everything here is pure: it reads snapshots and config and returns text.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::config::BerthConfig;
use crate::domain::{
    BackupArtifact, ErrorKind, Inspection, MigrationError, WorkloadTopology,
};

/// Ordered manual steps to get back to a stable Legacy topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackHint {
    pub topology: WorkloadTopology,
    pub summary: String,
    pub steps: Vec<String>,
}

impl RollbackHint {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "topology: {}", self.topology);
        let _ = writeln!(out, "{}", self.summary);
        for (i, step) in self.steps.iter().enumerate() {
            let _ = writeln!(out, "  {}. {step}", i + 1);
        }
        out
    }
}

fn kubectl(config: &BerthConfig, args: &str) -> String {
    let mut cmd = format!("{} -n {}", config.cluster.kubectl, config.cluster.namespace);
    if let Some(context) = &config.cluster.context {
        let _ = write!(cmd, " --context {context}");
    }
    format!("`{cmd} {args}`")
}

/// Steps that re-attach the retained legacy volume and restart the legacy
/// deployment with `replicas` instances. `volume` is the retained volume,
/// if one is known.
fn reattach_steps(
    config: &BerthConfig,
    claim_exists: bool,
    volume: Option<&str>,
    replicas: u32,
) -> Vec<String> {
    let legacy = &config.legacy;
    let mut steps = Vec::new();
    if !claim_exists {
        match volume {
            Some(volume) => {
                steps.push(format!(
                    "release volume {volume} from its old claim: {}",
                    kubectl(
                        config,
                        &format!(
                            "patch pv {volume} --type json -p '[{{\"op\":\"remove\",\"path\":\"/spec/claimRef\"}}]'"
                        )
                    )
                ));
                steps.push(format!(
                    "recreate claim {} with spec.volumeName: {volume} from the retained manifest",
                    legacy.claim
                ));
            }
            None => {
                steps.push(format!(
                    "recreate claim {} (no retained volume was found; it will start empty)",
                    legacy.claim
                ));
            }
        }
    }
    steps.push(format!(
        "scale the legacy deployment back up: {}",
        kubectl(
            config,
            &format!("scale deployment/{} --replicas={replicas}", legacy.deployment)
        )
    ));
    steps
}

/// `kubectl exec` of a rendered database command, with a shell redirect
/// appended outside the container.
fn exec_step(config: &BerthConfig, target: &str, template: &str, redirect: &str) -> String {
    let container = config
        .database
        .container
        .as_deref()
        .map(|c| format!(" -c {c}"))
        .unwrap_or_default();
    let interactive = if redirect.starts_with('<') { " -i" } else { "" };
    kubectl(
        config,
        &format!(
            "exec{interactive} {target}{container} -- sh -c '{}' {redirect}",
            config.database.render(template)
        ),
    )
}

fn restore_step(config: &BerthConfig, latest: Option<&Path>) -> String {
    match latest {
        Some(path) => format!(
            "if the volume's data is gone, restore {} into the running instance: {}",
            path.display(),
            exec_step(
                config,
                &format!("deployment/{}", config.legacy.deployment),
                &config.database.restore_command,
                &format!("< {}", path.display()),
            )
        ),
        None => format!(
            "no backup artifact found in {}; the retained volume is the only copy",
            config.backup.artifact_dir.display()
        ),
    }
}

/// Recovery steps for the current cluster state.
pub fn rollback_steps(
    inspection: &Inspection,
    config: &BerthConfig,
    latest: Option<&Path>,
) -> RollbackHint {
    let topology = inspection.topology();
    let volume = inspection.legacy_volume.as_ref().map(|v| v.name.as_str());
    let claim_exists = inspection.legacy_claim.is_some();
    let managed_name = &config.managed.statefulset;
    // a stopped deployment no longer says how many it ran; legacy runs one
    let replicas = inspection
        .legacy
        .as_ref()
        .map(|l| l.desired_replicas)
        .filter(|r| *r > 0)
        .unwrap_or(1);

    let (summary, steps) = match (&inspection.legacy, &inspection.managed) {
        (Some(legacy), None) if !legacy.is_stopped() && claim_exists => (
            "legacy topology is intact; nothing to roll back".to_string(),
            Vec::new(),
        ),
        (Some(_), None) => {
            let mut steps = reattach_steps(config, claim_exists, volume, replicas);
            if !claim_exists {
                steps.push(restore_step(config, latest));
            }
            ("migration stopped mid-way with no managed workload".to_string(), steps)
        }
        (Some(_), Some(_)) => {
            let mut steps = vec![
                format!(
                    "dump the managed instance first if it has taken writes since cutover: {}",
                    exec_step(
                        config,
                        &config.managed_spec().instance_name(0),
                        &config.database.dump_command,
                        "> managed.dump",
                    )
                ),
                format!(
                    "delete the managed workload (its claims are retained): {}",
                    kubectl(config, &format!("delete statefulset {managed_name}"))
                ),
            ];
            steps.extend(reattach_steps(config, claim_exists, volume, replicas));
            steps.push(restore_step(config, latest));
            (
                "managed workload exists next to the retained legacy deployment".to_string(),
                steps,
            )
        }
        (None, Some(_)) => (
            "managed topology is live and the legacy deployment is gone; \
             rolling back means re-creating it from its original manifest"
                .to_string(),
            vec![
                format!(
                    "apply the original legacy deployment manifest for {}",
                    config.legacy.deployment
                ),
                restore_step(config, latest),
            ],
        ),
        (None, None) => {
            let mut steps = Vec::new();
            if inspection.has_orphaned_legacy_storage() {
                steps.push(format!(
                    "apply the original legacy deployment manifest for {}",
                    config.legacy.deployment
                ));
                steps.extend(reattach_steps(config, claim_exists, volume, replicas));
            }
            steps.push(restore_step(config, latest));
            ("no database workload exists".to_string(), steps)
        }
    };

    RollbackHint {
        topology,
        summary,
        steps,
    }
}

/// Legacy objects still present after the managed topology is in place.
pub fn residue_guidance(inspection: &Inspection, config: &BerthConfig) -> Vec<String> {
    let mut steps = Vec::new();
    if let Some(managed) = inspection.managed.as_ref().filter(|m| !m.is_ready()) {
        steps.push(format!(
            "managed workload {} is not ready ({}/{}); check it or run `berth rollback-hint`",
            managed.name, managed.ready_replicas, managed.desired_replicas
        ));
    }
    if let Some(legacy) = &inspection.legacy {
        steps.push(format!(
            "legacy deployment {} still exists; delete it once you no longer need it: {}",
            legacy.name,
            kubectl(config, &format!("delete deployment {}", legacy.name))
        ));
    }
    if let Some(claim) = &inspection.legacy_claim {
        steps.push(format!("legacy claim {} still exists", claim.name));
    }
    if let Some(volume) = &inspection.legacy_volume {
        steps.push(format!(
            "legacy volume {} is retained; delete it after confirming the managed data",
            volume.name
        ));
    }
    steps
}

/// What the failing run leaves behind.
pub struct FailureContext<'a> {
    pub error: &'a MigrationError,
    pub rolled_back: bool,
    /// Replica count the legacy deployment had before the run; `None` when
    /// there was no legacy deployment.
    pub legacy_replicas: Option<u32>,
    pub artifact: Option<&'a BackupArtifact>,
    pub legacy_volume: Option<&'a str>,
}

/// Guidance for the report of a failed run.
pub fn failure_guidance(ctx: &FailureContext<'_>, config: &BerthConfig) -> Vec<String> {
    let legacy = &config.legacy;
    let mut steps = Vec::new();
    match ctx.error.kind {
        ErrorKind::PostCutoverDegradation => {
            steps.push(format!(
                "legacy deployment {} is scaled to 0 (it ran {}); its definition is retained",
                legacy.deployment,
                ctx.legacy_replicas.unwrap_or(1)
            ));
            match ctx.legacy_volume {
                Some(volume) => steps.push(format!(
                    "volume {volume} still holds the legacy data (claim {} was deleted)",
                    legacy.claim
                )),
                None => steps.push(format!("claim {} was deleted", legacy.claim)),
            }
            match ctx.artifact {
                Some(artifact) => steps.push(format!(
                    "backup artifact retained at {} (sha256 {})",
                    artifact.location.display(),
                    artifact.short_checksum()
                )),
                None => steps.push("no backup artifact was taken".to_string()),
            }
            steps.push(format!(
                "either fix {} and restore the artifact into {}, or run `berth rollback-hint` \
                 for the steps back to the legacy deployment",
                config.managed.statefulset,
                config.managed_spec().instance_name(0)
            ));
        }
        _ if ctx.rolled_back => {
            steps.push(format!(
                "legacy deployment {} was scaled back to {} replica(s); topology is legacy",
                legacy.deployment,
                ctx.legacy_replicas.unwrap_or(1)
            ));
            steps.push("fix the cause above and re-run `berth migrate`".to_string());
        }
        ErrorKind::ConfigurationError => {
            steps.push(
                "check the [cluster] and [database] settings and the credentials secret".to_string(),
            );
            steps.push("legacy topology was not changed; re-run `berth migrate` when fixed".to_string());
        }
        ErrorKind::Interrupted => {
            steps.push("interrupted before cutover; legacy topology was not changed".to_string());
        }
        _ if ctx.legacy_replicas.is_none() => {
            steps.push(format!(
                "no database workload existed before this run; inspect or delete whatever \
                 {} left behind, then re-run `berth migrate`",
                config.managed.statefulset
            ));
        }
        _ => {
            steps.push("legacy topology was not changed; re-run `berth migrate` when fixed".to_string());
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        MigrationPhase, StorageBinding, StorageKind, Workload, WorkloadKind,
    };
    use std::collections::BTreeMap;

    fn deployment(replicas: u32) -> Workload {
        Workload {
            kind: WorkloadKind::Deployment,
            name: "mongo".to_string(),
            desired_replicas: replicas,
            ready_replicas: replicas,
            image: None,
            selector: BTreeMap::new(),
        }
    }

    fn volume() -> StorageBinding {
        StorageBinding {
            kind: StorageKind::Volume,
            name: "mongo-pv".to_string(),
            capacity: None,
            access_mode: None,
            bound_to: None,
            owner: None,
        }
    }

    #[test]
    fn intact_legacy_needs_nothing() {
        let inspection = Inspection {
            legacy: Some(deployment(1)),
            legacy_claim: Some(StorageBinding {
                kind: StorageKind::Claim,
                name: "mongo-pvc".to_string(),
                ..volume()
            }),
            ..Inspection::default()
        };
        let hint = rollback_steps(&inspection, &BerthConfig::default(), None);
        assert!(hint.steps.is_empty());
        assert!(hint.summary.contains("intact"));
    }

    #[test]
    fn stopped_legacy_without_claim_reattaches_volume() {
        let inspection = Inspection {
            legacy: Some(deployment(0)),
            legacy_volume: Some(volume()),
            ..Inspection::default()
        };
        let hint = rollback_steps(
            &inspection,
            &BerthConfig::default(),
            Some(Path::new("berth-backups/backup-01.dump")),
        );
        assert!(hint.steps[0].contains("patch pv mongo-pv"));
        assert!(hint.steps[1].contains("recreate claim mongo-pvc"));
        assert!(hint.steps[2].contains("scale deployment/mongo --replicas=1"));
        assert!(hint.steps[3].contains("exec -i deployment/mongo -c mongo"));
        assert!(hint.steps[3].contains("< berth-backups/backup-01.dump"));
        assert!(!hint.render_text().contains("{auth}"));
    }

    #[test]
    fn post_cutover_guidance_names_volume_and_artifact_state() {
        let error = MigrationError::new(
            ErrorKind::PostCutoverDegradation,
            MigrationPhase::Provisioning,
            "managed workload not ready",
        );
        let ctx = FailureContext {
            error: &error,
            rolled_back: false,
            legacy_replicas: Some(1),
            artifact: None,
            legacy_volume: Some("mongo-pv"),
        };
        let steps = failure_guidance(&ctx, &BerthConfig::default());
        assert!(steps[0].contains("scaled to 0 (it ran 1)"));
        assert!(steps[1].contains("mongo-pv"));
        assert!(steps[2].contains("no backup artifact"));
        assert!(steps[3].contains("rollback-hint"));
    }

    #[test]
    fn rolled_back_guidance_says_legacy_is_back() {
        let error = MigrationError::new(
            ErrorKind::TransientInfra,
            MigrationPhase::Provisioning,
            "legacy instance did not terminate",
        );
        let ctx = FailureContext {
            error: &error,
            rolled_back: true,
            legacy_replicas: Some(1),
            artifact: None,
            legacy_volume: None,
        };
        let steps = failure_guidance(&ctx, &BerthConfig::default());
        assert!(steps[0].contains("scaled back to 1"));
    }

    #[test]
    fn managed_dump_step_uses_configured_command_and_replicas() {
        let mut config = BerthConfig::default();
        config.database.dump_command = "mongodump --gzip {auth} --archive".to_string();
        let mut managed = deployment(1);
        managed.kind = WorkloadKind::StatefulSet;
        let inspection = Inspection {
            legacy: Some(deployment(3)),
            legacy_volume: Some(volume()),
            managed: Some(managed),
            ..Inspection::default()
        };

        let steps = rollback_steps(&inspection, &config, None).steps.join("\n");

        assert!(steps.contains("exec mongo-0 -c mongo -- sh -c 'mongodump --gzip --username"));
        assert!(steps.contains("> managed.dump"));
        assert!(steps.contains("scale deployment/mongo --replicas=3"));
        assert!(!steps.contains("{auth}"));
    }

    #[test]
    fn failure_without_prior_workload_does_not_mention_legacy() {
        let error = MigrationError::new(
            ErrorKind::TransientInfra,
            MigrationPhase::Provisioning,
            "applying managed workload failed",
        );
        let ctx = FailureContext {
            error: &error,
            rolled_back: false,
            legacy_replicas: None,
            artifact: None,
            legacy_volume: None,
        };
        let steps = failure_guidance(&ctx, &BerthConfig::default());
        assert_eq!(steps.len(), 1);
        assert!(steps[0].contains("no database workload existed"));
        assert!(steps[0].contains("berth migrate"));
    }
}
