//! End-to-end migrations against the in-memory cluster.

use std::sync::Arc;

use berth_core::app::{CancelToken, Controller, ControllerBuilder, cancel_pair};
use berth_core::config::BerthConfig;
use berth_core::domain::{
    ErrorKind, InstanceRef, MigrationEvent, MigrationOutcome, MigrationPhase, MigrationReport,
    StorageKind, WorkloadKind, WorkloadTopology,
};
use berth_core::impls::{InMemoryCluster, LocalArtifactStore, Record, SimCall};
use berth_core::ports::{AdminError, RecordingEventSink, SystemClock};
use serde_json::json;
use tempfile::TempDir;

const LEGACY_POD: &str = "mongo-5d8c7b-0";

struct Harness {
    cluster: InMemoryCluster,
    events: Arc<RecordingEventSink>,
    controller: Controller,
    dir: TempDir,
}

fn fast_config() -> BerthConfig {
    let mut config = BerthConfig::default();
    config.timeouts.termination_ms = 50;
    config.timeouts.readiness_ms = 50;
    config.timeouts.poll_interval_ms = 5;
    config.probe.max_attempts = 3;
    config.probe.base_delay_ms = 1;
    config.probe.max_delay_ms = 2;
    config.backup.max_attempts = 2;
    config.backup.base_delay_ms = 1;
    config
}

fn harness_with(cluster: InMemoryCluster, config: BerthConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(RecordingEventSink::new());
    let controller = ControllerBuilder::new()
        .config(config)
        .admin(cluster.admin())
        .cluster(cluster.clone())
        .artifact_store(LocalArtifactStore::new(dir.path().join("backups"), SystemClock))
        .event_sink(Arc::clone(&events))
        .build()
        .unwrap();
    Harness {
        cluster,
        events,
        controller,
        dir,
    }
}

fn records() -> Vec<Record> {
    vec![
        json!({"_id": 1, "room": "general", "text": "hello"}),
        json!({"_id": 2, "room": "general", "text": "hi there"}),
        json!({"_id": 3, "room": "random", "text": "anyone?"}),
    ]
}

async fn legacy_with(records: Vec<Record>) -> InMemoryCluster {
    let cluster = InMemoryCluster::new();
    cluster
        .seed_legacy("mongo", "mongo-pvc", "mongo-pv", records)
        .await;
    cluster
}

async fn migrate(h: &Harness) -> MigrationReport {
    h.controller.migrate(&CancelToken::never()).await
}

fn phases(report: &MigrationReport) -> Vec<MigrationPhase> {
    report.history.iter().map(|t| t.to).collect()
}

fn position(journal: &[SimCall], wanted: impl Fn(&SimCall) -> bool) -> Option<usize> {
    journal.iter().position(wanted)
}

fn legacy_claim_deleted(call: &SimCall) -> bool {
    matches!(call, SimCall::DeleteStorage { kind: StorageKind::Claim, name } if name == "mongo-pvc")
}

#[tokio::test]
async fn legacy_with_three_records_migrates_intact() {
    let h = harness_with(legacy_with(records()).await, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::Migrated, "{}", report.render_text());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.topology_before, Some(WorkloadTopology::Legacy));
    assert_eq!(
        phases(&report),
        vec![
            MigrationPhase::BackingUp,
            MigrationPhase::Provisioning,
            MigrationPhase::Restoring,
            MigrationPhase::Verifying,
            MigrationPhase::Cleaning,
            MigrationPhase::Done,
        ]
    );
    assert!(!report.data_loss_risk);
    assert_eq!(
        report.endpoints,
        vec!["mongo-0.mongo-headless.default.svc.cluster.local:27017".to_string()]
    );

    assert_eq!(h.cluster.records_behind_claim("data-mongo-0").await, Some(records()));
    assert!(h.cluster.workload(WorkloadKind::Deployment, "mongo").await.is_none());
    assert!(h.cluster.storage(StorageKind::Claim, "mongo-pvc").await.is_none());
    assert!(h.cluster.storage(StorageKind::Volume, "mongo-pv").await.is_none());

    let artifact = report.artifact.expect("artifact retained by default");
    assert!(artifact.location.starts_with(h.dir.path()));
    assert!(artifact.location.exists());
}

#[tokio::test]
async fn second_run_issues_no_mutating_calls() {
    let h = harness_with(legacy_with(records()).await, fast_config());
    assert_eq!(migrate(&h).await.outcome, MigrationOutcome::Migrated);
    h.cluster.clear_journal().await;

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::AlreadyMigrated);
    assert_eq!(report.exit_code(), 0);
    assert!(report.render_text().contains("already migrated"));
    assert!(h.cluster.mutating_calls().await.is_empty());
    assert!(h.events.events().contains(&MigrationEvent::AlreadyMigrated));
}

#[tokio::test]
async fn legacy_claim_is_released_only_after_backup() {
    let h = harness_with(legacy_with(records()).await, fast_config());
    migrate(&h).await;

    let journal = h.cluster.journal().await;
    let dumped = position(&journal, |c| matches!(c, SimCall::Dump { .. })).unwrap();
    let released = position(&journal, legacy_claim_deleted).unwrap();
    assert!(dumped < released);
}

#[tokio::test]
async fn empty_legacy_is_checked_before_release() {
    let h = harness_with(legacy_with(vec![]).await, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::Migrated);
    assert!(report.artifact.is_none());
    assert!(!report.data_loss_risk);
    let journal = h.cluster.journal().await;
    let checked = position(&journal, |c| matches!(c, SimCall::IsEmpty { .. })).unwrap();
    let released = position(&journal, legacy_claim_deleted).unwrap();
    assert!(checked < released);
    assert!(position(&journal, |c| matches!(c, SimCall::Dump { .. })).is_none());
    // confirmed empty, so the legacy volume is safe to delete
    assert!(h.cluster.storage(StorageKind::Volume, "mongo-pv").await.is_none());
}

#[tokio::test]
async fn failed_verification_never_cleans() {
    let cluster = legacy_with(records()).await;
    cluster
        .fail_every_ping(AdminError::unreachable(
            &InstanceRef::new("mongo", "mongo-0"),
            "connection refused",
        ))
        .await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.failed_phase(), Some(MigrationPhase::Verifying));
    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::PostCutoverDegradation);
    assert_eq!(report.exit_code(), 2);
    assert!(!phases(&report).contains(&MigrationPhase::Cleaning));
    let journal = h.cluster.journal().await;
    assert!(position(&journal, |c| matches!(c, SimCall::DeleteWorkload { .. })).is_none());
    assert!(h.cluster.workload(WorkloadKind::Deployment, "mongo").await.is_some());
}

#[tokio::test]
async fn backup_data_error_leaves_legacy_untouched() {
    let cluster = legacy_with(records()).await;
    cluster
        .fail_dump(AdminError::data_error(
            &InstanceRef::new("mongo", LEGACY_POD),
            "mongodump: cursor killed",
        ))
        .await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::Failed);
    assert_eq!(report.failed_phase(), Some(MigrationPhase::BackingUp));
    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::DataIntegrityRisk);
    assert_ne!(report.exit_code(), 0);
    assert!(h.cluster.mutating_calls().await.is_empty());

    let legacy = h.cluster.workload(WorkloadKind::Deployment, "mongo").await.unwrap();
    assert!(legacy.is_ready());
    assert!(h.cluster.storage(StorageKind::Claim, "mongo-pvc").await.is_some());
    assert_eq!(h.cluster.records_behind_claim("mongo-pvc").await, Some(records()));
}

#[tokio::test]
async fn absent_topology_is_provisioned_fresh() {
    let h = harness_with(InMemoryCluster::new(), fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::Migrated);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.topology_before, Some(WorkloadTopology::Absent));
    assert_eq!(phases(&report)[0], MigrationPhase::Provisioning);
    assert!(!phases(&report).contains(&MigrationPhase::BackingUp));
    assert!(report.artifact.is_none());

    let sts = h.cluster.workload(WorkloadKind::StatefulSet, "mongo").await.unwrap();
    assert!(sts.is_ready());
    assert_eq!(h.cluster.records_behind_claim("data-mongo-0").await, Some(vec![]));
    let journal = h.cluster.journal().await;
    assert!(position(&journal, |c| matches!(c, SimCall::Dump { .. } | SimCall::Restore { .. })).is_none());
}

#[tokio::test]
async fn readiness_timeout_is_post_cutover_degradation() {
    let cluster = legacy_with(records()).await;
    cluster.never_ready(WorkloadKind::StatefulSet, "mongo").await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.failed_phase(), Some(MigrationPhase::Provisioning));
    let error = report.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::PostCutoverDegradation);
    assert!(error.message.contains("not ready"));
    assert_eq!(report.exit_code(), 2);
    assert!(report.data_loss_risk);
    assert!(!report.rolled_back);
    assert!(report.guidance.iter().any(|g| g.contains("rollback-hint")));

    // scaled to zero, not deleted, data still on the retained volume
    let legacy = h.cluster.workload(WorkloadKind::Deployment, "mongo").await.unwrap();
    assert_eq!(legacy.desired_replicas, 0);
    assert_eq!(h.cluster.records_on_volume("mongo-pv").await, Some(records()));
}

#[tokio::test]
async fn stuck_termination_rolls_legacy_back() {
    let cluster = legacy_with(records()).await;
    cluster
        .linger_on_scale_down(WorkloadKind::Deployment, "mongo")
        .await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.failed_phase(), Some(MigrationPhase::Provisioning));
    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::TransientInfra);
    assert_eq!(report.exit_code(), 1);
    assert!(report.rolled_back);
    assert!(!report.data_loss_risk);

    let legacy = h.cluster.workload(WorkloadKind::Deployment, "mongo").await.unwrap();
    assert_eq!(legacy.desired_replicas, 1);
    assert!(h.cluster.storage(StorageKind::Claim, "mongo-pvc").await.is_some());
    assert!(h.cluster.workload(WorkloadKind::StatefulSet, "mongo").await.is_none());
    assert!(h.events.events().iter().any(|e| matches!(
        e,
        MigrationEvent::RolledBack { replicas: 1, .. }
    )));
}

#[tokio::test]
async fn restore_failure_is_a_warning_with_data_loss_risk() {
    let cluster = legacy_with(records()).await;
    cluster
        .fail_restore(AdminError::data_error(
            &InstanceRef::new("mongo", "mongo-0"),
            "E11000 duplicate key",
        ))
        .await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::Migrated);
    assert_eq!(report.exit_code(), 0);
    assert!(report.data_loss_risk);
    assert!(report.warnings.iter().any(|w| w.phase == MigrationPhase::Restoring && w.data_loss_risk));
    assert!(report.render_text().contains("data loss risk: YES"));
    // the only good copy stays around
    assert!(report.artifact.is_some());
    assert_eq!(h.cluster.records_on_volume("mongo-pv").await, Some(records()));
}

#[tokio::test]
async fn unreachable_source_continues_and_keeps_legacy_volume() {
    let cluster = legacy_with(records()).await;
    cluster
        .set_unreachable(WorkloadKind::Deployment, "mongo")
        .await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::Migrated);
    assert!(report.data_loss_risk);
    assert!(report.artifact.is_none());
    assert_eq!(h.cluster.records_on_volume("mongo-pv").await, Some(records()));
}

#[tokio::test]
async fn unreachable_source_is_fatal_when_backups_are_required() {
    let cluster = legacy_with(records()).await;
    cluster
        .set_unreachable(WorkloadKind::Deployment, "mongo")
        .await;
    let mut config = fast_config();
    config.backup.allow_unreachable_source = false;
    let h = harness_with(cluster, config);

    let report = migrate(&h).await;

    assert_eq!(report.failed_phase(), Some(MigrationPhase::BackingUp));
    assert_eq!(report.exit_code(), 1);
    assert!(h.cluster.mutating_calls().await.is_empty());
}

#[tokio::test]
async fn rejected_credentials_are_a_configuration_error() {
    let cluster = legacy_with(records()).await;
    cluster
        .fail_dump(AdminError::auth_failure(
            &InstanceRef::new("mongo", LEGACY_POD),
            "Authentication failed.",
        ))
        .await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::ConfigurationError);
    assert_eq!(report.exit_code(), 3);
    assert!(h.cluster.mutating_calls().await.is_empty());
}

#[tokio::test]
async fn interrupt_before_backup_changes_nothing() {
    let h = harness_with(legacy_with(records()).await, fast_config());
    let (handle, token) = cancel_pair();
    handle.cancel();

    let report = h.controller.migrate(&token).await;

    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::Interrupted);
    assert_eq!(report.exit_code(), 130);
    assert!(h.cluster.mutating_calls().await.is_empty());
}

#[tokio::test]
async fn discarded_artifact_is_not_reported() {
    let mut config = fast_config();
    config.backup.retain_artifact = false;
    let h = harness_with(legacy_with(records()).await, config);

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::Migrated);
    assert!(report.artifact.is_none());
    let leftovers = std::fs::read_dir(h.dir.path().join("backups")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn events_follow_the_phases() {
    let h = harness_with(legacy_with(records()).await, fast_config());
    migrate(&h).await;

    let events = h.events.events();
    assert_eq!(
        events.first(),
        Some(&MigrationEvent::Inspected {
            topology: WorkloadTopology::Legacy
        })
    );
    let entered: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            MigrationEvent::PhaseEntered { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(entered.first(), Some(&MigrationPhase::BackingUp));
    assert_eq!(entered.last(), Some(&MigrationPhase::Done));
    assert!(matches!(events.last(), Some(MigrationEvent::Completed { .. })));
}

#[tokio::test]
async fn status_and_rollback_hint_after_degraded_run() {
    let cluster = legacy_with(records()).await;
    cluster.never_ready(WorkloadKind::StatefulSet, "mongo").await;
    let h = harness_with(cluster, fast_config());
    migrate(&h).await;

    let status = h.controller.status().await.unwrap();
    assert_eq!(status.topology, WorkloadTopology::Managed);
    assert!(status.render_text().contains("statefulset mongo: 0/1 ready"));

    let hint = h.controller.rollback_hint().await.unwrap();
    let steps = hint.steps.join("\n");
    assert!(steps.contains("delete statefulset mongo"));
    assert!(steps.contains("scale deployment/mongo --replicas=1"));
    assert!(steps.contains(".dump"));
}

#[tokio::test]
async fn losing_the_source_mid_dump_aborts_before_cutover() {
    let cluster = legacy_with(records()).await;
    cluster
        .fail_dump(AdminError::unreachable(
            &InstanceRef::new("mongo", LEGACY_POD),
            "connection reset by peer",
        ))
        .await;
    // the lenient default only covers a source that never answered
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.failed_phase(), Some(MigrationPhase::BackingUp));
    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::DataIntegrityRisk);
    assert_eq!(report.exit_code(), 1);
    assert!(h.cluster.mutating_calls().await.is_empty());
    assert!(h.cluster.storage(StorageKind::Claim, "mongo-pvc").await.is_some());
    assert_eq!(h.cluster.records_behind_claim("mongo-pvc").await, Some(records()));
}

#[tokio::test]
async fn missing_dump_tool_is_a_configuration_error() {
    let cluster = legacy_with(records()).await;
    cluster
        .fail_dump(AdminError::misconfigured(
            &InstanceRef::new("mongo", LEGACY_POD),
            "sh: 1: mongodump: not found",
        ))
        .await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::ConfigurationError);
    assert_eq!(report.exit_code(), 3);
    assert!(h.cluster.mutating_calls().await.is_empty());
    let dumps = h
        .cluster
        .journal()
        .await
        .into_iter()
        .filter(|c| matches!(c, SimCall::Dump { .. }))
        .count();
    assert_eq!(dumps, 1);
}

#[tokio::test]
async fn cleanup_failure_is_only_a_warning() {
    let cluster = legacy_with(records()).await;
    cluster
        .fail_delete_workload("Error from server (Forbidden): deployments.apps \"mongo\" is forbidden")
        .await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.outcome, MigrationOutcome::Migrated);
    assert_eq!(report.exit_code(), 0);
    assert!(report.error.is_none());
    assert_eq!(phases(&report).last(), Some(&MigrationPhase::Done));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.phase == MigrationPhase::Cleaning && w.message.contains("mongo")));
    assert!(h.cluster.workload(WorkloadKind::Deployment, "mongo").await.is_some());
    assert_eq!(h.cluster.records_behind_claim("data-mongo-0").await, Some(records()));
}

#[tokio::test]
async fn apply_failure_on_empty_cluster_is_transient() {
    let cluster = InMemoryCluster::new();
    cluster.fail_apply("admission webhook denied the request").await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.failed_phase(), Some(MigrationPhase::Provisioning));
    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::TransientInfra);
    assert_eq!(report.exit_code(), 1);
    assert!(!report.data_loss_risk);
    assert!(report.guidance.iter().any(|g| g.contains("no database workload existed")));
}

#[tokio::test]
async fn apply_failure_after_cutover_needs_manual_recovery() {
    let cluster = legacy_with(records()).await;
    cluster.fail_apply("admission webhook denied the request").await;
    let h = harness_with(cluster, fast_config());

    let report = migrate(&h).await;

    assert_eq!(report.failed_phase(), Some(MigrationPhase::Provisioning));
    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::PostCutoverDegradation);
    assert_eq!(report.exit_code(), 2);
    assert!(!report.rolled_back);
    assert!(report.guidance.iter().any(|g| g.contains("scaled to 0")));
    assert!(report.guidance.iter().any(|g| g.contains("rollback-hint")));

    let legacy = h.cluster.workload(WorkloadKind::Deployment, "mongo").await.unwrap();
    assert_eq!(legacy.desired_replicas, 0);
    assert!(h.cluster.storage(StorageKind::Claim, "mongo-pvc").await.is_none());
    assert_eq!(h.cluster.records_on_volume("mongo-pv").await, Some(records()));
}
