//! Migration state machine.
//!
//! ```text
//! Start ─▶ BackingUp ─▶ Provisioning ─▶ Restoring ─▶ Verifying ─▶ Cleaning ─▶ Done
//!   └──(absent)──────────▲
//! any non-terminal phase ─▶ Failed
//! ```
//!
//! Cutover is the deletion of the legacy claim. Before it, a failure scales
//! the legacy deployment back up; after it, failures are post-cutover
//! degradations and nothing is undone automatically. Legacy objects are only
//! deleted in `Cleaning`, which is reachable only through a successful
//! `Verifying`.

use tracing::Instrument;

use super::controller::Controller;
use super::cancel::CancelToken;
use super::hint::{self, FailureContext};
use super::retry::{poll_until, PollError};
use crate::domain::{
    BackupArtifact, ErrorKind, Inspection, InstanceRef, MigrationAttempt, MigrationError,
    MigrationEvent, MigrationPhase, MigrationReport, StorageKind, Warning, Workload, WorkloadKind,
    WorkloadTopology,
};
use crate::ports::ClusterError;

pub(crate) struct Migration<'a> {
    ctl: &'a Controller,
    cancel: &'a CancelToken,
    inspection: Inspection,
    topology: WorkloadTopology,
    attempt: MigrationAttempt,
    artifact: Option<BackupArtifact>,
    artifact_discarded: bool,
    /// Legacy source was confirmed to hold no user data.
    source_empty: bool,
    restored: bool,
    /// Legacy replica count before we scaled it down.
    scaled_down_from: Option<u32>,
    rolled_back: bool,
    cancel_deferred: bool,
}

impl<'a> Migration<'a> {
    pub(crate) fn new(ctl: &'a Controller, inspection: Inspection, cancel: &'a CancelToken) -> Self {
        let attempt = MigrationAttempt::new(ctl.ids.generate_attempt_id(), ctl.clock.now());
        Self {
            ctl,
            cancel,
            topology: inspection.topology(),
            inspection,
            attempt,
            artifact: None,
            artifact_discarded: false,
            source_empty: false,
            restored: false,
            scaled_down_from: None,
            rolled_back: false,
            cancel_deferred: false,
        }
    }

    pub(crate) async fn run(mut self) -> MigrationReport {
        let span = tracing::info_span!("migrate", attempt = %self.attempt.id, topology = %self.topology);
        let outcome = self.drive().instrument(span.clone()).await;
        if let Err(error) = outcome {
            self.abort(error).instrument(span).await;
        }
        self.into_report()
    }

    async fn drive(&mut self) -> Result<(), MigrationError> {
        self.checkpoint()?;
        if self.topology == WorkloadTopology::Legacy {
            self.enter(MigrationPhase::BackingUp)?;
            self.back_up().await?;
            self.checkpoint()?;
        }
        self.enter(MigrationPhase::Provisioning)?;
        self.provision().await?;
        self.enter(MigrationPhase::Restoring)?;
        self.restore().await;
        self.enter(MigrationPhase::Verifying)?;
        self.verify().await?;
        self.enter(MigrationPhase::Cleaning)?;
        self.clean().await;
        self.enter(MigrationPhase::Done)?;

        let endpoints = self.ctl.config.managed_endpoints();
        tracing::info!(?endpoints, "migration complete");
        self.ctl.events.emit(&MigrationEvent::Completed { endpoints });
        Ok(())
    }

    // ---- bookkeeping ----

    fn enter(&mut self, phase: MigrationPhase) -> Result<(), MigrationError> {
        let from = self.attempt.phase();
        self.attempt
            .advance(phase, self.ctl.clock.now())
            .map_err(|e| MigrationError::new(ErrorKind::Internal, from, e.to_string()))?;
        tracing::info!(%phase, "entering phase");
        self.ctl.events.emit(&MigrationEvent::PhaseEntered {
            attempt_id: self.attempt.id,
            phase,
        });

        let after_cutover_started = !matches!(
            phase,
            MigrationPhase::BackingUp | MigrationPhase::Provisioning | MigrationPhase::Done
        );
        if after_cutover_started && self.cancel.is_cancelled() && !self.cancel_deferred {
            self.cancel_deferred = true;
            tracing::warn!(%phase, "interrupt received after cutover started; finishing the attempt");
            self.ctl.events.emit(&MigrationEvent::CancelDeferred { phase });
        }
        Ok(())
    }

    /// Honour an operator interrupt while the system is still fully legacy.
    fn checkpoint(&self) -> Result<(), MigrationError> {
        if self.cancel.is_cancelled() {
            return Err(MigrationError::new(
                ErrorKind::Interrupted,
                self.attempt.phase(),
                "interrupted by operator before cutover",
            ));
        }
        Ok(())
    }

    fn failure(&self, base: ErrorKind, message: impl Into<String>) -> MigrationError {
        let kind = if self.attempt.is_rollback_eligible() {
            base
        } else {
            ErrorKind::PostCutoverDegradation
        };
        MigrationError::new(kind, self.attempt.phase(), message)
    }

    fn cluster_failure(&self, context: &str, e: ClusterError) -> MigrationError {
        self.failure(e.kind(), format!("{context}: {e}"))
    }

    fn warn(&mut self, warning: Warning) {
        tracing::warn!(
            phase = %warning.phase,
            data_loss_risk = warning.data_loss_risk,
            "{}",
            warning.message
        );
        self.ctl.events.emit(&MigrationEvent::Warning(warning.clone()));
        self.attempt.warn(warning);
    }

    fn managed_instance(&self, ordinal: u32) -> InstanceRef {
        let spec = self.ctl.config.managed_spec();
        InstanceRef::new(spec.name.clone(), spec.instance_name(ordinal))
            .with_container(Some(spec.container_name))
    }

    async fn legacy_instance(&self, legacy: &Workload) -> Result<Option<InstanceRef>, ClusterError> {
        let instances = self.ctl.cluster.list_instances(legacy).await?;
        let chosen = instances
            .iter()
            .find(|i| i.ready)
            .or_else(|| instances.first());
        Ok(chosen.map(|i| {
            InstanceRef::new(legacy.name.clone(), i.name.clone())
                .with_container(self.ctl.config.database.container.clone())
        }))
    }

    // ---- phases ----

    async fn back_up(&mut self) -> Result<(), MigrationError> {
        let Some(legacy) = self.inspection.legacy.clone() else {
            return Ok(());
        };
        let instance = self
            .legacy_instance(&legacy)
            .await
            .map_err(|e| self.cluster_failure("listing legacy instances", e))?;
        let Some(instance) = instance else {
            return self.unreachable_source(format!(
                "legacy deployment {} has no running instance",
                legacy.name
            ));
        };

        match self.ctl.agent.backup(&instance).await {
            Ok(Some(artifact)) => {
                self.artifact = Some(artifact);
                Ok(())
            }
            Ok(None) => {
                self.source_empty = true;
                self.warn(Warning::new(
                    MigrationPhase::BackingUp,
                    format!("{instance} holds no user data; continuing without a backup"),
                ));
                Ok(())
            }
            Err(e) if e.is_unreachable() => self.unreachable_source(e.to_string()),
            Err(e) => Err(self.failure(e.kind(), format!("backup of {instance} failed: {e}"))),
        }
    }

    fn unreachable_source(&mut self, detail: String) -> Result<(), MigrationError> {
        if self.ctl.config.backup.allow_unreachable_source {
            self.warn(Warning::risky(
                MigrationPhase::BackingUp,
                format!("{detail}; continuing without a backup, the legacy volume will be kept"),
            ));
            Ok(())
        } else {
            Err(self.failure(
                ErrorKind::DataIntegrityRisk,
                format!("{detail}; refusing to continue without a backup"),
            ))
        }
    }

    async fn provision(&mut self) -> Result<(), MigrationError> {
        let ctl = self.ctl;
        let config = &ctl.config;

        if let Some(legacy) = self.inspection.legacy.clone() {
            self.stop_legacy(&legacy).await?;

            self.attempt.mark_cutover();
            tracing::info!(claim = %config.legacy.claim, "releasing legacy claim");
            ctl.cluster
                .delete_storage(StorageKind::Claim, &config.legacy.claim)
                .await
                .map_err(|e| self.cluster_failure("deleting legacy claim", e))?;
        } else if self.inspection.has_orphaned_legacy_storage() {
            self.warn(Warning::new(
                MigrationPhase::Provisioning,
                "legacy storage exists without a legacy deployment; leaving it untouched",
            ));
        }

        let spec = config.managed_spec();
        ctl.cluster
            .apply_workload(&spec)
            .await
            .map_err(|e| self.cluster_failure("applying managed workload", e))?;

        let name = spec.name.as_str();
        let timeouts = &config.timeouts;
        poll_until(timeouts.poll_interval(), timeouts.readiness(), || async move {
            let workload = ctl
                .cluster
                .get_workload(WorkloadKind::StatefulSet, name)
                .await?;
            Ok::<_, ClusterError>(workload.filter(Workload::is_ready).map(|_| ()))
        })
        .await
        .map_err(|e| match e {
            PollError::TimedOut { timeout } => self.failure(
                ErrorKind::TransientInfra,
                format!("managed workload {name} not ready within {timeout:?}"),
            ),
            PollError::Check(e) => self.cluster_failure("watching managed workload", e),
        })?;
        tracing::info!(statefulset = %name, replicas = spec.replicas, "managed workload ready");
        Ok(())
    }

    async fn stop_legacy(&mut self, legacy: &Workload) -> Result<(), MigrationError> {
        let ctl = self.ctl;
        if legacy.desired_replicas > 0 {
            self.scaled_down_from = Some(legacy.desired_replicas);
            tracing::info!(deployment = %legacy.name, "scaling legacy deployment to zero");
            ctl.cluster
                .scale_workload(WorkloadKind::Deployment, &legacy.name, 0)
                .await
                .map_err(|e| self.cluster_failure("scaling legacy deployment down", e))?;
        }

        let timeouts = &ctl.config.timeouts;
        poll_until(timeouts.poll_interval(), timeouts.termination(), || async move {
            let instances = ctl.cluster.list_instances(legacy).await?;
            Ok::<_, ClusterError>(instances.is_empty().then_some(()))
        })
        .await
        .map_err(|e| match e {
            PollError::TimedOut { timeout } => self.failure(
                ErrorKind::TransientInfra,
                format!("legacy instance did not terminate within {timeout:?}"),
            ),
            PollError::Check(e) => self.cluster_failure("watching legacy instances", e),
        })?;
        tracing::info!(deployment = %legacy.name, "legacy instance terminated");
        Ok(())
    }

    /// Restore failures are downgraded to a data-loss warning.
    async fn restore(&mut self) {
        let Some(artifact) = self.artifact.clone() else {
            tracing::info!("no backup artifact; the managed instance starts empty");
            return;
        };
        let instance = self.managed_instance(0);
        match self.ctl.agent.restore(&instance, &artifact).await {
            Ok(()) => self.restored = true,
            Err(e) => self.warn(Warning::risky(
                MigrationPhase::Restoring,
                format!(
                    "restore into {instance} failed: {e}; artifact kept at {}",
                    artifact.location.display()
                ),
            )),
        }
    }

    async fn verify(&mut self) -> Result<(), MigrationError> {
        let ctl = self.ctl;
        let policy = ctl.config.probe.retry_policy();
        for ordinal in 0..ctl.config.managed.replicas {
            let instance = self.managed_instance(ordinal);
            if let Err(e) = ctl.verifier.probe_detailed(&instance, &policy).await {
                let base = match e.kind() {
                    ErrorKind::ConfigurationError => ErrorKind::ConfigurationError,
                    _ => ErrorKind::TransientInfra,
                };
                return Err(self.failure(
                    base,
                    format!("{instance} did not answer the liveness probe: {e}"),
                ));
            }
        }
        Ok(())
    }

    /// Cleanup errors are warnings.
    async fn clean(&mut self) {
        let ctl = self.ctl;
        if let Some(legacy) = self.inspection.legacy.clone() {
            match ctl
                .cluster
                .delete_workload(WorkloadKind::Deployment, &legacy.name)
                .await
            {
                Ok(_) => tracing::info!(deployment = %legacy.name, "legacy deployment deleted"),
                Err(e) => self.warn(Warning::new(
                    MigrationPhase::Cleaning,
                    format!("deleting legacy deployment {}: {e}", legacy.name),
                )),
            }
            if let Some(volume) = self.inspection.legacy_volume.clone() {
                self.clean_volume(&volume.name).await;
            }
        }

        if let Some(artifact) = self.artifact.clone() {
            if self.restored && !ctl.config.backup.retain_artifact {
                match ctl.store.discard(&artifact).await {
                    Ok(()) => {
                        self.artifact_discarded = true;
                        tracing::info!(artifact = %artifact.id, "backup artifact discarded");
                    }
                    Err(e) => self.warn(Warning::new(
                        MigrationPhase::Cleaning,
                        format!("discarding artifact {}: {e}", artifact.id),
                    )),
                }
            } else {
                tracing::info!(location = %artifact.location.display(), "backup artifact retained");
            }
        }
    }

    async fn clean_volume(&mut self, volume: &str) {
        let ctl = self.ctl;
        if !(self.source_empty || self.restored) {
            self.warn(Warning::new(
                MigrationPhase::Cleaning,
                format!("legacy volume {volume} kept: no verified copy of its data exists"),
            ));
            return;
        }
        match ctl.cluster.get_storage(StorageKind::Volume, volume).await {
            Ok(None) => return,
            Ok(Some(binding)) => {
                if let Some(claim) = binding.bound_to.filter(|c| *c != ctl.config.legacy.claim) {
                    self.warn(Warning::new(
                        MigrationPhase::Cleaning,
                        format!("legacy volume {volume} is now bound to {claim}; left in place"),
                    ));
                    return;
                }
            }
            Err(e) => {
                self.warn(Warning::new(
                    MigrationPhase::Cleaning,
                    format!("inspecting legacy volume {volume}: {e}"),
                ));
                return;
            }
        }
        match ctl.cluster.delete_storage(StorageKind::Volume, volume).await {
            Ok(_) => tracing::info!(%volume, "legacy volume deleted"),
            Err(e) => self.warn(Warning::new(
                MigrationPhase::Cleaning,
                format!("deleting legacy volume {volume}: {e}"),
            )),
        }
    }

    // ---- termination ----

    async fn abort(&mut self, error: MigrationError) {
        let ctl = self.ctl;
        if self.attempt.is_rollback_eligible() {
            if let (Some(replicas), Some(legacy)) =
                (self.scaled_down_from, self.inspection.legacy.clone())
            {
                match ctl
                    .cluster
                    .scale_workload(WorkloadKind::Deployment, &legacy.name, replicas)
                    .await
                {
                    Ok(()) => {
                        self.rolled_back = true;
                        tracing::info!(deployment = %legacy.name, replicas, "legacy deployment scaled back up");
                        ctl.events.emit(&MigrationEvent::RolledBack {
                            workload: legacy.name.clone(),
                            replicas,
                        });
                    }
                    Err(e) => {
                        let phase = self.attempt.phase();
                        self.warn(Warning::new(
                            phase,
                            format!("scaling {} back to {replicas} failed: {e}", legacy.name),
                        ));
                    }
                }
            }
        }

        tracing::error!(phase = %error.phase, kind = %error.kind, "{}", error.message);
        ctl.events.emit(&MigrationEvent::Failed {
            phase: error.phase,
            kind: error.kind,
            message: error.message.clone(),
        });
        self.attempt.fail(error, ctl.clock.now());
    }

    fn into_report(self) -> MigrationReport {
        let config = &self.ctl.config;
        let done = self.attempt.phase() == MigrationPhase::Done;
        let endpoints = if done {
            config.managed_endpoints()
        } else {
            Vec::new()
        };
        let artifact = self.artifact.clone().filter(|_| !self.artifact_discarded);

        let guidance = match self.attempt.last_error() {
            Some(error) => {
                let ctx = FailureContext {
                    error,
                    rolled_back: self.rolled_back,
                    legacy_replicas: self
                        .scaled_down_from
                        .or(self.inspection.legacy.as_ref().map(|l| l.desired_replicas)),
                    artifact: self.artifact.as_ref(),
                    legacy_volume: self.inspection.legacy_volume.as_ref().map(|v| v.name.as_str()),
                };
                hint::failure_guidance(&ctx, config)
            }
            None => artifact
                .iter()
                .map(|a| {
                    format!(
                        "backup retained at {}; delete it once the migrated data is confirmed",
                        a.location.display()
                    )
                })
                .collect(),
        };

        let mut report =
            MigrationReport::from_attempt(self.topology, &self.attempt, artifact, endpoints);
        report.rolled_back = self.rolled_back;
        report.guidance = guidance;
        report
    }
}
