//! Controller - the operations behind the CLI subcommands.
//!
//! Built by `ControllerBuilder`. Holds the ports and the components that sit
//! on them; `migrate` hands one attempt to the state machine.

use std::sync::Arc;

use super::backup_agent::BackupAgent;
use super::cancel::CancelToken;
use super::hint::{self, RollbackHint};
use super::inspector::TopologyInspector;
use super::machine::Migration;
use super::status::StatusView;
use super::verifier::Verifier;
use crate::config::BerthConfig;
use crate::domain::{
    Inspection, MigrationError, MigrationEvent, MigrationPhase, MigrationReport, WorkloadTopology,
};
use crate::ports::{ArtifactStore, ClusterClient, ClusterError, Clock, EventSink, IdGenerator};

pub struct Controller {
    pub(crate) config: Arc<BerthConfig>,
    pub(crate) cluster: Arc<dyn ClusterClient>,
    pub(crate) store: Arc<dyn ArtifactStore>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) inspector: TopologyInspector,
    pub(crate) agent: BackupAgent,
    pub(crate) verifier: Verifier,
}

impl Controller {
    pub fn config(&self) -> &BerthConfig {
        &self.config
    }

    pub async fn inspect(&self) -> Result<Inspection, ClusterError> {
        self.inspector.inspect().await
    }

    pub async fn status(&self) -> Result<StatusView, ClusterError> {
        let inspection = self.inspect().await?;
        Ok(StatusView::from_inspection(inspection, &self.config))
    }

    /// Manual recovery steps for the current cluster state.
    pub async fn rollback_hint(&self) -> Result<RollbackHint, ClusterError> {
        let inspection = self.inspect().await?;
        let latest = match self.store.latest().await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!(error = %e, "could not list backup artifacts");
                None
            }
        };
        Ok(hint::rollback_steps(&inspection, &self.config, latest.as_deref()))
    }

    /// Run one migration attempt to completion.
    ///
    /// Never returns an error: every failure ends up in the report.
    pub async fn migrate(&self, cancel: &CancelToken) -> MigrationReport {
        let inspection = match self.inspect().await {
            Ok(inspection) => inspection,
            Err(e) => {
                let error = MigrationError::new(
                    e.kind(),
                    MigrationPhase::Start,
                    format!("inspection failed: {e}"),
                );
                tracing::error!(error = %error, "cannot inspect cluster");
                self.events.emit(&MigrationEvent::Failed {
                    phase: error.phase,
                    kind: error.kind,
                    message: error.message.clone(),
                });
                return MigrationReport::failed_before_attempt(error);
            }
        };

        let topology = inspection.topology();
        tracing::info!(%topology, "topology inspected");
        self.events.emit(&MigrationEvent::Inspected { topology });

        if topology == WorkloadTopology::Managed {
            tracing::info!("managed topology already in place; nothing to do");
            self.events.emit(&MigrationEvent::AlreadyMigrated);
            return MigrationReport::already_migrated(
                self.config.managed_endpoints(),
                hint::residue_guidance(&inspection, &self.config),
            );
        }

        Migration::new(self, inspection, cancel).run().await
    }
}
