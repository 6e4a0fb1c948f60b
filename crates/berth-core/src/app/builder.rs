//! ControllerBuilder - wiring ports and config into a Controller.
//!
//! Validation happens at build time: a missing port or an invalid config is
//! reported before anything touches the cluster.

use std::sync::Arc;

use super::backup_agent::BackupAgent;
use super::controller::Controller;
use super::inspector::TopologyInspector;
use super::verifier::Verifier;
use crate::config::{BerthConfig, ConfigError};
use crate::impls::LocalArtifactStore;
use crate::ports::{
    AdminChannel, ArtifactStore, Clock, ClusterClient, EventSink, IdGenerator, NoopEventSink,
    SystemClock, UlidGenerator,
};

/// ControllerBuilder collects the ports a Controller needs.
///
/// # Example
/// ```ignore
/// let controller = ControllerBuilder::new()
///     .config(config)
///     .cluster(KubectlCluster::new(&config.cluster))
///     .admin(KubectlExecAdmin::new(config.cluster.clone(), config.database.clone()))
///     .build()?;
/// ```
///
/// Required: config, cluster, admin. Defaults: a `LocalArtifactStore` under
/// `backup.artifact_dir`, `SystemClock`, ULID ids on that clock, no events.
#[derive(Default)]
pub struct ControllerBuilder {
    config: Option<BerthConfig>,
    cluster: Option<Arc<dyn ClusterClient>>,
    admin: Option<Arc<dyn AdminChannel>>,
    store: Option<Arc<dyn ArtifactStore>>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing {0}; set it on the builder before build()")]
    Missing(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: BerthConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn cluster(mut self, cluster: impl ClusterClient + 'static) -> Self {
        self.cluster = Some(Arc::new(cluster));
        self
    }

    pub fn admin(mut self, admin: impl AdminChannel + 'static) -> Self {
        self.admin = Some(Arc::new(admin));
        self
    }

    pub fn artifact_store(mut self, store: impl ArtifactStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn event_sink(mut self, events: impl EventSink + 'static) -> Self {
        self.events = Some(Arc::new(events));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    pub fn build(self) -> Result<Controller, BuildError> {
        let config = self.config.ok_or(BuildError::Missing("config"))?;
        config.validate()?;
        let config = Arc::new(config);
        let cluster = self.cluster.ok_or(BuildError::Missing("cluster client"))?;
        let admin = self.admin.ok_or(BuildError::Missing("admin channel"))?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let store = self.store.unwrap_or_else(|| {
            Arc::new(LocalArtifactStore::new(
                config.backup.artifact_dir.clone(),
                Arc::clone(&clock),
            ))
        });
        let events = self.events.unwrap_or_else(|| Arc::new(NoopEventSink));

        Ok(Controller {
            inspector: TopologyInspector::new(Arc::clone(&cluster), Arc::clone(&config)),
            agent: BackupAgent::new(
                Arc::clone(&admin),
                Arc::clone(&store),
                Arc::clone(&ids),
                config.backup.retry_policy(),
            ),
            verifier: Verifier::new(admin),
            config,
            cluster,
            store,
            events,
            clock,
            ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryCluster;

    #[test]
    fn build_succeeds_with_required_ports() {
        let cluster = InMemoryCluster::new();
        let controller = ControllerBuilder::new()
            .config(BerthConfig::default())
            .admin(cluster.admin())
            .cluster(cluster)
            .build();
        assert!(controller.is_ok());
    }

    #[test]
    fn build_reports_missing_admin() {
        let result = ControllerBuilder::new()
            .config(BerthConfig::default())
            .cluster(InMemoryCluster::new())
            .build();
        assert!(matches!(result, Err(BuildError::Missing("admin channel"))));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut config = BerthConfig::default();
        config.managed.replicas = 0;
        let cluster = InMemoryCluster::new();
        let result = ControllerBuilder::new()
            .config(config)
            .admin(cluster.admin())
            .cluster(cluster)
            .build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }
}
