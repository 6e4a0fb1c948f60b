//! TopologyInspector - read-only view of the current deployment shape.

use std::sync::Arc;

use crate::config::BerthConfig;
use crate::domain::{Inspection, StorageKind, WorkloadKind};
use crate::ports::{ClusterClient, ClusterError};

pub struct TopologyInspector {
    cluster: Arc<dyn ClusterClient>,
    config: Arc<BerthConfig>,
}

impl TopologyInspector {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: Arc<BerthConfig>) -> Self {
        Self { cluster, config }
    }

    /// Observe legacy and managed objects. Issues reads only.
    pub async fn inspect(&self) -> Result<Inspection, ClusterError> {
        let legacy_cfg = &self.config.legacy;
        let legacy = self
            .cluster
            .get_workload(WorkloadKind::Deployment, &legacy_cfg.deployment)
            .await?;
        let legacy_claim = self
            .cluster
            .get_storage(StorageKind::Claim, &legacy_cfg.claim)
            .await?;

        // configured name first, then whatever the claim is bound to
        let volume_name = legacy_cfg
            .volume
            .clone()
            .or_else(|| legacy_claim.as_ref().and_then(|c| c.bound_to.clone()));
        let legacy_volume = match volume_name {
            Some(name) => self.cluster.get_storage(StorageKind::Volume, &name).await?,
            None => None,
        };

        let spec = self.config.managed_spec();
        let managed = self
            .cluster
            .get_workload(WorkloadKind::StatefulSet, &spec.name)
            .await?;
        let mut managed_claims = Vec::new();
        for claim in spec.claim_names() {
            if let Some(binding) = self.cluster.get_storage(StorageKind::Claim, &claim).await? {
                managed_claims.push(binding);
            }
        }

        let inspection = Inspection {
            legacy,
            legacy_claim,
            legacy_volume,
            managed,
            managed_claims,
        };
        tracing::debug!(topology = %inspection.topology(), "inspected");
        Ok(inspection)
    }
}
