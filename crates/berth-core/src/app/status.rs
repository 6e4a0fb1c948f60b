//! Status - what `berth status` reports.

use std::fmt::Write as _;

use serde::Serialize;

use crate::config::BerthConfig;
use crate::domain::{Inspection, StorageBinding, Workload, WorkloadTopology};

/// Read-only summary of one inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub topology: WorkloadTopology,
    pub needs_migration: bool,
    pub legacy: Option<Workload>,
    pub legacy_claim: Option<StorageBinding>,
    pub legacy_volume: Option<StorageBinding>,
    pub managed: Option<Workload>,
    pub managed_claims: Vec<StorageBinding>,
    /// Managed endpoints; empty unless the managed topology exists.
    pub endpoints: Vec<String>,
}

impl StatusView {
    pub fn from_inspection(inspection: Inspection, config: &BerthConfig) -> Self {
        let topology = inspection.topology();
        let endpoints = match topology {
            WorkloadTopology::Managed => config.managed_endpoints(),
            _ => Vec::new(),
        };
        Self {
            topology,
            needs_migration: topology.needs_migration(),
            legacy: inspection.legacy,
            legacy_claim: inspection.legacy_claim,
            legacy_volume: inspection.legacy_volume,
            managed: inspection.managed,
            managed_claims: inspection.managed_claims,
            endpoints,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "topology: {}", self.topology);
        let _ = writeln!(
            out,
            "migration needed: {}",
            if self.needs_migration { "yes" } else { "no" }
        );
        for workload in [&self.legacy, &self.managed].into_iter().flatten() {
            let _ = writeln!(
                out,
                "{} {}: {}/{} ready{}",
                workload.kind,
                workload.name,
                workload.ready_replicas,
                workload.desired_replicas,
                workload
                    .image
                    .as_ref()
                    .map(|i| format!(" ({i})"))
                    .unwrap_or_default()
            );
        }
        let storage = [&self.legacy_claim, &self.legacy_volume]
            .into_iter()
            .flatten()
            .chain(&self.managed_claims);
        for binding in storage {
            let _ = writeln!(
                out,
                "{} {}: {}{}",
                binding.kind,
                binding.name,
                binding.capacity.as_deref().unwrap_or("?"),
                binding
                    .bound_to
                    .as_ref()
                    .map(|b| format!(" -> {b}"))
                    .unwrap_or_default()
            );
        }
        for endpoint in &self.endpoints {
            let _ = writeln!(out, "endpoint: {endpoint}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StorageKind, WorkloadKind};
    use std::collections::BTreeMap;

    #[test]
    fn legacy_status_lists_storage_and_no_endpoints() {
        let inspection = Inspection {
            legacy: Some(Workload {
                kind: WorkloadKind::Deployment,
                name: "mongo".to_string(),
                desired_replicas: 1,
                ready_replicas: 1,
                image: Some("mongo:4.4".to_string()),
                selector: BTreeMap::new(),
            }),
            legacy_claim: Some(StorageBinding {
                kind: StorageKind::Claim,
                name: "mongo-pvc".to_string(),
                capacity: Some("1Gi".to_string()),
                access_mode: None,
                bound_to: Some("mongo-pv".to_string()),
                owner: None,
            }),
            ..Inspection::default()
        };
        let view = StatusView::from_inspection(inspection, &BerthConfig::default());
        assert!(view.needs_migration);
        assert!(view.endpoints.is_empty());

        let text = view.render_text();
        assert!(text.contains("topology: legacy"));
        assert!(text.contains("deployment mongo: 1/1 ready (mongo:4.4)"));
        assert!(text.contains("pvc mongo-pvc: 1Gi -> mongo-pv"));
    }
}
