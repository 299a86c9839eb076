//! Resource status tracker — concurrent map from identity to status.
//!
//! Reconciliation workers read far more often than anything writes, so the
//! map sits behind a `std::sync::RwLock`: readers never block each other and
//! a writer holds the lock only for a single insert or update. The lock is
//! never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, info};

use deployd_core::{DeploymentController, MonitoredResource, ResourceIdentity, ResourceStatus};

/// Cheaply cloneable handle to the shared resource map.
#[derive(Clone, Default)]
pub struct ResourceStatusTracker {
    resources: Arc<RwLock<HashMap<ResourceIdentity, MonitoredResource>>>,
}

/// Per-application convergence counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvergenceSummary {
    pub app_instance_id: String,
    pub total: usize,
    pub pending: usize,
    pub deploying: usize,
    pub running: usize,
    pub degraded: usize,
    pub error: usize,
    /// Every tracked resource of the application is running.
    pub converged: bool,
}

impl ResourceStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a resource in `Pending`.
    ///
    /// Registering an identity that is already tracked updates its stage id
    /// and keeps the status a reconciliation loop may already have written.
    pub fn register(&self, identity: ResourceIdentity, stage_id: &str) {
        let mut resources = self.resources.write().expect("resources lock");
        match resources.get_mut(&identity) {
            Some(existing) => {
                debug!(
                    %identity,
                    stage = stage_id,
                    status = %existing.status,
                    "resource re-registered"
                );
                existing.stage_id = stage_id.to_string();
            }
            None => {
                debug!(%identity, stage = stage_id, "resource registered");
                resources.insert(identity.clone(), MonitoredResource::pending(identity, stage_id));
            }
        }
    }

    /// Record an observed status.
    ///
    /// Returns `false` without changing anything when the identity is not
    /// tracked. The endpoint is replaced only when one is given.
    pub fn set_status(
        &self,
        identity: &ResourceIdentity,
        status: ResourceStatus,
        info: &str,
        endpoint: Option<&str>,
    ) -> bool {
        let mut resources = self.resources.write().expect("resources lock");
        let Some(entry) = resources.get_mut(identity) else {
            debug!(%identity, %status, "status for untracked resource ignored");
            return false;
        };

        if entry.status != status {
            info!(%identity, from = %entry.status, to = %status, "resource status changed");
        }
        entry.status = status;
        entry.info = info.to_string();
        if let Some(endpoint) = endpoint {
            entry.endpoint = Some(endpoint.to_string());
        }
        true
    }

    pub fn is_registered(&self, identity: &ResourceIdentity) -> bool {
        let resources = self.resources.read().expect("resources lock");
        resources.contains_key(identity)
    }

    pub fn get(&self, identity: &ResourceIdentity) -> Option<MonitoredResource> {
        let resources = self.resources.read().expect("resources lock");
        resources.get(identity).cloned()
    }

    /// All tracked resources, ordered by identity.
    pub fn snapshot(&self) -> Vec<MonitoredResource> {
        let resources = self.resources.read().expect("resources lock");
        let mut all: Vec<MonitoredResource> = resources.values().cloned().collect();
        all.sort_by(|a, b| identity_order(&a.identity, &b.identity));
        all
    }

    /// Tracked resources belonging to one application instance.
    pub fn list_for_app(&self, app_instance_id: &str) -> Vec<MonitoredResource> {
        let resources = self.resources.read().expect("resources lock");
        let mut matching: Vec<MonitoredResource> = resources
            .values()
            .filter(|r| r.identity.app_instance_id == app_instance_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| identity_order(&a.identity, &b.identity));
        matching
    }

    pub fn summary(&self, app_instance_id: &str) -> ConvergenceSummary {
        let resources = self.resources.read().expect("resources lock");
        let mut summary = ConvergenceSummary {
            app_instance_id: app_instance_id.to_string(),
            ..Default::default()
        };
        for resource in resources
            .values()
            .filter(|r| r.identity.app_instance_id == app_instance_id)
        {
            summary.total += 1;
            match resource.status {
                ResourceStatus::Pending => summary.pending += 1,
                ResourceStatus::Deploying => summary.deploying += 1,
                ResourceStatus::Running => summary.running += 1,
                ResourceStatus::Degraded => summary.degraded += 1,
                ResourceStatus::Error => summary.error += 1,
            }
        }
        summary.converged = summary.total > 0 && summary.running == summary.total;
        summary
    }

    /// Stop tracking a resource. Only the external boundary calls this.
    pub fn remove(&self, identity: &ResourceIdentity) -> Option<MonitoredResource> {
        let mut resources = self.resources.write().expect("resources lock");
        let removed = resources.remove(identity);
        if removed.is_some() {
            debug!(%identity, "resource removed from tracker");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.resources.read().expect("resources lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeploymentController for ResourceStatusTracker {
    fn add_monitored_resource(&self, identity: ResourceIdentity, stage_id: &str) {
        self.register(identity, stage_id);
    }

    fn set_resource_status(
        &self,
        identity: &ResourceIdentity,
        status: ResourceStatus,
        info: &str,
        endpoint: Option<&str>,
    ) {
        self.set_status(identity, status, info, endpoint);
    }
}

fn identity_order(a: &ResourceIdentity, b: &ResourceIdentity) -> std::cmp::Ordering {
    (&a.app_instance_id, &a.service_id, &a.uid).cmp(&(&b.app_instance_id, &b.service_id, &b.uid))
}
