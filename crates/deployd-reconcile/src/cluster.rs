//! Cluster controller — the workload, network-service and ingress
//! controllers over one tracker.
//!
//! This is the [`DeploymentController`] handed to deployers: registrations
//! land in the shared tracker that the three reconciliation loops update.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use deployd_core::{DeploymentController, ResourceIdentity, ResourceStatus};
use deployd_monitor::ResourceStatusTracker;

use crate::checker::{IngressChecker, NetworkServiceChecker, WorkloadChecker};
use crate::controller::{Controller, ControllerSettings};
use crate::error::ReconcileResult;
use crate::objects::{IngressRoute, NetworkService, Workload};
use crate::reporter::{ErrorReporter, LogReporter};
use crate::source::WatchSource;

/// Watch sources for every kind the cluster controller reconciles.
#[derive(Clone)]
pub struct ClusterSources {
    pub workloads: Arc<dyn WatchSource<Workload>>,
    pub services: Arc<dyn WatchSource<NetworkService>>,
    pub ingresses: Arc<dyn WatchSource<IngressRoute>>,
}

pub struct ClusterController {
    tracker: ResourceStatusTracker,
    workloads: Arc<Controller<WorkloadChecker>>,
    services: Arc<Controller<NetworkServiceChecker>>,
    ingresses: Arc<Controller<IngressChecker>>,
    shutdown: watch::Sender<bool>,
}

impl ClusterController {
    pub fn new(
        sources: ClusterSources,
        tracker: ResourceStatusTracker,
        settings: ControllerSettings,
    ) -> Self {
        Self::with_reporter(sources, tracker, settings, Arc::new(LogReporter))
    }

    pub fn with_reporter(
        sources: ClusterSources,
        tracker: ResourceStatusTracker,
        settings: ControllerSettings,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let workloads = Controller::new(
            WorkloadChecker,
            sources.workloads,
            tracker.clone(),
            settings.clone(),
        )
        .with_reporter(reporter.clone());
        let services = Controller::new(
            NetworkServiceChecker,
            sources.services,
            tracker.clone(),
            settings.clone(),
        )
        .with_reporter(reporter.clone());
        let ingresses =
            Controller::new(IngressChecker, sources.ingresses, tracker.clone(), settings)
                .with_reporter(reporter);

        let (shutdown, _) = watch::channel(false);
        Self {
            tracker,
            workloads: Arc::new(workloads),
            services: Arc::new(services),
            ingresses: Arc::new(ingresses),
            shutdown,
        }
    }

    pub fn tracker(&self) -> &ResourceStatusTracker {
        &self.tracker
    }

    /// Spawn the three controllers. Call once.
    ///
    /// Each handle resolves when its controller stops; a cache sync timeout
    /// only affects the controller it happened in.
    pub fn run(&self) -> Vec<JoinHandle<ReconcileResult<()>>> {
        info!("starting cluster controllers");
        vec![
            tokio::spawn(Arc::clone(&self.workloads).run(self.shutdown.subscribe())),
            tokio::spawn(Arc::clone(&self.services).run(self.shutdown.subscribe())),
            tokio::spawn(Arc::clone(&self.ingresses).run(self.shutdown.subscribe())),
        ]
    }

    /// Signal every controller to stop.
    pub fn stop(&self) {
        info!("stopping cluster controllers");
        self.shutdown.send_replace(true);
    }
}

impl DeploymentController for ClusterController {
    fn add_monitored_resource(&self, identity: ResourceIdentity, stage_id: &str) {
        self.tracker.register(identity, stage_id);
    }

    fn set_resource_status(
        &self,
        identity: &ResourceIdentity,
        status: ResourceStatus,
        info: &str,
        endpoint: Option<&str>,
    ) {
        self.tracker.set_status(identity, status, info, endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use deployd_core::{LABEL_APP_INSTANCE_ID, LABEL_SERVICE_ID};

    use crate::memory::MemoryCluster;
    use crate::objects::{LoadBalancerIngress, ObjectMeta};

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta::new("apps", name)
            .with_label(LABEL_APP_INSTANCE_ID, "app-1")
            .with_label(LABEL_SERVICE_ID, "svc-web")
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn reconciles_every_kind_into_one_tracker() {
        let cluster = MemoryCluster::new("apps");
        let controller = ClusterController::new(
            cluster.sources(),
            ResourceStatusTracker::new(),
            ControllerSettings::default(),
        );
        let handles = controller.run();

        let workload = cluster
            .workloads()
            .create(Workload {
                meta: meta("web"),
                replicas: 1,
                ..Default::default()
            })
            .unwrap();
        let service = cluster
            .services()
            .create(NetworkService {
                meta: meta("web"),
                ..Default::default()
            })
            .unwrap();
        let ingress = cluster
            .ingresses()
            .create(IngressRoute {
                meta: meta("web"),
                host: "web.example.com".to_string(),
                load_balancer: vec![],
            })
            .unwrap();

        let ids: Vec<ResourceIdentity> = [&workload.meta, &service.meta, &ingress.meta]
            .iter()
            .map(|m| m.identity().unwrap())
            .collect();
        for id in &ids {
            controller.add_monitored_resource(id.clone(), "stage-1");
        }

        cluster.workloads().update("apps/web", |w| {
            w.status.available_replicas = 1;
        });
        cluster.ingresses().update("apps/web", |r| {
            r.load_balancer = vec![LoadBalancerIngress::new("lb.example.com", "10.0.0.7")];
        });

        let tracker = controller.tracker().clone();
        wait_until(|| {
            ids.iter()
                .all(|id| tracker.get(id).is_some_and(|r| r.status == ResourceStatus::Running))
        })
        .await;
        assert_eq!(
            tracker.get(&ids[2]).unwrap().endpoint.as_deref(),
            Some("lb.example.com")
        );
        assert!(tracker.summary("app-1").converged);

        controller.stop();
        for handle in handles {
            let result = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
            assert!(result.is_ok());
        }
    }
}
