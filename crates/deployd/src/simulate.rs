//! Local platform simulation.
//!
//! Nothing runs the containers of the in-memory cluster, so this task plays
//! the platform's part: a while after a workload or ingress route is created
//! it reports every replica available, or assigns a load balancer entry.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use deployd_reconcile::{
    ConditionKind, IngressRoute, LoadBalancerIngress, MemoryCluster, WatchEvent, WatchSource,
    Workload, WorkloadCondition,
};

/// Address handed out to every simulated load balancer.
const LOCAL_LB_IP: &str = "127.0.0.1";

pub struct LocalPlatform {
    cluster: MemoryCluster,
    ready_delay: Duration,
}

impl LocalPlatform {
    pub fn new(cluster: MemoryCluster, ready_delay: Duration) -> Self {
        Self { cluster, ready_delay }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut workloads = match self.cluster.workloads().watch().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "local platform cannot watch workloads");
                return;
            }
        };
        let mut ingresses = match self.cluster.ingresses().watch().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "local platform cannot watch ingress routes");
                return;
            }
        };
        // Objects created before the watches opened.
        for workload in self.cluster.workloads().list().await.unwrap_or_default() {
            self.schedule_workload(workload);
        }
        for route in self.cluster.ingresses().list().await.unwrap_or_default() {
            self.schedule_ingress(route);
        }
        info!(ready_delay = ?self.ready_delay, "local platform simulation started");

        loop {
            tokio::select! {
                Some(event) = workloads.recv() => {
                    if let WatchEvent::Added(workload) = event {
                        self.schedule_workload(workload);
                    }
                }
                Some(event) = ingresses.recv() => {
                    if let WatchEvent::Added(route) = event {
                        self.schedule_ingress(route);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("local platform simulation stopped");
    }

    fn schedule_workload(&self, workload: Workload) {
        let cluster = self.cluster.clone();
        let delay = self.ready_delay;
        let key = workload.meta.key();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let updated = cluster.workloads().update(&key, |w| {
                w.status.available_replicas = w.replicas.max(1);
                w.status.unavailable_replicas = 0;
                w.status.conditions = vec![
                    WorkloadCondition::new(
                        ConditionKind::Available,
                        true,
                        "MinimumReplicasAvailable",
                        "",
                    ),
                    WorkloadCondition::new(
                        ConditionKind::Progressing,
                        true,
                        "NewReplicaSetAvailable",
                        "",
                    ),
                ];
            });
            if updated.is_some() {
                debug!(%key, "workload replicas available");
            }
        });
    }

    fn schedule_ingress(&self, route: IngressRoute) {
        let cluster = self.cluster.clone();
        let delay = self.ready_delay;
        let key = route.meta.key();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let updated = cluster.ingresses().update(&key, |r| {
                r.load_balancer = vec![LoadBalancerIngress::new(&r.host, LOCAL_LB_IP)];
            });
            if updated.is_some() {
                debug!(%key, "ingress load balancer assigned");
            }
        });
    }
}
