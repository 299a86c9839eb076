//! Component wiring for the daemon.
//!
//! ```text
//! Daemon
//!   ├── MemoryCluster ◀── LocalPlatform (simulated readiness)
//!   ├── ClusterController (workload / network-service / ingress loops)
//!   │     └── ResourceStatusTracker
//!   ├── RequestQueue ──▶ FragmentExecutor ──▶ LocalDeployerFactory
//!   └── REST API (axum)
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use deployd_core::DeploydConfig;
use deployd_executor::{FragmentExecutor, RequestQueue};
use deployd_monitor::ResourceStatusTracker;
use deployd_reconcile::{ClusterController, ControllerSettings, MemoryCluster};

use crate::local::LocalDeployerFactory;
use crate::simulate::LocalPlatform;

pub struct Daemon {
    config: DeploydConfig,
    cluster: MemoryCluster,
    tracker: ResourceStatusTracker,
    controllers: Arc<ClusterController>,
    executor: Arc<FragmentExecutor>,
}

impl Daemon {
    /// Assemble every component over an in-memory cluster.
    pub fn local(config: DeploydConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        if !config.cluster.local {
            anyhow::bail!("only local mode is supported: set cluster.local = true");
        }

        let cluster = MemoryCluster::new(&config.cluster.namespace);
        let tracker = ResourceStatusTracker::new();
        let settings = ControllerSettings::from_config(&config.reconcile)?;
        let controllers = Arc::new(ClusterController::new(
            cluster.sources(),
            tracker.clone(),
            settings,
        ));

        let executor = Arc::new(FragmentExecutor::new(
            Arc::new(RequestQueue::new()),
            Arc::new(LocalDeployerFactory::new(cluster.clone())),
            controllers.clone(),
            config.executor.clone(),
        ));

        info!(namespace = %config.cluster.namespace, "local cluster initialized");
        Ok(Self {
            config,
            cluster,
            tracker,
            controllers,
            executor,
        })
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    pub fn tracker(&self) -> &ResourceStatusTracker {
        &self.tracker
    }

    pub fn executor(&self) -> &Arc<FragmentExecutor> {
        &self.executor
    }

    pub fn router(&self) -> Router {
        deployd_api::build_router(self.executor.clone(), self.tracker.clone())
    }

    /// Spawn the background tasks: reconciliation loops, executor, and the
    /// local platform simulation.
    pub fn start(&self) -> anyhow::Result<Background> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // A controller that fails to sync is logged; the others keep running.
        for handle in self.controllers.run() {
            tasks.push(tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "reconciliation controller failed"),
                    Err(e) => error!(error = %e, "reconciliation controller panicked"),
                }
            }));
        }

        tasks.push(tokio::spawn(self.executor.clone().run(shutdown_rx.clone())));

        let ready_delay = self.config.cluster.ready_delay()?;
        let platform = LocalPlatform::new(self.cluster.clone(), ready_delay);
        tasks.push(tokio::spawn(platform.run(shutdown_rx)));

        info!("background tasks started");
        Ok(Background {
            shutdown,
            controllers: self.controllers.clone(),
            queue: self.executor.queue().clone(),
            tasks,
        })
    }

    /// Serve the API on `port` until `signal` resolves, then stop everything.
    pub async fn serve<F>(self, port: u16, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let background = self.start()?;

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "API server starting");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await;

        background.stop().await;
        served?;
        Ok(())
    }
}

/// Handles to the running background tasks.
pub struct Background {
    shutdown: watch::Sender<bool>,
    controllers: Arc<ClusterController>,
    queue: Arc<RequestQueue>,
    tasks: Vec<JoinHandle<()>>,
}

impl Background {
    /// Close the request queue, signal every task, and wait for them.
    pub async fn stop(self) {
        info!("stopping background tasks");
        self.queue.close();
        let _ = self.shutdown.send(true);
        self.controllers.stop();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task failed");
            }
        }
        info!("background tasks stopped");
    }
}
