//! Fragment executor — deploys a fragment stage by stage.
//!
//! ```text
//! for each stage, in order:
//!   factory.deployers(request, stage)
//!   for each deployer: build() → deploy(controller)
//!   on failure: undeploy this stage's deployed work, stop
//! ```
//!
//! Rollback is scoped to the failing stage. Deployers of that stage that
//! completed are undeployed in reverse order, as is the failing deployer when
//! it registered at least one resource before failing. Earlier stages stay
//! deployed and their resources stay tracked.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use deployd_core::config::ExecutorConfig;
use deployd_core::{
    DeployError, DeployResult, Deployer, DeployerFactory, DeploymentController, FragmentRequest,
    RequestId, ResourceIdentity, ResourceStatus, Stage, StageId,
};

use crate::error::{ExecutorError, ExecutorResult};
use crate::queue::RequestQueue;

/// Result of one executed fragment, kept for the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentOutcome {
    pub request_id: RequestId,
    pub fragment_id: String,
    pub app_instance_id: String,
    pub succeeded: bool,
    /// Stages that deployed fully.
    pub completed_stages: usize,
    pub failed_stage: Option<StageId>,
    pub error: Option<String>,
}

pub struct FragmentExecutor {
    queue: Arc<RequestQueue>,
    factory: Arc<dyn DeployerFactory>,
    controller: Arc<dyn DeploymentController>,
    history: RwLock<VecDeque<FragmentOutcome>>,
    history_size: usize,
}

impl FragmentExecutor {
    pub fn new(
        queue: Arc<RequestQueue>,
        factory: Arc<dyn DeployerFactory>,
        controller: Arc<dyn DeploymentController>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            queue,
            factory,
            controller,
            history: RwLock::new(VecDeque::new()),
            history_size: config.history_size,
        }
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// Recent outcomes, oldest first.
    pub fn outcomes(&self) -> Vec<FragmentOutcome> {
        let history = self.history.read().expect("history lock");
        history.iter().cloned().collect()
    }

    /// Execute requests from the queue until shutdown or until the queue is
    /// closed and drained. A fragment that already started runs to completion.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("fragment executor started");
        loop {
            let request = tokio::select! {
                next = self.queue.next() => match next {
                    Some(request) => request,
                    None => {
                        info!("request queue closed");
                        break;
                    }
                },
                _ = stop_requested(&mut shutdown) => break,
            };

            // Errors are recorded in the outcome history.
            let _ = self.execute(&request).await;
        }
        info!("fragment executor stopped");
    }

    /// Deploy every stage of `request` in order.
    pub async fn execute(&self, request: &FragmentRequest) -> ExecutorResult<()> {
        let request_id = &request.request_id;
        let mut completed_stages = 0;

        let result = match request.validate() {
            Err(e) => Err(ExecutorError::Invalid(e)),
            Ok(()) => {
                info!(
                    %request_id,
                    fragment = %request.fragment_id,
                    app = %request.app_instance_id,
                    stages = request.stages.len(),
                    services = request.service_count(),
                    "executing fragment"
                );
                let mut result = Ok(());
                for (index, stage) in request.stages.iter().enumerate() {
                    info!(
                        %request_id,
                        stage = %stage.stage_id,
                        services = stage.services.len(),
                        "stage {}/{}",
                        index + 1,
                        request.stages.len()
                    );
                    if let Err(source) = self.execute_stage(request, stage).await {
                        error!(
                            %request_id,
                            stage = %stage.stage_id,
                            error = %source,
                            "stage failed"
                        );
                        result = Err(ExecutorError::Stage {
                            request_id: request_id.clone(),
                            stage_id: stage.stage_id.clone(),
                            source,
                        });
                        break;
                    }
                    completed_stages += 1;
                }
                result
            }
        };

        if result.is_ok() {
            info!(%request_id, stages = completed_stages, "fragment deployed");
        }
        self.record(request, completed_stages, &result);
        result
    }

    async fn execute_stage(&self, request: &FragmentRequest, stage: &Stage) -> DeployResult<()> {
        let deployers = self.factory.deployers(request, stage)?;
        if deployers.is_empty() && !stage.services.is_empty() {
            return Err(DeployError::NoDeployers(stage.stage_id.clone()));
        }

        let mut deployed: Vec<Box<dyn Deployer>> = Vec::with_capacity(deployers.len());
        for mut deployer in deployers {
            let recorder = RecordingController::new(self.controller.as_ref());
            let result = match deployer.build() {
                Ok(()) => deployer.deploy(&recorder).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    debug!(
                        stage = %stage.stage_id,
                        resources = recorder.registered(),
                        "deployer finished"
                    );
                    deployed.push(deployer);
                }
                Err(e) => {
                    if recorder.registered() > 0 {
                        deployed.push(deployer);
                    }
                    self.rollback(request, stage, &deployed).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Best-effort undeploy of `deployed`, newest first. Errors are logged.
    async fn rollback(
        &self,
        request: &FragmentRequest,
        stage: &Stage,
        deployed: &[Box<dyn Deployer>],
    ) {
        warn!(
            request_id = %request.request_id,
            stage = %stage.stage_id,
            deployers = deployed.len(),
            "rolling back stage"
        );
        for deployer in deployed.iter().rev() {
            if let Err(e) = deployer.undeploy().await {
                error!(
                    request_id = %request.request_id,
                    stage = %deployer.id(),
                    error = %e,
                    "rollback failed"
                );
            }
        }
    }

    fn record(
        &self,
        request: &FragmentRequest,
        completed_stages: usize,
        result: &ExecutorResult<()>,
    ) {
        if self.history_size == 0 {
            return;
        }
        let outcome = FragmentOutcome {
            request_id: request.request_id.clone(),
            fragment_id: request.fragment_id.clone(),
            app_instance_id: request.app_instance_id.clone(),
            succeeded: result.is_ok(),
            completed_stages,
            failed_stage: result
                .as_ref()
                .err()
                .and_then(|e| e.stage_id())
                .map(str::to_string),
            error: result.as_ref().err().map(|e| e.to_string()),
        };

        let mut history = self.history.write().expect("history lock");
        history.push_back(outcome);
        while history.len() > self.history_size {
            history.pop_front();
        }
    }
}

/// Forwards to the real controller and counts registrations, so a failing
/// deployer can be told apart from one that created nothing.
struct RecordingController<'a> {
    inner: &'a dyn DeploymentController,
    registered: AtomicUsize,
}

impl<'a> RecordingController<'a> {
    fn new(inner: &'a dyn DeploymentController) -> Self {
        Self {
            inner,
            registered: AtomicUsize::new(0),
        }
    }

    fn registered(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }
}

impl DeploymentController for RecordingController<'_> {
    fn add_monitored_resource(&self, identity: ResourceIdentity, stage_id: &str) {
        self.registered.fetch_add(1, Ordering::SeqCst);
        self.inner.add_monitored_resource(identity, stage_id);
    }

    fn set_resource_status(
        &self,
        identity: &ResourceIdentity,
        status: ResourceStatus,
        info: &str,
        endpoint: Option<&str>,
    ) {
        self.inner.set_resource_status(identity, status, info, endpoint);
    }
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
