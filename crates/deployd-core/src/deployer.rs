//! Capabilities exchanged between the executor and platform deployers.
//!
//! The executor never builds platform objects itself. For every stage it asks
//! a [`DeployerFactory`] for the [`Deployer`]s that materialize the stage's
//! services, and hands each deployer a [`DeploymentController`] so that every
//! object it creates gets registered for monitoring.

use std::future::Future;
use std::pin::Pin;

use crate::error::DeployResult;
use crate::types::{FragmentRequest, ResourceIdentity, ResourceStatus, Stage};

/// Boxed future alias used by the async capabilities.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Exposed by the core to deployers and reconciliation loops.
pub trait DeploymentController: Send + Sync {
    /// Start tracking a resource the platform just accepted.
    fn add_monitored_resource(&self, identity: ResourceIdentity, stage_id: &str);

    /// Record an observed status for a tracked resource.
    fn set_resource_status(
        &self,
        identity: &ResourceIdentity,
        status: ResourceStatus,
        info: &str,
        endpoint: Option<&str>,
    );
}

/// Turns one stage's service specs into concrete platform resources.
pub trait Deployer: Send + Sync {
    /// Stage this deployer belongs to.
    fn id(&self) -> &str;

    /// Materialize the resource descriptors. Called once before `deploy`.
    fn build(&mut self) -> DeployResult<()>;

    /// Submit the built resources, registering each one with `controller`
    /// as soon as the platform accepts it.
    fn deploy<'a>(
        &'a self,
        controller: &'a dyn DeploymentController,
    ) -> BoxFuture<'a, DeployResult<()>>;

    /// Best-effort deletion of everything this deployer created.
    fn undeploy(&self) -> BoxFuture<'_, DeployResult<()>>;
}

/// Produces the deployers for a stage.
pub trait DeployerFactory: Send + Sync {
    fn deployers(
        &self,
        request: &FragmentRequest,
        stage: &Stage,
    ) -> DeployResult<Vec<Box<dyn Deployer>>>;
}
