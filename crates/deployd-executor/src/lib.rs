//! deployd-executor — request queue and stage-sequenced fragment execution.
//!
//! ```text
//! API ──push──▶ RequestQueue ──next──▶ FragmentExecutor
//!                                        │ per stage
//!                                        ├── DeployerFactory::deployers
//!                                        ├── Deployer::build / deploy
//!                                        │     └── DeploymentController::add_monitored_resource
//!                                        └── on failure: undeploy (failing stage only)
//! ```

pub mod error;
pub mod executor;
pub mod queue;

pub use error::{ExecutorError, ExecutorResult, QueueError};
pub use executor::{FragmentExecutor, FragmentOutcome};
pub use queue::RequestQueue;
