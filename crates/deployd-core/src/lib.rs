//! deployd-core — shared types for the deployd control plane.
//!
//! Defines the fragment/stage request model, the identity and status of
//! monitored resources, the capabilities exchanged between the executor and
//! the platform-specific deployers, and the daemon configuration.
//!
//! # Components
//!
//! - **`types`**: `FragmentRequest`, `Stage`, `ResourceIdentity`, `ResourceStatus`
//! - **`deployer`**: `Deployer`, `DeployerFactory`, `DeploymentController`
//! - **`config`**: `DeploydConfig` (deployd.toml)
//! - **`error`**: validation, deploy, and config errors

pub mod config;
pub mod deployer;
pub mod error;
pub mod types;

pub use config::DeploydConfig;
pub use deployer::{BoxFuture, Deployer, DeployerFactory, DeploymentController};
pub use error::{ConfigError, DeployError, DeployResult, ValidationError};
pub use types::*;
