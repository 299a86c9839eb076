//! Error types shared across deployd crates.

use thiserror::Error;

/// Result type alias for deployer operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// A fragment request that cannot enter the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request id is empty")]
    EmptyRequestId,

    #[error("request {0} has no application instance id")]
    EmptyAppInstanceId(String),

    #[error("request {0} has no stages")]
    NoStages(String),

    #[error("stage at index {index} has an empty id")]
    EmptyStageId { index: usize },

    #[error("duplicate stage id: {0}")]
    DuplicateStage(String),
}

/// Errors raised by deployers while building, creating, or deleting resources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    #[error("build failed for stage {stage}: {reason}")]
    Build { stage: String, reason: String },

    #[error("failed to create {resource}: {reason}")]
    Create { resource: String, reason: String },

    #[error("failed to delete {resource}: {reason}")]
    Delete { resource: String, reason: String },

    #[error("no deployers available for stage {0}")]
    NoDeployers(String),

    #[error("platform error: {0}")]
    Platform(String),
}

/// Errors loading or validating `deployd.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value}")]
    Duration { field: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
