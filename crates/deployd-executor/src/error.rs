//! Executor error types.

use thiserror::Error;

use deployd_core::{DeployError, RequestId, StageId, ValidationError};

/// Errors raised when submitting a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue unavailable")]
    Closed,

    #[error("malformed request: {0}")]
    Malformed(#[from] ValidationError),
}

/// Errors raised while executing a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("invalid request: {0}")]
    Invalid(#[from] ValidationError),

    #[error("request {request_id} failed at stage {stage_id}: {source}")]
    Stage {
        request_id: RequestId,
        stage_id: StageId,
        #[source]
        source: DeployError,
    },
}

impl ExecutorError {
    /// Stage the fragment stopped at, if the failure happened in one.
    pub fn stage_id(&self) -> Option<&str> {
        match self {
            ExecutorError::Invalid(_) => None,
            ExecutorError::Stage { stage_id, .. } => Some(stage_id),
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
