//! Reconciliation error types.

use std::time::Duration;

use deployd_core::ResourceIdentity;
use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors raised while watching or reconciling objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("timed out after {timeout:?} waiting for {kind} cache to sync")]
    CacheSyncTimeout { kind: &'static str, timeout: Duration },

    #[error("resource {0} is not registered yet")]
    Unregistered(ResourceIdentity),

    #[error("readiness check failed for {key}: {reason}")]
    Check { key: String, reason: String },

    #[error("object already exists: {0}")]
    AlreadyExists(String),
}
