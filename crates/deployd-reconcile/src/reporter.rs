//! Sink for keys that exhausted their retries.

use tracing::error;

use crate::error::ReconcileError;

/// Receives each dropped key exactly once.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, kind: &str, key: &str, error: &ReconcileError);
}

/// Reports dropped keys through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, kind: &str, key: &str, error: &ReconcileError) {
        error!(kind, key, error = %error, "dropping key out of the work queue");
    }
}
