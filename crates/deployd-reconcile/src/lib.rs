//! deployd-reconcile — reconciliation loops that feed the status tracker.
//!
//! One [`Controller`] runs per watched resource kind. Each is the same engine
//! parameterized by a [`ReadinessChecker`]:
//!
//! ```text
//! Controller<C>
//!   ├── informer task
//!   │   ├── WatchSource::watch() + list() → Cache (initial sync)
//!   │   └── Added/Modified/Deleted → Cache + WorkQueue::add(key)
//!   ├── WorkQueue (dedup, one worker per key, per-key exponential backoff)
//!   └── N worker tasks
//!       ├── Cache::get(key) → C::check(object) → Readiness
//!       └── ResourceStatusTracker::set_status(...)
//! ```
//!
//! # Retries
//!
//! A key whose processing fails is re-enqueued through the rate limiter until
//! it has failed `max_retries` consecutive times. It is then dropped and the
//! failure goes to the [`ErrorReporter`] exactly once.
//!
//! [`ClusterController`] bundles the workload, network-service and ingress
//! controllers over a single tracker. [`MemoryCluster`] is an in-process
//! cluster that implements [`WatchSource`] for all three kinds.

pub mod backoff;
pub mod cache;
pub mod checker;
pub mod cluster;
pub mod controller;
pub mod error;
pub mod informer;
pub mod memory;
pub mod objects;
pub mod reporter;
pub mod source;
pub mod workqueue;

pub use backoff::ItemBackoff;
pub use cache::Cache;
pub use checker::{
    IngressChecker, NetworkServiceChecker, Readiness, ReadinessChecker, WorkloadChecker,
};
pub use cluster::{ClusterController, ClusterSources};
pub use controller::{Controller, ControllerSettings};
pub use error::{ReconcileError, ReconcileResult};
pub use memory::{MemoryCluster, MemoryStore};
pub use objects::*;
pub use reporter::{ErrorReporter, LogReporter};
pub use source::{WatchEvent, WatchSource};
pub use workqueue::WorkQueue;
