//! deployd-monitor — tracks the lifecycle status of created resources.
//!
//! The [`ResourceStatusTracker`] is the single source of truth for "is this
//! thing up yet". The executor registers every resource a deployer creates in
//! `Pending`; the reconciliation loops write observed statuses; the API reads
//! snapshots and convergence summaries.

pub mod tracker;

pub use tracker::{ConvergenceSummary, ResourceStatusTracker};
