//! deployd — the deployment manager daemon.
//!
//! Assembles the deployd subsystems into one process:
//! - Request queue + fragment executor
//! - Reconciliation controllers (workloads, network services, ingress routes)
//! - Resource status tracker
//! - REST API
//!
//! The daemon runs against an in-memory cluster whose objects are made ready
//! by a local platform simulation.

pub mod daemon;
pub mod local;
pub mod simulate;

pub use daemon::{Background, Daemon};
