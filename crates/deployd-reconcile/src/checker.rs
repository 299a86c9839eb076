//! Readiness checks per watched kind.
//!
//! A checker turns an observed object into the status the tracker should
//! record, or [`Readiness::NotReady`] when nothing should be written yet.

use deployd_core::ResourceStatus;

use crate::error::ReconcileResult;
use crate::objects::{ConditionKind, IngressRoute, NetworkService, Resource, Workload};

/// Outcome of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Write this status to the tracker.
    Status {
        status: ResourceStatus,
        info: String,
        endpoint: Option<String>,
    },
    /// Not converged yet; leave the tracked status untouched.
    NotReady,
}

impl Readiness {
    pub fn running() -> Self {
        Readiness::Status {
            status: ResourceStatus::Running,
            info: String::new(),
            endpoint: None,
        }
    }
}

/// Readiness predicate for one kind.
pub trait ReadinessChecker: Send + Sync + 'static {
    type Object: Resource;

    fn check(&self, object: &Self::Object) -> ReconcileResult<Readiness>;
}

// ── Workload ──────────────────────────────────────────────────────

/// Running once every replica is available. Otherwise the status follows the
/// workload's conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadChecker;

impl ReadinessChecker for WorkloadChecker {
    type Object = Workload;

    fn check(&self, workload: &Workload) -> ReconcileResult<Readiness> {
        let status = &workload.status;
        if status.unavailable_replicas == 0 && status.available_replicas > 0 {
            return Ok(Readiness::running());
        }

        let holds = |kind: ConditionKind, value: bool| {
            status
                .conditions
                .iter()
                .any(|c| c.kind == kind && c.status == value)
        };

        let derived = if holds(ConditionKind::ReplicaFailure, true) {
            ResourceStatus::Error
        } else if holds(ConditionKind::Progressing, false) {
            // Progress deadline exceeded.
            ResourceStatus::Error
        } else if holds(ConditionKind::Available, true) {
            ResourceStatus::Degraded
        } else if holds(ConditionKind::Progressing, true) {
            ResourceStatus::Deploying
        } else {
            ResourceStatus::Pending
        };

        let info = status
            .conditions
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("; ");

        Ok(Readiness::Status {
            status: derived,
            info,
            endpoint: None,
        })
    }
}

// ── Network service ───────────────────────────────────────────────

/// A network service is considered ready as soon as it is observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkServiceChecker;

impl ReadinessChecker for NetworkServiceChecker {
    type Object = NetworkService;

    fn check(&self, _service: &NetworkService) -> ReconcileResult<Readiness> {
        Ok(Readiness::running())
    }
}

// ── Ingress route ─────────────────────────────────────────────────

/// Ready once a load balancer entry has both a hostname and an IP. The
/// hostname becomes the resource endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngressChecker;

impl ReadinessChecker for IngressChecker {
    type Object = IngressRoute;

    fn check(&self, route: &IngressRoute) -> ReconcileResult<Readiness> {
        let Some(entry) = route.load_balancer.iter().find(|lb| lb.is_assigned()) else {
            return Ok(Readiness::NotReady);
        };

        Ok(Readiness::Status {
            status: ResourceStatus::Running,
            info: format!("{} ({})", entry.hostname, entry.ip),
            endpoint: Some(entry.hostname.clone()),
        })
    }
}
