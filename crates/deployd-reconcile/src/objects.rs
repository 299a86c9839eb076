//! Watched platform objects.
//!
//! These mirror the subset of the cluster's object model the readiness
//! checks need: metadata with identity labels, and the status block of each
//! kind.

use std::collections::HashMap;
use std::fmt;

use deployd_core::{LABEL_APP_INSTANCE_ID, LABEL_SERVICE_ID, ResourceIdentity};

/// Build a reconciliation key from namespace and name.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Object metadata common to every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Platform-assigned unique id.
    pub uid: String,
    pub labels: HashMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }

    /// Tracker identity, if the object carries the identity labels.
    pub fn identity(&self) -> Option<ResourceIdentity> {
        let app = self.labels.get(LABEL_APP_INSTANCE_ID)?;
        let service = self.labels.get(LABEL_SERVICE_ID)?;
        if self.uid.is_empty() {
            return None;
        }
        Some(ResourceIdentity::new(app.as_str(), service.as_str(), self.uid.as_str()))
    }
}

/// A watched object kind.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Human-readable kind name used in logs.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> String {
        self.meta().key()
    }
}

// ── Workload ──────────────────────────────────────────────────────

/// Replicated workload (deployment-like).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    pub meta: ObjectMeta,
    pub image: String,
    pub env: HashMap<String, String>,
    pub replicas: u32,
    pub status: WorkloadStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub available_replicas: u32,
    pub unavailable_replicas: u32,
    pub conditions: Vec<WorkloadCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Available,
    Progressing,
    ReplicaFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadCondition {
    pub kind: ConditionKind,
    /// Whether the condition currently holds.
    pub status: bool,
    pub reason: String,
    pub message: String,
}

impl WorkloadCondition {
    pub fn new(kind: ConditionKind, status: bool, reason: &str, message: &str) -> Self {
        Self {
            kind,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for WorkloadCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.status { "True" } else { "False" };
        write!(f, "{:?}={status}", self.kind)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl Resource for Workload {
    const KIND: &'static str = "workload";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

// ── Network service ───────────────────────────────────────────────

/// Stable network address in front of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkService {
    pub meta: ObjectMeta,
    pub cluster_ip: Option<String>,
    pub ports: Vec<u16>,
}

impl Resource for NetworkService {
    const KIND: &'static str = "network-service";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

// ── Ingress route ─────────────────────────────────────────────────

/// Externally reachable route to a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressRoute {
    pub meta: ObjectMeta,
    pub host: String,
    pub load_balancer: Vec<LoadBalancerIngress>,
}

/// One load-balancer entry assigned to an ingress route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerIngress {
    pub hostname: String,
    pub ip: String,
}

impl LoadBalancerIngress {
    pub fn new(hostname: &str, ip: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            ip: ip.to_string(),
        }
    }

    pub fn is_assigned(&self) -> bool {
        !self.hostname.is_empty() && !self.ip.is_empty()
    }
}

impl Resource for IngressRoute {
    const KIND: &'static str = "ingress-route";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}
