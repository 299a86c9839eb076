//! Domain types for deployd.
//!
//! A `FragmentRequest` is the unit submitted by the controlling party. The
//! executor turns each of its stages into platform resources, and every
//! resource it creates is tracked as a `MonitoredResource` until the
//! reconciliation loops report it converged.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Unique identifier of a fragment-deployment request.
pub type RequestId = String;

/// Unique identifier of a stage within a fragment.
pub type StageId = String;

/// Unique identifier of a service within an application.
pub type ServiceId = String;

/// Unique identifier of a running application instance.
pub type AppInstanceId = String;

/// Label carrying the application instance id on every created object.
pub const LABEL_APP_INSTANCE_ID: &str = "deployd.io/app-instance-id";

/// Label carrying the service id on every created object.
pub const LABEL_SERVICE_ID: &str = "deployd.io/service-id";

/// Label carrying the stage id on every created object.
pub const LABEL_STAGE_ID: &str = "deployd.io/stage-id";

// ── Requests ───────────────────────────────────────────────────────

/// A deployable unit composed of ordered stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FragmentRequest {
    pub request_id: RequestId,
    pub fragment_id: String,
    pub app_instance_id: AppInstanceId,
    /// Stages in execution order.
    pub stages: Vec<Stage>,
}

/// An ordered sub-step of a fragment, executed with its own rollback scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub stage_id: StageId,
    pub services: Vec<ServiceSpec>,
}

/// Service to instantiate. Opaque to the core; consumed by deployers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub service_id: ServiceId,
    pub name: String,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub exposed_ports: Vec<ExposedPort>,
}

/// A port exposed by a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExposedPort {
    pub name: String,
    pub port: u16,
    /// Publish this port through an ingress route.
    #[serde(default)]
    pub public: bool,
}

fn default_replicas() -> u32 {
    1
}

impl FragmentRequest {
    /// Check the request is well-formed before it enters the queue.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.request_id.trim().is_empty() {
            return Err(ValidationError::EmptyRequestId);
        }
        if self.app_instance_id.trim().is_empty() {
            return Err(ValidationError::EmptyAppInstanceId(self.request_id.clone()));
        }
        if self.stages.is_empty() {
            return Err(ValidationError::NoStages(self.request_id.clone()));
        }

        let mut seen = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.stage_id.trim().is_empty() {
                return Err(ValidationError::EmptyStageId { index });
            }
            if !seen.insert(stage.stage_id.as_str()) {
                return Err(ValidationError::DuplicateStage(stage.stage_id.clone()));
            }
        }
        Ok(())
    }

    /// Total number of services across all stages.
    pub fn service_count(&self) -> usize {
        self.stages.iter().map(|s| s.services.len()).sum()
    }
}

// ── Monitored resources ────────────────────────────────────────────

/// Identity of a tracked platform resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub app_instance_id: AppInstanceId,
    pub service_id: ServiceId,
    /// Platform-assigned unique id of the created object.
    pub uid: String,
}

impl ResourceIdentity {
    pub fn new(
        app_instance_id: impl Into<String>,
        service_id: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            app_instance_id: app_instance_id.into(),
            service_id: service_id.into(),
            uid: uid.into(),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_instance_id, self.service_id, self.uid)
    }
}

/// Lifecycle status of a monitored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Registered, no observation yet.
    Pending,
    /// The platform reports the resource is still rolling out.
    Deploying,
    /// Converged and healthy.
    Running,
    /// Available, but some replicas are not.
    Degraded,
    /// The platform reports a failure condition.
    Error,
}

impl ResourceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Deploying => "deploying",
            ResourceStatus::Running => "running",
            ResourceStatus::Degraded => "degraded",
            ResourceStatus::Error => "error",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tracked record for one created resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredResource {
    pub identity: ResourceIdentity,
    /// Stage that created this resource.
    pub stage_id: StageId,
    pub status: ResourceStatus,
    /// Free-text diagnostic info reported with the status.
    pub info: String,
    /// Network endpoint assigned by the platform, if any.
    pub endpoint: Option<String>,
}

impl MonitoredResource {
    /// A freshly registered resource in `Pending`.
    pub fn pending(identity: ResourceIdentity, stage_id: impl Into<String>) -> Self {
        Self {
            identity,
            stage_id: stage_id.into(),
            status: ResourceStatus::Pending,
            info: String::new(),
            endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str) -> ServiceSpec {
        ServiceSpec {
            service_id: id.to_string(),
            name: id.to_string(),
            image: "nginx:1.25".to_string(),
            replicas: 1,
            labels: HashMap::new(),
            env: HashMap::new(),
            exposed_ports: vec![],
        }
    }

    fn request(stages: &[&str]) -> FragmentRequest {
        FragmentRequest {
            request_id: "req-1".to_string(),
            fragment_id: "frag-1".to_string(),
            app_instance_id: "app-1".to_string(),
            stages: stages
                .iter()
                .map(|id| Stage {
                    stage_id: id.to_string(),
                    services: vec![service("svc-a")],
                })
                .collect(),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request(&["s1", "s2"]).validate().is_ok());
    }

    #[test]
    fn empty_request_id_rejected() {
        let mut req = request(&["s1"]);
        req.request_id = " ".to_string();
        assert_eq!(req.validate(), Err(ValidationError::EmptyRequestId));
    }

    #[test]
    fn request_without_stages_rejected() {
        let req = request(&[]);
        assert!(matches!(req.validate(), Err(ValidationError::NoStages(_))));
    }

    #[test]
    fn duplicate_stage_ids_rejected() {
        let req = request(&["s1", "s1"]);
        assert_eq!(
            req.validate(),
            Err(ValidationError::DuplicateStage("s1".to_string()))
        );
    }

    #[test]
    fn empty_stage_id_reports_index() {
        let req = request(&["s1", ""]);
        assert_eq!(req.validate(), Err(ValidationError::EmptyStageId { index: 1 }));
    }

    #[test]
    fn service_spec_defaults_from_json() {
        let json = r#"{"service_id":"web","name":"web","image":"nginx"}"#;
        let spec: ServiceSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.replicas, 1);
        assert!(spec.exposed_ports.is_empty());
    }

    #[test]
    fn identity_display() {
        let id = ResourceIdentity::new("app", "svc", "uid-1");
        assert_eq!(id.to_string(), "app/svc/uid-1");
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ResourceStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
