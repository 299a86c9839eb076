//! Local deployers — materialize service specs in a [`MemoryCluster`].
//!
//! Each service becomes a workload and a network service. Services with a
//! public port also get an ingress route. Every object carries the identity
//! labels so the reconciliation controllers can map it back to the tracker.

use std::sync::Mutex;

use tracing::{debug, warn};

use deployd_core::{
    AppInstanceId, DeployError, DeployResult, Deployer, DeployerFactory, DeploymentController,
    FragmentRequest, LABEL_APP_INSTANCE_ID, LABEL_SERVICE_ID, LABEL_STAGE_ID, ServiceSpec, Stage,
    StageId,
};
use deployd_reconcile::{
    IngressRoute, MemoryCluster, NetworkService, ObjectMeta, Resource, Workload,
};

/// One deployer per stage, backed by the in-memory cluster.
pub struct LocalDeployerFactory {
    cluster: MemoryCluster,
}

impl LocalDeployerFactory {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self { cluster }
    }
}

impl DeployerFactory for LocalDeployerFactory {
    fn deployers(
        &self,
        request: &FragmentRequest,
        stage: &Stage,
    ) -> DeployResult<Vec<Box<dyn Deployer>>> {
        if stage.services.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Box::new(LocalDeployer::new(
            self.cluster.clone(),
            &request.app_instance_id,
            stage,
        ))])
    }
}

/// Objects built for one service.
struct ServiceObjects {
    service_id: String,
    workload: Workload,
    network: NetworkService,
    ingress: Option<IngressRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Created {
    Workload(String),
    Network(String),
    Ingress(String),
}

pub struct LocalDeployer {
    cluster: MemoryCluster,
    app_instance_id: AppInstanceId,
    stage_id: StageId,
    services: Vec<ServiceSpec>,
    built: Vec<ServiceObjects>,
    created: Mutex<Vec<Created>>,
}

impl LocalDeployer {
    pub fn new(cluster: MemoryCluster, app_instance_id: &str, stage: &Stage) -> Self {
        Self {
            cluster,
            app_instance_id: app_instance_id.to_string(),
            stage_id: stage.stage_id.clone(),
            services: stage.services.clone(),
            built: Vec::new(),
            created: Mutex::new(Vec::new()),
        }
    }

    fn meta(&self, service: &ServiceSpec) -> ObjectMeta {
        let name = format!("{}-{}", self.app_instance_id, service.name).to_lowercase();
        let mut meta = ObjectMeta::new(self.cluster.namespace(), &name);
        for (key, value) in &service.labels {
            meta = meta.with_label(key, value);
        }
        meta.with_label(LABEL_APP_INSTANCE_ID, &self.app_instance_id)
            .with_label(LABEL_SERVICE_ID, &service.service_id)
            .with_label(LABEL_STAGE_ID, &self.stage_id)
    }

    fn build_service(&self, service: &ServiceSpec) -> DeployResult<ServiceObjects> {
        if service.name.trim().is_empty() {
            return Err(DeployError::Build {
                stage: self.stage_id.clone(),
                reason: format!("service {} has no name", service.service_id),
            });
        }
        if service.image.trim().is_empty() {
            return Err(DeployError::Build {
                stage: self.stage_id.clone(),
                reason: format!("service {} has no image", service.service_id),
            });
        }

        let meta = self.meta(service);
        let ingress = service.exposed_ports.iter().any(|p| p.public).then(|| IngressRoute {
            meta: meta.clone(),
            host: format!("{}.{}.local", service.name, self.app_instance_id).to_lowercase(),
            load_balancer: Vec::new(),
        });

        Ok(ServiceObjects {
            service_id: service.service_id.clone(),
            workload: Workload {
                meta: meta.clone(),
                image: service.image.clone(),
                env: service.env.clone(),
                replicas: service.replicas,
                ..Default::default()
            },
            network: NetworkService {
                meta,
                cluster_ip: None,
                ports: service.exposed_ports.iter().map(|p| p.port).collect(),
            },
            ingress,
        })
    }

    fn record(&self, created: Created) {
        self.created.lock().expect("created lock").push(created);
    }

    /// Register a freshly created object with the controller.
    fn register<K: Resource>(&self, object: &K, controller: &dyn DeploymentController) {
        match object.meta().identity() {
            Some(identity) => {
                debug!(kind = K::KIND, %identity, stage = %self.stage_id, "resource created");
                controller.add_monitored_resource(identity, &self.stage_id);
            }
            None => warn!(kind = K::KIND, key = %object.key(), "created object has no identity"),
        }
    }
}

fn create_error(resource: String, e: impl ToString) -> DeployError {
    DeployError::Create {
        resource,
        reason: e.to_string(),
    }
}

impl Deployer for LocalDeployer {
    fn id(&self) -> &str {
        &self.stage_id
    }

    fn build(&mut self) -> DeployResult<()> {
        let built = self
            .services
            .iter()
            .map(|s| self.build_service(s))
            .collect::<DeployResult<Vec<_>>>()?;
        self.built = built;
        Ok(())
    }

    fn deploy<'a>(
        &'a self,
        controller: &'a dyn DeploymentController,
    ) -> deployd_core::BoxFuture<'a, DeployResult<()>> {
        Box::pin(async move {
            for objects in &self.built {
                debug!(service = %objects.service_id, stage = %self.stage_id, "deploying service");

                let workload = self
                    .cluster
                    .workloads()
                    .create(objects.workload.clone())
                    .map_err(|e| create_error(format!("workload {}", objects.workload.key()), e))?;
                self.record(Created::Workload(workload.key()));
                self.register(&workload, controller);

                let network = self
                    .cluster
                    .services()
                    .create(objects.network.clone())
                    .map_err(|e| {
                        create_error(format!("network service {}", objects.network.key()), e)
                    })?;
                self.record(Created::Network(network.key()));
                self.register(&network, controller);

                if let Some(route) = &objects.ingress {
                    let route = self
                        .cluster
                        .ingresses()
                        .create(route.clone())
                        .map_err(|e| create_error(format!("ingress route {}", route.key()), e))?;
                    self.record(Created::Ingress(route.key()));
                    self.register(&route, controller);
                }
            }
            Ok(())
        })
    }

    fn undeploy(&self) -> deployd_core::BoxFuture<'_, DeployResult<()>> {
        Box::pin(async move {
            let created: Vec<Created> =
                self.created.lock().expect("created lock").drain(..).collect();
            for object in created.into_iter().rev() {
                let removed = match &object {
                    Created::Workload(key) => self.cluster.workloads().delete(key).is_some(),
                    Created::Network(key) => self.cluster.services().delete(key).is_some(),
                    Created::Ingress(key) => self.cluster.ingresses().delete(key).is_some(),
                };
                if !removed {
                    debug!(?object, "object already gone");
                }
            }
            Ok(())
        })
    }
}
