//! Applying collector workloads and observing their readiness

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams};
use kube::Client;
use serde::Serialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use super::state::Readiness;
use crate::crd::SignalType;
use crate::retry::with_timeout;
use crate::workload::{CollectorRole, CollectorWorkloads};
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting the collector workloads in the cluster
///
/// Allows the synthesis actor to be tested without an API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Server-side apply every object of `workloads`
    async fn apply(&self, workloads: &CollectorWorkloads) -> Result<(), Error>;

    /// Observed readiness of a collector
    async fn readiness(&self, role: CollectorRole) -> Result<Readiness, Error>;

    /// Set the replica count of a gateway
    async fn scale(&self, role: CollectorRole, replicas: i32) -> Result<(), Error>;
}

/// Desired gateway replicas per signal type, written by the Telemetry
/// controller and read whenever gateways are rendered
#[derive(Debug)]
pub struct ReplicaTargets {
    default: i32,
    targets: DashMap<SignalType, i32>,
}

impl ReplicaTargets {
    /// Targets falling back to `default` until set
    pub fn new(default: i32) -> Self {
        Self {
            default,
            targets: DashMap::new(),
        }
    }

    /// Replicas for the gateway of `signal`
    pub fn get(&self, signal: SignalType) -> i32 {
        self.targets.get(&signal).map(|r| *r).unwrap_or(self.default)
    }

    /// Record the replicas for the gateway of `signal`; returns whether the
    /// effective target changed
    pub fn set(&self, signal: SignalType, replicas: i32) -> bool {
        let previous = self.get(signal);
        self.targets.insert(signal, replicas);
        previous != replicas
    }
}

/// Real implementation backed by the Kubernetes API
pub struct WorkloadClientImpl {
    client: Client,
    namespace: String,
    timeout: Duration,
}

impl WorkloadClientImpl {
    /// Create a client managing objects in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            timeout,
        }
    }

    async fn apply_object<T: Serialize>(
        &self,
        resource: &ApiResource,
        name: &str,
        object: &T,
    ) -> Result<(), Error> {
        let obj: DynamicObject = serde_json::from_value(serde_json::to_value(object)?)?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &self.namespace, resource);
        with_timeout(self.timeout, "apply collector object", async {
            api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&obj))
                .await
                .map_err(Error::from)
        })
        .await?;
        debug!(kind = %resource.kind, name = %name, "Applied collector object");
        Ok(())
    }
}

#[async_trait]
impl WorkloadClient for WorkloadClientImpl {
    async fn apply(&self, workloads: &CollectorWorkloads) -> Result<(), Error> {
        let config_map = ApiResource::erase::<ConfigMap>(&());
        let secret = ApiResource::erase::<Secret>(&());
        let service = ApiResource::erase::<Service>(&());
        let daemon_set = ApiResource::erase::<DaemonSet>(&());
        let deployment = ApiResource::erase::<Deployment>(&());

        // Configuration first so new pods never start against stale files
        for cm in &workloads.config_maps {
            self.apply_object(&config_map, &cm.metadata.name, cm).await?;
        }
        for s in &workloads.secrets {
            self.apply_object(&secret, &s.metadata.name, s).await?;
        }
        for svc in &workloads.services {
            self.apply_object(&service, &svc.metadata.name, svc).await?;
        }
        for ds in &workloads.daemon_sets {
            self.apply_object(&daemon_set, &ds.metadata.name, ds).await?;
        }
        for d in &workloads.deployments {
            self.apply_object(&deployment, &d.metadata.name, d).await?;
        }

        info!(
            daemon_sets = workloads.daemon_sets.len(),
            deployments = workloads.deployments.len(),
            "Applied collector workloads"
        );
        Ok(())
    }

    async fn readiness(&self, role: CollectorRole) -> Result<Readiness, Error> {
        let name = role.name();
        if role.is_agent() {
            let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &self.namespace);
            let ds = with_timeout(self.timeout, "get daemonset", async {
                api.get_opt(name).await.map_err(Error::from)
            })
            .await?;
            Ok(ds.as_ref().map(daemon_set_readiness).unwrap_or(Readiness::Missing))
        } else {
            let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
            let deployment = with_timeout(self.timeout, "get deployment", async {
                api.get_opt(name).await.map_err(Error::from)
            })
            .await?;
            Ok(deployment
                .as_ref()
                .map(deployment_readiness)
                .unwrap_or(Readiness::Missing))
        }
    }

    async fn scale(&self, role: CollectorRole, replicas: i32) -> Result<(), Error> {
        if role.is_agent() {
            return Err(Error::internal(format!("{} is not scalable", role.name())));
        }
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        let result = with_timeout(self.timeout, "scale gateway", async {
            api.patch(role.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await
                .map_err(Error::from)
        })
        .await;
        match result {
            Ok(_) => {
                info!(gateway = role.name(), replicas, "Scaled gateway");
                Ok(())
            }
            // Not deployed yet; the replica target is picked up on creation
            Err(Error::Kube(e)) if crate::kube_utils::is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Readiness of a gateway Deployment
pub fn deployment_readiness(deployment: &Deployment) -> Readiness {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deployment.status.as_ref() else {
        return Readiness::RollingOut;
    };

    let stalled = status.conditions.iter().flatten().any(|c| {
        c.type_ == "Progressing"
            && c.status == "False"
            && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
    });
    if stalled {
        return Readiness::NotReady;
    }

    let observed = status.observed_generation.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);

    if deployment.metadata.generation.unwrap_or(0) > observed || updated < desired || total > updated {
        Readiness::RollingOut
    } else if ready < desired {
        Readiness::NotReady
    } else {
        Readiness::Ready
    }
}

/// Readiness of an agent DaemonSet
pub fn daemon_set_readiness(daemon_set: &DaemonSet) -> Readiness {
    let Some(status) = daemon_set.status.as_ref() else {
        return Readiness::RollingOut;
    };
    let desired = status.desired_number_scheduled;
    let updated = status.updated_number_scheduled.unwrap_or(0);
    let observed = status.observed_generation.unwrap_or(0);

    if daemon_set.metadata.generation.unwrap_or(0) > observed || updated < desired {
        Readiness::RollingOut
    } else if status.number_ready < desired {
        Readiness::NotReady
    } else {
        Readiness::Ready
    }
}
