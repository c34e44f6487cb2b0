//! Shared controller context

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;

use super::actor::{ActorDeps, SynthesisActor, SynthesisHandle};
use super::pipeline::{PipelineStore, PipelineStoreImpl};
use super::telemetry::{TelemetryStore, TelemetryStoreImpl};
use super::workload::{ReplicaTargets, WorkloadClient, WorkloadClientImpl};
use crate::config::OperatorConfig;
use crate::crd::SignalType;
use crate::retry::BackoffTracker;
use crate::secrets::{SecretReader, SecretReaderImpl, SecretResolver};
use crate::selfmonitor::FlowHealthRegistry;
use crate::validation::SpecValidator;
use crate::Error;

/// Controller context shared by the pipeline and Telemetry controllers
///
/// The context is shared across all reconciliation calls and holds the
/// cluster seams, the synthesis actors and the state they share.
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(config)
///     .client(client)
///     .build(&cancel)?;
/// ```
pub struct Context {
    /// Pipeline objects
    pub store: Arc<dyn PipelineStore>,
    /// Telemetry module status
    pub telemetry: Arc<dyn TelemetryStore>,
    /// Collector workloads
    pub workloads: Arc<dyn WorkloadClient>,
    /// Credential resolution and drift detection
    pub resolver: Arc<SecretResolver>,
    /// Flow health written by the self-monitor
    pub registry: Arc<FlowHealthRegistry>,
    /// Gateway replica targets
    pub replicas: Arc<ReplicaTargets>,
    /// Spec checks
    pub validator: SpecValidator,
    /// Per-object requeue delays after failures
    pub backoff: BackoffTracker,
    /// Operator configuration
    pub config: OperatorConfig,
    actors: BTreeMap<SignalType, SynthesisHandle>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(config: OperatorConfig) -> ContextBuilder {
        ContextBuilder::new(config)
    }

    /// Synthesis actor of `signal`
    pub fn actor(&self, signal: SignalType) -> Result<&SynthesisHandle, Error> {
        self.actors
            .get(&signal)
            .ok_or_else(|| Error::internal(format!("no synthesis actor for {signal}")))
    }
}

/// Builder for constructing [`Context`] instances
///
/// Seams not set explicitly are backed by the Kubernetes client:
///
/// ```ignore
/// let ctx = Context::builder(config)
///     .store(Arc::new(fake_store))
///     .workloads(Arc::new(fake_workloads))
///     .secret_reader(Arc::new(fake_reader))
///     .telemetry_store(Arc::new(fake_telemetry))
///     .build(&cancel)?;
/// ```
pub struct ContextBuilder {
    config: OperatorConfig,
    client: Option<Client>,
    store: Option<Arc<dyn PipelineStore>>,
    telemetry: Option<Arc<dyn TelemetryStore>>,
    workloads: Option<Arc<dyn WorkloadClient>>,
    secret_reader: Option<Arc<dyn SecretReader>>,
    registry: Option<Arc<FlowHealthRegistry>>,
}

impl ContextBuilder {
    fn new(config: OperatorConfig) -> Self {
        Self {
            config,
            client: None,
            store: None,
            telemetry: None,
            workloads: None,
            secret_reader: None,
            registry: None,
        }
    }

    /// Kubernetes client backing every seam not overridden
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Override the pipeline store
    pub fn store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the Telemetry status writer
    pub fn telemetry_store(mut self, telemetry: Arc<dyn TelemetryStore>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Override the workload client
    pub fn workloads(mut self, workloads: Arc<dyn WorkloadClient>) -> Self {
        self.workloads = Some(workloads);
        self
    }

    /// Override the secret reader
    pub fn secret_reader(mut self, reader: Arc<dyn SecretReader>) -> Self {
        self.secret_reader = Some(reader);
        self
    }

    /// Share a flow-health registry with a self-monitor
    pub fn registry(mut self, registry: Arc<FlowHealthRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the Context and spawn one synthesis actor per signal type.
    /// The actors stop when `cancel` fires.
    pub fn build(self, cancel: &CancellationToken) -> Result<Context, Error> {
        let config = self.config;
        let timeout = config.api_timeout;
        let client = self.client;
        let missing = |seam: &str| Error::internal(format!("no {seam} and no kubernetes client"));

        let store: Arc<dyn PipelineStore> = match (self.store, &client) {
            (Some(store), _) => store,
            (None, Some(c)) => Arc::new(PipelineStoreImpl::new(c.clone(), timeout)),
            (None, None) => return Err(missing("pipeline store")),
        };
        let telemetry: Arc<dyn TelemetryStore> = match (self.telemetry, &client) {
            (Some(telemetry), _) => telemetry,
            (None, Some(c)) => Arc::new(TelemetryStoreImpl::new(c.clone(), timeout)),
            (None, None) => return Err(missing("telemetry store")),
        };
        let workloads: Arc<dyn WorkloadClient> = match (self.workloads, &client) {
            (Some(workloads), _) => workloads,
            (None, Some(c)) => Arc::new(WorkloadClientImpl::new(
                c.clone(),
                config.namespace.clone(),
                timeout,
            )),
            (None, None) => return Err(missing("workload client")),
        };
        let reader: Arc<dyn SecretReader> = match (self.secret_reader, &client) {
            (Some(reader), _) => reader,
            (None, Some(c)) => Arc::new(SecretReaderImpl::new(c.clone(), timeout)),
            (None, None) => return Err(missing("secret reader")),
        };

        let resolver = Arc::new(SecretResolver::new(reader, config.retry.clone()));
        let registry = self.registry.unwrap_or_default();
        let replicas = Arc::new(ReplicaTargets::new(config.default_gateway_replicas));
        let validator = SpecValidator::new(config.denied_filter_plugins.clone());

        let deps = ActorDeps {
            store: store.clone(),
            resolver: resolver.clone(),
            validator: validator.clone(),
            workloads: workloads.clone(),
            registry: registry.clone(),
            replicas: replicas.clone(),
        };
        let actors = SignalType::ALL
            .into_iter()
            .map(|signal| {
                let actor = SynthesisActor::new(signal, deps.clone(), &config);
                (signal, actor.spawn(cancel.child_token()))
            })
            .collect();

        Ok(Context {
            store,
            telemetry,
            workloads,
            resolver,
            registry,
            replicas,
            validator,
            backoff: BackoffTracker::new(config.requeue_backoff.clone()),
            config,
            actors,
        })
    }
}
