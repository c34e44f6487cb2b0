//! Single-writer synthesis per signal type
//!
//! Every pipeline of a signal type contributes to one shared document. Each
//! signal type gets one [`SynthesisActor`] that owns that document, the
//! capacity lock and the last applied fingerprint. Reconciles talk to it
//! through a [`SynthesisHandle`]; requests that queue up while a round runs
//! are answered by the next round together.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::pipeline::{PipelineSnapshot, PipelineStore};
use super::state::{ConfigVerdict, Readiness};
use super::workload::{ReplicaTargets, WorkloadClient};
use crate::config::OperatorConfig;
use crate::crd::{SignalSpec, SignalType};
use crate::secrets::{pipeline_key, tls, SecretResolver};
use crate::selfmonitor::FlowHealthRegistry;
use crate::synthesis::{
    synthesize, CapacityLock, PipelineCandidate, PipelineOutcome, Synthesis, SynthesisOptions,
};
use crate::validation::SpecValidator;
use crate::workload::{CollectorRole, CollectorSettings, WorkloadCompiler};
use crate::Error;

/// Requests waiting in the queue beyond this block the sender
const QUEUE_DEPTH: usize = 64;

/// What one synthesis round decided and observed
#[derive(Clone, Debug, PartialEq)]
pub struct SignalRound {
    /// Signal type of the round
    pub signal: SignalType,
    /// Fingerprint of the applied document
    pub fingerprint: String,
    /// Whether this round applied workloads
    pub deployed: bool,
    /// Verdict per live pipeline
    pub verdicts: BTreeMap<String, ConfigVerdict>,
    /// Readiness of every collector running the document
    pub workloads: Vec<(CollectorRole, Readiness)>,
}

impl SignalRound {
    /// Verdict for `name`, if the round saw it
    pub fn verdict(&self, name: &str) -> Option<ConfigVerdict> {
        self.verdicts.get(name).cloned()
    }

    /// Collectors serving a pipeline with `spec`
    pub fn workloads_for(&self, spec: &SignalSpec) -> Vec<(CollectorRole, Readiness)> {
        let needs_agent = match spec {
            SignalSpec::Metrics(metrics) => metrics.needs_agent(),
            SignalSpec::Logs(_) | SignalSpec::Traces(_) => true,
        };
        self.workloads
            .iter()
            .filter(|(role, _)| role != &CollectorRole::MetricAgent || needs_agent)
            .copied()
            .collect()
    }
}

/// Collaborators shared by the actors of all signal types
#[derive(Clone)]
pub struct ActorDeps {
    /// Pipeline objects
    pub store: Arc<dyn PipelineStore>,
    /// Credential resolution
    pub resolver: Arc<SecretResolver>,
    /// Spec checks
    pub validator: SpecValidator,
    /// Collector workloads
    pub workloads: Arc<dyn WorkloadClient>,
    /// Flow health, told which components the applied document has
    pub registry: Arc<FlowHealthRegistry>,
    /// Gateway replica targets
    pub replicas: Arc<ReplicaTargets>,
}

/// Owner of the document of one signal type
pub struct SynthesisActor {
    signal: SignalType,
    deps: ActorDeps,
    options: SynthesisOptions,
    settings: CollectorSettings,
    lock: CapacityLock,
    /// Fingerprint and gateway replicas of the last applied workloads
    applied: Option<(String, i32)>,
}

type RoundReply = crate::Result<Arc<SignalRound>>;

/// Cloneable sender side of an actor
#[derive(Clone)]
pub struct SynthesisHandle {
    signal: SignalType,
    requests: mpsc::Sender<oneshot::Sender<RoundReply>>,
}

impl SynthesisHandle {
    /// Signal type served
    pub fn signal(&self) -> SignalType {
        self.signal
    }

    /// Ask for a synthesis round and wait for its result
    pub async fn round(&self) -> crate::Result<Arc<SignalRound>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(reply)
            .await
            .map_err(|_| Error::internal(format!("{} synthesis actor stopped", self.signal)))?;
        response
            .await
            .map_err(|_| Error::internal(format!("{} synthesis actor dropped a request", self.signal)))?
    }
}

impl SynthesisActor {
    /// Create the actor for `signal`
    pub fn new(signal: SignalType, deps: ActorDeps, config: &OperatorConfig) -> Self {
        Self {
            signal,
            options: SynthesisOptions::from_config(config),
            settings: CollectorSettings {
                namespace: config.namespace.clone(),
                fluent_bit_image: config.fluent_bit_image.clone(),
                otel_collector_image: config.otel_collector_image.clone(),
                gateway_replicas: config.default_gateway_replicas,
            },
            lock: CapacityLock::new(config.max_pipelines(signal)),
            deps,
            applied: None,
        }
    }

    /// Start the actor on the runtime; it stops when `cancel` fires or every
    /// handle is dropped.
    pub fn spawn(self, cancel: CancellationToken) -> SynthesisHandle {
        let (requests, queue) = mpsc::channel(QUEUE_DEPTH);
        let handle = SynthesisHandle {
            signal: self.signal,
            requests,
        };
        tokio::spawn(self.run(queue, cancel));
        handle
    }

    async fn run(
        mut self,
        mut queue: mpsc::Receiver<oneshot::Sender<RoundReply>>,
        cancel: CancellationToken,
    ) {
        debug!(signal = %self.signal, "Synthesis actor started");
        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                request = queue.recv() => match request {
                    Some(reply) => reply,
                    None => break,
                },
            };
            let mut waiters = vec![first];
            while let Ok(reply) = queue.try_recv() {
                waiters.push(reply);
            }

            let result = self.round().await.map(Arc::new);
            if waiters.len() > 1 {
                debug!(signal = %self.signal, requests = waiters.len(), "Coalesced synthesis requests");
            }
            for waiter in waiters {
                let reply = match &result {
                    Ok(round) => Ok(Arc::clone(round)),
                    Err(e) => Err(share_error(e)),
                };
                let _ = waiter.send(reply);
            }
        }
        debug!(signal = %self.signal, "Synthesis actor stopped");
    }

    /// Run one round: decide every pipeline's verdict, apply the document if
    /// it changed and observe the collectors.
    #[instrument(skip(self), fields(signal = %self.signal))]
    pub async fn round(&mut self) -> crate::Result<SignalRound> {
        let pipelines = self.deps.store.list(self.signal).await?;
        self.lock
            .retain_existing(pipelines.iter().map(|p| p.name.as_str()));

        let mut verdicts = BTreeMap::new();
        let mut valid = Vec::new();
        for pipeline in pipelines {
            let report = self.deps.validator.validate(&pipeline.name, &pipeline.spec);
            if report.is_ok() {
                valid.push(pipeline);
            } else {
                debug!(pipeline = %pipeline.name, violations = %report.message(), "Pipeline rejected");
                verdicts.insert(
                    pipeline.name.clone(),
                    ConfigVerdict::Invalid {
                        reason: report.condition_reason(),
                        message: report.message(),
                    },
                );
            }
        }

        let candidates = self.resolve(valid, &mut verdicts).await?;
        let (candidates, mut expiring) = check_certificates(candidates, &mut verdicts);
        let synthesis = self.synthesize_isolating(candidates, &mut verdicts)?;
        for (name, outcome) in &synthesis.outcomes {
            let verdict = match outcome {
                PipelineOutcome::Admitted => match expiring.remove(name) {
                    Some(message) => ConfigVerdict::CertificateExpiring { message },
                    None => ConfigVerdict::Admitted,
                },
                PipelineOutcome::MaxPipelinesExceeded => ConfigVerdict::MaxPipelinesExceeded,
                PipelineOutcome::Conflict { message } => ConfigVerdict::Conflict {
                    message: message.clone(),
                },
            };
            verdicts.insert(name.clone(), verdict);
        }

        let document = &synthesis.document;
        let fingerprint = document.fingerprint().to_string();
        let replicas = self.deps.replicas.get(self.signal);
        let target = (fingerprint.clone(), replicas);

        let deployed = self.applied.as_ref() != Some(&target);
        if deployed {
            let settings = CollectorSettings {
                gateway_replicas: replicas,
                ..self.settings.clone()
            };
            let workloads = WorkloadCompiler::compile(document, &settings);
            self.deps.workloads.apply(&workloads).await?;
            self.applied = Some(target);
            info!(
                fingerprint = %fingerprint,
                pipelines = document.pipelines().len(),
                "Applied collector configuration"
            );
        }
        self.deps
            .registry
            .publish_components(self.signal, document.monitor_ids().clone());

        let roles = CollectorRole::for_document(document);
        let observed = join_all(roles.iter().map(|role| self.deps.workloads.readiness(*role))).await;
        let mut workloads = Vec::with_capacity(roles.len());
        for (role, readiness) in roles.into_iter().zip(observed) {
            workloads.push((role, readiness?));
        }

        Ok(SignalRound {
            signal: self.signal,
            fingerprint,
            deployed,
            verdicts,
            workloads,
        })
    }

    /// Resolve credentials of every valid pipeline in parallel. A missing or
    /// unreadable secret only excludes its pipeline; any other failure aborts
    /// the round so a partial document is never applied.
    async fn resolve(
        &self,
        pipelines: Vec<PipelineSnapshot>,
        verdicts: &mut BTreeMap<String, ConfigVerdict>,
    ) -> crate::Result<Vec<PipelineCandidate>> {
        let resolutions = join_all(pipelines.iter().map(|p| {
            let key = pipeline_key(self.signal, &p.name);
            async move { self.deps.resolver.resolve_cached(&key, &p.spec).await }
        }))
        .await;

        let mut candidates = Vec::with_capacity(pipelines.len());
        for (pipeline, resolution) in pipelines.into_iter().zip(resolutions) {
            match resolution {
                Ok(credentials) => candidates.push(PipelineCandidate {
                    name: pipeline.name,
                    created: pipeline.created,
                    spec: pipeline.spec,
                    credentials,
                }),
                Err(e @ (Error::SecretNotFound(_) | Error::SecretResolution(_))) => {
                    warn!(pipeline = %pipeline.name, error = %e, "Pipeline credentials unavailable");
                    verdicts.insert(
                        pipeline.name,
                        ConfigVerdict::SecretMissing {
                            message: e.to_string(),
                        },
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(candidates)
    }

    /// Synthesize all candidates; when that fails, find the pipelines whose
    /// routing cannot be rendered on their own and leave them out.
    fn synthesize_isolating(
        &mut self,
        candidates: Vec<PipelineCandidate>,
        verdicts: &mut BTreeMap<String, ConfigVerdict>,
    ) -> crate::Result<Synthesis> {
        let err = match synthesize(self.signal, &candidates, &mut self.lock, &self.options) {
            Ok(synthesis) => return Ok(synthesis),
            Err(e) => e,
        };
        warn!(error = %err, "Synthesis failed, isolating offending pipelines");

        let mut renderable = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut unlimited = CapacityLock::new(0);
            match synthesize(
                self.signal,
                std::slice::from_ref(&candidate),
                &mut unlimited,
                &self.options,
            ) {
                Ok(_) => renderable.push(candidate),
                Err(e) => {
                    self.lock.release(&candidate.name);
                    verdicts.insert(
                        candidate.name,
                        ConfigVerdict::SynthesisFailed {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
        synthesize(self.signal, &renderable, &mut self.lock, &self.options)
    }
}

/// Drop candidates whose TLS material is unusable. Returns the rest, and the
/// expiry notice of each candidate whose certificate expires soon.
fn check_certificates(
    candidates: Vec<PipelineCandidate>,
    verdicts: &mut BTreeMap<String, ConfigVerdict>,
) -> (Vec<PipelineCandidate>, BTreeMap<String, String>) {
    let now = Utc::now();
    let mut usable = Vec::with_capacity(candidates.len());
    let mut expiring = BTreeMap::new();
    for candidate in candidates {
        match tls::check_credentials(&candidate.credentials, now) {
            Ok(None) => usable.push(candidate),
            Ok(Some(warning)) => {
                warn!(pipeline = %candidate.name, %warning, "TLS certificate about to expire");
                expiring.insert(candidate.name.clone(), warning.to_string());
                usable.push(candidate);
            }
            Err(e) => {
                warn!(pipeline = %candidate.name, error = %e, "Pipeline TLS material rejected");
                verdicts.insert(
                    candidate.name,
                    ConfigVerdict::Invalid {
                        reason: e.reason(),
                        message: e.to_string(),
                    },
                );
            }
        }
    }
    (usable, expiring)
}

/// Copy of an error for every waiter of a coalesced round
fn share_error(err: &Error) -> Error {
    match err {
        Error::Kube(e) => Error::deployment(e.to_string()),
        Error::Validation(m) => Error::validation(m.clone()),
        Error::SecretNotFound(m) => Error::secret_not_found(m.clone()),
        Error::SecretResolution(m) => Error::secret_resolution(m.clone()),
        Error::Synthesis(m) => Error::synthesis(m.clone()),
        Error::Deployment(m) => Error::deployment(m.clone()),
        Error::Timeout(m) => Error::timeout(m.clone()),
        Error::Serialization(m) => Error::serialization(m.clone()),
        Error::Internal(m) => Error::internal(m.clone()),
    }
}
