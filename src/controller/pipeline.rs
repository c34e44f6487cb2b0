//! LogPipeline, MetricPipeline and TracePipeline controller
//!
//! All three kinds share one generic reconcile. A reconcile asks the
//! synthesis actor of its signal type for a round, then writes the status
//! conditions that follow from the round's verdict, the collector readiness
//! and the flow health.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::context::Context;
use super::state::{conditions_changed, PipelineEvaluation, PipelinePhase};
use crate::crd::{LogPipeline, MetricPipeline, SignalSpec, SignalType, TelemetryPipeline, TracePipeline};
use crate::kube_utils::merge_patch_status;
use crate::retry::with_timeout;
use crate::secrets::{pipeline_key, SecretResolver};
use crate::{Error, FIELD_MANAGER, FINALIZER};

/// Requeue delay while a pipeline is not running yet
const PROGRESS_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue delay when the round has not seen the pipeline yet
const UNSEEN_REQUEUE: Duration = Duration::from_secs(2);

/// What the synthesis actor needs to know about one live pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSnapshot {
    /// Object name
    pub name: String,
    /// Creation timestamp
    pub created: Option<DateTime<Utc>>,
    /// Object generation
    pub generation: Option<i64>,
    /// Spec
    pub spec: SignalSpec,
}

impl PipelineSnapshot {
    /// Snapshot of any pipeline kind
    pub fn of<K: TelemetryPipeline>(pipeline: &K) -> Self {
        Self {
            name: pipeline.name_any(),
            created: pipeline.meta().creation_timestamp.as_ref().map(|t| t.0),
            generation: pipeline.meta().generation,
            spec: pipeline.signal_spec(),
        }
    }
}

/// Trait abstracting pipeline objects in the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Every pipeline of `signal` that is not being deleted
    async fn list(&self, signal: SignalType) -> Result<Vec<PipelineSnapshot>, Error>;

    /// Merge-patch the status of a pipeline
    async fn patch_status(
        &self,
        signal: SignalType,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Replace the finalizers of a pipeline
    async fn set_finalizers(
        &self,
        signal: SignalType,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;
}

/// Real store backed by the Kubernetes API
pub struct PipelineStoreImpl {
    client: Client,
    timeout: Duration,
}

impl PipelineStoreImpl {
    /// Create a store bounding every call by `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn list_kind<K: TelemetryPipeline>(&self) -> Result<Vec<PipelineSnapshot>, Error> {
        let api: Api<K> = Api::all(self.client.clone());
        let list = with_timeout(self.timeout, "list pipelines", async {
            api.list(&ListParams::default()).await.map_err(Error::from)
        })
        .await?;
        Ok(list
            .items
            .iter()
            .filter(|p| p.meta().deletion_timestamp.is_none())
            .map(PipelineSnapshot::of)
            .collect())
    }

    async fn patch_status_kind<K: TelemetryPipeline>(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<K> = Api::all(self.client.clone());
        with_timeout(self.timeout, "patch pipeline status", async {
            merge_patch_status(&api, name, patch).await.map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    async fn set_finalizers_kind<K: TelemetryPipeline>(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<K> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        with_timeout(self.timeout, "patch pipeline finalizers", async {
            api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PipelineStore for PipelineStoreImpl {
    async fn list(&self, signal: SignalType) -> Result<Vec<PipelineSnapshot>, Error> {
        match signal {
            SignalType::Logs => self.list_kind::<LogPipeline>().await,
            SignalType::Metrics => self.list_kind::<MetricPipeline>().await,
            SignalType::Traces => self.list_kind::<TracePipeline>().await,
        }
    }

    async fn patch_status(
        &self,
        signal: SignalType,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        match signal {
            SignalType::Logs => self.patch_status_kind::<LogPipeline>(name, patch).await,
            SignalType::Metrics => self.patch_status_kind::<MetricPipeline>(name, patch).await,
            SignalType::Traces => self.patch_status_kind::<TracePipeline>(name, patch).await,
        }
    }

    async fn set_finalizers(
        &self,
        signal: SignalType,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        match signal {
            SignalType::Logs => self.set_finalizers_kind::<LogPipeline>(name, finalizers).await,
            SignalType::Metrics => self.set_finalizers_kind::<MetricPipeline>(name, finalizers).await,
            SignalType::Traces => self.set_finalizers_kind::<TracePipeline>(name, finalizers).await,
        }
    }
}

/// Reconcile a pipeline of any kind
///
/// Deleted pipelines are removed from the document before their finalizer is
/// released. Live pipelines get the finalizer, a synthesis round and fresh
/// status conditions; the status is only written when it changed.
#[instrument(skip(pipeline, ctx), fields(kind = %K::SIGNAL, pipeline = %pipeline.name_any()))]
pub async fn reconcile<K: TelemetryPipeline>(pipeline: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = pipeline_key(K::SIGNAL, &pipeline.name_any());
    let action = with_timeout(
        ctx.config.reconcile_timeout,
        "reconcile pipeline",
        reconcile_pipeline(pipeline.as_ref(), &ctx),
    )
    .await?;
    ctx.backoff.reset(&key);
    Ok(action)
}

async fn reconcile_pipeline<K: TelemetryPipeline>(pipeline: &K, ctx: &Context) -> Result<Action, Error> {
    let signal = K::SIGNAL;
    let name = pipeline.name_any();
    let finalizers = pipeline.finalizers().to_vec();
    let has_finalizer = finalizers.iter().any(|f| f == FINALIZER);

    if pipeline.meta().deletion_timestamp.is_some() {
        if has_finalizer {
            // The store no longer lists the pipeline, so this round drops it
            ctx.actor(signal)?.round().await?;
            ctx.resolver.forget(&pipeline_key(signal, &name));
            ctx.registry.forget(signal, &name);
            let remaining = finalizers.into_iter().filter(|f| f != FINALIZER).collect();
            ctx.store.set_finalizers(signal, &name, remaining).await?;
            info!("Pipeline removed from collector configuration");
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer {
        let mut with_ours = finalizers;
        with_ours.push(FINALIZER.to_string());
        ctx.store.set_finalizers(signal, &name, with_ours).await?;
        debug!("Added finalizer");
    }

    let round = ctx.actor(signal)?.round().await?;
    let Some(verdict) = round.verdict(&name) else {
        debug!("Pipeline not seen by the synthesis round yet");
        return Ok(Action::requeue(UNSEEN_REQUEUE));
    };

    let spec = pipeline.signal_spec();
    let evaluation = PipelineEvaluation {
        signal,
        generation: pipeline.meta().generation,
        verdict,
        workloads: round.workloads_for(&spec),
        flow: ctx.registry.status(signal, &name),
    };

    let current = pipeline.conditions();
    let next = evaluation.conditions(current);
    let phase = evaluation.phase();
    if conditions_changed(current, &next) {
        ctx.store
            .patch_status(signal, &name, &pipeline.status_patch(&next))
            .await?;
        info!(phase = %phase, "Updated pipeline status");
    }

    let requeue = match phase {
        PipelinePhase::Running => ctx.config.selfmon_interval,
        _ => PROGRESS_REQUEUE.min(ctx.config.selfmon_interval),
    };
    Ok(Action::requeue(requeue))
}

/// Requeue a failed pipeline with a per-object exponential delay
pub fn error_policy<K: TelemetryPipeline>(pipeline: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = pipeline.name_any();
    let delay = ctx.backoff.next_delay(&pipeline_key(K::SIGNAL, &name));
    if error.is_retryable() {
        warn!(%error, kind = %K::SIGNAL, pipeline = %name, delay_secs = delay.as_secs(), "Reconcile failed, retrying");
    } else {
        error!(%error, kind = %K::SIGNAL, pipeline = %name, delay_secs = delay.as_secs(), "Reconcile failed");
    }
    Action::requeue(delay)
}

/// Pipelines of kind `K` whose credentials come from `secret`
///
/// Feeds the secret watch event to the resolver so drift is visible to the
/// next round.
pub fn secret_dependents<K: TelemetryPipeline>(resolver: &SecretResolver, secret: &Secret) -> Vec<ObjectRef<K>> {
    let prefix = format!("{}/", K::SIGNAL);
    resolver
        .observe_secret(secret)
        .into_iter()
        .filter_map(|key| key.strip_prefix(&prefix).map(ObjectRef::new))
        .collect()
}
