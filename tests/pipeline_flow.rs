//! End-to-end reconcile flows against in-memory cluster fakes
//!
//! The fakes implement the public seams (pipeline store, workload client,
//! secret reader, Telemetry status) so whole reconcile rounds run without
//! a cluster.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use tokio_util::sync::CancellationToken;

use conduit::conditions::{
    self, REASON_MAX_PIPELINES_EXCEEDED, REASON_REFERENCED_SECRET_MISSING,
    TYPE_CONFIGURATION_GENERATED, TYPE_RUNNING,
};
use conduit::config::OperatorConfig;
use conduit::controller::{
    reconcile, secret_dependents, Context, PipelineSnapshot, PipelineStore, Readiness,
    TelemetryStore, WorkloadClient,
};
use conduit::crd::{
    Condition, HttpOutput, LogPipeline, LogPipelineOutput, LogPipelineSpec, OtlpOutput,
    SignalType, TelemetryPipeline, TelemetryStatus, TracePipeline, TracePipelineOutput,
    TracePipelineSpec, ValueType,
};
use conduit::secrets::{SecretData, SecretReader};
use conduit::workload::{CollectorRole, CollectorWorkloads};
use conduit::{Error, FINALIZER};

// =============================================================================
// Fakes
// =============================================================================

/// Pipelines of every kind, held as snapshots plus the last written status
#[derive(Default)]
struct FakeStore {
    pipelines: Mutex<BTreeMap<(SignalType, String), PipelineSnapshot>>,
    statuses: Mutex<BTreeMap<(SignalType, String), Vec<Condition>>>,
    finalizers: Mutex<BTreeMap<(SignalType, String), Vec<String>>>,
}

impl FakeStore {
    fn insert<K: TelemetryPipeline>(&self, pipeline: &K) {
        let snapshot = PipelineSnapshot::of(pipeline);
        self.pipelines
            .lock()
            .unwrap()
            .insert((K::SIGNAL, snapshot.name.clone()), snapshot);
    }

    fn remove(&self, signal: SignalType, name: &str) {
        self.pipelines.lock().unwrap().remove(&(signal, name.to_string()));
    }

    fn conditions(&self, signal: SignalType, name: &str) -> Vec<Condition> {
        self.statuses
            .lock()
            .unwrap()
            .get(&(signal, name.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PipelineStore for FakeStore {
    async fn list(&self, signal: SignalType) -> Result<Vec<PipelineSnapshot>, Error> {
        Ok(self
            .pipelines
            .lock()
            .unwrap()
            .iter()
            .filter(|((s, _), _)| *s == signal)
            .map(|(_, snapshot)| snapshot.clone())
            .collect())
    }

    async fn patch_status(
        &self,
        signal: SignalType,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let conditions = serde_json::from_value(patch["status"]["conditions"].clone())?;
        self.statuses
            .lock()
            .unwrap()
            .insert((signal, name.to_string()), conditions);
        Ok(())
    }

    async fn set_finalizers(
        &self,
        signal: SignalType,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        self.finalizers
            .lock()
            .unwrap()
            .insert((signal, name.to_string()), finalizers);
        Ok(())
    }
}

/// Records applied workloads; every collector is ready
#[derive(Default)]
struct FakeWorkloads {
    applied: Mutex<Vec<CollectorWorkloads>>,
}

impl FakeWorkloads {
    fn applies(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    fn last_config(&self) -> String {
        self.applied
            .lock()
            .unwrap()
            .last()
            .map(|w| {
                w.config_maps
                    .iter()
                    .flat_map(|cm| cm.data.values().cloned())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkloadClient for FakeWorkloads {
    async fn apply(&self, workloads: &CollectorWorkloads) -> Result<(), Error> {
        self.applied.lock().unwrap().push(workloads.clone());
        Ok(())
    }

    async fn readiness(&self, _role: CollectorRole) -> Result<Readiness, Error> {
        Ok(Readiness::Ready)
    }

    async fn scale(&self, _role: CollectorRole, _replicas: i32) -> Result<(), Error> {
        Ok(())
    }
}

/// Secrets by `namespace/name`
#[derive(Default)]
struct FakeSecrets {
    secrets: Mutex<BTreeMap<String, SecretData>>,
}

impl FakeSecrets {
    fn put(&self, namespace: &str, name: &str, key: &str, value: &str) {
        self.secrets.lock().unwrap().insert(
            format!("{namespace}/{name}"),
            BTreeMap::from([(key.to_string(), value.as_bytes().to_vec())]),
        );
    }
}

#[async_trait]
impl SecretReader for FakeSecrets {
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, Error> {
        Ok(self.secrets.lock().unwrap().get(&format!("{namespace}/{name}")).cloned())
    }
}

struct NoTelemetry;

#[async_trait]
impl TelemetryStore for NoTelemetry {
    async fn patch_status(&self, _: &str, _: &str, _: &TelemetryStatus) -> Result<(), Error> {
        Ok(())
    }
}

struct Harness {
    store: Arc<FakeStore>,
    workloads: Arc<FakeWorkloads>,
    secrets: Arc<FakeSecrets>,
    ctx: Arc<Context>,
    _cancel: CancellationToken,
}

fn harness(config: OperatorConfig) -> Harness {
    let store = Arc::new(FakeStore::default());
    let workloads = Arc::new(FakeWorkloads::default());
    let secrets = Arc::new(FakeSecrets::default());
    let cancel = CancellationToken::new();
    let ctx = Context::builder(config)
        .store(store.clone())
        .workloads(workloads.clone())
        .secret_reader(secrets.clone())
        .telemetry_store(Arc::new(NoTelemetry))
        .build(&cancel)
        .unwrap();
    Harness {
        store,
        workloads,
        secrets,
        ctx: Arc::new(ctx),
        _cancel: cancel,
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn created(minute: u32) -> Option<Time> {
    Some(Time(Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).unwrap()))
}

fn trace_pipeline(name: &str, minute: u32) -> TracePipeline {
    let mut pipeline = TracePipeline::new(
        name,
        TracePipelineSpec {
            output: TracePipelineOutput {
                otlp: Some(OtlpOutput {
                    endpoint: ValueType::literal(format!("http://{name}.tracing:4317")),
                    ..Default::default()
                }),
            },
        },
    );
    pipeline.metadata.generation = Some(1);
    pipeline.metadata.creation_timestamp = created(minute);
    pipeline.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    pipeline
}

fn log_pipeline_with_secret_host(name: &str) -> LogPipeline {
    let mut pipeline = LogPipeline::new(
        name,
        LogPipelineSpec {
            output: LogPipelineOutput {
                http: Some(HttpOutput {
                    host: ValueType::from_secret("observability", "backend", "host"),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    pipeline.metadata.generation = Some(1);
    pipeline.metadata.creation_timestamp = created(0);
    pipeline.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    pipeline
}

fn secret(namespace: &str, name: &str, key: &str, value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

fn generated_reason(conditions: &[Condition]) -> String {
    conditions::find(conditions, TYPE_CONFIGURATION_GENERATED)
        .map(|c| c.reason.clone())
        .unwrap_or_default()
}

// =============================================================================
// Flows
// =============================================================================

/// Story: Pipelines beyond the cap wait until an older one is deleted
#[tokio::test]
async fn story_capacity_is_handed_to_the_next_oldest() {
    let h = harness(OperatorConfig {
        max_trace_pipelines: 1,
        ..OperatorConfig::default()
    });
    let first = trace_pipeline("first", 0);
    let second = trace_pipeline("second", 5);
    h.store.insert(&first);
    h.store.insert(&second);

    reconcile(Arc::new(first.clone()), h.ctx.clone()).await.unwrap();
    reconcile(Arc::new(second.clone()), h.ctx.clone()).await.unwrap();

    let first_status = h.store.conditions(SignalType::Traces, "first");
    assert!(conditions::is_true(&first_status, TYPE_RUNNING));
    let second_status = h.store.conditions(SignalType::Traces, "second");
    assert_eq!(generated_reason(&second_status), REASON_MAX_PIPELINES_EXCEEDED);
    assert!(h.workloads.last_config().contains("otlp/first"));
    assert!(!h.workloads.last_config().contains("otlp/second"));

    // Deleting the admitted pipeline frees its slot
    h.store.remove(SignalType::Traces, "first");
    let mut deleting = first;
    deleting.metadata.deletion_timestamp = created(30);
    reconcile(Arc::new(deleting), h.ctx.clone()).await.unwrap();
    reconcile(Arc::new(second), h.ctx.clone()).await.unwrap();

    let second_status = h.store.conditions(SignalType::Traces, "second");
    assert!(conditions::is_true(&second_status, TYPE_RUNNING));
    assert!(h.workloads.last_config().contains("otlp/second"));
    assert!(!h.workloads.last_config().contains("otlp/first"));
}

/// Story: A pipeline waits for its secret, then follows its rotation
#[tokio::test]
async fn story_secret_lifecycle() {
    let h = harness(OperatorConfig::default());
    let pipeline = log_pipeline_with_secret_host("app");
    h.store.insert(&pipeline);

    reconcile(Arc::new(pipeline.clone()), h.ctx.clone()).await.unwrap();
    let status = h.store.conditions(SignalType::Logs, "app");
    assert_eq!(generated_reason(&status), REASON_REFERENCED_SECRET_MISSING);

    // The secret appears; the next round picks it up
    h.secrets.put("observability", "backend", "host", "logs.example.com");
    reconcile(Arc::new(pipeline.clone()), h.ctx.clone()).await.unwrap();
    let status = h.store.conditions(SignalType::Logs, "app");
    assert!(conditions::is_true(&status, TYPE_RUNNING));
    let applies = h.workloads.applies();

    // Rotation: the watch event maps the secret back to the pipeline
    h.secrets.put("observability", "backend", "host", "logs-2.example.com");
    let rotated = secret("observability", "backend", "host", "logs-2.example.com");
    let woken = secret_dependents::<LogPipeline>(&h.ctx.resolver, &rotated);
    assert_eq!(woken.len(), 1);
    assert_eq!(woken[0].name, "app");

    reconcile(Arc::new(pipeline), h.ctx.clone()).await.unwrap();
    assert_eq!(h.workloads.applies(), applies + 1);
}

/// Story: Unrelated secrets do not wake pipelines
#[tokio::test]
async fn story_unrelated_secret_wakes_nobody() {
    let h = harness(OperatorConfig::default());
    let pipeline = log_pipeline_with_secret_host("app");
    h.store.insert(&pipeline);
    h.secrets.put("observability", "backend", "host", "logs.example.com");
    reconcile(Arc::new(pipeline), h.ctx.clone()).await.unwrap();

    let other = secret("default", "unrelated", "token", "x");
    assert!(secret_dependents::<LogPipeline>(&h.ctx.resolver, &other).is_empty());
    assert!(secret_dependents::<TracePipeline>(&h.ctx.resolver, &other).is_empty());
}

/// Story: Reconciling an unchanged set twice applies the collector once
#[tokio::test]
async fn story_steady_state_is_quiet() {
    let h = harness(OperatorConfig::default());
    let pipeline = trace_pipeline("jaeger", 0);
    h.store.insert(&pipeline);

    reconcile(Arc::new(pipeline.clone()), h.ctx.clone()).await.unwrap();
    reconcile(Arc::new(pipeline), h.ctx.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.workloads.applies(), 1);
}

/// Story: Conversion keeps a legacy object's meaning
#[test]
fn story_legacy_object_converts() {
    let legacy = serde_json::json!({
        "apiVersion": "telemetry.conduit.dev/v1alpha1",
        "kind": "LogPipeline",
        "metadata": {"name": "legacy"},
        "spec": {
            "input": {"application": {
                "namespaces": {"include": ["shop"]},
                "dropLabels": true
            }},
            "output": {"http": {"host": {"value": "logs.example.com"}}}
        }
    });

    let stored = conduit::conversion::convert_object(legacy.clone(), "telemetry.conduit.dev/v1beta1").unwrap();
    assert_eq!(stored["spec"]["input"]["runtime"]["namespaces"]["include"][0], "shop");
    assert_eq!(stored["spec"]["input"]["runtime"]["dropLabels"], true);

    let served = conduit::conversion::convert_object(stored, "telemetry.conduit.dev/v1alpha1").unwrap();
    let original: conduit::crd::v1alpha1::LogPipelineSpec =
        serde_json::from_value(legacy["spec"].clone()).unwrap();
    let round_tripped: conduit::crd::v1alpha1::LogPipelineSpec =
        serde_json::from_value(served["spec"].clone()).unwrap();
    assert_eq!(round_tripped, original);
}
