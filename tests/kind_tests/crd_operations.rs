//! Integration tests for CRD operations
//!
//! These tests tell the story of how users manage pipelines through the
//! Kubernetes API. The operator itself does not need to run.

use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;

use conduit::crd::{
    GatewaySpec, OtlpOutput, ScalingSpec, Telemetry, TelemetrySpec, TracePipeline,
    TracePipelineOutput, TracePipelineSpec, ValueType,
};

// =============================================================================
// Test Fixtures
// =============================================================================

async fn client() -> Client {
    Client::try_default()
        .await
        .expect("a kubeconfig pointing at a test cluster")
}

fn sample_trace_pipeline(name: &str) -> TracePipeline {
    TracePipeline::new(
        name,
        TracePipelineSpec {
            output: TracePipelineOutput {
                otlp: Some(OtlpOutput {
                    endpoint: ValueType::literal("http://jaeger-collector.tracing:4317"),
                    ..Default::default()
                }),
            },
        },
    )
}

async fn cleanup_trace_pipeline(api: &Api<TracePipeline>, name: &str) {
    let _ = api.delete(name, &DeleteParams::default()).await;
}

// =============================================================================
// Pipeline Stories
// =============================================================================

/// Story: A platform team registers a trace backend
#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn story_create_and_read_trace_pipeline() {
    let api: Api<TracePipeline> = Api::all(client().await);
    let name = "it-create-trace";
    cleanup_trace_pipeline(&api, name).await;

    api.create(&PostParams::default(), &sample_trace_pipeline(name))
        .await
        .expect("create TracePipeline");

    let stored = api.get(name).await.expect("get TracePipeline");
    let endpoint = stored.spec.output.otlp.as_ref().map(|o| o.endpoint.clone());
    assert_eq!(
        endpoint,
        Some(ValueType::literal("http://jaeger-collector.tracing:4317"))
    );

    cleanup_trace_pipeline(&api, name).await;
}

/// Story: Switching the backend is a plain spec update
#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn story_update_trace_backend() {
    let api: Api<TracePipeline> = Api::all(client().await);
    let name = "it-update-trace";
    cleanup_trace_pipeline(&api, name).await;
    api.create(&PostParams::default(), &sample_trace_pipeline(name))
        .await
        .expect("create TracePipeline");

    let patch = serde_json::json!({
        "spec": {"output": {"otlp": {"endpoint": {"value": "http://tempo.tracing:4317"}}}}
    });
    let updated = api
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .expect("patch TracePipeline");
    assert_eq!(
        updated.spec.output.otlp.map(|o| o.endpoint),
        Some(ValueType::literal("http://tempo.tracing:4317"))
    );

    cleanup_trace_pipeline(&api, name).await;
}

// =============================================================================
// Telemetry Module Stories
// =============================================================================

/// Story: The trace gateway is pinned to a fixed replica count
#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn story_static_trace_gateway_scaling() {
    let namespace = conduit::DEFAULT_OPERATOR_NAMESPACE;
    let api: Api<Telemetry> = Api::namespaced(client().await, namespace);
    let name = "it-telemetry";
    let _ = api.delete(name, &DeleteParams::default()).await;

    let telemetry = Telemetry::new(
        name,
        TelemetrySpec {
            trace: Some(GatewaySpec {
                scaling: ScalingSpec::fixed(3),
            }),
            ..Default::default()
        },
    );
    api.create(&PostParams::default(), &telemetry)
        .await
        .expect("create Telemetry");

    let stored = api.get(name).await.expect("get Telemetry");
    assert_eq!(stored.spec.trace.map(|t| t.scaling.desired_replicas(2)), Some(3));

    let _ = api.delete(name, &DeleteParams::default()).await;
}
