//! Custom Resource Definitions for conduit
//!
//! Pipelines are cluster-scoped and grouped under `telemetry.conduit.dev`.
//! LogPipeline and MetricPipeline are served at v1alpha1 and v1beta1
//! (storage); TracePipeline and the namespaced Telemetry module only at
//! v1beta1.

mod log_pipeline;
mod metric_pipeline;
mod telemetry;
mod trace_pipeline;
mod types;
pub mod v1alpha1;

use std::fmt::Debug;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::crd::merge_crds;
use kube::{CustomResourceExt, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use log_pipeline::{
    ContainerSelector, HttpOutput, LogPipeline, LogPipelineFile, LogPipelineFilter,
    LogPipelineInput, LogPipelineOutput, LogPipelineSpec, LogPipelineStatus, LogPipelineVariable,
    RuntimeInput,
};
pub use metric_pipeline::{
    AgentInput, MetricPipeline, MetricPipelineInput, MetricPipelineOutput, MetricPipelineSpec,
    MetricPipelineStatus,
};
pub use telemetry::{
    GatewaySpec, ScalingSpec, ScalingStrategy, StaticScaling, Telemetry, TelemetrySpec,
    TelemetryState, TelemetryStatus,
};
pub use trace_pipeline::{TracePipeline, TracePipelineOutput, TracePipelineSpec, TracePipelineStatus};
pub use types::{
    AuthenticationOptions, BasicAuth, Condition, ConditionStatus, Header, NamespaceSelector,
    OtlpInput, OtlpOutput, OtlpProtocol, OutputTls, SecretKeyRef, SignalType, ValueFromSource,
    ValueType,
};

/// Storage version of every pipeline kind
pub const STORAGE_VERSION: &str = "v1beta1";

/// All CRD manifests installed by the operator
pub fn crds() -> crate::Result<Vec<CustomResourceDefinition>> {
    let log_pipelines = merge_crds(
        vec![v1alpha1::LogPipeline::crd(), LogPipeline::crd()],
        STORAGE_VERSION,
    )
    .map_err(|e| crate::Error::serialization(format!("failed to merge LogPipeline CRDs: {e}")))?;
    let metric_pipelines = merge_crds(
        vec![v1alpha1::MetricPipeline::crd(), MetricPipeline::crd()],
        STORAGE_VERSION,
    )
    .map_err(|e| crate::Error::serialization(format!("failed to merge MetricPipeline CRDs: {e}")))?;

    Ok(vec![
        log_pipelines,
        metric_pipelines,
        TracePipeline::crd(),
        Telemetry::crd(),
    ])
}

/// Spec of any pipeline kind, used where signal types are handled uniformly
#[derive(Clone, Debug, PartialEq)]
pub enum SignalSpec {
    /// A LogPipeline spec
    Logs(LogPipelineSpec),
    /// A MetricPipeline spec
    Metrics(MetricPipelineSpec),
    /// A TracePipeline spec
    Traces(TracePipelineSpec),
}

impl SignalSpec {
    /// Signal type of the wrapped spec
    pub fn signal(&self) -> SignalType {
        match self {
            Self::Logs(_) => SignalType::Logs,
            Self::Metrics(_) => SignalType::Metrics,
            Self::Traces(_) => SignalType::Traces,
        }
    }

    /// OTLP output, when the pipeline has one
    pub fn otlp_output(&self) -> Option<&OtlpOutput> {
        match self {
            Self::Logs(spec) => spec.output.otlp.as_ref(),
            Self::Metrics(spec) => spec.output.otlp.as_ref(),
            Self::Traces(spec) => spec.output.otlp.as_ref(),
        }
    }
}

/// Behaviour shared by LogPipeline, MetricPipeline and TracePipeline
pub trait TelemetryPipeline:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Signal type handled by this kind
    const SIGNAL: SignalType;

    /// Owned copy of the spec
    fn signal_spec(&self) -> SignalSpec;

    /// Current status conditions
    fn conditions(&self) -> &[Condition];

    /// Merge-patch body replacing the status with `conditions`
    fn status_patch(&self, conditions: &[Condition]) -> serde_json::Value {
        serde_json::json!({ "status": { "conditions": conditions } })
    }
}

impl TelemetryPipeline for LogPipeline {
    const SIGNAL: SignalType = SignalType::Logs;

    fn signal_spec(&self) -> SignalSpec {
        SignalSpec::Logs(self.spec.clone())
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    fn status_patch(&self, conditions: &[Condition]) -> serde_json::Value {
        serde_json::json!({
            "status": {
                "conditions": conditions,
                "unsupportedMode": self.spec.uses_custom_sections(),
            }
        })
    }
}

impl TelemetryPipeline for MetricPipeline {
    const SIGNAL: SignalType = SignalType::Metrics;

    fn signal_spec(&self) -> SignalSpec {
        SignalSpec::Metrics(self.spec.clone())
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}

impl TelemetryPipeline for TracePipeline {
    const SIGNAL: SignalType = SignalType::Traces;

    fn signal_spec(&self) -> SignalSpec {
        SignalSpec::Traces(self.spec.clone())
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_and_metric_pipeline_crds_serve_both_versions() {
        let crds = crds().unwrap();
        assert_eq!(crds.len(), 4);
        for kind in ["LogPipeline", "MetricPipeline"] {
            let crd = crds.iter().find(|c| c.spec.names.kind == kind).unwrap();
            let versions: Vec<(&str, bool)> = crd
                .spec
                .versions
                .iter()
                .map(|v| (v.name.as_str(), v.storage))
                .collect();
            assert!(versions.contains(&("v1alpha1", false)), "{kind}");
            assert!(versions.contains(&("v1beta1", true)), "{kind}");
            assert_eq!(crd.spec.scope, "Cluster");
        }

        let trace = crds.iter().find(|c| c.spec.names.kind == "TracePipeline").unwrap();
        assert_eq!(trace.spec.versions.len(), 1);
    }

    #[test]
    fn test_telemetry_crd_is_namespaced() {
        let crd = Telemetry::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.group, "telemetry.conduit.dev");
    }

    #[test]
    fn test_log_status_patch_reports_custom_mode() {
        let mut pipeline = LogPipeline::new("custom", LogPipelineSpec::default());
        pipeline.spec.output.custom = Some("name stdout".to_string());

        let patch = pipeline.status_patch(&[]);
        assert_eq!(patch["status"]["unsupportedMode"], serde_json::json!(true));
        assert_eq!(patch["status"]["conditions"], serde_json::json!([]));
    }
}
