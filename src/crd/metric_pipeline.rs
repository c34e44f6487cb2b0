//! MetricPipeline Custom Resource Definition
//!
//! Metrics arrive at a shared gateway over OTLP, optionally fed by a per-node
//! agent scraping Prometheus endpoints, kubelet runtime stats, and Istio
//! proxies.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, NamespaceSelector, OtlpInput, OtlpOutput};

/// Specification for a MetricPipeline
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.conduit.dev",
    version = "v1beta1",
    kind = "MetricPipeline",
    plural = "metricpipelines",
    shortname = "mp",
    status = "MetricPipelineStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Configuration Generated","type":"string","jsonPath":".status.conditions[?(@.type==\"ConfigurationGenerated\")].status"}"#,
    printcolumn = r#"{"name":"Gateway Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"GatewayHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Flow Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"TelemetryFlowHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineSpec {
    /// Metric sources
    #[serde(default)]
    pub input: MetricPipelineInput,

    /// Destination
    #[serde(default)]
    pub output: MetricPipelineOutput,
}

/// Metric sources
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineInput {
    /// Scrape annotated Prometheus endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<AgentInput>,

    /// Kubelet container/pod runtime metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<AgentInput>,

    /// Istio proxy metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio: Option<AgentInput>,

    /// Metrics pushed over OTLP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpInput>,
}

/// A pull-based input served by the metric agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentInput {
    /// Turn the input on
    #[serde(default)]
    pub enabled: bool,

    /// Namespace selection; absent means all but system namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,
}

/// Destination of a MetricPipeline
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineOutput {
    /// OTLP backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpOutput>,
}

/// Status for a MetricPipeline
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineStatus {
    /// Conditions, current types first and legacy types last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

fn enabled(input: &Option<AgentInput>) -> bool {
    input.as_ref().is_some_and(|i| i.enabled)
}

impl MetricPipelineSpec {
    /// Whether the Prometheus input is on
    pub fn prometheus_enabled(&self) -> bool {
        enabled(&self.input.prometheus)
    }

    /// Whether the runtime input is on
    pub fn runtime_enabled(&self) -> bool {
        enabled(&self.input.runtime)
    }

    /// Whether the Istio input is on
    pub fn istio_enabled(&self) -> bool {
        enabled(&self.input.istio)
    }

    /// Whether any input needs the per-node agent
    pub fn needs_agent(&self) -> bool {
        self.prometheus_enabled() || self.runtime_enabled() || self.istio_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_required_only_for_pull_inputs() {
        let otlp_only = MetricPipelineSpec::default();
        assert!(!otlp_only.needs_agent());

        let spec: MetricPipelineSpec = serde_yaml::from_str(
            r#"
input:
  runtime:
    enabled: true
output:
  otlp:
    endpoint:
      value: http://backend:4317
"#,
        )
        .unwrap();
        assert!(spec.runtime_enabled());
        assert!(!spec.prometheus_enabled());
        assert!(spec.needs_agent());
    }
}
