//! LogPipeline Custom Resource Definition (v1beta1, storage version)
//!
//! A LogPipeline selects container logs on the cluster and ships them to one
//! destination. All LogPipelines share a single Fluent Bit agent whose
//! configuration is synthesized from every admitted pipeline.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, NamespaceSelector, OtlpInput, OtlpOutput, OutputTls, ValueType};

/// Specification for a LogPipeline
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.conduit.dev",
    version = "v1beta1",
    kind = "LogPipeline",
    plural = "logpipelines",
    shortname = "lp",
    status = "LogPipelineStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Configuration Generated","type":"string","jsonPath":".status.conditions[?(@.type==\"ConfigurationGenerated\")].status"}"#,
    printcolumn = r#"{"name":"Agent Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"AgentHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Flow Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"TelemetryFlowHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineSpec {
    /// Where logs are collected from
    #[serde(default)]
    pub input: LogPipelineInput,

    /// Custom Fluent Bit filters applied after namespace/container selection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<LogPipelineFilter>,

    /// Destination
    #[serde(default)]
    pub output: LogPipelineOutput,

    /// Files mounted into the agent, referenced by custom sections
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<LogPipelineFile>,

    /// Secret-backed environment variables referenced by custom sections
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<LogPipelineVariable>,
}

/// Log sources
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineInput {
    /// Container runtime logs tailed on every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInput>,

    /// Logs pushed over OTLP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpInput>,
}

/// Container runtime input
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInput {
    /// Collect runtime logs (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Namespace selection; absent means all but system namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,

    /// Container selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<ContainerSelector>,

    /// Keep pod annotations on records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_annotations: Option<bool>,

    /// Drop pod labels from records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_labels: Option<bool>,

    /// Keep the raw `log` field after JSON parsing (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_original_body: Option<bool>,
}

impl RuntimeInput {
    /// Whether runtime collection is on
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Container include/exclude selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSelector {
    /// Only these containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Everything except these containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// A raw Fluent Bit filter section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineFilter {
    /// Section body, one `key value` per line
    #[serde(default)]
    pub custom: String,
}

/// Destination of a LogPipeline; exactly one field must be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineOutput {
    /// Raw Fluent Bit output section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,

    /// HTTP backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpOutput>,

    /// OTLP backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpOutput>,
}

/// HTTP output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpOutput {
    /// Backend host
    #[serde(default)]
    pub host: ValueType,
    /// Basic auth user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ValueType>,
    /// Basic auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<ValueType>,
    /// Request path, must start with `/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Port (default 443)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Payload compression (e.g. gzip)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<String>,
    /// Payload format (default json)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// TLS settings
    #[serde(default)]
    pub tls: OutputTls,
    /// Replace dots in Kubernetes label/annotation keys
    #[serde(default)]
    pub dedot: bool,
}

/// A file made available to custom sections
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineFile {
    /// File name
    pub name: String,
    /// File content
    pub content: String,
}

/// A named environment variable backed by a secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineVariable {
    /// Variable name, referenced as `${NAME}`
    pub name: String,
    /// Value source
    pub value_from: super::types::ValueFromSource,
}

/// Status for a LogPipeline
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineStatus {
    /// Conditions, current types first and legacy types last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Whether the pipeline uses custom sections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_mode: Option<bool>,
}

impl LogPipelineSpec {
    /// Whether the pipeline relies on raw Fluent Bit sections
    pub fn uses_custom_sections(&self) -> bool {
        self.output.custom.is_some() || !self.filters.is_empty()
    }

    /// The runtime input, if collecting container logs. An absent runtime
    /// section means runtime collection with default settings.
    pub fn runtime_input(&self) -> Option<RuntimeInput> {
        let runtime = self.input.runtime.clone().unwrap_or_default();
        runtime.is_enabled().then_some(runtime)
    }
}
