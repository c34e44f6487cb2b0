//! LogPipeline and MetricPipeline v1alpha1, the served legacy versions
//!
//! Objects stored at v1beta1 are converted on the fly for clients that still
//! speak v1alpha1. For LogPipelines only the input section and the HTTP TLS
//! flags differ; the rest of the schema is shared with v1beta1. A v1alpha1
//! MetricPipeline has the v1beta1 shape, but its namespace lists were never
//! checked for valid names.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::log_pipeline::{
    ContainerSelector, LogPipelineFile, LogPipelineFilter, LogPipelineStatus, LogPipelineVariable,
};
use super::metric_pipeline::{MetricPipelineInput, MetricPipelineOutput, MetricPipelineStatus};
use super::types::{OtlpInput, OtlpOutput, ValueType};

/// Specification for a LogPipeline (v1alpha1)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.conduit.dev",
    version = "v1alpha1",
    kind = "LogPipeline",
    plural = "logpipelines",
    shortname = "lp",
    status = "LogPipelineStatus",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineSpec {
    /// Where logs are collected from
    #[serde(default)]
    pub input: LogPipelineInput,

    /// Custom Fluent Bit filters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<LogPipelineFilter>,

    /// Destination
    #[serde(default)]
    pub output: LogPipelineOutput,

    /// Files mounted into the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<LogPipelineFile>,

    /// Secret-backed environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<LogPipelineVariable>,
}

/// Log sources (v1alpha1)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineInput {
    /// Application container logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationInput>,

    /// Logs pushed over OTLP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpInput>,
}

/// Application input (v1alpha1 name of the runtime input)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInput {
    /// Collect application logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Namespace selection
    #[serde(default)]
    pub namespaces: InputNamespaces,

    /// Container selection
    #[serde(default)]
    pub containers: ContainerSelector,

    /// Keep pod annotations
    #[serde(default)]
    pub keep_annotations: bool,

    /// Drop pod labels
    #[serde(default)]
    pub drop_labels: bool,

    /// Keep the raw `log` field after JSON parsing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_original_body: Option<bool>,
}

/// Namespace selection (v1alpha1)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InputNamespaces {
    /// Only these namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Everything except these namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Also collect from system namespaces
    #[serde(default)]
    pub system: bool,
}

/// Destination (v1alpha1)
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

/// HTTP output (v1alpha1)
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
    /// Request path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Payload compression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<String>,
    /// Payload format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// TLS settings
    #[serde(default)]
    pub tls: TlsConfig,
    /// Replace dots in Kubernetes label/annotation keys
    #[serde(default)]
    pub dedot: bool,
}

/// TLS settings (v1alpha1 flag names)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Send in plain text
    #[serde(default)]
    pub disabled: bool,
    /// Skip server certificate verification
    #[serde(default)]
    pub skip_certificate_validation: bool,
    /// CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ValueType>,
    /// Client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<ValueType>,
    /// Client private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ValueType>,
}

/// Specification for a MetricPipeline (v1alpha1)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.conduit.dev",
    version = "v1alpha1",
    kind = "MetricPipeline",
    plural = "metricpipelines",
    shortname = "mp",
    status = "MetricPipelineStatus",
    namespaced = false
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
