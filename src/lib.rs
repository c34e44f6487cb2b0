//! Conduit - Kubernetes operator for telemetry pipelines
//!
//! Conduit turns declarative LogPipeline, MetricPipeline and TracePipeline
//! resources into configuration for the collectors that ship the data: a
//! Fluent Bit agent for logs, and OpenTelemetry collectors (metric agent,
//! metric gateway, trace gateway) for metrics and traces.
//!
//! # Architecture
//!
//! Every reconcile of a pipeline funnels into one synthesis actor per signal
//! type. The actor:
//! - Validates all pipelines of its signal type and resolves their secrets
//! - Admits them up to the configured cap, oldest first
//! - Renders one collector configuration document for the admitted set
//! - Applies it, and reports per-pipeline verdicts back to the reconcilers
//!
//! A self-monitor scrapes the collectors and feeds flow health back into
//! the pipeline status conditions.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (pipelines and the Telemetry module)
//! - [`controller`] - Reconciliation of pipelines and the Telemetry module
//! - [`validation`] - Spec checks shared by the webhook and the reconciler
//! - [`secrets`] - Secret reference resolution and drift detection
//! - [`synthesis`] - Collector configuration rendering
//! - [`workload`] - Collector workload manifests
//! - [`selfmonitor`] - Flow health from collector metrics
//! - [`conversion`] - LogPipeline and MetricPipeline v1alpha1/v1beta1 conversion
//! - [`webhook`] - Admission and conversion webhooks
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod conditions;
pub mod config;
pub mod controller;
pub mod conversion;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod logging;
pub mod retry;
pub mod secrets;
pub mod selfmonitor;
pub mod synthesis;
pub mod validation;
pub mod webhook;
pub mod workload;

use crd::SignalType;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace the operator and its collectors run in unless configured
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "conduit-system";

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "conduit-operator";

/// Finalizer held on pipelines until their collector config is withdrawn
pub const FINALIZER: &str = "telemetry.conduit.dev/pipeline-cleanup";

/// Fluent Bit DaemonSet shipping logs
pub const LOG_AGENT_NAME: &str = "conduit-log-agent";

/// OTel DaemonSet scraping node-local metric sources
pub const METRIC_AGENT_NAME: &str = "conduit-metric-agent";

/// OTel Deployment exporting metrics
pub const METRIC_GATEWAY_NAME: &str = "conduit-metric-gateway";

/// OTel Deployment exporting traces
pub const TRACE_GATEWAY_NAME: &str = "conduit-trace-gateway";

/// Collector that carries the configuration of `signal`
pub fn collector_name(signal: SignalType) -> &'static str {
    match signal {
        SignalType::Logs => LOG_AGENT_NAME,
        SignalType::Metrics => METRIC_GATEWAY_NAME,
        SignalType::Traces => TRACE_GATEWAY_NAME,
    }
}
