//! Operator configuration
//!
//! Every operational constant (pipeline caps, timeouts, backoff ceilings,
//! flow-health thresholds) is a flag with an environment fallback so it can be
//! tuned per installation without a rebuild.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::crd::SignalType;
use crate::retry::RetryConfig;
use crate::selfmonitor::FlowThresholds;
use crate::DEFAULT_OPERATOR_NAMESPACE;

/// Command-line / environment surface for the controller
#[derive(Args, Debug, Clone)]
pub struct OperatorArgs {
    /// Namespace holding collector workloads and the Telemetry resource
    #[arg(long, env = "CONDUIT_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    pub namespace: String,

    /// Maximum admitted LogPipelines (0 = unlimited)
    #[arg(long, env = "CONDUIT_MAX_LOG_PIPELINES", default_value_t = 5)]
    pub max_log_pipelines: usize,

    /// Maximum admitted MetricPipelines (0 = unlimited)
    #[arg(long, env = "CONDUIT_MAX_METRIC_PIPELINES", default_value_t = 3)]
    pub max_metric_pipelines: usize,

    /// Maximum admitted TracePipelines (0 = unlimited)
    #[arg(long, env = "CONDUIT_MAX_TRACE_PIPELINES", default_value_t = 3)]
    pub max_trace_pipelines: usize,

    /// Deadline for a single API server call, in seconds
    #[arg(long, env = "CONDUIT_API_TIMEOUT_SECS", default_value_t = 10)]
    pub api_timeout_secs: u64,

    /// Deadline for one reconcile of one pipeline, in seconds
    #[arg(long, env = "CONDUIT_RECONCILE_TIMEOUT_SECS", default_value_t = 60)]
    pub reconcile_timeout_secs: u64,

    /// Attempts for transient API failures inside one reconcile
    #[arg(long, env = "CONDUIT_RETRY_MAX_ATTEMPTS", default_value_t = 4)]
    pub retry_max_attempts: u32,

    /// Ceiling for requeue backoff after failed reconciles, in seconds
    #[arg(long, env = "CONDUIT_REQUEUE_MAX_SECS", default_value_t = 300)]
    pub requeue_max_secs: u64,

    /// Self-monitor scrape interval, in seconds
    #[arg(long, env = "CONDUIT_SELFMON_INTERVAL_SECS", default_value_t = 30)]
    pub selfmon_interval_secs: u64,

    /// Sliding window for flow-health evaluation, in seconds
    #[arg(long, env = "CONDUIT_FLOW_WINDOW_SECS", default_value_t = 300)]
    pub flow_window_secs: u64,

    /// Share of failed exports within the window that marks a flow broken
    #[arg(long, env = "CONDUIT_FLOW_ERROR_RATIO", default_value_t = 0.1)]
    pub flow_error_ratio: f64,

    /// Exporter queue utilisation that marks a buffer as filling up
    #[arg(long, env = "CONDUIT_FLOW_QUEUE_RATIO", default_value_t = 0.8)]
    pub flow_queue_ratio: f64,

    /// Replicas for gateways whose scaling is Dynamic
    #[arg(long, env = "CONDUIT_DEFAULT_GATEWAY_REPLICAS", default_value_t = 2)]
    pub default_gateway_replicas: i32,

    /// Fluent Bit agent image
    #[arg(
        long,
        env = "CONDUIT_FLUENT_BIT_IMAGE",
        default_value = "cr.fluentbit.io/fluent/fluent-bit:3.2.4"
    )]
    pub fluent_bit_image: String,

    /// OpenTelemetry Collector image used for gateways and agents
    #[arg(
        long,
        env = "CONDUIT_OTEL_COLLECTOR_IMAGE",
        default_value = "otel/opentelemetry-collector-contrib:0.117.0"
    )]
    pub otel_collector_image: String,

    /// Address the admission/conversion webhook listens on
    #[arg(long, env = "CONDUIT_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    pub webhook_addr: SocketAddr,

    /// PEM certificate served by the webhook
    #[arg(
        long,
        env = "CONDUIT_WEBHOOK_CERT",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.crt"
    )]
    pub webhook_cert: PathBuf,

    /// PEM private key served by the webhook
    #[arg(
        long,
        env = "CONDUIT_WEBHOOK_KEY",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.key"
    )]
    pub webhook_key: PathBuf,

    /// Fluent Bit filter plugins users may not reference in custom filters
    #[arg(
        long,
        env = "CONDUIT_DENIED_FILTER_PLUGINS",
        value_delimiter = ',',
        default_value = "kubernetes,rewrite_tag"
    )]
    pub denied_filter_plugins: Vec<String>,
}

impl OperatorArgs {
    /// Convert parsed flags into the runtime configuration
    pub fn into_config(self) -> OperatorConfig {
        let retry = RetryConfig {
            max_attempts: self.retry_max_attempts,
            ..RetryConfig::default()
        };
        OperatorConfig {
            namespace: self.namespace,
            max_log_pipelines: self.max_log_pipelines,
            max_metric_pipelines: self.max_metric_pipelines,
            max_trace_pipelines: self.max_trace_pipelines,
            api_timeout: Duration::from_secs(self.api_timeout_secs),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            retry,
            requeue_backoff: RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(self.requeue_max_secs),
                backoff_multiplier: 2.0,
            },
            selfmon_interval: Duration::from_secs(self.selfmon_interval_secs),
            flow: FlowThresholds {
                window: Duration::from_secs(self.flow_window_secs),
                error_ratio: self.flow_error_ratio,
                queue_ratio: self.flow_queue_ratio,
            },
            default_gateway_replicas: self.default_gateway_replicas,
            fluent_bit_image: self.fluent_bit_image,
            otel_collector_image: self.otel_collector_image,
            webhook_addr: self.webhook_addr,
            webhook_cert: self.webhook_cert,
            webhook_key: self.webhook_key,
            denied_filter_plugins: self
                .denied_filter_plugins
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

/// Runtime configuration shared by every component
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace holding collector workloads
    pub namespace: String,
    /// LogPipeline cap (0 = unlimited)
    pub max_log_pipelines: usize,
    /// MetricPipeline cap (0 = unlimited)
    pub max_metric_pipelines: usize,
    /// TracePipeline cap (0 = unlimited)
    pub max_trace_pipelines: usize,
    /// Deadline for a single API call
    pub api_timeout: Duration,
    /// Deadline for one reconcile
    pub reconcile_timeout: Duration,
    /// Retry policy for transient API failures
    pub retry: RetryConfig,
    /// Requeue delays after failed reconciles
    pub requeue_backoff: RetryConfig,
    /// Self-monitor scrape interval
    pub selfmon_interval: Duration,
    /// Flow-health thresholds
    pub flow: FlowThresholds,
    /// Replicas for Dynamic gateway scaling
    pub default_gateway_replicas: i32,
    /// Fluent Bit image
    pub fluent_bit_image: String,
    /// OpenTelemetry Collector image
    pub otel_collector_image: String,
    /// Webhook listen address
    pub webhook_addr: SocketAddr,
    /// Webhook certificate path
    pub webhook_cert: PathBuf,
    /// Webhook key path
    pub webhook_key: PathBuf,
    /// Lowercased denied filter plugin names
    pub denied_filter_plugins: Vec<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            max_log_pipelines: 5,
            max_metric_pipelines: 3,
            max_trace_pipelines: 3,
            api_timeout: Duration::from_secs(10),
            reconcile_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            requeue_backoff: RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(300),
                backoff_multiplier: 2.0,
            },
            selfmon_interval: Duration::from_secs(30),
            flow: FlowThresholds::default(),
            default_gateway_replicas: 2,
            fluent_bit_image: "cr.fluentbit.io/fluent/fluent-bit:3.2.4".to_string(),
            otel_collector_image: "otel/opentelemetry-collector-contrib:0.117.0".to_string(),
            webhook_addr: SocketAddr::from(([0, 0, 0, 0], 9443)),
            webhook_cert: PathBuf::from("/tmp/k8s-webhook-server/serving-certs/tls.crt"),
            webhook_key: PathBuf::from("/tmp/k8s-webhook-server/serving-certs/tls.key"),
            denied_filter_plugins: vec!["kubernetes".to_string(), "rewrite_tag".to_string()],
        }
    }
}

impl OperatorConfig {
    /// Pipeline cap for a signal type (0 = unlimited)
    pub fn max_pipelines(&self, signal: SignalType) -> usize {
        match signal {
            SignalType::Logs => self.max_log_pipelines,
            SignalType::Metrics => self.max_metric_pipelines,
            SignalType::Traces => self.max_trace_pipelines,
        }
    }
}
