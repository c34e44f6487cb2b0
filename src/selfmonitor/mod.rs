//! Self-monitor: classifies whether each pipeline's data actually reaches
//! its backend.
//!
//! A periodic task scrapes the operational metrics every collector exposes,
//! maps per-component counters back to pipelines through the component ids
//! recorded in the applied [`CollectorConfigDocument`], and evaluates the
//! counters over a sliding window. Results land in a [`FlowHealthRegistry`]
//! that controllers read when they write the `TelemetryFlowHealthy`
//! condition. The task never blocks reconciliation.
//!
//! [`CollectorConfigDocument`]: crate::synthesis::CollectorConfigDocument

mod exposition;
mod scraper;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conditions::{
    message_for, REASON_SELF_MON_ALL_DATA_DROPPED, REASON_SELF_MON_BUFFER_FILLING_UP,
    REASON_SELF_MON_CONFIG_NOT_GENERATED, REASON_SELF_MON_FLOW_HEALTHY,
    REASON_SELF_MON_GATEWAY_THROTTLING, REASON_SELF_MON_NO_DATA_DELIVERED,
    REASON_SELF_MON_PROBING_FAILED, REASON_SELF_MON_SOME_DATA_DROPPED, TYPE_FLOW_HEALTHY,
};
use crate::config::OperatorConfig;
use crate::crd::{Condition, ConditionStatus, SignalType};
use crate::retry::with_timeout;
use crate::secrets::pipeline_key;
use crate::synthesis::{fluentbit, otel};

pub use exposition::{parse as parse_exposition, Sample};
#[cfg(test)]
pub use scraper::MockMetricsScraper;
pub use scraper::{HttpScraper, MetricsScraper, DEFAULT_SCRAPE_TIMEOUT};

/// Classification of a pipeline's data flow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowHealth {
    /// Data reaches the backend
    Healthy,
    /// Data flows partially or is held back
    Degraded,
    /// Export fails persistently
    Broken,
    /// Not enough evidence yet, or metrics unavailable
    Unknown,
}

impl std::fmt::Display for FlowHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Broken => write!(f, "Broken"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Thresholds applied to the sliding window
#[derive(Clone, Debug, PartialEq)]
pub struct FlowThresholds {
    /// Length of the evaluation window
    pub window: Duration,
    /// Share of failed exports above which a flow is broken
    pub error_ratio: f64,
    /// Queue utilisation from which a buffer counts as filling up
    pub queue_ratio: f64,
}

impl Default for FlowThresholds {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            error_ratio: 0.1,
            queue_ratio: 0.8,
        }
    }
}

/// Evaluated flow health plus the condition reason explaining it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowStatus {
    /// Classification
    pub health: FlowHealth,
    /// Condition reason
    pub reason: &'static str,
}

impl FlowStatus {
    /// Data flows without problems
    pub const HEALTHY: Self = Self {
        health: FlowHealth::Healthy,
        reason: REASON_SELF_MON_FLOW_HEALTHY,
    };

    /// Metrics missing or inconclusive
    pub const PROBING_FAILED: Self = Self {
        health: FlowHealth::Unknown,
        reason: REASON_SELF_MON_PROBING_FAILED,
    };

    /// The pipeline is not part of any applied configuration
    pub const CONFIG_NOT_GENERATED: Self = Self {
        health: FlowHealth::Unknown,
        reason: REASON_SELF_MON_CONFIG_NOT_GENERATED,
    };

    fn degraded(reason: &'static str) -> Self {
        Self {
            health: FlowHealth::Degraded,
            reason,
        }
    }

    fn broken(reason: &'static str) -> Self {
        Self {
            health: FlowHealth::Broken,
            reason,
        }
    }

    /// `TelemetryFlowHealthy` condition describing this status
    pub fn condition(&self, signal: SignalType, generation: Option<i64>) -> Condition {
        let status = match self.health {
            FlowHealth::Healthy => ConditionStatus::True,
            FlowHealth::Degraded | FlowHealth::Broken => ConditionStatus::False,
            FlowHealth::Unknown => ConditionStatus::Unknown,
        };
        Condition::new(
            TYPE_FLOW_HEALTHY,
            status,
            self.reason,
            message_for(self.reason, signal),
        )
        .generation(generation)
    }
}

// =============================================================================
// Counters
// =============================================================================

/// Cumulative counters of one pipeline at one point in time
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlowCounters {
    /// Records handed to the backend successfully
    pub sent: f64,
    /// Records dropped after failing to export
    pub failed: f64,
    /// Export attempts that failed and will be retried
    pub retrying: f64,
    /// Records accepted by the collector's inputs
    pub received: f64,
    /// Received records the pipeline's own routing filters dropped
    pub filtered: f64,
    /// Records the collector's receivers refused
    pub refused: f64,
    /// Current exporter queue fill
    pub queue_size: f64,
    /// Exporter queue capacity
    pub queue_capacity: f64,
}

impl FlowCounters {
    fn add_shared(&mut self, shared: &FlowCounters) {
        self.received += shared.received;
        self.refused += shared.refused;
    }
}

/// Attribute scraped samples to pipelines.
///
/// `components` maps the component id a collector reports in its metrics to
/// the owning pipeline. OTel receivers are shared by every pipeline of a
/// gateway, so their counters are attributed to all of them. The log agent
/// fans records out into one emitter per pipeline; a pipeline's input is its
/// emitter's count less what its namespace and container filters drop, and
/// the shared tail input is not attributed at all.
pub fn collect_counters(
    signal: SignalType,
    samples: &[Sample],
    components: &BTreeMap<String, String>,
) -> BTreeMap<String, FlowCounters> {
    let mut per_pipeline: BTreeMap<String, FlowCounters> = components
        .values()
        .map(|pipeline| (pipeline.clone(), FlowCounters::default()))
        .collect();
    let mut shared = FlowCounters::default();

    let component_label = match signal {
        SignalType::Logs => "name",
        SignalType::Metrics | SignalType::Traces => "exporter",
    };

    for sample in samples {
        let name = sample.name.as_str();
        if !sample.value.is_finite() {
            continue;
        }
        match signal {
            SignalType::Metrics | SignalType::Traces
                if name.starts_with("otelcol_receiver_accepted_") =>
            {
                shared.received += sample.value;
                continue;
            }
            SignalType::Metrics | SignalType::Traces
                if name.starts_with("otelcol_receiver_refused_") =>
            {
                shared.refused += sample.value;
                continue;
            }
            _ => {}
        }

        let Some(pipeline) = sample
            .label(component_label)
            .and_then(|component| components.get(component))
        else {
            continue;
        };
        let Some(counters) = per_pipeline.get_mut(pipeline) else {
            continue;
        };

        match signal {
            SignalType::Logs => match name {
                "fluentbit_output_proc_records_total" => counters.sent += sample.value,
                "fluentbit_output_dropped_records_total" => counters.failed += sample.value,
                "fluentbit_output_errors_total" => counters.retrying += sample.value,
                "fluentbit_input_records_total" => counters.received += sample.value,
                "fluentbit_filter_drop_records_total" => counters.filtered += sample.value,
                _ => {}
            },
            SignalType::Metrics | SignalType::Traces => {
                if name.starts_with("otelcol_exporter_sent_") {
                    counters.sent += sample.value;
                } else if name.starts_with("otelcol_exporter_send_failed_")
                    || name.starts_with("otelcol_exporter_enqueue_failed_")
                {
                    counters.failed += sample.value;
                } else if name == "otelcol_exporter_queue_size" {
                    counters.queue_size += sample.value;
                } else if name == "otelcol_exporter_queue_capacity" {
                    counters.queue_capacity += sample.value;
                }
            }
        }
    }

    for counters in per_pipeline.values_mut() {
        counters.add_shared(&shared);
    }
    per_pipeline
}

// =============================================================================
// Sliding window
// =============================================================================

/// Counter history of one pipeline bounded by the evaluation window
#[derive(Debug, Default)]
pub struct FlowWindow {
    samples: VecDeque<(Instant, FlowCounters)>,
}

/// Increase of a cumulative counter, treating a decrease as a restart
fn increase(newer: f64, older: f64) -> f64 {
    if newer >= older {
        newer - older
    } else {
        newer
    }
}

impl FlowWindow {
    /// Append a snapshot and drop snapshots older than `window`, always
    /// keeping the two most recent.
    pub fn record(&mut self, at: Instant, counters: FlowCounters, window: Duration) {
        self.samples.push_back((at, counters));
        while self.samples.len() > 2 {
            let Some((oldest, _)) = self.samples.front() else {
                break;
            };
            if at.saturating_duration_since(*oldest) <= window {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Number of snapshots held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no snapshot was recorded yet
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Classify the flow over the window
    pub fn evaluate(&self, thresholds: &FlowThresholds) -> FlowStatus {
        let (Some((_, first)), Some((_, last))) = (self.samples.front(), self.samples.back())
        else {
            return FlowStatus::PROBING_FAILED;
        };
        if self.samples.len() < 2 {
            return FlowStatus::PROBING_FAILED;
        }

        let sent = increase(last.sent, first.sent);
        let failed = increase(last.failed, first.failed);
        let received = (increase(last.received, first.received)
            - increase(last.filtered, first.filtered))
        .max(0.0);
        let refused = increase(last.refused, first.refused);
        let attempted = sent + failed;

        if failed > 0.0 && sent == 0.0 {
            return FlowStatus::broken(REASON_SELF_MON_ALL_DATA_DROPPED);
        }
        if attempted > 0.0 && failed / attempted > thresholds.error_ratio {
            return FlowStatus::broken(REASON_SELF_MON_SOME_DATA_DROPPED);
        }
        if sent == 0.0 && received > 0.0 {
            return FlowStatus::degraded(REASON_SELF_MON_NO_DATA_DELIVERED);
        }
        if failed > 0.0 {
            return FlowStatus::degraded(REASON_SELF_MON_SOME_DATA_DROPPED);
        }
        if last.queue_capacity > 0.0 && last.queue_size / last.queue_capacity >= thresholds.queue_ratio
        {
            return FlowStatus::degraded(REASON_SELF_MON_BUFFER_FILLING_UP);
        }
        if refused > 0.0 {
            return FlowStatus::degraded(REASON_SELF_MON_GATEWAY_THROTTLING);
        }
        FlowStatus::HEALTHY
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Flow health shared between the self-monitor and the controllers
#[derive(Debug, Default)]
pub struct FlowHealthRegistry {
    statuses: DashMap<String, FlowStatus>,
    components: DashMap<SignalType, BTreeMap<String, String>>,
}

impl FlowHealthRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the component ids of the configuration applied for `signal`
    pub fn publish_components(&self, signal: SignalType, components: BTreeMap<String, String>) {
        self.components.insert(signal, components);
    }

    /// Component ids of the configuration applied for `signal`
    pub fn components(&self, signal: SignalType) -> Option<BTreeMap<String, String>> {
        self.components.get(&signal).map(|c| c.clone())
    }

    /// Store an evaluation result
    pub fn set(&self, signal: SignalType, pipeline: &str, status: FlowStatus) {
        self.statuses.insert(pipeline_key(signal, pipeline), status);
    }

    /// Current flow status of a pipeline
    pub fn status(&self, signal: SignalType, pipeline: &str) -> FlowStatus {
        let applied = self
            .components
            .get(&signal)
            .is_some_and(|c| c.values().any(|p| p == pipeline));
        if !applied {
            return FlowStatus::CONFIG_NOT_GENERATED;
        }
        self.statuses
            .get(&pipeline_key(signal, pipeline))
            .map(|s| *s)
            .unwrap_or(FlowStatus::PROBING_FAILED)
    }

    /// Drop the stored status of a deleted pipeline
    pub fn forget(&self, signal: SignalType, pipeline: &str) {
        self.statuses.remove(&pipeline_key(signal, pipeline));
    }
}

// =============================================================================
// Periodic task
// =============================================================================

/// Name of the Service exposing a collector's metrics port
pub fn metrics_service_name(signal: SignalType) -> String {
    format!("{}-metrics", crate::collector_name(signal))
}

/// Metrics endpoint of the collector serving `signal`
pub fn metrics_url(signal: SignalType, namespace: &str) -> String {
    let service = metrics_service_name(signal);
    match signal {
        SignalType::Logs => format!(
            "http://{service}.{namespace}.svc:{}/api/v2/metrics/prometheus",
            fluentbit::METRICS_PORT
        ),
        SignalType::Metrics | SignalType::Traces => {
            format!("http://{service}.{namespace}.svc:{}/metrics", otel::METRICS_PORT)
        }
    }
}

/// Periodic flow-health evaluation of every applied pipeline
pub struct SelfMonitor {
    scraper: Arc<dyn MetricsScraper>,
    registry: Arc<FlowHealthRegistry>,
    targets: BTreeMap<SignalType, String>,
    thresholds: FlowThresholds,
    interval: Duration,
    windows: BTreeMap<String, FlowWindow>,
}

impl SelfMonitor {
    /// Create a monitor scraping the collectors in the operator namespace
    pub fn new(
        scraper: Arc<dyn MetricsScraper>,
        registry: Arc<FlowHealthRegistry>,
        config: &OperatorConfig,
    ) -> Self {
        let targets = SignalType::ALL
            .into_iter()
            .map(|signal| (signal, metrics_url(signal, &config.namespace)))
            .collect();
        Self {
            scraper,
            registry,
            targets,
            thresholds: config.flow.clone(),
            interval: config.selfmon_interval,
            windows: BTreeMap::new(),
        }
    }

    /// Override the scrape targets
    pub fn with_targets(mut self, targets: BTreeMap<SignalType, String>) -> Self {
        self.targets = targets;
        self
    }

    /// Scrape every collector once and update the registry
    pub async fn probe(&mut self, at: Instant) {
        let mut live = BTreeSet::new();

        for (signal, url) in &self.targets {
            let signal = *signal;
            let Some(components) = self.registry.components(signal) else {
                continue;
            };
            let pipelines: BTreeSet<&String> = components.values().collect();
            live.extend(pipelines.iter().map(|p| pipeline_key(signal, p)));

            let scraped = with_timeout(self.interval, "scrape collector metrics", self.scraper.scrape(url)).await;
            let samples = match scraped {
                Ok(samples) => samples,
                Err(e) => {
                    warn!(signal = %signal, url = %url, error = %e, "Failed to scrape collector metrics");
                    for pipeline in pipelines {
                        self.registry.set(signal, pipeline, FlowStatus::PROBING_FAILED);
                    }
                    continue;
                }
            };

            for (pipeline, counters) in collect_counters(signal, &samples, &components) {
                let window = self.windows.entry(pipeline_key(signal, &pipeline)).or_default();
                window.record(at, counters, self.thresholds.window);
                let status = window.evaluate(&self.thresholds);

                let previous = self.registry.status(signal, &pipeline);
                if previous != status {
                    info!(
                        signal = %signal,
                        pipeline = %pipeline,
                        health = %status.health,
                        reason = status.reason,
                        "Flow health changed"
                    );
                }
                self.registry.set(signal, &pipeline, status);
            }
        }

        self.windows.retain(|key, _| live.contains(key));
    }

    /// Probe on every interval tick until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Self-monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Self-monitor stopping");
                    return;
                }
                _ = ticker.tick() => self.probe(Instant::now()).await,
            }
        }
    }
}
