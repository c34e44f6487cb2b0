//! Condition types, reasons and messages written to pipeline status
//!
//! Type and reason strings are part of the observable contract: dashboards
//! and CI checks poll for them, so they must never change spelling.
//!
//! Status lists keep current condition types first. The legacy `Pending` and
//! `Running` types are still written for older consumers, always after the
//! current types, and at most one of them is `True`.

use crate::crd::{Condition, ConditionStatus, SignalType};

/// Whether the pipeline's share of the collector configuration was generated
pub const TYPE_CONFIGURATION_GENERATED: &str = "ConfigurationGenerated";
/// Whether the per-node agent serving the pipeline is ready
pub const TYPE_AGENT_HEALTHY: &str = "AgentHealthy";
/// Whether the gateway serving the pipeline is ready
pub const TYPE_GATEWAY_HEALTHY: &str = "GatewayHealthy";
/// Whether data actually reaches the backend
pub const TYPE_FLOW_HEALTHY: &str = "TelemetryFlowHealthy";
/// Legacy lifecycle type, `True` while not running
pub const TYPE_PENDING: &str = "Pending";
/// Legacy lifecycle type, `True` once running
pub const TYPE_RUNNING: &str = "Running";

/// Telemetry module: whether the collectors of a signal type are healthy
pub fn components_healthy_type(signal: SignalType) -> &'static str {
    match signal {
        SignalType::Logs => "LogComponentsHealthy",
        SignalType::Metrics => "MetricComponentsHealthy",
        SignalType::Traces => "TraceComponentsHealthy",
    }
}

/// Legacy types, always listed after current ones
pub const LEGACY_TYPES: [&str; 2] = [TYPE_PENDING, TYPE_RUNNING];

/// Configuration generated for an agent-backed pipeline
pub const REASON_AGENT_CONFIGURED: &str = "AgentConfigured";
/// Configuration generated for a gateway-backed pipeline
pub const REASON_GATEWAY_CONFIGURED: &str = "GatewayConfigured";
/// Pipeline cap reached
pub const REASON_MAX_PIPELINES_EXCEEDED: &str = "MaxPipelinesExceeded";
/// A referenced secret or key does not exist
pub const REASON_REFERENCED_SECRET_MISSING: &str = "ReferencedSecretMissing";
/// Spec rejected by validation
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
/// TLS material is incomplete or cannot be parsed
pub const REASON_TLS_CONFIGURATION_INVALID: &str = "TLSConfigurationInvalid";
/// Client certificate and private key do not belong together
pub const REASON_TLS_KEY_PAIR_MISMATCH: &str = "TLSCertificateKeyPairInvalid";
/// A configured certificate is past its expiry
pub const REASON_TLS_CERTIFICATE_EXPIRED: &str = "TLSCertificateExpired";
/// A configured certificate expires within two weeks; the pipeline still runs
pub const REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE: &str = "TLSCertificateAboutToExpire";
/// Literal OTLP endpoint is not a valid URL
pub const REASON_ENDPOINT_INVALID: &str = "EndpointInvalid";
/// Synthesizing the collector document failed
pub const REASON_SYNTHESIS_FAILED: &str = "SynthesisFailed";
/// Agent pods ready
pub const REASON_AGENT_READY: &str = "AgentReady";
/// Agent pods not ready
pub const REASON_AGENT_NOT_READY: &str = "AgentNotReady";
/// Gateway pods ready
pub const REASON_GATEWAY_READY: &str = "GatewayReady";
/// Gateway pods not ready
pub const REASON_GATEWAY_NOT_READY: &str = "GatewayNotReady";
/// A new configuration is rolling out
pub const REASON_ROLLOUT_IN_PROGRESS: &str = "RolloutInProgress";
/// All module components running
pub const REASON_COMPONENTS_RUNNING: &str = "ComponentsRunning";
/// Module spec rejected
pub const REASON_SCALING_INVALID: &str = "ScalingInvalid";
/// Data flows
pub const REASON_SELF_MON_FLOW_HEALTHY: &str = "FlowHealthy";
/// Backend rejects or is unreachable for all data
pub const REASON_SELF_MON_ALL_DATA_DROPPED: &str = "AllDataDropped";
/// Part of the data is dropped
pub const REASON_SELF_MON_SOME_DATA_DROPPED: &str = "SomeDataDropped";
/// Export buffer close to full
pub const REASON_SELF_MON_BUFFER_FILLING_UP: &str = "BufferFillingUp";
/// Input receives data but nothing is delivered
pub const REASON_SELF_MON_NO_DATA_DELIVERED: &str = "NoLogsDelivered";
/// Gateway refuses incoming data
pub const REASON_SELF_MON_GATEWAY_THROTTLING: &str = "GatewayThrottling";
/// Flow not evaluated because no configuration exists for the pipeline
pub const REASON_SELF_MON_CONFIG_NOT_GENERATED: &str = "ConfigurationNotGenerated";
/// Collector metrics could not be scraped or are not conclusive yet
pub const REASON_SELF_MON_PROBING_FAILED: &str = "ProbingFailed";

/// Prefix of every legacy `Pending` message
pub const PENDING_DEPRECATION_PREFIX: &str = "[NOTE: The \"Pending\" type is deprecated] ";
/// Prefix of every legacy `Running` message
pub const RUNNING_DEPRECATION_PREFIX: &str = "[NOTE: The \"Running\" type is deprecated] ";

/// Legacy `Running=True` reason for a signal type
pub fn legacy_running_reason(signal: SignalType) -> &'static str {
    match signal {
        SignalType::Logs => "FluentBitDaemonSetReady",
        SignalType::Metrics => "MetricGatewayDeploymentReady",
        SignalType::Traces => "TraceGatewayDeploymentReady",
    }
}

/// Legacy `Pending=True` reason when workloads are not ready yet
pub fn legacy_not_ready_reason(signal: SignalType) -> &'static str {
    match signal {
        SignalType::Logs => "FluentBitDaemonSetNotReady",
        SignalType::Metrics => "MetricGatewayDeploymentNotReady",
        SignalType::Traces => "TraceGatewayDeploymentNotReady",
    }
}

/// Human-readable message for a reason
pub fn message_for(reason: &str, signal: SignalType) -> String {
    let kind = match signal {
        SignalType::Logs => "LogPipeline",
        SignalType::Metrics => "MetricPipeline",
        SignalType::Traces => "TracePipeline",
    };
    match reason {
        REASON_AGENT_CONFIGURED | REASON_GATEWAY_CONFIGURED => {
            format!("{kind} specification is successfully applied to the configuration of the collector")
        }
        REASON_MAX_PIPELINES_EXCEEDED => format!("Maximum pipeline count limit exceeded for {kind}s"),
        REASON_REFERENCED_SECRET_MISSING => {
            "One or more referenced Secrets are missing".to_string()
        }
        REASON_AGENT_READY => "Agent DaemonSet is ready".to_string(),
        REASON_AGENT_NOT_READY => "Agent DaemonSet is not ready".to_string(),
        REASON_GATEWAY_READY => "Gateway Deployment is ready".to_string(),
        REASON_GATEWAY_NOT_READY => "Gateway Deployment is not ready".to_string(),
        REASON_ROLLOUT_IN_PROGRESS => "Pods are being started or updated".to_string(),
        REASON_COMPONENTS_RUNNING => "All components are running".to_string(),
        REASON_SCALING_INVALID => "Gateway scaling settings are invalid".to_string(),
        REASON_SELF_MON_FLOW_HEALTHY => "No problems detected in the telemetry flow".to_string(),
        REASON_SELF_MON_ALL_DATA_DROPPED => {
            "Backend is not reachable or rejects data. All data is dropped".to_string()
        }
        REASON_SELF_MON_SOME_DATA_DROPPED => {
            "Backend is reachable, but rejects some data. Some data is dropped".to_string()
        }
        REASON_SELF_MON_BUFFER_FILLING_UP => {
            "Buffer nearing capacity. Incoming data rate exceeds export rate".to_string()
        }
        REASON_SELF_MON_NO_DATA_DELIVERED => {
            "Backend is not reachable or rejects data. Data is buffered and not yet dropped".to_string()
        }
        REASON_SELF_MON_GATEWAY_THROTTLING => {
            "Gateway is refusing data. Increase the gateway replica count".to_string()
        }
        REASON_SELF_MON_CONFIG_NOT_GENERATED => {
            "No flow health evaluated because the pipeline configuration is not generated".to_string()
        }
        REASON_SELF_MON_PROBING_FAILED => {
            "Could not determine the health of the telemetry flow".to_string()
        }
        _ => String::new(),
    }
}

/// Find a condition by type
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether a condition of `type_` exists with status `True`
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Insert or update a condition.
///
/// `lastTransitionTime` only moves when the status flips. Legacy types are
/// kept after current types.
pub fn set(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.last_transition_time = condition.last_transition_time;
            }
            existing.status = condition.status;
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        None => conditions.push(condition),
    }
    order_legacy_last(conditions);
}

/// Remove a condition by type
pub fn remove(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

/// Stable partition moving legacy types behind current types
pub fn order_legacy_last(conditions: &mut [Condition]) {
    conditions.sort_by_key(|c| LEGACY_TYPES.contains(&c.type_.as_str()));
}

/// Mark a pipeline as not running: `Running` is dropped and `Pending=True`
/// is appended with the given reason.
pub fn set_pending(
    conditions: &mut Vec<Condition>,
    generation: Option<i64>,
    reason: &str,
    signal: SignalType,
) {
    remove(conditions, TYPE_RUNNING);
    let message = format!("{PENDING_DEPRECATION_PREFIX}{}", message_for(reason, signal));
    set(
        conditions,
        Condition::new(TYPE_PENDING, ConditionStatus::True, reason, message).generation(generation),
    );
}

/// Mark a pipeline as running: `Pending=False` then `Running=True`, in that
/// order, after all current types.
pub fn set_running(conditions: &mut Vec<Condition>, generation: Option<i64>, signal: SignalType) {
    let reason = legacy_running_reason(signal);
    let pending_message = format!(
        "{PENDING_DEPRECATION_PREFIX}{}",
        message_for(REASON_ROLLOUT_IN_PROGRESS, signal)
    );
    let running_message = format!(
        "{RUNNING_DEPRECATION_PREFIX}{}",
        message_for(REASON_COMPONENTS_RUNNING, signal)
    );

    set(
        conditions,
        Condition::new(TYPE_PENDING, ConditionStatus::False, reason, pending_message)
            .generation(generation),
    );
    set(
        conditions,
        Condition::new(TYPE_RUNNING, ConditionStatus::True, reason, running_message)
            .generation(generation),
    );
    // Pending must precede Running
    let pending = conditions.iter().position(|c| c.type_ == TYPE_PENDING);
    let running = conditions.iter().position(|c| c.type_ == TYPE_RUNNING);
    if let (Some(p), Some(r)) = (pending, running) {
        if p > r {
            conditions.swap(p, r);
        }
    }
}

/// Check the lifecycle invariants of a condition list.
///
/// Returns a description of the first violation found.
pub fn lifecycle_violation(conditions: &[Condition]) -> Option<String> {
    if is_true(conditions, TYPE_PENDING) && is_true(conditions, TYPE_RUNNING) {
        return Some("Pending and Running are both True".to_string());
    }
    let first_legacy = conditions
        .iter()
        .position(|c| LEGACY_TYPES.contains(&c.type_.as_str()));
    if let Some(idx) = first_legacy {
        if let Some(late) = conditions[idx..]
            .iter()
            .find(|c| !LEGACY_TYPES.contains(&c.type_.as_str()))
        {
            return Some(format!("{} listed after a legacy condition", late.type_));
        }
    }
    None
}
