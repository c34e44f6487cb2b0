//! Telemetry Custom Resource Definition
//!
//! A single Telemetry object in the operator namespace carries settings that
//! apply to all pipelines of a signal type, most importantly how the shared
//! gateways are scaled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, SignalType};

/// Specification for the Telemetry module
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.conduit.dev",
    version = "v1beta1",
    kind = "Telemetry",
    plural = "telemetries",
    status = "TelemetryStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySpec {
    /// Metric gateway settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<GatewaySpec>,

    /// Trace gateway settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<GatewaySpec>,
}

/// Settings of one gateway
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Replica strategy
    #[serde(default)]
    pub scaling: ScalingSpec,
}

/// How gateway replicas are chosen
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ScalingStrategy {
    /// Operator-chosen replica count
    #[default]
    Dynamic,
    /// Fixed replica count from `static.replicas`
    Static,
}

/// Gateway scaling
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingSpec {
    /// Strategy
    #[serde(rename = "type", default)]
    pub type_: ScalingStrategy,

    /// Static settings, required when `type` is `Static`
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub static_: Option<StaticScaling>,
}

/// Fixed replica count
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticScaling {
    /// Desired replicas, must not be negative
    pub replicas: i32,
}

impl ScalingSpec {
    /// Static scaling with `replicas`
    pub fn fixed(replicas: i32) -> Self {
        Self {
            type_: ScalingStrategy::Static,
            static_: Some(StaticScaling { replicas }),
        }
    }

    /// Replica count this spec asks for, falling back to `dynamic_default`
    pub fn desired_replicas(&self, dynamic_default: i32) -> i32 {
        match (&self.type_, &self.static_) {
            (ScalingStrategy::Static, Some(fixed)) => fixed.replicas,
            _ => dynamic_default,
        }
    }
}

impl TelemetrySpec {
    /// Scaling settings of the gateway serving `signal`, if it has one
    pub fn scaling_for(&self, signal: SignalType) -> Option<&ScalingSpec> {
        let gateway = match signal {
            SignalType::Metrics => self.metric.as_ref(),
            SignalType::Traces => self.trace.as_ref(),
            SignalType::Logs => None,
        };
        gateway.map(|g| &g.scaling)
    }
}

/// Aggregate state of the module
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TelemetryState {
    /// Not evaluated yet
    #[default]
    Pending,
    /// All workloads ready
    Ready,
    /// Some workload is not ready
    Warning,
    /// Spec rejected
    Error,
}

impl std::fmt::Display for TelemetryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Warning => write!(f, "Warning"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Status for the Telemetry module
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryStatus {
    /// Aggregate state
    #[serde(default)]
    pub state: TelemetryState,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
