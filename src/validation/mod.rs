//! Spec validation for pipelines and the Telemetry module
//!
//! Validation is pure: it looks only at the submitted object and returns every
//! violation it finds. Secret existence is not checked here; that is the
//! resolver's job. The admission webhook turns a non-empty report into a
//! denial, and the controller re-runs the same checks so objects admitted
//! before a rule existed still get a clear status condition.

mod log;
mod output;

use thiserror::Error;

use crate::conditions::{
    REASON_ENDPOINT_INVALID, REASON_TLS_CONFIGURATION_INVALID, REASON_VALIDATION_FAILED,
};
use crate::crd::{
    MetricPipelineSpec, ScalingStrategy, SignalSpec, SignalType, TelemetrySpec, TracePipelineSpec,
};

/// Maximum length of a pipeline name; it ends up in object names and env vars
pub const MAX_PIPELINE_NAME_LEN: usize = 52;

/// A single reason a spec is rejected
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Violation {
    /// TLS cert without key or key without cert
    #[error("{field}: cert and key must both be set or both be empty")]
    IncompleteTlsConfig {
        /// Path of the TLS block
        field: String,
    },

    /// No output kind configured
    #[error("no output is defined")]
    NoOutputDefined,

    /// More than one output kind configured
    #[error("exactly one output must be defined, found: {}", kinds.join(", "))]
    MultipleOutputsDefined {
        /// Configured output kinds
        kinds: Vec<&'static str>,
    },

    /// Secret reference with an empty name, namespace or key
    #[error("{field}: secretKeyRef must set name, namespace and key")]
    IncompleteSecretRef {
        /// Path of the value field
        field: String,
    },

    /// Both a literal and a reference are set
    #[error("{field}: value and valueFrom are mutually exclusive")]
    ValueAndSecretRef {
        /// Path of the value field
        field: String,
    },

    /// A required value is missing
    #[error("{field}: a value or a secretKeyRef is required")]
    MissingValue {
        /// Path of the value field
        field: String,
    },

    /// Literal host is not a valid hostname
    #[error("invalid hostname '{host}'")]
    InvalidHostname {
        /// Submitted host
        host: String,
    },

    /// Literal endpoint is not a valid URL
    #[error("invalid endpoint '{endpoint}'")]
    InvalidEndpoint {
        /// Submitted endpoint
        endpoint: String,
    },

    /// HTTP uri without leading slash
    #[error("uri '{uri}' must start with '/'")]
    InvalidUri {
        /// Submitted uri
        uri: String,
    },

    /// OTLP path with gRPC transport
    #[error("output.otlp.path is only supported with the http protocol")]
    OtlpPathRequiresHttp,

    /// Header without a name
    #[error("output.otlp.headers[{index}] has no name")]
    HeaderWithoutName {
        /// Header index
        index: usize,
    },

    /// Raw section that does not parse
    #[error("custom {section} section is malformed: {reason}")]
    MalformedCustomSection {
        /// `filter` or `output`
        section: &'static str,
        /// Parser message
        reason: String,
    },

    /// Raw section without `name`
    #[error("custom {section} section has no name")]
    CustomSectionMissingName {
        /// `filter` or `output`
        section: &'static str,
    },

    /// Raw section sets a key the operator owns
    #[error("custom {section} section must not set '{key}'")]
    ForbiddenCustomKey {
        /// `filter` or `output`
        section: &'static str,
        /// Offending key
        key: String,
    },

    /// Custom filter uses a denied plugin
    #[error("filter plugin '{plugin}' is not allowed")]
    DeniedFilterPlugin {
        /// Plugin name
        plugin: String,
    },

    /// OTLP input enabled on a LogPipeline without OTLP output
    #[error("input.otlp requires output.otlp")]
    OtlpInputRequiresOtlpOutput,

    /// Variable without a secret reference
    #[error("variable '{name}' must reference a secret key")]
    VariableWithoutSecretRef {
        /// Variable name
        name: String,
    },

    /// Pipeline name is not usable
    #[error("name '{name}' must be a DNS-1123 label of at most {MAX_PIPELINE_NAME_LEN} characters")]
    InvalidName {
        /// Submitted name
        name: String,
    },

    /// Static scaling with negative replicas
    #[error("{signal} gateway: static replicas must not be negative, got {replicas}")]
    NegativeReplicas {
        /// Gateway signal type
        signal: SignalType,
        /// Submitted replicas
        replicas: i32,
    },

    /// Static scaling without a replica block
    #[error("{signal} gateway: static scaling requires static.replicas")]
    StaticReplicasMissing {
        /// Gateway signal type
        signal: SignalType,
    },
}

impl Violation {
    /// Stable machine-readable code
    pub fn reason(&self) -> &'static str {
        match self {
            Self::IncompleteTlsConfig { .. } => "IncompleteTLSConfig",
            Self::NoOutputDefined => "NoOutputDefined",
            Self::MultipleOutputsDefined { .. } => "MultipleOutputsDefined",
            Self::IncompleteSecretRef { .. } => "IncompleteSecretRef",
            Self::ValueAndSecretRef { .. } => "ValueAndSecretRef",
            Self::MissingValue { .. } => "MissingValue",
            Self::InvalidHostname { .. } => "InvalidHostname",
            Self::InvalidEndpoint { .. } => "InvalidEndpoint",
            Self::InvalidUri { .. } => "InvalidURI",
            Self::OtlpPathRequiresHttp => "OTLPPathRequiresHTTP",
            Self::HeaderWithoutName { .. } => "HeaderWithoutName",
            Self::MalformedCustomSection { .. } => "MalformedCustomSection",
            Self::CustomSectionMissingName { .. } => "CustomSectionMissingName",
            Self::ForbiddenCustomKey { .. } => "ForbiddenCustomKey",
            Self::DeniedFilterPlugin { .. } => "DeniedFilterPlugin",
            Self::OtlpInputRequiresOtlpOutput => "OTLPInputRequiresOTLPOutput",
            Self::VariableWithoutSecretRef { .. } => "VariableWithoutSecretRef",
            Self::InvalidName { .. } => "InvalidName",
            Self::NegativeReplicas { .. } => "NegativeReplicas",
            Self::StaticReplicasMissing { .. } => "StaticReplicasMissing",
        }
    }
}

/// Outcome of validating one object
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    /// Whether no violation was found
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// All violations, in check order
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Machine-readable codes of all violations
    pub fn reasons(&self) -> Vec<&'static str> {
        self.violations.iter().map(Violation::reason).collect()
    }

    /// Violations joined for admission responses and condition messages
    pub fn message(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Condition reason describing the report
    pub fn condition_reason(&self) -> &'static str {
        if self
            .violations
            .iter()
            .any(|v| matches!(v, Violation::IncompleteTlsConfig { .. }))
        {
            REASON_TLS_CONFIGURATION_INVALID
        } else if self
            .violations
            .iter()
            .any(|v| matches!(v, Violation::InvalidEndpoint { .. }))
        {
            REASON_ENDPOINT_INVALID
        } else {
            REASON_VALIDATION_FAILED
        }
    }

    /// Convert into a `Result`, for callers that only need pass/fail
    pub fn into_result(self) -> crate::Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(crate::Error::validation(self.message()))
        }
    }

    pub(crate) fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}

/// Stateless validator, parameterised by the plugin deny list
#[derive(Clone, Debug)]
pub struct SpecValidator {
    denied_filter_plugins: Vec<String>,
}

impl Default for SpecValidator {
    fn default() -> Self {
        Self::new(vec!["kubernetes".to_string(), "rewrite_tag".to_string()])
    }
}

impl SpecValidator {
    /// Create a validator denying the given (lowercase) filter plugins
    pub fn new(denied_filter_plugins: Vec<String>) -> Self {
        Self {
            denied_filter_plugins,
        }
    }

    /// Validate a named pipeline of any kind
    pub fn validate(&self, name: &str, spec: &SignalSpec) -> ValidationReport {
        let mut report = ValidationReport::default();
        check_name(name, &mut report);
        match spec {
            SignalSpec::Logs(spec) => {
                log::check_log_pipeline(spec, &self.denied_filter_plugins, &mut report)
            }
            SignalSpec::Metrics(spec) => check_metric_pipeline(spec, &mut report),
            SignalSpec::Traces(spec) => check_trace_pipeline(spec, &mut report),
        }
        report
    }

    /// Validate the Telemetry module spec
    pub fn validate_telemetry(&self, spec: &TelemetrySpec) -> ValidationReport {
        let mut report = ValidationReport::default();
        for signal in [SignalType::Metrics, SignalType::Traces] {
            let Some(scaling) = spec.scaling_for(signal) else {
                continue;
            };
            if scaling.type_ != ScalingStrategy::Static {
                continue;
            }
            match &scaling.static_ {
                None => report.push(Violation::StaticReplicasMissing { signal }),
                Some(fixed) if fixed.replicas < 0 => report.push(Violation::NegativeReplicas {
                    signal,
                    replicas: fixed.replicas,
                }),
                Some(_) => {}
            }
        }
        report
    }
}

fn check_metric_pipeline(spec: &MetricPipelineSpec, report: &mut ValidationReport) {
    match &spec.output.otlp {
        Some(otlp) => output::check_otlp_output(otlp, report),
        None => report.push(Violation::NoOutputDefined),
    }
}

fn check_trace_pipeline(spec: &TracePipelineSpec, report: &mut ValidationReport) {
    match &spec.output.otlp {
        Some(otlp) => output::check_otlp_output(otlp, report),
        None => report.push(Violation::NoOutputDefined),
    }
}

/// DNS-1123 label check, bounded so derived names stay within limits
fn check_name(name: &str, report: &mut ValidationReport) {
    if !is_dns_label(name) || name.len() > MAX_PIPELINE_NAME_LEN {
        report.push(Violation::InvalidName {
            name: name.to_string(),
        });
    }
}

pub(crate) fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        GatewaySpec, MetricPipelineOutput, OtlpOutput, ScalingSpec, TracePipelineOutput,
        ValueType,
    };

    fn trace_spec(otlp: Option<OtlpOutput>) -> SignalSpec {
        SignalSpec::Traces(TracePipelineSpec {
            output: TracePipelineOutput { otlp },
        })
    }

    fn otlp(endpoint: &str) -> OtlpOutput {
        OtlpOutput {
            endpoint: ValueType::literal(endpoint),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_trace_pipeline_passes() {
        let report =
            SpecValidator::default().validate("jaeger", &trace_spec(Some(otlp("http://jaeger:4317"))));
        assert!(report.is_ok(), "{}", report.message());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_missing_output_is_reported() {
        let report = SpecValidator::default().validate(
            "metrics",
            &SignalSpec::Metrics(MetricPipelineSpec {
                output: MetricPipelineOutput { otlp: None },
                ..Default::default()
            }),
        );
        assert_eq!(report.reasons(), vec!["NoOutputDefined"]);
        assert_eq!(report.condition_reason(), REASON_VALIDATION_FAILED);
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let validator = SpecValidator::default();
        let spec = trace_spec(Some(otlp("http://jaeger:4317")));
        for name in ["", "Upper", "-lead", "trail-", "dots.not.allowed", &"a".repeat(53)] {
            let report = validator.validate(name, &spec);
            assert_eq!(report.reasons(), vec!["InvalidName"], "name {name:?}");
        }
        assert!(validator.validate(&"a".repeat(52), &spec).is_ok());
    }

    /// Story: An operator fat-fingers the replica count
    ///
    /// A negative count is refused at admission so the gateway keeps running
    /// with its previous replica count.
    #[test]
    fn story_negative_static_replicas_are_rejected() {
        let validator = SpecValidator::default();
        let spec = TelemetrySpec {
            trace: Some(GatewaySpec {
                scaling: ScalingSpec::fixed(-1),
            }),
            metric: Some(GatewaySpec {
                scaling: ScalingSpec::fixed(0),
            }),
        };

        let report = validator.validate_telemetry(&spec);
        assert_eq!(
            report.violations(),
            &[Violation::NegativeReplicas {
                signal: SignalType::Traces,
                replicas: -1
            }]
        );
        assert!(report.message().contains("got -1"));

        let valid = TelemetrySpec {
            trace: Some(GatewaySpec {
                scaling: ScalingSpec::fixed(3),
            }),
            metric: None,
        };
        assert!(validator.validate_telemetry(&valid).is_ok());
    }

    #[test]
    fn test_static_scaling_without_replicas_is_rejected() {
        let spec = TelemetrySpec {
            metric: Some(GatewaySpec {
                scaling: ScalingSpec {
                    type_: ScalingStrategy::Static,
                    static_: None,
                },
            }),
            trace: None,
        };
        let report = SpecValidator::default().validate_telemetry(&spec);
        assert_eq!(report.reasons(), vec!["StaticReplicasMissing"]);
    }
}
