//! Per-pipeline lifecycle and the status conditions derived from it
//!
//! A pipeline moves `Pending → ConfigGenerated → Deploying → Running`. It
//! drops back to `Pending` when its configuration can no longer be generated
//! (validation, missing secret, capacity) or when a collector serving it
//! becomes unhealthy. The phase is recomputed from scratch on every
//! reconcile; nothing but the conditions written to status is persisted.

use crate::conditions::{
    self, legacy_not_ready_reason, message_for, REASON_AGENT_CONFIGURED, REASON_AGENT_NOT_READY,
    REASON_AGENT_READY, REASON_GATEWAY_CONFIGURED, REASON_GATEWAY_NOT_READY, REASON_GATEWAY_READY,
    REASON_MAX_PIPELINES_EXCEEDED, REASON_REFERENCED_SECRET_MISSING, REASON_ROLLOUT_IN_PROGRESS,
    REASON_SYNTHESIS_FAILED, REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE, REASON_VALIDATION_FAILED,
    TYPE_AGENT_HEALTHY, TYPE_CONFIGURATION_GENERATED,
    TYPE_GATEWAY_HEALTHY,
};
use crate::crd::{Condition, ConditionStatus, SignalType};
use crate::selfmonitor::FlowStatus;
use crate::workload::CollectorRole;

/// Lifecycle phase of a pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelinePhase {
    /// Not part of the applied configuration, or a collector is unhealthy
    Pending,
    /// Part of the document, collectors not observed yet
    ConfigGenerated,
    /// Collectors are rolling out the document
    Deploying,
    /// Collectors run the document and are ready
    Running,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::ConfigGenerated => write!(f, "ConfigGenerated"),
            Self::Deploying => write!(f, "Deploying"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// What the synthesis round decided for one pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigVerdict {
    /// Routed by the applied document
    Admitted,
    /// Routed by the applied document, with a client certificate close to
    /// expiry
    CertificateExpiring {
        /// Expiry notice
        message: String,
    },
    /// Rejected by validation
    Invalid {
        /// Condition reason
        reason: &'static str,
        /// Joined violations
        message: String,
    },
    /// A referenced secret or key is missing, or unreadable
    SecretMissing {
        /// Which reference failed
        message: String,
    },
    /// Signal type at capacity
    MaxPipelinesExceeded,
    /// An older pipeline holds a variable or file name this one needs
    Conflict {
        /// What is taken, and by whom
        message: String,
    },
    /// The pipeline's routing unit could not be rendered
    SynthesisFailed {
        /// Renderer message
        message: String,
    },
}

impl ConfigVerdict {
    /// Whether the pipeline is part of the document
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted | Self::CertificateExpiring { .. })
    }

    /// Condition reason for `ConfigurationGenerated=False`, or `None` when admitted
    pub fn rejection_reason(&self) -> Option<&'static str> {
        match self {
            Self::Admitted | Self::CertificateExpiring { .. } => None,
            Self::Invalid { reason, .. } => Some(*reason),
            Self::SecretMissing { .. } => Some(REASON_REFERENCED_SECRET_MISSING),
            Self::MaxPipelinesExceeded => Some(REASON_MAX_PIPELINES_EXCEEDED),
            Self::Conflict { .. } => Some(REASON_VALIDATION_FAILED),
            Self::SynthesisFailed { .. } => Some(REASON_SYNTHESIS_FAILED),
        }
    }

    /// Whether the verdict can change without a spec edit
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SecretMissing { .. } | Self::MaxPipelinesExceeded | Self::Conflict { .. }
        )
    }
}

/// Observed state of one collector workload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// All desired pods run the current template and are ready
    Ready,
    /// Pods are being replaced or started
    RollingOut,
    /// Pods run the current template but some are not ready
    NotReady,
    /// The workload does not exist (yet)
    Missing,
}

/// Inputs to the status of one pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineEvaluation {
    /// Signal type of the pipeline
    pub signal: SignalType,
    /// Generation the evaluation describes
    pub generation: Option<i64>,
    /// Synthesis verdict
    pub verdict: ConfigVerdict,
    /// Readiness of every collector serving the pipeline
    pub workloads: Vec<(CollectorRole, Readiness)>,
    /// Flow health from the self-monitor
    pub flow: FlowStatus,
}

impl PipelineEvaluation {
    /// Phase implied by the evaluation
    pub fn phase(&self) -> PipelinePhase {
        if !self.verdict.is_admitted() {
            return PipelinePhase::Pending;
        }
        let states = self.workloads.iter().map(|(_, r)| *r);
        if self.workloads.is_empty() || states.clone().any(|r| r == Readiness::Missing) {
            PipelinePhase::ConfigGenerated
        } else if states.clone().any(|r| r == Readiness::NotReady) {
            PipelinePhase::Pending
        } else if states.clone().any(|r| r == Readiness::RollingOut) {
            PipelinePhase::Deploying
        } else {
            PipelinePhase::Running
        }
    }

    /// Merge the evaluation into `existing` conditions.
    ///
    /// Condition types this evaluation does not speak for are left alone;
    /// transition times only move on status flips.
    pub fn conditions(&self, existing: &[Condition]) -> Vec<Condition> {
        let signal = self.signal;
        let generation = self.generation;
        let mut out = existing.to_vec();

        let generated = match (&self.verdict, self.verdict.rejection_reason()) {
            (ConfigVerdict::CertificateExpiring { message }, None) => Condition::new(
                TYPE_CONFIGURATION_GENERATED,
                ConditionStatus::True,
                REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE,
                message.clone(),
            ),
            (_, None) => {
                let reason = if signal == SignalType::Logs {
                    REASON_AGENT_CONFIGURED
                } else {
                    REASON_GATEWAY_CONFIGURED
                };
                Condition::new(
                    TYPE_CONFIGURATION_GENERATED,
                    ConditionStatus::True,
                    reason,
                    message_for(reason, signal),
                )
            }
            (verdict, Some(reason)) => {
                let message = match verdict {
                    ConfigVerdict::Invalid { message, .. }
                    | ConfigVerdict::SecretMissing { message }
                    | ConfigVerdict::Conflict { message }
                    | ConfigVerdict::SynthesisFailed { message } => message.clone(),
                    _ => message_for(reason, signal),
                };
                Condition::new(TYPE_CONFIGURATION_GENERATED, ConditionStatus::False, reason, message)
            }
        };
        conditions::set(&mut out, generated.generation(generation));

        for (role, readiness) in &self.workloads {
            conditions::set(&mut out, health_condition(*role, *readiness, signal).generation(generation));
        }

        conditions::set(&mut out, self.flow.condition(signal, generation));

        match self.phase() {
            PipelinePhase::Running => conditions::set_running(&mut out, generation, signal),
            phase => {
                let reason = match (self.verdict.rejection_reason(), phase) {
                    (Some(reason), _) => reason,
                    (None, PipelinePhase::Deploying) => REASON_ROLLOUT_IN_PROGRESS,
                    (None, _) => legacy_not_ready_reason(signal),
                };
                conditions::set_pending(&mut out, generation, reason, signal);
            }
        }

        out
    }
}

fn health_condition(role: CollectorRole, readiness: Readiness, signal: SignalType) -> Condition {
    let (type_, ready, not_ready) = if role.is_agent() {
        (TYPE_AGENT_HEALTHY, REASON_AGENT_READY, REASON_AGENT_NOT_READY)
    } else {
        (TYPE_GATEWAY_HEALTHY, REASON_GATEWAY_READY, REASON_GATEWAY_NOT_READY)
    };
    let (status, reason) = match readiness {
        Readiness::Ready => (ConditionStatus::True, ready),
        Readiness::RollingOut => (ConditionStatus::False, REASON_ROLLOUT_IN_PROGRESS),
        Readiness::NotReady | Readiness::Missing => (ConditionStatus::False, not_ready),
    };
    Condition::new(type_, status, reason, message_for(reason, signal))
}

/// Whether writing `next` over `current` would change anything besides timestamps
pub fn conditions_changed(current: &[Condition], next: &[Condition]) -> bool {
    current.len() != next.len() || current.iter().zip(next).any(|(a, b)| !a.same_state(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{
        find, is_true, lifecycle_violation, REASON_SELF_MON_CONFIG_NOT_GENERATED, TYPE_FLOW_HEALTHY,
        TYPE_PENDING, TYPE_RUNNING,
    };

    fn evaluation(verdict: ConfigVerdict, workloads: Vec<(CollectorRole, Readiness)>) -> PipelineEvaluation {
        PipelineEvaluation {
            signal: SignalType::Logs,
            generation: Some(1),
            verdict,
            workloads,
            flow: FlowStatus::HEALTHY,
        }
    }

    fn types(conditions: &[Condition]) -> Vec<&str> {
        conditions.iter().map(|c| c.type_.as_str()).collect()
    }

    // =========================================================================
    // Phase derivation
    // =========================================================================

    #[test]
    fn test_phase_follows_verdict_and_readiness() {
        let agent = |r| vec![(CollectorRole::LogAgent, r)];
        assert_eq!(
            evaluation(ConfigVerdict::MaxPipelinesExceeded, agent(Readiness::Ready)).phase(),
            PipelinePhase::Pending
        );
        assert_eq!(
            evaluation(ConfigVerdict::Admitted, agent(Readiness::Missing)).phase(),
            PipelinePhase::ConfigGenerated
        );
        assert_eq!(
            evaluation(ConfigVerdict::Admitted, agent(Readiness::RollingOut)).phase(),
            PipelinePhase::Deploying
        );
        assert_eq!(
            evaluation(ConfigVerdict::Admitted, agent(Readiness::Ready)).phase(),
            PipelinePhase::Running
        );
        assert_eq!(
            evaluation(ConfigVerdict::Admitted, agent(Readiness::NotReady)).phase(),
            PipelinePhase::Pending
        );
    }

    #[test]
    fn test_any_unhealthy_collector_blocks_running() {
        let eval = evaluation(
            ConfigVerdict::Admitted,
            vec![
                (CollectorRole::MetricGateway, Readiness::Ready),
                (CollectorRole::MetricAgent, Readiness::NotReady),
            ],
        );
        assert_eq!(eval.phase(), PipelinePhase::Pending);
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    /// Story: a log pipeline comes up
    ///
    /// While the agent rolls out the pipeline is pending with a rollout
    /// reason; once ready, Running=True follows Pending=False and current
    /// condition types stay in front.
    #[test]
    fn story_pipeline_reaches_running() {
        let deploying = evaluation(ConfigVerdict::Admitted, vec![(CollectorRole::LogAgent, Readiness::RollingOut)]);
        let conditions = deploying.conditions(&[]);
        assert_eq!(
            types(&conditions),
            vec![TYPE_CONFIGURATION_GENERATED, TYPE_AGENT_HEALTHY, TYPE_FLOW_HEALTHY, TYPE_PENDING]
        );
        assert_eq!(find(&conditions, TYPE_PENDING).unwrap().reason, REASON_ROLLOUT_IN_PROGRESS);

        let running = evaluation(ConfigVerdict::Admitted, vec![(CollectorRole::LogAgent, Readiness::Ready)]);
        let conditions = running.conditions(&conditions);
        assert_eq!(
            types(&conditions),
            vec![
                TYPE_CONFIGURATION_GENERATED,
                TYPE_AGENT_HEALTHY,
                TYPE_FLOW_HEALTHY,
                TYPE_PENDING,
                TYPE_RUNNING
            ]
        );
        assert!(is_true(&conditions, TYPE_RUNNING));
        assert!(!is_true(&conditions, TYPE_PENDING));
        assert_eq!(find(&conditions, TYPE_AGENT_HEALTHY).unwrap().reason, REASON_AGENT_READY);
        assert!(lifecycle_violation(&conditions).is_none());
    }

    /// Story: the pipeline cap is reached
    #[test]
    fn story_capacity_rejection_is_pending() {
        let mut eval = evaluation(
            ConfigVerdict::MaxPipelinesExceeded,
            vec![(CollectorRole::LogAgent, Readiness::Ready)],
        );
        eval.flow = FlowStatus::CONFIG_NOT_GENERATED;
        let conditions = eval.conditions(&[]);

        let generated = find(&conditions, TYPE_CONFIGURATION_GENERATED).unwrap();
        assert_eq!(generated.status, ConditionStatus::False);
        assert_eq!(generated.reason, REASON_MAX_PIPELINES_EXCEEDED);
        assert_eq!(
            generated.message,
            "Maximum pipeline count limit exceeded for LogPipelines"
        );
        let pending = find(&conditions, TYPE_PENDING).unwrap();
        assert_eq!(pending.status, ConditionStatus::True);
        assert_eq!(pending.reason, REASON_MAX_PIPELINES_EXCEEDED);
        assert_eq!(
            find(&conditions, TYPE_FLOW_HEALTHY).unwrap().reason,
            REASON_SELF_MON_CONFIG_NOT_GENERATED
        );
        assert!(find(&conditions, TYPE_RUNNING).is_none());
    }

    /// Story: the agent of a running pipeline becomes unhealthy
    #[test]
    fn story_running_falls_back_to_pending() {
        let running = evaluation(ConfigVerdict::Admitted, vec![(CollectorRole::LogAgent, Readiness::Ready)]);
        let conditions = running.conditions(&[]);

        let broken = evaluation(ConfigVerdict::Admitted, vec![(CollectorRole::LogAgent, Readiness::NotReady)]);
        let conditions = broken.conditions(&conditions);

        assert!(find(&conditions, TYPE_RUNNING).is_none());
        assert_eq!(
            find(&conditions, TYPE_PENDING).unwrap().reason,
            "FluentBitDaemonSetNotReady"
        );
        assert_eq!(
            find(&conditions, TYPE_AGENT_HEALTHY).unwrap().reason,
            REASON_AGENT_NOT_READY
        );
        assert!(lifecycle_violation(&conditions).is_none());
    }

    #[test]
    fn test_flow_health_is_reported_independently_of_running() {
        let mut eval = PipelineEvaluation {
            signal: SignalType::Traces,
            generation: Some(4),
            verdict: ConfigVerdict::Admitted,
            workloads: vec![(CollectorRole::TraceGateway, Readiness::Ready)],
            flow: FlowStatus::PROBING_FAILED,
        };
        eval.flow.health = crate::selfmonitor::FlowHealth::Broken;
        eval.flow.reason = crate::conditions::REASON_SELF_MON_ALL_DATA_DROPPED;
        let conditions = eval.conditions(&[]);

        assert!(is_true(&conditions, TYPE_RUNNING));
        assert!(is_true(&conditions, TYPE_GATEWAY_HEALTHY));
        assert_eq!(find(&conditions, TYPE_FLOW_HEALTHY).unwrap().status, ConditionStatus::False);
        assert_eq!(
            find(&conditions, TYPE_CONFIGURATION_GENERATED).unwrap().reason,
            REASON_GATEWAY_CONFIGURED
        );
    }

    #[test]
    fn test_validation_message_is_carried() {
        let eval = evaluation(
            ConfigVerdict::Invalid {
                reason: crate::conditions::REASON_TLS_CONFIGURATION_INVALID,
                message: "output.http.tls: cert and key must both be set or both be empty".to_string(),
            },
            vec![],
        );
        let conditions = eval.conditions(&[]);
        let generated = find(&conditions, TYPE_CONFIGURATION_GENERATED).unwrap();
        assert!(generated.message.contains("cert and key"));
        assert!(!eval.verdict.is_transient());
        assert!(ConfigVerdict::MaxPipelinesExceeded.is_transient());
    }

    #[test]
    fn test_expiring_certificate_keeps_pipeline_running() {
        let eval = evaluation(
            ConfigVerdict::CertificateExpiring {
                message: "output.http.tls: TLS certificate is about to expire".to_string(),
            },
            vec![(CollectorRole::LogAgent, Readiness::Ready)],
        );
        assert_eq!(eval.phase(), PipelinePhase::Running);

        let conditions = eval.conditions(&[]);
        let generated = find(&conditions, TYPE_CONFIGURATION_GENERATED).unwrap();
        assert_eq!(generated.status, ConditionStatus::True);
        assert_eq!(generated.reason, REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE);
        assert!(generated.message.contains("about to expire"));
        assert!(is_true(&conditions, TYPE_RUNNING));
    }

    #[test]
    fn test_conflict_is_a_transient_validation_failure() {
        let verdict = ConfigVerdict::Conflict {
            message: "variable 'TOKEN' is already used by pipeline 'first'".to_string(),
        };
        assert!(verdict.is_transient());
        let conditions = evaluation(verdict, vec![]).conditions(&[]);
        let generated = find(&conditions, TYPE_CONFIGURATION_GENERATED).unwrap();
        assert_eq!(generated.status, ConditionStatus::False);
        assert_eq!(generated.reason, REASON_VALIDATION_FAILED);
        assert!(generated.message.contains("pipeline 'first'"));
        assert!(is_true(&conditions, TYPE_PENDING));
    }

    #[test]
    fn test_conditions_changed_ignores_timestamps() {
        let eval = evaluation(ConfigVerdict::Admitted, vec![(CollectorRole::LogAgent, Readiness::Ready)]);
        let first = eval.conditions(&[]);
        let second = eval.conditions(&first);
        assert!(!conditions_changed(&first, &second));

        let other = evaluation(ConfigVerdict::MaxPipelinesExceeded, vec![]).conditions(&first);
        assert!(conditions_changed(&first, &other));
    }
}
