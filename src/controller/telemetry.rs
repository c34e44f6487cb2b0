//! Telemetry module controller
//!
//! Turns the gateway scaling settings into replica targets, scales the
//! gateway Deployments and reports whether the collectors of every signal
//! type are running.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::context::Context;
use super::state::{conditions_changed, Readiness};
use crate::conditions::{
    self, components_healthy_type, message_for, REASON_AGENT_NOT_READY, REASON_COMPONENTS_RUNNING,
    REASON_GATEWAY_NOT_READY, REASON_ROLLOUT_IN_PROGRESS, REASON_SCALING_INVALID,
};
use crate::crd::{Condition, ConditionStatus, SignalType, Telemetry, TelemetryState, TelemetryStatus};
use crate::kube_utils::merge_patch_status;
use crate::retry::with_timeout;
use crate::workload::CollectorRole;
use crate::Error;

/// Trait abstracting Telemetry status writes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Replace the status of `namespace/name`
    async fn patch_status(&self, namespace: &str, name: &str, status: &TelemetryStatus) -> Result<(), Error>;
}

/// Real store backed by the Kubernetes API
pub struct TelemetryStoreImpl {
    client: Client,
    timeout: Duration,
}

impl TelemetryStoreImpl {
    /// Create a store bounding every call by `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl TelemetryStore for TelemetryStoreImpl {
    async fn patch_status(&self, namespace: &str, name: &str, status: &TelemetryStatus) -> Result<(), Error> {
        let api: Api<Telemetry> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        with_timeout(self.timeout, "patch telemetry status", async {
            merge_patch_status(&api, name, &patch).await.map_err(Error::from)
        })
        .await?;
        Ok(())
    }
}

/// Collectors reported under the module condition of `signal`
fn roles_of(signal: SignalType) -> &'static [CollectorRole] {
    match signal {
        SignalType::Logs => &[CollectorRole::LogAgent],
        SignalType::Metrics => &[CollectorRole::MetricGateway, CollectorRole::MetricAgent],
        SignalType::Traces => &[CollectorRole::TraceGateway],
    }
}

/// Module condition for the collectors of one signal type. Collectors that
/// do not exist have no pipeline to serve and do not count.
pub fn components_condition(
    signal: SignalType,
    observed: &[(CollectorRole, Readiness)],
    generation: Option<i64>,
) -> Condition {
    let type_ = components_healthy_type(signal);
    let not_ready = observed.iter().find(|(_, r)| *r == Readiness::NotReady);
    let rolling = observed.iter().any(|(_, r)| *r == Readiness::RollingOut);

    let (status, reason) = match not_ready {
        Some((role, _)) if role.is_agent() => (ConditionStatus::False, REASON_AGENT_NOT_READY),
        Some(_) => (ConditionStatus::False, REASON_GATEWAY_NOT_READY),
        None if rolling => (ConditionStatus::False, REASON_ROLLOUT_IN_PROGRESS),
        None => (ConditionStatus::True, REASON_COMPONENTS_RUNNING),
    };
    Condition::new(type_, status, reason, message_for(reason, signal)).generation(generation)
}

/// Reconcile the Telemetry module object
#[instrument(skip(telemetry, ctx), fields(telemetry = %telemetry.name_any()))]
pub async fn reconcile(telemetry: Arc<Telemetry>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = telemetry.namespace().unwrap_or_default();
    if namespace != ctx.config.namespace {
        warn!(namespace = %namespace, "Ignoring Telemetry outside the operator namespace");
        return Ok(Action::await_change());
    }
    let key = format!("telemetry/{}", telemetry.name_any());
    let action = with_timeout(
        ctx.config.reconcile_timeout,
        "reconcile telemetry",
        reconcile_telemetry(&telemetry, &ctx),
    )
    .await?;
    ctx.backoff.reset(&key);
    Ok(action)
}

async fn reconcile_telemetry(telemetry: &Telemetry, ctx: &Context) -> Result<Action, Error> {
    let generation = telemetry.metadata.generation;
    let current = telemetry.status.clone().unwrap_or_default();
    let mut next = current.conditions.clone();

    let report = ctx.validator.validate_telemetry(&telemetry.spec);
    let state = if !report.is_ok() {
        warn!(violations = %report.message(), "Telemetry scaling rejected");
        for signal in [SignalType::Metrics, SignalType::Traces] {
            conditions::set(
                &mut next,
                Condition::new(
                    components_healthy_type(signal),
                    ConditionStatus::False,
                    REASON_SCALING_INVALID,
                    report.message(),
                )
                .generation(generation),
            );
        }
        TelemetryState::Error
    } else {
        for role in [CollectorRole::MetricGateway, CollectorRole::TraceGateway] {
            let signal = role.signal();
            let replicas = telemetry
                .spec
                .scaling_for(signal)
                .map(|s| s.desired_replicas(ctx.config.default_gateway_replicas))
                .unwrap_or(ctx.config.default_gateway_replicas);
            // The target is recorded only once the gateway was scaled
            if ctx.replicas.get(signal) != replicas {
                ctx.workloads.scale(role, replicas).await?;
                ctx.replicas.set(signal, replicas);
            }
        }

        let mut healthy = true;
        for signal in SignalType::ALL {
            let mut observed = Vec::new();
            for role in roles_of(signal) {
                observed.push((*role, ctx.workloads.readiness(*role).await?));
            }
            let condition = components_condition(signal, &observed, generation);
            healthy &= condition.status == ConditionStatus::True;
            conditions::set(&mut next, condition);
        }
        if healthy {
            TelemetryState::Ready
        } else {
            TelemetryState::Warning
        }
    };

    if state != current.state || conditions_changed(&current.conditions, &next) {
        let status = TelemetryStatus {
            state,
            conditions: next,
        };
        let namespace = telemetry.namespace().unwrap_or_default();
        ctx.telemetry
            .patch_status(&namespace, &telemetry.name_any(), &status)
            .await?;
        info!(state = %state, "Updated telemetry status");
    }

    Ok(match state {
        TelemetryState::Error => Action::await_change(),
        _ => Action::requeue(ctx.config.selfmon_interval),
    })
}

/// Requeue a failed Telemetry reconcile with backoff
pub fn error_policy(telemetry: Arc<Telemetry>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = telemetry.name_any();
    let delay = ctx.backoff.next_delay(&format!("telemetry/{name}"));
    error!(%error, telemetry = %name, delay_secs = delay.as_secs(), "Telemetry reconcile failed");
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::controller::pipeline::MockPipelineStore;
    use crate::controller::workload::MockWorkloadClient;
    use crate::crd::{GatewaySpec, ScalingSpec, TelemetrySpec};
    use crate::secrets::MockSecretReader;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    fn telemetry(spec: TelemetrySpec) -> Telemetry {
        let mut telemetry = Telemetry::new("default", spec);
        telemetry.metadata.namespace = Some(crate::DEFAULT_OPERATOR_NAMESPACE.to_string());
        telemetry.metadata.generation = Some(3);
        telemetry
    }

    fn context(workloads: MockWorkloadClient, statuses: Arc<Mutex<Vec<TelemetryStatus>>>) -> Arc<Context> {
        let mut store = MockTelemetryStore::new();
        store.expect_patch_status().returning(move |_, _, status| {
            statuses.lock().unwrap().push(status.clone());
            Ok(())
        });
        let ctx = Context::builder(OperatorConfig::default())
            .store(Arc::new(MockPipelineStore::new()))
            .secret_reader(Arc::new(MockSecretReader::new()))
            .workloads(Arc::new(workloads))
            .telemetry_store(Arc::new(store))
            .build(&CancellationToken::new())
            .unwrap();
        Arc::new(ctx)
    }

    // =========================================================================
    // Scaling Stories
    // =========================================================================

    /// Story: Static trace scaling patches the trace gateway
    ///
    /// The metric gateway keeps the dynamic default, which matches the
    /// initial target, so only the trace gateway is scaled.
    #[tokio::test]
    async fn story_static_scaling_scales_gateway() {
        let mut workloads = MockWorkloadClient::new();
        workloads
            .expect_scale()
            .with(eq(CollectorRole::TraceGateway), eq(4))
            .times(1)
            .returning(|_, _| Ok(()));
        workloads.expect_readiness().returning(|_| Ok(Readiness::Ready));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let ctx = context(workloads, statuses.clone());

        let spec = TelemetrySpec {
            trace: Some(GatewaySpec {
                scaling: ScalingSpec::fixed(4),
            }),
            ..Default::default()
        };
        let action = reconcile(Arc::new(telemetry(spec)), ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(ctx.config.selfmon_interval));
        assert_eq!(ctx.replicas.get(SignalType::Traces), 4);
        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses[0].state, TelemetryState::Ready);
        assert!(conditions::is_true(&statuses[0].conditions, "TraceComponentsHealthy"));
    }

    /// Story: A failed scale is attempted again on the next reconcile
    ///
    /// The replica target must not move before the API server accepted it,
    /// otherwise the retry would see no change and never scale.
    #[tokio::test]
    async fn story_failed_scale_is_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let mut workloads = MockWorkloadClient::new();
        workloads
            .expect_scale()
            .with(eq(CollectorRole::TraceGateway), eq(4))
            .times(2)
            .returning(move |_, _| {
                if a.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::timeout("scale trace gateway"))
                } else {
                    Ok(())
                }
            });
        workloads.expect_readiness().returning(|_| Ok(Readiness::Ready));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let ctx = context(workloads, statuses.clone());

        let spec = TelemetrySpec {
            trace: Some(GatewaySpec {
                scaling: ScalingSpec::fixed(4),
            }),
            ..Default::default()
        };
        let telemetry = Arc::new(telemetry(spec));

        assert!(reconcile(telemetry.clone(), ctx.clone()).await.is_err());
        assert_eq!(
            ctx.replicas.get(SignalType::Traces),
            ctx.config.default_gateway_replicas
        );
        assert!(statuses.lock().unwrap().is_empty());

        reconcile(telemetry, ctx.clone()).await.unwrap();
        assert_eq!(ctx.replicas.get(SignalType::Traces), 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(statuses.lock().unwrap()[0].state, TelemetryState::Ready);
    }

    /// Story: Negative replicas put the module into Error without scaling
    #[tokio::test]
    async fn story_invalid_scaling_is_reported() {
        let mut workloads = MockWorkloadClient::new();
        workloads.expect_scale().times(0);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let ctx = context(workloads, statuses.clone());

        let spec = TelemetrySpec {
            metric: Some(GatewaySpec {
                scaling: ScalingSpec::fixed(-1),
            }),
            ..Default::default()
        };
        let action = reconcile(Arc::new(telemetry(spec)), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses[0].state, TelemetryState::Error);
        let condition = conditions::find(&statuses[0].conditions, "MetricComponentsHealthy").unwrap();
        assert_eq!(condition.reason, REASON_SCALING_INVALID);
        assert_eq!(condition.status, ConditionStatus::False);
    }

    /// Story: A not-ready agent turns the module into Warning
    #[tokio::test]
    async fn story_not_ready_agent_is_a_warning() {
        let mut workloads = MockWorkloadClient::new();
        workloads.expect_readiness().returning(|role| {
            Ok(if role == CollectorRole::LogAgent {
                Readiness::NotReady
            } else {
                Readiness::Missing
            })
        });
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let ctx = context(workloads, statuses.clone());

        reconcile(Arc::new(telemetry(TelemetrySpec::default())), ctx).await.unwrap();

        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses[0].state, TelemetryState::Warning);
        let logs = conditions::find(&statuses[0].conditions, "LogComponentsHealthy").unwrap();
        assert_eq!(logs.reason, REASON_AGENT_NOT_READY);
        assert!(conditions::is_true(&statuses[0].conditions, "TraceComponentsHealthy"));
    }

    #[tokio::test]
    async fn test_foreign_namespace_is_ignored() {
        let ctx = context(MockWorkloadClient::new(), Arc::new(Mutex::new(Vec::new())));
        let mut foreign = telemetry(TelemetrySpec::default());
        foreign.metadata.namespace = Some("elsewhere".to_string());
        assert_eq!(reconcile(Arc::new(foreign), ctx).await.unwrap(), Action::await_change());
    }

    #[test]
    fn test_components_condition() {
        let rolling = components_condition(
            SignalType::Metrics,
            &[
                (CollectorRole::MetricGateway, Readiness::RollingOut),
                (CollectorRole::MetricAgent, Readiness::Ready),
            ],
            Some(1),
        );
        assert_eq!(rolling.reason, REASON_ROLLOUT_IN_PROGRESS);
        assert_eq!(rolling.observed_generation, Some(1));

        let gateway_down = components_condition(
            SignalType::Traces,
            &[(CollectorRole::TraceGateway, Readiness::NotReady)],
            None,
        );
        assert_eq!(gateway_down.reason, REASON_GATEWAY_NOT_READY);
        assert_eq!(gateway_down.type_, "TraceComponentsHealthy");
    }
}
