//! Validating admission for pipelines and the Telemetry module
//!
//! Admission applies the same checks the reconciler applies, so a spec that
//! passes here only fails later for reasons outside the object itself
//! (missing secrets, pipeline caps).

use std::sync::Arc;

use axum::{extract::State, Json};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use serde_json::Value;
use tracing::{debug, error, info};

use super::WebhookState;
use crate::conversion;
use crate::crd::{self, v1alpha1, SignalSpec};
use crate::validation::{SpecValidator, ValidationReport};

/// Kinds accepted by the validating webhook
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmittedKind {
    /// LogPipeline, either served version
    LogPipeline,
    /// MetricPipeline
    MetricPipeline,
    /// TracePipeline
    TracePipeline,
    /// Telemetry module
    Telemetry,
}

impl AdmittedKind {
    /// Kind name as found in admission requests
    pub fn kind(self) -> &'static str {
        match self {
            Self::LogPipeline => "LogPipeline",
            Self::MetricPipeline => "MetricPipeline",
            Self::TracePipeline => "TracePipeline",
            Self::Telemetry => "Telemetry",
        }
    }

    fn report(
        self,
        validator: &SpecValidator,
        version: &str,
        name: &str,
        spec: Value,
    ) -> crate::Result<ValidationReport> {
        let signal = match self {
            Self::LogPipeline if version == "v1alpha1" => {
                let alpha: v1alpha1::LogPipelineSpec = serde_json::from_value(spec)?;
                SignalSpec::Logs(conversion::to_v1beta1(&alpha)?)
            }
            Self::LogPipeline => SignalSpec::Logs(serde_json::from_value(spec)?),
            Self::MetricPipeline if version == "v1alpha1" => {
                let alpha: v1alpha1::MetricPipelineSpec = serde_json::from_value(spec)?;
                SignalSpec::Metrics(conversion::metric_to_v1beta1(&alpha)?)
            }
            Self::MetricPipeline => SignalSpec::Metrics(serde_json::from_value(spec)?),
            Self::TracePipeline => SignalSpec::Traces(serde_json::from_value(spec)?),
            Self::Telemetry => {
                let spec: crd::TelemetrySpec = serde_json::from_value(spec)?;
                return Ok(validator.validate_telemetry(&spec));
            }
        };
        Ok(validator.validate(name, &signal))
    }
}

/// Handle admission review for LogPipelines
pub async fn logpipelines(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    review(&state, body, AdmittedKind::LogPipeline)
}

/// Handle admission review for MetricPipelines
pub async fn metricpipelines(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    review(&state, body, AdmittedKind::MetricPipeline)
}

/// Handle admission review for TracePipelines
pub async fn tracepipelines(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    review(&state, body, AdmittedKind::TracePipeline)
}

/// Handle admission review for the Telemetry module
pub async fn telemetries(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    review(&state, body, AdmittedKind::Telemetry)
}

fn review(
    state: &WebhookState,
    body: AdmissionReview<DynamicObject>,
    expected: AdmittedKind,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(admit(&state.validator, &req, expected).into_review())
}

/// Decide on one admission request
pub(crate) fn admit(
    validator: &SpecValidator,
    req: &AdmissionRequest<DynamicObject>,
    expected: AdmittedKind,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    if req.kind.kind != expected.kind() {
        return response.deny(format!(
            "expected {}, got {}",
            expected.kind(),
            req.kind.kind
        ));
    }

    // DELETE carries no object
    let Some(obj) = &req.object else {
        return response;
    };
    let name = obj.metadata.name.clone().unwrap_or_default();
    let spec = obj
        .data
        .get("spec")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    let report = match expected.report(validator, &req.kind.version, &name, spec) {
        Ok(report) => report,
        Err(e) => {
            debug!(uid = %req.uid, name = %name, error = %e, "Spec does not parse");
            return response.deny(e.to_string());
        }
    };

    if report.is_ok() {
        debug!(uid = %req.uid, kind = expected.kind(), name = %name, "Admitted");
        response
    } else {
        info!(
            uid = %req.uid,
            kind = expected.kind(),
            name = %name,
            reasons = ?report.reasons(),
            "Denied"
        );
        response.deny(report.message())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::post_json;
    use super::*;

    fn review_body(version: &str, kind: &str, object: Option<Value>) -> Value {
        let operation = if object.is_some() { "CREATE" } else { "DELETE" };
        let mut request = json!({
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": "telemetry.conduit.dev", "version": version, "kind": kind},
            "resource": {"group": "telemetry.conduit.dev", "version": version, "resource": "x"},
            "name": "app",
            "operation": operation,
            "userInfo": {"username": "alice"},
            "dryRun": false,
        });
        if let Some(object) = object {
            request["object"] = object;
        }
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": request,
        })
    }

    fn object(version: &str, kind: &str, name: &str, spec: Value) -> Value {
        json!({
            "apiVersion": format!("telemetry.conduit.dev/{version}"),
            "kind": kind,
            "metadata": {"name": name},
            "spec": spec,
        })
    }

    fn allowed(body: &Value) -> bool {
        body["response"]["allowed"].as_bool().unwrap()
    }

    // =========================================================================
    // Admission Stories
    // =========================================================================

    /// Story: A well-formed trace pipeline is admitted
    #[tokio::test]
    async fn story_valid_pipeline_is_admitted() {
        let spec = json!({"output": {"otlp": {"endpoint": {"value": "http://jaeger:4317"}}}});
        let body = review_body(
            "v1beta1",
            "TracePipeline",
            Some(object("v1beta1", "TracePipeline", "jaeger", spec)),
        );

        let (status, response) = post_json("/validate/tracepipelines", body).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert!(allowed(&response));
        assert_eq!(response["response"]["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
    }

    /// Story: A pipeline without output is denied with the violation text
    #[tokio::test]
    async fn story_violations_deny_with_message() {
        let body = review_body(
            "v1beta1",
            "MetricPipeline",
            Some(object("v1beta1", "MetricPipeline", "prom", json!({}))),
        );

        let (_, response) = post_json("/validate/metricpipelines", body).await;
        assert!(!allowed(&response));
        assert!(response.to_string().contains("no output is defined"));
    }

    /// Story: v1alpha1 LogPipelines are checked after conversion
    ///
    /// The legacy TLS flag names must not dodge the cert/key pairing check.
    #[tokio::test]
    async fn story_legacy_log_pipeline_is_validated() {
        let spec = json!({
            "output": {"http": {
                "host": {"value": "logs.example.com"},
                "tls": {"disabled": false, "cert": {"value": "pem"}}
            }}
        });
        let body = review_body(
            "v1alpha1",
            "LogPipeline",
            Some(object("v1alpha1", "LogPipeline", "legacy", spec)),
        );

        let (_, response) = post_json("/validate/logpipelines", body).await;
        assert!(!allowed(&response));
        assert!(response.to_string().contains("cert and key must both be set"));
    }

    /// Story: v1alpha1 MetricPipelines are admitted through the same checks
    #[tokio::test]
    async fn story_legacy_metric_pipeline_is_validated() {
        let valid = json!({
            "input": {"runtime": {"enabled": true, "namespaces": {"include": ["shop", "Bad_Name"]}}},
            "output": {"otlp": {"endpoint": {"value": "http://otel:4317"}}}
        });
        let body = review_body(
            "v1alpha1",
            "MetricPipeline",
            Some(object("v1alpha1", "MetricPipeline", "legacy", valid)),
        );
        let (_, response) = post_json("/validate/metricpipelines", body).await;
        assert!(allowed(&response));

        let body = review_body(
            "v1alpha1",
            "MetricPipeline",
            Some(object("v1alpha1", "MetricPipeline", "legacy", json!({}))),
        );
        let (_, response) = post_json("/validate/metricpipelines", body).await;
        assert!(!allowed(&response));
        assert!(response.to_string().contains("no output is defined"));
    }

    /// Story: Negative static replicas on the Telemetry module are denied
    #[tokio::test]
    async fn story_telemetry_scaling_is_validated() {
        let spec = json!({"trace": {"scaling": {"type": "Static", "static": {"replicas": -1}}}});
        let body = review_body(
            "v1beta1",
            "Telemetry",
            Some(object("v1beta1", "Telemetry", "default", spec)),
        );

        let (_, response) = post_json("/validate/telemetries", body).await;
        assert!(!allowed(&response));
        assert!(response.to_string().contains("must not be negative"));
    }

    #[tokio::test]
    async fn test_delete_is_always_admitted() {
        let body = review_body("v1beta1", "LogPipeline", None);
        let (_, response) = post_json("/validate/logpipelines", body).await;
        assert!(allowed(&response));
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_denied() {
        let body = review_body(
            "v1beta1",
            "TracePipeline",
            Some(object("v1beta1", "TracePipeline", "x", json!({}))),
        );
        let (_, response) = post_json("/validate/logpipelines", body).await;
        assert!(!allowed(&response));
        assert!(response.to_string().contains("expected LogPipeline"));
    }

    #[tokio::test]
    async fn test_unparsable_spec_is_denied() {
        let body = review_body(
            "v1beta1",
            "TracePipeline",
            Some(object("v1beta1", "TracePipeline", "x", json!({"output": "nope"}))),
        );
        let (_, response) = post_json("/validate/tracepipelines", body).await;
        assert!(!allowed(&response));
    }
}
