//! CRD conversion webhook (`apiextensions.k8s.io/v1` ConversionReview)

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{WebhookError, WebhookState};
use crate::conversion::convert_object;

/// A ConversionReview as sent by the API server and returned to it
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReview {
    /// Always `apiextensions.k8s.io/v1`
    pub api_version: String,
    /// Always `ConversionReview`
    pub kind: String,
    /// Set on the way in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ConversionRequest>,
    /// Set on the way out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ConversionResponse>,
}

/// Objects to convert
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    /// Copied into the response
    pub uid: String,
    /// Target `group/version`
    #[serde(rename = "desiredAPIVersion")]
    pub desired_api_version: String,
    /// Objects to convert
    #[serde(default)]
    pub objects: Vec<Value>,
}

/// Converted objects or the reason there are none
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResponse {
    /// Request uid
    pub uid: String,
    /// Converted objects, in request order
    #[serde(default)]
    pub converted_objects: Vec<Value>,
    /// Outcome
    pub result: ConversionResult,
}

/// `metav1.Status` subset carried in a conversion response
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    /// `Success` or `Failure`
    pub status: String,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConversionResponse {
    fn respond(request: &ConversionRequest) -> ConversionResponse {
        let converted: crate::Result<Vec<Value>> = request
            .objects
            .iter()
            .map(|object| convert_object(object.clone(), &request.desired_api_version))
            .collect();

        match converted {
            Ok(converted_objects) => {
                debug!(
                    uid = %request.uid,
                    count = converted_objects.len(),
                    desired = %request.desired_api_version,
                    "Converted objects"
                );
                ConversionResponse {
                    uid: request.uid.clone(),
                    converted_objects,
                    result: ConversionResult {
                        status: "Success".to_string(),
                        message: None,
                    },
                }
            }
            // One failure fails the whole batch
            Err(e) => {
                warn!(uid = %request.uid, error = %e, "Conversion failed");
                ConversionResponse {
                    uid: request.uid.clone(),
                    converted_objects: Vec::new(),
                    result: ConversionResult {
                        status: "Failure".to_string(),
                        message: Some(e.to_string()),
                    },
                }
            }
        }
    }
}

/// Handle a ConversionReview
pub async fn convert_handler(
    State(_state): State<Arc<WebhookState>>,
    Json(review): Json<ConversionReview>,
) -> Result<Json<ConversionReview>, WebhookError> {
    let request = review
        .request
        .ok_or_else(|| WebhookError::InvalidReview("ConversionReview without request".into()))?;
    Ok(Json(ConversionReview {
        api_version: review.api_version,
        kind: review.kind,
        request: None,
        response: Some(ConversionResponse::respond(&request)),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::post_json;
    use super::*;

    fn review(desired: &str, objects: Vec<Value>) -> Value {
        json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "ConversionReview",
            "request": {
                "uid": "c0ffee",
                "desiredAPIVersion": desired,
                "objects": objects,
            }
        })
    }

    fn alpha_pipeline(name: &str) -> Value {
        json!({
            "apiVersion": "telemetry.conduit.dev/v1alpha1",
            "kind": "LogPipeline",
            "metadata": {"name": name},
            "spec": {
                "input": {"application": {"keepAnnotations": true}},
                "output": {"http": {
                    "host": {"value": "logs.example.com"},
                    "tls": {"disabled": true, "skipCertificateValidation": false}
                }}
            }
        })
    }

    /// Story: The API server reads v1alpha1 objects back as v1beta1
    #[tokio::test]
    async fn story_batch_is_converted_in_order() {
        let body = review(
            "telemetry.conduit.dev/v1beta1",
            vec![alpha_pipeline("first"), alpha_pipeline("second")],
        );

        let (status, response) = post_json("/convert", body).await;
        assert_eq!(status, StatusCode::OK);
        let response: ConversionReview = serde_json::from_value(response).unwrap();
        let response = response.response.unwrap();
        assert_eq!(response.uid, "c0ffee");
        assert_eq!(response.result.status, "Success");

        let converted = &response.converted_objects;
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0]["metadata"]["name"], "first");
        assert_eq!(converted[1]["metadata"]["name"], "second");
        assert_eq!(converted[0]["apiVersion"], "telemetry.conduit.dev/v1beta1");
        assert_eq!(converted[0]["spec"]["input"]["runtime"]["keepAnnotations"], true);
        assert_eq!(converted[0]["spec"]["output"]["http"]["tls"]["insecure"], true);
    }

    /// Story: MetricPipelines go through the same endpoint
    #[tokio::test]
    async fn story_metric_pipeline_is_converted() {
        let metric = json!({
            "apiVersion": "telemetry.conduit.dev/v1alpha1",
            "kind": "MetricPipeline",
            "metadata": {"name": "metrics"},
            "spec": {
                "input": {"istio": {"enabled": true, "namespaces": {"include": ["mesh", "Mesh_2"]}}},
                "output": {"otlp": {"endpoint": {"value": "http://otel:4317"}}}
            }
        });
        let body = review("telemetry.conduit.dev/v1beta1", vec![metric]);

        let (_, response) = post_json("/convert", body).await;
        let response: ConversionReview = serde_json::from_value(response).unwrap();
        let response = response.response.unwrap();
        assert_eq!(response.result.status, "Success");
        let converted = &response.converted_objects[0];
        assert_eq!(converted["apiVersion"], "telemetry.conduit.dev/v1beta1");
        assert_eq!(converted["spec"]["input"]["istio"]["namespaces"]["include"], json!(["mesh"]));
    }

    /// Story: One unconvertible object fails the whole review
    #[tokio::test]
    async fn story_failure_converts_nothing() {
        let body = review(
            "telemetry.conduit.dev/v2",
            vec![alpha_pipeline("first")],
        );

        let (_, response) = post_json("/convert", body).await;
        let response: ConversionReview = serde_json::from_value(response).unwrap();
        let response = response.response.unwrap();
        assert_eq!(response.result.status, "Failure");
        assert!(response.result.message.unwrap().contains("unsupported apiVersion"));
        assert!(response.converted_objects.is_empty());
    }

    #[tokio::test]
    async fn test_review_without_request_is_bad_request() {
        let body = json!({"apiVersion": "apiextensions.k8s.io/v1", "kind": "ConversionReview"});
        let (status, _) = post_json("/convert", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
