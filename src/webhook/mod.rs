//! Admission and conversion webhooks
//!
//! The API server calls these endpoints before persisting conduit objects:
//! - `POST /validate/{logpipelines,metricpipelines,tracepipelines,telemetries}`
//!   rejects specs the reconciler could never turn into collector config
//! - `POST /convert` translates LogPipelines between v1alpha1 and v1beta1
//! - `GET /healthz` is the probe endpoint

mod convert;
mod validate;

pub use convert::{ConversionRequest, ConversionResponse, ConversionResult, ConversionReview};
pub use validate::AdmittedKind;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::validation::SpecValidator;

/// In-flight reviews get this long to finish after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The review was invalid or malformed
    #[error("invalid review: {0}")]
    InvalidReview(String),

    /// Serving certificate could not be loaded
    #[error("tls config failed: {0}")]
    Tls(String),

    /// The listener failed
    #[error("webhook server failed: {0}")]
    Serve(#[from] std::io::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidReview(_) => StatusCode::BAD_REQUEST,
            WebhookError::Tls(_) | WebhookError::Serve(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Shared state for webhook handlers
#[derive(Clone, Debug, Default)]
pub struct WebhookState {
    /// Checks applied at admission, the same ones the reconciler applies
    pub validator: SpecValidator,
}

impl WebhookState {
    /// Create webhook state around a validator
    pub fn new(validator: SpecValidator) -> Self {
        Self { validator }
    }
}

/// Create the webhook router with all endpoints
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/validate/logpipelines", post(validate::logpipelines))
        .route("/validate/metricpipelines", post(validate::metricpipelines))
        .route("/validate/tracepipelines", post(validate::tracepipelines))
        .route("/validate/telemetries", post(validate::telemetries))
        .route("/convert", post(convert::convert_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serve the webhooks over TLS until `cancel` fires
pub async fn serve(
    state: Arc<WebhookState>,
    addr: SocketAddr,
    cert: &Path,
    key: &Path,
    cancel: CancellationToken,
) -> Result<(), WebhookError> {
    let tls_config = RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| WebhookError::Tls(format!("{}: {e}", cert.display())))?;

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    info!(%addr, "Webhook server (HTTPS) starting");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(webhook_router(state).into_make_service())
        .await
        .inspect_err(|e| error!(error = %e, "Webhook server failed"))?;
    info!("Webhook server stopped");
    Ok(())
}
