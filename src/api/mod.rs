//! HTTP API surface.
//!
//! Dedicated handlers cover the image pull, chart pull, and index fetch
//! routes; everything else under `/api/` is forwarded to the backend by the
//! wildcard passthrough. Dedicated routes win over the wildcard because
//! axum prefers the more specific match.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use prometheus_client::registry::Registry;
use serde_json::Value;

use crate::backend::BackendClient;
use crate::error::WebError;
use crate::lifecycle::{LifecycleManager, RequestGuard, health_router};
use crate::logging_layer::logging_layer;
use crate::metrics::{WebMetrics, metrics_router};
use crate::timeout::StreamTimeouts;

pub mod charts;
pub mod index;
pub mod passthrough;
pub mod pull;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Pooled client for the pull backend.
    pub backend: BackendClient,
    /// Deadlines applied to relayed bodies.
    pub timeouts: StreamTimeouts,
    /// Request and byte counters.
    pub metrics: Arc<WebMetrics>,
    /// Lifecycle manager, consulted for request guards.
    pub lifecycle: Arc<LifecycleManager>,
}

impl ApiState {
    /// Map a backend transport failure onto endpoint wire text.
    ///
    /// `connect_prefix` is prepended to the root-cause reason; the failure
    /// is counted in the backend error metrics either way.
    pub(crate) fn transport_error(
        &self,
        err: crate::backend::TransportError,
        timeout_message: &str,
        connect_prefix: &str,
    ) -> WebError {
        self.metrics.record_backend_error(err.kind());
        match err {
            crate::backend::TransportError::Timeout => {
                WebError::GatewayTimeout(timeout_message.to_string())
            }
            crate::backend::TransportError::Connect(reason) => {
                WebError::BadGateway(format!("{connect_prefix}{reason}"))
            }
        }
    }
}

/// Build the `/api` router.
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/pull", get(pull::pull_query).post(pull::pull_json))
        .route("/api/pullChart", post(charts::pull_chart))
        .route("/api/fetchIndex", get(index::fetch_index))
        .route("/api/{*path}", any(passthrough::forward_to_backend))
        .with_state(state)
}

/// Assemble the full application router.
///
/// Merges the API routes with the probe and metrics routers and applies
/// the request logging layer outermost.
pub fn app(state: ApiState, registry: Arc<Registry>) -> Router {
    let lifecycle = Arc::clone(&state.lifecycle);
    Router::new()
        .merge(api_router(state))
        .merge(health_router(lifecycle))
        .merge(metrics_router(registry))
        .layer(logging_layer())
}

/// Plain-text 503 returned when a request arrives during shutdown.
pub(crate) fn shutting_down_response() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "Service is shutting down").into_response()
}

/// Claim a request guard, or reply 503 while draining.
pub(crate) fn claim_guard(lifecycle: &Arc<LifecycleManager>) -> Result<RequestGuard, Response> {
    lifecycle.track_request().ok_or_else(shutting_down_response)
}

/// Extract a trimmed string field from a JSON body.
///
/// Non-string values are treated as absent, matching how the endpoints
/// historically coerced loosely-typed payloads.
pub(crate) fn json_str_field<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
}

/// Extract the username/password pair from a JSON body.
///
/// Credentials are forwarded only when both halves are non-empty; a lone
/// username or password is dropped entirely.
pub(crate) fn paired_credentials(body: &Value) -> (Option<&str>, Option<&str>) {
    let username = json_str_field(body, "username");
    let password = json_str_field(body, "password");
    if username.is_empty() || password.is_empty() {
        (None, None)
    } else {
        (Some(username), Some(password))
    }
}
