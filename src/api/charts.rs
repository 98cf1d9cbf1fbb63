//! Chart pull endpoint (`POST /api/pullChart`).
//!
//! Mirrors the JSON image pull: validate the chart reference, forward to
//! the backend with optional version and credentials, relay the packaged
//! chart stream.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use serde_json::Value;
use tracing::debug;

use crate::backend::ChartRequest;
use crate::error::{WebError, WebResult};
use crate::lifecycle::RequestGuard;
use crate::relay;
use crate::validate::valid_reference;

use super::{ApiState, claim_guard, json_str_field, paired_credentials};

const ROUTE: &str = "pull_chart";

const INVALID_JSON: &str = "Invalid JSON body";
const MISSING_REF: &str = "Missing chart reference";
const INVALID_REF: &str = "Invalid chart reference format";
const TIMEOUT: &str = "Backend request timeout (exceeded 5 minutes)";
const CONNECT_PREFIX: &str = "Backend connection error: ";

/// Handle `POST /api/pullChart` with a JSON body.
pub async fn pull_chart(State(state): State<ApiState>, body: Bytes) -> Response {
    let guard = match claim_guard(&state.lifecycle) {
        Ok(guard) => guard,
        Err(response) => return response,
    };

    let result = relay_pull_chart(&state, &body, guard).await;
    state.metrics.observe(ROUTE, &result);
    result.unwrap_or_else(|err| err.to_response())
}

async fn relay_pull_chart(
    state: &ApiState,
    body: &[u8],
    guard: RequestGuard,
) -> WebResult<Response> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|_| WebError::InvalidRequest(INVALID_JSON.to_string()))?;

    let reference = json_str_field(&payload, "ref");
    if reference.is_empty() {
        return Err(WebError::InvalidRequest(MISSING_REF.to_string()));
    }
    if !valid_reference(reference) {
        return Err(WebError::InvalidRequest(INVALID_REF.to_string()));
    }

    let version = json_str_field(&payload, "version");
    let (username, password) = paired_credentials(&payload);

    let request = ChartRequest {
        reference,
        version: (!version.is_empty()).then_some(version),
        username,
        password,
    };

    debug!(
        reference,
        version = request.version,
        authenticated = username.is_some(),
        "Forwarding chart pull to backend"
    );
    let response = state
        .backend
        .pull_chart(&request)
        .await
        .map_err(|e| state.transport_error(e, TIMEOUT, CONNECT_PREFIX))?;

    if !response.status().is_success() {
        return Err(relay::upstream_error(response, |status| {
            format!("Backend returned {}", status.as_u16())
        })
        .await);
    }

    Ok(relay::stream_response(
        response,
        state.timeouts,
        state.metrics.bytes_counter(ROUTE),
        Some(guard),
    ))
}
