//! Image pull endpoints (`GET`/`POST /api/pull`).
//!
//! Both handlers validate the image reference, forward the pull to the
//! backend, and relay the resulting tar stream. The GET variant predates
//! the JSON one and keeps its original French wire messages; the POST
//! variant adds registry credentials.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::PullRequest;
use crate::error::{WebError, WebResult};
use crate::lifecycle::RequestGuard;
use crate::relay;
use crate::validate::valid_reference;

use super::{ApiState, claim_guard, json_str_field, paired_credentials};

const ROUTE: &str = "pull";

// GET wire messages (kept verbatim from the original web tier).
const MISSING_REF_QUERY: &str = "Paramètre \"ref\" manquant";
const INVALID_REF_QUERY: &str = "Référence invalide";
const EMPTY_BACKEND_BODY_QUERY: &str = "Erreur backend";
const TIMEOUT_QUERY: &str = "Timeout lors de la copie de l'image";
const CONNECT_PREFIX_QUERY: &str = "Erreur lors de la communication avec le backend: ";

// POST wire messages.
const INVALID_JSON: &str = "Invalid JSON body";
const MISSING_REF_JSON: &str = "Missing image reference";
const INVALID_REF_JSON: &str = "Invalid image reference format";
const TIMEOUT_JSON: &str = "Backend request timeout (exceeded 5 minutes)";
const CONNECT_PREFIX_JSON: &str = "Backend connection error: ";

/// Query parameters accepted by `GET /api/pull`.
#[derive(Debug, Deserialize)]
pub struct PullQuery {
    #[serde(rename = "ref")]
    reference: Option<String>,
    format: Option<String>,
}

/// Handle `GET /api/pull?ref=...&format=...`.
pub async fn pull_query(
    State(state): State<ApiState>,
    Query(params): Query<PullQuery>,
) -> Response {
    let guard = match claim_guard(&state.lifecycle) {
        Ok(guard) => guard,
        Err(response) => return response,
    };

    let result = relay_pull_query(&state, params, guard).await;
    state.metrics.observe(ROUTE, &result);
    result.unwrap_or_else(|err| err.to_response())
}

async fn relay_pull_query(
    state: &ApiState,
    params: PullQuery,
    guard: RequestGuard,
) -> WebResult<Response> {
    let reference = params
        .reference
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if reference.is_empty() {
        return Err(WebError::InvalidRequest(MISSING_REF_QUERY.to_string()));
    }
    if !valid_reference(reference) {
        return Err(WebError::InvalidRequest(INVALID_REF_QUERY.to_string()));
    }
    let format = coerce_format(params.format.as_deref());

    debug!(reference, format, "Forwarding image pull to backend");
    let response = state
        .backend
        .pull_image_query(reference, format)
        .await
        .map_err(|e| state.transport_error(e, TIMEOUT_QUERY, CONNECT_PREFIX_QUERY))?;

    if !response.status().is_success() {
        return Err(relay::upstream_error(response, |_| EMPTY_BACKEND_BODY_QUERY.to_string()).await);
    }

    Ok(relay::stream_response(
        response,
        state.timeouts,
        state.metrics.bytes_counter(ROUTE),
        Some(guard),
    ))
}

/// Handle `POST /api/pull` with a JSON body.
pub async fn pull_json(State(state): State<ApiState>, body: Bytes) -> Response {
    let guard = match claim_guard(&state.lifecycle) {
        Ok(guard) => guard,
        Err(response) => return response,
    };

    let result = relay_pull_json(&state, &body, guard).await;
    state.metrics.observe(ROUTE, &result);
    result.unwrap_or_else(|err| err.to_response())
}

async fn relay_pull_json(
    state: &ApiState,
    body: &[u8],
    guard: RequestGuard,
) -> WebResult<Response> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|_| WebError::InvalidRequest(INVALID_JSON.to_string()))?;

    let reference = json_str_field(&payload, "ref");
    if reference.is_empty() {
        return Err(WebError::InvalidRequest(MISSING_REF_JSON.to_string()));
    }
    if !valid_reference(reference) {
        return Err(WebError::InvalidRequest(INVALID_REF_JSON.to_string()));
    }

    let format = coerce_format(payload.get("format").and_then(Value::as_str));
    let (username, password) = paired_credentials(&payload);

    let request = PullRequest {
        reference,
        format,
        username,
        password,
    };

    debug!(
        reference,
        format,
        authenticated = username.is_some(),
        "Forwarding image pull to backend"
    );
    let response = state
        .backend
        .pull_image(&request)
        .await
        .map_err(|e| state.transport_error(e, TIMEOUT_JSON, CONNECT_PREFIX_JSON))?;

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

/// Coerce the requested archive format.
///
/// Only two formats exist; anything other than an explicit `oci-archive`
/// falls back to `docker-archive`.
pub(crate) fn coerce_format(format: Option<&str>) -> &'static str {
    match format {
        Some("oci-archive") => "oci-archive",
        _ => "docker-archive",
    }
}
