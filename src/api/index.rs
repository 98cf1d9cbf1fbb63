//! Helm repository index endpoint (`GET /api/fetchIndex`).
//!
//! Unlike the pull routes, this endpoint's upstream is the user-supplied
//! chart repository itself, not the pull backend. The repository URL is
//! normalized to its `index.yaml` document and fetched with caching
//! disabled; the resolved URL is echoed back in `x-helmer-upstream` so the
//! client can display where the index actually came from.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::response::Response;
use http::header::{self, HeaderName, HeaderValue};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::error::{WebError, WebResult};
use crate::lifecycle::RequestGuard;
use crate::validate::normalize_index_url;

use super::{ApiState, claim_guard};

const ROUTE: &str = "fetch_index";

const MISSING_URL: &str = "Missing url";
const INVALID_URL: &str = "Invalid URL";

/// Header naming the resolved index URL.
const UPSTREAM_HEADER: HeaderName = HeaderName::from_static("x-helmer-upstream");

/// Query parameters accepted by `GET /api/fetchIndex`.
#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    url: Option<String>,
}

/// Handle `GET /api/fetchIndex?url=...`.
pub async fn fetch_index(
    State(state): State<ApiState>,
    Query(params): Query<IndexQuery>,
) -> Response {
    let guard = match claim_guard(&state.lifecycle) {
        Ok(guard) => guard,
        Err(response) => return response,
    };

    let result = relay_index(&state, params, guard).await;
    state.metrics.observe(ROUTE, &result);
    result.unwrap_or_else(|err| err.to_response())
}

async fn relay_index(
    state: &ApiState,
    params: IndexQuery,
    _guard: RequestGuard,
) -> WebResult<Response> {
    let raw = params.url.as_deref().map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(WebError::InvalidRequest(MISSING_URL.to_string()));
    }

    let normalized = normalize_index_url(raw);
    let parsed =
        Url::parse(&normalized).map_err(|_| WebError::InvalidRequest(INVALID_URL.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WebError::InvalidRequest(INVALID_URL.to_string()));
    }
    // The echoed header must hold the normalized text verbatim; a URL that
    // cannot be a header value is no use to the client either.
    let upstream = HeaderValue::from_str(&normalized)
        .map_err(|_| WebError::InvalidRequest(INVALID_URL.to_string()))?;

    debug!(url = %normalized, "Fetching repository index");
    let response = state
        .backend
        .fetch_url(parsed)
        .await
        .map_err(|e| WebError::BadGateway(format!("Fetch failed: {e}")))?;

    if !response.status().is_success() {
        return Err(WebError::BadGateway(format!(
            "Upstream error: {}",
            response.status().as_u16()
        )));
    }

    // Index documents are small; buffer and re-emit as text so the browser
    // can parse it regardless of the repository's own content-type.
    let text = response
        .text()
        .await
        .map_err(|e| WebError::BadGateway(format!("Fetch failed: {e}")))?;

    let mut out = Response::new(Body::from(text));
    out.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    out.headers_mut().insert(UPSTREAM_HEADER, upstream);
    Ok(out)
}
