//! Wildcard backend forwarder (`/api/{*path}`).
//!
//! Routes without a dedicated handler (registry listings, tag queries,
//! whatever the backend grows next) are forwarded verbatim: same method,
//! same path and query, same body. The proxy stamps the forwarding headers
//! the backend expects and relays the response as-is.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use tracing::debug;

use crate::error::WebResult;
use crate::lifecycle::RequestGuard;
use crate::relay::{self, is_hop_by_hop_header};

use super::{ApiState, claim_guard};

const ROUTE: &str = "passthrough";

const TIMEOUT: &str = "Backend request timeout (exceeded 5 minutes)";
const CONNECT_PREFIX: &str = "Backend connection error: ";

/// Handle any method on `/api/{*path}`.
pub async fn forward_to_backend(State(state): State<ApiState>, request: Request) -> Response {
    let guard = match claim_guard(&state.lifecycle) {
        Ok(guard) => guard,
        Err(response) => return response,
    };

    let result = relay_passthrough(&state, request, guard).await;
    state.metrics.observe(ROUTE, &result);
    result.unwrap_or_else(|err| err.to_response())
}

async fn relay_passthrough(
    state: &ApiState,
    request: Request,
    guard: RequestGuard,
) -> WebResult<Response> {
    // Peer address is present when served via connect-info; handler tests
    // exercise the fallback.
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let method = request.method().clone();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let headers = forward_headers(request.headers(), &client_ip);

    let body = if matches!(method, Method::GET | Method::HEAD) {
        None
    } else {
        Some(reqwest::Body::wrap_stream(
            request.into_body().into_data_stream(),
        ))
    };

    debug!(method = %method, path = %path_and_query, "Forwarding request to backend");
    let response = state
        .backend
        .forward(method, &path_and_query, headers, body)
        .await
        .map_err(|e| state.transport_error(e, TIMEOUT, CONNECT_PREFIX))?;

    // Passthrough relays every status verbatim; only transport failures
    // surface as proxy errors.
    Ok(relay::passthrough_response(
        response,
        state.timeouts,
        state.metrics.bytes_counter(ROUTE),
        Some(guard),
    ))
}

/// Build the outbound header set for a forwarded request.
///
/// Copies every inbound header except `host` and the hop-by-hop set, then
/// stamps `x-forwarded-for` with the peer address. The ingress in front of
/// us knows the external scheme, so an inbound `x-forwarded-proto` is kept;
/// without one we report our own plaintext listener.
fn forward_headers(inbound: &HeaderMap, client_ip: &str) -> HeaderMap {
    let forwarded_proto = inbound
        .get("x-forwarded-proto")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("http"));

    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if name == header::HOST || is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(
        HeaderName::from_static("x-forwarded-for"),
        HeaderValue::from_str(client_ip).unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    );
    headers.insert(HeaderName::from_static("x-forwarded-proto"), forwarded_proto);
    headers
}
