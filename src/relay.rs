//! Streamed relay of backend responses.
//!
//! The relay path never accumulates a success payload: the backend byte
//! stream is wrapped in a [`TimeoutBody`] guard and handed to axum as the
//! response body, so chunks reach the client as they arrive. Dropping the
//! response (client disconnect) drops the guard and the underlying pooled
//! connection with it.
//!
//! Non-success backend responses are small diagnostic texts; those are
//! buffered (size-capped) and re-emitted with the backend's status code.

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body::Frame;
use http_body_util::StreamBody;
use prometheus_client::metrics::counter::Counter;

use crate::error::WebError;
use crate::lifecycle::RequestGuard;
use crate::timeout::{StreamTimeouts, TimeoutBody};

/// Cap on buffered non-success backend bodies.
///
/// Error payloads past this point are truncated; a backend that streams
/// gigabytes at a 4xx status must not be able to balloon our memory.
pub const ERROR_BODY_CAP: usize = 64 * 1024;

/// Response headers propagated verbatim on streamed relays.
const RELAYED_HEADERS: [HeaderName; 3] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_DISPOSITION,
];

/// Identity stamped onto passthrough responses.
const PROXY_TAG: HeaderValue = HeaderValue::from_static("tessark-frontend");

/// Buffer a non-success backend response into a relayable error.
///
/// Reads at most [`ERROR_BODY_CAP`] bytes of the diagnostic body. When the
/// backend sent nothing (or the body could not be read at all),
/// `empty_fallback` supplies the wire text for the status.
pub async fn upstream_error(
    response: reqwest::Response,
    empty_fallback: impl FnOnce(StatusCode) -> String,
) -> WebError {
    let status = response.status();
    let mut buf: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        // A truncated diagnostic is still worth relaying.
        let Ok(bytes) = chunk else { break };
        let room = ERROR_BODY_CAP - buf.len();
        if bytes.len() >= room {
            buf.extend_from_slice(&bytes[..room]);
            break;
        }
        buf.extend_from_slice(&bytes);
    }

    let body = if buf.is_empty() {
        Bytes::from(empty_fallback(status))
    } else {
        Bytes::from(buf)
    };

    WebError::UpstreamStatus { status, body }
}

/// Relay a successful backend response as a stream.
///
/// Copies `content-type`, `content-length`, and `content-disposition` from
/// the backend exactly when present, forces `cache-control: no-store`, and
/// forwards body bytes through the timeout guard as they arrive.
pub fn stream_response(
    response: reqwest::Response,
    timeouts: StreamTimeouts,
    bytes_relayed: Counter,
    guard: Option<RequestGuard>,
) -> Response {
    let status = response.status();

    let mut headers = HeaderMap::new();
    for name in RELAYED_HEADERS {
        if let Some(value) = response.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }
    // Pull payloads are one-shot artifacts; never let an intermediary cache
    // a half-finished tarball.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    let mut out = Response::new(guarded_body(response, timeouts, bytes_relayed, guard));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Relay a backend response end-to-end for passthrough routes.
///
/// All backend headers survive except hop-by-hop ones; the response is
/// stamped with `x-proxied-by` so operators can tell relayed traffic from
/// direct backend access.
pub fn passthrough_response(
    response: reqwest::Response,
    timeouts: StreamTimeouts,
    bytes_relayed: Counter,
    guard: Option<RequestGuard>,
) -> Response {
    let status = response.status();

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers() {
        if !is_hop_by_hop_header(name.as_str()) {
            // append keeps duplicate headers (e.g. set-cookie) intact
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(HeaderName::from_static("x-proxied-by"), PROXY_TAG);

    let mut out = Response::new(guarded_body(response, timeouts, bytes_relayed, guard));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Check if a header is a hop-by-hop header that shouldn't be forwarded.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Wrap the backend byte stream in the timeout guard, counting relayed bytes.
///
/// The request guard rides inside the stream closure: it is released when
/// the stream is dropped, so draining waits for in-flight relays rather
/// than just handler returns.
fn guarded_body(
    response: reqwest::Response,
    timeouts: StreamTimeouts,
    bytes_relayed: Counter,
    guard: Option<RequestGuard>,
) -> Body {
    let stream = response
        .bytes_stream()
        .map(move |chunk| {
            let _ = &guard;
            match chunk {
                Ok(bytes) => {
                    bytes_relayed.inc_by(bytes.len() as u64);
                    Ok(Frame::data(bytes))
                }
                Err(e) => Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("backend stream error: {e}"),
                )) as Box<dyn std::error::Error + Send + Sync>),
            }
        })
        .boxed();

    Body::new(TimeoutBody::new(StreamBody::new(stream), timeouts))
}
