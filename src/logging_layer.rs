//! Tower layer for structured request/response logging.
//!
//! Uses `tower_http::trace::TraceLayer` for the middleware plumbing, with
//! custom callbacks for correlation IDs and credential redaction. Registry
//! credentials ride query strings on passthrough routes, so logged URIs
//! have their `password` values masked.

use http::{HeaderMap, Uri};
use std::fmt;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Headers that are redacted from logs for security.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
    "set-cookie",
];

/// Create the logging/tracing layer using `tower-http`.
pub fn logging_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    CorrelationMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    tower_http::trace::DefaultOnBodyChunk,
    tower_http::trace::DefaultOnEos,
    OnFailureLogger,
> {
    TraceLayer::new_for_http()
        .make_span_with(CorrelationMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

/// Custom span creator that attaches a correlation ID to every request span.
///
/// Extracts `x-request-id` from the request headers if present, otherwise
/// generates one. This ensures every log line within a request's lifecycle
/// carries a `request_id` field for correlation.
#[derive(Clone, Debug)]
pub struct CorrelationMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for CorrelationMakeSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %display_uri(request.uri()),
            version = ?request.version(),
            request_id = %request_id,
        )
    }
}

/// Custom on-request callback that logs method, URI, and optionally headers.
#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &http::Request<B>, _span: &tracing::Span) {
        info!(
            method = %request.method(),
            uri = %display_uri(request.uri()),
            direction = "inbound",
            "Request received"
        );

        // Only sanitize headers at DEBUG level to avoid allocation overhead
        if tracing::enabled!(tracing::Level::DEBUG) {
            let version = request.version();
            let headers = sanitize_headers(request.headers());
            tracing::debug!(
                version = ?version,
                headers = ?headers,
                "Request details"
            );
        }
    }
}

/// Custom on-response callback that logs status, latency, and optionally headers.
#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(
        self,
        response: &http::Response<B>,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        info!(
            status = %response.status().as_u16(),
            latency_ms = latency.as_millis(),
            direction = "outbound",
            "Response sent"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            let res_version = response.version();
            let res_headers = sanitize_headers(response.headers());
            tracing::debug!(
                version = ?res_version,
                headers = ?res_headers,
                "Response details"
            );
        }
    }
}

/// Custom on-failure callback that logs service errors.
#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<tower_http::classify::ServerErrorsFailureClass>
    for OnFailureLogger
{
    fn on_failure(
        &mut self,
        failure: tower_http::classify::ServerErrorsFailureClass,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            direction = "error",
            "Request failed"
        );
    }
}

/// Render a URI for logging with any `password` query value masked.
fn display_uri(uri: &Uri) -> String {
    let Some(query) = uri.query() else {
        return uri.to_string();
    };
    if !query.contains("password") {
        return uri.to_string();
    }

    let masked: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if key.eq_ignore_ascii_case("password") => {
                format!("{key}=[REDACTED]")
            }
            _ => pair.to_string(),
        })
        .collect();
    format!("{}?{}", uri.path(), masked.join("&"))
}

// ============================================================================
// Header Redaction
// ============================================================================

/// Zero-allocation wrapper for sanitized headers.
struct SanitizedHeaders<'a>(&'a HeaderMap);

impl<'a> fmt::Debug for SanitizedHeaders<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();

        // Limit header count to prevent unbounded formatting
        const MAX_HEADERS_TO_LOG: usize = 50;

        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx >= MAX_HEADERS_TO_LOG {
                map.entry(&"...", &format!("({} more headers)", self.0.len() - idx));
                break;
            }

            let name_str = name.as_str();

            let is_sensitive = SENSITIVE_HEADERS
                .iter()
                .any(|&sensitive| name_str.eq_ignore_ascii_case(sensitive));

            if is_sensitive {
                map.entry(&name_str, &"[REDACTED]");
            } else {
                // Handle both UTF-8 and non-UTF-8 header values
                match value.to_str() {
                    Ok(val_str) => {
                        // Limit individual header value length
                        const MAX_VALUE_LEN: usize = 1024;
                        if val_str.len() <= MAX_VALUE_LEN {
                            map.entry(&name_str, &val_str);
                        } else {
                            map.entry(
                                &name_str,
                                &format!(
                                    "{}... ({} bytes)",
                                    &val_str[..MAX_VALUE_LEN],
                                    val_str.len()
                                ),
                            );
                        }
                    }
                    Err(_) => {
                        map.entry(&name_str, &format!("<binary: {} bytes>", value.len()));
                    }
                }
            }
        }

        map.finish()
    }
}

/// Create a zero-allocation sanitized headers wrapper.
#[inline]
fn sanitize_headers(headers: &HeaderMap) -> SanitizedHeaders<'_> {
    SanitizedHeaders(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_query_values_are_masked() {
        let uri: Uri = "/api/registryList?registry=quay.io&username=bob&password=hunter2"
            .parse()
            .unwrap();
        assert_eq!(
            display_uri(&uri),
            "/api/registryList?registry=quay.io&username=bob&password=[REDACTED]"
        );
    }

    #[test]
    fn uris_without_passwords_pass_through() {
        let uri: Uri = "/api/pull?ref=nginx:latest&format=docker-archive"
            .parse()
            .unwrap();
        assert_eq!(
            display_uri(&uri),
            "/api/pull?ref=nginx:latest&format=docker-archive"
        );

        let bare: Uri = "/health".parse().unwrap();
        assert_eq!(display_uri(&bare), "/health");
    }

    #[test]
    fn sensitive_headers_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer token".parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());

        let rendered = format!("{:?}", sanitize_headers(&headers));
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("Bearer token"));
        assert!(rendered.contains("application/json"));
    }
}
