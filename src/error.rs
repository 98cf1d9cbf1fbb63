//! Error types for the tessark web tier.
//!
//! Every handler failure maps onto the plain-text wire contract: invalid
//! input is a 400, transport failures reaching the backend are a 502,
//! exceeded deadlines are a 504, and a backend response with a non-success
//! status is relayed with its own status code and buffered body.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderValue, StatusCode, header};
use thiserror::Error;

/// Errors surfaced to HTTP callers by the proxy handlers.
///
/// Message strings are part of the wire contract and are composed at the
/// call site; the variants only carry the status class.
#[derive(Debug, Error)]
pub enum WebError {
    /// Request failed validation before any backend contact.
    #[error("{0}")]
    InvalidRequest(String),

    /// The backend (or index upstream) could not be reached.
    #[error("{0}")]
    BadGateway(String),

    /// The backend did not answer within the configured deadline.
    #[error("{0}")]
    GatewayTimeout(String),

    /// Non-success backend status, relayed verbatim with its buffered body.
    #[error("backend returned {status}")]
    UpstreamStatus {
        /// Status code reported by the backend.
        status: StatusCode,
        /// Buffered (size-capped) backend error body.
        body: Bytes,
    },
}

/// Result alias for handler and relay operations.
pub type WebResult<T> = Result<T, WebError>;

impl WebError {
    /// HTTP status code this error renders as.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamStatus { status, .. } => *status,
        }
    }

    /// Render this error as a plain-text HTTP response.
    pub fn to_response(&self) -> Response {
        let body = match self {
            Self::UpstreamStatus { body, .. } => Body::from(body.clone()),
            other => Body::from(other.to_string()),
        };

        Response::builder()
            .status(self.status())
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            )
            .body(body)
            .unwrap_or_else(|_| {
                // Fallback if response construction fails (should not happen
                // with static header values)
                let mut response = Response::new(Body::from("Internal Server Error"));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            })
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        self.to_response()
    }
}

/// Failures detected while assembling the runtime configuration.
///
/// These abort startup; they never reach an HTTP caller.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Backend base URL is empty after trimming.
    #[error("backend base URL must not be empty")]
    EmptyBaseUrl,

    /// Backend base URL failed to parse.
    #[error("invalid backend base URL {url:?}: {reason}")]
    InvalidBaseUrl {
        /// The offending value.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// The pooled HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
