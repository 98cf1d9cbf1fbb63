//! Pooled HTTP client for the pull backend.
//!
//! One [`BackendClient`] is constructed at startup and shared through router
//! state. The underlying `reqwest` pool carries every forwarded request:
//! image pulls, chart pulls, index fetches (which target the user-supplied
//! repository, not the backend), and wildcard passthroughs.
//!
//! Transport failures are classified into timeout and connect classes so
//! each endpoint can phrase its own wire message; status-code handling
//! happens in the relay layer, not here.

use std::time::Duration;

use http::{HeaderMap, Method, header};
use reqwest::{Client, Response, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::config::RelayConfig;
use crate::error::ConfigError;

/// Transport-level failure reaching the backend or an index upstream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request exceeded the configured deadline.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (refused, DNS, reset, TLS).
    #[error("{0}")]
    Connect(String),
}

impl TransportError {
    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect(_) => "connect",
        }
    }
}

/// JSON body for `POST /api/pull`.
///
/// Credentials are set only when the caller supplied both halves; the
/// serializer omits absent fields entirely.
#[derive(Serialize)]
pub struct PullRequest<'a> {
    #[serde(rename = "ref")]
    pub reference: &'a str,
    pub format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
}

/// JSON body for `POST /api/pullChart`.
#[derive(Serialize)]
pub struct ChartRequest<'a> {
    #[serde(rename = "ref")]
    pub reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
}

/// Pooled client bound to the backend base URL.
///
/// Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    connect_timeout: Duration,
}

impl BackendClient {
    /// Construct the client, validating the base URL.
    ///
    /// The base URL is trimmed of whitespace and a trailing slash so path
    /// joining stays uniform.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the base URL is empty or unparseable,
    /// or when the HTTP client cannot be built.
    pub fn new(base_url: &str, config: &RelayConfig) -> Result<Self, ConfigError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        Url::parse(&base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            connect_timeout: config.connect_timeout,
        })
    }

    /// The validated backend base URL (no trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue `GET {base}/api/pull?ref=..&format=..`.
    #[instrument(skip_all, fields(reference = %reference, format = %format))]
    pub async fn pull_image_query(
        &self,
        reference: &str,
        format: &str,
    ) -> Result<Response, TransportError> {
        self.client
            .get(format!("{}/api/pull", self.base_url))
            .query(&[("ref", reference), ("format", format)])
            .header(header::ACCEPT, "application/x-tar")
            .send()
            .await
            .map_err(classify)
    }

    /// Issue `POST {base}/api/pull` with a JSON body.
    #[instrument(skip_all, fields(reference = %body.reference, format = %body.format))]
    pub async fn pull_image(&self, body: &PullRequest<'_>) -> Result<Response, TransportError> {
        self.client
            .post(format!("{}/api/pull", self.base_url))
            .header(header::ACCEPT, "application/x-tar")
            .json(body)
            .send()
            .await
            .map_err(classify)
    }

    /// Issue `POST {base}/api/pullChart` with a JSON body.
    #[instrument(skip_all, fields(reference = %body.reference))]
    pub async fn pull_chart(&self, body: &ChartRequest<'_>) -> Result<Response, TransportError> {
        self.client
            .post(format!("{}/api/pullChart", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(classify)
    }

    /// Fetch an absolute URL (Helm repository index documents).
    pub async fn fetch_url(&self, url: Url) -> Result<Response, TransportError> {
        self.client.get(url).send().await.map_err(classify)
    }

    /// Forward an arbitrary `/api/...` request, preserving method, headers,
    /// and body.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Option<reqwest::Body>,
    ) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        request.send().await.map_err(classify)
    }

    /// Probe backend reachability with `HEAD {base}/health`.
    ///
    /// Any HTTP response counts as reachable, 4xx included; only transport
    /// errors report the backend as down.
    pub async fn health_check(&self) -> Result<(), String> {
        match self
            .client
            .head(format!("{}/health", self.base_url))
            .timeout(self.connect_timeout)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(root_cause(&e)),
        }
    }
}

/// Classify a reqwest failure into the transport taxonomy.
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(root_cause(&err))
    }
}

/// Walk the source chain to the most specific cause.
///
/// reqwest's display text stops at "error sending request"; the actionable
/// detail (refused, reset, DNS) lives at the bottom of the chain.
fn root_cause(err: &reqwest::Error) -> String {
    let mut current: &(dyn std::error::Error + 'static) = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_url_is_trimmed() {
        let config = RelayConfig::default();
        let client = BackendClient::new(" http://backend:8080/ ", &config).unwrap();
        assert_eq!(client.base_url(), "http://backend:8080");
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let config = RelayConfig::default();
        assert!(matches!(
            BackendClient::new("  ", &config),
            Err(ConfigError::EmptyBaseUrl)
        ));
    }

    #[test]
    fn unparseable_base_url_is_rejected() {
        let config = RelayConfig::default();
        assert!(matches!(
            BackendClient::new("://nope", &config),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn pull_request_omits_absent_credentials() {
        let body = PullRequest {
            reference: "nginx:latest",
            format: "docker-archive",
            username: None,
            password: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"ref": "nginx:latest", "format": "docker-archive"})
        );
    }

    #[test]
    fn pull_request_carries_credential_pair() {
        let body = PullRequest {
            reference: "registry.example.com/app:1.0",
            format: "oci-archive",
            username: Some("alice"),
            password: Some("s3cret"),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "ref": "registry.example.com/app:1.0",
                "format": "oci-archive",
                "username": "alice",
                "password": "s3cret",
            })
        );
    }

    #[test]
    fn chart_request_omits_empty_version() {
        let body = ChartRequest {
            reference: "oci://charts.example.com/redis",
            version: None,
            username: None,
            password: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"ref": "oci://charts.example.com/redis"})
        );

        let with_version = ChartRequest {
            reference: "oci://charts.example.com/redis",
            version: Some("19.0.1"),
            username: None,
            password: None,
        };
        assert_eq!(
            serde_json::to_value(&with_version).unwrap(),
            json!({"ref": "oci://charts.example.com/redis", "version": "19.0.1"})
        );
    }

    #[test]
    fn transport_error_kinds() {
        assert_eq!(TransportError::Timeout.kind(), "timeout");
        assert_eq!(
            TransportError::Connect("Connection refused".to_string()).kind(),
            "connect"
        );
    }
}
