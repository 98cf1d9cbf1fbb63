//! Prometheus metrics for the web tier.
//!
//! Metrics are registered against a `prometheus_client` registry and served
//! from `/metrics` in OpenMetrics text format. All names carry the
//! `tessark_` prefix.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use http::{StatusCode, header};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use tracing::error;

use crate::error::WebError;

/// Labels for request counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Route name (e.g. "pull", "pull_chart", "fetch_index", "passthrough").
    pub route: String,
    /// Outcome class (e.g. "success", "client_error", "timeout").
    pub outcome: String,
}

/// Labels for backend transport failure counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransportLabels {
    /// Failure kind ("timeout" or "connect").
    pub kind: String,
}

/// Labels for streamed byte counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    /// Route name.
    pub route: String,
}

/// Counter families shared across handlers.
pub struct WebMetrics {
    /// Requests by route and outcome class.
    pub requests_total: Family<RequestLabels, Counter>,
    /// Backend transport failures by kind.
    pub backend_errors_total: Family<TransportLabels, Counter>,
    /// Bytes relayed to clients by route.
    pub streamed_bytes_total: Family<RouteLabels, Counter>,
}

impl WebMetrics {
    /// Create and register all metrics with the given registry.
    ///
    /// Counters are registered without the `_total` suffix; the OpenMetrics
    /// encoder appends it, so the exposed names are `tessark_requests_total`,
    /// `tessark_backend_errors_total`, and `tessark_streamed_bytes_total`.
    pub fn new(registry: &mut Registry) -> Self {
        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "tessark_requests",
            "Proxy requests by route and outcome",
            requests_total.clone(),
        );

        let backend_errors_total = Family::<TransportLabels, Counter>::default();
        registry.register(
            "tessark_backend_errors",
            "Backend transport failures by kind",
            backend_errors_total.clone(),
        );

        let streamed_bytes_total = Family::<RouteLabels, Counter>::default();
        registry.register(
            "tessark_streamed_bytes",
            "Bytes relayed to clients by route",
            streamed_bytes_total.clone(),
        );

        Self {
            requests_total,
            backend_errors_total,
            streamed_bytes_total,
        }
    }

    /// Record a finished request with its outcome class.
    pub fn observe<T>(&self, route: &str, result: &Result<T, WebError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(e) => outcome_label(e),
        };
        self.requests_total
            .get_or_create(&RequestLabels {
                route: route.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record a backend transport failure.
    pub fn record_backend_error(&self, kind: &str) {
        self.backend_errors_total
            .get_or_create(&TransportLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Counter handle for bytes relayed on a route.
    ///
    /// The handle is cheap to clone and is moved into the relay stream.
    pub fn bytes_counter(&self, route: &str) -> Counter {
        self.streamed_bytes_total
            .get_or_create(&RouteLabels {
                route: route.to_string(),
            })
            .clone()
    }
}

/// Outcome class for a handler error.
fn outcome_label(err: &WebError) -> &'static str {
    match err {
        WebError::InvalidRequest(_) => "client_error",
        WebError::BadGateway(_) => "bad_gateway",
        WebError::GatewayTimeout(_) => "timeout",
        WebError::UpstreamStatus { .. } => "upstream_error",
    }
}

/// Router serving `/metrics`.
pub fn metrics_router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry)
}

async fn render_metrics(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buffer = String::new();

    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &registry) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[test]
    fn observe_classifies_outcomes() {
        let mut registry = Registry::default();
        let metrics = WebMetrics::new(&mut registry);

        metrics.observe("pull", &Ok::<_, WebError>(()));
        metrics.observe(
            "pull",
            &Err::<(), _>(WebError::InvalidRequest("Missing image reference".into())),
        );
        metrics.observe(
            "pull",
            &Err::<(), _>(WebError::GatewayTimeout("timeout".into())),
        );
        metrics.observe(
            "pull",
            &Err::<(), _>(WebError::UpstreamStatus {
                status: StatusCode::NOT_FOUND,
                body: Bytes::new(),
            }),
        );

        let label = |outcome: &str| RequestLabels {
            route: "pull".to_string(),
            outcome: outcome.to_string(),
        };
        assert_eq!(metrics.requests_total.get_or_create(&label("success")).get(), 1);
        assert_eq!(
            metrics.requests_total.get_or_create(&label("client_error")).get(),
            1
        );
        assert_eq!(metrics.requests_total.get_or_create(&label("timeout")).get(), 1);
        assert_eq!(
            metrics.requests_total.get_or_create(&label("upstream_error")).get(),
            1
        );
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_openmetrics_text() {
        let mut registry = Registry::default();
        let metrics = WebMetrics::new(&mut registry);
        metrics.observe("fetch_index", &Ok::<_, WebError>(()));
        metrics.bytes_counter("pull").inc_by(2048);

        let router = metrics_router(Arc::new(registry));
        let response = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/openmetrics-text; version=1.0.0; charset=utf-8"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("tessark_requests_total"));
        assert!(text.contains("tessark_streamed_bytes_total"));
    }
}
