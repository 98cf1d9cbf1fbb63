//! Full-application test harness.
//!
//! Boots the real router (relay routes, probes, metrics) on an ephemeral
//! TCP port, wired to a caller-supplied backend address. Serving over
//! `into_make_service_with_connect_info` keeps the passthrough route's
//! forwarded headers testable.
//!
//! Note: Some methods are provided for future test expansion and may not
//! be used yet. They are marked with `#[allow(dead_code)]`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use prometheus_client::registry::Registry;
use tokio::task::JoinHandle;

use tessark_web::api::{ApiState, app};
use tessark_web::backend::BackendClient;
use tessark_web::config::RelayConfig;
use tessark_web::lifecycle::{LifecycleConfig, LifecycleManager};
use tessark_web::metrics::WebMetrics;
use tessark_web::timeout::StreamTimeouts;

/// Test harness running the full application router over TCP.
pub struct TestHarness {
    pub base_url: String,
    pub client: reqwest::Client,
    pub lifecycle: Arc<LifecycleManager>,
    _server: JoinHandle<()>,
}

impl TestHarness {
    /// Start the app with default relay settings.
    pub async fn new(backend_addr: SocketAddr) -> Self {
        Self::with_relay_config(backend_addr, RelayConfig::default()).await
    }

    /// Start the app with custom relay settings (tight deadlines in tests).
    pub async fn with_relay_config(backend_addr: SocketAddr, relay: RelayConfig) -> Self {
        let backend =
            BackendClient::new(&format!("http://{backend_addr}"), &relay).expect("backend client");

        let mut registry = Registry::default();
        let metrics = Arc::new(WebMetrics::new(&mut registry));

        let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig::default()));
        lifecycle.mark_config_loaded();
        lifecycle.update_backend_health(true, None);
        lifecycle.mark_ready();

        let state = ApiState {
            backend,
            timeouts: StreamTimeouts::from_relay(&relay),
            metrics,
            lifecycle: Arc::clone(&lifecycle),
        };
        let router = app(state, Arc::new(registry));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            lifecycle,
            _server: server,
        }
    }

    /// Build a full URL for a path on the harness server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Bind and immediately drop a listener, yielding an address that refuses
/// connections.
pub fn refused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
