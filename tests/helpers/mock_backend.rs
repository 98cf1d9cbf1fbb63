//! Mock pull backend for integration testing.
//!
//! Provides a configurable mock server that answers any method on a set of
//! preconfigured paths, with full or chunk-by-chunk streamed bodies, optional
//! response delays, and captured-request inspection.
//!
//! Note: Some methods are provided for future test expansion and may not
//! be used yet. They are marked with `#[allow(dead_code)]`.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock pull backend for testing.
///
/// Allows configuring per path:
/// - Response status and headers
/// - Full or streamed (chunked, with gaps) bodies
/// - An initial delay before the response starts (for timeout testing)
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    routes: HashMap<String, RouteSpec>,
}

/// Configured response for one path.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: MockBody,
    initial_delay: Option<Duration>,
}

/// Response body shape.
#[derive(Debug, Clone)]
pub enum MockBody {
    /// Whole body in one frame; hyper sets `content-length`.
    Full(Bytes),
    /// Chunks emitted one at a time with a gap between them.
    Chunks { chunks: Vec<Bytes>, gap: Duration },
}

/// A request the mock received, for test assertions.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path_and_query: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl CapturedRequest {
    /// Parse the captured body as JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Look up a captured header by (lowercase) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Shared state for the mock server.
#[derive(Debug)]
struct MockState {
    routes: HashMap<String, RouteSpec>,
    request_count: RwLock<u32>,
    last_request: RwLock<Option<CapturedRequest>>,
    aborted_streams: AtomicUsize,
}

impl MockBackend {
    /// Create a new mock backend with no routes (everything 404s).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path answering with the given status and a full body.
    #[must_use]
    pub fn with_response(mut self, path: &str, status: StatusCode, body: impl Into<Bytes>) -> Self {
        self.routes.insert(
            path.to_string(),
            RouteSpec {
                status,
                headers: Vec::new(),
                body: MockBody::Full(body.into()),
                initial_delay: None,
            },
        );
        self
    }

    /// Add a path answering 200 with a body streamed chunk by chunk.
    #[must_use]
    pub fn with_streaming(mut self, path: &str, chunks: Vec<Bytes>, gap: Duration) -> Self {
        self.routes.insert(
            path.to_string(),
            RouteSpec {
                status: StatusCode::OK,
                headers: Vec::new(),
                body: MockBody::Chunks { chunks, gap },
                initial_delay: None,
            },
        );
        self
    }

    /// Add a response header to an already-configured path.
    ///
    /// # Panics
    ///
    /// Panics if the path has not been configured yet.
    #[must_use]
    pub fn with_header(mut self, path: &str, name: &str, value: &str) -> Self {
        self.routes
            .get_mut(path)
            .unwrap_or_else(|| panic!("no route configured for {path}"))
            .headers
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Delay the start of the response for an already-configured path.
    ///
    /// # Panics
    ///
    /// Panics if the path has not been configured yet.
    #[must_use]
    pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.routes
            .get_mut(path)
            .unwrap_or_else(|| panic!("no route configured for {path}"))
            .initial_delay = Some(delay);
        self
    }

    /// Start the mock server and return its address and handle.
    pub async fn start(self) -> (SocketAddr, MockBackendHandle) {
        let state = Arc::new(MockState {
            routes: self.routes,
            request_count: RwLock::new(0),
            last_request: RwLock::new(None),
            aborted_streams: AtomicUsize::new(0),
        });

        let app = Router::new().fallback(handle_any).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (
            addr,
            MockBackendHandle {
                state,
                _handle: handle,
            },
        )
    }
}

/// Handle to the running mock server.
pub struct MockBackendHandle {
    state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockBackendHandle {
    /// Get the number of requests received.
    pub async fn request_count(&self) -> u32 {
        *self.state.request_count.read().await
    }

    /// Get the last request received.
    pub async fn last_request(&self) -> Option<CapturedRequest> {
        self.state.last_request.read().await.clone()
    }

    /// How many streamed responses were cut off before all chunks went out.
    pub fn aborted_streams(&self) -> usize {
        self.state.aborted_streams.load(Ordering::SeqCst)
    }

    /// Poll until at least one streamed response aborts, or give up.
    pub async fn wait_for_aborted_stream(&self, deadline: Duration) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if self.aborted_streams() > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }
}

/// Answer any method on any path from the configured route table.
async fn handle_any(State(state): State<Arc<MockState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| path.clone(), ToString::to_string);
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    {
        let mut count = state.request_count.write().await;
        *count += 1;
    }
    {
        let mut last = state.last_request.write().await;
        *last = Some(CapturedRequest {
            method: parts.method.to_string(),
            path_and_query,
            headers,
            body,
        });
    }

    let Some(spec) = state.routes.get(&path) else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("mock: no route"))
            .unwrap();
    };

    if let Some(delay) = spec.initial_delay {
        tokio::time::sleep(delay).await;
    }

    let mut response = Response::builder().status(spec.status);
    for (name, value) in &spec.headers {
        response = response.header(name, value);
    }

    match &spec.body {
        MockBody::Full(bytes) => response.body(Body::from(bytes.clone())).unwrap(),
        MockBody::Chunks { chunks, gap } => {
            let body = streamed_body(chunks.clone(), *gap, state.clone());
            response.body(body).unwrap()
        }
    }
}

/// Build a body that yields `chunks` one at a time, sleeping `gap` between
/// them. If the peer goes away before the last chunk is sent, the abort
/// counter is bumped; the gap sleep also watches for channel closure so a
/// long gap does not delay abort detection.
fn streamed_body(chunks: Vec<Bytes>, gap: Duration, state: Arc<MockState>) -> Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(1);

    tokio::spawn(async move {
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            if tx.send(chunk).await.is_err() {
                state.aborted_streams.fetch_add(1, Ordering::SeqCst);
                return;
            }
            if i == last {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(gap) => {}
                () = tx.closed() => {
                    state.aborted_streams.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
        }
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
    });
    Body::from_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_serves_configured_route() {
        let mock = MockBackend::new()
            .with_response("/api/pull", StatusCode::OK, "tar bytes")
            .with_header("/api/pull", "content-type", "application/x-tar");

        let (addr, handle) = mock.start().await;

        let response = reqwest::get(format!("http://{addr}/api/pull?ref=nginx"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/x-tar"
        );
        assert_eq!(response.text().await.unwrap(), "tar bytes");

        assert_eq!(handle.request_count().await, 1);
        let captured = handle.last_request().await.unwrap();
        assert_eq!(captured.method, "GET");
        assert_eq!(captured.path_and_query, "/api/pull?ref=nginx");
    }

    #[tokio::test]
    async fn test_mock_backend_unknown_path_is_404() {
        let (addr, handle) = MockBackend::new().start().await;

        let response = reqwest::get(format!("http://{addr}/nope")).await.unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(handle.request_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_backend_streams_chunks() {
        let chunks = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
        let mock =
            MockBackend::new().with_streaming("/api/pull", chunks, Duration::from_millis(10));

        let (addr, _handle) = mock.start().await;

        let response = reqwest::get(format!("http://{addr}/api/pull")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.bytes().await.unwrap(), "aaaabbbb");
    }
}
