//! Operational lifecycle management for the web tier.
//!
//! This module provides lifecycle management including:
//! - Startup sequencing with phase tracking
//! - Health and readiness probes for Kubernetes
//! - Graceful shutdown with request draining
//! - Background backend health monitoring
//!
//! ## Lifecycle States
//!
//! ```text
//! Starting → Ready → ShuttingDown → Stopped
//! ```
//!
//! - **Starting**: Initialization in progress
//! - **Ready**: Accepting traffic
//! - **ShuttingDown**: Draining, rejecting new requests
//! - **Stopped**: Shutdown complete

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::config::parse_env_warn;

pub mod health;

pub use health::{HealthResponse, ReadinessChecks, ReadinessResponse, health_router};

// ============================================================================
// Lifecycle State
// ============================================================================

/// Lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Initialization in progress
    Starting,
    /// Accepting traffic
    Ready,
    /// Draining, rejecting new requests
    ShuttingDown,
    /// Shutdown complete
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for lifecycle management.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Overall shutdown timeout (default: 30s)
    pub shutdown_timeout: Duration,
    /// Connection drain timeout (default: 25s, must be < shutdown_timeout)
    pub drain_timeout: Duration,
    /// Backend health probe interval (default: 30s)
    pub backend_health_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(25),
            backend_health_interval: Duration::from_secs(30),
        }
    }
}

impl LifecycleConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TESSARK_SHUTDOWN_TIMEOUT_SECS` (default: 30)
    /// - `TESSARK_DRAIN_TIMEOUT_SECS` (default: 25)
    /// - `TESSARK_BACKEND_HEALTH_INTERVAL_SECS` (default: 30)
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        let shutdown_timeout = Duration::from_secs(parse_env_warn(
            "TESSARK_SHUTDOWN_TIMEOUT_SECS",
            default.shutdown_timeout.as_secs(),
        ));

        let drain_timeout = Duration::from_secs(parse_env_warn(
            "TESSARK_DRAIN_TIMEOUT_SECS",
            default.drain_timeout.as_secs(),
        ));

        let backend_health_interval = Duration::from_secs(parse_env_warn(
            "TESSARK_BACKEND_HEALTH_INTERVAL_SECS",
            default.backend_health_interval.as_secs(),
        ));

        // Validate drain_timeout < shutdown_timeout as documented
        let drain_timeout = if drain_timeout >= shutdown_timeout {
            let adjusted = Duration::from_secs(shutdown_timeout.as_secs().saturating_sub(5));
            warn!(
                drain_timeout_secs = drain_timeout.as_secs(),
                shutdown_timeout_secs = shutdown_timeout.as_secs(),
                adjusted_drain_secs = adjusted.as_secs(),
                "drain_timeout must be less than shutdown_timeout, adjusting"
            );
            adjusted
        } else {
            drain_timeout
        };

        Self {
            shutdown_timeout,
            drain_timeout,
            backend_health_interval,
        }
    }

    /// Override the shutdown budget (e.g. from a CLI flag), re-clamping
    /// `drain_timeout` below the new value.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        if self.drain_timeout >= self.shutdown_timeout {
            let adjusted = Duration::from_secs(self.shutdown_timeout.as_secs().saturating_sub(5));
            warn!(
                drain_timeout_secs = self.drain_timeout.as_secs(),
                shutdown_timeout_secs = self.shutdown_timeout.as_secs(),
                adjusted_drain_secs = adjusted.as_secs(),
                "drain_timeout must be less than shutdown_timeout, adjusting"
            );
            self.drain_timeout = adjusted;
        }
        self
    }
}

// ============================================================================
// Backend Health Status
// ============================================================================

/// Cached backend health status.
#[derive(Debug, Clone)]
pub struct BackendHealthStatus {
    /// Whether the backend is currently reachable
    pub is_healthy: bool,
    /// Time of last health probe
    pub last_check: Instant,
    /// Last error message (if unreachable)
    pub last_error: Option<String>,
}

impl Default for BackendHealthStatus {
    fn default() -> Self {
        Self {
            is_healthy: false,
            last_check: Instant::now(),
            last_error: Some("Not checked yet".to_string()),
        }
    }
}

// ============================================================================
// Lifecycle Manager
// ============================================================================

/// The lifecycle manager coordinates startup, health, and shutdown.
///
/// This is the central coordination point for operational lifecycle. It:
/// - Tracks lifecycle state (Starting → Ready → ShuttingDown → Stopped)
/// - Manages request counting for graceful draining
/// - Caches backend health status for readiness probes
/// - Provides shutdown coordination via CancellationToken
///
/// # Thread Safety
///
/// The manager is designed for concurrent access from multiple tasks.
/// All state is managed via atomic operations or lock-free structures.
pub struct LifecycleManager {
    /// Current lifecycle state
    state: ArcSwap<LifecycleState>,

    /// When the service started
    started_at: Instant,

    /// Shutdown cancellation token (shared with background tasks)
    shutdown_token: CancellationToken,

    /// Active request counter (for draining)
    active_requests: AtomicUsize,

    /// Cached backend health status
    backend_health: ArcSwap<BackendHealthStatus>,

    /// Whether configuration has been loaded and validated
    config_loaded: AtomicBool,

    /// Configuration
    config: LifecycleConfig,

    /// Version string (from Cargo.toml)
    version: &'static str,
}

impl LifecycleManager {
    /// Creates a new lifecycle manager.
    ///
    /// The manager starts in the `Starting` state.
    #[must_use]
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            state: ArcSwap::new(Arc::new(LifecycleState::Starting)),
            started_at: Instant::now(),
            shutdown_token: CancellationToken::new(),
            active_requests: AtomicUsize::new(0),
            backend_health: ArcSwap::new(Arc::new(BackendHealthStatus::default())),
            config_loaded: AtomicBool::new(false),
            config,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Returns true if the service is ready to accept traffic.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), LifecycleState::Ready)
    }

    /// Returns true if the service is shutting down or stopped.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::ShuttingDown | LifecycleState::Stopped
        )
    }

    /// Transition to Ready state.
    pub fn mark_ready(&self) {
        self.state.store(Arc::new(LifecycleState::Ready));
        info!(
            version = %self.version,
            startup_duration_ms = self.started_at.elapsed().as_millis(),
            "tessark-web ready"
        );
    }

    /// Mark configuration as loaded and validated.
    pub fn mark_config_loaded(&self) {
        self.config_loaded.store(true, Ordering::SeqCst);
    }

    /// Update cached backend health status.
    pub fn update_backend_health(&self, is_healthy: bool, error: Option<String>) {
        self.backend_health.store(Arc::new(BackendHealthStatus {
            is_healthy,
            last_check: Instant::now(),
            last_error: error,
        }));
    }

    /// Returns a clone of the shutdown token.
    ///
    /// Use this to coordinate shutdown with background tasks.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Begin graceful shutdown.
    ///
    /// This:
    /// 1. Sets state to ShuttingDown
    /// 2. Cancels the shutdown token (signals background tasks)
    /// 3. Logs the shutdown with active request count
    pub fn begin_shutdown(&self) {
        self.state.store(Arc::new(LifecycleState::ShuttingDown));
        self.shutdown_token.cancel();
        info!(
            active_requests = self.active_requests.load(Ordering::SeqCst),
            "Shutdown initiated"
        );
    }

    /// Track an active request (returns RAII guard).
    ///
    /// Returns `None` if the service is shutting down (new requests rejected).
    /// The returned guard automatically decrements the counter when dropped.
    #[must_use]
    pub fn track_request(self: &Arc<Self>) -> Option<RequestGuard> {
        if self.is_shutting_down() {
            return None; // Reject new requests during shutdown
        }
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        Some(RequestGuard {
            manager: Arc::clone(self),
        })
    }

    /// Returns the current active request count.
    #[must_use]
    pub fn active_request_count(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Returns uptime in seconds.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Returns the version string.
    #[must_use]
    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Get readiness checks status.
    #[must_use]
    pub fn readiness_checks(&self) -> ReadinessChecks {
        let backend_health = self.backend_health.load();
        ReadinessChecks {
            config_loaded: self.config_loaded.load(Ordering::SeqCst),
            backend_reachable: backend_health.is_healthy,
        }
    }

    /// Drain active requests with timeout.
    ///
    /// Waits for all active requests to complete, polling every 100ms.
    /// Returns `DrainResult::Complete` if all requests finish, or
    /// `DrainResult::Timeout` if the drain timeout is exceeded.
    pub async fn drain_requests(&self) -> DrainResult {
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut last_log = Instant::now();

        loop {
            let active = self.active_requests.load(Ordering::SeqCst);

            if active == 0 {
                return DrainResult::Complete;
            }

            if Instant::now() > deadline {
                warn!(
                    active_requests = active,
                    "Drain timeout exceeded, forcing shutdown"
                );
                return DrainResult::Timeout { remaining: active };
            }

            // Log every 5 seconds
            if last_log.elapsed() >= Duration::from_secs(5) {
                info!(active_requests = active, "Draining requests...");
                last_log = Instant::now();
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Mark as stopped.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }
}

// ============================================================================
// Backend Health Task
// ============================================================================

/// Spawn the background backend health probe.
///
/// Issues `HEAD {backend}/health` at the configured interval and caches the
/// result for `/ready`. The first probe fires immediately so readiness does
/// not wait a full interval after startup. The task exits when the shutdown
/// token is cancelled.
pub fn spawn_backend_health_task(
    manager: Arc<LifecycleManager>,
    client: BackendClient,
) -> tokio::task::JoinHandle<()> {
    let token = manager.shutdown_token();
    let mut ticker = tokio::time::interval(manager.config.backend_health_interval);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Backend health task stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match client.health_check().await {
                        Ok(()) => manager.update_backend_health(true, None),
                        Err(reason) => {
                            warn!(backend_url = %client.base_url(), %reason, "Backend health probe failed");
                            manager.update_backend_health(false, Some(reason));
                        }
                    }
                }
            }
        }
    })
}

// ============================================================================
// Request Guard
// ============================================================================

/// RAII guard for request tracking.
///
/// When this guard is dropped, the active request counter is decremented.
/// This ensures proper counting even if the request handler panics.
///
/// The guard holds an Arc reference to the LifecycleManager, allowing it
/// to be moved into spawned tasks.
pub struct RequestGuard {
    manager: Arc<LifecycleManager>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.manager.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Drain Result
// ============================================================================

/// Result of draining requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    /// All requests completed before timeout
    Complete,
    /// Timeout reached with remaining requests
    Timeout {
        /// Number of requests still active
        remaining: usize,
    },
}

// ============================================================================
// Tests
// ============================================================================
