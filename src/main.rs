//! Tessark web tier - browser-facing streaming proxy for the pull backend.
//!
//! Single binary serving the browser API, health probes, and metrics from
//! one listener. Pull requests are forwarded to the backend service named
//! by `BACKEND_URL`, with archive bodies streamed back to clients as they
//! are produced.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use tessark_web::api::{ApiState, app};
use tessark_web::backend::BackendClient;
use tessark_web::config::{self, DEFAULT_BACKEND_URL, RelayConfig};
use tessark_web::lifecycle::{
    DrainResult, LifecycleConfig, LifecycleManager, spawn_backend_health_task,
};
use tessark_web::metrics::WebMetrics;
use tessark_web::timeout::StreamTimeouts;

/// Configuration for the web tier.
///
/// The listen port comes from `TESSARK_HTTP_PORT` (default 3000); lifecycle
/// and relay tuning come from their own `TESSARK_*` variables.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Bind address (default: 0.0.0.0)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// HTTP listen port (falls back to TESSARK_HTTP_PORT, then 3000)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend base URL pull requests are forwarded to
    /// (e.g. "http://tessark-backend-service:8080")
    #[arg(long, env = "BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// Graceful shutdown budget in seconds (falls back to
    /// TESSARK_SHUTDOWN_TIMEOUT_SECS, then 30)
    #[arg(long)]
    shutdown_timeout: Option<u64>,
}

/// Main entry point for the tessark web tier.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Phase 1: Initialize observability
    // Use non-blocking writer to prevent logging from blocking the Tokio runtime.
    // The _guard must be held for the lifetime of the program to ensure logs are flushed.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli_config = Config::parse();

    // Phase 2: Load relay and lifecycle configuration
    let relay_config = RelayConfig::from_env();
    let mut lifecycle_config = LifecycleConfig::from_env();
    if let Some(secs) = cli_config.shutdown_timeout {
        lifecycle_config = lifecycle_config.with_shutdown_timeout(Duration::from_secs(secs));
    }
    let lifecycle = Arc::new(LifecycleManager::new(lifecycle_config));

    // Phase 3: Build the pooled backend client (validates BACKEND_URL)
    let backend = match BackendClient::new(&cli_config.backend_url, &relay_config) {
        Ok(client) => client,
        Err(e) => {
            error!(
                backend_url = %cli_config.backend_url,
                reason = %e,
                "Invalid backend configuration, refusing to start"
            );
            std::process::exit(1);
        }
    };
    lifecycle.mark_config_loaded();

    // Phase 4: Register metrics
    let mut prom_registry = prometheus_client::registry::Registry::default();
    let web_metrics = Arc::new(WebMetrics::new(&mut prom_registry));
    let prom_registry = Arc::new(prom_registry);

    // Phase 5: Assemble the router
    let state = ApiState {
        backend: backend.clone(),
        timeouts: StreamTimeouts::from_relay(&relay_config),
        metrics: web_metrics,
        lifecycle: lifecycle.clone(),
    };
    let router = app(state, prom_registry);

    // Phase 6: Signal handlers and background backend probe
    let shutdown = lifecycle.shutdown_token();
    setup_signal_handlers(lifecycle.clone());
    spawn_backend_health_task(lifecycle.clone(), backend.clone());

    // Phase 7: Bind and serve
    let port = cli_config.port.unwrap_or_else(config::http_port);
    let addr = format!("{}:{}", cli_config.bind, port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        bind = %cli_config.bind,
        port = port,
        addr = %addr,
        backend_url = %backend.base_url(),
        request_timeout_secs = relay_config.request_timeout.as_secs(),
        chunk_timeout_secs = relay_config.chunk_timeout.as_secs(),
        drain_timeout_secs = lifecycle.config().drain_timeout.as_secs(),
        "Tessark web tier starting"
    );

    lifecycle.mark_ready();

    // ConnectInfo supplies the peer address the passthrough route forwards
    // as x-forwarded-for.
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });

    // The serve future resolves only after every in-flight connection has
    // completed, and a stalled client could hold that open indefinitely.
    // Run it as a task so the drain below stays bounded.
    let mut server_task = tokio::spawn(server.into_future());

    tokio::select! {
        result = &mut server_task => {
            // Accept loop ended before any shutdown signal
            result??;
            warn!("Server exited before shutdown signal");
            lifecycle.mark_stopped();
            return Ok(());
        }
        _ = shutdown.cancelled() => {}
    }

    // Graceful shutdown sequence: axum has stopped accepting, wait for
    // in-flight relays to release their request guards.
    info!(
        active_requests = lifecycle.active_request_count(),
        drain_timeout_secs = lifecycle.config().drain_timeout.as_secs(),
        "Waiting for active requests to drain"
    );

    let drain_result = lifecycle.drain_requests().await;

    // Bound the remaining socket teardown by what is left of the shutdown
    // budget (drain_timeout is clamped below shutdown_timeout at load time).
    let teardown_budget = lifecycle
        .config()
        .shutdown_timeout
        .saturating_sub(lifecycle.config().drain_timeout);
    let _ = tokio::time::timeout(teardown_budget.max(Duration::from_secs(1)), server_task).await;

    lifecycle.mark_stopped();

    match drain_result {
        DrainResult::Complete => {
            info!("All requests drained, shutting down cleanly");
            Ok(())
        }
        DrainResult::Timeout { remaining } => {
            // Return an error instead of std::process::exit(1) so the caller
            // converts it to an exit code after cleanup.
            Err(format!("Drain timeout exceeded with {} remaining requests", remaining).into())
        }
    }
}

/// Setup signal handlers for graceful shutdown.
///
/// - SIGINT (Ctrl+C): Begin graceful shutdown
/// - SIGTERM: Begin graceful shutdown
/// - SIGQUIT: Immediate shutdown (no drain)
fn setup_signal_handlers(lifecycle: Arc<LifecycleManager>) {
    // SIGINT handler
    let lifecycle_sigint = lifecycle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                lifecycle_sigint.begin_shutdown();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    // SIGTERM handler (Unix only)
    #[cfg(unix)]
    {
        let lifecycle_sigterm = lifecycle.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown");
                    lifecycle_sigterm.begin_shutdown();
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                }
            }
        });
    }

    // SIGQUIT handler (Unix only) - immediate shutdown without draining
    #[cfg(unix)]
    {
        let lifecycle_sigquit = lifecycle;
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::quit()) {
                Ok(mut sigquit) => {
                    sigquit.recv().await;
                    warn!(
                        active_requests = lifecycle_sigquit.active_request_count(),
                        "Received SIGQUIT, immediate shutdown (no drain)"
                    );
                    lifecycle_sigquit.mark_stopped();
                    // Intentional process::exit: SIGQUIT demands immediate
                    // termination without drain. This cannot return through
                    // main() because the signal handler runs in a spawned task.
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGQUIT");
                }
            }
        });
    }

    // Prevent unused variable warning on non-Unix
    #[cfg(not(unix))]
    let _ = lifecycle;
}
