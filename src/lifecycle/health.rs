//! Health and readiness probe handlers.
//!
//! This module provides HTTP handlers for Kubernetes health probes:
//!
//! - `/health` (liveness): Returns 200 if process is alive
//! - `/ready` (readiness): Returns 200 only when all checks pass
//!
//! ## Response Codes
//!
//! | Endpoint | Condition | Status |
//! |----------|-----------|--------|
//! | /health  | Process alive | 200 |
//! | /health  | Process stopped | 503 |
//! | /ready   | All checks pass | 200 |
//! | /ready   | Any check fails | 503 |
//! | /ready   | Shutting down | 503 |

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;

use super::{LifecycleManager, LifecycleState};

// ============================================================================
// Response Types
// ============================================================================

/// Health probe response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("healthy")
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime_seconds: u64,
}

/// Unhealthy response.
#[derive(Debug, Serialize)]
pub struct UnhealthyResponse {
    /// Health status ("unhealthy")
    pub status: &'static str,
    /// Reason for unhealthy status
    pub reason: String,
}

/// Readiness checks result.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessChecks {
    /// Whether configuration is loaded and validated
    pub config_loaded: bool,
    /// Whether the backend is reachable (cached probe result)
    pub backend_reachable: bool,
}

impl ReadinessChecks {
    /// Returns true if all checks pass.
    #[must_use]
    pub fn all_pass(&self) -> bool {
        self.config_loaded && self.backend_reachable
    }

    /// Returns the first failing check name.
    #[must_use]
    pub fn first_failure(&self) -> Option<&'static str> {
        if !self.config_loaded {
            Some("config_loaded")
        } else if !self.backend_reachable {
            Some("backend_reachable")
        } else {
            None
        }
    }
}

/// Readiness probe response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Readiness status ("ready" or "not_ready")
    pub status: &'static str,
    /// Individual check results
    pub checks: ReadinessChecks,
    /// Reason for not ready (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Router
// ============================================================================

/// Create the health/readiness router.
///
/// Returns an Axum router with:
/// - `GET /health` - Liveness probe
/// - `GET /ready` - Readiness probe
pub fn health_router(lifecycle: Arc<LifecycleManager>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .with_state(lifecycle)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health probe handler.
///
/// Returns 200 if process is alive and responsive.
/// Returns 503 if service is in Stopped state.
///
/// Read-only and non-blocking so the probe stays cheap.
async fn health_handler(State(lifecycle): State<Arc<LifecycleManager>>) -> Response {
    // Stopped means the serve loop has exited but the process lingers.
    if matches!(lifecycle.state(), LifecycleState::Stopped) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(UnhealthyResponse {
                status: "unhealthy",
                reason: "service_stopped".to_string(),
            }),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            version: lifecycle.version(),
            uptime_seconds: lifecycle.uptime_seconds(),
        }),
    )
        .into_response()
}

/// Readiness probe handler.
///
/// Returns 200 only when ALL checks pass and service is ready.
/// Returns 503 during shutdown or if any check fails, with the failing
/// check (or lifecycle state) in the `reason` field.
async fn readiness_handler(State(lifecycle): State<Arc<LifecycleManager>>) -> Response {
    if lifecycle.is_shutting_down() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                checks: lifecycle.readiness_checks(),
                reason: Some("shutting_down".to_string()),
            }),
        )
            .into_response();
    }

    let checks = lifecycle.readiness_checks();

    if checks.all_pass() && lifecycle.is_ready() {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                checks,
                reason: None,
            }),
        )
            .into_response()
    } else {
        // Name the failing check first; fall back to the lifecycle state
        // (e.g. still starting up with all checks green).
        let reason = if let Some(failed_check) = checks.first_failure() {
            Some(failed_check.to_string())
        } else if !lifecycle.is_ready() {
            Some(format!("lifecycle_state: {}", lifecycle.state()))
        } else {
            None
        };
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                checks,
                reason,
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================
