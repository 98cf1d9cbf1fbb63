//! Runtime configuration for the tessark web tier.
//!
//! Listener and relay tuning is environment-driven with defaults that match
//! the in-cluster deployment. Invalid values never abort startup: tunables
//! fall back to their defaults with a warning.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Default browser-facing HTTP port.
///
/// | Purpose | Env override | Default |
/// |---------|--------------|---------|
/// | HTTP listener | `TESSARK_HTTP_PORT` | 3000 |
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Default backend base URL (in-cluster service name).
pub const DEFAULT_BACKEND_URL: &str = "http://tessark-backend-service:8080";

/// Resolve the HTTP listen port.
///
/// Reads `TESSARK_HTTP_PORT`; unset or unparseable values fall back to
/// [`DEFAULT_HTTP_PORT`].
///
/// # Example
///
/// ```rust
/// use tessark_web::config::http_port;
///
/// let port = http_port();
/// assert!(port > 0);
/// ```
pub fn http_port() -> u16 {
    std::env::var("TESSARK_HTTP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_HTTP_PORT)
}

/// Tuning knobs for backend relays.
///
/// One instance is built at startup and shared through router state; the
/// values feed both the pooled client construction and the per-stream
/// timeout guard.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Total deadline for a backend request, first byte through last.
    pub request_timeout: Duration,

    /// TCP connect deadline for backend sockets.
    pub connect_timeout: Duration,

    /// Maximum gap between streamed chunks before the relay is aborted.
    pub chunk_timeout: Duration,

    /// Idle pooled connections kept per backend host.
    pub pool_max_idle_per_host: usize,

    /// How long pooled connections may sit idle before being closed.
    pub pool_idle_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            chunk_timeout: Duration::from_secs(60),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `TESSARK_REQUEST_TIMEOUT_SECS` (default: 300)
    /// - `TESSARK_CONNECT_TIMEOUT_SECS` (default: 5)
    /// - `TESSARK_CHUNK_TIMEOUT_SECS` (default: 60)
    /// - `TESSARK_POOL_MAX_IDLE` (default: 32)
    /// - `TESSARK_POOL_IDLE_TIMEOUT_SECS` (default: 90)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            request_timeout: Duration::from_secs(parse_env_warn(
                "TESSARK_REQUEST_TIMEOUT_SECS",
                default.request_timeout.as_secs(),
            )),
            connect_timeout: Duration::from_secs(parse_env_warn(
                "TESSARK_CONNECT_TIMEOUT_SECS",
                default.connect_timeout.as_secs(),
            )),
            chunk_timeout: Duration::from_secs(parse_env_warn(
                "TESSARK_CHUNK_TIMEOUT_SECS",
                default.chunk_timeout.as_secs(),
            )),
            pool_max_idle_per_host: parse_env_warn(
                "TESSARK_POOL_MAX_IDLE",
                default.pool_max_idle_per_host,
            ),
            pool_idle_timeout: Duration::from_secs(parse_env_warn(
                "TESSARK_POOL_IDLE_TIMEOUT_SECS",
                default.pool_idle_timeout.as_secs(),
            )),
        }
    }
}

/// Parse an environment variable, falling back to a default.
///
/// Unset variables fall back silently; set-but-unparseable values log a
/// warning so misconfigured deployments are visible.
pub(crate) fn parse_env_warn<T: FromStr + Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %value,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.chunk_timeout, Duration::from_secs(60));
        assert_eq!(config.pool_max_idle_per_host, 32);
        assert_eq!(config.pool_idle_timeout, Duration::from_secs(90));
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override() {
        unsafe {
            std::env::set_var("TESSARK_REQUEST_TIMEOUT_SECS", "120");
            std::env::set_var("TESSARK_POOL_MAX_IDLE", "8");
        }

        let config = RelayConfig::from_env();
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.pool_max_idle_per_host, 8);

        unsafe {
            std::env::remove_var("TESSARK_REQUEST_TIMEOUT_SECS");
            std::env::remove_var("TESSARK_POOL_MAX_IDLE");
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_invalid_env_falls_back_to_default() {
        unsafe {
            std::env::set_var("TESSARK_CHUNK_TIMEOUT_SECS", "not-a-number");
        }

        let config = RelayConfig::from_env();
        assert_eq!(config.chunk_timeout, Duration::from_secs(60));

        unsafe {
            std::env::remove_var("TESSARK_CHUNK_TIMEOUT_SECS");
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_http_port_accessor() {
        unsafe {
            std::env::remove_var("TESSARK_HTTP_PORT");
        }
        assert_eq!(http_port(), DEFAULT_HTTP_PORT);

        unsafe {
            std::env::set_var("TESSARK_HTTP_PORT", "8088");
        }
        assert_eq!(http_port(), 8088);

        // Invalid values fall back rather than panic
        unsafe {
            std::env::set_var("TESSARK_HTTP_PORT", "not-a-port");
        }
        assert_eq!(http_port(), DEFAULT_HTTP_PORT);

        unsafe {
            std::env::remove_var("TESSARK_HTTP_PORT");
        }
    }
}
