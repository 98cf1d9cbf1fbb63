//! Tessark web tier - browser-facing streaming proxy for the pull backend.
//!
//! This library contains the HTTP handlers, backend client, and relay
//! plumbing for the Tessark frontend service. The frontend terminates
//! browser requests and forwards them to the in-cluster backend, streaming
//! archive bodies back to the client without buffering.
//!
//! # Request Paths
//!
//! - **Image pull:** `GET`/`POST /api/pull` relays `docker-archive` or
//!   `oci-archive` tarballs from the backend as they are produced.
//! - **Chart pull:** `POST /api/pullChart` relays packaged Helm charts.
//! - **Index fetch:** `GET /api/fetchIndex` retrieves a Helm repository
//!   `index.yaml` directly from the upstream repository.
//! - **Passthrough:** any other `/api/*` request is forwarded to the
//!   backend verbatim with forwarding headers applied.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging_layer;
pub mod metrics;
pub mod relay;
pub mod timeout;
pub mod validate;
