//! Test helpers for tessark-web integration tests.
//!
//! This module provides reusable utilities for testing the streaming relay:
//! - Full-application harness served over real TCP
//! - Mock pull backend with configurable routes and streamed bodies
//! - Captured-request inspection (method, path, headers, body)

#![allow(unused_imports)] // Re-exports may not be used by all test files

pub mod harness;
pub mod mock_backend;

pub use harness::*;
pub use mock_backend::*;
