//! End-to-end tests for the failover RPC gateway.
//!
//! Test modules:
//!
//! - `mock_infrastructure`: reusable mock upstreams (mockito-based RPC mocks
//!   plus a capturing upstream that records raw request bytes and headers)
//! - `failover_tests`: traversal behavior across targets (reroute on 5xx,
//!   unreachable primaries, per-target retries, exhaustion)
//! - `compression_tests`: request-body gzip negotiation between client and
//!   target
//! - `supervision_tests`: taint, rolling-window strikes, and client
//!   cancellation observed through the full HTTP stack
//!
//! Everything runs against in-process mock upstreams; no external services
//! are required:
//!
//! ```bash
//! cargo test --package tests
//! ```

/// Mock infrastructure shared by the test modules.
pub mod mock_infrastructure;

#[cfg(test)]
mod failover_tests;
