//! # Gateway Core
//!
//! Core library for the failover JSON-RPC gateway.
//!
//! The gateway presents clients with a single resilient endpoint whose
//! availability is the union of its configured upstream providers:
//!
//! - **[`proxy`]**: the dispatch engine. Buffers each request body, walks the
//!   healthy targets in configured order, re-codes the body to each target's
//!   compression capability, and fails over on transport errors and 5xx/429
//!   responses.
//!
//! - **[`upstream`]**: health supervision. One prober, taint controller, and
//!   rolling success window per target; the supervisor publishes status
//!   gauges and answers the dispatcher's healthy-index queries through the
//!   [`upstream::HealthView`] capability.
//!
//! - **[`config`]**: YAML configuration model with load-time validation.
//!
//! - **[`metrics`]**: Prometheus collection shared by every component.
//!
//! ```text
//! client ──► Dispatcher ──► UpstreamTarget ──► provider
//!                │   ▲
//!    observe ────┘   └──── is-healthy view
//!                ▼
//!         HealthSupervisor ◄── HealthProber (per target)
//!                │
//!                └── TaintController / RollingWindow (per target)
//! ```

pub mod config;
pub mod metrics;
pub mod proxy;
pub mod upstream;
