//! Prometheus metrics for the gateway.
//!
//! Counters and histograms are recorded through the `metrics` facade (atomic,
//! no locks on the request path); the Prometheus recorder is installed once
//! per process and its handle is shared by every collector clone. The metrics
//! server renders the handle on `GET /metrics`.
//!
//! Upstream names appear as metric labels. That is intentional operational
//! visibility; deployments exposing `/metrics` publicly should restrict the
//! port at the network layer.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock};
use thiserror::Error;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

const REQUEST_DURATION_BUCKETS: &[f64] =
    &[0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0];
const HEALTHCHECK_DURATION_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Failure to install the Prometheus recorder.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("failed to install prometheus recorder: {0}")]
    Install(#[from] BuildError),
}

/// Handle-owning collector shared by the dispatcher, the supervisor, and the
/// probers. All record methods are cheap and lock-free.
#[derive(Clone)]
pub struct MetricsCollector {
    handle: PrometheusHandle,
}

impl MetricsCollector {
    /// Installs the process-wide Prometheus recorder on first use and returns
    /// a collector bound to it. Subsequent calls reuse the installed handle.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the recorder cannot be installed.
    pub fn new() -> Result<Self, MetricsError> {
        let _guard = INSTALL_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(handle) = PROMETHEUS_HANDLE.get() {
            return Ok(Self { handle: handle.clone() });
        }

        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("rpc_gateway_request_duration_seconds".to_string()),
                REQUEST_DURATION_BUCKETS,
            )?
            .set_buckets_for_metric(
                Matcher::Full("rpc_gateway_healthcheck_response_duration_seconds".to_string()),
                HEALTHCHECK_DURATION_BUCKETS,
            )?
            .install_recorder()?;

        let handle = PROMETHEUS_HANDLE.get_or_init(|| handle).clone();
        Ok(Self { handle })
    }

    /// Prometheus text exposition for the metrics endpoint.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn record_request(&self) {
        counter!("rpc_gateway_requests_total").increment(1);
    }

    pub fn record_request_duration(&self, provider: &str, method: &str, seconds: f64) {
        histogram!(
            "rpc_gateway_request_duration_seconds",
            "provider" => provider.to_string(),
            "method" => method.to_string(),
        )
        .record(seconds);
    }

    pub fn record_healthcheck_duration(&self, provider: &str, method: &str, seconds: f64) {
        histogram!(
            "rpc_gateway_healthcheck_response_duration_seconds",
            "provider" => provider.to_string(),
            "method" => method.to_string(),
        )
        .record(seconds);
    }

    pub fn record_target_response_status(&self, provider: &str, status: u16) {
        counter!(
            "rpc_gateway_target_response_status_total",
            "provider" => provider.to_string(),
            "status_code" => status.to_string(),
        )
        .increment(1);
    }

    /// `kind` is one of `retry`, `rerouted`, `failure`.
    pub fn record_error_handled(&self, provider: &str, kind: &str) {
        counter!(
            "rpc_gateway_request_errors_handled_total",
            "provider" => provider.to_string(),
            "type" => kind.to_string(),
        )
        .increment(1);
    }

    pub fn record_provider_status(&self, provider: &str, kind: &str, active: bool) {
        gauge!(
            "rpc_gateway_provider_status",
            "provider" => provider.to_string(),
            "type" => kind.to_string(),
        )
        .set(f64::from(u8::from(active)));
    }

    pub fn record_provider_block_number(&self, provider: &str, block_number: u64) {
        gauge!(
            "rpc_gateway_provider_block_number",
            "provider" => provider.to_string(),
        )
        .set(block_number as f64);
    }

    pub fn record_provider_gas_limit(&self, provider: &str, gas_limit: u64) {
        gauge!(
            "rpc_gateway_provider_gas_limit",
            "provider" => provider.to_string(),
        )
        .set(gas_limit as f64);
    }

    pub fn record_provider_info(&self, index: usize, provider: &str) {
        gauge!(
            "rpc_gateway_provider_info",
            "index" => index.to_string(),
            "provider" => provider.to_string(),
        )
        .set(1.0);
    }
}
