//! Periodic health probing for one upstream provider.

use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
    time::Instant,
};

use crate::metrics::MetricsCollector;

use super::errors::UpstreamError;

/// User agent carried by probe requests only; client traffic never sends it.
const PROBE_USER_AGENT: &str = "rpc-gateway-health-check";

/// `eth_call` against an ephemeral contract whose only method returns the gas
/// left at execution time. A provider that answers this correctly is serving
/// real `eth_call` traffic, not just a cached block number.
const GAS_LEFT_CALL: &str = r#"
{
    "method": "eth_call",
    "params": [
        {
            "from": "0xab5801a7d398351b8be11c439e05c5b3259aec9b",
            "to": "0x5555555555555555555555555555555555555555",
            "value": "0x0",
            "data": "0x51be4eaa",
            "gas": "0x5F5E100"
        },
        "latest",
        {
            "0x5555555555555555555555555555555555555555": {
                "code": "0x6080604052348015600f57600080fd5b506004361060285760003560e01c806351be4eaa14602d575b600080fd5b60336045565b60408051918252519081900360200190f35b60005a90509056fea2646970667358221220b8fc97f4ae43b2849771c773ac6e7040e00be6910c96cabe366b34c3f294d27764736f6c634300060c0033"
            }
        }
    ],
    "id": 1,
    "jsonrpc": "2.0"
}
"#;

const BLOCK_NUMBER_CALL: &str =
    r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#;

/// Construction inputs for one prober.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub name: String,
    pub url: String,
    /// How often to run a probe cycle.
    pub interval: Duration,
    /// Deadline for each sub-probe.
    pub timeout: Duration,
    /// Carried from the schema; the prober currently acts on every sample.
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

/// Last observed probe results, written by the probe cycle under a short
/// write section and read by the supervisor.
#[derive(Debug)]
struct ProbeStatus {
    is_live: bool,
    block_number: u64,
    gas_limit: u64,
}

/// Per-target prober running block-number and gas-left sub-probes.
///
/// The two sub-probes of a cycle run concurrently, each bounded by the probe
/// timeout; the loop awaits the full cycle, so at most one cycle per target
/// is ever in flight. Liveness follows the gas-left probe alone: the
/// block-number probe feeds the advisory `block_number` gauge.
pub struct HealthProber {
    config: ProberConfig,
    client: reqwest::Client,
    status: RwLock<ProbeStatus>,
    metrics: Arc<MetricsCollector>,
}

#[derive(Deserialize)]
struct RpcResult {
    result: String,
}

impl HealthProber {
    /// # Errors
    ///
    /// Returns an error if the probe HTTP client cannot be built.
    pub fn new(config: ProberConfig, metrics: Arc<MetricsCollector>) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(PROBE_USER_AGENT)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| UpstreamError::ClientBuild(e.to_string()))?;

        Ok(Self {
            config,
            client,
            status: RwLock::new(ProbeStatus { is_live: true, block_number: 0, gas_limit: 0 }),
            metrics,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub async fn is_live(&self) -> bool {
        self.status.read().await.is_live
    }

    pub async fn block_number(&self) -> u64 {
        self.status.read().await.block_number
    }

    pub async fn gas_limit(&self) -> u64 {
        self.status.read().await.gas_limit
    }

    /// Runs one probe cycle immediately, then one per interval until the
    /// shutdown signal arrives.
    #[must_use]
    pub fn start_with_shutdown(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let prober = self;

        tokio::spawn(async move {
            prober.run_cycle().await;

            let mut interval = tokio::time::interval(prober.config.interval);
            // The first tick of a fresh interval completes immediately and
            // would double up the initial cycle.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(upstream = %prober.config.name, "prober shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        prober.run_cycle().await;
                    }
                }
            }
        })
    }

    /// One probe cycle: both sub-probes concurrently, then a single short
    /// write section to commit the results.
    async fn run_cycle(&self) {
        let (block, gas) = tokio::join!(self.check_block_number(), self.check_gas_limit());

        let mut status = self.status.write().await;
        match block {
            Ok(block_number) => status.block_number = block_number,
            Err(e) => {
                tracing::warn!(upstream = %self.config.name, error = %e, "block number probe failed");
            }
        }
        match gas {
            Ok(gas_limit) => {
                status.gas_limit = gas_limit;
                status.is_live = true;
            }
            Err(e) => {
                status.is_live = false;
                tracing::warn!(upstream = %self.config.name, error = %e, "gas limit probe failed");
            }
        }
    }

    /// `eth_blockNumber` sub-probe. Advisory: its failure never flips
    /// liveness, since providers may serve block numbers from a cache even
    /// while `eth_call` is broken.
    async fn check_block_number(&self) -> Result<u64, UpstreamError> {
        let start = Instant::now();
        let block_number = self.probe_call(BLOCK_NUMBER_CALL).await?;

        self.metrics.record_healthcheck_duration(
            &self.config.name,
            "eth_blockNumber",
            start.elapsed().as_secs_f64(),
        );
        tracing::debug!(
            upstream = %self.config.name,
            block_number,
            "fetched block number"
        );

        Ok(block_number)
    }

    /// Gas-left sub-probe; its outcome is the liveness verdict for the cycle.
    async fn check_gas_limit(&self) -> Result<u64, UpstreamError> {
        let start = Instant::now();
        let gas_limit = self.probe_call(GAS_LEFT_CALL).await?;

        self.metrics.record_healthcheck_duration(
            &self.config.name,
            "eth_call",
            start.elapsed().as_secs_f64(),
        );
        tracing::debug!(upstream = %self.config.name, gas_limit, "fetched gas limit");

        Ok(gas_limit)
    }

    /// Posts one JSON-RPC payload and parses the `result` hex integer.
    /// Request errors, non-200 statuses, decode errors, and timeouts all
    /// surface as probe failures.
    async fn probe_call(&self, payload: &'static str) -> Result<u64, UpstreamError> {
        let response = self
            .client
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(&e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(UpstreamError::Http(status.as_u16()));
        }

        let frame: RpcResult = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("rpc decode failed: {e}")))?;

        parse_hex_u64(&frame.result)
    }
}

/// Parses a `0x`-prefixed hex integer as returned by JSON-RPC providers.
fn parse_hex_u64(raw: &str) -> Result<u64, UpstreamError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| UpstreamError::InvalidResponse(format!("bad hex quantity {raw:?}: {e}")))
}
