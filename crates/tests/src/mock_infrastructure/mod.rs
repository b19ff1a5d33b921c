//! Reusable mock upstreams and a gateway harness for end-to-end tests.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Response, StatusCode},
    routing::post,
    Router,
};
use bytes::Bytes;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use gateway_core::{
    config::AppConfig,
    metrics::MetricsCollector,
    proxy::Dispatcher,
    upstream::{HealthSupervisor, HealthView},
};
use std::{
    io::{Read, Write},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::broadcast;

/// One request as received by a [`CapturingUpstream`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

struct CaptureState {
    requests: Mutex<Vec<CapturedRequest>>,
    status: u16,
    response_body: String,
    delay: Duration,
    /// Answer health probes with a valid JSON-RPC result (and leave them out
    /// of the capture log) so the configured status applies to gateway
    /// traffic only.
    probe_aware: bool,
}

/// Upstream double that records the raw bytes and headers of every request
/// before answering with a fixed response. Used where mockito's matchers are
/// not enough: binary body assertions and slow-response scenarios.
pub struct CapturingUpstream {
    url: String,
    state: Arc<CaptureState>,
}

impl CapturingUpstream {
    pub async fn start(status: u16, response_body: &str) -> Self {
        Self::spawn(status, response_body, Duration::ZERO, false).await
    }

    pub async fn start_with_delay(status: u16, response_body: &str, delay: Duration) -> Self {
        Self::spawn(status, response_body, delay, false).await
    }

    /// Like [`start`](Self::start), but health probes always succeed so the
    /// target stays live while gateway traffic gets the configured status.
    pub async fn start_probe_aware(status: u16, response_body: &str) -> Self {
        Self::spawn(status, response_body, Duration::ZERO, true).await
    }

    async fn spawn(status: u16, response_body: &str, delay: Duration, probe_aware: bool) -> Self {
        let state = Arc::new(CaptureState {
            requests: Mutex::new(Vec::new()),
            status,
            response_body: response_body.to_string(),
            delay,
            probe_aware,
        });

        let app = Router::new()
            .route("/", post(capture_handler))
            .route("/*path", post(capture_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind capture upstream");
        let addr = listener.local_addr().expect("capture upstream addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { url: format!("http://{addr}"), state }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.requests.lock().expect("capture lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().expect("capture lock").len()
    }
}

async fn capture_handler(
    State(state): State<Arc<CaptureState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    if state.probe_aware {
        let text = String::from_utf8_lossy(&body);
        if text.contains(r#""eth_blockNumber""#) || text.contains(r#""eth_call""#) {
            return Response::new(Body::from(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#));
        }
    }

    state
        .requests
        .lock()
        .expect("capture lock")
        .push(CapturedRequest { headers, body: body.to_vec() });

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    let mut response = Response::new(Body::from(state.response_body.clone()));
    *response.status_mut() =
        StatusCode::from_u16(state.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
}

/// One upstream entry for the harness config.
pub struct TargetSpec {
    pub name: String,
    pub url: String,
    pub compression: bool,
}

impl TargetSpec {
    #[must_use]
    pub fn plain(name: &str, url: &str) -> Self {
        Self { name: name.to_string(), url: url.to_string(), compression: false }
    }

    #[must_use]
    pub fn compressed(name: &str, url: &str) -> Self {
        Self { name: name.to_string(), url: url.to_string(), compression: true }
    }
}

/// Knobs for [`spawn_gateway`]; defaults mirror a minimal production config
/// with probing effectively disabled (one-hour interval).
pub struct GatewayOptions {
    pub retries_per_target: u32,
    pub retry_delay: Duration,
    pub upstream_timeout: Duration,
    /// `Some((size, threshold))` enables the rolling-window taint.
    pub rolling_window: Option<(usize, f64)>,
    /// Spawns probers and the one-second supervisor loop.
    pub start_supervisor: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            retries_per_target: 0,
            retry_delay: Duration::ZERO,
            upstream_timeout: Duration::from_secs(1),
            rolling_window: None,
            start_supervisor: false,
        }
    }
}

/// A gateway wired to mock upstreams and served on an ephemeral port.
pub struct GatewayHarness {
    base_url: String,
    pub supervisor: Arc<HealthSupervisor>,
    pub metrics: Arc<MetricsCollector>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GatewayHarness {
    #[must_use]
    pub fn url(&self) -> String {
        self.base_url.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for GatewayHarness {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builds the full stack (config, supervisor, dispatcher, router) and serves
/// it on a loopback listener.
pub async fn spawn_gateway(targets: &[TargetSpec], options: GatewayOptions) -> GatewayHarness {
    let mut target_yaml = String::new();
    for target in targets {
        target_yaml.push_str(&format!(
            "  - name: {}\n    connection:\n      http:\n        url: {}\n        compression: {}\n",
            target.name, target.url, target.compression
        ));
    }

    let rolling = match options.rolling_window {
        Some((size, threshold)) => format!(
            "  rollingWindowTaintEnabled: true\n  rollingWindowSize: {size}\n  rollingWindowFailureThreshold: {threshold}\n"
        ),
        None => String::new(),
    };

    let yaml = format!(
        r"
metrics:
  port: 9090
proxy:
  port: 3000
  upstreamTimeout: {timeout_ms}ms
  allowedNumberOfRetriesPerTarget: {retries}
  retryDelay: {retry_delay_ms}ms
healthChecks:
  interval: 1h
  timeout: 1s
  failureThreshold: 1
  successThreshold: 1
{rolling}targets:
{target_yaml}",
        timeout_ms = options.upstream_timeout.as_millis(),
        retries = options.retries_per_target,
        retry_delay_ms = options.retry_delay.as_millis(),
    );

    let config = AppConfig::from_yaml(&yaml).expect("harness config must be valid");
    let metrics = Arc::new(MetricsCollector::new().expect("metrics install"));
    let supervisor =
        Arc::new(HealthSupervisor::new(&config, Arc::clone(&metrics)).expect("supervisor build"));
    let health_view: Arc<dyn HealthView> = supervisor.clone();
    let dispatcher = Arc::new(Dispatcher::new(
        supervisor.upstream_targets(),
        health_view,
        Arc::clone(&metrics),
        config.proxy.allowed_number_of_retries_per_target,
        config.proxy.retry_delay(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    if options.start_supervisor {
        let _ = Arc::clone(&supervisor).start_with_shutdown(shutdown_tx.subscribe());
    }

    let app = server::router::gateway_router(dispatcher);
    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind gateway listener");
    let addr = listener.local_addr().expect("gateway addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    GatewayHarness { base_url: format!("http://{addr}"), supervisor, metrics, shutdown_tx }
}

/// Gzips a byte slice the way a gzip-capable client would.
#[must_use]
pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Decompresses a gzip body.
#[must_use]
pub fn gunzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).expect("gunzip read");
    out
}

/// Extracts one counter sample from a Prometheus text exposition. Matches
/// the metric name plus every given `label="value"` pair, regardless of
/// label order.
#[must_use]
pub fn counter_value(rendered: &str, metric: &str, labels: &[(&str, &str)]) -> Option<f64> {
    for line in rendered.lines() {
        if !line.starts_with(metric) {
            continue;
        }
        let matches_labels =
            labels.iter().all(|(key, value)| line.contains(&format!("{key}=\"{value}\"")));
        if !matches_labels {
            continue;
        }
        return line.split_whitespace().last().and_then(|raw| raw.parse().ok());
    }
    None
}
