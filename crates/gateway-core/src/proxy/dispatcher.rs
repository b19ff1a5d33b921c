//! The failover engine: buffered-body traversal across healthy targets.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::time::Instant;

use crate::{
    metrics::MetricsCollector,
    upstream::{HealthView, UpstreamTarget},
};

/// A successful upstream exchange, buffered for verbatim pass-through to the
/// client.
#[derive(Debug)]
pub struct UpstreamReply {
    pub provider: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Terminal result of one client request's traversal.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Some target answered with a non-5xx, non-429 status.
    Success(UpstreamReply),
    /// Every candidate was exhausted; the caller responds 503.
    Exhausted,
}

/// Result of a single attempt against a single target.
enum AttemptOutcome {
    Success(UpstreamReply),
    TransientFail,
}

/// Dispatches client requests across the configured targets, failing over on
/// transport errors and 5xx/429 responses.
///
/// The traversal asks the [`HealthView`] for the next healthy index not yet
/// visited, so each target is attempted at most once per client request and
/// always in configured order. Client disconnection drops the future that
/// runs this traversal, which aborts the in-flight attempt at its next await
/// without recording an observation.
pub struct Dispatcher {
    targets: Vec<Arc<UpstreamTarget>>,
    health: Arc<dyn HealthView>,
    metrics: Arc<MetricsCollector>,
    retries_per_target: u32,
    retry_delay: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        targets: Vec<Arc<UpstreamTarget>>,
        health: Arc<dyn HealthView>,
        metrics: Arc<MetricsCollector>,
        retries_per_target: u32,
        retry_delay: Duration,
    ) -> Self {
        Self { targets, health, metrics, retries_per_target, retry_delay }
    }

    /// Runs the failover traversal for one buffered request body.
    ///
    /// `client_gzip` tells whether the buffered body is gzip-encoded
    /// (`Content-Encoding: gzip` on the client request); each attempt
    /// replays the body from the buffer, re-coded per target capability.
    pub async fn dispatch(&self, body: Bytes, client_gzip: bool) -> DispatchOutcome {
        self.metrics.record_request();

        let mut visited = HashSet::new();
        let mut last_provider: Option<String> = None;

        while let Some(index) = self.health.next_healthy_excluding(&visited).await {
            visited.insert(index);
            let target = &self.targets[index];
            last_provider = Some(target.name().to_string());

            let mut retries = 0u32;
            loop {
                let start = Instant::now();
                match self.attempt(target, &body, client_gzip).await {
                    AttemptOutcome::Success(reply) => {
                        self.health.observe_success(target.name()).await;
                        self.metrics.record_request_duration(
                            target.name(),
                            "POST",
                            start.elapsed().as_secs_f64(),
                        );
                        return DispatchOutcome::Success(reply);
                    }
                    AttemptOutcome::TransientFail => {
                        if retries < self.retries_per_target {
                            retries += 1;
                            self.metrics.record_error_handled(target.name(), "retry");
                            tokio::time::sleep(self.retry_delay).await;
                            continue;
                        }

                        self.health.observe_failure(target.name()).await;
                        self.metrics.record_error_handled(target.name(), "rerouted");
                        break;
                    }
                }
            }
        }

        let provider = last_provider.as_deref().unwrap_or("none");
        tracing::warn!(provider, "no healthy target produced a response");
        self.metrics.record_error_handled(provider, "failure");
        DispatchOutcome::Exhausted
    }

    /// One attempt: forward, then classify linearly. Transport errors and
    /// 5xx/429 statuses fail over; every other status is a success passed
    /// through verbatim.
    async fn attempt(
        &self,
        target: &Arc<UpstreamTarget>,
        body: &Bytes,
        client_gzip: bool,
    ) -> AttemptOutcome {
        let response = match target.forward(body, client_gzip).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(provider = %target.name(), error = %e, "upstream attempt failed");
                return AttemptOutcome::TransientFail;
            }
        };

        let status = response.status();
        self.metrics.record_target_response_status(target.name(), status.as_u16());

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(
                provider = %target.name(),
                status = status.as_u16(),
                "upstream answered with a failover status"
            );
            return AttemptOutcome::TransientFail;
        }

        let headers = response.headers().clone();
        match response.bytes().await {
            Ok(bytes) => AttemptOutcome::Success(UpstreamReply {
                provider: target.name().to_string(),
                status: status.as_u16(),
                headers,
                body: bytes,
            }),
            Err(e) => {
                tracing::warn!(
                    provider = %target.name(),
                    error = %e,
                    "failed reading upstream response body"
                );
                AttemptOutcome::TransientFail
            }
        }
    }
}
