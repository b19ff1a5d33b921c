//! Health supervision across all configured targets.

use async_trait::async_trait;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    config::{AppConfig, TargetConfig},
    metrics::MetricsCollector,
};

use super::{
    errors::UpstreamError,
    prober::{HealthProber, ProberConfig},
    rolling_window::RollingWindow,
    target::UpstreamTarget,
    taint::TaintController,
};

/// Read-only health capability handed to the dispatcher, plus the
/// observation channel back. Keeps the dispatcher decoupled from the
/// supervisor's ownership of probers and timers.
#[async_trait]
pub trait HealthView: Send + Sync {
    /// First healthy index in configured order.
    async fn next_healthy(&self) -> Option<usize>;

    /// First healthy index in configured order not present in `visited`.
    async fn next_healthy_excluding(&self, visited: &HashSet<usize>) -> Option<usize>;

    async fn is_target_healthy(&self, name: &str) -> bool;

    /// Pushes a success observation into the named target's rolling window.
    async fn observe_success(&self, name: &str);

    /// Pushes a failure observation into the named target's rolling window.
    async fn observe_failure(&self, name: &str);

    /// Taints the named target, excluding it from selection for the
    /// controller's current back-off.
    async fn taint(&self, name: &str);
}

/// Everything the gateway holds per configured target. Created at boot,
/// never added to or removed from afterwards.
pub struct TargetRuntime {
    config: TargetConfig,
    target: Arc<UpstreamTarget>,
    prober: Arc<HealthProber>,
    taint: Arc<TaintController>,
    window: Arc<RollingWindow>,
}

impl TargetRuntime {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn target(&self) -> &Arc<UpstreamTarget> {
        &self.target
    }

    #[must_use]
    pub fn prober(&self) -> &Arc<HealthProber> {
        &self.prober
    }

    #[must_use]
    pub fn taint_controller(&self) -> &Arc<TaintController> {
        &self.taint
    }

    #[must_use]
    pub fn window(&self) -> &Arc<RollingWindow> {
        &self.window
    }

    /// Healthy means live according to the last probe and not tainted.
    pub async fn is_healthy(&self) -> bool {
        self.prober.is_live().await && !self.taint.is_tainted().await
    }
}

/// Owns one (prober, taint controller, rolling window) triple per target,
/// answers the dispatcher's healthy-index queries, and publishes status
/// gauges on a one-second cadence.
pub struct HealthSupervisor {
    targets: Vec<Arc<TargetRuntime>>,
    metrics: Arc<MetricsCollector>,
    rolling_window_taint_enabled: bool,
    rolling_window_failure_threshold: f64,
}

impl HealthSupervisor {
    /// Builds the full set of target runtimes from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any target URL is invalid or an HTTP client
    /// cannot be constructed.
    pub fn new(config: &AppConfig, metrics: Arc<MetricsCollector>) -> Result<Self, UpstreamError> {
        let mut targets = Vec::with_capacity(config.targets.len());

        for target_config in &config.targets {
            let target = Arc::new(UpstreamTarget::new(
                target_config,
                config.proxy.upstream_timeout,
            )?);
            let prober = Arc::new(HealthProber::new(
                ProberConfig {
                    name: target_config.name.clone(),
                    url: target_config.connection.http.url.clone(),
                    interval: config.health_checks.interval,
                    timeout: config.health_checks.timeout,
                    failure_threshold: config.health_checks.failure_threshold,
                    success_threshold: config.health_checks.success_threshold,
                },
                Arc::clone(&metrics),
            )?);

            targets.push(Arc::new(TargetRuntime {
                config: target_config.clone(),
                target,
                prober,
                taint: Arc::new(TaintController::new(&target_config.name)),
                window: Arc::new(RollingWindow::new(config.health_checks.rolling_window_size)),
            }));
        }

        Ok(Self {
            targets,
            metrics,
            rolling_window_taint_enabled: config.health_checks.rolling_window_taint_enabled,
            rolling_window_failure_threshold: config
                .health_checks
                .rolling_window_failure_threshold,
        })
    }

    #[must_use]
    pub fn runtimes(&self) -> &[Arc<TargetRuntime>] {
        &self.targets
    }

    /// The upstream adapters in configured order, for the dispatcher.
    #[must_use]
    pub fn upstream_targets(&self) -> Vec<Arc<UpstreamTarget>> {
        self.targets.iter().map(|runtime| Arc::clone(&runtime.target)).collect()
    }

    fn runtime_by_name(&self, name: &str) -> Option<&Arc<TargetRuntime>> {
        let runtime = self.targets.iter().find(|runtime| runtime.name() == name);
        if runtime.is_none() {
            tracing::error!(upstream = %name, "lookup of unknown target");
        }
        runtime
    }

    /// Spawns every prober and the one-second supervision loop. The returned
    /// handle resolves after the loop has exited and every prober has
    /// stopped.
    #[must_use]
    pub fn start_with_shutdown(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let supervisor = self;

        tokio::spawn(async move {
            let mut prober_handles = Vec::with_capacity(supervisor.targets.len());
            for (index, runtime) in supervisor.targets.iter().enumerate() {
                supervisor.metrics.record_provider_info(index, runtime.name());
                prober_handles.push(
                    Arc::clone(&runtime.prober).start_with_shutdown(shutdown_rx.resubscribe()),
                );
            }

            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("health supervisor shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        supervisor.check_for_failing_requests().await;
                        supervisor.report_status_metrics().await;
                    }
                }
            }

            for handle in prober_handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "prober task terminated abnormally");
                }
            }
        })
    }

    /// Taints every target whose full rolling window shows a success rate
    /// strictly below the configured threshold, then resets that window so
    /// the next verdict is based on fresh observations.
    async fn check_for_failing_requests(&self) {
        if !self.rolling_window_taint_enabled {
            return;
        }

        for runtime in &self.targets {
            if !runtime.window.has_enough().await {
                continue;
            }
            let success_rate = runtime.window.avg().await;
            if success_rate < self.rolling_window_failure_threshold {
                tracing::warn!(
                    upstream = %runtime.name(),
                    success_rate,
                    threshold = self.rolling_window_failure_threshold,
                    "success rate below threshold, tainting target"
                );
                runtime.taint.taint().await;
                runtime.window.reset().await;
            }
        }
    }

    async fn report_status_metrics(&self) {
        for runtime in &self.targets {
            let healthy = runtime.is_healthy().await;
            let tainted = runtime.taint.is_tainted().await;

            self.metrics.record_provider_status(runtime.name(), "healthy", healthy);
            self.metrics.record_provider_status(runtime.name(), "tainted", tainted);
            self.metrics
                .record_provider_block_number(runtime.name(), runtime.prober.block_number().await);
            self.metrics
                .record_provider_gas_limit(runtime.name(), runtime.prober.gas_limit().await);
        }
    }
}

#[async_trait]
impl HealthView for HealthSupervisor {
    async fn next_healthy(&self) -> Option<usize> {
        for (index, runtime) in self.targets.iter().enumerate() {
            if runtime.is_healthy().await {
                return Some(index);
            }
        }
        None
    }

    async fn next_healthy_excluding(&self, visited: &HashSet<usize>) -> Option<usize> {
        for (index, runtime) in self.targets.iter().enumerate() {
            if !visited.contains(&index) && runtime.is_healthy().await {
                return Some(index);
            }
        }
        None
    }

    async fn is_target_healthy(&self, name: &str) -> bool {
        match self.runtime_by_name(name) {
            Some(runtime) => runtime.is_healthy().await,
            None => false,
        }
    }

    async fn observe_success(&self, name: &str) {
        if let Some(runtime) = self.runtime_by_name(name) {
            runtime.window.observe(1).await;
        }
    }

    async fn observe_failure(&self, name: &str) {
        if let Some(runtime) = self.runtime_by_name(name) {
            runtime.window.observe(0).await;
        }
    }

    async fn taint(&self, name: &str) {
        if let Some(runtime) = self.runtime_by_name(name) {
            runtime.taint.taint().await;
        }
    }
}
