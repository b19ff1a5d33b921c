use anyhow::{Context, Result};
use clap::Parser;
use gateway_core::{
    config::AppConfig,
    metrics::MetricsCollector,
    proxy::Dispatcher,
    upstream::{HealthSupervisor, HealthView},
};
use server::router;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, signal, sync::broadcast};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Failover JSON-RPC gateway: forwards each request to the first healthy
/// upstream provider and reroutes on transient failures.
#[derive(Parser)]
#[command(name = "rpc-gateway")]
struct Cli {
    /// Path to the gateway YAML config file.
    #[arg(long)]
    config: PathBuf,
}

/// `DEBUG=true` raises verbosity to debug; `RUST_LOG` still wins when set.
fn init_logging() {
    let default_level =
        if std::env::var("DEBUG").is_ok_and(|value| value == "true") { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,gateway_core={default_level},server={default_level},rpc_gateway={default_level}"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    info!(
        targets_count = config.targets.len(),
        proxy_port = config.proxy.port,
        metrics_port = config.metrics.port,
        "configuration loaded"
    );

    let metrics =
        Arc::new(MetricsCollector::new().context("failed to initialize metrics")?);
    let supervisor = Arc::new(
        HealthSupervisor::new(&config, Arc::clone(&metrics))
            .context("failed to build health supervisor")?,
    );
    let health_view: Arc<dyn HealthView> = supervisor.clone();
    let dispatcher = Arc::new(Dispatcher::new(
        supervisor.upstream_targets(),
        health_view,
        Arc::clone(&metrics),
        config.proxy.allowed_number_of_retries_per_target,
        config.proxy.retry_delay(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let supervisor_handle = supervisor.start_with_shutdown(shutdown_tx.subscribe());

    let gateway_addr = SocketAddr::from(([0, 0, 0, 0], config.proxy.port));
    let gateway_listener = TcpListener::bind(gateway_addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {gateway_addr}"))?;
    info!(address = %gateway_addr, "gateway listening");

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics.port));
    let metrics_listener = TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    info!(address = %metrics_addr, "metrics listening");

    let gateway_server = axum::serve(gateway_listener, router::gateway_router(dispatcher))
        .with_graceful_shutdown(shutdown_signal());
    let metrics_server = axum::serve(metrics_listener, router::metrics_router(metrics))
        .with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = gateway_server => {
            if let Err(e) = result {
                error!(error = %e, "gateway server error");
            }
        }
        result = metrics_server => {
            if let Err(e) = result {
                error!(error = %e, "metrics server error");
            }
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = supervisor_handle.await {
        error!(error = %e, "health supervisor terminated abnormally");
    }
    info!("gateway shutdown complete");

    Ok(())
}
