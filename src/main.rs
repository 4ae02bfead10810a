use anyhow::{Context, Result};
use kube::Client;
use nanocd::notifications::{WebhookConfig, WebhookNotifier};
use nanocd::polling::Scheduler;
use nanocd::registry::OciTagProvider;
use nanocd::workload::KubeWorkloadAccessor;
use nanocd::{Reconciler, config, metrics};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        format!("nanocd={},kube=info", level).into()
    });

    let text = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("text"));
    let registry = tracing_subscriber::registry().with(filter);
    if text {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Resolves on SIGTERM or SIGINT
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return std::future::pending().await;
            },
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGINT handler: {}", e);
                return std::future::pending().await;
            },
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return std::future::pending().await;
        }
        info!("Received Ctrl+C");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting nanoCD");

    let path = config::config_path(std::env::args().nth(1));
    let config = Arc::new(
        config::load_config(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
    );
    info!(
        "Watching {} workloads in {} namespaces, refreshing every {}s",
        config.workload_targets().len(),
        config.namespaces.len(),
        config.refresh_interval_seconds
    );

    let metrics_handle = if config.metrics.enabled {
        Some(metrics::start_metrics_server(config.metrics.port).await?)
    } else {
        None
    };

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let workloads = Arc::new(KubeWorkloadAccessor::new(client, config.request_timeout()));
    let tags = Arc::new(OciTagProvider::new(config.request_timeout()));
    let notifier = Arc::new(WebhookNotifier::new(WebhookConfig {
        timeout: config.notification_timeout(),
        max_retries: config.notifications.max_retries,
        ..Default::default()
    })?);

    let reconciler = Arc::new(Reconciler::new(config.clone(), workloads, tags, notifier));
    let shutdown = CancellationToken::new();
    let scheduler_handle =
        Scheduler::new(config.refresh_interval(), reconciler).start(shutdown.clone());

    info!("nanoCD is running");

    shutdown_signal().await;
    info!("Shutting down, waiting for the current cycle to finish");
    shutdown.cancel();

    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("nanoCD stopped");
    Ok(())
}
