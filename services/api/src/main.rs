use anyhow::{Context, Result};
use pulsex_api::{init_gateway, start_api_server, AppState, Config, StoragePaths};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = %config.service.version,
        "Starting PulseX Medical API"
    );

    if config.service.metrics_enabled {
        init_metrics(config.service.metrics_port)?;
    }

    // Storage must be usable before any request is accepted
    let storage = StoragePaths::new(&config.storage);
    storage
        .ensure_directories()
        .await
        .context("Failed to initialize upload directories")?;

    // A missing classifier disables X-ray analysis but not the service
    let classifier = init_gateway(&config.classifier);
    let xray_ai = if classifier.is_some() { "active" } else { "inactive" };

    info!(
        xray_ai = xray_ai,
        ecg_storage = "active",
        "PulseX Medical API v{}",
        config.service.version
    );

    let state = AppState::new(classifier, storage, config.service.clone());

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("PulseX Medical API stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
