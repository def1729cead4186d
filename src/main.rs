//! Proxyfleet - Entry Point
//!
//! Starts every proxy instance, the auto-reset service and the API server
//! with graceful shutdown support.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxyfleet::api::ApiServer;
use proxyfleet::config::{Config, LogConfig};
use proxyfleet::database::Database;
use proxyfleet::manager::Manager;
use proxyfleet::providers::ProviderRegistry;
use proxyfleet::repository::ProxyConfigRepository;
use proxyfleet::services::{AutoResetConfig, AutoResetHandle, AutoResetService};

#[tokio::main]
async fn main() -> proxyfleet::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Proxyfleet");

    // Connect to database
    let db = Database::new(&config).await?;
    db.health_check().await?;
    info!("Connected to database");

    // Run migrations
    db.run_migrations().await?;
    info!("Database migrations complete");

    let store = Arc::new(ProxyConfigRepository::new(db.pool().clone()));
    let providers = ProviderRegistry::with_default_vendors(Duration::from_secs(
        config.rotation.provider_timeout,
    ))?;

    let manager = Arc::new(Manager::new(
        store.clone(),
        providers.clone(),
        config.proxy.clone(),
    ));
    let started = manager.start_all().await?;
    info!("Started {} proxy instances", started);

    // Start auto-reset service
    let (reset_handle, reset_shutdown) = AutoResetHandle::new();
    let reset_service = AutoResetService::new(
        store,
        manager.clone(),
        providers,
        AutoResetConfig {
            check_interval: Duration::from_secs(config.rotation.auto_reset_interval),
        },
    );
    let reset_task = tokio::spawn(async move {
        reset_service.run(reset_shutdown).await;
    });

    // Start API server
    let (shutdown_tx, api_shutdown) = watch::channel(false);
    let api_server = ApiServer::new(config.clone(), manager.clone());
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!(
        "Proxyfleet started - API: {}, instances on {}:{}+id",
        config.api_addr(),
        config.proxy.bind_host,
        config.proxy.port_base
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // API and auto-reset stop before instances so nothing restarts them
    let _ = shutdown_tx.send(true);
    reset_handle.shutdown();
    let _ = tokio::join!(api_task, reset_task);

    manager.stop_all().await;
    db.close().await;

    info!("Proxyfleet stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxyfleet={},tower_http=info", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
