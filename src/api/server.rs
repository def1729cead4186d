//! API server using Axum
//!
//! Provides the administrative endpoints for managing proxy configs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{FleetError, Result};
use crate::manager::Manager;

use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub config: Config,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<Manager>, config: Config) -> Self {
        Self {
            manager,
            config,
            started_at: Instant::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(config: Config, manager: Arc<Manager>) -> Self {
        Self {
            state: AppState::new(manager, config),
        }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self.state.config.api_addr().parse().map_err(|_| {
            FleetError::InvalidConfig(format!(
                "invalid API address {}",
                self.state.config.api_addr()
            ))
        })?;

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| FleetError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
