//! Proxy config management handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use crate::api::middleware::AdminUser;
use crate::api::server::AppState;
use crate::error::FleetError;
use crate::models::{ProxyConfigResponse, UpsertProxyRequest, VendorKind};

/// List all proxy configs ordered by id
pub async fn list_proxies(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, FleetError> {
    let port_base = state.config.proxy.port_base;
    let configs = state.manager.list_configs().await?;

    let response: Vec<_> = configs
        .into_iter()
        .map(|config| ProxyConfigResponse::new(config, port_base))
        .collect();
    Ok(Json(response))
}

/// Create or refresh the config for an api key
pub async fn upsert_proxy(
    _admin: AdminUser,
    State(state): State<AppState>,
    Json(req): Json<UpsertProxyRequest>,
) -> Result<impl IntoResponse, FleetError> {
    let vendor = VendorKind::parse(&req.vendor)?;

    let config = state
        .manager
        .upsert_config(&req.api_key, vendor, req.min_reset_interval)
        .await?;

    info!(id = config.id, vendor = %config.vendor, "Upserted proxy config");
    Ok(Json(ProxyConfigResponse::new(
        config,
        state.config.proxy.port_base,
    )))
}

/// Delete a proxy config and stop its instance
pub async fn delete_proxy(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, FleetError> {
    state.manager.delete_config(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
