//! Plain-text export of client endpoints

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::api::middleware::AdminUser;
use crate::api::server::AppState;
use crate::error::FleetError;
use crate::models::{port_for, ProxyConfig};

/// One `SERVER_IP:port` line per config
pub async fn export_proxies(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, FleetError> {
    let configs = state.manager.list_configs().await?;
    let proxy = &state.config.proxy;
    let body = render_export(&proxy.server_ip, proxy.port_base, &configs);

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body))
}

fn render_export(server_ip: &str, port_base: u16, configs: &[ProxyConfig]) -> String {
    configs
        .iter()
        .filter_map(|config| port_for(port_base, config.id).ok())
        .map(|port| format!("{}:{}\n", server_ip, port))
        .collect()
}
