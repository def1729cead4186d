//! Health check endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let running = state.manager.running_ids().await.len();

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proxyfleet",
            "running_instances": running,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        })),
    )
}
