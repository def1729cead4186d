//! API route definitions

use axum::routing::{delete, get};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (no auth required)
        .route("/health", get(handlers::health::health_check))
        .nest("/api", protected_routes())
        .with_state(state)
}

/// Routes that require admin credentials
fn protected_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/proxies",
            get(handlers::proxy::list_proxies).post(handlers::proxy::upsert_proxy),
        )
        .route("/proxies/:id", delete(handlers::proxy::delete_proxy))
        .route("/export", get(handlers::export::export_proxies))
}
