//! HTTP Basic authentication for the admin API
//!
//! Uses the same static credentials as the proxy instances.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::api::server::AppState;
use crate::proxy::middleware::decode_basic;

/// Authentication error types
#[derive(Debug)]
pub enum AuthError {
    MissingCredentials,
    WrongCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingCredentials => "Missing credentials",
            AuthError::WrongCredentials => "Invalid credentials",
        };

        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"proxyfleet\"")],
            Json(json!({ "error": message })),
        )
            .into_response()
    }
}

/// Extractor for requests carrying the admin credentials
///
/// Always succeeds when API auth is disabled.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub username: Option<String>,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if !state.config.api.auth_enabled {
            return Ok(AdminUser { username: None });
        }

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;

        let (user, pass) = decode_basic(auth_header).ok_or(AuthError::WrongCredentials)?;

        let expected = &state.config.proxy;
        if user != expected.username || pass != expected.password {
            warn!("Admin authentication failed for user: {}", user);
            return Err(AuthError::WrongCredentials);
        }

        Ok(AdminUser {
            username: Some(user),
        })
    }
}
