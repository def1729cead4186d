use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::VendorKind;

/// Unified error type for the proxy fleet
#[derive(Error, Debug)]
pub enum FleetError {
    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    #[error("Store error: {0}")]
    Store(String),

    // Rotation provider errors
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("No current proxy assigned by {vendor}")]
    NoCurrentProxy { vendor: VendorKind },

    #[error("Operation timed out")]
    Timeout,

    // Instance errors
    #[error("Instance error: {0}")]
    Instance(String),

    #[error("Upstream connection failed: {0}")]
    UpstreamConnectionFailed(String),

    // Not found
    #[error("Proxy config not found: {id}")]
    ProxyConfigNotFound { id: i32 },

    #[error("Not found: {0}")]
    NotFound(String),

    // Authentication errors
    #[error("Authentication failed")]
    AuthenticationFailed,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            FleetError::Validation(_) | FleetError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            FleetError::AuthenticationFailed => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            FleetError::ProxyConfigNotFound { .. } | FleetError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }

            // 502 Bad Gateway
            FleetError::Provider(_)
            | FleetError::NoCurrentProxy { .. }
            | FleetError::UpstreamConnectionFailed(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            FleetError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            FleetError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            FleetError::Database(_)
            | FleetError::Store(_)
            | FleetError::Instance(_)
            | FleetError::Io(_)
            | FleetError::Http(_)
            | FleetError::MissingEnvVar(_)
            | FleetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<hyper::Error> for FleetError {
    fn from(err: hyper::Error) -> Self {
        FleetError::Http(err.to_string())
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FleetError::Timeout
        } else {
            FleetError::Provider(err.to_string())
        }
    }
}
