use crate::error::{FleetError, Result};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-config proxy instance configuration
    pub proxy: ProxyInstanceConfig,
    /// API server configuration
    pub api: ApiServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Auto-reset and vendor configuration
    pub rotation: RotationConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyInstanceConfig {
    /// Public address advertised by the export endpoint (default: localhost)
    pub server_ip: String,
    /// Host every instance binds to (default: 0.0.0.0)
    pub bind_host: String,
    /// Instance port is `port_base + id` (default: 10000)
    pub port_base: u16,
    /// Static username clients authenticate with
    pub username: String,
    /// Static password clients authenticate with
    pub password: String,
    /// Upstream connect timeout in seconds
    pub connect_timeout: u64,
    /// Upstream request timeout in seconds
    pub request_timeout: u64,
    /// Grace period for in-flight connections on stop, in seconds
    pub drain_timeout: u64,
}

impl ProxyInstanceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout)
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8080)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Require Basic auth on /api routes
    pub auth_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Auto-reset tick in seconds
    pub auto_reset_interval: u64,
    /// Timeout for vendor API calls in seconds
    pub provider_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let password = get_env_or("PROXY_PASSWORD", "");
        if password.is_empty() {
            return Err(FleetError::MissingEnvVar("PROXY_PASSWORD".into()));
        }

        Ok(Config {
            proxy: ProxyInstanceConfig {
                server_ip: get_env_or("SERVER_IP", "localhost"),
                bind_host: get_env_or("PROXY_BIND_HOST", "0.0.0.0"),
                port_base: get_env_or("PROXY_PORT_BASE", "10000").parse().map_err(|_| {
                    FleetError::InvalidConfig("PROXY_PORT_BASE must be a valid port number".into())
                })?,
                username: get_env_or("PROXY_USERNAME", "admin"),
                password,
                connect_timeout: get_env_or("PROXY_CONNECT_TIMEOUT", "10")
                    .parse()
                    .unwrap_or(10),
                request_timeout: get_env_or("PROXY_REQUEST_TIMEOUT", "30")
                    .parse()
                    .unwrap_or(30),
                drain_timeout: get_env_or("PROXY_DRAIN_TIMEOUT", "5").parse().unwrap_or(5),
            },
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8080").parse().map_err(|_| {
                    FleetError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                auth_enabled: get_env_or("API_AUTH_ENABLED", "true")
                    .parse()
                    .unwrap_or(true),
            },
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: get_env_or("DB_PORT", "5432").parse().map_err(|_| {
                    FleetError::InvalidConfig("DB_PORT must be a valid port number".into())
                })?,
                user: get_env_or("DB_USER", "proxyfleet"),
                password: get_env_or("DB_PASSWORD", "proxyfleet"),
                name: get_env_or("DB_NAME", "proxyfleet"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: get_env_or("DB_MAX_CONNECTIONS", "10")
                    .parse()
                    .map_err(|_| {
                        FleetError::InvalidConfig("DB_MAX_CONNECTIONS must be a valid number".into())
                    })?,
                min_connections: get_env_or("DB_MIN_CONNECTIONS", "1").parse().map_err(|_| {
                    FleetError::InvalidConfig("DB_MIN_CONNECTIONS must be a valid number".into())
                })?,
            },
            rotation: RotationConfig {
                auto_reset_interval: parse_positive("AUTO_RESET_INTERVAL", "10")?,
                provider_timeout: parse_positive("PROVIDER_TIMEOUT", "30")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Parse a strictly positive number of seconds
fn parse_positive(key: &str, default: &str) -> Result<u64> {
    match get_env_or(key, default).parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(FleetError::InvalidConfig(format!(
            "{} must be a positive number of seconds",
            key
        ))),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
