use std::str::FromStr;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tracing::{debug, info};

use crate::config::{Config, DatabaseConfig};
use crate::error::{FleetError, Result};

/// Shared Postgres pool backing the config store
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect using the `DB_*` settings
    pub async fn new(config: &Config) -> Result<Self> {
        let db = &config.database;

        info!(
            host = %db.host,
            port = db.port,
            database = %db.name,
            max_connections = db.max_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .min_connections(db.min_connections)
            .max_connections(db.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(30 * 60))
            .connect_with(connect_options(db)?)
            .await
            .map_err(|e| FleetError::DatabaseConnection(e.to_string()))?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query, returning its latency
    pub async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| FleetError::DatabaseConnection(e.to_string()))?;

        let latency = start.elapsed();
        debug!(latency_ms = latency.as_millis() as u64, "Database reachable");
        Ok(latency)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        super::migrations::run_migrations(&self.pool).await
    }

    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

/// Connection options built field by field so credentials need no URL escaping
fn connect_options(db: &DatabaseConfig) -> Result<PgConnectOptions> {
    let ssl_mode = PgSslMode::from_str(&db.ssl_mode)
        .map_err(|_| FleetError::InvalidConfig(format!("unknown DB_SSLMODE '{}'", db.ssl_mode)))?;

    Ok(PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .username(&db.user)
        .password(&db.password)
        .database(&db.name)
        .ssl_mode(ssl_mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(ssl_mode: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 6543,
            user: "fleet".to_string(),
            password: "p@ss:word".to_string(),
            name: "fleet".to_string(),
            ssl_mode: ssl_mode.to_string(),
            max_connections: 4,
            min_connections: 1,
        }
    }

    #[test]
    fn test_connect_options_accept_known_ssl_modes() {
        for mode in ["disable", "prefer", "require"] {
            assert!(connect_options(&settings(mode)).is_ok(), "{}", mode);
        }
    }

    #[test]
    fn test_unknown_ssl_mode_is_invalid_config() {
        let err = connect_options(&settings("sometimes")).unwrap_err();
        assert!(matches!(err, FleetError::InvalidConfig(_)));
    }
}
