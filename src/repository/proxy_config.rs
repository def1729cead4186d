use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};

use super::ConfigStore;
use crate::error::{FleetError, Result};
use crate::models::{NewProxyConfig, ProxyConfig, ProxyConfigUpdate, VendorKind};

/// Raw `proxy_configs` row; the vendor is stored as a string
#[derive(Debug, FromRow)]
struct ProxyConfigRow {
    id: i32,
    upstream: String,
    api_key: String,
    vendor: String,
    min_reset_interval: i32,
    last_reset_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProxyConfigRow> for ProxyConfig {
    type Error = FleetError;

    fn try_from(row: ProxyConfigRow) -> Result<Self> {
        let vendor = VendorKind::from_str(&row.vendor).ok_or_else(|| {
            FleetError::Store(format!(
                "proxy config {} has unknown vendor '{}'",
                row.id, row.vendor
            ))
        })?;

        Ok(ProxyConfig {
            id: row.id,
            upstream: row.upstream,
            api_key: row.api_key,
            vendor,
            min_reset_interval: row.min_reset_interval,
            last_reset_at: row.last_reset_at,
            created_at: row.created_at,
        })
    }
}

/// Repository for proxy config database operations
#[derive(Clone)]
pub struct ProxyConfigRepository {
    pool: PgPool,
}

impl ProxyConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for ProxyConfigRepository {
    async fn insert(&self, config: &NewProxyConfig) -> Result<ProxyConfig> {
        let row = sqlx::query_as::<_, ProxyConfigRow>(
            r#"
            INSERT INTO proxy_configs (upstream, api_key, vendor, min_reset_interval, last_reset_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, upstream, api_key, vendor, min_reset_interval, last_reset_at, created_at
            "#,
        )
        .bind(&config.upstream)
        .bind(&config.api_key)
        .bind(config.vendor.as_str())
        .bind(config.min_reset_interval)
        .bind(config.last_reset_at)
        .fetch_one(&self.pool)
        .await?;

        info!(id = row.id, vendor = %row.vendor, "Created proxy config");
        row.try_into()
    }

    async fn update(&self, id: i32, update: &ProxyConfigUpdate) -> Result<ProxyConfig> {
        let row = sqlx::query_as::<_, ProxyConfigRow>(
            r#"
            UPDATE proxy_configs
            SET upstream = $2,
                min_reset_interval = COALESCE($3, min_reset_interval),
                last_reset_at = $4
            WHERE id = $1
            RETURNING id, upstream, api_key, vendor, min_reset_interval, last_reset_at, created_at
            "#,
        )
        .bind(id)
        .bind(&update.upstream)
        .bind(update.min_reset_interval)
        .bind(update.last_reset_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                info!(id = row.id, "Updated proxy config");
                row.try_into()
            }
            None => Err(FleetError::ProxyConfigNotFound { id }),
        }
    }

    async fn delete(&self, id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM proxy_configs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(id = id, "Deleted proxy config");
        }

        Ok(deleted)
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<ProxyConfig>> {
        let row = sqlx::query_as::<_, ProxyConfigRow>(
            r#"
            SELECT id, upstream, api_key, vendor, min_reset_interval, last_reset_at, created_at
            FROM proxy_configs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProxyConfig::try_from).transpose()
    }

    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<ProxyConfig>> {
        let row = sqlx::query_as::<_, ProxyConfigRow>(
            r#"
            SELECT id, upstream, api_key, vendor, min_reset_interval, last_reset_at, created_at
            FROM proxy_configs
            WHERE api_key = $1
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProxyConfig::try_from).transpose()
    }

    async fn list_all(&self) -> Result<Vec<ProxyConfig>> {
        let rows = sqlx::query_as::<_, ProxyConfigRow>(
            r#"
            SELECT id, upstream, api_key, vendor, min_reset_interval, last_reset_at, created_at
            FROM proxy_configs
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(usable_configs(rows))
    }
}

/// Convert listed rows, skipping any that no longer map to a known vendor
fn usable_configs(rows: Vec<ProxyConfigRow>) -> Vec<ProxyConfig> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match ProxyConfig::try_from(row) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(proxy_id = id, "Skipping unusable proxy config: {}", e);
                    None
                }
            }
        })
        .collect()
}
