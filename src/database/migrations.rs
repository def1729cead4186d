use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // Executed as a simple query so one migration may hold several statements
            pool.execute(sql).await?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxy_configs", MIGRATION_001_PROXY_CONFIGS),
        (2, "proxy_configs_known_vendor", MIGRATION_002_KNOWN_VENDOR),
    ]
}

// Migration 1: proxy configs, one row per leased api key
const MIGRATION_001_PROXY_CONFIGS: &str = r#"
CREATE TABLE IF NOT EXISTS proxy_configs (
    id SERIAL PRIMARY KEY,
    upstream VARCHAR(255) NOT NULL,
    api_key VARCHAR(255) NOT NULL,
    vendor VARCHAR(20) NOT NULL,
    min_reset_interval INTEGER NOT NULL CHECK (min_reset_interval >= 1),
    last_reset_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT unique_proxy_config_api_key UNIQUE (api_key)
);

CREATE INDEX IF NOT EXISTS idx_proxy_configs_last_reset_at ON proxy_configs(last_reset_at);
"#;

// Migration 2: reject unknown vendors on write; rows already stored are left alone
const MIGRATION_002_KNOWN_VENDOR: &str = r#"
ALTER TABLE proxy_configs
    ADD CONSTRAINT proxy_configs_known_vendor
    CHECK (vendor IN ('tmproxy', 'kiotproxy')) NOT VALID;
"#;
