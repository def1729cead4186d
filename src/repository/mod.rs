//! Durable storage of proxy configs

pub mod proxy_config;

pub use proxy_config::ProxyConfigRepository;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewProxyConfig, ProxyConfig, ProxyConfigUpdate};

/// Record store for proxy configs
///
/// Absence is reported as `None`/`false` (or `ProxyConfigNotFound` from
/// `update`), never as a store failure.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Insert a config; the store assigns a monotonic, never reused id
    async fn insert(&self, config: &NewProxyConfig) -> Result<ProxyConfig>;

    /// Update upstream, interval and last reset time of an existing config
    async fn update(&self, id: i32, update: &ProxyConfigUpdate) -> Result<ProxyConfig>;

    /// Delete a config, returning whether a row existed
    async fn delete(&self, id: i32) -> Result<bool>;

    async fn get_by_id(&self, id: i32) -> Result<Option<ProxyConfig>>;

    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<ProxyConfig>>;

    /// All configs ordered by id
    async fn list_all(&self) -> Result<Vec<ProxyConfig>>;
}
