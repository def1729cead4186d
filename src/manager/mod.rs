//! Fleet manager
//!
//! Owns every running proxy instance and keeps them consistent with the
//! persisted configs. All mutations hold the instance map's write lock for
//! their whole duration, vendor and store calls included.

mod instance;

pub use instance::ProxyInstance;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProxyInstanceConfig;
use crate::error::{FleetError, Result};
use crate::models::{
    NewProxyConfig, ProxyConfig, ProxyConfigUpdate, VendorCredential, VendorKind,
};
use crate::providers::{ProviderRegistry, RotationProvider};
use crate::proxy::UpstreamTarget;
use crate::repository::ConfigStore;

pub struct Manager {
    instances: RwLock<HashMap<i32, Arc<ProxyInstance>>>,
    store: Arc<dyn ConfigStore>,
    providers: ProviderRegistry,
    settings: ProxyInstanceConfig,
}

impl Manager {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        providers: ProviderRegistry,
        settings: ProxyInstanceConfig,
    ) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            store,
            providers,
            settings,
        }
    }

    /// Create a config for `api_key`, or refresh the existing one
    ///
    /// New configs get a row and a started instance; a failure after the row
    /// is written deletes it again. Existing configs get their upstream and
    /// interval refreshed and their instance hot-swapped, or started if none
    /// is running.
    #[instrument(skip(self, api_key))]
    pub async fn upsert_config(
        &self,
        api_key: &str,
        vendor: VendorKind,
        min_reset_interval: i32,
    ) -> Result<ProxyConfig> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(FleetError::Validation("api_key must not be empty".into()));
        }
        if min_reset_interval < 1 {
            return Err(FleetError::Validation(
                "min_reset_interval must be at least 1 second".into(),
            ));
        }
        let provider = self.providers.get(vendor)?;

        let mut instances = self.instances.write().await;

        let existing = self.store.get_by_api_key(api_key).await?;
        if let Some(row) = &existing {
            if row.vendor != vendor {
                return Err(FleetError::Validation(format!(
                    "api key is already registered for {}",
                    row.vendor
                )));
            }
        }

        let now = Utc::now();
        let (credential, last_reset_at) = current_credential(provider.as_ref(), api_key, now).await?;
        UpstreamTarget::parse(&credential.descriptor, vendor)?;

        match existing {
            None => {
                let row = self
                    .store
                    .insert(&NewProxyConfig {
                        upstream: credential.descriptor,
                        api_key: api_key.to_string(),
                        vendor,
                        min_reset_interval,
                        last_reset_at,
                    })
                    .await?;

                match self.launch(&row).await {
                    Ok(instance) => {
                        instances.insert(row.id, instance);
                        info!(proxy_id = row.id, "Proxy config created");
                        Ok(row)
                    }
                    Err(e) => {
                        warn!(proxy_id = row.id, "Instance failed to start, removing config: {}", e);
                        if let Err(rollback) = self.store.delete(row.id).await {
                            error!(proxy_id = row.id, "Failed to remove config after start failure: {}", rollback);
                        }
                        Err(e)
                    }
                }
            }
            Some(row) => {
                let updated = self
                    .store
                    .update(
                        row.id,
                        &ProxyConfigUpdate {
                            upstream: credential.descriptor,
                            min_reset_interval: Some(min_reset_interval),
                            last_reset_at,
                        },
                    )
                    .await?;

                match instances.get(&updated.id) {
                    Some(instance) => {
                        instance.update_upstream(&updated.upstream)?;
                    }
                    None => {
                        warn!(proxy_id = updated.id, "No running instance for config, starting one");
                        let instance = self.launch(&updated).await?;
                        instances.insert(updated.id, instance);
                    }
                }

                info!(proxy_id = updated.id, "Proxy config updated");
                Ok(updated)
            }
        }
    }

    /// Stop the instance and delete the config
    ///
    /// A failed stop is logged and does not keep the row. Deleting an id
    /// that is already gone succeeds.
    #[instrument(skip(self))]
    pub async fn delete_config(&self, id: i32) -> Result<()> {
        let mut instances = self.instances.write().await;

        let instance = instances.remove(&id);
        if let Some(instance) = &instance {
            if let Err(e) = instance.stop().await {
                error!(proxy_id = id, "Failed to stop instance: {}", e);
            }
        }

        let deleted = self.store.delete(id).await?;
        if !deleted && instance.is_none() {
            debug!(proxy_id = id, "Proxy config already absent");
            return Ok(());
        }

        info!(proxy_id = id, "Proxy config deleted");
        Ok(())
    }

    /// All persisted configs ordered by id
    pub async fn list_configs(&self) -> Result<Vec<ProxyConfig>> {
        let _instances = self.instances.read().await;
        self.store.list_all().await
    }

    /// Start an instance for every persisted config
    ///
    /// Configs that fail to start are logged and skipped. Returns how many
    /// instances are running afterwards.
    #[instrument(skip(self))]
    pub async fn start_all(&self) -> Result<usize> {
        let mut instances = self.instances.write().await;
        let configs = self.store.list_all().await?;

        for config in configs {
            if instances.contains_key(&config.id) {
                continue;
            }

            match self.launch(&config).await {
                Ok(instance) => {
                    instances.insert(config.id, instance);
                }
                Err(e) => {
                    error!(proxy_id = config.id, "Failed to start proxy instance: {}", e);
                }
            }
        }

        info!(running = instances.len(), "Proxy instances started");
        Ok(instances.len())
    }

    /// Stop every running instance; persisted configs are untouched
    #[instrument(skip(self))]
    pub async fn stop_all(&self) {
        let mut instances = self.instances.write().await;

        let mut stopping = JoinSet::new();
        for (id, instance) in instances.drain() {
            stopping.spawn(async move { (id, instance.stop().await) });
        }

        while let Some(joined) = stopping.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => error!(proxy_id = id, "Failed to stop instance: {}", e),
                Err(e) => error!("Stop task failed: {}", e),
            }
        }

        info!("All proxy instances stopped");
    }

    /// Hot-swap a running instance onto a freshly rotated descriptor
    #[instrument(skip(self, descriptor))]
    pub async fn apply_rotated_credential(&self, id: i32, descriptor: &str) -> Result<()> {
        let instances = self.instances.write().await;
        let instance = instances
            .get(&id)
            .ok_or_else(|| FleetError::NotFound(format!("no running instance for proxy {}", id)))?;

        instance.update_upstream(descriptor)?;
        Ok(())
    }

    /// Ids of running instances, ascending
    pub async fn running_ids(&self) -> Vec<i32> {
        let instances = self.instances.read().await;
        let mut ids: Vec<i32> = instances.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn instance(&self, id: i32) -> Option<Arc<ProxyInstance>> {
        self.instances.read().await.get(&id).cloned()
    }

    async fn launch(&self, config: &ProxyConfig) -> Result<Arc<ProxyInstance>> {
        let instance = Arc::new(ProxyInstance::new(config, &self.settings)?);
        instance.start().await?;
        Ok(instance)
    }
}

/// Current credential for `api_key` and the rotation time it implies
///
/// Falls back to forcing a rotation when the vendor has no assignment yet.
async fn current_credential(
    provider: &dyn RotationProvider,
    api_key: &str,
    now: DateTime<Utc>,
) -> Result<(VendorCredential, DateTime<Utc>)> {
    match provider.get_current_proxy(api_key).await {
        Ok(credential) => {
            let wait = credential.next_reset_after.unwrap_or(0).max(0);
            let last_reset_at = now - Duration::seconds(wait);
            Ok((credential, last_reset_at))
        }
        Err(FleetError::NoCurrentProxy { vendor }) => {
            info!(vendor = %vendor, "No current proxy assigned, requesting a new one");
            let credential = provider.get_new_proxy(api_key).await?;
            Ok((credential, now))
        }
        Err(e) => Err(e),
    }
}
