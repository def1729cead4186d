//! Auto-reset service
//!
//! Periodically forces a vendor rotation for every config whose minimum reset
//! interval has elapsed, persists the new upstream and hot-swaps the running
//! instance onto it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::manager::Manager;
use crate::models::{ProxyConfig, ProxyConfigUpdate};
use crate::providers::ProviderRegistry;
use crate::proxy::UpstreamTarget;
use crate::repository::ConfigStore;

/// Auto-reset service configuration
#[derive(Clone)]
pub struct AutoResetConfig {
    /// How often to scan for configs due for rotation
    pub check_interval: Duration,
}

impl Default for AutoResetConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
        }
    }
}

/// Outcome of one scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResetSummary {
    pub scanned: usize,
    pub due: usize,
    pub rotated: usize,
    pub failed: usize,
}

/// Auto-reset service
pub struct AutoResetService {
    store: Arc<dyn ConfigStore>,
    manager: Arc<Manager>,
    providers: ProviderRegistry,
    config: AutoResetConfig,
}

impl AutoResetService {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        manager: Arc<Manager>,
        providers: ProviderRegistry,
        config: AutoResetConfig,
    ) -> Self {
        Self {
            store,
            manager,
            providers,
            config,
        }
    }

    /// Run the auto-reset service
    ///
    /// Shutdown is only observed between scans, so a scan in progress
    /// always completes.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting auto-reset service (interval: {}s)",
            self.config.check_interval.as_secs()
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            // Shutdown wins over a tick that fell due during the previous scan
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Auto-reset service shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_reset(Utc::now()).await {
                        error!("Auto-reset scan failed: {}", e);
                    }
                }
            }
        }
    }

    /// Rotate every config due at `now`
    ///
    /// A failing config is logged and left for the next scan.
    pub async fn check_and_reset(&self, now: DateTime<Utc>) -> Result<ResetSummary> {
        let configs = self.store.list_all().await?;
        let mut summary = ResetSummary {
            scanned: configs.len(),
            ..Default::default()
        };

        for config in configs.iter().filter(|c| c.is_due(now)) {
            summary.due += 1;
            match self.reset_config(config, now).await {
                Ok(()) => summary.rotated += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(proxy_id = config.id, "Auto-reset failed, retrying next tick: {}", e);
                }
            }
        }

        if summary.due > 0 {
            info!(
                due = summary.due,
                rotated = summary.rotated,
                failed = summary.failed,
                "Auto-reset scan finished"
            );
        } else {
            debug!(scanned = summary.scanned, "No configs due for rotation");
        }

        Ok(summary)
    }

    #[instrument(skip(self, config, now), fields(proxy_id = config.id, vendor = %config.vendor))]
    async fn reset_config(&self, config: &ProxyConfig, now: DateTime<Utc>) -> Result<()> {
        debug!(
            elapsed = config.elapsed_since_reset(now),
            min_reset_interval = config.min_reset_interval,
            "Rotating upstream"
        );

        let provider = self.providers.get(config.vendor)?;
        let credential = provider.get_new_proxy(&config.api_key).await?;
        let target = UpstreamTarget::parse(&credential.descriptor, config.vendor)?;

        self.store
            .update(
                config.id,
                &ProxyConfigUpdate {
                    upstream: credential.descriptor.clone(),
                    min_reset_interval: None,
                    last_reset_at: now,
                },
            )
            .await?;

        self.manager
            .apply_rotated_credential(config.id, &credential.descriptor)
            .await?;

        info!(upstream = %target.address(), "Upstream rotated");
        Ok(())
    }
}

/// Handle for managing the auto-reset service
pub struct AutoResetHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl AutoResetHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
