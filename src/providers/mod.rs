//! Rotating-IP vendor clients
//!
//! Each vendor hands out upstream proxy credentials for an API key. The
//! non-forcing call returns the current assignment, the forcing call rotates
//! the vendor-side IP.

mod kiotproxy;
mod tmproxy;

pub use kiotproxy::KiotProxyClient;
pub use tmproxy::TmProxyClient;

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FleetError, Result};
use crate::models::{VendorCredential, VendorKind};

/// Vendor API returning upstream credentials
#[async_trait]
pub trait RotationProvider: Send + Sync {
    /// Current assignment for `api_key`; never forces a rotation
    ///
    /// Returns `FleetError::NoCurrentProxy` when the vendor has nothing
    /// assigned yet.
    async fn get_current_proxy(&self, api_key: &str) -> Result<VendorCredential>;

    /// Force the vendor to rotate and return the new assignment
    async fn get_new_proxy(&self, api_key: &str) -> Result<VendorCredential>;

    fn vendor(&self) -> VendorKind;
}

/// Lookup of rotation providers by vendor
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<VendorKind, Arc<dyn RotationProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a client for every supported vendor sharing one HTTP client
    pub fn with_default_vendors(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Provider(format!("failed to build HTTP client: {}", e)))?;

        let mut registry = Self::new();
        registry.register(Arc::new(TmProxyClient::new(client.clone())));
        registry.register(Arc::new(KiotProxyClient::new(client)));
        Ok(registry)
    }

    /// Register a provider under its own vendor, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn RotationProvider>) {
        self.providers.insert(provider.vendor(), provider);
    }

    pub fn get(&self, vendor: VendorKind) -> Result<Arc<dyn RotationProvider>> {
        self.providers.get(&vendor).cloned().ok_or_else(|| {
            FleetError::Validation(format!("no rotation provider registered for {}", vendor))
        })
    }

}
