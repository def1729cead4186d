use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Rotating-IP vendor behind a proxy config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorKind {
    /// Authenticated upstream, descriptor `ip:port:username:password`
    TmProxy,
    /// Unauthenticated upstream, descriptor `ip:port`
    KiotProxy,
}

impl VendorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorKind::TmProxy => "tmproxy",
            VendorKind::KiotProxy => "kiotproxy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let name = s.trim().to_lowercase();
        Self::all().into_iter().find(|vendor| vendor.as_str() == name)
    }

    /// Parse a vendor name, rejecting unknown names as a validation error
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            FleetError::Validation(format!(
                "vendor must be 'tmproxy' or 'kiotproxy', got '{}'",
                s
            ))
        })
    }

    /// Number of colon-separated fields in this vendor's descriptor
    pub fn descriptor_fields(&self) -> usize {
        match self {
            VendorKind::TmProxy => 4,
            VendorKind::KiotProxy => 2,
        }
    }

    pub fn all() -> [VendorKind; 2] {
        [VendorKind::TmProxy, VendorKind::KiotProxy]
    }
}

impl std::fmt::Display for VendorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted proxy config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub id: i32,
    /// Vendor-specific upstream descriptor
    pub upstream: String,
    pub api_key: String,
    pub vendor: VendorKind,
    /// Minimum seconds between forced rotations
    pub min_reset_interval: i32,
    pub last_reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ProxyConfig {
    /// Seconds elapsed since the last rotation, as seen at `now`
    pub fn elapsed_since_reset(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_reset_at).num_seconds()
    }

    /// Whether the config is due for a forced rotation at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_since_reset(now) >= i64::from(self.min_reset_interval)
    }
}

/// Insert payload for a new proxy config
#[derive(Debug, Clone)]
pub struct NewProxyConfig {
    pub upstream: String,
    pub api_key: String,
    pub vendor: VendorKind,
    pub min_reset_interval: i32,
    pub last_reset_at: DateTime<Utc>,
}

/// Update payload for an existing proxy config
#[derive(Debug, Clone)]
pub struct ProxyConfigUpdate {
    pub upstream: String,
    /// `None` keeps the stored interval
    pub min_reset_interval: Option<i32>,
    pub last_reset_at: DateTime<Utc>,
}

/// Credential handed out by a rotation provider
#[derive(Debug, Clone, PartialEq)]
pub struct VendorCredential {
    pub descriptor: String,
    pub vendor: VendorKind,
    /// Seconds until the vendor allows the next rotation; unknown on the forcing path
    pub next_reset_after: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request body for upserting a proxy config
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertProxyRequest {
    pub api_key: String,
    #[serde(alias = "service_type")]
    pub vendor: String,
    #[serde(alias = "min_time_reset")]
    pub min_reset_interval: i32,
}

/// Proxy config together with the port it is served on
#[derive(Debug, Clone, Serialize)]
pub struct ProxyConfigResponse {
    #[serde(flatten)]
    pub config: ProxyConfig,
    pub port: Option<u16>,
}

impl ProxyConfigResponse {
    pub fn new(config: ProxyConfig, port_base: u16) -> Self {
        let port = port_for(port_base, config.id).ok();
        Self { config, port }
    }
}

/// Port an instance for `id` listens on
pub fn port_for(port_base: u16, id: i32) -> Result<u16> {
    u16::try_from(id)
        .ok()
        .and_then(|id| port_base.checked_add(id))
        .ok_or_else(|| {
            FleetError::Instance(format!(
                "proxy id {} has no port above base {}",
                id, port_base
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config(min_reset_interval: i32, last_reset_at: DateTime<Utc>) -> ProxyConfig {
        ProxyConfig {
            id: 1,
            upstream: "1.2.3.4:8080".to_string(),
            api_key: "k1".to_string(),
            vendor: VendorKind::KiotProxy,
            min_reset_interval,
            last_reset_at,
            created_at: last_reset_at,
        }
    }

    #[test]
    fn test_vendor_kind_parsing() {
        assert_eq!(VendorKind::from_str("TMPROXY"), Some(VendorKind::TmProxy));
        assert_eq!(VendorKind::from_str(" kiotproxy "), Some(VendorKind::KiotProxy));
        assert_eq!(VendorKind::from_str("socks5"), None);
        assert!(matches!(
            VendorKind::parse("unknown"),
            Err(FleetError::Validation(_))
        ));
        assert_eq!(VendorKind::KiotProxy.to_string(), "kiotproxy");
    }

    #[test]
    fn test_vendor_kind_serde_is_lowercase() {
        let json = serde_json::to_string(&VendorKind::TmProxy).unwrap();
        assert_eq!(json, "\"tmproxy\"");
        let parsed: VendorKind = serde_json::from_str("\"kiotproxy\"").unwrap();
        assert_eq!(parsed, VendorKind::KiotProxy);
    }

    #[test]
    fn test_is_due_threshold() {
        let now = Utc::now();
        let cfg = config(30, now - Duration::seconds(29));
        assert!(!cfg.is_due(now));

        let cfg = config(30, now - Duration::seconds(30));
        assert!(cfg.is_due(now));

        let cfg = config(30, now - Duration::seconds(31));
        assert!(cfg.is_due(now));
    }

    #[test]
    fn test_port_for() {
        assert_eq!(port_for(10000, 1).unwrap(), 10001);
        assert_eq!(port_for(10000, 55535).unwrap(), 65535);
        assert!(matches!(port_for(10000, 55536), Err(FleetError::Instance(_))));
        assert!(port_for(10000, -1).is_err());
    }

    #[test]
    fn test_response_flattens_config_with_port() {
        let cfg = config(30, Utc::now());
        let value = serde_json::to_value(ProxyConfigResponse::new(cfg, 10000)).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["port"], 10001);
        assert_eq!(value["vendor"], "kiotproxy");
    }

    #[test]
    fn test_upsert_request_accepts_legacy_field_names() {
        let req: UpsertProxyRequest = serde_json::from_value(serde_json::json!({
            "api_key": "k1",
            "service_type": "tmproxy",
            "min_time_reset": 60,
        }))
        .unwrap();
        assert_eq!(req.vendor, "tmproxy");
        assert_eq!(req.min_reset_interval, 60);

        let req: UpsertProxyRequest = serde_json::from_value(serde_json::json!({
            "api_key": "k1",
            "vendor": "kiotproxy",
            "min_reset_interval": 30,
        }))
        .unwrap();
        assert_eq!(req.vendor, "kiotproxy");
    }
}
