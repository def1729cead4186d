use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RotationProvider;
use crate::error::{FleetError, Result};
use crate::models::{VendorCredential, VendorKind};

const DEFAULT_BASE_URL: &str = "https://tmproxy.com/api/proxy";

/// Response code for "no proxy assigned yet"
const CODE_NO_CURRENT_PROXY: i64 = 27;

/// Format of `expired_at`, e.g. `23:59:59 31/12/2025`
const EXPIRY_FORMAT: &str = "%H:%M:%S %d/%m/%Y";

#[derive(Debug, Serialize)]
struct TmProxyRequest<'a> {
    api_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_location: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_isp: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct TmProxyResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<TmProxyData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TmProxyData {
    https: String,
    username: String,
    password: String,
    next_request: i64,
    expired_at: String,
}

/// Client for the tmproxy API (authenticated upstreams)
pub struct TmProxyClient {
    client: Client,
    base_url: String,
}

impl TmProxyClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(&self, endpoint: &str, body: &TmProxyRequest<'_>) -> Result<TmProxyResponse> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, "Calling tmproxy");

        let response = self.client.post(&url).json(body).send().await?;
        let parsed = response.json::<TmProxyResponse>().await.map_err(|e| {
            FleetError::Provider(format!("tmproxy returned an unreadable response: {}", e))
        })?;

        Ok(parsed)
    }
}

#[async_trait]
impl RotationProvider for TmProxyClient {
    async fn get_current_proxy(&self, api_key: &str) -> Result<VendorCredential> {
        let body = TmProxyRequest {
            api_key,
            id_location: None,
            id_isp: None,
        };
        let response = self.call("get-current-proxy", &body).await?;
        parse_current(response)
    }

    async fn get_new_proxy(&self, api_key: &str) -> Result<VendorCredential> {
        let body = TmProxyRequest {
            api_key,
            id_location: Some(1),
            id_isp: Some(1),
        };
        let response = self.call("get-new-proxy", &body).await?;
        parse_new(response)
    }

    fn vendor(&self) -> VendorKind {
        VendorKind::TmProxy
    }
}

fn check_code(response: &TmProxyResponse) -> Result<()> {
    match response.code {
        0 => Ok(()),
        CODE_NO_CURRENT_PROXY => Err(FleetError::NoCurrentProxy {
            vendor: VendorKind::TmProxy,
        }),
        code => Err(FleetError::Provider(format!(
            "tmproxy error code {}: {}",
            code, response.message
        ))),
    }
}

fn take_data(response: TmProxyResponse) -> Result<TmProxyData> {
    check_code(&response)?;
    response
        .data
        .ok_or_else(|| FleetError::Provider("tmproxy response has no data".into()))
}

fn descriptor(data: &TmProxyData) -> String {
    format!("{}:{}:{}", data.https, data.username, data.password)
}

fn parse_current(response: TmProxyResponse) -> Result<VendorCredential> {
    let data = take_data(response)?;
    let expires_at = parse_expiry(&data.expired_at)?;

    Ok(VendorCredential {
        descriptor: descriptor(&data),
        vendor: VendorKind::TmProxy,
        next_reset_after: Some(data.next_request),
        expires_at: Some(expires_at),
    })
}

fn parse_new(response: TmProxyResponse) -> Result<VendorCredential> {
    let data = take_data(response)?;

    Ok(VendorCredential {
        descriptor: descriptor(&data),
        vendor: VendorKind::TmProxy,
        next_reset_after: None,
        expires_at: None,
    })
}

fn parse_expiry(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), EXPIRY_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|e| FleetError::Provider(format!("invalid tmproxy expiry '{}': {}", value, e)))
}
