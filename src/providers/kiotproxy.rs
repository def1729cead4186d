use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::RotationProvider;
use crate::error::{FleetError, Result};
use crate::models::{VendorCredential, VendorKind};

const DEFAULT_BASE_URL: &str = "https://api.kiotproxy.com/api/v1/proxies";

#[derive(Debug, Deserialize)]
struct KiotProxyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<KiotProxyData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiotProxyData {
    http: String,
    /// Seconds until the vendor allows the next rotation
    ttc: i64,
    /// Unix milliseconds
    #[serde(rename = "expirationAt")]
    expiration_at: i64,
}

/// Client for the kiotproxy API (unauthenticated upstreams)
pub struct KiotProxyClient {
    client: Client,
    base_url: String,
}

impl KiotProxyClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(&self, endpoint: &str, api_key: &str) -> Result<KiotProxyData> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, "Calling kiotproxy");

        let response = self
            .client
            .get(&url)
            .query(&[("key", api_key)])
            .send()
            .await?;
        let parsed = response.json::<KiotProxyResponse>().await.map_err(|e| {
            FleetError::Provider(format!("kiotproxy returned an unreadable response: {}", e))
        })?;

        take_data(parsed)
    }
}

#[async_trait]
impl RotationProvider for KiotProxyClient {
    async fn get_current_proxy(&self, api_key: &str) -> Result<VendorCredential> {
        let data = self.call("current", api_key).await?;
        Ok(current_credential(data))
    }

    async fn get_new_proxy(&self, api_key: &str) -> Result<VendorCredential> {
        let data = self.call("new", api_key).await?;
        Ok(VendorCredential {
            descriptor: data.http,
            vendor: VendorKind::KiotProxy,
            next_reset_after: None,
            expires_at: None,
        })
    }

    fn vendor(&self) -> VendorKind {
        VendorKind::KiotProxy
    }
}

fn take_data(response: KiotProxyResponse) -> Result<KiotProxyData> {
    if !response.success || response.code != 200 {
        return Err(FleetError::Provider(format!(
            "kiotproxy error code {}: {}",
            response.code, response.message
        )));
    }

    response
        .data
        .ok_or_else(|| FleetError::Provider("kiotproxy response has no data".into()))
}

fn current_credential(data: KiotProxyData) -> VendorCredential {
    VendorCredential {
        expires_at: DateTime::<Utc>::from_timestamp_millis(data.expiration_at),
        next_reset_after: Some(data.ttc),
        descriptor: data.http,
        vendor: VendorKind::KiotProxy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    fn response(value: Value) -> KiotProxyResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_current_credential() {
        let data = take_data(response(json!({
            "success": true,
            "code": 200,
            "message": "ok",
            "data": {"http": "1.2.3.4:8080", "ttc": 25, "expirationAt": 1767225600000i64}
        })))
        .unwrap();
        let credential = current_credential(data);

        assert_eq!(credential.descriptor, "1.2.3.4:8080");
        assert_eq!(credential.next_reset_after, Some(25));
        assert_eq!(credential.expires_at.unwrap().timestamp(), 1767225600);
    }

    #[test]
    fn test_success_requires_flag_and_code() {
        let err = take_data(response(json!({
            "success": true,
            "code": 401,
            "message": "invalid key"
        })))
        .err()
        .unwrap();
        assert!(matches!(err, FleetError::Provider(ref msg) if msg.contains("invalid key")));

        let err = take_data(response(json!({"success": false, "code": 200})))
            .err()
            .unwrap();
        assert!(matches!(err, FleetError::Provider(_)));
    }

    #[tokio::test]
    async fn test_client_against_local_api() {
        async fn current(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
            assert_eq!(params.get("key").map(String::as_str), Some("k1"));
            Json(json!({
                "success": true,
                "code": 200,
                "message": "ok",
                "data": {"http": "1.2.3.4:8080", "ttc": 5, "expirationAt": 0}
            }))
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/api/v1/proxies/current", get(current));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            KiotProxyClient::with_base_url(Client::new(), format!("http://{}/api/v1/proxies", addr));
        let credential = client.get_current_proxy("k1").await.unwrap();

        assert_eq!(credential.descriptor, "1.2.3.4:8080");
        assert_eq!(credential.next_reset_after, Some(5));
    }
}
