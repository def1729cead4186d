//! In-process fakes shared by unit tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::{
    ApiServerConfig, Config, DatabaseConfig, LogConfig, ProxyInstanceConfig, RotationConfig,
};
use crate::error::{FleetError, Result};
use crate::models::{NewProxyConfig, ProxyConfig, ProxyConfigUpdate, VendorCredential, VendorKind};
use crate::providers::RotationProvider;
use crate::repository::ConfigStore;

pub const TEST_USER: &str = "admin";
pub const TEST_PASSWORD: &str = "s3cret";

/// Instance settings on loopback with short timeouts
pub fn instance_settings(port_base: u16) -> ProxyInstanceConfig {
    ProxyInstanceConfig {
        server_ip: "127.0.0.1".to_string(),
        bind_host: "127.0.0.1".to_string(),
        port_base,
        username: TEST_USER.to_string(),
        password: TEST_PASSWORD.to_string(),
        connect_timeout: 2,
        request_timeout: 5,
        drain_timeout: 1,
    }
}

/// Full configuration around [`instance_settings`]
pub fn test_config(port_base: u16, auth_enabled: bool) -> Config {
    Config {
        proxy: instance_settings(port_base),
        api: ApiServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
            auth_enabled,
        },
        database: DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "proxyfleet".to_string(),
            password: "proxyfleet".to_string(),
            name: "proxyfleet".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        rotation: RotationConfig {
            auto_reset_interval: 10,
            provider_timeout: 5,
        },
        log: LogConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// `Proxy-Authorization` value for the test credentials
pub fn proxy_authorization() -> String {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", TEST_USER, TEST_PASSWORD))
    )
}

/// Config store kept in memory; ids start at 1 and are never reused
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<i32, ProxyConfig>>,
    next_id: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a store error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn get(&self, id: i32) -> Option<ProxyConfig> {
        self.rows.lock().get(&id).cloned()
    }

    /// Overwrite a row directly, bypassing the trait
    pub fn put(&self, config: ProxyConfig) {
        self.rows.lock().insert(config.id, config);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(FleetError::Store("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn insert(&self, config: &NewProxyConfig) -> Result<ProxyConfig> {
        self.check()?;
        let mut rows = self.rows.lock();
        if rows.values().any(|row| row.api_key == config.api_key) {
            return Err(FleetError::Store(format!(
                "api key '{}' already exists",
                config.api_key
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i32 + 1;
        let row = ProxyConfig {
            id,
            upstream: config.upstream.clone(),
            api_key: config.api_key.clone(),
            vendor: config.vendor,
            min_reset_interval: config.min_reset_interval,
            last_reset_at: config.last_reset_at,
            created_at: Utc::now(),
        };
        rows.insert(id, row.clone());
        Ok(row)
    }

    async fn update(&self, id: i32, update: &ProxyConfigUpdate) -> Result<ProxyConfig> {
        self.check()?;
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&id)
            .ok_or(FleetError::ProxyConfigNotFound { id })?;

        row.upstream = update.upstream.clone();
        if let Some(interval) = update.min_reset_interval {
            row.min_reset_interval = interval;
        }
        row.last_reset_at = update.last_reset_at;
        Ok(row.clone())
    }

    async fn delete(&self, id: i32) -> Result<bool> {
        self.check()?;
        Ok(self.rows.lock().remove(&id).is_some())
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<ProxyConfig>> {
        self.check()?;
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<ProxyConfig>> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .values()
            .find(|row| row.api_key == api_key)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<ProxyConfig>> {
        self.check()?;
        Ok(self.rows.lock().values().cloned().collect())
    }
}

/// Rotation provider answering from scripted descriptors
pub struct FakeProvider {
    vendor: VendorKind,
    current: Mutex<Option<String>>,
    next_reset_after: Mutex<Option<i64>>,
    new_descriptors: Mutex<VecDeque<String>>,
    fail_new: AtomicBool,
    new_delay: Mutex<Duration>,
    pub current_calls: AtomicUsize,
    pub new_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(vendor: VendorKind) -> Arc<Self> {
        Arc::new(Self {
            vendor,
            current: Mutex::new(None),
            next_reset_after: Mutex::new(None),
            new_descriptors: Mutex::new(VecDeque::new()),
            fail_new: AtomicBool::new(false),
            new_delay: Mutex::new(Duration::ZERO),
            current_calls: AtomicUsize::new(0),
            new_calls: AtomicUsize::new(0),
        })
    }

    /// Descriptor returned by the non-forcing call; `None` means no assignment
    pub fn set_current(&self, descriptor: Option<&str>, next_reset_after: Option<i64>) {
        *self.current.lock() = descriptor.map(str::to_string);
        *self.next_reset_after.lock() = next_reset_after;
    }

    /// Queue a descriptor for the next forcing call
    pub fn push_new(&self, descriptor: &str) {
        self.new_descriptors.lock().push_back(descriptor.to_string());
    }

    pub fn set_fail_new(&self, fail: bool) {
        self.fail_new.store(fail, Ordering::SeqCst);
    }

    /// Hold every forcing call open for `delay` before answering
    pub fn set_new_delay(&self, delay: Duration) {
        *self.new_delay.lock() = delay;
    }

    pub fn current_calls(&self) -> usize {
        self.current_calls.load(Ordering::SeqCst)
    }

    pub fn new_calls(&self) -> usize {
        self.new_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RotationProvider for FakeProvider {
    async fn get_current_proxy(&self, _api_key: &str) -> Result<VendorCredential> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        let descriptor = self.current.lock().clone();
        match descriptor {
            Some(descriptor) => Ok(VendorCredential {
                descriptor,
                vendor: self.vendor,
                next_reset_after: *self.next_reset_after.lock(),
                expires_at: None,
            }),
            None => Err(FleetError::NoCurrentProxy {
                vendor: self.vendor,
            }),
        }
    }

    async fn get_new_proxy(&self, _api_key: &str) -> Result<VendorCredential> {
        self.new_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.new_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_new.load(Ordering::SeqCst) {
            return Err(FleetError::Provider("vendor unavailable".into()));
        }

        let descriptor = self
            .new_descriptors
            .lock()
            .pop_front()
            .ok_or_else(|| FleetError::Provider("no scripted descriptor".into()))?;

        Ok(VendorCredential {
            descriptor,
            vendor: self.vendor,
            next_reset_after: None,
            expires_at: None,
        })
    }

    fn vendor(&self) -> VendorKind {
        self.vendor
    }
}

/// Loopback stand-in for a vendor HTTP proxy
///
/// Accepts CONNECT and answers 200, then echoes tunnel bytes prefixed with
/// its tag. Plain requests get a 200 whose body is the tag and request line.
pub struct FakeUpstream {
    pub port: u16,
    heads: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeUpstream {
    pub async fn start(tag: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let heads = Arc::new(Mutex::new(Vec::new()));

        let recorded = heads.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve_fake_upstream(stream, tag, recorded).await;
                });
            }
        });

        Self { port, heads, task }
    }

    /// Request heads received so far
    pub fn heads(&self) -> Vec<String> {
        self.heads.lock().clone()
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_fake_upstream(
    mut stream: TcpStream,
    tag: &'static str,
    heads: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let head = read_head(&mut stream).await?;
    let request_line = head.lines().next().unwrap_or_default().to_string();
    heads.lock().push(head);

    if request_line.starts_with("CONNECT ") {
        stream
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await?;

        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            stream.write_all(tag.as_bytes()).await?;
            stream.write_all(&buf[..n]).await?;
        }
    }

    let body = format!("{} {}", tag, request_line);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Read a request or response head up to the blank line
pub async fn read_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await?);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Open a CONNECT tunnel through a local instance, returning the status line
pub async fn open_tunnel(
    port: u16,
    authorization: Option<&str>,
) -> std::io::Result<(TcpStream, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let mut request = "CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n".to_string();
    if let Some(value) = authorization {
        request.push_str(&format!("Proxy-Authorization: {}\r\n", value));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    let head = read_head(&mut stream).await?;
    let status = head.lines().next().unwrap_or_default().to_string();
    Ok((stream, status))
}

/// Send `payload` through an open tunnel and read the echoed reply
pub async fn echo(stream: &mut TcpStream, payload: &str, tag: &str) -> std::io::Result<String> {
    stream.write_all(payload.as_bytes()).await?;
    let mut buf = vec![0u8; tag.len() + payload.len()];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
