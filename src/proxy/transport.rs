//! Upstream transport for vendor HTTP proxies
//!
//! Parses vendor descriptors into an upstream target and dials through it.

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hyper::header::HeaderValue;
use hyper::Uri;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{FleetError, Result};
use crate::models::VendorKind;

/// Maximum size of an upstream CONNECT response head
const MAX_CONNECT_RESPONSE: usize = 8192;

/// Credentials presented to an authenticated upstream
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Canonical upstream proxy address parsed from a vendor descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl UpstreamTarget {
    /// Parse a descriptor in the format fixed by `vendor`
    ///
    /// tmproxy descriptors are `ip:port:username:password`, kiotproxy
    /// descriptors are `ip:port`. Anything else is a validation error.
    pub fn parse(descriptor: &str, vendor: VendorKind) -> Result<Self> {
        let fields: Vec<&str> = descriptor.trim().split(':').collect();
        if fields.len() != vendor.descriptor_fields() {
            return Err(FleetError::Validation(format!(
                "{} descriptor must have {} colon-separated fields, got {}",
                vendor,
                vendor.descriptor_fields(),
                fields.len()
            )));
        }

        let host = parse_host(fields[0])?;
        let port = parse_port(fields[1])?;

        let credentials = match vendor {
            VendorKind::TmProxy => {
                if fields[2].is_empty() {
                    return Err(FleetError::Validation(
                        "tmproxy descriptor has an empty username".into(),
                    ));
                }
                Some(Credentials {
                    username: fields[2].to_string(),
                    password: fields[3].to_string(),
                })
            }
            VendorKind::KiotProxy => None,
        };

        Ok(Self {
            host,
            port,
            credentials,
        })
    }

    /// `host:port` of the upstream proxy
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Canonical `http://[user:pass@]host:port` form
    pub fn url(&self) -> String {
        match &self.credentials {
            Some(c) => format!("http://{}:{}@{}:{}", c.username, c.password, self.host, self.port),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// `Proxy-Authorization` value for authenticated upstreams
    pub fn authorization(&self) -> Option<String> {
        self.credentials.as_ref().map(|c| {
            let encoded = BASE64.encode(format!("{}:{}", c.username, c.password));
            format!("Basic {}", encoded)
        })
    }
}

fn parse_host(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(FleetError::Validation("descriptor has an empty host".into()));
    }

    url::Host::parse(raw)
        .map(|host| host.to_string())
        .map_err(|e| FleetError::Validation(format!("invalid upstream host '{}': {}", raw, e)))
}

fn parse_port(raw: &str) -> Result<u16> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(FleetError::Validation(format!(
            "invalid upstream port '{}'",
            raw
        ))),
    }
}

/// Dials through one upstream proxy
///
/// Immutable once built; an instance swaps whole dialers when its upstream
/// rotates.
#[derive(Debug)]
pub struct UpstreamDialer {
    target: UpstreamTarget,
    authorization: Option<HeaderValue>,
    connect_timeout: Duration,
    version: u64,
}

impl UpstreamDialer {
    pub fn new(target: UpstreamTarget, connect_timeout: Duration, version: u64) -> Result<Self> {
        let authorization = target
            .authorization()
            .map(|value| {
                HeaderValue::from_str(&value).map_err(|_| {
                    FleetError::Validation("upstream credentials are not a valid header".into())
                })
            })
            .transpose()?;

        Ok(Self {
            target,
            authorization,
            connect_timeout,
            version,
        })
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// `Proxy-Authorization` header for the upstream, if it needs one
    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }

    /// Open a plain TCP connection to the upstream proxy
    pub async fn open(&self) -> Result<TcpStream> {
        let address = self.target.address();
        debug!("Connecting to upstream proxy at {}", address);

        tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| FleetError::Timeout)?
            .map_err(|e| {
                FleetError::UpstreamConnectionFailed(format!("TCP connect to {} failed: {}", address, e))
            })
    }

    /// Establish a CONNECT tunnel to `host:port` through the upstream proxy
    #[instrument(skip(self), fields(upstream = %self.target.address(), version = self.version))]
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        tokio::time::timeout(self.connect_timeout, self.connect_inner(host, port))
            .await
            .map_err(|_| FleetError::Timeout)?
    }

    async fn connect_inner(&self, host: &str, port: u16) -> Result<TcpStream> {
        let mut stream = self.open().await?;

        let request = self.build_connect_request(host, port);
        stream.write_all(&request).await.map_err(|e| {
            FleetError::UpstreamConnectionFailed(format!("Failed to send CONNECT: {}", e))
        })?;

        let head = read_response_head(&mut stream).await?;
        let status_line = head.lines().next().unwrap_or_default();
        if !is_success_status(status_line) {
            return Err(FleetError::UpstreamConnectionFailed(format!(
                "CONNECT failed: {}",
                status_line
            )));
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(stream)
    }

    fn build_connect_request(&self, host: &str, port: u16) -> Vec<u8> {
        let mut request =
            format!("CONNECT {}:{} HTTP/1.1\r\nHost: {}:{}\r\n", host, port, host, port)
                .into_bytes();

        if let Some(value) = &self.authorization {
            request.extend_from_slice(b"Proxy-Authorization: ");
            request.extend_from_slice(value.as_bytes());
            request.extend_from_slice(b"\r\n");
        }

        request.extend_from_slice(b"\r\n");
        request
    }
}

/// Read up to and including the blank line ending a response head
///
/// Reads byte by byte so no tunnel payload is consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::with_capacity(256);
    loop {
        let byte = stream.read_u8().await.map_err(|e| {
            FleetError::UpstreamConnectionFailed(format!("Failed to read CONNECT response: {}", e))
        })?;
        head.push(byte);

        if head.ends_with(b"\r\n\r\n") {
            return Ok(String::from_utf8_lossy(&head).into_owned());
        }
        if head.len() >= MAX_CONNECT_RESPONSE {
            return Err(FleetError::UpstreamConnectionFailed(
                "CONNECT response head too large".into(),
            ));
        }
    }
}

fn is_success_status(status_line: &str) -> bool {
    let mut parts = status_line.split_whitespace();
    matches!(
        (parts.next(), parts.next()),
        (Some("HTTP/1.1") | Some("HTTP/1.0"), Some("200"))
    )
}

/// Parse host and port from an absolute-form URI
pub fn parse_target(uri: &Uri) -> Result<(String, u16)> {
    let host = uri
        .host()
        .ok_or_else(|| FleetError::Validation("Missing host in URI".to_string()))?
        .to_string();

    let port = uri.port_u16().unwrap_or_else(|| match uri.scheme_str() {
        Some("https") => 443,
        _ => 80,
    });

    Ok((host, port))
}

/// Parse host and port from a CONNECT authority
pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| FleetError::Validation(format!("Invalid port in '{}'", authority)))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(FleetError::Validation(format!(
            "Missing host in '{}'",
            authority
        ))),
        None if !authority.is_empty() => Ok((authority.to_string(), 443)),
        None => Err(FleetError::Validation("Empty CONNECT authority".into())),
    }
}
