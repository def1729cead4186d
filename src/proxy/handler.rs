//! Proxy request handler
//!
//! Authenticates clients and forwards their requests through the upstream
//! dialer the connection was accepted with.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HOST, PROXY_AUTHORIZATION};
use hyper::{Method, Request, Response, StatusCode};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{FleetError, Result};
use crate::proxy::middleware::ProxyAuth;
use crate::proxy::transport::{parse_authority, parse_target, UpstreamDialer};
use crate::proxy::tunnel::PendingTunnel;

/// Handler for the requests of one client connection
pub struct ProxyHandler {
    auth: Arc<ProxyAuth>,
    dialer: Arc<UpstreamDialer>,
    request_timeout: Duration,
    pending: Mutex<Option<PendingTunnel>>,
}

impl ProxyHandler {
    pub fn new(auth: Arc<ProxyAuth>, dialer: Arc<UpstreamDialer>, request_timeout: Duration) -> Self {
        Self {
            auth,
            dialer,
            request_timeout,
            pending: Mutex::new(None),
        }
    }

    /// Tunnel accepted on this connection, to run once the connection upgrades
    pub fn take_tunnel(&self) -> Option<PendingTunnel> {
        self.pending.lock().take()
    }

    /// Handle an incoming proxy request
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri(), upstream_version = self.dialer.version()))]
    pub async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if self.auth.validate(&req).is_err() {
            return ProxyAuth::challenge_response();
        }

        let result = if req.method() == Method::CONNECT {
            self.handle_connect(req).await
        } else {
            self.handle_http(req).await
        };

        result.unwrap_or_else(|e| {
            warn!("Request failed: {}", e);
            error_response(&e)
        })
    }

    /// Handle HTTP CONNECT request (HTTPS tunneling)
    async fn handle_connect(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let authority = req
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| req.uri().to_string());

        let (target_host, target_port) = parse_authority(&authority)?;
        debug!("CONNECT request to {}:{}", target_host, target_port);

        // Upstream tunnel must exist before the client sees 200
        let upstream = self.dialer.connect(&target_host, target_port).await?;

        let on_upgrade = hyper::upgrade::on(req);
        *self.pending.lock() = Some(PendingTunnel::new(on_upgrade, upstream, authority));

        Ok(Response::new(Full::new(Bytes::new())))
    }

    /// Handle regular HTTP request
    async fn handle_http(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let (target_host, target_port) = parse_target(req.uri())?;
        debug!("Forwarding request to {}:{}", target_host, target_port);

        let (parts, body) = req.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| FleetError::Validation(format!("Failed to read body: {}", e)))?
            .to_bytes();

        tokio::time::timeout(self.request_timeout, self.forward_request(parts, body_bytes))
            .await
            .map_err(|_| FleetError::Timeout)?
    }

    /// Forward an absolute-form request to the upstream proxy
    async fn forward_request(
        &self,
        parts: http::request::Parts,
        body: Bytes,
    ) -> Result<Response<Full<Bytes>>> {
        let stream = self.dialer.open().await?;

        let mut builder = Request::builder()
            .method(parts.method.clone())
            .uri(parts.uri.clone());

        for (name, value) in &parts.headers {
            if !is_hop_by_hop_header(name.as_str()) {
                builder = builder.header(name, value);
            }
        }

        if !parts.headers.contains_key(HOST) {
            if let Some(authority) = parts.uri.authority() {
                builder = builder.header(HOST, authority.as_str());
            }
        }

        if let Some(authorization) = self.dialer.authorization() {
            builder = builder.header(PROXY_AUTHORIZATION, authorization.clone());
        }

        let request = builder
            .body(Full::new(body))
            .map_err(|e| FleetError::Validation(format!("Failed to build request: {}", e)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
            .title_case_headers(true)
            .handshake(io)
            .await
            .map_err(|e| FleetError::UpstreamConnectionFailed(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Upstream connection ended: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| FleetError::UpstreamConnectionFailed(format!("Request failed: {}", e)))?;

        let (mut parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| {
                FleetError::UpstreamConnectionFailed(format!("Failed to read response: {}", e))
            })?
            .to_bytes();

        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Full::new(body_bytes)))
    }
}

/// Map a request failure to the status the client sees
pub fn error_response(err: &FleetError) -> Response<Full<Bytes>> {
    let status = match err {
        FleetError::Validation(_) => StatusCode::BAD_REQUEST,
        FleetError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        FleetError::AuthenticationFailed => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        _ => StatusCode::BAD_GATEWAY,
    };

    let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let names: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();

    for name in names {
        headers.remove(name);
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
