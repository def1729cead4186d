//! Client authentication for proxy instances
//!
//! Every instance checks the same static Basic credentials. Stopping an
//! instance closes its authenticator so connections still open on it stop
//! getting service.

use std::sync::atomic::{AtomicBool, Ordering};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use hyper::{Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::{FleetError, Result};

/// Proxy authentication handler
#[derive(Debug)]
pub struct ProxyAuth {
    username: String,
    password: String,
    closed: AtomicBool,
}

impl ProxyAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// Reject every further request
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Validate the Proxy-Authorization header
    pub fn validate<T>(&self, req: &Request<T>) -> Result<()> {
        if self.is_closed() {
            debug!("Rejecting request on a stopped instance");
            return Err(FleetError::AuthenticationFailed);
        }

        let auth_str = req
            .headers()
            .get(PROXY_AUTHORIZATION)
            .ok_or(FleetError::AuthenticationFailed)?
            .to_str()
            .map_err(|_| FleetError::AuthenticationFailed)?;

        let (user, pass) = decode_basic(auth_str).ok_or_else(|| {
            warn!("Malformed proxy credentials");
            FleetError::AuthenticationFailed
        })?;

        if user == self.username && pass == self.password {
            debug!("Proxy authentication successful for user: {}", user);
            Ok(())
        } else {
            warn!("Proxy authentication failed for user: {}", user);
            Err(FleetError::AuthenticationFailed)
        }
    }

    /// 407 Proxy Authentication Required response
    pub fn challenge_response() -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::PROXY_AUTHENTICATION_REQUIRED;
        response.headers_mut().insert(
            PROXY_AUTHENTICATE,
            hyper::header::HeaderValue::from_static("Basic realm=\"Proxy\""),
        );
        response
    }
}

/// Decode a `Basic <base64(user:pass)>` header value
pub fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, pass) = credentials.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request_with_auth(auth: Option<&str>) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().uri("http://example.com/");

        if let Some(auth_value) = auth {
            builder = builder.header(PROXY_AUTHORIZATION, auth_value);
        }

        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{}:{}", user, pass)))
    }

    #[test]
    fn test_auth_missing_header() {
        let auth = ProxyAuth::new("user", "pass");
        let req = create_request_with_auth(None);
        assert!(matches!(
            auth.validate(&req),
            Err(FleetError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_auth_valid_credentials() {
        let auth = ProxyAuth::new("user", "pass");
        let req = create_request_with_auth(Some(&basic("user", "pass")));
        assert!(auth.validate(&req).is_ok());
    }

    #[test]
    fn test_auth_invalid_credentials() {
        let auth = ProxyAuth::new("user", "pass");
        let req = create_request_with_auth(Some(&basic("wrong", "wrong")));
        assert!(auth.validate(&req).is_err());
    }

    #[test]
    fn test_auth_invalid_scheme() {
        let auth = ProxyAuth::new("user", "pass");
        let req = create_request_with_auth(Some("Bearer token123"));
        assert!(auth.validate(&req).is_err());
    }

    #[test]
    fn test_closed_auth_rejects_valid_credentials() {
        let auth = ProxyAuth::new("user", "pass");
        let req = create_request_with_auth(Some(&basic("user", "pass")));
        assert!(auth.validate(&req).is_ok());

        auth.close();
        assert!(auth.is_closed());
        assert!(auth.validate(&req).is_err());
    }

    #[test]
    fn test_password_may_contain_colon() {
        assert_eq!(
            decode_basic(&basic("user", "pa:ss")),
            Some(("user".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(decode_basic("Basic !!!"), None);
    }

    #[test]
    fn test_challenge_response() {
        let response = ProxyAuth::challenge_response();
        assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        assert_eq!(
            response.headers().get(PROXY_AUTHENTICATE).unwrap(),
            "Basic realm=\"Proxy\""
        );
    }
}
