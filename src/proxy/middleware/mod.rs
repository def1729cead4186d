//! Proxy middleware for client authentication

mod auth;

pub use auth::{decode_basic, ProxyAuth};
