//! Forwarding engine for proxy instances
//!
//! This module provides:
//! - Basic client authentication against static credentials
//! - CONNECT tunnels through the upstream proxy
//! - Absolute-URI HTTP forwarding through the upstream proxy
//! - Hot-swappable upstream dialers

pub mod handler;
pub mod middleware;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use handler::ProxyHandler;
pub use middleware::ProxyAuth;
pub use server::ForwardingServer;
pub use transport::{UpstreamDialer, UpstreamTarget};
pub use tunnel::TunnelHandler;
