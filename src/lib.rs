//! Proxyfleet - per-port forward proxies over rotating vendor IPs
//!
//! Every stored proxy config gets its own authenticated HTTP forward proxy
//! on `PROXY_PORT_BASE + id`, chained to an upstream credential leased from
//! a rotating-IP vendor.
//!
//! ## Features
//!
//! - HTTP and CONNECT forwarding through authenticated or open upstreams
//! - Hot-swapping an instance's upstream without dropping open tunnels
//! - Forced rotation once a config's minimum reset interval has elapsed
//! - Admin API for upserting, listing, deleting and exporting configs
//! - PostgreSQL persistence

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod manager;
pub mod models;
pub mod providers;
pub mod proxy;
pub mod repository;
pub mod services;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use database::Database;
pub use error::{FleetError, Result};
pub use manager::Manager;
