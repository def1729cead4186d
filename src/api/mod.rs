//! Administrative HTTP API
//!
//! Upsert, delete, list and export proxy configs.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
