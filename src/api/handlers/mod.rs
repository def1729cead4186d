//! API request handlers

pub mod export;
pub mod health;
pub mod proxy;
