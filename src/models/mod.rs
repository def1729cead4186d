pub mod proxy_config;

pub use proxy_config::*;
