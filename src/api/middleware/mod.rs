//! API middleware

mod basic_auth;

pub use basic_auth::{AdminUser, AuthError};
