//! Background services

pub mod auto_reset;

pub use auto_reset::{AutoResetConfig, AutoResetHandle, AutoResetService, ResetSummary};
