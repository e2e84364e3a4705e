//! Shared types for the xata-e2e workspace: the low-level error type,
//! layered env-file loading and the per-run [`TestConfig`].

pub mod config;
pub mod env;
pub mod error;

pub use config::{TestConfig, API_KEY_VAR, BINARY_VAR};
pub use env::{EnvLayers, EnvSource};
pub use error::E2eError;
