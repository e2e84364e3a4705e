//! End-to-end tests for the xata CLI, driven through a pseudo-terminal.
//!
//! This crate re-exports the harness for the suites under `tests/`. See
//! [`xata_e2e_harness`] for the console and scenario APIs.

pub use xata_e2e_harness::*;
pub use xata_e2e_types::{EnvLayers, TestConfig};

/// Load the test configuration from `../.env`, `../.env.local` and the
/// process environment.
pub fn test_config() -> Result<TestConfig, HarnessError> {
    Ok(TestConfig::from_env()?)
}
