//! Test run configuration derived from layered environment sources.

use std::path::PathBuf;

use crate::env::EnvLayers;
use crate::E2eError;

/// Variable holding the API key used by authenticated scenarios.
pub const API_KEY_VAR: &str = "TEST_API_KEY";

/// Variable that overrides the path of the binary under test.
pub const BINARY_VAR: &str = "XATA_BINARY";

/// Where the binary under test lives when [`BINARY_VAR`] is unset.
pub const DEFAULT_BINARY: &str = "../xata";

/// Env files read by default, lowest priority first.
pub const DEFAULT_ENV_FILES: [&str; 2] = ["../.env", "../.env.local"];

/// Credentials and paths for one test run. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConfig {
    /// API key accepted by the hosted service.
    pub api_key: String,
    /// The CLI binary driven by the scenarios.
    pub binary: PathBuf,
}

impl TestConfig {
    /// Build the configuration from already merged layers.
    ///
    /// A missing or empty [`API_KEY_VAR`] is an error.
    pub fn load(layers: &EnvLayers) -> Result<Self, E2eError> {
        let api_key = layers
            .get(API_KEY_VAR)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| E2eError::MissingEnv(API_KEY_VAR.to_string()))?
            .to_string();
        let binary = layers
            .get(BINARY_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY));
        Ok(Self { api_key, binary })
    }

    /// Load from [`DEFAULT_ENV_FILES`] and the process environment.
    pub fn from_env() -> Result<Self, E2eError> {
        let files: Vec<PathBuf> = DEFAULT_ENV_FILES.iter().map(PathBuf::from).collect();
        Self::load(&EnvLayers::load(&files)?)
    }
}
