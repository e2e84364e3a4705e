//! Command implementations for the `xata-e2e` binary.

pub mod check_env;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use xata_e2e_types::config::DEFAULT_ENV_FILES;
use xata_e2e_types::EnvLayers;

/// Merge `env_files` (or the default files) with the process environment.
pub fn load_layers(env_files: &[PathBuf]) -> Result<EnvLayers> {
    let files: Vec<PathBuf> = if env_files.is_empty() {
        DEFAULT_ENV_FILES.iter().map(PathBuf::from).collect()
    } else {
        env_files.to_vec()
    };
    EnvLayers::load(&files).context("failed to load env files")
}
