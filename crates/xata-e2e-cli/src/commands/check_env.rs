use std::path::PathBuf;

use anyhow::{Context, Result};
use xata_e2e_types::{TestConfig, API_KEY_VAR, BINARY_VAR};

use super::load_layers;

/// Run the `xata-e2e check-env` command.
///
/// Reports where each setting came from without printing the key itself.
pub fn run(env_files: &[PathBuf]) -> Result<()> {
    let layers = load_layers(env_files)?;

    println!("Env files:");
    if layers.loaded_files().is_empty() {
        println!("  (none found)");
    }
    for file in layers.loaded_files() {
        println!("  {}", file.display());
    }

    let config = TestConfig::load(&layers).context("test configuration is incomplete")?;

    let key_source = layers
        .source(API_KEY_VAR)
        .map(ToString::to_string)
        .unwrap_or_default();
    println!("  {API_KEY_VAR}:  set ({} chars, from {key_source})", config.api_key.len());

    let binary_state = if config.binary.exists() { "OK" } else { "MISSING" };
    match layers.source(BINARY_VAR) {
        Some(source) => println!(
            "  {BINARY_VAR}:   {binary_state} ({}, from {source})",
            config.binary.display()
        ),
        None => println!("  {BINARY_VAR}:   {binary_state} ({}, default)", config.binary.display()),
    }
    Ok(())
}
