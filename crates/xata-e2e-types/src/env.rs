//! Layered environment sources merged in priority order.
//!
//! The priority chain (later overrides earlier):
//! 1. `.env` style files, in the order they were added
//! 2. The process environment (optional)
//!
//! Files that do not exist are skipped. Loading never mutates the process
//! environment; values are only visible through [`EnvLayers::get`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::E2eError;

/// Maximum env file size in bytes.
const MAX_ENV_FILE_SIZE: u64 = 256 * 1024;

/// Where a variable's effective value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvSource {
    /// A `KEY=VALUE` file.
    File(PathBuf),
    /// The process environment.
    Process,
}

impl std::fmt::Display for EnvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvSource::File(p) => write!(f, "env file: {}", p.display()),
            EnvSource::Process => write!(f, "process environment"),
        }
    }
}

/// Merged view over env files and the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvLayers {
    values: HashMap<String, (String, EnvSource)>,
    loaded_files: Vec<PathBuf>,
}

impl EnvLayers {
    /// Create an empty set of layers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `files` in order, then overlay the process environment.
    pub fn load(files: &[PathBuf]) -> Result<Self, E2eError> {
        let mut layers = Self::new();
        for file in files {
            layers.add_file(file)?;
        }
        layers.add_process_env();
        Ok(layers)
    }

    /// Overlay one env file. A missing file is not an error.
    pub fn add_file(&mut self, path: &Path) -> Result<&mut Self, E2eError> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "env file not found, skipping");
                return Ok(self);
            }
            Err(e) => {
                return Err(E2eError::Config(format!(
                    "cannot stat {}: {e}",
                    path.display()
                )))
            }
        };
        if meta.len() > MAX_ENV_FILE_SIZE {
            return Err(E2eError::Config(format!(
                "{} is larger than {MAX_ENV_FILE_SIZE} bytes",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| E2eError::Config(format!("cannot read {}: {e}", path.display())))?;

        let source = EnvSource::File(path.to_path_buf());
        for (key, value) in parse_env_file(&contents) {
            self.values.insert(key, (value, source.clone()));
        }
        self.loaded_files.push(path.to_path_buf());
        debug!(path = %path.display(), "loaded env file");
        Ok(self)
    }

    /// Overlay a single variable, as if it came from the process environment.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values
            .insert(key.into(), (value.into(), EnvSource::Process));
        self
    }

    /// Overlay every variable of the current process environment.
    pub fn add_process_env(&mut self) -> &mut Self {
        for (key, value) in std::env::vars() {
            self.values.insert(key, (value, EnvSource::Process));
        }
        self
    }

    /// The effective value of `key`, if any layer defines it.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|(v, _)| v.as_str())
    }

    /// The layer that determined the value of `key`.
    pub fn source(&self, key: &str) -> Option<&EnvSource> {
        self.values.get(key).map(|(_, s)| s)
    }

    /// Env files that existed and were loaded, in load order.
    pub fn loaded_files(&self) -> &[PathBuf] {
        &self.loaded_files
    }
}

/// Parse `KEY=VALUE` lines.
///
/// Blank lines and `#` comments are skipped, an `export ` prefix is
/// accepted, and one pair of matching surrounding quotes is removed.
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        pairs.push((key.to_string(), unquote(value.trim()).to_string()));
    }
    pairs
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
