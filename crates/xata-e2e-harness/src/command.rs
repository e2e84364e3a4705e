//! Launching the CLI under test inside a fresh console.
//!
//! [`XataCommand`] assembles
//! `<binary> [--configdir=<dir>] [--nocolor] <subcommand> [args...]`
//! and starts it on a new [`Console`], returning both halves. A
//! [`ConfigDir`] is the configuration directory shared by chained runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tracing::info;
use xata_e2e_pty::{ChildProcess, CommandSpec};
use xata_e2e_types::TestConfig;

use crate::console::{Console, ConsoleOptions};
use crate::error::HarnessError;

/// Prefix for temporary configuration directories.
const CONFIG_DIR_PREFIX: &str = "xata-config";

/// A temporary configuration directory, deleted on drop.
///
/// Pass the same `ConfigDir` to several runs to chain them over persisted
/// state, e.g. login followed by a status check.
#[derive(Debug)]
pub struct ConfigDir {
    dir: TempDir,
}

impl ConfigDir {
    /// Create an empty directory under the system temp dir.
    pub fn new() -> Result<Self, HarnessError> {
        let dir = tempfile::Builder::new()
            .prefix(CONFIG_DIR_PREFIX)
            .tempdir()
            .map_err(|e| HarnessError::Setup(format!("create config dir: {e}")))?;
        Ok(Self { dir })
    }

    /// Location of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The `--configdir=<dir>` argument.
    pub fn flag(&self) -> String {
        format!("--configdir={}", self.path().display())
    }
}

/// How to invoke the binary under test.
#[derive(Debug, Clone)]
pub struct XataCommand {
    binary: PathBuf,
    launcher_args: Vec<String>,
    no_color: bool,
    env: Vec<(String, String)>,
    console: ConsoleOptions,
    controlling_terminal: bool,
}

impl XataCommand {
    /// Run `binary` directly.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            launcher_args: Vec::new(),
            no_color: false,
            env: Vec::new(),
            console: ConsoleOptions::default(),
            controlling_terminal: false,
        }
    }

    /// Run the binary named by the test configuration.
    pub fn from_config(config: &TestConfig) -> Self {
        Self::new(&config.binary)
    }

    /// Run `script` through `interpreter`, e.g. `/bin/sh`.
    pub fn interpreted(interpreter: impl Into<PathBuf>, script: impl AsRef<Path>) -> Self {
        Self::new(interpreter).launcher_arg(script.as_ref().display().to_string())
    }

    /// Add an argument placed before the global flags.
    #[must_use]
    pub fn launcher_arg(mut self, arg: impl Into<String>) -> Self {
        self.launcher_args.push(arg.into());
        self
    }

    /// Pass `--nocolor` before the subcommand.
    #[must_use]
    pub fn no_color(mut self, enabled: bool) -> Self {
        self.no_color = enabled;
        self
    }

    /// Set an environment variable for every run.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Options for the console each run gets.
    #[must_use]
    pub fn console_options(mut self, opts: ConsoleOptions) -> Self {
        self.console = opts;
        self
    }

    /// Shortcut for the console's default expectation timeout.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.console.default_timeout = timeout;
        self
    }

    /// Make the console the child's controlling terminal.
    #[must_use]
    pub fn controlling_terminal(mut self, enabled: bool) -> Self {
        self.controlling_terminal = enabled;
        self
    }

    /// The binary being driven.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Build the full command line for `args`.
    pub fn spec<S: AsRef<str>>(&self, config_dir: Option<&Path>, args: &[S]) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.binary)
            .args(self.launcher_args.iter().cloned())
            .controlling_terminal(self.controlling_terminal);
        if let Some(dir) = config_dir {
            spec = spec.arg(format!("--configdir={}", dir.display()));
        }
        if self.no_color {
            spec = spec.arg("--nocolor");
        }
        spec = spec.args(args.iter().map(|a| a.as_ref().to_string()));
        for (key, value) in &self.env {
            spec = spec.env(key.clone(), value.clone());
        }
        spec
    }

    /// Start `args` against `config_dir` on a new console.
    pub fn start<S: AsRef<str>>(
        &self,
        config_dir: &ConfigDir,
        args: &[S],
    ) -> Result<(Console, ChildProcess), HarnessError> {
        self.start_spec(&self.spec(Some(config_dir.path()), args))
    }

    fn start_spec(&self, spec: &CommandSpec) -> Result<(Console, ChildProcess), HarnessError> {
        let mut console = Console::with_options(self.console.clone())?;
        let child = console.spawn(spec)?;
        info!(pid = child.pid(), args = ?spec.args, "started command under test");
        Ok((console, child))
    }
}
