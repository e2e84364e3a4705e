//! Error types shared across all xata-e2e crates.

/// Low-level errors raised by the PTY, process and configuration layers.
///
/// The harness crate classifies these into its scenario-level taxonomy;
/// see `HarnessError` there.
#[derive(Debug, thiserror::Error)]
pub enum E2eError {
    #[error("pseudo-terminal allocation failed: {0}")]
    PtyAlloc(String),

    #[error("pty i/o error: {0}")]
    PtyIo(String),

    #[error("failed to start child process: {0}")]
    Spawn(String),

    #[error("waiting on child process failed: {0}")]
    Wait(String),

    #[error("child process {pid} was already waited on")]
    AlreadyWaited { pid: u32 },

    #[error("child process {pid} still running after {timeout_ms}ms")]
    WaitTimeout { pid: u32, timeout_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("required environment variable {0} is not set")]
    MissingEnv(String),
}
