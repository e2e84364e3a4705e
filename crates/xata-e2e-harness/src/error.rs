//! Error taxonomy for consoles and scenarios.

use std::time::Duration;

use xata_e2e_types::E2eError;

/// Errors that can occur while driving a process through a console.
///
/// Every variant aborts only the enclosing scenario; resources are
/// released by the console's and child's drop handlers.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Pseudo-terminal allocation failed or required configuration is
    /// missing. Fatal for the whole run.
    #[error("setup error: {0}")]
    Setup(String),

    /// An expectation did not match before its deadline.
    #[error("timed out after {timeout:?} waiting for {expected}\nUnmatched output:\n{observed}\n{screen}")]
    ExpectationTimeout {
        /// The literal or pattern that was sought.
        expected: String,
        /// How long we waited.
        timeout: Duration,
        /// Output received since the previous match.
        observed: String,
        /// Bordered dump of the emulated screen.
        screen: String,
    },

    /// The console was closed before or during an operation.
    #[error("console closed during {operation}")]
    ConsoleClosed {
        /// The operation that was refused or interrupted.
        operation: String,
    },

    /// The pty hung up before the expectation matched.
    #[error("terminal output ended while waiting for {expected}\nUnmatched output:\n{observed}")]
    UnexpectedEof {
        /// The literal or pattern that was sought.
        expected: String,
        /// Output received since the previous match.
        observed: String,
    },

    /// The child failed to start, or was waited on incorrectly.
    #[error("process error: {0}")]
    Process(String),

    /// The child did not exit within the allotted time.
    #[error("process error: {0}")]
    WaitTimeout(String),

    /// The child was killed by a signal instead of exiting.
    #[error("child terminated by signal {signal}")]
    SignalTermination {
        /// The signal number.
        signal: i32,
    },

    /// An observed value did not match what the scenario expected.
    #[error("assertion failed: {message} (expected {expected}, got {actual})")]
    AssertionMismatch {
        /// What was being checked.
        message: String,
        /// The expected value.
        expected: String,
        /// The observed value.
        actual: String,
    },

    /// Writing to the terminal failed.
    #[error("send error: {0}")]
    Send(String),

    /// An invalid regex pattern was provided.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Captured output was expected to be JSON and was not.
    #[error("invalid JSON in captured output: {0}")]
    Json(#[from] serde_json::Error),

    /// A scenario suite file could not be read or is malformed.
    #[error("suite error: {0}")]
    Suite(String),
}

impl From<E2eError> for HarnessError {
    fn from(err: E2eError) -> Self {
        match err {
            E2eError::PtyAlloc(_) | E2eError::Config(_) | E2eError::MissingEnv(_) => {
                HarnessError::Setup(err.to_string())
            }
            E2eError::PtyIo(_) => HarnessError::Send(err.to_string()),
            E2eError::WaitTimeout { .. } => HarnessError::WaitTimeout(err.to_string()),
            E2eError::Spawn(_) | E2eError::Wait(_) | E2eError::AlreadyWaited { .. } => {
                HarnessError::Process(err.to_string())
            }
        }
    }
}
