//! Pseudo-terminal plumbing for interactive process tests.
//!
//! # Architecture
//!
//! - [`pty::PtyPair`]: both ends of an OS pseudo-terminal, master non-blocking
//! - [`pty::read`] / [`pty::poll_readable`]: raw master-side reads
//! - [`process::ChildProcess`]: a command started on the subordinate end,
//!   with a single explicit wait that distinguishes exit codes from signals

pub mod process;
pub mod pty;

pub use process::{ChildProcess, CommandSpec, ExitOutcome};
pub use pty::{PtyPair, ReadOutcome};
