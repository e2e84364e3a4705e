//! Drive interactive command-line programs through a pseudo-terminal and
//! assert on what they print.
//!
//! # Architecture
//!
//! - [`Terminal`]: VT emulator (screen grid) plus a plain-text transcript
//! - [`Console`]: a pty pair, a reader thread and the terminal; `send_*`
//!   writes keystrokes, `expect*` waits for output with a deadline
//! - [`Expect`]: chainable expect/send scripts over a console
//! - [`XataCommand`] / [`ConfigDir`]: start the CLI under test on a console
//! - [`Scenario`] / [`ScenarioRunner`]: ordered steps plus an exit check
//! - [`Suite`]: scenarios loaded from TOML
//! - [`flows`]: login and workspace helpers for chained runs

pub mod command;
pub mod console;
pub mod error;
pub mod expect;
pub mod flows;
pub mod key;
pub mod matcher;
pub mod scenario;
pub mod snapshot;
pub mod suite;
pub mod terminal;

pub use command::{ConfigDir, XataCommand};
pub use console::{CloseHandle, Console, ConsoleOptions, DEFAULT_TIMEOUT};
pub use error::HarnessError;
pub use expect::Expect;
pub use key::{Key, ParseKeyError, UnencodableKey};
pub use matcher::Matcher;
pub use scenario::{
    ExpectedExit, JsonCheck, Phase, Scenario, ScenarioError, ScenarioReport, ScenarioRunner, Step,
};
pub use snapshot::ScreenSnapshot;
pub use suite::{Suite, SuiteReport, SuiteVars};
pub use terminal::Terminal;
pub use xata_e2e_pty::{ChildProcess, CommandSpec, ExitOutcome};
