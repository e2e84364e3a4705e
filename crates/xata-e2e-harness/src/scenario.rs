//! Scenarios: a CLI invocation plus an ordered script of steps and an
//! expected exit status.
//!
//! [`ScenarioRunner::run`] starts the command on a fresh console, executes
//! each step in order and stops at the first failure. Once the steps are
//! done the console is closed and the child is waited on; its exit status
//! is then checked against the scenario's [`ExpectedExit`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};
use xata_e2e_pty::ExitOutcome;

use crate::command::{ConfigDir, XataCommand};
use crate::console::Console;
use crate::error::HarnessError;
use crate::key::Key;
use crate::matcher::Matcher;

/// How long the runner waits for the child after the last step.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks applied to JSON embedded in the output of an expect step.
///
/// The document starts at the first `{` of the step's capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonCheck {
    /// Top-level keys that must hold exactly these string values.
    pub equals: BTreeMap<String, String>,
    /// Top-level keys that must be present with a non-empty value.
    pub non_empty: Vec<String>,
}

impl JsonCheck {
    /// Require `key` to equal `value`.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    /// Require `key` to be present and non-empty.
    #[must_use]
    pub fn non_empty(mut self, key: impl Into<String>) -> Self {
        self.non_empty.push(key.into());
        self
    }

    /// Parse the JSON object in `captured` and apply the checks.
    pub fn check(&self, captured: &str) -> Result<Value, HarnessError> {
        let start = captured
            .find('{')
            .ok_or_else(|| HarnessError::AssertionMismatch {
                message: "captured output contains JSON".to_string(),
                expected: "a JSON object".to_string(),
                actual: captured.to_string(),
            })?;
        let value: Value = serde_json::from_str(captured[start..].trim_end())?;

        for (key, expected) in &self.equals {
            let actual = value.get(key).map(json_text).unwrap_or_default();
            if &actual != expected {
                return Err(HarnessError::AssertionMismatch {
                    message: format!("JSON field {key:?}"),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        for key in &self.non_empty {
            let present = match value.get(key) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(HarnessError::AssertionMismatch {
                    message: format!("JSON field {key:?}"),
                    expected: "a non-empty value".to_string(),
                    actual: value.get(key).map(json_text).unwrap_or_default(),
                });
            }
        }
        Ok(value)
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One action in a scenario script.
#[derive(Debug, Clone)]
pub enum Step {
    /// Wait for output matching `matcher`.
    Expect {
        matcher: Matcher,
        /// Overrides the console's default timeout.
        timeout: Option<Duration>,
        /// Checks applied to JSON in the consumed output.
        json: Option<JsonCheck>,
    },
    /// Send a line of text followed by a newline.
    SendLine {
        text: String,
        /// Masked in logs and error messages.
        secret: bool,
    },
    /// Send a single key.
    SendKey(Key),
    /// Send bytes as-is.
    SendRaw(Vec<u8>),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Expect { matcher, .. } => write!(f, "expect {matcher}"),
            Step::SendLine { secret: true, .. } => f.write_str("send <redacted>"),
            Step::SendLine { text, .. } => write!(f, "send {text:?}"),
            Step::SendKey(key) => write!(f, "key {key}"),
            Step::SendRaw(bytes) => write!(f, "send {} raw bytes", bytes.len()),
        }
    }
}

/// The exit status a scenario requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedExit {
    /// Exactly this code.
    Code(i32),
    /// Any non-zero code.
    Failure,
    /// Any normal exit.
    Any,
}

impl Default for ExpectedExit {
    fn default() -> Self {
        ExpectedExit::Code(0)
    }
}

impl ExpectedExit {
    /// Check `outcome`, returning the exit code on success.
    ///
    /// Termination by a signal never satisfies an expectation.
    pub fn check(self, outcome: ExitOutcome) -> Result<i32, HarnessError> {
        let code = match outcome {
            ExitOutcome::Exited(code) => code,
            ExitOutcome::Signaled(signal) => {
                return Err(HarnessError::SignalTermination { signal })
            }
        };
        let ok = match self {
            ExpectedExit::Code(expected) => code == expected,
            ExpectedExit::Failure => code != 0,
            ExpectedExit::Any => true,
        };
        if ok {
            Ok(code)
        } else {
            Err(HarnessError::AssertionMismatch {
                message: "exit code".to_string(),
                expected: self.to_string(),
                actual: code.to_string(),
            })
        }
    }
}

impl fmt::Display for ExpectedExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedExit::Code(code) => write!(f, "{code}"),
            ExpectedExit::Failure => f.write_str("non-zero"),
            ExpectedExit::Any => f.write_str("any"),
        }
    }
}

/// A named CLI invocation with its interaction script.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    /// Arguments after the global flags.
    pub args: Vec<String>,
    pub steps: Vec<Step>,
    pub exit: ExpectedExit,
}

impl Scenario {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            steps: Vec::new(),
            exit: ExpectedExit::default(),
        }
    }

    /// Append an arbitrary step.
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Expect a literal with the default timeout.
    #[must_use]
    pub fn expect(self, literal: &str) -> Self {
        self.step(Step::Expect {
            matcher: Matcher::literal(literal),
            timeout: None,
            json: None,
        })
    }

    /// Expect a literal within `timeout`.
    #[must_use]
    pub fn expect_within(self, literal: &str, timeout: Duration) -> Self {
        self.step(Step::Expect {
            matcher: Matcher::literal(literal),
            timeout: Some(timeout),
            json: None,
        })
    }

    /// Expect a regex match within `timeout`.
    pub fn expect_pattern(self, pattern: &str, timeout: Duration) -> Result<Self, HarnessError> {
        Ok(self.step(Step::Expect {
            matcher: Matcher::pattern(pattern)?,
            timeout: Some(timeout),
            json: None,
        }))
    }

    /// Expect a literal within `timeout` and check JSON in the output.
    #[must_use]
    pub fn expect_json(self, literal: &str, timeout: Duration, check: JsonCheck) -> Self {
        self.step(Step::Expect {
            matcher: Matcher::literal(literal),
            timeout: Some(timeout),
            json: Some(check),
        })
    }

    #[must_use]
    pub fn send_line(self, text: &str) -> Self {
        self.step(Step::SendLine {
            text: text.to_string(),
            secret: false,
        })
    }

    /// Send a line that must not appear in logs or errors.
    #[must_use]
    pub fn send_secret(self, text: &str) -> Self {
        self.step(Step::SendLine {
            text: text.to_string(),
            secret: true,
        })
    }

    #[must_use]
    pub fn send_key(self, key: Key) -> Self {
        self.step(Step::SendKey(key))
    }

    #[must_use]
    pub fn send_raw(self, bytes: &[u8]) -> Self {
        self.step(Step::SendRaw(bytes.to_vec()))
    }

    /// Require exactly `code`.
    #[must_use]
    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit = ExpectedExit::Code(code);
        self
    }

    /// Require a non-zero exit.
    #[must_use]
    pub fn exit_failure(mut self) -> Self {
        self.exit = ExpectedExit::Failure;
        self
    }

    /// Accept any normal exit.
    #[must_use]
    pub fn exit_any(mut self) -> Self {
        self.exit = ExpectedExit::Any;
        self
    }
}

/// Where in a scenario a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Start,
    Step { index: usize, description: String },
    Exit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Start => f.write_str("start"),
            Phase::Step { index, description } => write!(f, "step {} ({description})", index + 1),
            Phase::Exit => f.write_str("exit check"),
        }
    }
}

/// A failed scenario, with the transcript seen up to the failure.
#[derive(Debug, thiserror::Error)]
#[error("scenario {scenario:?} failed at {phase}: {source}\nTranscript:\n{transcript}")]
pub struct ScenarioError {
    pub scenario: String,
    pub phase: Phase,
    #[source]
    pub source: HarnessError,
    pub transcript: String,
}

/// The result of a passing scenario.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    /// Output consumed by each expect step, in order.
    pub captures: Vec<String>,
    /// Parsed JSON from each expect step that carried a check.
    pub json: Vec<Value>,
    pub transcript: String,
    pub exit_code: i32,
    pub elapsed: Duration,
}

/// Runs scenarios against one command.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    command: XataCommand,
    wait_timeout: Duration,
}

impl ScenarioRunner {
    pub fn new(command: XataCommand) -> Self {
        Self {
            command,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// How long to wait for the child after the last step.
    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn command(&self) -> &XataCommand {
        &self.command
    }

    /// Run `scenario` against `config_dir`.
    ///
    /// The console and child are released on every path; a child still
    /// running after a failed step is terminated.
    pub fn run(
        &self,
        scenario: &Scenario,
        config_dir: &ConfigDir,
    ) -> Result<ScenarioReport, ScenarioError> {
        let started = Instant::now();
        info!(scenario = %scenario.name, args = ?scenario.args, "running scenario");
        let fail = |phase: Phase, source: HarnessError, transcript: String| ScenarioError {
            scenario: scenario.name.clone(),
            phase,
            source,
            transcript,
        };

        let (mut console, mut child) = self
            .command
            .start(config_dir, scenario.args.as_slice())
            .map_err(|e| fail(Phase::Start, e, String::new()))?;

        let mut captures = Vec::new();
        let mut json = Vec::new();
        for (index, step) in scenario.steps.iter().enumerate() {
            debug!(scenario = %scenario.name, step = index + 1, %step, "executing step");
            if let Err(source) = execute(&mut console, step, &mut captures, &mut json) {
                warn!(scenario = %scenario.name, step = index + 1, error = %source, "step failed");
                console.close();
                let phase = Phase::Step {
                    index,
                    description: step.to_string(),
                };
                return Err(fail(phase, source, console.transcript().to_string()));
            }
        }

        console.close();
        let transcript = console.transcript().to_string();
        let outcome = match child.wait_timeout(self.wait_timeout) {
            Ok(outcome) => outcome,
            Err(e) => return Err(fail(Phase::Exit, e.into(), transcript)),
        };
        let exit_code = match scenario.exit.check(outcome) {
            Ok(code) => code,
            Err(e) => return Err(fail(Phase::Exit, e, transcript)),
        };

        let elapsed = started.elapsed();
        info!(scenario = %scenario.name, exit_code, ?elapsed, "scenario passed");
        Ok(ScenarioReport {
            name: scenario.name.clone(),
            captures,
            json,
            transcript,
            exit_code,
            elapsed,
        })
    }
}

fn execute(
    console: &mut Console,
    step: &Step,
    captures: &mut Vec<String>,
    json: &mut Vec<Value>,
) -> Result<(), HarnessError> {
    match step {
        Step::Expect {
            matcher,
            timeout,
            json: check,
        } => {
            let timeout = timeout.unwrap_or_else(|| console.default_timeout());
            let captured = console.expect(matcher, timeout)?;
            if let Some(check) = check {
                json.push(check.check(&captured)?);
            }
            captures.push(captured);
        }
        Step::SendLine { text, .. } => console.send_line(text)?,
        Step::SendKey(key) => console.send_key(*key)?,
        Step::SendRaw(bytes) => console.send_raw(bytes)?,
    }
    Ok(())
}
