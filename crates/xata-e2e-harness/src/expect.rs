//! Builder-style expect/send API over a [`Console`].
//!
//! [`Expect`] wraps a console and provides a fluent interface for the
//! common pattern of: wait for a prompt, answer it, wait for the result.
//! Methods are chainable and return `&mut Self`; the output consumed by
//! each expectation is kept in [`captures`](Expect::captures).
//!
//! # Example
//!
//! ```no_run
//! # use xata_e2e_harness::{Console, Expect};
//! # use std::time::Duration;
//! # fn example(console: &mut Console) -> Result<(), xata_e2e_harness::HarnessError> {
//! Expect::new(console)
//!     .string("Introduce your API key:")?
//!     .send_line("invalid_key")?
//!     .within(Duration::from_secs(5))
//!     .string("Checking access to the API...Auth error: Invalid API key")?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use crate::console::Console;
use crate::error::HarnessError;
use crate::key::Key;
use crate::matcher::Matcher;

/// Delay between keystrokes in [`Expect::type_text`].
const KEYSTROKE_DELAY: Duration = Duration::from_millis(5);

/// A chainable script over a console.
pub struct Expect<'a> {
    console: &'a mut Console,
    timeout: Duration,
    captures: Vec<String>,
}

impl<'a> Expect<'a> {
    /// Start a script using the console's default timeout.
    pub fn new(console: &'a mut Console) -> Self {
        let timeout = console.default_timeout();
        Self {
            console,
            timeout,
            captures: Vec::new(),
        }
    }

    /// Set the timeout for subsequent expectations.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Change the timeout mid-chain.
    pub fn within(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Wait for a literal.
    pub fn string(&mut self, literal: &str) -> Result<&mut Self, HarnessError> {
        self.matching(&Matcher::literal(literal))
    }

    /// Wait for a regex match.
    pub fn pattern(&mut self, pattern: &str) -> Result<&mut Self, HarnessError> {
        self.matching(&Matcher::pattern(pattern)?)
    }

    /// Wait for any matcher.
    pub fn matching(&mut self, matcher: &Matcher) -> Result<&mut Self, HarnessError> {
        let consumed = self.console.expect(matcher, self.timeout)?;
        self.captures.push(consumed);
        Ok(self)
    }

    /// Send a line of text.
    pub fn send_line(&mut self, text: &str) -> Result<&mut Self, HarnessError> {
        self.console.send_line(text)?;
        Ok(self)
    }

    /// Send a single key.
    pub fn send_key(&mut self, key: Key) -> Result<&mut Self, HarnessError> {
        self.console.send_key(key)?;
        Ok(self)
    }

    /// Type text one keystroke at a time.
    pub fn type_text(&mut self, text: &str) -> Result<&mut Self, HarnessError> {
        for ch in text.chars() {
            self.console.send_key(Key::Char(ch))?;
            std::thread::sleep(KEYSTROKE_DELAY);
        }
        Ok(self)
    }

    /// Assert the visible screen contains `needle` right now.
    ///
    /// Applies output that already arrived, but does not wait for more.
    pub fn assert_screen_contains(&mut self, needle: &str) -> Result<&mut Self, HarnessError> {
        self.console.pump()?;
        let screen = self.console.screen_text();
        if !screen.contains(needle) {
            return Err(HarnessError::AssertionMismatch {
                message: "screen contents".into(),
                expected: format!("text containing {needle:?}"),
                actual: self.console.screen_dump(),
            });
        }
        Ok(self)
    }

    /// Assert the visible screen does not contain `needle` right now.
    pub fn assert_screen_lacks(&mut self, needle: &str) -> Result<&mut Self, HarnessError> {
        self.console.pump()?;
        if self.console.screen_text().contains(needle) {
            return Err(HarnessError::AssertionMismatch {
                message: "screen contents".into(),
                expected: format!("text without {needle:?}"),
                actual: self.console.screen_dump(),
            });
        }
        Ok(self)
    }

    /// Output consumed by each successful expectation, in order.
    pub fn captures(&self) -> &[String] {
        &self.captures
    }

    /// Output consumed by the most recent expectation.
    pub fn last_capture(&self) -> Option<&str> {
        self.captures.last().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleOptions;
    use xata_e2e_pty::{ChildProcess, CommandSpec};

    fn spawn(console: &mut Console, script: &str) -> ChildProcess {
        let spec = CommandSpec::new("/bin/sh").args(["-c", script]);
        console.spawn(&spec).expect("start")
    }

    fn console() -> Console {
        Console::with_options(ConsoleOptions::default().default_timeout(Duration::from_secs(3)))
            .expect("console")
    }

    #[test]
    fn prompt_and_answer_chain() {
        let mut c = console();
        let mut child = spawn(&mut c, "printf 'name? '; read n; echo \"hi $n\"");

        let mut script = Expect::new(&mut c);
        script
            .string("name?")
            .expect("prompt")
            .send_line("ada")
            .expect("send")
            .string("hi ada")
            .expect("greeting");
        assert_eq!(script.captures().len(), 2);
        assert_eq!(script.captures()[0], "name?");
        assert_eq!(script.last_capture(), Some(" ada\nhi ada"));
        assert!(child.wait().expect("wait").success());
    }

    #[test]
    fn screen_assertions() {
        let mut c = console();
        let mut child = spawn(&mut c, "echo present");

        let mut script = Expect::new(&mut c);
        script.string("present").expect("text");
        script.assert_screen_contains("present").expect("contains");
        script.assert_screen_lacks("absent-string").expect("lacks");
        assert!(matches!(
            script.assert_screen_contains("absent-string"),
            Err(HarnessError::AssertionMismatch { .. })
        ));
        child.wait().expect("wait");
    }

    #[test]
    fn timeout_applies_to_later_steps() {
        let mut c = console();
        let mut child = spawn(&mut c, "echo fast");

        let mut script = Expect::new(&mut c).timeout(Duration::from_secs(3));
        script.string("fast").expect("fast");
        let err = script
            .within(Duration::from_millis(100))
            .string("slow")
            .err()
            .expect("should time out");
        match err {
            HarnessError::ExpectationTimeout { timeout, .. } => {
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other}"),
        }
        child.wait().expect("wait");
    }

    #[test]
    fn type_text_is_echoed() {
        let mut c = console();
        let mut child = spawn(&mut c, "read v; echo \"[$v]\"");

        Expect::new(&mut c)
            .type_text("typed")
            .expect("type")
            .send_key(Key::Enter)
            .expect("enter")
            .string("[typed]")
            .expect("echo");
        assert!(child.wait().expect("wait").success());
    }
}
