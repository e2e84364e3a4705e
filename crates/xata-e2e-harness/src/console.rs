//! Interactive console: a pty pair coupled to a terminal emulator.
//!
//! A background reader thread drains the pty master and delivers output
//! chunks over a channel; the console applies them to its [`Terminal`] in
//! arrival order and services expectations against the transcript.
//!
//! Expectations are order-preserving and non-overlapping: each successful
//! match consumes the transcript up to the end of the match, and later
//! expectations only search what comes after. Output that arrived before an
//! expectation was issued is searched first.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use xata_e2e_pty::pty::{self, PtyPair, ReadOutcome};
use xata_e2e_pty::{ChildProcess, CommandSpec};

use crate::error::HarnessError;
use crate::key::Key;
use crate::matcher::Matcher;
use crate::snapshot::ScreenSnapshot;
use crate::terminal::{Terminal, DEFAULT_COLS, DEFAULT_ROWS};

/// Timeout used by [`Console::expect_string`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// How long the reader blocks in `poll` before re-checking for shutdown.
const READER_POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 4096;

/// Most transcript characters quoted in a timeout error.
const TIMEOUT_CONTEXT_CHARS: usize = 2000;

/// Options for creating a console.
#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    /// Terminal rows (default: 24).
    pub rows: u16,
    /// Terminal columns (default: 80).
    pub cols: u16,
    /// Deadline for expectations that do not name one (default: 1s).
    pub default_timeout: Duration,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ConsoleOptions {
    /// Use `timeout` as the default expectation deadline.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Use a `rows` x `cols` terminal.
    #[must_use]
    pub fn size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }
}

#[derive(Debug)]
enum ReaderEvent {
    Output(Vec<u8>),
    Eof,
    Failed(String),
    Closed,
}

/// Closes a console from another thread.
///
/// An expectation blocked on the owning thread fails promptly with
/// [`HarnessError::ConsoleClosed`]; the pty pair is released by the owner
/// as soon as it observes the close.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    shutdown: Arc<AtomicBool>,
    tx: Sender<ReaderEvent>,
}

impl CloseHandle {
    /// Request the close. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(ReaderEvent::Closed);
        }
    }

    /// Whether a close has been requested.
    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// A pseudo-terminal with an emulated screen and an expect API.
///
/// The console owns its [`PtyPair`] exclusively. Start one child with
/// [`spawn`](Self::spawn), script it with `send_*` and `expect_*`, then
/// [`close`](Self::close).
pub struct Console {
    pty: Option<PtyPair>,
    terminal: Terminal,
    consumed: usize,
    events: Receiver<ReaderEvent>,
    closer: CloseHandle,
    reader: Option<JoinHandle<()>>,
    default_timeout: Duration,
    hung_up: bool,
    closed: bool,
    attached: Option<u32>,
}

impl Console {
    /// Allocate a console with default options.
    pub fn new() -> Result<Self, HarnessError> {
        Self::with_options(ConsoleOptions::default())
    }

    /// Allocate a pty pair and start the background reader.
    pub fn with_options(opts: ConsoleOptions) -> Result<Self, HarnessError> {
        let pty = PtyPair::open(opts.rows, opts.cols)?;
        let master = pty
            .try_clone_master()
            .map_err(|e| HarnessError::Setup(e.to_string()))?;

        let (tx, events) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(master, tx.clone(), Arc::clone(&shutdown))
            .map_err(|e| HarnessError::Setup(format!("spawn console reader: {e}")))?;

        Ok(Self {
            pty: Some(pty),
            terminal: Terminal::new(opts.rows, opts.cols),
            consumed: 0,
            events,
            closer: CloseHandle { shutdown, tx },
            reader: Some(reader),
            default_timeout: opts.default_timeout,
            hung_up: false,
            closed: false,
            attached: None,
        })
    }

    /// Start `spec` with its standard streams bound to this console.
    ///
    /// A console drives exactly one child; a second call fails with
    /// [`HarnessError::Process`].
    pub fn spawn(&mut self, spec: &CommandSpec) -> Result<ChildProcess, HarnessError> {
        if let Some(pid) = self.attached {
            return Err(HarnessError::Process(format!(
                "console already drives child {pid}"
            )));
        }
        let child = ChildProcess::start(spec, self.pair("spawn")?.tty())?;
        self.attached = Some(child.pid());
        Ok(child)
    }

    /// Write `text` followed by a newline.
    pub fn send_line(&self, text: &str) -> Result<(), HarnessError> {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.send_raw(&data)
    }

    /// Write bytes as-is, e.g. control characters.
    pub fn send_raw(&self, data: &[u8]) -> Result<(), HarnessError> {
        trace!(bytes = data.len(), "console send");
        self.pair("send")?.write_all(data)?;
        Ok(())
    }

    /// Write the byte sequence for `key`.
    pub fn send_key(&self, key: Key) -> Result<(), HarnessError> {
        let bytes = key.to_bytes().map_err(|e| HarnessError::Send(e.to_string()))?;
        self.send_raw(&bytes)
    }

    /// Wait for `literal` using the default timeout.
    ///
    /// Returns the output consumed, up to and including the match.
    pub fn expect_string(&mut self, literal: &str) -> Result<String, HarnessError> {
        self.expect(&Matcher::literal(literal), self.default_timeout)
    }

    /// Wait for `literal` for at most `timeout`.
    pub fn expect_string_within(
        &mut self,
        literal: &str,
        timeout: Duration,
    ) -> Result<String, HarnessError> {
        self.expect(&Matcher::literal(literal), timeout)
    }

    /// Wait for a regex match for at most `timeout`.
    pub fn expect_pattern(
        &mut self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<String, HarnessError> {
        self.expect(&Matcher::pattern(pattern)?, timeout)
    }

    /// Wait until `matcher` matches unconsumed output, or `timeout` elapses.
    ///
    /// Blocks on the output channel between checks, so it wakes as soon as
    /// new output or a close arrives. On success, returns the unconsumed
    /// output up to and including the match and marks it consumed.
    pub fn expect(&mut self, matcher: &Matcher, timeout: Duration) -> Result<String, HarnessError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_events()?;
            if self.closed {
                return Err(HarnessError::ConsoleClosed {
                    operation: format!("expect {matcher}"),
                });
            }
            if let Some(consumed) = self.try_consume(matcher) {
                debug!(%matcher, bytes = consumed.len(), "expectation matched");
                return Ok(consumed);
            }
            if self.hung_up {
                return Err(HarnessError::UnexpectedEof {
                    expected: matcher.to_string(),
                    observed: self.pending_output().to_string(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(%matcher, ?timeout, "expectation timed out");
                return Err(HarnessError::ExpectationTimeout {
                    expected: matcher.to_string(),
                    timeout,
                    observed: self.unmatched_context(),
                    screen: self.screen_dump(),
                });
            }
            match self.events.recv_timeout(deadline - now) {
                Ok(event) => self.apply(event)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.hung_up = true,
            }
        }
    }

    /// Apply any output that has already arrived, without waiting.
    pub fn pump(&mut self) -> Result<(), HarnessError> {
        self.drain_events()
    }

    /// Output received but not yet consumed by an expectation.
    pub fn pending_output(&self) -> &str {
        &self.terminal.transcript()[self.consumed..]
    }

    /// Everything the child has printed so far, escape sequences removed.
    pub fn transcript(&self) -> &str {
        self.terminal.transcript()
    }

    /// The last `max_chars` characters of the transcript.
    pub fn tail(&self, max_chars: usize) -> &str {
        self.terminal.tail(max_chars)
    }

    /// The visible screen as text.
    pub fn screen_text(&self) -> String {
        self.terminal.screen_text()
    }

    /// Capture the current screen.
    pub fn snapshot(&self) -> ScreenSnapshot {
        self.terminal.snapshot()
    }

    /// Bordered screen rendering for diagnostics.
    pub fn screen_dump(&self) -> String {
        self.snapshot().render()
    }

    /// Resize both the pty window and the emulated screen.
    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<(), HarnessError> {
        self.pair("resize")?.resize(rows, cols)?;
        self.terminal.resize(rows, cols);
        Ok(())
    }

    /// Deadline used when an expectation does not name one.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// A handle that can close this console from another thread.
    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    /// Whether the console has been closed, here or through a handle.
    pub fn is_closed(&self) -> bool {
        self.closed || self.closer.is_closed()
    }

    /// Stop the reader and release the pty pair. Idempotent.
    ///
    /// The transcript stays readable after closing.
    pub fn close(&mut self) {
        self.closer.close();
        self.closed = true;
        self.release();
    }

    fn pair(&self, operation: &str) -> Result<&PtyPair, HarnessError> {
        match &self.pty {
            Some(pty) if !self.is_closed() => Ok(pty),
            _ => Err(HarnessError::ConsoleClosed {
                operation: operation.to_string(),
            }),
        }
    }

    /// Unconsumed output, cut to its trailing window when it is long.
    fn unmatched_context(&self) -> String {
        let pending = self.pending_output();
        let tail = self.tail(TIMEOUT_CONTEXT_CHARS);
        if tail.len() < pending.len() {
            format!("...{tail}")
        } else {
            pending.to_string()
        }
    }

    fn try_consume(&mut self, matcher: &Matcher) -> Option<String> {
        let pending = self.pending_output();
        let (_, end) = matcher.find(pending)?;
        let consumed = pending[..end].to_string();
        self.consumed += end;
        Some(consumed)
    }

    fn drain_events(&mut self) -> Result<(), HarnessError> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(event)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    self.hung_up = true;
                    return Ok(());
                }
            }
        }
    }

    fn apply(&mut self, event: ReaderEvent) -> Result<(), HarnessError> {
        match event {
            ReaderEvent::Output(bytes) => {
                self.terminal.process(&bytes);
                for reply in self.terminal.take_replies() {
                    if let Some(pty) = &self.pty {
                        pty.write_all(&reply)?;
                    }
                }
            }
            ReaderEvent::Eof => {
                debug!("pty hung up");
                self.hung_up = true;
            }
            ReaderEvent::Failed(reason) => {
                warn!(%reason, "console reader failed");
                self.hung_up = true;
            }
            ReaderEvent::Closed => {
                self.closed = true;
                self.release();
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("console reader thread panicked");
            }
        }
        if let Some(pty) = self.pty.take() {
            debug!(master = pty.master().as_raw_fd(), "closing pty pair");
            drop(pty);
        }
        // Output still queued is dropped with the pty.
        while let Ok(event) = self.events.try_recv() {
            if let ReaderEvent::Output(bytes) = event {
                trace!(bytes = bytes.len(), "discarding output after close");
            }
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("closed", &self.is_closed())
            .field("hung_up", &self.hung_up)
            .field("consumed", &self.consumed)
            .field("transcript_len", &self.terminal.transcript().len())
            .finish()
    }
}

fn spawn_reader(
    master: OwnedFd,
    tx: Sender<ReaderEvent>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("console-reader".into())
        .spawn(move || {
            debug!(fd = master.as_raw_fd(), "console reader started");
            let mut buf = [0u8; READ_CHUNK];
            while !shutdown.load(Ordering::Acquire) {
                match pty::poll_readable(master.as_fd(), READER_POLL_INTERVAL) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        let _ = tx.send(ReaderEvent::Failed(e.to_string()));
                        break;
                    }
                }
                match pty::read(master.as_fd(), &mut buf) {
                    Ok(ReadOutcome::Data(n)) => {
                        trace!(bytes = n, "pty output");
                        if tx.send(ReaderEvent::Output(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Ok(ReadOutcome::WouldBlock) => {}
                    Ok(ReadOutcome::Closed) => {
                        let _ = tx.send(ReaderEvent::Eof);
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(ReaderEvent::Failed(e.to_string()));
                        break;
                    }
                }
            }
            debug!("console reader stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console() -> Console {
        Console::with_options(ConsoleOptions::default().default_timeout(Duration::from_secs(3)))
            .expect("console")
    }

    fn start(console: &mut Console, program: &str, args: &[&str]) -> ChildProcess {
        let spec = CommandSpec::new(program).args(args.iter().copied());
        console.spawn(&spec).expect("start")
    }

    #[test]
    fn expect_string_returns_consumed_output() {
        let mut c = console();
        let mut child = start(&mut c, "/bin/echo", &["hello world"]);

        let out = c.expect_string("world").expect("match");
        assert_eq!(out, "hello world");
        assert_eq!(c.expect_string("\n").expect("newline"), "\n");
        assert!(child.wait().expect("wait").success());
    }

    #[test]
    fn consumed_output_never_matches_twice() {
        let mut c = console();
        let mut child = start(&mut c, "/bin/echo", &["once"]);

        c.expect_string("once").expect("first match");
        let err = c
            .expect_string_within("once", Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, HarnessError::ExpectationTimeout { .. }));
        child.wait().expect("wait");
    }

    #[test]
    fn output_before_expect_is_still_matched() {
        let mut c = console();
        let mut child = start(&mut c, "/bin/echo", &["early bird"]);
        child.wait().expect("wait");
        std::thread::sleep(Duration::from_millis(100));

        c.expect_string("early bird").expect("buffered output");
    }

    #[test]
    fn send_line_reaches_child_stdin() {
        let mut c = console();
        let mut child = start(&mut c, "/bin/sh", &["-c", "read v; echo \"got:$v\""]);

        c.send_line("abc").expect("send");
        c.expect_string("got:abc").expect("reply");
        assert!(child.wait().expect("wait").success());
    }

    #[test]
    fn sends_are_not_reordered() {
        let mut c = console();
        let mut child = start(&mut c, "/bin/sh", &["-c", "stty -echo; echo ready; exec cat"]);
        c.expect_string("ready\n").expect("ready");

        for i in 0..20 {
            c.send_line(&format!("line-{i}")).expect("send");
        }
        for i in 0..20 {
            c.expect_string(&format!("line-{i}\n")).expect("in order");
        }
        c.send_key(Key::Ctrl('d')).expect("eof");
        assert!(child.wait().expect("wait").success());
    }

    #[test]
    fn expect_pattern_matches_regex() {
        let mut c = console();
        let mut child = start(&mut c, "/bin/echo", &["version 1.2.3"]);
        let out = c
            .expect_pattern(r"version \d+\.\d+\.\d+", Duration::from_secs(3))
            .expect("pattern");
        assert_eq!(out, "version 1.2.3");
        child.wait().expect("wait");
    }

    #[test]
    fn timeout_carries_expected_and_observed() {
        let mut c = console();
        let mut child = start(&mut c, "/bin/echo", &["actual output"]);
        c.expect_string("actual").expect("partial match");

        match c.expect_string_within("missing", Duration::from_millis(200)) {
            Err(HarnessError::ExpectationTimeout {
                expected,
                observed,
                screen,
                ..
            }) => {
                assert_eq!(expected, "\"missing\"");
                assert!(observed.starts_with(" output"), "observed {observed:?}");
                assert!(screen.contains("cursor="));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        child.wait().expect("wait");
    }

    #[test]
    fn close_is_idempotent_and_refuses_further_io() {
        let mut c = console();
        c.close();
        c.close();
        assert!(c.is_closed());
        assert!(matches!(c.send_line("x"), Err(HarnessError::ConsoleClosed { .. })));
        assert!(matches!(
            c.spawn(&CommandSpec::new("/bin/true")),
            Err(HarnessError::ConsoleClosed { .. })
        ));
        assert!(matches!(
            c.expect_string("x"),
            Err(HarnessError::ConsoleClosed { .. })
        ));
    }

    #[test]
    fn close_handle_unblocks_pending_expect() {
        let mut c = console();
        let handle = c.close_handle();
        let closer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            handle.close();
        });

        let started = Instant::now();
        let err = c
            .expect_string_within("never printed", Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, HarnessError::ConsoleClosed { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        closer.join().expect("closer thread");
        assert!(c.is_closed());
    }

    #[test]
    fn answers_cursor_position_queries_from_child() {
        let mut c = console();
        // Ask for the cursor position with echo off, then print the reply
        // with the escape character made visible.
        let script = r#"stty -echo -icanon min 6; printf 'ab\033[6n'; r=$(dd bs=6 count=1 2>/dev/null); printf '\nreply:%s\n' "$r" | tr '\033' 'E'"#;
        let mut child = start(&mut c, "/bin/sh", &["-c", script]);
        c.expect_string("reply:E[1;3R").expect("cursor report");
        assert!(child.wait().expect("wait").success());
    }

    #[test]
    fn second_child_is_refused() {
        let mut c = console();
        let mut first = start(&mut c, "/bin/sh", &["-c", "echo first; sleep 1"]);
        let err = c.spawn(&CommandSpec::new("/bin/echo").arg("second")).unwrap_err();
        assert!(matches!(err, HarnessError::Process(_)), "{err}");
        assert!(err.to_string().contains(&first.pid().to_string()));

        c.expect_string("first").expect("first child still drives the console");
        first.terminate().expect("terminate");
    }

    #[test]
    fn out_of_range_key_is_a_send_error() {
        let c = console();
        let err = c.send_key(Key::F(13)).unwrap_err();
        assert!(matches!(err, HarnessError::Send(_)), "{err}");
        assert!(err.to_string().contains("f13"));
    }

    #[test]
    fn tail_and_timeout_context_keep_the_end_of_long_output() {
        let mut c = console();
        let script = "i=0; while [ $i -lt 300 ]; do echo line-$i-0123456789; i=$((i+1)); done; echo done";
        let mut child = start(&mut c, "/bin/sh", &["-c", script]);
        c.expect_string("done\n").expect("all output");
        assert!(child.wait().expect("wait").success());

        assert_eq!(c.tail(5), "done\n");
        assert!(c.transcript().len() > TIMEOUT_CONTEXT_CHARS);

        // Rewind the cursor so the whole transcript is unmatched.
        c.consumed = 0;
        match c.expect_string_within("missing", Duration::from_millis(100)) {
            Err(HarnessError::ExpectationTimeout { observed, .. }) => {
                assert!(observed.starts_with("..."), "observed {observed:?}");
                assert!(observed.ends_with("line-299-0123456789\ndone\n"));
                assert!(!observed.contains("line-0-"));
                assert_eq!(observed.chars().count(), TIMEOUT_CONTEXT_CHARS + 3);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
