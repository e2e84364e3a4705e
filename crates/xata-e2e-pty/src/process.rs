//! Child processes attached to a pseudo-terminal.
//!
//! [`ChildProcess::start`] launches a command with stdin, stdout and stderr
//! all bound to a PTY subordinate handle and returns immediately. The
//! handle moves from running to waited exactly once; waiting again is an
//! error rather than a repeated wait.

use std::os::fd::BorrowedFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use xata_e2e_types::E2eError;

/// How often [`ChildProcess::wait_timeout`] re-checks the child.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period between SIGTERM and SIGKILL when reaping on drop.
const TERMINATE_GRACE: Duration = Duration::from_millis(100);

/// What to run and how.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Program path, or a name resolved through `PATH`.
    pub program: PathBuf,
    /// Arguments, not including the program name.
    pub args: Vec<String>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory; inherited when `None`.
    pub working_dir: Option<PathBuf>,
    /// Make the tty the child's controlling terminal.
    ///
    /// Needed for job-control keys (Ctrl-C, Ctrl-Z) to turn into signals.
    /// A controlling terminal also means the child gets SIGHUP when the
    /// master is closed.
    pub controlling_terminal: bool,
}

impl CommandSpec {
    /// A spec for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the child in `dir`.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// See [`CommandSpec::controlling_terminal`].
    #[must_use]
    pub fn controlling_terminal(mut self, enabled: bool) -> Self {
        self.controlling_terminal = enabled;
        self
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with this code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitOutcome {
    /// The exit code, or `None` if a signal ended the process.
    pub fn code(self) -> Option<i32> {
        match self {
            ExitOutcome::Exited(code) => Some(code),
            ExitOutcome::Signaled(_) => None,
        }
    }

    /// True for a normal exit with code 0.
    pub fn success(self) -> bool {
        self == ExitOutcome::Exited(0)
    }

    fn from_status(status: ExitStatus) -> Result<Self, E2eError> {
        if let Some(code) = status.code() {
            Ok(ExitOutcome::Exited(code))
        } else if let Some(sig) = status.signal() {
            Ok(ExitOutcome::Signaled(sig))
        } else {
            Err(E2eError::Wait(format!("unrecognised exit status: {status}")))
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit code {code}"),
            ExitOutcome::Signaled(sig) => write!(f, "signal {sig}"),
        }
    }
}

/// A started child process. Reaped on drop if never waited on.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    outcome: Option<ExitOutcome>,
}

impl ChildProcess {
    /// Start `spec` with its three standard streams bound to `tty`.
    ///
    /// The child runs in a new session. Returns as soon as the process
    /// has been exec'd; exec failures (missing binary, permissions) are
    /// reported here as [`E2eError::Spawn`].
    pub fn start(spec: &CommandSpec, tty: BorrowedFd<'_>) -> Result<Self, E2eError> {
        let stdio = || {
            tty.try_clone_to_owned()
                .map(Stdio::from)
                .map_err(|e| E2eError::Spawn(format!("dup tty: {e}")))
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(stdio()?)
            .stdout(stdio()?)
            .stderr(stdio()?);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let controlling_terminal = spec.controlling_terminal;
        // Safety: the hook runs between fork and exec and only makes
        // async-signal-safe calls (setsid, ioctl). Stdio is already dup'd
        // onto fds 0-2 at that point.
        unsafe {
            cmd.pre_exec(move || {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                if controlling_terminal
                    && libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) < 0
                {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| E2eError::Spawn(format!("{}: {e}", spec.program.display())))?;
        debug!(
            pid = child.id(),
            program = %spec.program.display(),
            args = ?spec.args,
            "child process started"
        );

        Ok(Self {
            child,
            outcome: None,
        })
    }

    /// The child's process ID.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Check whether the child is still running, without reaping it.
    pub fn is_alive(&self) -> bool {
        self.outcome.is_none() && signal::kill(self.nix_pid(), None).is_ok()
    }

    /// Block until the child terminates.
    pub fn wait(&mut self) -> Result<ExitOutcome, E2eError> {
        self.ensure_not_waited()?;
        let status = self
            .child
            .wait()
            .map_err(|e| E2eError::Wait(format!("waitpid {}: {e}", self.pid())))?;
        self.finish(status)
    }

    /// Block until the child terminates or `timeout` elapses.
    ///
    /// On timeout the child keeps running and may be waited on again.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<ExitOutcome, E2eError> {
        self.ensure_not_waited()?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return self.finish(status),
                Ok(None) => {}
                Err(e) => {
                    return Err(E2eError::Wait(format!("waitpid {}: {e}", self.pid())));
                }
            }
            if Instant::now() >= deadline {
                return Err(E2eError::WaitTimeout {
                    pid: self.pid(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Send SIGTERM to the child.
    pub fn terminate(&self) -> Result<(), E2eError> {
        signal::kill(self.nix_pid(), Signal::SIGTERM)
            .map_err(|e| E2eError::Wait(format!("kill SIGTERM {}: {e}", self.pid())))
    }

    fn ensure_not_waited(&self) -> Result<(), E2eError> {
        if self.outcome.is_some() {
            return Err(E2eError::AlreadyWaited { pid: self.pid() });
        }
        Ok(())
    }

    fn finish(&mut self, status: ExitStatus) -> Result<ExitOutcome, E2eError> {
        let outcome = ExitOutcome::from_status(status)?;
        debug!(pid = self.pid(), %outcome, "child process exited");
        self.outcome = Some(outcome);
        Ok(outcome)
    }

    fn nix_pid(&self) -> Pid {
        Pid::from_raw(i32::try_from(self.child.id()).unwrap_or(i32::MAX))
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.outcome.is_some() || !matches!(self.child.try_wait(), Ok(None)) {
            return;
        }
        // Best effort: ask politely, then insist, then reap.
        let _ = self.terminate();
        std::thread::sleep(TERMINATE_GRACE);
        if matches!(self.child.try_wait(), Ok(None)) {
            warn!(pid = self.pid(), "child ignored SIGTERM, killing");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
