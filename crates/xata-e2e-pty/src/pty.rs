//! Pseudo-terminal pair allocation and master-side I/O.
//!
//! [`PtyPair`] owns both ends of an OS pseudo-terminal. The master end is
//! set non-blocking for use with [`poll_readable`]; the subordinate end is
//! handed to child processes as their standard streams.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, Winsize};
use nix::unistd;
use tracing::debug;

use xata_e2e_types::E2eError;

/// Give up on a write after this many consecutive `EAGAIN`s, one per
/// millisecond.
const WRITE_RETRY_LIMIT: u32 = 5000;

/// Both ends of a pseudo-terminal. Closed together on drop.
#[derive(Debug)]
pub struct PtyPair {
    master: OwnedFd,
    tty: OwnedFd,
}

/// Result of a single non-blocking read from the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were read into the buffer.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// Every subordinate handle is closed; no more output will arrive.
    Closed,
}

impl PtyPair {
    /// Allocate a new pair with the given window size.
    ///
    /// Failure here means the environment is out of PTYs or misconfigured,
    /// so it is reported as [`E2eError::PtyAlloc`] and never retried.
    pub fn open(rows: u16, cols: u16) -> Result<Self, E2eError> {
        let ws = winsize(rows, cols);
        let pty = openpty(Some(&ws), None)
            .map_err(|e| E2eError::PtyAlloc(format!("openpty failed: {e}")))?;

        let flags = fcntl(pty.master.as_raw_fd(), FcntlArg::F_GETFL)
            .map_err(|e| E2eError::PtyAlloc(format!("fcntl F_GETFL: {e}")))?;
        let flags = OFlag::from_bits_truncate(flags);
        fcntl(
            pty.master.as_raw_fd(),
            FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK),
        )
        .map_err(|e| E2eError::PtyAlloc(format!("fcntl F_SETFL: {e}")))?;

        debug!(
            master = pty.master.as_raw_fd(),
            tty = pty.slave.as_raw_fd(),
            rows,
            cols,
            "allocated pty pair"
        );
        Ok(Self {
            master: pty.master,
            tty: pty.slave,
        })
    }

    /// The master end, kept by the process driving the terminal.
    pub fn master(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    /// The subordinate end, attached to a child's standard streams.
    pub fn tty(&self) -> BorrowedFd<'_> {
        self.tty.as_fd()
    }

    /// Duplicate the master fd, e.g. for a background reader thread.
    ///
    /// The duplicate shares the non-blocking file status flag.
    pub fn try_clone_master(&self) -> Result<OwnedFd, E2eError> {
        self.master
            .try_clone()
            .map_err(|e| E2eError::PtyIo(format!("dup master: {e}")))
    }

    /// Write all bytes to the master (they arrive on the child's stdin).
    ///
    /// Retries on `EAGAIN` for about five seconds before giving up, so a
    /// child that stops reading cannot stall the caller forever.
    pub fn write_all(&self, data: &[u8]) -> Result<(), E2eError> {
        let mut written = 0;
        let mut retries = 0u32;
        while written < data.len() {
            match unistd::write(&self.master, &data[written..]) {
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(nix::errno::Errno::EAGAIN) => {
                    retries += 1;
                    if retries > WRITE_RETRY_LIMIT {
                        return Err(E2eError::PtyIo(
                            "write: buffer full after 5s of retries".into(),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(nix::errno::Errno::EINTR) => {}
                Err(e) => return Err(E2eError::PtyIo(format!("write: {e}"))),
            }
        }
        Ok(())
    }

    /// Change the window size seen by processes attached to the tty.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), E2eError> {
        let ws = winsize(rows, cols);
        // Safety: TIOCSWINSZ reads a winsize struct from a valid pointer,
        // and the master fd is open for as long as `self` lives.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            return Err(E2eError::PtyIo(format!(
                "ioctl TIOCSWINSZ failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

fn winsize(rows: u16, cols: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Non-blocking read from a master fd.
///
/// `EIO` on a master means the last subordinate handle went away, which is
/// reported as [`ReadOutcome::Closed`] rather than an error.
pub fn read(master: BorrowedFd<'_>, buf: &mut [u8]) -> Result<ReadOutcome, E2eError> {
    match unistd::read(master.as_raw_fd(), buf) {
        Ok(0) => Ok(ReadOutcome::Closed),
        Ok(n) => Ok(ReadOutcome::Data(n)),
        Err(nix::errno::Errno::EAGAIN) | Err(nix::errno::Errno::EINTR) => {
            Ok(ReadOutcome::WouldBlock)
        }
        Err(nix::errno::Errno::EIO) => Ok(ReadOutcome::Closed),
        Err(e) => Err(E2eError::PtyIo(format!("read: {e}"))),
    }
}

/// Wait up to `timeout` for the fd to become readable.
///
/// Returns `true` when data is available or the other side hung up.
pub fn poll_readable(fd: BorrowedFd<'_>, timeout: Duration) -> Result<bool, E2eError> {
    let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);
    let mut poll_fd = [PollFd::new(fd, PollFlags::POLLIN)];

    match nix::poll::poll(&mut poll_fd, timeout) {
        Ok(0) => Ok(false),
        Ok(_) => {
            let revents = poll_fd[0].revents().unwrap_or(PollFlags::empty());
            Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR))
        }
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(e) => Err(E2eError::PtyIo(format!("poll: {e}"))),
    }
}
