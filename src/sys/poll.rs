//! Readiness waiter: parks the calling thread on one descriptor.

use std::io;
use std::os::fd::RawFd;

use crate::error::{Result, SocketError};

/// The readiness event a parked thread waits for.
///
/// Each wait is for exactly one direction: the read-side drivers (read,
/// accept) park until the descriptor has something to deliver, the
/// write-side drivers (write, connect completion) until it can take more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Wait until the descriptor is readable (`POLLIN`).
    Readable,
    /// Wait until the descriptor is writable (`POLLOUT`).
    Writable,
}

impl Interest {
    const fn poll_events(self) -> libc::c_short {
        match self {
            Self::Readable => libc::POLLIN,
            Self::Writable => libc::POLLOUT,
        }
    }
}

/// Blocks the calling thread until `fd` is ready for the requested event or
/// the deadline elapses. `nanos == 0` waits forever.
///
/// Returning is not a readiness guarantee: a directed thread signal, a
/// preclose on the descriptor, or deadline truncation all produce wake-ups
/// the caller must treat as spurious and re-check by retrying the syscall.
pub fn park(fd: RawFd, interest: Interest, nanos: u64) -> Result<()> {
    let timeout = if nanos == 0 {
        -1
    } else {
        // poll(2) has millisecond resolution; the driver's own deadline
        // arithmetic absorbs the truncation
        (nanos / 1_000_000).min(libc::c_int::MAX as u64) as libc::c_int
    };
    let mut pfd = libc::pollfd {
        fd,
        events: interest.poll_events(),
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut pfd, 1, timeout) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            // woken by a directed signal; the driver re-checks state
            return Ok(());
        }
        return Err(SocketError::Io(err));
    }
    Ok(())
}
