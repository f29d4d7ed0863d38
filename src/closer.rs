//! One-shot descriptor closer.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::hooks::ResourceCounter;
use crate::sys;

/// Closes an endpoint's descriptor exactly once.
///
/// The closer runs either from an explicit `close` or from the endpoint's
/// `Drop`, whichever comes first; a compare-and-set on `closed` guarantees
/// the kernel close happens at most once per descriptor. Ownership transfer
/// (`accept` into a target, `copy_to`) disables the source's closer instead
/// of running it, so the descriptor survives the transfer.
pub(crate) struct FdCloser {
    fd: RawFd,
    stream: bool,
    closed: AtomicBool,
    resources: Arc<dyn ResourceCounter>,
}

impl FdCloser {
    pub(crate) fn new(fd: RawFd, stream: bool, resources: Arc<dyn ResourceCounter>) -> Self {
        Self {
            fd,
            stream,
            closed: AtomicBool::new(false),
            resources,
        }
    }

    /// Closes the descriptor unless the closer already ran or was disabled.
    ///
    /// Close failures are swallowed; the attempt still counts as done and the
    /// datagram counter is still notified.
    pub(crate) fn run(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(err) = sys::net::close(self.fd) {
                tracing::debug!(fd = self.fd, error = %err, "descriptor close failed");
            }
            if !self.stream {
                self.resources.after_udp_close();
            }
        }
    }

    /// Marks the closer as done without closing the descriptor.
    ///
    /// Returns false when the closer already ran.
    pub(crate) fn disable(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for FdCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdCloser")
            .field("fd", &self.fd)
            .field("stream", &self.stream)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
