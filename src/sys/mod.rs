//! Platform layer: non-blocking syscall wrappers, the readiness waiter and
//! native thread signalling.

pub mod net;
pub mod poll;
pub mod thread;

pub use poll::Interest;

/// Outcome of a single non-blocking syscall attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The syscall made progress: bytes transferred, or `1` for calls that
    /// report plain completion (connect).
    Ready(usize),
    /// The syscall would have blocked.
    WouldBlock,
    /// The syscall was interrupted by a signal.
    Interrupted,
    /// End of stream.
    Eof,
}

impl IoStatus {
    /// True when the attempt should be retried after a park.
    #[must_use]
    pub const fn okay_to_retry(self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted)
    }

    /// Bytes transferred, if the attempt made progress.
    #[must_use]
    pub const fn ready(self) -> Option<usize> {
        match self {
            Self::Ready(n) => Some(n),
            _ => None,
        }
    }
}
