//! Blocking stream-socket endpoints driven over non-blocking kernel sockets.
//!
//! This crate implements the classic blocking-socket surface
//! (`create`/`bind`/`listen`/`accept`/`connect`/`read`/`write`/`shutdown`/
//! `close`, socket options, byte-stream views) on top of a kernel socket that
//! is switched to non-blocking mode as soon as a timeout is in effect. The
//! observable semantics of a blocking socket are preserved: reads and accepts
//! honor `SO_TIMEOUT`, a `close` from another thread unblocks in-flight I/O
//! promptly, half-shutdown works in both directions, and error reporting
//! matches what callers of the legacy surface expect.
//!
//! # Architecture
//!
//! ```text
//! caller ──> operation driver ──> role-lock ──> state-lock ──┐
//!                │                                           │
//!                └── try syscall ⇄ readiness waiter ──> state-lock epilogue
//!
//! closer (any thread / Drop) ──> state-lock only
//! ```
//!
//! An [`endpoint::Endpoint`] owns exactly one descriptor at a time. Two
//! reentrant role-locks serialize the read side (read, accept, connect) and
//! the write side; a state-lock guards the lifecycle metadata and is never
//! held across a blocking syscall. `close` preempts blocked operations by
//! precluding further syscalls on the descriptor and signalling the recorded
//! native threads, then drains them before closing the descriptor.
//!
//! # Example
//!
//! ```ignore
//! use plainsock::{Endpoint, options, OptionValue};
//!
//! let listener = Endpoint::new(true);
//! listener.create(true)?;
//! listener.bind("127.0.0.1".parse()?, 0)?;
//! listener.listen(0)?;
//!
//! let client = Endpoint::new(false);
//! client.create(true)?;
//! client.set_option(options::SO_TIMEOUT, OptionValue::Int(250))?;
//! client.connect(("127.0.0.1".parse()?, listener.local_port()).into(), 0)?;
//! ```
//!
//! This crate targets Unix platforms.

mod closer;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod stream;
pub mod sys;

pub use endpoint::options::{self, OptionValue};
pub use endpoint::state::State;
pub use endpoint::{Endpoint, RemoteAddr};
pub use error::{Result, SocketError};
pub use stream::{ReadStream, WriteStream};

/// Largest number of bytes moved by a single kernel read or write.
///
/// Larger transfers are split into chunks of at most this size so no single
/// syscall pins an oversized buffer.
pub const MAX_BUFFER_SIZE: usize = 128 * 1024;
