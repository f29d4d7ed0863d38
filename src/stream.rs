//! Byte-stream views over an endpoint's read and write sides.
//!
//! The views adapt the byte-array `read`/`write` primitives to
//! `std::io::Read` / `std::io::Write`. The read view latches EOF and
//! connection-reset conditions so repeated reads never hit the kernel again;
//! the write view chunks large buffers and always consumes them fully.
//! Closing either view closes the endpoint itself.

use std::io::{self, Read, Write};

use crate::endpoint::Endpoint;
use crate::error::SocketError;
use crate::MAX_BUFFER_SIZE;

/// Read side of an endpoint.
///
/// Not thread-safe; the endpoint's read role-lock already serializes readers,
/// and the sticky flags belong to this view alone.
pub struct ReadStream<'a> {
    endpoint: &'a Endpoint,
    /// Sticky: end of stream was observed.
    eof: bool,
    /// Sticky: the connection was reset.
    reset: bool,
}

impl<'a> ReadStream<'a> {
    pub(crate) fn new(endpoint: &'a Endpoint) -> Self {
        Self {
            endpoint,
            eof: false,
            reset: false,
        }
    }

    /// Bytes that can be read without blocking.
    pub fn available(&self) -> io::Result<usize> {
        self.endpoint.available().map_err(io::Error::from)
    }

    /// Closes the underlying endpoint.
    pub fn close(&mut self) -> io::Result<()> {
        self.endpoint.close().map_err(io::Error::from)
    }
}

impl Read for ReadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        if self.reset {
            return Err(SocketError::ConnectionReset.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(MAX_BUFFER_SIZE);
        match self.endpoint.read(&mut buf[..len]) {
            Ok(0) => {
                self.eof = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(SocketError::ConnectionReset) => {
                self.reset = true;
                Err(SocketError::ConnectionReset.into())
            }
            // timeouts pass through unchanged; everything else keeps its
            // message under an io::Error wrapper
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for ReadStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream")
            .field("eof", &self.eof)
            .field("reset", &self.reset)
            .finish_non_exhaustive()
    }
}

/// Write side of an endpoint.
///
/// Writes are chunked to at most [`MAX_BUFFER_SIZE`] bytes per underlying
/// call and loop until the whole buffer is consumed.
pub struct WriteStream<'a> {
    endpoint: &'a Endpoint,
}

impl<'a> WriteStream<'a> {
    pub(crate) fn new(endpoint: &'a Endpoint) -> Self {
        Self { endpoint }
    }

    /// Closes the underlying endpoint.
    pub fn close(&mut self) -> io::Result<()> {
        self.endpoint.close().map_err(io::Error::from)
    }
}

impl Write for WriteStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pos = 0;
        while pos < buf.len() {
            let end = buf.len().min(pos + MAX_BUFFER_SIZE);
            let n = self
                .endpoint
                .write(&buf[pos..end])
                .map_err(io::Error::from)?;
            pos += n;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for WriteStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteStream").finish_non_exhaustive()
    }
}
