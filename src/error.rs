//! Socket-layer error taxonomy.
//!
//! Errors are explicit and typed so callers can match on the failure kind
//! instead of parsing messages. Lifecycle violations, pre-flight address
//! checks, timeouts and kernel-level failures are distinct variants; the
//! message text mirrors the legacy socket surface ("Socket closed",
//! "Read timed out", "Connection reset", ...).

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SocketError>;

/// The errors a socket endpoint can report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SocketError {
    /// The operation was invoked after `close`, or raced with it.
    #[error("Socket closed")]
    Closed,

    /// The endpoint is not connected yet.
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called on an endpoint that is already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// `connect` was called while another connect is still in flight.
    #[error("Connection in progress")]
    ConnectionInProgress,

    /// `bind` was called on an endpoint that already has a local port.
    #[error("Already bound")]
    AlreadyBound,

    /// `listen` or `accept` was called before `bind`.
    #[error("Not bound")]
    NotBound,

    /// `accept` was called on a datagram endpoint.
    #[error("Not a stream socket")]
    NotStream,

    /// Pre-flight address check: the target host was never resolved.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// Pre-flight address check: the address cannot be expressed on this
    /// endpoint (e.g. an IPv6 target on an IPv4-only platform).
    #[error("{0}")]
    BadAddress(&'static str),

    /// A deadline elapsed during connect, accept or read.
    #[error("{0}")]
    Timeout(&'static str),

    /// The peer reset the connection. Sticky on the read-stream view.
    #[error("Connection reset")]
    ConnectionReset,

    /// A connect attempt against a specific peer failed.
    #[error("connect to {peer} failed: {source}")]
    Connect {
        /// The address the endpoint was connecting to.
        peer: SocketAddr,
        /// The underlying failure.
        #[source]
        source: Box<SocketError>,
    },

    /// An option value or argument failed validation.
    #[error("{0}")]
    BadArgument(String),

    /// The requested capability is not available on this platform.
    #[error("{0}")]
    Unsupported(&'static str),

    /// Any other kernel-level failure, message preserved.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SocketError {
    /// True when the error reports an elapsed deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// True when the error reports a closed endpoint.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Decorates a connect failure with the peer address.
    ///
    /// Lifecycle errors stay undecorated so callers can match on them; only
    /// kernel-level failures gain the peer context.
    pub(crate) fn for_connect(self, peer: SocketAddr) -> Self {
        match self {
            err @ (Self::Closed
            | Self::Timeout(_)
            | Self::UnknownHost(_)
            | Self::AlreadyConnected
            | Self::ConnectionInProgress
            | Self::BadArgument(_)) => err,
            other => Self::Connect {
                peer,
                source: Box::new(other),
            },
        }
    }
}

impl From<SocketError> for io::Error {
    fn from(err: SocketError) -> io::Error {
        match err {
            SocketError::Io(inner) => inner,
            other => {
                let kind = match &other {
                    SocketError::Timeout(_) => io::ErrorKind::TimedOut,
                    SocketError::ConnectionReset => io::ErrorKind::ConnectionReset,
                    SocketError::Closed | SocketError::NotConnected => {
                        io::ErrorKind::NotConnected
                    }
                    SocketError::BadArgument(_) | SocketError::BadAddress(_) => {
                        io::ErrorKind::InvalidInput
                    }
                    SocketError::Unsupported(_) => io::ErrorKind::Unsupported,
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_legacy_surface() {
        assert_eq!(SocketError::Closed.to_string(), "Socket closed");
        assert_eq!(SocketError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            SocketError::Timeout("Read timed out").to_string(),
            "Read timed out"
        );
        assert_eq!(SocketError::ConnectionReset.to_string(), "Connection reset");
    }

    #[test]
    fn connect_decoration_skips_lifecycle_errors() {
        let peer: SocketAddr = "192.0.2.1:80".parse().expect("addr");

        let timeout = SocketError::Timeout("Connect timed out").for_connect(peer);
        assert!(timeout.is_timeout());

        let closed = SocketError::Closed.for_connect(peer);
        assert!(closed.is_closed());

        let io = SocketError::Io(io::Error::from_raw_os_error(libc::ECONNREFUSED));
        match io.for_connect(peer) {
            SocketError::Connect { peer: p, .. } => assert_eq!(p, peer),
            other => panic!("expected decorated error, got {other:?}"),
        }
    }

    #[test]
    fn io_conversion_preserves_kind() {
        let err: io::Error = SocketError::Timeout("Accept timed out").into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let err: io::Error = SocketError::ConnectionReset.into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
