//! Legacy socket-option surface.
//!
//! Options are addressed by the historical integer identifiers and carry a
//! small sum-type value. Where the kernel contract differs from the exposed
//! one, the endpoint emulates: `SO_REUSEADDR` is tracked locally on
//! exclusive-bind platforms, `IP_TOS` is cached so reads never need a
//! syscall, and `SO_LINGER` keeps the boolean-false/`-1` disabled convention.

use std::net::IpAddr;
use std::sync::atomic::Ordering;

use crate::error::{Result, SocketError};
use crate::sys;

use super::Endpoint;

/// `TCP_NODELAY`.
pub const TCP_NODELAY: i32 = 0x0001;
/// `IP_TOS` traffic-class byte.
pub const IP_TOS: i32 = 0x0003;
/// `SO_REUSEADDR`.
pub const SO_REUSEADDR: i32 = 0x0004;
/// `SO_KEEPALIVE`.
pub const SO_KEEPALIVE: i32 = 0x0008;
/// `SO_REUSEPORT`.
pub const SO_REUSEPORT: i32 = 0x000E;
/// Read-only local bind address.
pub const SO_BINDADDR: i32 = 0x000F;
/// `SO_LINGER`; boolean `false` or `-1` disables.
pub const SO_LINGER: i32 = 0x0080;
/// Send buffer size.
pub const SO_SNDBUF: i32 = 0x1001;
/// Receive buffer size.
pub const SO_RCVBUF: i32 = 0x1002;
/// Out-of-band data inline.
pub const SO_OOBINLINE: i32 = 0x1003;
/// Read/accept/connect timeout in milliseconds; 0 disables.
pub const SO_TIMEOUT: i32 = 0x1006;

/// Value carried by [`Endpoint::get_option`] / [`Endpoint::set_option`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    /// A boolean option.
    Bool(bool),
    /// An integer option.
    Int(i32),
    /// An address, only ever returned (for `SO_BINDADDR`).
    Addr(IpAddr),
}

impl OptionValue {
    fn as_bool(self, desc: &str) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            _ => Err(SocketError::BadArgument(format!("Bad value for {desc}"))),
        }
    }

    fn as_int(self, desc: &str) -> Result<i32> {
        match self {
            Self::Int(i) => Ok(i),
            _ => Err(SocketError::BadArgument(format!("Bad value for {desc}"))),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl Endpoint {
    /// The option identifiers this endpoint supports.
    #[must_use]
    pub fn supported_options(&self) -> Vec<i32> {
        let mut options = vec![
            TCP_NODELAY,
            IP_TOS,
            SO_REUSEADDR,
            SO_KEEPALIVE,
            SO_BINDADDR,
            SO_LINGER,
            SO_SNDBUF,
            SO_RCVBUF,
            SO_OOBINLINE,
            SO_TIMEOUT,
        ];
        if sys::net::is_reuse_port_available() {
            options.push(SO_REUSEPORT);
        }
        options
    }

    /// Sets a socket option.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`] on a closed endpoint,
    /// [`SocketError::BadArgument`] for a wrong value type, an invalid value
    /// or an unknown identifier, [`SocketError::Unsupported`] where the
    /// kernel lacks the option, or the kernel error with its message
    /// preserved.
    pub fn set_option(&self, opt: i32, value: OptionValue) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;
        match opt {
            SO_LINGER => {
                // boolean false disables; an integer interval enables
                let interval = match value {
                    OptionValue::Bool(false) => -1,
                    other => {
                        let interval = other.as_int("SO_LINGER")?;
                        if interval < 0 {
                            return Err(SocketError::BadArgument(
                                "Bad value for SO_LINGER".into(),
                            ));
                        }
                        interval
                    }
                };
                sys::net::set_linger(inner.fd, interval)
            }
            SO_TIMEOUT => {
                let millis = value.as_int("SO_TIMEOUT")?;
                if millis < 0 {
                    return Err(SocketError::BadArgument("timeout < 0".into()));
                }
                self.timeout.store(millis as u32, Ordering::Release);
                Ok(())
            }
            IP_TOS => {
                let tos = value.as_int("IP_TOS")?;
                sys::net::set_traffic_class(inner.fd, tos)?;
                inner.traffic_class = tos;
                Ok(())
            }
            TCP_NODELAY => {
                let on = value.as_bool("TCP_NODELAY")?;
                sys::net::set_bool_option(inner.fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, on)
            }
            SO_SNDBUF => {
                let size = value.as_int("SO_SNDBUF")?;
                if size <= 0 {
                    return Err(SocketError::BadArgument("SO_SNDBUF <= 0".into()));
                }
                sys::net::set_int_option(inner.fd, libc::SOL_SOCKET, libc::SO_SNDBUF, size)
            }
            SO_RCVBUF => {
                let size = value.as_int("SO_RCVBUF")?;
                if size <= 0 {
                    return Err(SocketError::BadArgument("SO_RCVBUF <= 0".into()));
                }
                sys::net::set_int_option(inner.fd, libc::SOL_SOCKET, libc::SO_RCVBUF, size)
            }
            SO_KEEPALIVE => {
                let on = value.as_bool("SO_KEEPALIVE")?;
                sys::net::set_bool_option(inner.fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, on)
            }
            SO_OOBINLINE => {
                let on = value.as_bool("SO_OOBINLINE")?;
                sys::net::set_bool_option(inner.fd, libc::SOL_SOCKET, libc::SO_OOBINLINE, on)
            }
            SO_REUSEADDR => {
                let on = value.as_bool("SO_REUSEADDR")?;
                if sys::net::use_exclusive_bind() {
                    inner.reuse_addr = on;
                    Ok(())
                } else {
                    sys::net::set_bool_option(inner.fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on)
                }
            }
            SO_REUSEPORT => {
                if !sys::net::is_reuse_port_available() {
                    return Err(SocketError::Unsupported("SO_REUSEPORT not supported"));
                }
                let on = value.as_bool("SO_REUSEPORT")?;
                sys::net::set_bool_option(inner.fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, on)
            }
            _ => Err(SocketError::BadArgument(format!("Unknown option {opt}"))),
        }
    }

    /// Reads a socket option.
    ///
    /// # Errors
    ///
    /// As [`set_option`](Self::set_option).
    pub fn get_option(&self, opt: i32) -> Result<OptionValue> {
        let inner = self.inner.lock();
        self.ensure_open()?;
        match opt {
            SO_TIMEOUT => Ok(OptionValue::Int(
                self.timeout.load(Ordering::Acquire) as i32
            )),
            TCP_NODELAY => Ok(OptionValue::Bool(sys::net::get_bool_option(
                inner.fd,
                libc::IPPROTO_TCP,
                libc::TCP_NODELAY,
            )?)),
            SO_OOBINLINE => Ok(OptionValue::Bool(sys::net::get_bool_option(
                inner.fd,
                libc::SOL_SOCKET,
                libc::SO_OOBINLINE,
            )?)),
            SO_LINGER => {
                // boolean false when disabled, the interval when enabled
                let interval = sys::net::get_linger(inner.fd)?;
                if interval == -1 {
                    Ok(OptionValue::Bool(false))
                } else {
                    Ok(OptionValue::Int(interval))
                }
            }
            SO_REUSEADDR => {
                if sys::net::use_exclusive_bind() {
                    Ok(OptionValue::Bool(inner.reuse_addr))
                } else {
                    Ok(OptionValue::Bool(sys::net::get_bool_option(
                        inner.fd,
                        libc::SOL_SOCKET,
                        libc::SO_REUSEADDR,
                    )?))
                }
            }
            SO_BINDADDR => Ok(OptionValue::Addr(
                sys::net::local_address(inner.fd)?.ip(),
            )),
            SO_SNDBUF => Ok(OptionValue::Int(sys::net::get_int_option(
                inner.fd,
                libc::SOL_SOCKET,
                libc::SO_SNDBUF,
            )?)),
            SO_RCVBUF => Ok(OptionValue::Int(sys::net::get_int_option(
                inner.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
            )?)),
            IP_TOS => Ok(OptionValue::Int(inner.traffic_class)),
            SO_KEEPALIVE => Ok(OptionValue::Bool(sys::net::get_bool_option(
                inner.fd,
                libc::SOL_SOCKET,
                libc::SO_KEEPALIVE,
            )?)),
            SO_REUSEPORT => {
                if !sys::net::is_reuse_port_available() {
                    return Err(SocketError::Unsupported("SO_REUSEPORT not supported"));
                }
                Ok(OptionValue::Bool(sys::net::get_bool_option(
                    inner.fd,
                    libc::SOL_SOCKET,
                    libc::SO_REUSEPORT,
                )?))
            }
            _ => Err(SocketError::BadArgument(format!("Unknown option {opt}"))),
        }
    }
}
