//! Kernel I/O adapter: thin synchronous wrappers over the socket syscalls.
//!
//! Every wrapper returns either progress or a small status
//! ([`IoStatus::WouldBlock`], [`IoStatus::Interrupted`], [`IoStatus::Eof`])
//! so the operation drivers can decide whether to park and retry. Sockets are
//! created dual-stack (`AF_INET6` with `IPV6_V6ONLY` off) when IPv6 is
//! available; IPv4 addresses are converted to their v4-mapped-v6 form on the
//! way into the kernel and unmapped on the way out.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::ptr;
use std::sync::OnceLock;

use crate::error::{Result, SocketError};
use crate::MAX_BUFFER_SIZE;

use super::IoStatus;

/// Outcome of a single accept attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStatus {
    /// A connection was accepted.
    Accepted {
        /// The new descriptor, still in the listener's blocking mode.
        fd: RawFd,
        /// The peer address.
        remote: SocketAddr,
    },
    /// The accept would have blocked.
    WouldBlock,
    /// The accept was interrupted by a signal.
    Interrupted,
}

impl AcceptStatus {
    /// True when the attempt should be retried after a park.
    #[must_use]
    pub const fn okay_to_retry(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted)
    }
}

// macOS has no MSG_NOSIGNAL; sockets are created with SO_NOSIGPIPE instead
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(any(target_os = "macos", target_os = "ios"))]
const SEND_FLAGS: libc::c_int = 0;

fn cvt(ret: libc::c_int) -> Result<libc::c_int> {
    if ret < 0 {
        Err(SocketError::Io(io::Error::last_os_error()))
    } else {
        Ok(ret)
    }
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Whether sockets on this host are created as dual-stack IPv6 sockets.
///
/// Probed once: if an `AF_INET6` socket can be created, every socket this
/// crate allocates uses that family.
pub fn is_ipv6_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_STREAM, 0) };
        if fd >= 0 {
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    })
}

/// True on platforms whose bind is inherently exclusive, requiring
/// `SO_REUSEADDR` to be emulated at the endpoint level. Constant-false on the
/// Unix targets this crate supports.
#[must_use]
pub const fn use_exclusive_bind() -> bool {
    false
}

/// Whether the kernel supports `SO_REUSEPORT`.
#[must_use]
pub const fn is_reuse_port_available() -> bool {
    cfg!(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    ))
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) })?;
    Ok(())
}

/// Allocates a socket in blocking mode.
pub fn socket(stream: bool) -> Result<RawFd> {
    let family = if is_ipv6_available() {
        libc::AF_INET6
    } else {
        libc::AF_INET
    };
    let ty = if stream {
        libc::SOCK_STREAM
    } else {
        libc::SOCK_DGRAM
    };
    let fd = cvt(unsafe { libc::socket(family, ty, 0) })?;
    if let Err(err) = configure_new_socket(fd, family) {
        unsafe { libc::close(fd) };
        return Err(err);
    }
    Ok(fd)
}

/// Allocates the listener variant of a socket, in blocking mode.
pub fn server_socket() -> Result<RawFd> {
    socket(true)
}

fn configure_new_socket(fd: RawFd, family: libc::c_int) -> Result<()> {
    set_cloexec(fd)?;
    if family == libc::AF_INET6 {
        // dual-stack; a kernel that refuses is left v6-only
        let _ = set_int_option(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 0);
    }
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;
    Ok(())
}

fn to_sockaddr(addr: IpAddr, port: u16) -> Result<(libc::sockaddr_storage, libc::socklen_t)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    if is_ipv6_available() {
        let v6 = match addr {
            // the v4 wildcard must become the v6 wildcard, not ::ffff:0.0.0.0,
            // or a dual-stack bind would only cover the v4 side
            IpAddr::V4(v4) if v4.is_unspecified() => Ipv6Addr::UNSPECIFIED,
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        // SAFETY: sockaddr_in6 fits in sockaddr_storage and the storage is
        // zeroed, which covers platform-specific fields such as sin6_len.
        let sin6 = unsafe { &mut *ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in6>() };
        sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        sin6.sin6_port = port.to_be();
        sin6.sin6_addr.s6_addr = v6.octets();
        Ok((storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t))
    } else {
        let IpAddr::V4(v4) = addr else {
            return Err(SocketError::BadAddress(
                "IPv6 address on an IPv4-only platform",
            ));
        };
        // SAFETY: sockaddr_in fits in sockaddr_storage; storage is zeroed.
        let sin = unsafe { &mut *ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in>() };
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_port = port.to_be();
        sin.sin_addr.s_addr = u32::from(v4).to_be();
        Ok((storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t))
    }
}

fn from_sockaddr(storage: &libc::sockaddr_storage) -> Result<SocketAddr> {
    match libc::c_int::from(storage.ss_family) {
        libc::AF_INET => {
            // SAFETY: the kernel reported AF_INET, so the storage holds a
            // sockaddr_in.
            let sin = unsafe { &*ptr::addr_of!(*storage).cast::<libc::sockaddr_in>() };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Ok(SocketAddr::new(IpAddr::V4(ip), u16::from_be(sin.sin_port)))
        }
        libc::AF_INET6 => {
            // SAFETY: as above, for sockaddr_in6.
            let sin6 = unsafe { &*ptr::addr_of!(*storage).cast::<libc::sockaddr_in6>() };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let ip = match ip.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(ip),
            };
            Ok(SocketAddr::new(ip, u16::from_be(sin6.sin6_port)))
        }
        _ => Err(SocketError::BadAddress("unsupported address family")),
    }
}

/// Binds the descriptor to a local address.
pub fn bind(fd: RawFd, addr: IpAddr, port: u16) -> Result<()> {
    let (storage, len) = to_sockaddr(addr, port)?;
    cvt(unsafe { libc::bind(fd, ptr::addr_of!(storage).cast(), len) })?;
    Ok(())
}

/// Starts listening with the given backlog.
pub fn listen(fd: RawFd, backlog: i32) -> Result<()> {
    cvt(unsafe { libc::listen(fd, backlog) })?;
    Ok(())
}

/// Starts or completes a connect.
///
/// Returns `Ready(1)` when the connection is established, `WouldBlock` when a
/// non-blocking connect is in progress, `Interrupted` when a blocking connect
/// was interrupted by a signal.
pub fn connect(fd: RawFd, addr: IpAddr, port: u16) -> Result<IoStatus> {
    let (storage, len) = to_sockaddr(addr, port)?;
    let ret = unsafe { libc::connect(fd, ptr::addr_of!(storage).cast(), len) };
    if ret == 0 {
        return Ok(IoStatus::Ready(1));
    }
    match last_errno() {
        libc::EINPROGRESS => Ok(IoStatus::WouldBlock),
        libc::EINTR => Ok(IoStatus::Interrupted),
        libc::EISCONN => Ok(IoStatus::Ready(1)),
        _ => Err(SocketError::Io(io::Error::last_os_error())),
    }
}

/// Checks whether a non-blocking connect has finished, without blocking.
///
/// Returns `Ok(true)` once the connection is established, `Ok(false)` while
/// it is still in progress, and the kernel-reported failure otherwise.
pub fn poll_connect_now(fd: RawFd) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut pfd, 1, 0) };
    if n < 0 {
        if last_errno() == libc::EINTR {
            return Ok(false);
        }
        return Err(SocketError::Io(io::Error::last_os_error()));
    }
    if n == 0 {
        return Ok(false);
    }
    let err = get_int_option(fd, libc::SOL_SOCKET, libc::SO_ERROR)?;
    if err != 0 {
        return Err(SocketError::Io(io::Error::from_raw_os_error(err)));
    }
    if pfd.revents & libc::POLLHUP != 0 && pfd.revents & libc::POLLOUT == 0 {
        // hung up before the handshake completed and SO_ERROR was consumed
        return Err(SocketError::Io(io::Error::from_raw_os_error(
            libc::ECONNREFUSED,
        )));
    }
    Ok(true)
}

/// Accepts one connection, reporting the new descriptor and peer address.
pub fn accept(fd: RawFd) -> Result<AcceptStatus> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let newfd = unsafe { libc::accept(fd, ptr::addr_of_mut!(storage).cast(), &mut len) };
    if newfd < 0 {
        return match last_errno() {
            libc::EAGAIN => Ok(AcceptStatus::WouldBlock),
            #[allow(unreachable_patterns)] // EWOULDBLOCK == EAGAIN on most targets
            libc::EWOULDBLOCK => Ok(AcceptStatus::WouldBlock),
            libc::EINTR => Ok(AcceptStatus::Interrupted),
            _ => Err(SocketError::Io(io::Error::last_os_error())),
        };
    }
    if let Err(err) = set_cloexec(newfd) {
        unsafe { libc::close(newfd) };
        return Err(err);
    }
    let remote = match from_sockaddr(&storage) {
        Ok(remote) => remote,
        Err(err) => {
            unsafe { libc::close(newfd) };
            return Err(err);
        }
    };
    Ok(AcceptStatus::Accepted { fd: newfd, remote })
}

/// Reads into the caller's buffer, at most [`MAX_BUFFER_SIZE`] bytes.
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<IoStatus> {
    let len = buf.len().min(MAX_BUFFER_SIZE);
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), len) };
    if n > 0 {
        return Ok(IoStatus::Ready(n as usize));
    }
    if n == 0 {
        return Ok(IoStatus::Eof);
    }
    match last_errno() {
        libc::EAGAIN => Ok(IoStatus::WouldBlock),
        #[allow(unreachable_patterns)]
        libc::EWOULDBLOCK => Ok(IoStatus::WouldBlock),
        libc::EINTR => Ok(IoStatus::Interrupted),
        libc::ECONNRESET => Err(SocketError::ConnectionReset),
        _ => Err(SocketError::Io(io::Error::last_os_error())),
    }
}

/// Writes from the caller's buffer, at most [`MAX_BUFFER_SIZE`] bytes.
pub fn write(fd: RawFd, buf: &[u8]) -> Result<IoStatus> {
    let len = buf.len().min(MAX_BUFFER_SIZE);
    let n = unsafe { libc::send(fd, buf.as_ptr().cast(), len, SEND_FLAGS) };
    if n >= 0 {
        return Ok(IoStatus::Ready(n as usize));
    }
    match last_errno() {
        libc::EAGAIN => Ok(IoStatus::WouldBlock),
        #[allow(unreachable_patterns)]
        libc::EWOULDBLOCK => Ok(IoStatus::WouldBlock),
        libc::EINTR => Ok(IoStatus::Interrupted),
        _ => Err(SocketError::Io(io::Error::last_os_error())),
    }
}

/// Sends one out-of-band byte.
pub fn send_oob(fd: RawFd, byte: u8) -> Result<IoStatus> {
    let n = unsafe {
        libc::send(
            fd,
            ptr::addr_of!(byte).cast(),
            1,
            libc::MSG_OOB | SEND_FLAGS,
        )
    };
    if n >= 0 {
        return Ok(IoStatus::Ready(n as usize));
    }
    match last_errno() {
        libc::EAGAIN => Ok(IoStatus::WouldBlock),
        #[allow(unreachable_patterns)]
        libc::EWOULDBLOCK => Ok(IoStatus::WouldBlock),
        libc::EINTR => Ok(IoStatus::Interrupted),
        _ => Err(SocketError::Io(io::Error::last_os_error())),
    }
}

/// Bytes that can be read without blocking.
pub fn available(fd: RawFd) -> Result<usize> {
    let mut n: libc::c_int = 0;
    cvt(unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut n) })?;
    Ok(n.max(0) as usize)
}

/// Half- or full-shutdown of the connection.
pub fn shutdown(fd: RawFd, how: Shutdown) -> Result<()> {
    let how = match how {
        Shutdown::Read => libc::SHUT_RD,
        Shutdown::Write => libc::SHUT_WR,
        Shutdown::Both => libc::SHUT_RDWR,
    };
    cvt(unsafe { libc::shutdown(fd, how) })?;
    Ok(())
}

/// The socket's local address as reported by the kernel.
pub fn local_address(fd: RawFd) -> Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    cvt(unsafe { libc::getsockname(fd, ptr::addr_of_mut!(storage).cast(), &mut len) })?;
    from_sockaddr(&storage)
}

/// Switches the descriptor between blocking and non-blocking mode.
pub fn configure_blocking(fd: RawFd, blocking: bool) -> Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    let flags = if blocking {
        flags & !libc::O_NONBLOCK
    } else {
        flags | libc::O_NONBLOCK
    };
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) })?;
    Ok(())
}

fn marker_fd() -> Result<RawFd> {
    // One end of a socketpair whose peer end was closed at init: reads on it
    // observe EOF, writes fail with EPIPE, pollers see it permanently ready.
    static MARKER: OnceLock<std::result::Result<RawFd, i32>> = OnceLock::new();
    let marker = MARKER.get_or_init(|| {
        let mut sv = [0 as libc::c_int; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, sv.as_mut_ptr()) };
        if rc < 0 {
            return Err(last_errno());
        }
        unsafe { libc::close(sv[1]) };
        let _ = set_cloexec(sv[0]);
        Ok(sv[0])
    });
    match marker {
        Ok(fd) => Ok(*fd),
        Err(errno) => Err(SocketError::Io(io::Error::from_raw_os_error(*errno))),
    }
}

/// Makes pending and future syscalls on the descriptor fail promptly without
/// releasing the descriptor number.
///
/// The half-dead marker socket is dup2'ed over `fd`: threads that retry a
/// syscall on the same number observe EOF or `EPIPE`, and parked pollers wake
/// immediately. The number itself stays reserved until the closer runs.
pub fn pre_close(fd: RawFd) -> Result<()> {
    let marker = marker_fd()?;
    cvt(unsafe { libc::dup2(marker, fd) })?;
    Ok(())
}

/// Releases the descriptor.
pub fn close(fd: RawFd) -> Result<()> {
    cvt(unsafe { libc::close(fd) })?;
    Ok(())
}

/// Reads an integer socket option.
pub fn get_int_option(fd: RawFd, level: libc::c_int, name: libc::c_int) -> Result<i32> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            ptr::addr_of_mut!(value).cast(),
            &mut len,
        )
    })?;
    Ok(value)
}

/// Writes an integer socket option.
pub fn set_int_option(fd: RawFd, level: libc::c_int, name: libc::c_int, value: i32) -> Result<()> {
    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            ptr::addr_of!(value).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

/// Reads a boolean socket option.
pub fn get_bool_option(fd: RawFd, level: libc::c_int, name: libc::c_int) -> Result<bool> {
    Ok(get_int_option(fd, level, name)? != 0)
}

/// Writes a boolean socket option.
pub fn set_bool_option(fd: RawFd, level: libc::c_int, name: libc::c_int, value: bool) -> Result<()> {
    set_int_option(fd, level, name, i32::from(value))
}

/// Reads `SO_LINGER`: `-1` when disabled, the interval in seconds otherwise.
pub fn get_linger(fd: RawFd) -> Result<i32> {
    let mut value: libc::linger = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::linger>() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            ptr::addr_of_mut!(value).cast(),
            &mut len,
        )
    })?;
    if value.l_onoff == 0 {
        Ok(-1)
    } else {
        Ok(value.l_linger as i32)
    }
}

/// Writes `SO_LINGER`: a negative interval disables lingering.
pub fn set_linger(fd: RawFd, interval: i32) -> Result<()> {
    let value = libc::linger {
        l_onoff: libc::c_int::from(interval >= 0),
        l_linger: interval.max(0) as _,
    };
    cvt(unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            ptr::addr_of!(value).cast(),
            mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

/// Writes the IP traffic class / type-of-service byte.
pub fn set_traffic_class(fd: RawFd, value: i32) -> Result<()> {
    if is_ipv6_available() {
        set_int_option(fd, libc::IPPROTO_IPV6, libc::IPV6_TCLASS, value)
    } else {
        set_int_option(fd, libc::IPPROTO_IP, libc::IP_TOS, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_round_trip_v4() {
        let addr: IpAddr = "127.0.0.1".parse().expect("addr");
        let (storage, _) = to_sockaddr(addr, 8080).expect("to_sockaddr");
        let back = from_sockaddr(&storage).expect("from_sockaddr");
        assert_eq!(back.ip(), addr);
        assert_eq!(back.port(), 8080);
    }

    #[test]
    fn v4_wildcard_maps_to_v6_wildcard() {
        if !is_ipv6_available() {
            return;
        }
        let (storage, _) =
            to_sockaddr(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).expect("to_sockaddr");
        let back = from_sockaddr(&storage).expect("from_sockaddr");
        assert_eq!(back.ip(), IpAddr::V6(Ipv6Addr::UNSPECIFIED));
    }

    #[test]
    fn socket_is_blocking_and_closeable() {
        let fd = socket(true).expect("socket");
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_eq!(flags & libc::O_NONBLOCK, 0, "new sockets must be blocking");
        close(fd).expect("close");
    }

    #[test]
    fn preclose_makes_reads_observe_eof() {
        let fd = socket(true).expect("socket");
        pre_close(fd).expect("pre_close");
        let mut buf = [0u8; 8];
        match read(fd, &mut buf).expect("read after preclose") {
            IoStatus::Eof => {}
            other => panic!("expected EOF after preclose, got {other:?}"),
        }
        close(fd).expect("close");
    }

    #[test]
    fn linger_round_trip() {
        let fd = socket(true).expect("socket");
        assert_eq!(get_linger(fd).expect("get"), -1);
        set_linger(fd, 5).expect("set");
        assert_eq!(get_linger(fd).expect("get"), 5);
        set_linger(fd, -1).expect("disable");
        assert_eq!(get_linger(fd).expect("get"), -1);
        close(fd).expect("close");
    }
}
