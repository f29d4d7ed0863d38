//! Blocking stream-socket endpoint over a non-blocking kernel socket.
//!
//! An [`Endpoint`] presents the legacy blocking surface while the descriptor
//! underneath is switched to non-blocking mode as soon as a timeout is in
//! effect. Operations that cannot complete immediately loop: try the syscall,
//! park on the readiness waiter, retry.
//!
//! # Locking
//!
//! Two reentrant role-locks serialize the read side (`read`, `accept`,
//! `connect` are mutually exclusive by design) and the write side. The
//! state-lock guards the lifecycle metadata, the reader/writer thread slots
//! and the addresses; it is always acquired after a role-lock and never held
//! across a potentially blocking syscall or park.
//!
//! # Close protocol
//!
//! `close` never takes a role-lock (a blocked operation holds it). Instead it
//! moves the endpoint to `Closing` under the state-lock, precludes further
//! syscalls on the descriptor, signals the recorded reader/writer threads,
//! waits on the state-lock until both thread slots are clear, then runs the
//! one-shot closer and settles in `Closed`. When `close` returns, no blocked
//! I/O on this endpoint is still pending and no later operation can succeed.

pub mod options;
pub mod state;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, ReentrantMutex};

use crate::closer::FdCloser;
use crate::error::{Result, SocketError};
use crate::hooks::{BoundaryFields, Hooks};
use crate::stream::{ReadStream, WriteStream};
use crate::sys::net::AcceptStatus;
use crate::sys::thread::NativeId;
use crate::sys::{self, Interest, IoStatus};

use state::State;

/// Backlog applied when `listen` is called with a non-positive value.
const DEFAULT_BACKLOG: i32 = 50;

/// Connect target: an already-resolved address, or a host name that was never
/// resolved. Name resolution lives outside this crate; unresolved targets
/// fail fast with [`SocketError::UnknownHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAddr {
    /// A resolved socket address.
    Resolved(SocketAddr),
    /// A host name that was never resolved.
    Unresolved {
        /// The unresolved host name.
        host: String,
        /// The target port.
        port: u16,
    },
}

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::Resolved(addr)
    }
}

impl From<(IpAddr, u16)> for RemoteAddr {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Self::Resolved(SocketAddr::new(ip, port))
    }
}

/// Metadata guarded by the state-lock.
struct Inner {
    fd: RawFd,
    stream: bool,
    closer: Option<Arc<FdCloser>>,
    /// Native id of the thread inside a read-side syscall, or 0.
    reader: NativeId,
    /// Native id of the thread inside a write-side syscall, or 0.
    writer: NativeId,
    /// Remote address once connected; the caller-supplied address once bound.
    address: Option<IpAddr>,
    /// Remote port once connected.
    port: u16,
    /// Kernel-chosen local port once bound; 0 beforehand.
    localport: u16,
    /// Emulated `SO_REUSEADDR` on exclusive-bind platforms.
    reuse_addr: bool,
    /// Cached `IP_TOS` so reads never need a syscall.
    traffic_class: i32,
}

/// A blocking stream-socket endpoint.
///
/// The endpoint is `Sync`: one thread may read while another writes, and any
/// thread may close. At most one read-side and one write-side operation are
/// in flight at a time.
pub struct Endpoint {
    /// True when this endpoint was created to listen.
    server: bool,
    /// Role-lock for read, accept and connect.
    read_lock: ReentrantMutex<()>,
    /// Role-lock for write and urgent data.
    write_lock: ReentrantMutex<()>,
    /// Current [`State`], readable without any lock.
    state: AtomicU8,
    /// Sticky: set once the descriptor is switched to non-blocking mode.
    non_blocking: AtomicBool,
    /// Read/accept/connect timeout in milliseconds; 0 means infinite.
    timeout: AtomicU32,
    /// Sticky half-shutdown flags.
    input_closed: AtomicBool,
    output_closed: AtomicBool,
    inner: Mutex<Inner>,
    /// Signalled by the begin/end helpers while the state is `Closing`.
    drained: Condvar,
    hooks: Hooks,
}

impl Endpoint {
    /// Creates an endpoint with default (no-op) hooks.
    ///
    /// `server` marks an endpoint born to listen; it chooses the listener
    /// variant of the descriptor at [`create`](Self::create) time.
    #[must_use]
    pub fn new(server: bool) -> Self {
        Self::with_hooks(server, Hooks::default())
    }

    /// Creates an endpoint with explicit collaborators.
    #[must_use]
    pub fn with_hooks(server: bool, hooks: Hooks) -> Self {
        Self {
            server,
            read_lock: ReentrantMutex::new(()),
            write_lock: ReentrantMutex::new(()),
            state: AtomicU8::new(State::New as u8),
            non_blocking: AtomicBool::new(false),
            timeout: AtomicU32::new(0),
            input_closed: AtomicBool::new(false),
            output_closed: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                fd: -1,
                stream: false,
                closer: None,
                reader: 0,
                writer: 0,
                address: None,
                port: 0,
                localport: 0,
                reuse_addr: false,
                traffic_class: 0,
            }),
            drained: Condvar::new(),
            hooks,
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Callers must hold the state-lock.
    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.state().is_open()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() >= State::Closing {
            return Err(SocketError::Closed);
        }
        Ok(())
    }

    fn ensure_open_and_connected(&self) -> Result<()> {
        let state = self.state();
        if state < State::Connected {
            return Err(SocketError::NotConnected);
        }
        if state > State::Connected {
            return Err(SocketError::Closed);
        }
        Ok(())
    }

    /// The local port once bound, 0 beforehand.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.inner.lock().localport
    }

    /// The remote address once connected.
    #[must_use]
    pub fn remote(&self) -> Option<SocketAddr> {
        let inner = self.inner.lock();
        inner.address.map(|ip| SocketAddr::new(ip, inner.port))
    }

    /// Switches the descriptor to non-blocking mode when a timeout is in
    /// effect. Once non-blocking, the descriptor stays non-blocking for the
    /// rest of its life.
    fn configure_non_blocking(&self, fd: RawFd, timeout_millis: u32) -> Result<()> {
        if timeout_millis > 0 && !self.non_blocking.load(Ordering::Acquire) {
            sys::net::configure_blocking(fd, false)?;
            self.non_blocking.store(true, Ordering::Release);
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Allocates the descriptor and moves to `Unconnected`.
    ///
    /// Only valid on a `New` endpoint. The descriptor starts in blocking
    /// mode. For a datagram endpoint the resource counter is consulted first
    /// and undone when the allocation fails.
    ///
    /// # Errors
    ///
    /// [`SocketError::BadArgument`] when the endpoint is past `New`, or any
    /// kernel error from the socket allocation.
    pub fn create(&self, stream: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.state() != State::New {
            return Err(SocketError::BadArgument("socket already created".into()));
        }
        if !stream {
            self.hooks.resources.before_udp_create()?;
        }
        let fd = if self.server {
            debug_assert!(stream, "listener endpoints are stream sockets");
            sys::net::server_socket()
        } else {
            sys::net::socket(stream)
        };
        let fd = match fd {
            Ok(fd) => fd,
            Err(err) => {
                if !stream {
                    self.hooks.resources.after_udp_close();
                }
                return Err(err);
            }
        };
        inner.fd = fd;
        inner.stream = stream;
        inner.closer = Some(Arc::new(FdCloser::new(
            fd,
            stream,
            self.hooks.resources.clone(),
        )));
        self.set_state(State::Unconnected);
        Ok(())
    }

    /// Binds to a local address and records the kernel-chosen port.
    ///
    /// The supplied `host` is recorded verbatim: callers of the legacy
    /// surface expect to read back `0.0.0.0` rather than the kernel's `::0`
    /// on a dual-stack socket.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`], [`SocketError::AlreadyBound`], or a kernel
    /// error from the bind.
    pub fn bind(&self, host: IpAddr, port: u16) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;
        if inner.localport != 0 {
            return Err(SocketError::AlreadyBound);
        }
        self.hooks.net.before_tcp_bind(inner.fd, host, port)?;
        sys::net::bind(inner.fd, host, port)?;
        inner.address = Some(host);
        inner.localport = sys::net::local_address(inner.fd)?.port();
        Ok(())
    }

    /// Starts listening. A backlog below 1 is clamped to 50.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`], [`SocketError::NotBound`], or a kernel error.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        let inner = self.inner.lock();
        self.ensure_open()?;
        if inner.localport == 0 {
            return Err(SocketError::NotBound);
        }
        sys::net::listen(inner.fd, if backlog < 1 { DEFAULT_BACKLOG } else { backlog })
    }

    // ========================================================================
    // Connect
    // ========================================================================

    /// Connects to a remote address, waiting at most `millis` milliseconds
    /// (`0` waits forever).
    ///
    /// Wildcard targets resolve to the loopback address of the same family.
    /// A failed connect closes the endpoint before the error surfaces; the
    /// endpoint is not reusable afterwards.
    ///
    /// # Errors
    ///
    /// [`SocketError::UnknownHost`] for unresolved targets,
    /// [`SocketError::Timeout`] when the deadline elapses,
    /// [`SocketError::Closed`] when a concurrent close wins, and kernel
    /// failures decorated with the peer address.
    pub fn connect(&self, remote: impl Into<RemoteAddr>, millis: u32) -> Result<()> {
        let (addr, port) = match remote.into() {
            RemoteAddr::Unresolved { host, .. } => return Err(SocketError::UnknownHost(host)),
            RemoteAddr::Resolved(sa) => {
                let ip = match sa.ip() {
                    IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    ip => ip,
                };
                (ip, sa.port())
            }
        };
        let peer = SocketAddr::new(addr, port);
        if let Err(err) = self.connect_inner(addr, port, millis) {
            tracing::debug!(peer = %peer, error = %err, "connect failed");
            let _ = self.close();
            return Err(err.for_connect(peer));
        }
        Ok(())
    }

    fn connect_inner(&self, addr: IpAddr, port: u16, millis: u32) -> Result<()> {
        let _guard = self.read_lock.lock();
        let fd = self.begin_connect(addr, port)?;
        let mut done = false;
        let body = self.connect_loop(fd, addr, port, millis, &mut done);
        let connected = done && self.is_open();
        let end = self.end_connect(connected);
        match (body, end) {
            (_, Err(err)) | (Err(err), Ok(())) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Single valid entry `Unconnected -> Connecting`; records the remote
    /// address and the reader thread slot.
    fn begin_connect(&self, addr: IpAddr, port: u16) -> Result<RawFd> {
        let mut inner = self.inner.lock();
        match self.state() {
            State::Unconnected => {}
            State::Connecting => return Err(SocketError::ConnectionInProgress),
            State::Connected => return Err(SocketError::AlreadyConnected),
            State::New => return Err(SocketError::BadArgument("socket not created".into())),
            State::Closing | State::Closed => return Err(SocketError::Closed),
        }
        self.set_state(State::Connecting);
        if inner.localport == 0 {
            self.hooks.net.before_tcp_connect(inner.fd, addr, port)?;
        }
        inner.address = Some(addr);
        inner.port = port;
        inner.reader = sys::thread::current();
        Ok(inner.fd)
    }

    fn end_connect(&self, completed: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.reader = 0;
        let state = self.state();
        if state == State::Closing {
            self.drained.notify_all();
        }
        if completed && state == State::Connecting {
            self.set_state(State::Connected);
            inner.localport = sys::net::local_address(inner.fd)?.port();
        } else if !completed && state >= State::Closing {
            return Err(SocketError::Closed);
        }
        Ok(())
    }

    fn connect_loop(
        &self,
        fd: RawFd,
        addr: IpAddr,
        port: u16,
        millis: u32,
        done: &mut bool,
    ) -> Result<()> {
        self.configure_non_blocking(fd, millis)?;
        let mut status = sys::net::connect(fd, addr, port)?;
        if status.okay_to_retry() && self.is_open() {
            if millis > 0 {
                let mut nanos = u64::from(millis) * 1_000_000;
                loop {
                    let start = Instant::now();
                    sys::poll::park(fd, Interest::Writable, nanos)?;
                    if sys::net::poll_connect_now(fd)? {
                        status = IoStatus::Ready(1);
                        break;
                    }
                    nanos = nanos.saturating_sub(start.elapsed().as_nanos() as u64);
                    if nanos == 0 {
                        return Err(SocketError::Timeout("Connect timed out"));
                    }
                    if !self.is_open() {
                        break;
                    }
                }
            } else {
                loop {
                    sys::poll::park(fd, Interest::Writable, 0)?;
                    if sys::net::poll_connect_now(fd)? {
                        status = IoStatus::Ready(1);
                        break;
                    }
                    if !self.is_open() {
                        break;
                    }
                }
            }
        }
        *done = matches!(status, IoStatus::Ready(_));
        Ok(())
    }

    // ========================================================================
    // Accept
    // ========================================================================

    /// Accepts one connection into `target`, which must be a fresh endpoint
    /// of this crate's type. The accepted descriptor is installed under the
    /// target's state-lock, already `Connected` and in blocking mode.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`], [`SocketError::NotStream`],
    /// [`SocketError::NotBound`], [`SocketError::Timeout`], or a kernel
    /// error. A failed local-address lookup closes the accepted descriptor.
    pub fn accept(&self, target: &Endpoint) -> Result<()> {
        let (newfd, remote, local) = self.accept_inner()?;
        let mut inner = target.inner.lock();
        inner.fd = newfd;
        inner.stream = true;
        inner.closer = Some(Arc::new(FdCloser::new(
            newfd,
            true,
            target.hooks.resources.clone(),
        )));
        inner.localport = local.port();
        inner.address = Some(remote.ip());
        inner.port = remote.port();
        target.set_state(State::Connected);
        Ok(())
    }

    /// Accepts one connection into a foreign endpoint via its field-write
    /// capability.
    pub fn accept_foreign(&self, target: &mut dyn BoundaryFields) -> Result<()> {
        let (newfd, remote, local) = self.accept_inner()?;
        target.set_boundary(newfd, local.port(), remote);
        Ok(())
    }

    fn accept_inner(&self) -> Result<(RawFd, SocketAddr, SocketAddr)> {
        let mut accepted = None;
        {
            let _guard = self.read_lock.lock();
            let timeout = self.timeout.load(Ordering::Acquire);
            let fd = self.begin_accept()?;
            let body = self.accept_loop(fd, timeout, &mut accepted);
            let end = self.end_accept(accepted.is_some());
            match (body, end) {
                (_, Err(err)) | (Err(err), Ok(())) => return Err(err),
                (Ok(()), Ok(())) => {}
            }
        }

        let (newfd, remote) = accepted.ok_or(SocketError::Closed)?;

        // the accepted socket is handed out in blocking mode, with its local
        // address resolved; failure here must not leak the descriptor
        let local = sys::net::local_address(newfd)
            .and_then(|local| sys::net::configure_blocking(newfd, true).map(|()| local));
        match local {
            Ok(local) => Ok((newfd, remote, local)),
            Err(err) => {
                let _ = sys::net::close(newfd);
                Err(err)
            }
        }
    }

    fn begin_accept(&self) -> Result<RawFd> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;
        if !inner.stream {
            return Err(SocketError::NotStream);
        }
        if inner.localport == 0 {
            return Err(SocketError::NotBound);
        }
        inner.reader = sys::thread::current();
        Ok(inner.fd)
    }

    fn end_accept(&self, completed: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.reader = 0;
        let state = self.state();
        if state == State::Closing {
            self.drained.notify_all();
        }
        if !completed && state >= State::Closing {
            return Err(SocketError::Closed);
        }
        Ok(())
    }

    fn accept_loop(
        &self,
        fd: RawFd,
        timeout: u32,
        accepted: &mut Option<(RawFd, SocketAddr)>,
    ) -> Result<()> {
        self.configure_non_blocking(fd, timeout)?;
        let mut status = sys::net::accept(fd)?;
        if status.okay_to_retry() && self.is_open() {
            if timeout > 0 {
                let mut nanos = u64::from(timeout) * 1_000_000;
                loop {
                    let start = Instant::now();
                    sys::poll::park(fd, Interest::Readable, nanos)?;
                    status = sys::net::accept(fd)?;
                    if matches!(status, AcceptStatus::WouldBlock) {
                        nanos = nanos.saturating_sub(start.elapsed().as_nanos() as u64);
                        if nanos == 0 {
                            return Err(SocketError::Timeout("Accept timed out"));
                        }
                    }
                    if !(status.okay_to_retry() && self.is_open()) {
                        break;
                    }
                }
            } else {
                loop {
                    sys::poll::park(fd, Interest::Readable, 0)?;
                    status = sys::net::accept(fd)?;
                    if !(status.okay_to_retry() && self.is_open()) {
                        break;
                    }
                }
            }
        }
        if let AcceptStatus::Accepted { fd, remote } = status {
            *accepted = Some((fd, remote));
        }
        Ok(())
    }

    // ========================================================================
    // Read / write
    // ========================================================================

    /// Reads into `buf`, honoring `SO_TIMEOUT`.
    ///
    /// Returns `Ok(0)` at end of stream (for a non-empty buffer). At most
    /// [`crate::MAX_BUFFER_SIZE`] bytes move per underlying syscall.
    ///
    /// # Errors
    ///
    /// [`SocketError::NotConnected`], [`SocketError::Closed`],
    /// [`SocketError::Timeout`], [`SocketError::ConnectionReset`], or any
    /// kernel error.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let _guard = self.read_lock.lock();
        let timeout = self.timeout.load(Ordering::Acquire);
        let fd = self.begin_read()?;
        let mut status = IoStatus::WouldBlock;
        let body = self.read_loop(fd, buf, timeout, &mut status);
        let end = self.end_read(matches!(status, IoStatus::Ready(_)));
        match (body, end) {
            (_, Err(err)) | (Err(err), Ok(())) => Err(err),
            (Ok(()), Ok(())) => match status {
                IoStatus::Ready(n) => Ok(n),
                IoStatus::Eof => Ok(0),
                // the loop only exits retryable states when the endpoint is
                // no longer open, and end_read reports that; unreachable
                IoStatus::WouldBlock | IoStatus::Interrupted => Err(SocketError::Closed),
            },
        }
    }

    fn begin_read(&self) -> Result<RawFd> {
        let mut inner = self.inner.lock();
        self.ensure_open_and_connected()?;
        inner.reader = sys::thread::current();
        Ok(inner.fd)
    }

    fn end_read(&self, completed: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.reader = 0;
        let state = self.state();
        if state == State::Closing {
            self.drained.notify_all();
        }
        if !completed && state >= State::Closing {
            return Err(SocketError::Closed);
        }
        Ok(())
    }

    fn read_loop(
        &self,
        fd: RawFd,
        buf: &mut [u8],
        timeout: u32,
        status: &mut IoStatus,
    ) -> Result<()> {
        if self.input_closed.load(Ordering::Acquire) {
            *status = IoStatus::Eof;
            return Ok(());
        }
        self.configure_non_blocking(fd, timeout)?;
        *status = sys::net::read(fd, buf)?;
        if status.okay_to_retry() && self.is_open() {
            if timeout > 0 {
                let mut nanos = u64::from(timeout) * 1_000_000;
                loop {
                    let start = Instant::now();
                    sys::poll::park(fd, Interest::Readable, nanos)?;
                    *status = sys::net::read(fd, buf)?;
                    if matches!(*status, IoStatus::WouldBlock) {
                        nanos = nanos.saturating_sub(start.elapsed().as_nanos() as u64);
                        if nanos == 0 {
                            return Err(SocketError::Timeout("Read timed out"));
                        }
                    }
                    if !(status.okay_to_retry() && self.is_open()) {
                        break;
                    }
                }
            } else {
                loop {
                    sys::poll::park(fd, Interest::Readable, 0)?;
                    *status = sys::net::read(fd, buf)?;
                    if !(status.okay_to_retry() && self.is_open()) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes from `buf`, looping past would-block conditions.
    ///
    /// Returns the number of bytes accepted by the kernel, which may be less
    /// than `buf.len()`; at most [`crate::MAX_BUFFER_SIZE`] bytes move per
    /// syscall. There is no write timeout.
    ///
    /// # Errors
    ///
    /// [`SocketError::NotConnected`], [`SocketError::Closed`], or any kernel
    /// error.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let fd = self.begin_write()?;
        let mut status = IoStatus::WouldBlock;
        let body = self.write_loop(fd, buf, &mut status);
        let end = self.end_write(matches!(status, IoStatus::Ready(_)));
        match (body, end) {
            (_, Err(err)) | (Err(err), Ok(())) => Err(err),
            (Ok(()), Ok(())) => match status {
                IoStatus::Ready(n) => Ok(n),
                _ => Err(SocketError::Closed),
            },
        }
    }

    fn begin_write(&self) -> Result<RawFd> {
        let mut inner = self.inner.lock();
        self.ensure_open_and_connected()?;
        inner.writer = sys::thread::current();
        Ok(inner.fd)
    }

    fn end_write(&self, completed: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.writer = 0;
        let state = self.state();
        if state == State::Closing {
            self.drained.notify_all();
        }
        if !completed && state >= State::Closing {
            return Err(SocketError::Closed);
        }
        Ok(())
    }

    fn write_loop(&self, fd: RawFd, buf: &[u8], status: &mut IoStatus) -> Result<()> {
        *status = sys::net::write(fd, buf)?;
        while status.okay_to_retry() && self.is_open() {
            sys::poll::park(fd, Interest::Writable, 0)?;
            *status = sys::net::write(fd, buf)?;
        }
        Ok(())
    }

    /// Bytes that can be read without blocking; 0 once input is shut down.
    ///
    /// # Errors
    ///
    /// [`SocketError::NotConnected`], [`SocketError::Closed`], or a kernel
    /// error.
    pub fn available(&self) -> Result<usize> {
        let _guard = self.read_lock.lock();
        self.ensure_open_and_connected()?;
        if self.input_closed.load(Ordering::Acquire) {
            return Ok(0);
        }
        let fd = self.inner.lock().fd;
        sys::net::available(fd)
    }

    /// Sends one out-of-band byte.
    ///
    /// On a descriptor already in non-blocking mode a would-block condition
    /// is not waited out; the call fails with [`SocketError::Unsupported`].
    pub fn send_urgent_data(&self, byte: u8) -> Result<()> {
        let _guard = self.write_lock.lock();
        let fd = self.begin_write()?;
        let mut status = IoStatus::WouldBlock;
        let body = (|| -> Result<()> {
            loop {
                status = sys::net::send_oob(fd, byte)?;
                if !(matches!(status, IoStatus::Interrupted) && self.is_open()) {
                    break;
                }
            }
            if matches!(status, IoStatus::WouldBlock) {
                return Err(SocketError::Unsupported("sending urgent data would block"));
            }
            Ok(())
        })();
        let end = self.end_write(matches!(status, IoStatus::Ready(_)));
        match (body, end) {
            (_, Err(err)) | (Err(err), Ok(())) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Whether urgent data is supported at all.
    #[must_use]
    pub fn supports_urgent_data(&self) -> bool {
        true
    }

    // ========================================================================
    // Shutdown / close
    // ========================================================================

    /// Shuts down the read side and unblocks a parked reader. Idempotent.
    ///
    /// # Errors
    ///
    /// [`SocketError::NotConnected`], [`SocketError::Closed`], or a kernel
    /// error from the shutdown.
    pub fn shutdown_input(&self) -> Result<()> {
        let inner = self.inner.lock();
        self.ensure_open_and_connected()?;
        if !self.input_closed.load(Ordering::Acquire) {
            sys::net::shutdown(inner.fd, Shutdown::Read)?;
            if inner.reader != 0 {
                sys::thread::signal(inner.reader);
            }
            self.input_closed.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Shuts down the write side and unblocks a parked writer. Idempotent.
    ///
    /// # Errors
    ///
    /// [`SocketError::NotConnected`], [`SocketError::Closed`], or a kernel
    /// error from the shutdown.
    pub fn shutdown_output(&self) -> Result<()> {
        let inner = self.inner.lock();
        self.ensure_open_and_connected()?;
        if !self.output_closed.load(Ordering::Acquire) {
            sys::net::shutdown(inner.fd, Shutdown::Write)?;
            if inner.writer != 0 {
                sys::thread::signal(inner.writer);
            }
            self.output_closed.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Closes the endpoint, signalling and draining blocked I/O first.
    ///
    /// Idempotent; a close racing with another close returns immediately.
    /// When this returns, no blocked operation on this endpoint is still
    /// pending and every later operation reports "Socket closed".
    ///
    /// # Errors
    ///
    /// A kernel error from the preclose; descriptor-close failures are
    /// swallowed by the one-shot closer.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = self.state();
        if state >= State::Closing {
            return Ok(());
        }
        if state == State::New {
            // stillborn: no descriptor was ever allocated
            self.set_state(State::Closed);
            return Ok(());
        }
        self.set_state(State::Closing);

        // nudge the peer with a write-side shutdown, unless a zero linger
        // interval asks for a hard reset on close
        if let Ok(linger) = sys::net::get_linger(inner.fd) {
            if linger != 0 {
                let _ = sys::net::shutdown(inner.fd, Shutdown::Write);
            }
        }

        let reader = inner.reader;
        let writer = inner.writer;
        if reader != 0 || writer != 0 {
            sys::net::pre_close(inner.fd)?;
            if reader != 0 {
                sys::thread::signal(reader);
            }
            if writer != 0 {
                sys::thread::signal(writer);
            }
            tracing::trace!(fd = inner.fd, "close waiting for in-flight i/o to drain");
            while inner.reader != 0 || inner.writer != 0 {
                self.drained.wait(&mut inner);
            }
        }

        if let Some(closer) = inner.closer.as_ref() {
            closer.run();
        }
        self.set_state(State::Closed);
        Ok(())
    }

    // ========================================================================
    // Ownership transfer
    // ========================================================================

    /// Adopts an externally accepted, connected descriptor.
    ///
    /// Only valid on a `New` endpoint. The descriptor is switched to blocking
    /// mode, a fresh closer takes ownership, and the endpoint becomes
    /// `Connected` with the supplied boundary fields.
    ///
    /// # Errors
    ///
    /// [`SocketError::BadArgument`] when the endpoint is past `New`, or a
    /// kernel error from the blocking-mode switch.
    pub fn post_custom_accept(&self, fd: RawFd, local_port: u16, remote: SocketAddr) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.state() != State::New {
            return Err(SocketError::BadArgument("endpoint already in use".into()));
        }
        sys::net::configure_blocking(fd, true)?;
        inner.fd = fd;
        inner.stream = true;
        inner.closer = Some(Arc::new(FdCloser::new(
            fd,
            true,
            self.hooks.resources.clone(),
        )));
        inner.localport = local_port;
        inner.address = Some(remote.ip());
        inner.port = remote.port();
        self.set_state(State::Connected);
        Ok(())
    }

    /// Transfers this connected endpoint's descriptor and boundary fields to
    /// `target`.
    ///
    /// A non-`New` target is closed first. The source's closer is disabled —
    /// the descriptor survives — and the source becomes `Closed`. The
    /// target's sticky flags are reset; its timeout deliberately keeps
    /// whatever value it had.
    ///
    /// # Errors
    ///
    /// [`SocketError::NotConnected`] when the source is not connected,
    /// [`SocketError::BadArgument`] when source and target are the same
    /// endpoint.
    pub fn copy_to(&self, target: &Endpoint) -> Result<()> {
        if std::ptr::eq(self, target) {
            return Err(SocketError::BadArgument(
                "cannot transfer an endpoint to itself".into(),
            ));
        }
        if target.state() != State::New {
            let _ = target.close();
        }
        let mut target_inner = target.inner.lock();
        let source_inner = self.inner.lock();
        if self.state() != State::Connected {
            return Err(SocketError::NotConnected);
        }

        target_inner.stream = source_inner.stream;
        target_inner.fd = source_inner.fd;
        target_inner.localport = source_inner.localport;
        target_inner.address = source_inner.address;
        target_inner.port = source_inner.port;

        target.non_blocking.store(false, Ordering::Release);
        target.input_closed.store(false, Ordering::Release);
        target.output_closed.store(false, Ordering::Release);
        target_inner.reuse_addr = false;
        target.set_state(State::Connected);

        // dropping the source must no longer close the descriptor
        if let Some(closer) = source_inner.closer.as_ref() {
            closer.disable();
        }
        self.set_state(State::Closed);

        target_inner.closer = Some(Arc::new(FdCloser::new(
            target_inner.fd,
            target_inner.stream,
            target.hooks.resources.clone(),
        )));
        Ok(())
    }

    /// Transfers this connected endpoint's boundary fields to a foreign
    /// endpoint via its field-write capability.
    ///
    /// The non-blocking flag is not transferred and the descriptor's mode is
    /// left untouched, matching the legacy surface.
    ///
    /// # Errors
    ///
    /// [`SocketError::NotConnected`] when the source is not connected.
    pub fn copy_to_foreign(&self, target: &mut dyn BoundaryFields) -> Result<()> {
        let inner = self.inner.lock();
        if self.state() != State::Connected {
            return Err(SocketError::NotConnected);
        }
        let address = inner.address.ok_or(SocketError::NotConnected)?;
        target.set_boundary(inner.fd, inner.localport, SocketAddr::new(address, inner.port));
        if let Some(closer) = inner.closer.as_ref() {
            closer.disable();
        }
        self.set_state(State::Closed);
        Ok(())
    }

    // ========================================================================
    // Stream views
    // ========================================================================

    /// The read side of this endpoint as a `std::io::Read`.
    #[must_use]
    pub fn read_stream(&self) -> ReadStream<'_> {
        ReadStream::new(self)
    }

    /// The write side of this endpoint as a `std::io::Write`.
    #[must_use]
    pub fn write_stream(&self) -> WriteStream<'_> {
        WriteStream::new(self)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("server", &self.server)
            .field("state", &self.state())
            .field("timeout", &self.timeout.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // the cleanup-hook guarantee: the descriptor is released even when
        // the owner never called close(); a disabled or already-run closer
        // makes this a no-op
        let inner = self.inner.get_mut();
        if let Some(closer) = inner.closer.as_ref() {
            closer.run();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_endpoint_starts_fresh() {
        let ep = Endpoint::new(false);
        assert_eq!(ep.state(), State::New);
        assert_eq!(ep.local_port(), 0);
        assert!(ep.remote().is_none());
    }

    #[test]
    fn create_moves_to_unconnected() {
        let ep = Endpoint::new(false);
        ep.create(true).expect("create");
        assert_eq!(ep.state(), State::Unconnected);
        assert!(matches!(
            ep.create(true),
            Err(SocketError::BadArgument(_))
        ));
        ep.close().expect("close");
        assert_eq!(ep.state(), State::Closed);
    }

    #[test]
    fn close_on_new_is_stillborn() {
        let ep = Endpoint::new(false);
        ep.close().expect("close");
        assert_eq!(ep.state(), State::Closed);
        ep.close().expect("close again");
    }

    #[test]
    fn operations_after_close_report_closed() {
        let ep = Endpoint::new(false);
        ep.create(true).expect("create");
        ep.close().expect("close");
        let mut buf = [0u8; 4];
        assert!(matches!(ep.read(&mut buf), Err(SocketError::Closed)));
        assert!(matches!(
            ep.bind("127.0.0.1".parse().expect("ip"), 0),
            Err(SocketError::Closed)
        ));
        assert!(matches!(ep.listen(0), Err(SocketError::Closed)));
    }

    #[test]
    fn unresolved_target_fails_fast() {
        let ep = Endpoint::new(false);
        ep.create(true).expect("create");
        let err = ep
            .connect(
                RemoteAddr::Unresolved {
                    host: "no-such-host.invalid".into(),
                    port: 80,
                },
                0,
            )
            .expect_err("unresolved must fail");
        assert!(matches!(err, SocketError::UnknownHost(_)));
    }

    #[test]
    fn listen_requires_bind() {
        let ep = Endpoint::new(true);
        ep.create(true).expect("create");
        assert!(matches!(ep.listen(0), Err(SocketError::NotBound)));
        ep.close().expect("close");
    }

    #[test]
    fn read_before_connect_is_rejected() {
        let ep = Endpoint::new(false);
        ep.create(true).expect("create");
        let mut buf = [0u8; 4];
        assert!(matches!(ep.read(&mut buf), Err(SocketError::NotConnected)));
        ep.close().expect("close");
    }

    #[test]
    fn bind_twice_is_rejected() {
        let ep = Endpoint::new(true);
        ep.create(true).expect("create");
        ep.bind("127.0.0.1".parse().expect("ip"), 0).expect("bind");
        assert_ne!(ep.local_port(), 0);
        assert!(matches!(
            ep.bind("127.0.0.1".parse().expect("ip"), 0),
            Err(SocketError::AlreadyBound)
        ));
        ep.close().expect("close");
    }
}
