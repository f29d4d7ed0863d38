//! Ownership transfer: copy_to, foreign-endpoint accept, custom accept.

mod common;

use std::net::SocketAddr;
use std::os::fd::RawFd;

use common::*;
use plainsock::hooks::BoundaryFields;
use plainsock::{Endpoint, SocketError, State};

#[derive(Debug, Default)]
struct ForeignEndpoint {
    fd: Option<RawFd>,
    local_port: u16,
    remote: Option<SocketAddr>,
}

impl BoundaryFields for ForeignEndpoint {
    fn set_boundary(&mut self, fd: RawFd, local_port: u16, remote: SocketAddr) {
        self.fd = Some(fd);
        self.local_port = local_port;
        self.remote = Some(remote);
    }
}

// ============================================================================
// copy_to
// ============================================================================

/// The descriptor and boundary fields move to the target; the source ends up
/// closed without closing the descriptor, and dropping the source must not
/// kill the connection either.
#[test]
fn copy_to_transfers_the_connection() {
    init_logging();
    let (accepted, client) = connected_pair();

    let target = Endpoint::new(false);
    accepted.copy_to(&target).expect("copy_to");

    assert_eq!(accepted.state(), State::Closed);
    assert_eq!(target.state(), State::Connected);
    assert_eq!(target.local_port(), client.remote().expect("remote").port());

    // the source's closer is disabled: dropping it leaves the fd alive
    drop(accepted);

    client.write(b"ping").expect("write");
    let mut buf = [0u8; 8];
    let n = target.read(&mut buf).expect("read through target");
    assert_eq!(&buf[..n], b"ping");

    client.close().expect("close client");
    target.close().expect("close target");
}

#[test]
fn copy_to_requires_a_connected_source() {
    init_logging();
    let source = Endpoint::new(false);
    source.create(true).expect("create");
    let target = Endpoint::new(false);
    assert!(matches!(
        source.copy_to(&target),
        Err(SocketError::NotConnected)
    ));
    source.close().expect("close");
}

/// A non-fresh target is closed before it adopts the transferred descriptor.
#[test]
fn copy_to_closes_a_used_target_first() {
    init_logging();
    let (accepted, client) = connected_pair();

    let target = Endpoint::new(false);
    target.create(true).expect("create target");
    assert_eq!(target.state(), State::Unconnected);

    accepted.copy_to(&target).expect("copy_to");
    assert_eq!(target.state(), State::Connected);

    client.write(b"x").expect("write");
    let mut buf = [0u8; 4];
    assert_eq!(target.read(&mut buf).expect("read"), 1);

    client.close().expect("close client");
    target.close().expect("close target");
}

// ============================================================================
// Foreign endpoints
// ============================================================================

#[test]
fn accept_foreign_writes_boundary_fields() {
    init_logging();
    let listener = listener();
    let client = connected_client(listener.local_port());

    let mut foreign = ForeignEndpoint::default();
    listener.accept_foreign(&mut foreign).expect("accept");

    let fd = foreign.fd.expect("fd was written");
    assert!(fd >= 0);
    assert_eq!(foreign.local_port, listener.local_port());
    let remote = foreign.remote.expect("remote was written");
    assert_eq!(remote.port(), client.local_port());

    plainsock::sys::net::close(fd).expect("close accepted fd");
    listener.close().expect("close listener");
    client.close().expect("close client");
}

#[test]
fn copy_to_foreign_disables_the_source_closer() {
    init_logging();
    let (accepted, client) = connected_pair();

    let mut foreign = ForeignEndpoint::default();
    accepted.copy_to_foreign(&mut foreign).expect("copy");
    assert_eq!(accepted.state(), State::Closed);
    drop(accepted);

    // the transferred descriptor is still usable at the syscall level
    let fd = foreign.fd.expect("fd");
    client.write(b"ok").expect("write");
    let mut buf = [0u8; 4];
    let mut got = 0;
    while got == 0 {
        match plainsock::sys::net::read(fd, &mut buf).expect("raw read") {
            plainsock::sys::IoStatus::Ready(n) => got = n,
            plainsock::sys::IoStatus::WouldBlock
            | plainsock::sys::IoStatus::Interrupted => {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            plainsock::sys::IoStatus::Eof => panic!("unexpected EOF"),
        }
    }
    assert_eq!(&buf[..got], b"ok");

    plainsock::sys::net::close(fd).expect("close fd");
    client.close().expect("close client");
}

// ============================================================================
// post_custom_accept
// ============================================================================

/// A descriptor accepted outside the endpoint is adopted as a fully
/// functional connected endpoint.
#[test]
fn post_custom_accept_adopts_a_descriptor() {
    init_logging();
    let listener = listener();
    let client = connected_client(listener.local_port());

    let mut foreign = ForeignEndpoint::default();
    listener.accept_foreign(&mut foreign).expect("accept");

    let adopted = Endpoint::new(false);
    adopted
        .post_custom_accept(
            foreign.fd.expect("fd"),
            foreign.local_port,
            foreign.remote.expect("remote"),
        )
        .expect("post_custom_accept");
    assert_eq!(adopted.state(), State::Connected);

    client.write(b"hi").expect("write");
    let mut buf = [0u8; 4];
    let n = adopted.read(&mut buf).expect("read");
    assert_eq!(&buf[..n], b"hi");

    listener.close().expect("close listener");
    client.close().expect("close client");
    adopted.close().expect("close adopted");
}

#[test]
fn post_custom_accept_rejects_a_used_endpoint() {
    init_logging();
    let ep = Endpoint::new(false);
    ep.create(true).expect("create");
    let remote: SocketAddr = "127.0.0.1:9".parse().expect("addr");
    assert!(matches!(
        ep.post_custom_accept(0, 1, remote),
        Err(SocketError::BadArgument(_))
    ));
    ep.close().expect("close");
}
