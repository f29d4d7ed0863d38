//! Loopback data-path tests: echo, half-shutdown, chunked bulk transfer.

mod common;

use std::io::{Read, Write};
use std::thread;

use common::*;
use plainsock::{Endpoint, State};

// ============================================================================
// Echo
// ============================================================================

/// One endpoint binds and listens, a second connects, writes "hello", and the
/// accepted side reads exactly those five bytes.
#[test]
fn happy_echo() {
    init_logging();
    let (accepted, client) = connected_pair();

    assert_eq!(client.write(b"hello").expect("write"), 5);

    let mut buf = [0u8; 32];
    let n = accepted.read(&mut buf).expect("read");
    assert_eq!(&buf[..n], b"hello");

    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

#[test]
fn echo_both_directions() {
    init_logging();
    let (accepted, client) = connected_pair();

    client.write(b"ping").expect("client write");
    let mut buf = [0u8; 8];
    let n = accepted.read(&mut buf).expect("accepted read");
    assert_eq!(&buf[..n], b"ping");

    accepted.write(b"pong").expect("accepted write");
    let n = client.read(&mut buf).expect("client read");
    assert_eq!(&buf[..n], b"pong");

    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

#[test]
fn accepted_endpoint_reports_addresses() {
    init_logging();
    let listener = listener();
    let port = listener.local_port();
    let client = connected_client(port);

    let accepted = Endpoint::new(false);
    listener.accept(&accepted).expect("accept");

    assert_eq!(accepted.state(), State::Connected);
    assert_eq!(accepted.local_port(), port);
    let remote = accepted.remote().expect("remote");
    assert_eq!(remote.port(), client.local_port());

    listener.close().expect("close listener");
    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

// ============================================================================
// Half-shutdown
// ============================================================================

/// Writer shuts down its output after three bytes; the reader sees the bytes,
/// then EOF, and the reverse direction keeps working.
#[test]
fn half_shutdown_keeps_reverse_direction_alive() {
    init_logging();
    let (accepted, client) = connected_pair();

    accepted.write(b"abc").expect("write");
    accepted.shutdown_output().expect("shutdown output");
    // idempotent
    accepted.shutdown_output().expect("shutdown output again");

    let mut buf = [0u8; 8];
    let n = client.read(&mut buf).expect("read payload");
    assert_eq!(&buf[..n], b"abc");
    assert_eq!(client.read(&mut buf).expect("read eof"), 0);

    // client -> accepted still flows
    client.write(b"back").expect("reverse write");
    let n = accepted.read(&mut buf).expect("reverse read");
    assert_eq!(&buf[..n], b"back");

    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

/// After shutdown_input every read reports EOF without touching the kernel.
#[test]
fn shutdown_input_latches_eof() {
    init_logging();
    let (accepted, client) = connected_pair();

    client.write(b"late").expect("write");
    accepted.shutdown_input().expect("shutdown input");
    accepted.shutdown_input().expect("shutdown input again");

    let mut buf = [0u8; 8];
    assert_eq!(accepted.read(&mut buf).expect("read"), 0);
    assert_eq!(accepted.available().expect("available"), 0);

    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

// ============================================================================
// available
// ============================================================================

#[test]
fn available_sees_buffered_bytes() {
    init_logging();
    let (accepted, client) = connected_pair();

    client.write(b"xyzzy").expect("write");
    // loopback delivery is fast but not synchronous
    let mut waited = 0;
    while accepted.available().expect("available") < 5 && waited < 200 {
        thread::sleep(std::time::Duration::from_millis(5));
        waited += 5;
    }
    assert_eq!(accepted.available().expect("available"), 5);

    let mut buf = [0u8; 8];
    accepted.read(&mut buf).expect("drain");
    assert_eq!(accepted.available().expect("available"), 0);

    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

// ============================================================================
// Bulk transfer
// ============================================================================

/// A 1 MiB buffer crosses the connection in order and in full through the
/// stream views, which chunk writes to at most 128 KiB per kernel call.
#[test]
fn large_transfer_arrives_in_order() {
    init_logging();
    let (accepted, client) = connected_pair();

    const TOTAL: usize = 1024 * 1024;
    let payload: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    thread::scope(|scope| {
        scope.spawn(|| {
            let mut out = client.write_stream();
            out.write_all(&payload).expect("write_all");
            client.shutdown_output().expect("shutdown output");
        });

        let mut received = Vec::with_capacity(TOTAL);
        let mut input = accepted.read_stream();
        input.read_to_end(&mut received).expect("read_to_end");
        assert_eq!(received.len(), TOTAL);
        assert_eq!(received, expected);
    });

    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

/// The endpoint-level write never accepts more than 128 KiB per call.
#[test]
fn single_write_is_capped() {
    init_logging();
    let (accepted, client) = connected_pair();

    let buf = vec![7u8; plainsock::MAX_BUFFER_SIZE * 4];
    let n = client.write(&buf).expect("write");
    assert!(n <= plainsock::MAX_BUFFER_SIZE);

    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

// ============================================================================
// Stream views
// ============================================================================

#[test]
fn read_stream_latches_eof() {
    init_logging();
    let (accepted, client) = connected_pair();

    client.write(b"fin").expect("write");
    client.shutdown_output().expect("shutdown");

    let mut input = accepted.read_stream();
    let mut buf = [0u8; 8];
    let n = input.read(&mut buf).expect("read payload");
    assert_eq!(&buf[..n], b"fin");
    assert_eq!(input.read(&mut buf).expect("first eof"), 0);
    // latched: no further syscall, still EOF
    assert_eq!(input.read(&mut buf).expect("latched eof"), 0);

    client.close().expect("close client");
    accepted.close().expect("close accepted");
}

#[test]
fn closing_a_stream_closes_the_endpoint() {
    init_logging();
    let (accepted, client) = connected_pair();

    client.write_stream().close().expect("stream close");
    assert_eq!(client.state(), State::Closed);

    accepted.close().expect("close accepted");
}
