//! Shared helpers for the loopback integration tests.
#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Once;

use plainsock::Endpoint;

/// Installs a tracing subscriber once per test binary; `RUST_LOG` controls
/// verbosity.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn loopback() -> IpAddr {
    "127.0.0.1".parse().expect("loopback address")
}

/// A listener bound to an ephemeral loopback port.
pub fn listener() -> Endpoint {
    let ep = Endpoint::new(true);
    ep.create(true).expect("create listener");
    ep.bind(loopback(), 0).expect("bind listener");
    ep.listen(0).expect("listen");
    ep
}

/// A client endpoint connected to the given loopback port.
pub fn connected_client(port: u16) -> Endpoint {
    let ep = Endpoint::new(false);
    ep.create(true).expect("create client");
    ep.connect((loopback(), port), 0).expect("connect");
    ep
}

/// One established loopback connection: `(accepted side, client side)`.
///
/// The connect completes against the listener backlog, so no second thread
/// is needed; the listener is closed before returning.
pub fn connected_pair() -> (Endpoint, Endpoint) {
    let listener = listener();
    let client = connected_client(listener.local_port());
    let accepted = Endpoint::new(false);
    listener.accept(&accepted).expect("accept");
    listener.close().expect("close listener");
    (accepted, client)
}
