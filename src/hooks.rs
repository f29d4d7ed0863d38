//! Process-wide collaborators, injected as interfaces.
//!
//! The endpoint consults three external capabilities: platform integration
//! hooks that run before bind/connect (transparent proxying, firewall
//! traversal), a resource counter that accounts datagram socket create/close,
//! and a field-write capability for endpoints of a foreign concrete type.
//! All are trait objects with no-op defaults so the endpoint stays testable.

use std::net::{IpAddr, SocketAddr};
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::error::Result;

/// Platform hooks invoked before a TCP bind or connect.
pub trait NetHooks: Send + Sync {
    /// Called with the descriptor and target just before `bind`.
    fn before_tcp_bind(&self, fd: RawFd, addr: IpAddr, port: u16) -> Result<()> {
        let _ = (fd, addr, port);
        Ok(())
    }

    /// Called with the descriptor and target just before a connect attempt,
    /// but only when the socket has not been explicitly bound yet.
    fn before_tcp_connect(&self, fd: RawFd, addr: IpAddr, port: u16) -> Result<()> {
        let _ = (fd, addr, port);
        Ok(())
    }
}

/// Accounting for datagram socket descriptors.
pub trait ResourceCounter: Send + Sync {
    /// Invoked before a datagram socket is created; may refuse by returning
    /// an error, in which case no descriptor is allocated.
    fn before_udp_create(&self) -> Result<()> {
        Ok(())
    }

    /// Invoked after a datagram socket's descriptor has been closed.
    fn after_udp_close(&self) {}
}

/// Field-write capability for foreign endpoint types.
///
/// `accept` and `copy_to` can install an accepted or transferred connection
/// into an endpoint of a different concrete type, as long as that type can
/// receive the boundary fields: the descriptor, the local port and the remote
/// address. Same-type endpoints bypass this trait and write their fields
/// directly under their own state-lock.
pub trait BoundaryFields {
    /// Stores the boundary fields of a live, connected descriptor.
    fn set_boundary(&mut self, fd: RawFd, local_port: u16, remote: SocketAddr);
}

/// No-op implementation of all hook traits.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl NetHooks for DefaultHooks {}
impl ResourceCounter for DefaultHooks {}

/// Bundle of injected collaborators carried by every endpoint.
#[derive(Clone)]
pub struct Hooks {
    /// Pre-bind / pre-connect integration hooks.
    pub net: Arc<dyn NetHooks>,
    /// Datagram create/close accounting.
    pub resources: Arc<dyn ResourceCounter>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            net: Arc::new(DefaultHooks),
            resources: Arc::new(DefaultHooks),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
