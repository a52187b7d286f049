//! Datagram transport abstraction for KNXnet/IP discovery.
//!
//! Sessions never touch sockets directly. They ask a [`Connector`] to open a
//! [`Transport`] bound the way [`BindOptions`] describes, which lets the
//! discoverer run unchanged against real UDP sockets
//! ([`UdpConnector`](crate::net::udp::UdpConnector)) or the in-memory
//! [`MockNetwork`](crate::net::mock_transport::MockNetwork).
//!
//! ## Example
//!
//! ```rust,no_run
//! use knx_discover::net::transport::{BindOptions, Connector};
//! use knx_discover::net::udp::UdpConnector;
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use std::time::Duration;
//!
//! # fn main() -> knx_discover::Result<()> {
//! let mut transport = UdpConnector.open(&BindOptions::unicast(SocketAddrV4::new(
//!     Ipv4Addr::UNSPECIFIED,
//!     0,
//! )))?;
//! let mut buf = [0u8; 512];
//! if let Some((n, from)) = transport.recv_from(&mut buf, Duration::from_millis(100))? {
//!     println!("{n} bytes from {from}");
//! }
//! # Ok(())
//! # }
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::error::Result;

/// How a transport should be bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOptions {
    /// Local address and port (port 0 = ephemeral)
    pub local: SocketAddrV4,
    /// Allow other sockets to share the address
    pub reuse: bool,
    /// Multicast group to join after binding
    pub join_group: Option<Ipv4Addr>,
    /// Interface used for multicast membership and outgoing multicast
    pub interface: Option<Ipv4Addr>,
}

impl BindOptions {
    /// Plain unicast socket on `local`
    pub const fn unicast(local: SocketAddrV4) -> Self {
        Self {
            local,
            reuse: false,
            join_group: None,
            interface: None,
        }
    }

    /// Set the interface for multicast traffic
    #[must_use]
    pub const fn with_interface(mut self, interface: Option<Ipv4Addr>) -> Self {
        self.interface = interface;
        self
    }

    /// Share the port and join `group` once bound
    #[must_use]
    pub const fn with_group(mut self, group: Ipv4Addr) -> Self {
        self.reuse = true;
        self.join_group = Some(group);
        self
    }
}

/// Blocking datagram transport.
///
/// A transport is owned by exactly one session at a time and dropped when the
/// session ends.
pub trait Transport: Send {
    /// Send one datagram
    ///
    /// # Errors
    ///
    /// Returns a transport error if the datagram could not be sent
    fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<()>;

    /// Wait up to `timeout` for one datagram
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket failed
    fn recv_from(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddrV4)>>;

    /// Address the transport is bound to
    ///
    /// # Errors
    ///
    /// Returns a transport error if the address cannot be queried
    fn local_addr(&self) -> Result<SocketAddrV4>;

    /// Release the underlying socket before the transport is dropped
    fn close(&mut self) {}
}

/// Factory for transports
pub trait Connector: Send + Sync {
    /// Open a transport bound as described
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket cannot be created, bound, or
    /// joined to the multicast group
    fn open(&self, options: &BindOptions) -> Result<Box<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DISCOVERY_ENDPOINT;

    #[test]
    fn test_bind_options_builders() {
        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 3671);
        let options = BindOptions::unicast(local)
            .with_interface(Some(Ipv4Addr::new(10, 0, 0, 2)))
            .with_group(*DISCOVERY_ENDPOINT.ip());

        assert!(options.reuse);
        assert_eq!(options.join_group, Some(Ipv4Addr::new(224, 0, 23, 12)));
        assert_eq!(options.interface, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(!BindOptions::unicast(local).reuse);
    }
}
