//! Network plumbing for KNXnet/IP discovery.
//!
//! - [`NetworkInterface`] names a local IPv4 interface to search on
//! - [`transport`] holds the datagram socket abstraction used by sessions
//! - [`udp`] is the production implementation on top of `socket2`
//! - [`mock_transport`] is an in-memory network for tests

use core::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{KnxError, Result};

pub mod mock_transport;
pub(crate) mod resolver;
pub mod transport;
pub mod udp;

/// A local IPv4 network interface.
///
/// # Examples
///
/// ```
/// use knx_discover::net::NetworkInterface;
/// use std::net::Ipv4Addr;
///
/// let lo = NetworkInterface::new("lo", Ipv4Addr::LOCALHOST);
/// assert!(lo.is_loopback());
/// assert_eq!(lo.to_string(), "lo (127.0.0.1)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkInterface {
    name: String,
    address: Ipv4Addr,
}

impl NetworkInterface {
    /// Create an interface description from a name and its IPv4 address
    pub fn new(name: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    /// Enumerate the IPv4 interfaces of this host
    ///
    /// # Errors
    ///
    /// Returns a transport error if the operating system query fails
    pub fn list() -> Result<Vec<Self>> {
        let netifs = local_ip_address::list_afinet_netifas()
            .map_err(|e| KnxError::interface_lookup_failed(io::Error::other(e.to_string())))?;

        Ok(netifs
            .into_iter()
            .filter_map(|(name, ip)| match ip {
                IpAddr::V4(v4) => Some(Self::new(name, v4)),
                IpAddr::V6(_) => None,
            })
            .collect())
    }

    /// Find an interface by name
    ///
    /// # Errors
    ///
    /// Returns an argument error if no IPv4 interface has that name
    pub fn by_name(name: &str) -> Result<Self> {
        Self::list()?
            .into_iter()
            .find(|nif| nif.name == name)
            .ok_or_else(KnxError::unknown_interface)
    }

    /// Find the interface owning an address
    ///
    /// # Errors
    ///
    /// Returns an argument error if no interface has that address
    pub fn by_address(address: Ipv4Addr) -> Result<Self> {
        Self::list()?
            .into_iter()
            .find(|nif| nif.address == address)
            .ok_or_else(KnxError::unknown_interface)
    }

    /// Interface name as reported by the operating system
    pub fn name(&self) -> &str {
        &self.name
    }

    /// IPv4 address of the interface
    pub const fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Check if this is a loopback interface
    pub const fn is_loopback(&self) -> bool {
        self.address.is_loopback()
    }
}

impl fmt::Display for NetworkInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}
