//! UDP transport on top of `socket2`.
//!
//! Sockets are created unbound, configured (`SO_REUSEADDR` where the port is
//! shared with a multicast listener), bound, and then handed to
//! [`std::net::UdpSocket`] for the blocking send and receive calls.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{KnxError, Result};
use crate::net::transport::{BindOptions, Connector, Transport};

/// Opens [`UdpTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector;

impl Connector for UdpConnector {
    fn open(&self, options: &BindOptions) -> Result<Box<dyn Transport>> {
        Ok(Box::new(UdpTransport::bind(options)?))
    }
}

/// A bound UDP socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    read_timeout: Option<Duration>,
}

impl UdpTransport {
    /// Create and bind a socket as described by `options`
    ///
    /// # Errors
    ///
    /// Returns a transport error if any socket call fails
    pub fn bind(options: &BindOptions) -> Result<Self> {
        let socket = create_socket(options).map_err(KnxError::bind_failed)?;

        if let Some(group) = options.join_group {
            let iface = options.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
            socket
                .join_multicast_v4(&group, &iface)
                .map_err(KnxError::multicast_join_failed)?;
            knx_log!(debug, "[UDP] join_multicast_v4({}) on {}", group, iface);
        }

        knx_log!(
            debug,
            "[UDP] bound {} (reuse={})",
            socket
                .local_addr()
                .map_or_else(|_| options.local.to_string(), |a| a.to_string()),
            options.reuse
        );

        Ok(Self {
            socket: Some(socket),
            read_timeout: None,
        })
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket.as_ref().ok_or_else(|| {
            KnxError::receive_failed(Some(io::Error::from(io::ErrorKind::NotConnected)))
        })
    }
}

fn create_socket(options: &BindOptions) -> io::Result<UdpSocket> {
    let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if options.reuse {
        raw.set_reuse_address(true)?;
    }
    raw.bind(&SocketAddr::V4(options.local).into())?;

    let socket: UdpSocket = raw.into();
    if let Some(iface) = options.interface.filter(|ip| !ip.is_unspecified()) {
        if let Err(e) = socket2::SockRef::from(&socket).set_multicast_if_v4(&iface) {
            // Non-fatal: unicast still works, multicast leaves on the default route
            knx_log!(debug, "[UDP] set_multicast_if_v4({}) failed: {}", iface, e);
        }
    }
    socket.set_multicast_loop_v4(true)?;
    if let Err(e) = socket.set_multicast_ttl_v4(1) {
        knx_log!(debug, "[UDP] set_multicast_ttl_v4(1) failed: {}", e);
    }

    Ok(socket)
}

impl Transport for UdpTransport {
    fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<()> {
        self.socket()?
            .send_to(data, addr)
            .map_err(KnxError::send_failed)?;
        Ok(())
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddrV4)>> {
        // A zero read timeout means "block forever" to the OS.
        let timeout = timeout.max(Duration::from_millis(1));
        if self.read_timeout != Some(timeout) {
            self.socket()?
                .set_read_timeout(Some(timeout))
                .map_err(|e| KnxError::receive_failed(Some(e)))?;
            self.read_timeout = Some(timeout);
        }

        match self.socket()?.recv_from(buf) {
            Ok((n, SocketAddr::V4(from))) => Ok(Some((n, from))),
            Ok((_, SocketAddr::V6(from))) => {
                knx_log!(trace, "[UDP] ignoring datagram from {}", from);
                Ok(None)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                // ICMP port unreachable from an earlier send (Windows)
                knx_log!(debug, "[UDP] receive reset: {}", e);
                Ok(None)
            }
            Err(e) => Err(KnxError::receive_failed(Some(e))),
        }
    }

    fn local_addr(&self) -> Result<SocketAddrV4> {
        match self
            .socket()?
            .local_addr()
            .map_err(|e| KnxError::receive_failed(Some(e)))?
        {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(_) => Err(KnxError::invalid_address()),
        }
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            knx_log!(
                trace,
                "[UDP] closing {}",
                socket
                    .local_addr()
                    .map_or_else(|e| e.to_string(), |a| a.to_string())
            );
        }
    }
}
