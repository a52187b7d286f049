//! In-memory network for testing discovery without real sockets.
//!
//! [`MockNetwork`] is a [`Connector`] whose transports exchange datagrams over
//! channels. Scripted [`MockServer`]s answer search and description requests
//! the way KNXnet/IP servers do, optionally after a delay, and arbitrary noise
//! can be injected ahead of their replies.
//!
//! ## Example
//!
//! ```rust
//! use knx_discover::net::mock_transport::{MockNetwork, MockServer};
//! use knx_discover::Discoverer;
//!
//! let net = MockNetwork::new();
//! net.add_server(MockServer::new("Gateway", "192.168.1.10:3671".parse().unwrap()));
//!
//! let discoverer = Discoverer::builder().connector(net.clone()).build().unwrap();
//! discoverer.start_search(1, true).unwrap();
//! assert_eq!(discoverer.search_responses().len(), 1);
//!
//! // Verify what was sent
//! assert_eq!(net.sent_packets().len(), 1);
//! ```

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{KnxError, Result};
use crate::net::transport::{BindOptions, Connector, Transport};
use crate::protocol::{
    decode_request, DescriptionResponse, DeviceInfo, Hpai, IndividualAddress, KnxMedium, Request,
    SearchResponse, ServiceFamilies, ServiceFamily, FAMILY_CORE, FAMILY_TUNNELING,
    KNXNETIP_MULTICAST_ADDR,
};

/// First port handed out for ephemeral binds
const FIRST_EPHEMERAL_PORT: u16 = 50000;

type Datagram = (Vec<u8>, SocketAddrV4);

/// A scripted KNXnet/IP server on the mock network
#[derive(Debug, Clone)]
pub struct MockServer {
    control_endpoint: SocketAddrV4,
    advertised_endpoint: Hpai,
    name: String,
    address: IndividualAddress,
    delay: Duration,
    respond_search: bool,
    respond_description: bool,
    malformed_description: bool,
}

impl MockServer {
    /// Server reachable at `control_endpoint`, answering everything immediately
    pub fn new(name: impl Into<String>, control_endpoint: SocketAddrV4) -> Self {
        Self {
            control_endpoint,
            advertised_endpoint: Hpai::from(control_endpoint),
            name: name.into(),
            address: IndividualAddress::from(0x1101),
            delay: Duration::ZERO,
            respond_search: true,
            respond_description: true,
            malformed_description: false,
        }
    }

    /// Delay every reply
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// KNX individual address reported in the device DIB
    #[must_use]
    pub fn with_address(mut self, raw: u16) -> Self {
        self.address = IndividualAddress::from(raw);
        self
    }

    /// Control endpoint HPAI put into search responses
    #[must_use]
    pub fn advertising(mut self, endpoint: Hpai) -> Self {
        self.advertised_endpoint = endpoint;
        self
    }

    /// Ignore search requests
    #[must_use]
    pub fn silent_to_search(mut self) -> Self {
        self.respond_search = false;
        self
    }

    /// Ignore description requests
    #[must_use]
    pub fn silent_to_description(mut self) -> Self {
        self.respond_description = false;
        self
    }

    /// Answer description requests with an undecodable frame
    #[must_use]
    pub fn malformed_description(mut self) -> Self {
        self.malformed_description = true;
        self
    }

    /// Where the server receives requests
    pub const fn control_endpoint(&self) -> SocketAddrV4 {
        self.control_endpoint
    }

    fn device(&self) -> DeviceInfo {
        let ip = self.control_endpoint.ip().octets();
        DeviceInfo {
            medium: KnxMedium::Tp1,
            status: 0,
            address: self.address,
            project_installation_id: 0,
            serial_number: [0x00, 0xFA, ip[0], ip[1], ip[2], ip[3]],
            multicast_address: KNXNETIP_MULTICAST_ADDR,
            mac_address: [0x02, 0x00, ip[0], ip[1], ip[2], ip[3]],
            name: self.name.clone(),
        }
    }

    fn families() -> ServiceFamilies {
        ServiceFamilies {
            families: vec![
                ServiceFamily {
                    id: FAMILY_CORE,
                    version: 1,
                },
                ServiceFamily {
                    id: FAMILY_TUNNELING,
                    version: 1,
                },
            ],
        }
    }

    /// The search response this server sends
    pub fn search_response(&self) -> SearchResponse {
        SearchResponse {
            control_endpoint: self.advertised_endpoint,
            device: self.device(),
            service_families: Self::families(),
            other_dibs: Vec::new(),
        }
    }

    /// The description response this server sends
    pub fn description_response(&self) -> DescriptionResponse {
        DescriptionResponse {
            device: self.device(),
            service_families: Self::families(),
            other_dibs: Vec::new(),
        }
    }
}

/// A datagram recorded by the mock network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    /// Local address of the sending transport
    pub from: SocketAddrV4,
    /// Destination
    pub to: SocketAddrV4,
    /// Payload
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct SocketEntry {
    id: u64,
    local: SocketAddrV4,
    reuse: bool,
    group: Option<Ipv4Addr>,
    tx: Sender<Datagram>,
}

impl SocketEntry {
    fn accepts(&self, dest: SocketAddrV4) -> bool {
        if self.local.port() != dest.port() {
            return false;
        }
        if dest.ip().is_multicast() {
            self.group == Some(*dest.ip())
        } else {
            true
        }
    }
}

#[derive(Debug)]
struct NetState {
    sockets: Vec<SocketEntry>,
    servers: Vec<MockServer>,
    noise: Vec<Datagram>,
    sent: Vec<SentPacket>,
    next_port: u16,
    next_id: u64,
}

impl Default for NetState {
    fn default() -> Self {
        Self {
            sockets: Vec::new(),
            servers: Vec::new(),
            noise: Vec::new(),
            sent: Vec::new(),
            next_port: FIRST_EPHEMERAL_PORT,
            next_id: 0,
        }
    }
}

impl NetState {
    fn port_in_use(&self, local: SocketAddrV4, reuse: bool) -> bool {
        self.sockets.iter().any(|s| {
            s.local.port() == local.port()
                && (s.local.ip() == local.ip()
                    || s.local.ip().is_unspecified()
                    || local.ip().is_unspecified())
                && !(s.reuse && reuse)
        })
    }

    fn ephemeral_port(&mut self) -> u16 {
        loop {
            let port = self.next_port;
            self.next_port = self.next_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
            if !self.sockets.iter().any(|s| s.local.port() == port) {
                return port;
            }
        }
    }

    fn deliver(&self, data: &[u8], from: SocketAddrV4, dest: SocketAddrV4) {
        for socket in self.sockets.iter().filter(|s| s.accepts(dest)) {
            let _ = socket.tx.send((data.to_vec(), from));
        }
    }
}

/// In-memory datagram network implementing [`Connector`]
///
/// Cloning yields another handle to the same network.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetState>>,
}

impl MockNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a server
    pub fn add_server(&self, server: MockServer) {
        self.state.lock().servers.push(server);
    }

    /// Inject a datagram delivered to every searcher before any server reply
    pub fn add_noise(&self, data: Vec<u8>, from: SocketAddrV4) {
        self.state.lock().noise.push((data, from));
    }

    /// Every datagram sent so far, in order
    pub fn sent_packets(&self) -> Vec<SentPacket> {
        self.state.lock().sent.clone()
    }

    /// Number of transports currently bound
    pub fn open_sockets(&self) -> usize {
        self.state.lock().sockets.len()
    }

    fn unregister(&self, id: u64) {
        self.state.lock().sockets.retain(|s| s.id != id);
    }

    fn handle_send(&self, data: &[u8], from: SocketAddrV4, to: SocketAddrV4) {
        let mut state = self.state.lock();
        state.sent.push(SentPacket {
            from,
            to,
            data: data.to_vec(),
        });

        let Ok(request) = decode_request(data) else {
            return;
        };

        let mut replies = Vec::new();
        match request {
            Request::Search(search) => {
                let reply_to = reply_address(search.discovery_endpoint, from);
                for (noise, noise_from) in &state.noise {
                    state.deliver(noise, *noise_from, reply_to);
                }
                let multicast = to.ip().is_multicast();
                for server in state
                    .servers
                    .iter()
                    .filter(|s| s.respond_search && (multicast || s.control_endpoint == to))
                {
                    if let Ok(frame) = server.search_response().encode() {
                        replies.push((server.delay, frame, server.control_endpoint, reply_to));
                    }
                }
            }
            Request::Description(description) => {
                let reply_to = reply_address(description.control_endpoint, from);
                for server in state
                    .servers
                    .iter()
                    .filter(|s| s.respond_description && s.control_endpoint == to)
                {
                    let frame = if server.malformed_description {
                        Ok(vec![0x06, 0x10, 0x02, 0x04, 0x00, 0x0A, 0x36, 0x01, 0x02, 0x00])
                    } else {
                        server.description_response().encode()
                    };
                    if let Ok(frame) = frame {
                        replies.push((server.delay, frame, server.control_endpoint, reply_to));
                    }
                }
            }
        }

        for (delay, frame, source, dest) in replies {
            if delay.is_zero() {
                state.deliver(&frame, source, dest);
            } else {
                let net = self.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    net.state.lock().deliver(&frame, source, dest);
                });
            }
        }
    }
}

/// Where a server sends its reply: the advertised HPAI, or the observed
/// sender for the NAT sentinel
fn reply_address(advertised: Hpai, sender: SocketAddrV4) -> SocketAddrV4 {
    if advertised.is_nat() {
        sender
    } else {
        advertised.socket_addr()
    }
}

impl Connector for MockNetwork {
    fn open(&self, options: &BindOptions) -> Result<Box<dyn Transport>> {
        let mut state = self.state.lock();

        let local = if options.local.port() == 0 {
            SocketAddrV4::new(*options.local.ip(), state.ephemeral_port())
        } else if state.port_in_use(options.local, options.reuse) {
            return Err(KnxError::bind_failed(io::Error::from(io::ErrorKind::AddrInUse)));
        } else {
            options.local
        };

        let (tx, rx) = channel::unbounded();
        let id = state.next_id;
        state.next_id += 1;
        state.sockets.push(SocketEntry {
            id,
            local,
            reuse: options.reuse,
            group: options.join_group,
            tx,
        });

        Ok(Box::new(MockTransport {
            net: self.clone(),
            id,
            local,
            rx,
            closed: false,
        }))
    }
}

/// Transport bound on a [`MockNetwork`]
#[derive(Debug)]
pub struct MockTransport {
    net: MockNetwork,
    id: u64,
    local: SocketAddrV4,
    rx: Receiver<Datagram>,
    closed: bool,
}

impl MockTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(KnxError::receive_failed(Some(io::Error::from(
                io::ErrorKind::NotConnected,
            ))));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<()> {
        self.ensure_open()?;
        self.net.handle_send(data, self.local, addr);
        Ok(())
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddrV4)>> {
        self.ensure_open()?;
        match self.rx.recv_timeout(timeout) {
            Ok((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(Some((n, from)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(KnxError::receive_failed(None)),
        }
    }

    fn local_addr(&self) -> Result<SocketAddrV4> {
        self.ensure_open()?;
        Ok(self.local)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.net.unregister(self.id);
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_response, encode_search_request, Response, DISCOVERY_ENDPOINT};

    fn open(net: &MockNetwork, port: u16) -> Box<dyn Transport> {
        net.open(&BindOptions::unicast(SocketAddrV4::new(
            Ipv4Addr::new(192, 168, 1, 50),
            port,
        )))
        .unwrap()
    }

    #[test]
    fn test_multicast_search_reaches_all_servers() {
        let net = MockNetwork::new();
        net.add_server(MockServer::new("A", "192.168.1.10:3671".parse().unwrap()));
        net.add_server(MockServer::new("B", "192.168.1.11:3671".parse().unwrap()));

        let mut transport = open(&net, 0);
        let local = transport.local_addr().unwrap();
        assert_eq!(local.port(), FIRST_EPHEMERAL_PORT);

        let request = encode_search_request(&Hpai::from(local)).unwrap();
        transport.send_to(&request, DISCOVERY_ENDPOINT).unwrap();

        let mut buf = [0u8; 512];
        let mut names = Vec::new();
        while let Some((n, _)) = transport
            .recv_from(&mut buf, Duration::from_millis(50))
            .unwrap()
        {
            match decode_response(&buf[..n]).unwrap() {
                Response::Search(r) => names.push(r.device.name),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(names, ["A", "B"]);
        assert_eq!(net.sent_packets()[0].to, DISCOVERY_ENDPOINT);
    }

    #[test]
    fn test_nat_reply_goes_to_sender() {
        let net = MockNetwork::new();
        let server = MockServer::new("A", "192.168.1.10:3671".parse().unwrap());
        net.add_server(server.clone());

        let mut transport = open(&net, 0);
        let request = encode_search_request(&Hpai::NAT).unwrap();
        transport.send_to(&request, server.control_endpoint()).unwrap();

        let mut buf = [0u8; 512];
        let (_, from) = transport
            .recv_from(&mut buf, Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(from, server.control_endpoint());
    }

    #[test]
    fn test_port_conflict() {
        let net = MockNetwork::new();
        let _first = open(&net, 40000);
        match net.open(&BindOptions::unicast(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            40000,
        ))) {
            Err(KnxError::Transport(e)) => {
                assert!(e.is_bind_failed());
                assert_eq!(e.io_kind(), Some(io::ErrorKind::AddrInUse));
            }
            Err(other) => panic!("unexpected {other:?}"),
            Ok(_) => panic!("bind should conflict"),
        }
    }

    #[test]
    fn test_shared_multicast_port() {
        let net = MockNetwork::new();
        let options = BindOptions::unicast(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 3671))
            .with_group(KNXNETIP_MULTICAST_ADDR);
        let _a = net.open(&options).unwrap();
        let _b = net.open(&options).unwrap();
        assert_eq!(net.open_sockets(), 2);
    }

    #[test]
    fn test_close_unregisters() {
        let net = MockNetwork::new();
        let mut transport = open(&net, 0);
        assert_eq!(net.open_sockets(), 1);
        transport.close();
        assert_eq!(net.open_sockets(), 0);
        assert!(transport.local_addr().is_err());
        drop(transport);
        assert_eq!(net.open_sockets(), 0);
    }
}
