//! Received responses with their arrival metadata.

use core::fmt;
use std::net::SocketAddrV4;
use std::time::Duration;

use crate::protocol::{DescriptionResponse, SearchResponse};

/// A decoded response together with where and when it arrived
///
/// Instances are immutable once created. `==` compares every field, arrival
/// time included, so two answers from the same server are usually unequal.
/// Search results are told apart by [`server_key`](Self::server_key).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Discovered<T> {
    response: T,
    remote: SocketAddrV4,
    local: Option<SocketAddrV4>,
    arrived_after: Duration,
}

impl<T> Discovered<T> {
    pub(crate) fn new(
        response: T,
        remote: SocketAddrV4,
        local: Option<SocketAddrV4>,
        arrived_after: Duration,
    ) -> Self {
        Self {
            response,
            remote,
            local,
            arrived_after,
        }
    }

    /// The decoded response
    pub fn response(&self) -> &T {
        &self.response
    }

    /// Consume the record, keeping only the response
    pub fn into_response(self) -> T {
        self.response
    }

    /// Source address of the datagram
    pub const fn remote(&self) -> SocketAddrV4 {
        self.remote
    }

    /// Local address the datagram was received on
    pub const fn local(&self) -> Option<SocketAddrV4> {
        self.local
    }

    /// Time between the start of the exchange and the arrival of the datagram
    pub const fn arrived_after(&self) -> Duration {
        self.arrived_after
    }
}

impl Discovered<SearchResponse> {
    /// Identity of the responding server
    ///
    /// The control endpoint the server reports; servers advertising the NAT
    /// sentinel are told apart by their sender address instead.
    pub fn server_key(&self) -> SocketAddrV4 {
        let endpoint = self.response.control_endpoint;
        if endpoint.is_nat() {
            self.remote
        } else {
            endpoint.socket_addr()
        }
    }
}

impl fmt::Display for Discovered<SearchResponse> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (from {} after {} ms)",
            self.response,
            self.remote,
            self.arrived_after.as_millis()
        )
    }
}

impl fmt::Display for Discovered<DescriptionResponse> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {})", self.response, self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock_transport::MockServer;
    use crate::protocol::Hpai;

    fn addr(s: &str) -> SocketAddrV4 {
        s.parse().unwrap()
    }

    fn answer(server: &MockServer, remote: &str, after_ms: u64) -> Discovered<SearchResponse> {
        Discovered::new(
            server.search_response(),
            addr(remote),
            None,
            Duration::from_millis(after_ms),
        )
    }

    #[test]
    fn test_equality_is_per_answer_identity_is_per_server() {
        let server = MockServer::new("A", addr("192.168.1.10:3671"));
        let first = answer(&server, "192.168.1.10:3671", 12);
        let again = answer(&server, "192.168.1.10:3671", 40);
        let relayed = answer(&server, "10.0.0.1:50000", 12);

        assert_eq!(first, first.clone());
        assert_ne!(first, again);
        assert_ne!(first, relayed);
        assert_eq!(first.server_key(), again.server_key());
        assert_eq!(first.server_key(), relayed.server_key());
        assert_eq!(first.server_key(), addr("192.168.1.10:3671"));
    }

    #[test]
    fn test_nat_servers_keyed_by_sender() {
        let server = MockServer::new("B", addr("192.168.1.11:3671")).advertising(Hpai::NAT);
        let a = answer(&server, "192.168.1.11:3671", 5);
        let b = answer(&server, "192.168.1.12:3671", 5);

        assert_eq!(a.server_key(), addr("192.168.1.11:3671"));
        assert_ne!(a.server_key(), b.server_key());
    }
}
