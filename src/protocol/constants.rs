//! KNXnet/IP protocol constants and service type identifiers.

use std::net::{Ipv4Addr, SocketAddrV4};

/// KNXnet/IP protocol version 1.0
pub const KNXNETIP_VERSION_10: u8 = 0x10;

/// Standard KNXnet/IP header length (6 bytes)
pub const HEADER_SIZE_10: u8 = 0x06;

/// Standard UDP port for KNXnet/IP communication
pub const KNXNETIP_DEFAULT_PORT: u16 = 3671;

/// Maximum size of a KNXnet/IP frame accepted by this crate
pub const MAX_FRAME_SIZE: usize = 512;

/// KNXnet/IP system setup multicast group used for discovery and routing
pub const KNXNETIP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

/// Well-known discovery endpoint (224.0.23.12:3671)
pub const DISCOVERY_ENDPOINT: SocketAddrV4 =
    SocketAddrV4::new(KNXNETIP_MULTICAST_ADDR, KNXNETIP_DEFAULT_PORT);

// =============================================================================
// Service Type Identifiers
// =============================================================================

/// KNXnet/IP Service Type Identifiers recognised by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServiceType {
    // Core services (0x02xx)
    /// `SEARCH_REQUEST` - Device discovery request
    SearchRequest = 0x0201,
    /// `SEARCH_RESPONSE` - Device discovery response
    SearchResponse = 0x0202,
    /// `DESCRIPTION_REQUEST` - Device description request
    DescriptionRequest = 0x0203,
    /// `DESCRIPTION_RESPONSE` - Device description response
    DescriptionResponse = 0x0204,
    /// `CONNECT_REQUEST` - Connection request
    ConnectRequest = 0x0205,
    /// `CONNECT_RESPONSE` - Connection response
    ConnectResponse = 0x0206,
    /// `CONNECTIONSTATE_REQUEST` - Connection state request (heartbeat)
    ConnectionstateRequest = 0x0207,
    /// `CONNECTIONSTATE_RESPONSE` - Connection state response
    ConnectionstateResponse = 0x0208,
    /// `DISCONNECT_REQUEST` - Disconnect request
    DisconnectRequest = 0x0209,
    /// `DISCONNECT_RESPONSE` - Disconnect response
    DisconnectResponse = 0x020A,
    /// `SEARCH_REQUEST_EXT` - Extended device discovery request (KNX IP v2)
    SearchRequestExtended = 0x020B,
    /// `SEARCH_RESPONSE_EXT` - Extended device discovery response (KNX IP v2)
    SearchResponseExtended = 0x020C,

    // Tunnelling (0x04xx)
    /// `TUNNELLING_REQUEST` - Tunnelling data request
    TunnellingRequest = 0x0420,
    /// `TUNNELLING_ACK` - Tunnelling acknowledgement
    TunnellingAck = 0x0421,

    // Routing (0x05xx)
    /// `ROUTING_INDICATION` - Routing indication (multicast)
    RoutingIndication = 0x0530,
    /// `ROUTING_LOST_MESSAGE` - Routing lost message indication
    RoutingLostMessage = 0x0531,
    /// `ROUTING_BUSY` - Routing busy indication
    RoutingBusy = 0x0532,
}

impl ServiceType {
    /// Convert a u16 to `ServiceType`
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0201 => Some(Self::SearchRequest),
            0x0202 => Some(Self::SearchResponse),
            0x0203 => Some(Self::DescriptionRequest),
            0x0204 => Some(Self::DescriptionResponse),
            0x0205 => Some(Self::ConnectRequest),
            0x0206 => Some(Self::ConnectResponse),
            0x0207 => Some(Self::ConnectionstateRequest),
            0x0208 => Some(Self::ConnectionstateResponse),
            0x0209 => Some(Self::DisconnectRequest),
            0x020A => Some(Self::DisconnectResponse),
            0x020B => Some(Self::SearchRequestExtended),
            0x020C => Some(Self::SearchResponseExtended),
            0x0420 => Some(Self::TunnellingRequest),
            0x0421 => Some(Self::TunnellingAck),
            0x0530 => Some(Self::RoutingIndication),
            0x0531 => Some(Self::RoutingLostMessage),
            0x0532 => Some(Self::RoutingBusy),
            _ => None,
        }
    }

    /// Convert `ServiceType` to u16
    pub const fn to_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Host Protocol Codes
// =============================================================================

/// IPv4 UDP protocol
pub const IPV4_UDP: u8 = 0x01;

/// IPv4 TCP protocol
pub const IPV4_TCP: u8 = 0x02;

// =============================================================================
// Description Information Block Types
// =============================================================================

/// `DEVICE_INFO` DIB
pub const DIB_DEVICE_INFO: u8 = 0x01;

/// `SUPP_SVC_FAMILIES` DIB
pub const DIB_SUPP_SVC_FAMILIES: u8 = 0x02;

/// `IP_CONFIG` DIB
pub const DIB_IP_CONFIG: u8 = 0x03;

/// `IP_CUR_CONFIG` DIB
pub const DIB_IP_CUR_CONFIG: u8 = 0x04;

/// `KNX_ADDRESSES` DIB
pub const DIB_KNX_ADDRESSES: u8 = 0x05;

/// `MFR_DATA` DIB
pub const DIB_MFR_DATA: u8 = 0xFE;

// =============================================================================
// KNX Medium Codes
// =============================================================================

/// KNX communication medium reported in the device DIB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KnxMedium {
    /// Twisted pair 1
    Tp1,
    /// Powerline 110
    Pl110,
    /// Radio frequency
    Rf,
    /// KNX IP
    KnxIp,
    /// Any code not assigned above
    Unknown(u8),
}

impl KnxMedium {
    /// Convert a medium code to `KnxMedium`
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x02 => Self::Tp1,
            0x04 => Self::Pl110,
            0x10 => Self::Rf,
            0x20 => Self::KnxIp,
            other => Self::Unknown(other),
        }
    }

    /// Convert `KnxMedium` to its medium code
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Tp1 => 0x02,
            Self::Pl110 => 0x04,
            Self::Rf => 0x10,
            Self::KnxIp => 0x20,
            Self::Unknown(code) => code,
        }
    }
}

// =============================================================================
// Service Family Identifiers
// =============================================================================

/// `KNXnet/IP Core`
pub const FAMILY_CORE: u8 = 0x02;

/// `KNXnet/IP Device Management`
pub const FAMILY_DEVICE_MANAGEMENT: u8 = 0x03;

/// `KNXnet/IP Tunnelling`
pub const FAMILY_TUNNELING: u8 = 0x04;

/// `KNXnet/IP Routing`
pub const FAMILY_ROUTING: u8 = 0x05;

/// `KNXnet/IP Remote Logging`
pub const FAMILY_REMOTE_LOGGING: u8 = 0x06;

/// `KNXnet/IP Remote Configuration and Diagnosis`
pub const FAMILY_REMOTE_CONFIGURATION: u8 = 0x07;

/// `KNXnet/IP Object Server`
pub const FAMILY_OBJECT_SERVER: u8 = 0x08;

/// `KNXnet/IP Security`
pub const FAMILY_SECURITY: u8 = 0x09;
