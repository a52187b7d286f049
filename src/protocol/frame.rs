//! KNXnet/IP frame parsing and encoding.
//!
//! This module provides zero-copy parsing and building of KNXnet/IP frames,
//! plus the Host Protocol Address Information (HPAI) structure that carries
//! endpoints inside service bodies.
//!
//! ## Frame Structure
//!
//! All KNXnet/IP frames follow this structure:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  Header (6 bytes)           │
//! │  - Header Length: 0x06      │
//! │  - Protocol Version: 0x10   │
//! │  - Service Type: 2 bytes    │
//! │  - Total Length: 2 bytes    │
//! ├─────────────────────────────┤
//! │  Body (variable)            │
//! │  - Service-specific data    │
//! └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use knx_discover::protocol::frame::KnxnetIpFrame;
//! use knx_discover::protocol::ServiceType;
//!
//! let data = [0x06, 0x10, 0x02, 0x01, 0x00, 0x0E, 8, 1, 0, 0, 0, 0, 0, 0];
//! let frame = KnxnetIpFrame::parse(&data).unwrap();
//! assert_eq!(frame.service_type(), ServiceType::SearchRequest);
//! assert_eq!(frame.body().len(), 8);
//! ```

use core::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ServiceType, HEADER_SIZE_10, IPV4_UDP, KNXNETIP_VERSION_10, MAX_FRAME_SIZE,
};

/// Compiler hint for unlikely branches (error paths)
#[inline(always)]
#[cold]
const fn unlikely(b: bool) -> bool {
    b
}

/// KNXnet/IP frame header (6 bytes)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Header Len   │ Protocol Ver │  Service Type ID    │
/// │   (1 byte)   │   (1 byte)   │     (2 bytes)       │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │           Total Length (2 bytes)                   │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnxnetIpHeader {
    /// Header length (should be 0x06)
    pub header_length: u8,
    /// Protocol version (should be 0x10 for v1.0)
    pub protocol_version: u8,
    /// Service type identifier
    pub service_type: ServiceType,
    /// Total length of frame (header + body)
    pub total_length: u16,
}

impl KnxnetIpHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 6;

    /// Create a new header
    pub const fn new(service_type: ServiceType, body_length: u16) -> Self {
        Self {
            header_length: HEADER_SIZE_10,
            protocol_version: KNXNETIP_VERSION_10,
            service_type,
            total_length: Self::SIZE as u16 + body_length,
        }
    }

    /// Parse a header from a byte slice
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is too small
    /// - Header length is invalid
    /// - Protocol version is unsupported
    /// - Service type is unknown
    #[inline]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(&[header_length, protocol_version, st_hi, st_lo, len_hi, len_lo]) =
            data.get(..Self::SIZE).and_then(|h| <&[u8; 6]>::try_from(h).ok())
        else {
            return Err(KnxError::buffer_too_small());
        };

        if unlikely(header_length != HEADER_SIZE_10) {
            return Err(KnxError::invalid_frame());
        }

        if unlikely(protocol_version != KNXNETIP_VERSION_10) {
            return Err(KnxError::unsupported_version());
        }

        let service_type = ServiceType::from_u16(u16::from_be_bytes([st_hi, st_lo]))
            .ok_or_else(KnxError::unsupported_service_type)?;

        Ok(Self {
            header_length,
            protocol_version,
            service_type,
            total_length: u16::from_be_bytes([len_hi, len_lo]),
        })
    }

    /// Encode the header into a byte buffer
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the buffer is too small
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = self.header_length;
        buf[1] = self.protocol_version;
        buf[2..4].copy_from_slice(&self.service_type.to_u16().to_be_bytes());
        buf[4..6].copy_from_slice(&self.total_length.to_be_bytes());

        Ok(Self::SIZE)
    }

    /// Get the expected body length from the header
    pub const fn body_length(&self) -> u16 {
        self.total_length.saturating_sub(Self::SIZE as u16)
    }
}

/// Zero-copy view of a KNXnet/IP frame
#[derive(Debug)]
pub struct KnxnetIpFrame<'a> {
    /// Reference to the complete frame data
    data: &'a [u8],
    /// Parsed header
    header: KnxnetIpHeader,
}

impl<'a> KnxnetIpFrame<'a> {
    /// Parse a KNXnet/IP frame from a byte slice
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is too small
    /// - Header is invalid
    /// - Total length is shorter than the header or longer than the datagram
    #[inline]
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = KnxnetIpHeader::parse(data)?;
        let total = usize::from(header.total_length);

        if unlikely(total < KnxnetIpHeader::SIZE || data.len() < total) {
            return Err(KnxError::invalid_frame());
        }

        Ok(Self { data, header })
    }

    /// Get the frame header
    #[inline]
    pub const fn header(&self) -> &KnxnetIpHeader {
        &self.header
    }

    /// Get the service type
    #[inline]
    pub const fn service_type(&self) -> ServiceType {
        self.header.service_type
    }

    /// Get the frame body (payload after header)
    #[inline]
    pub fn body(&self) -> &'a [u8] {
        &self.data[KnxnetIpHeader::SIZE..usize::from(self.header.total_length)]
    }

    /// Get the complete frame data, without trailing bytes beyond total length
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        &self.data[..usize::from(self.header.total_length)]
    }
}

/// Builder for creating KNXnet/IP frames
///
/// This builder helps construct valid KNXnet/IP frames with proper headers.
#[derive(Debug)]
pub struct FrameBuilder<'a> {
    service_type: ServiceType,
    body: &'a [u8],
}

impl<'a> FrameBuilder<'a> {
    /// Create a new frame builder
    pub const fn new(service_type: ServiceType, body: &'a [u8]) -> Self {
        Self { service_type, body }
    }

    /// Build the frame into a buffer
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is too small
    /// - Body is too large
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let total_size = self.size();

        if total_size > MAX_FRAME_SIZE {
            return Err(KnxError::payload_too_large());
        }

        if buf.len() < total_size {
            return Err(KnxError::buffer_too_small());
        }

        let header = KnxnetIpHeader::new(self.service_type, self.body.len() as u16);
        header.encode(buf)?;
        buf[KnxnetIpHeader::SIZE..total_size].copy_from_slice(self.body);

        Ok(total_size)
    }

    /// Build the frame into a newly allocated vector
    ///
    /// # Errors
    ///
    /// Returns error if the body is too large
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size()];
        self.build(&mut buf)?;
        Ok(buf)
    }

    /// Calculate the total frame size
    pub const fn size(&self) -> usize {
        KnxnetIpHeader::SIZE + self.body.len()
    }
}

/// Host Protocol Address Information (HPAI)
///
/// Structure containing endpoint information (IP address and port).
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Structure Len│ Host Protocol│   IP Address        │
/// │   (1 byte)   │   (1 byte)   │   (4 bytes IPv4)    │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │                Port (2 bytes)                      │
/// └────────────────────────────────────────────────────┘
/// ```
///
/// The all-zero form ([`Hpai::NAT`]) asks the server to reply to the address
/// and port it observed on the incoming datagram instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hpai {
    /// Host protocol code
    pub host_protocol: u8,
    /// IPv4 address
    pub ip_address: Ipv4Addr,
    /// UDP port
    pub port: u16,
}

impl Hpai {
    /// Size of HPAI structure for IPv4
    pub const SIZE: usize = 8;

    /// Unspecified endpoint (0.0.0.0:0) requesting a NAT-style reply
    pub const NAT: Self = Self::new(Ipv4Addr::UNSPECIFIED, 0);

    /// Create a new HPAI for IPv4 UDP
    pub const fn new(ip_address: Ipv4Addr, port: u16) -> Self {
        Self {
            host_protocol: IPV4_UDP,
            ip_address,
            port,
        }
    }

    /// Check if this is the unspecified NAT sentinel (address or port zero)
    pub fn is_nat(&self) -> bool {
        self.ip_address.is_unspecified() || self.port == 0
    }

    /// Endpoint as a socket address
    pub const fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip_address, self.port)
    }

    /// Parse HPAI from bytes
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the buffer is short or the structure length is wrong
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        if data[0] != Self::SIZE as u8 {
            return Err(KnxError::invalid_frame());
        }

        Ok(Self {
            host_protocol: data[1],
            ip_address: Ipv4Addr::new(data[2], data[3], data[4], data[5]),
            port: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Encode HPAI into bytes
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the buffer is too small
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = Self::SIZE as u8;
        buf[1] = self.host_protocol;
        buf[2..6].copy_from_slice(&self.ip_address.octets());
        buf[6..8].copy_from_slice(&self.port.to_be_bytes());

        Ok(Self::SIZE)
    }
}

impl From<SocketAddrV4> for Hpai {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<Hpai> for SocketAddrV4 {
    fn from(hpai: Hpai) -> Self {
        hpai.socket_addr()
    }
}

impl fmt::Display for Hpai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_address, self.port)
    }
}
