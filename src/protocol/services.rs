//! KNXnet/IP discovery and self-description services.
//!
//! ## Supported Services
//!
//! - **SEARCH** - Locate servers on the local network (multicast or unicast)
//! - **DESCRIPTION** - Ask one known server to describe itself
//!
//! ## Example
//!
//! ```rust
//! use knx_discover::protocol::frame::Hpai;
//! use knx_discover::protocol::services::encode_search_request;
//! use std::net::Ipv4Addr;
//!
//! let request = encode_search_request(&Hpai::new(Ipv4Addr::new(192, 168, 1, 50), 3671)).unwrap();
//! assert_eq!(request.len(), 14);
//! assert_eq!(&request[..4], &[0x06, 0x10, 0x02, 0x01]);
//! ```
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Server(s)
//!   |                                |
//!   |--- SEARCH_REQUEST (multicast)->|
//!   |<------ SEARCH_RESPONSE --------|  (one per server, until timeout)
//!   |                                |
//!   |--- DESCRIPTION_REQUEST ------->|  (unicast to a control endpoint)
//!   |<---- DESCRIPTION_RESPONSE -----|
//! ```

use core::fmt;

use crate::error::{KnxError, Result};
use crate::protocol::constants::ServiceType;
use crate::protocol::dib::{DeviceInfo, Dib, RawDib, ServiceFamilies};
use crate::protocol::frame::{FrameBuilder, Hpai, KnxnetIpFrame, KnxnetIpHeader};

/// Size of an encoded search or description request (header + HPAI)
pub const REQUEST_SIZE: usize = KnxnetIpHeader::SIZE + Hpai::SIZE;

/// `SEARCH_REQUEST` service (0x0201)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRequest {
    /// Where the servers should send their responses
    pub discovery_endpoint: Hpai,
}

impl SearchRequest {
    /// Create a new `SEARCH_REQUEST`
    pub const fn new(discovery_endpoint: Hpai) -> Self {
        Self { discovery_endpoint }
    }

    /// Build the complete frame
    ///
    /// Returns the number of bytes written to the buffer
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the buffer is too small
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; Hpai::SIZE];
        self.discovery_endpoint.encode(&mut body)?;
        FrameBuilder::new(ServiceType::SearchRequest, &body).build(buf)
    }

    /// Parse from a frame body
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the body holds no valid HPAI
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(Self::new(Hpai::parse(body)?))
    }
}

/// `DESCRIPTION_REQUEST` service (0x0203)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptionRequest {
    /// Where the server should send its response
    pub control_endpoint: Hpai,
}

impl DescriptionRequest {
    /// Create a new `DESCRIPTION_REQUEST`
    pub const fn new(control_endpoint: Hpai) -> Self {
        Self { control_endpoint }
    }

    /// Build the complete frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the buffer is too small
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; Hpai::SIZE];
        self.control_endpoint.encode(&mut body)?;
        FrameBuilder::new(ServiceType::DescriptionRequest, &body).build(buf)
    }

    /// Parse from a frame body
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the body holds no valid HPAI
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(Self::new(Hpai::parse(body)?))
    }
}

/// Device description shared by search and description responses
#[derive(Debug)]
struct Description {
    device: DeviceInfo,
    service_families: ServiceFamilies,
    other_dibs: Vec<RawDib>,
}

impl Description {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut device = None;
        let mut service_families = None;
        let mut other_dibs = Vec::new();

        for dib in Dib::parse_all(data)? {
            match dib {
                Dib::Device(d) if device.is_none() => device = Some(d),
                Dib::ServiceFamilies(f) if service_families.is_none() => {
                    service_families = Some(f);
                }
                Dib::Device(_) | Dib::ServiceFamilies(_) => return Err(KnxError::invalid_dib()),
                Dib::Other(raw) => other_dibs.push(raw),
            }
        }

        Ok(Self {
            device: device.ok_or_else(KnxError::missing_dib)?,
            service_families: service_families.ok_or_else(KnxError::missing_dib)?,
            other_dibs,
        })
    }

    fn encode_into(
        device: &DeviceInfo,
        service_families: &ServiceFamilies,
        other_dibs: &[RawDib],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        Dib::Device(device.clone()).encode_into(out)?;
        Dib::ServiceFamilies(service_families.clone()).encode_into(out)?;
        for raw in other_dibs {
            Dib::Other(raw.clone()).encode_into(out)?;
        }
        Ok(())
    }
}

/// `SEARCH_RESPONSE` service (0x0202, or 0x020C for extended search)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchResponse {
    /// Endpoint the server accepts control requests on
    pub control_endpoint: Hpai,
    /// Device information DIB
    pub device: DeviceInfo,
    /// Supported service families DIB
    pub service_families: ServiceFamilies,
    /// Further DIBs the server attached
    pub other_dibs: Vec<RawDib>,
}

impl SearchResponse {
    /// Parse from a frame body
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the HPAI or a mandatory DIB is missing or malformed
    pub fn parse(body: &[u8]) -> Result<Self> {
        let control_endpoint = Hpai::parse(body)?;
        let description = Description::parse(&body[Hpai::SIZE..])?;

        Ok(Self {
            control_endpoint,
            device: description.device,
            service_families: description.service_families,
            other_dibs: description.other_dibs,
        })
    }

    /// Encode as a complete `SEARCH_RESPONSE` frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame would exceed the maximum size
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = vec![0u8; Hpai::SIZE];
        self.control_endpoint.encode(&mut body)?;
        Description::encode_into(
            &self.device,
            &self.service_families,
            &self.other_dibs,
            &mut body,
        )?;
        FrameBuilder::new(ServiceType::SearchResponse, &body).to_vec()
    }
}

impl fmt::Display for SearchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" {} at {}",
            self.device.name, self.device.address, self.control_endpoint
        )?;
        write_families(f, &self.service_families)
    }
}

/// `DESCRIPTION_RESPONSE` service (0x0204)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptionResponse {
    /// Device information DIB
    pub device: DeviceInfo,
    /// Supported service families DIB
    pub service_families: ServiceFamilies,
    /// Further DIBs the server attached
    pub other_dibs: Vec<RawDib>,
}

impl DescriptionResponse {
    /// Parse from a frame body
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a mandatory DIB is missing or malformed
    pub fn parse(body: &[u8]) -> Result<Self> {
        let description = Description::parse(body)?;
        Ok(Self {
            device: description.device,
            service_families: description.service_families,
            other_dibs: description.other_dibs,
        })
    }

    /// Encode as a complete `DESCRIPTION_RESPONSE` frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame would exceed the maximum size
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(DeviceInfo::SIZE + self.service_families.size());
        Description::encode_into(
            &self.device,
            &self.service_families,
            &self.other_dibs,
            &mut body,
        )?;
        FrameBuilder::new(ServiceType::DescriptionResponse, &body).to_vec()
    }
}

impl fmt::Display for DescriptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.device;
        write!(
            f,
            "\"{}\" {} medium {:?}, serial {}, programming mode {}",
            d.name,
            d.address,
            d.medium,
            d.serial_number_string(),
            if d.programming_mode() { "on" } else { "off" }
        )?;
        write_families(f, &self.service_families)
    }
}

fn write_families(f: &mut fmt::Formatter<'_>, families: &ServiceFamilies) -> fmt::Result {
    for (i, family) in families.families.iter().enumerate() {
        f.write_str(if i == 0 { " [" } else { ", " })?;
        write!(f, "{family}")?;
    }
    if !families.families.is_empty() {
        f.write_str("]")?;
    }
    Ok(())
}

/// A decoded response datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `SEARCH_RESPONSE` or extended search response
    Search(SearchResponse),
    /// `DESCRIPTION_RESPONSE`
    Description(DescriptionResponse),
}

/// A decoded request datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `SEARCH_REQUEST` or extended search request
    Search(SearchRequest),
    /// `DESCRIPTION_REQUEST`
    Description(DescriptionRequest),
}

/// Encode a search request advertising `endpoint` as the reply address
///
/// # Errors
///
/// Never fails for IPv4 endpoints; the `Result` mirrors the other encoders.
pub fn encode_search_request(endpoint: &Hpai) -> Result<heapless::Vec<u8, REQUEST_SIZE>> {
    let mut buf = [0u8; REQUEST_SIZE];
    let len = SearchRequest::new(*endpoint).build(&mut buf)?;
    heapless::Vec::from_slice(&buf[..len]).map_err(|_| KnxError::buffer_too_small())
}

/// Encode a description request advertising `endpoint` as the reply address
///
/// # Errors
///
/// Never fails for IPv4 endpoints; the `Result` mirrors the other encoders.
pub fn encode_description_request(endpoint: &Hpai) -> Result<heapless::Vec<u8, REQUEST_SIZE>> {
    let mut buf = [0u8; REQUEST_SIZE];
    let len = DescriptionRequest::new(*endpoint).build(&mut buf)?;
    heapless::Vec::from_slice(&buf[..len]).map_err(|_| KnxError::buffer_too_small())
}

/// Decode a received datagram as a search or description response
///
/// # Errors
///
/// Returns a protocol error if the datagram is malformed or carries any other
/// service type
pub fn decode_response(data: &[u8]) -> Result<Response> {
    let frame = KnxnetIpFrame::parse(data)?;
    match frame.service_type() {
        ServiceType::SearchResponse | ServiceType::SearchResponseExtended => {
            SearchResponse::parse(frame.body()).map(Response::Search)
        }
        ServiceType::DescriptionResponse => {
            DescriptionResponse::parse(frame.body()).map(Response::Description)
        }
        _ => Err(KnxError::unexpected_service_type()),
    }
}

/// Decode a received datagram as a search or description request
///
/// Server side counterpart of [`decode_response`], used by responders and test doubles.
///
/// # Errors
///
/// Returns a protocol error if the datagram is malformed or carries any other
/// service type
pub fn decode_request(data: &[u8]) -> Result<Request> {
    let frame = KnxnetIpFrame::parse(data)?;
    match frame.service_type() {
        ServiceType::SearchRequest | ServiceType::SearchRequestExtended => {
            SearchRequest::parse(frame.body()).map(Request::Search)
        }
        ServiceType::DescriptionRequest => {
            DescriptionRequest::parse(frame.body()).map(Request::Description)
        }
        _ => Err(KnxError::unexpected_service_type()),
    }
}
