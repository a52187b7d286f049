//! Description Information Blocks (DIBs).
//!
//! Search and description responses describe a server through a sequence of
//! DIBs. Every DIB starts with a structure length and a type code:
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────┐
//! │ Structure Len│  DIB Type    │   DIB payload ...   │
//! │   (1 byte)   │   (1 byte)   │   (len - 2 bytes)   │
//! └──────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! The device information and supported service families DIBs are decoded;
//! every other block is kept as a [`RawDib`].

use core::fmt;
use std::net::Ipv4Addr;

use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    KnxMedium, DIB_DEVICE_INFO, DIB_SUPP_SVC_FAMILIES, FAMILY_CORE, FAMILY_DEVICE_MANAGEMENT,
    FAMILY_OBJECT_SERVER, FAMILY_REMOTE_CONFIGURATION, FAMILY_REMOTE_LOGGING, FAMILY_ROUTING,
    FAMILY_SECURITY, FAMILY_TUNNELING,
};

/// KNX Individual Address (Area.Line.Device)
///
/// Identifies the server's interface on the KNX bus.
///
/// # Examples
///
/// ```
/// use knx_discover::protocol::dib::IndividualAddress;
///
/// let addr = IndividualAddress::from(0x11FAu16);
/// assert_eq!(addr.area(), 1);
/// assert_eq!(addr.line(), 1);
/// assert_eq!(addr.device(), 250);
/// assert_eq!(addr.to_string(), "1.1.250");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndividualAddress {
    raw: u16,
}

impl IndividualAddress {
    /// Area (0-15)
    #[inline]
    pub const fn area(self) -> u8 {
        ((self.raw >> 12) & 0x0F) as u8
    }

    /// Line (0-15)
    #[inline]
    pub const fn line(self) -> u8 {
        ((self.raw >> 8) & 0x0F) as u8
    }

    /// Device (0-255)
    #[inline]
    pub const fn device(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Raw 16-bit representation
    #[inline]
    pub const fn to_raw(self) -> u16 {
        self.raw
    }
}

impl From<u16> for IndividualAddress {
    #[inline]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

/// `DEVICE_INFO` DIB (type 0x01, 54 bytes)
///
/// ```text
/// len | type | medium | status | KNX address (2) | project id (2)
/// serial number (6) | routing multicast (4) | MAC (6) | friendly name (30)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// KNX medium the server is attached to
    pub medium: KnxMedium,
    /// Device status byte (bit 0: programming mode)
    pub status: u8,
    /// KNX individual address of the server
    pub address: IndividualAddress,
    /// Project-installation identifier
    pub project_installation_id: u16,
    /// KNX serial number
    pub serial_number: [u8; 6],
    /// Routing multicast address (0.0.0.0 if routing is not supported)
    pub multicast_address: Ipv4Addr,
    /// MAC address of the server's IP interface
    pub mac_address: [u8; 6],
    /// Friendly name, ISO 8859-1 on the wire
    pub name: String,
}

impl DeviceInfo {
    /// Size of the device information DIB
    pub const SIZE: usize = 54;

    const NAME_SIZE: usize = 30;

    /// Check if the programming mode flag is set
    pub const fn programming_mode(&self) -> bool {
        self.status & 0x01 != 0
    }

    /// Serial number formatted as `xxxx:xxxxxxxx`
    pub fn serial_number_string(&self) -> String {
        let s = &self.serial_number;
        format!(
            "{:02x}{:02x}:{:02x}{:02x}{:02x}{:02x}",
            s[0], s[1], s[2], s[3], s[4], s[5]
        )
    }

    /// Parse from a complete DIB, header included
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the block is not a 54 byte device DIB
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }
        if usize::from(data[0]) != Self::SIZE || data[1] != DIB_DEVICE_INFO {
            return Err(KnxError::invalid_dib());
        }

        let mut serial_number = [0u8; 6];
        serial_number.copy_from_slice(&data[8..14]);
        let mut mac_address = [0u8; 6];
        mac_address.copy_from_slice(&data[18..24]);

        let name = data[24..24 + Self::NAME_SIZE]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| char::from(b))
            .collect();

        Ok(Self {
            medium: KnxMedium::from_u8(data[2]),
            status: data[3],
            address: IndividualAddress::from(u16::from_be_bytes([data[4], data[5]])),
            project_installation_id: u16::from_be_bytes([data[6], data[7]]),
            serial_number,
            multicast_address: Ipv4Addr::new(data[14], data[15], data[16], data[17]),
            mac_address,
            name,
        })
    }

    /// Encode into bytes
    ///
    /// Characters outside ISO 8859-1 are written as `?`; the name is cut at 30 bytes.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the buffer is too small
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = Self::SIZE as u8;
        buf[1] = DIB_DEVICE_INFO;
        buf[2] = self.medium.to_u8();
        buf[3] = self.status;
        buf[4..6].copy_from_slice(&self.address.to_raw().to_be_bytes());
        buf[6..8].copy_from_slice(&self.project_installation_id.to_be_bytes());
        buf[8..14].copy_from_slice(&self.serial_number);
        buf[14..18].copy_from_slice(&self.multicast_address.octets());
        buf[18..24].copy_from_slice(&self.mac_address);

        let name = &mut buf[24..Self::SIZE];
        name.fill(0);
        for (slot, c) in name.iter_mut().zip(self.name.chars()) {
            *slot = u8::try_from(u32::from(c)).unwrap_or(b'?');
        }

        Ok(Self::SIZE)
    }
}

/// One entry of the supported service families DIB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceFamily {
    /// Family identifier (see `FAMILY_*` constants)
    pub id: u8,
    /// Family version
    pub version: u8,
}

impl ServiceFamily {
    /// Human readable family name
    pub const fn name(&self) -> &'static str {
        match self.id {
            FAMILY_CORE => "core",
            FAMILY_DEVICE_MANAGEMENT => "device management",
            FAMILY_TUNNELING => "tunnelling",
            FAMILY_ROUTING => "routing",
            FAMILY_REMOTE_LOGGING => "remote logging",
            FAMILY_REMOTE_CONFIGURATION => "remote configuration",
            FAMILY_OBJECT_SERVER => "object server",
            FAMILY_SECURITY => "security",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name(), self.version)
    }
}

/// `SUPP_SVC_FAMILIES` DIB (type 0x02)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceFamilies {
    /// Families in the order the server listed them
    pub families: Vec<ServiceFamily>,
}

impl ServiceFamilies {
    /// Check if the server lists a family, in any version
    pub fn supports(&self, id: u8) -> bool {
        self.families.iter().any(|f| f.id == id)
    }

    /// Highest listed version of a family
    pub fn version(&self, id: u8) -> Option<u8> {
        self.families
            .iter()
            .filter(|f| f.id == id)
            .map(|f| f.version)
            .max()
    }

    /// Parse from a complete DIB, header included
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the type or length is wrong
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(KnxError::buffer_too_small());
        }
        let len = usize::from(data[0]);
        if len < 2 || len % 2 != 0 || data[1] != DIB_SUPP_SVC_FAMILIES {
            return Err(KnxError::invalid_dib());
        }
        if data.len() < len {
            return Err(KnxError::buffer_too_small());
        }

        let families = data[2..len]
            .chunks_exact(2)
            .map(|pair| ServiceFamily {
                id: pair[0],
                version: pair[1],
            })
            .collect();

        Ok(Self { families })
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        2 + 2 * self.families.len()
    }

    /// Encode into bytes
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the buffer is too small or the DIB exceeds 255 bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if size > usize::from(u8::MAX) {
            return Err(KnxError::payload_too_large());
        }
        if buf.len() < size {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = size as u8;
        buf[1] = DIB_SUPP_SVC_FAMILIES;
        for (slot, family) in buf[2..size].chunks_exact_mut(2).zip(&self.families) {
            slot[0] = family.id;
            slot[1] = family.version;
        }

        Ok(size)
    }
}

/// A DIB this crate does not decode, kept verbatim (header excluded)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawDib {
    /// DIB type code
    pub dib_type: u8,
    /// Payload after the two header bytes
    pub data: Vec<u8>,
}

/// A parsed description information block
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dib {
    /// Device information
    Device(DeviceInfo),
    /// Supported service families
    ServiceFamilies(ServiceFamilies),
    /// Any other block
    Other(RawDib),
}

impl Dib {
    /// Split a sequence of DIBs and decode each one
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a structure length is shorter than two bytes
    /// or runs past the end of `data`
    pub fn parse_all(mut data: &[u8]) -> Result<Vec<Self>> {
        let mut dibs = Vec::new();

        while !data.is_empty() {
            if data.len() < 2 {
                return Err(KnxError::invalid_dib());
            }
            let len = usize::from(data[0]);
            if len < 2 || len > data.len() {
                return Err(KnxError::invalid_dib());
            }

            let (block, rest) = data.split_at(len);
            dibs.push(match block[1] {
                DIB_DEVICE_INFO => Self::Device(DeviceInfo::parse(block)?),
                DIB_SUPP_SVC_FAMILIES => Self::ServiceFamilies(ServiceFamilies::parse(block)?),
                dib_type => Self::Other(RawDib {
                    dib_type,
                    data: block[2..].to_vec(),
                }),
            });
            data = rest;
        }

        Ok(dibs)
    }

    /// Encode into a growable buffer
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the block exceeds 255 bytes
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        match self {
            Self::Device(device) => {
                out.resize(start + DeviceInfo::SIZE, 0);
                device.encode(&mut out[start..])?;
            }
            Self::ServiceFamilies(families) => {
                out.resize(start + families.size(), 0);
                families.encode(&mut out[start..])?;
            }
            Self::Other(raw) => {
                let len = raw.data.len() + 2;
                if len > usize::from(u8::MAX) {
                    return Err(KnxError::payload_too_large());
                }
                out.push(len as u8);
                out.push(raw.dib_type);
                out.extend_from_slice(&raw.data);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> DeviceInfo {
        DeviceInfo {
            medium: KnxMedium::Tp1,
            status: 0x01,
            address: IndividualAddress::from(0x11FA),
            project_installation_id: 0x0001,
            serial_number: [0x00, 0xC5, 0x01, 0x02, 0x03, 0x04],
            multicast_address: Ipv4Addr::new(224, 0, 23, 12),
            mac_address: [0x00, 0x24, 0x6D, 0x01, 0x02, 0x03],
            name: "KNX IP Router 752".into(),
        }
    }

    #[test]
    fn test_individual_address_display() {
        let addr = IndividualAddress::from(0xF0FF);
        assert_eq!(addr.to_string(), "15.0.255");
        assert_eq!(addr.to_raw(), 0xF0FF);
    }

    #[test]
    fn test_device_info_encode_layout() {
        let device = sample_device();
        let mut buf = [0u8; DeviceInfo::SIZE];
        assert_eq!(device.encode(&mut buf).unwrap(), 54);

        assert_eq!(buf[0], 0x36);
        assert_eq!(buf[1], DIB_DEVICE_INFO);
        assert_eq!(buf[2], 0x02); // TP1
        assert_eq!(&buf[4..6], &[0x11, 0xFA]);
        assert_eq!(&buf[14..18], &[224, 0, 23, 12]);
        assert_eq!(&buf[24..41], b"KNX IP Router 752");
        assert_eq!(buf[41], 0);

        let parsed = DeviceInfo::parse(&buf).unwrap();
        assert_eq!(parsed, device);
        assert!(parsed.programming_mode());
        assert_eq!(parsed.serial_number_string(), "00c5:01020304");
    }

    #[test]
    fn test_device_info_latin1_name() {
        let mut device = sample_device();
        device.name = "Büro".into();
        let mut buf = [0u8; DeviceInfo::SIZE];
        device.encode(&mut buf).unwrap();
        assert_eq!(&buf[24..28], &[b'B', 0xFC, b'r', b'o']);
        assert_eq!(DeviceInfo::parse(&buf).unwrap().name, "Büro");
    }

    #[test]
    fn test_device_info_rejects_wrong_length() {
        let mut buf = [0u8; DeviceInfo::SIZE];
        sample_device().encode(&mut buf).unwrap();
        buf[0] = 0x30;
        assert!(DeviceInfo::parse(&buf).is_err());
        assert!(DeviceInfo::parse(&buf[..20]).is_err());
    }

    #[test]
    fn test_service_families() {
        let data = [0x08, 0x02, 0x02, 0x01, 0x04, 0x01, 0x04, 0x02];
        let families = ServiceFamilies::parse(&data).unwrap();
        assert!(families.supports(FAMILY_CORE));
        assert!(families.supports(FAMILY_TUNNELING));
        assert!(!families.supports(FAMILY_ROUTING));
        assert_eq!(families.version(FAMILY_TUNNELING), Some(2));
        assert_eq!(families.families[1].to_string(), "tunnelling v1");

        let mut buf = [0u8; 8];
        assert_eq!(families.encode(&mut buf).unwrap(), 8);
        assert_eq!(buf, data);
    }

    #[test]
    fn test_service_families_rejects_odd_length() {
        assert!(ServiceFamilies::parse(&[0x05, 0x02, 0x02, 0x01, 0x04]).is_err());
    }

    #[test]
    fn test_parse_all_keeps_unknown_blocks() {
        let mut data = Vec::new();
        Dib::Device(sample_device()).encode_into(&mut data).unwrap();
        data.extend_from_slice(&[0x04, 0xFE, 0x00, 0xC5]); // manufacturer data
        data.extend_from_slice(&[0x04, 0x02, 0x02, 0x01]);

        let dibs = Dib::parse_all(&data).unwrap();
        assert_eq!(dibs.len(), 3);
        assert!(matches!(dibs[0], Dib::Device(_)));
        assert_eq!(
            dibs[1],
            Dib::Other(RawDib {
                dib_type: 0xFE,
                data: vec![0x00, 0xC5]
            })
        );
        assert!(matches!(dibs[2], Dib::ServiceFamilies(_)));
    }

    #[test]
    fn test_parse_all_rejects_overrun() {
        assert!(Dib::parse_all(&[0x10, 0x02, 0x02, 0x01]).is_err());
        assert!(Dib::parse_all(&[0x00, 0x02]).is_err());
        assert!(Dib::parse_all(&[0x02]).is_err());
    }
}
