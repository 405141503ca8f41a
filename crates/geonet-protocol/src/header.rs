//! Basic and Common headers
//!
//! Basic Header (4 bytes):
//! - version (4 bits) | next header (4 bits)
//! - reserved (1 byte)
//! - lifetime (1 byte, see [`Lifetime`])
//! - remaining hop limit (1 byte)
//!
//! Common Header (8 bytes):
//! - next header (4 bits) | reserved (4 bits)
//! - header type (4 bits) | header subtype (4 bits)
//! - traffic class (1 byte)
//! - flags (1 byte)
//! - payload length (2 bytes, big-endian)
//! - maximum hop limit (1 byte)
//! - reserved (1 byte)

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::lifetime::Lifetime;
use crate::position::{read_u16, AreaShape};

/// Highest protocol version this implementation accepts
pub const GN_PROTOCOL_VERSION: u8 = 1;

pub const BASIC_HEADER_SIZE: usize = 4;
pub const COMMON_HEADER_SIZE: usize = 8;

/// Payload carried after the Basic header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BasicNextHeader {
    Any = 0,
    Common = 1,
    Secured = 2,
}

impl BasicNextHeader {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BasicNextHeader::Any),
            1 => Ok(BasicNextHeader::Common),
            2 => Ok(BasicNextHeader::Secured),
            other => Err(ProtocolError::InvalidBasicNextHeader(other)),
        }
    }
}

/// Upper-layer protocol carried after the GeoNetworking headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommonNextHeader {
    Any = 0,
    BtpA = 1,
    BtpB = 2,
    Ipv6 = 3,
}

impl CommonNextHeader {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CommonNextHeader::Any),
            1 => Ok(CommonNextHeader::BtpA),
            2 => Ok(CommonNextHeader::BtpB),
            3 => Ok(CommonNextHeader::Ipv6),
            other => Err(ProtocolError::InvalidCommonNextHeader(other)),
        }
    }
}

/// Header type / subtype pair of the Common header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Type 0; carries no extended header
    Any,
    Beacon,
    GeoUnicast,
    GeoAnycast(AreaShape),
    GeoBroadcast(AreaShape),
    SingleHopBroadcast,
    TopologicallyScopedBroadcast,
    LocationServiceRequest,
    LocationServiceReply,
}

impl PacketType {
    pub const TYPE_ANY: u8 = 0;
    pub const TYPE_BEACON: u8 = 1;
    pub const TYPE_GEO_UNICAST: u8 = 2;
    pub const TYPE_GEO_ANYCAST: u8 = 3;
    pub const TYPE_GEO_BROADCAST: u8 = 4;
    pub const TYPE_TSB: u8 = 5;
    pub const TYPE_LOCATION_SERVICE: u8 = 6;

    /// Resolve a header type and subtype, rejecting subtypes a type does not define
    pub fn from_type_subtype(header_type: u8, subtype: u8) -> Result<Self> {
        let invalid_subtype = ProtocolError::InvalidHeaderSubtype {
            header_type,
            subtype,
        };

        match header_type {
            Self::TYPE_ANY | Self::TYPE_BEACON | Self::TYPE_GEO_UNICAST => {
                if subtype != 0 {
                    return Err(invalid_subtype);
                }
                Ok(match header_type {
                    Self::TYPE_ANY => PacketType::Any,
                    Self::TYPE_BEACON => PacketType::Beacon,
                    _ => PacketType::GeoUnicast,
                })
            }
            Self::TYPE_GEO_ANYCAST => AreaShape::from_u8(subtype)
                .map(PacketType::GeoAnycast)
                .ok_or(invalid_subtype),
            Self::TYPE_GEO_BROADCAST => AreaShape::from_u8(subtype)
                .map(PacketType::GeoBroadcast)
                .ok_or(invalid_subtype),
            Self::TYPE_TSB => match subtype {
                0 => Ok(PacketType::SingleHopBroadcast),
                1 => Ok(PacketType::TopologicallyScopedBroadcast),
                _ => Err(invalid_subtype),
            },
            Self::TYPE_LOCATION_SERVICE => match subtype {
                0 => Ok(PacketType::LocationServiceRequest),
                1 => Ok(PacketType::LocationServiceReply),
                _ => Err(invalid_subtype),
            },
            other => Err(ProtocolError::InvalidHeaderType(other)),
        }
    }

    /// Header type and subtype for the wire
    pub fn type_subtype(&self) -> (u8, u8) {
        match self {
            PacketType::Any => (Self::TYPE_ANY, 0),
            PacketType::Beacon => (Self::TYPE_BEACON, 0),
            PacketType::GeoUnicast => (Self::TYPE_GEO_UNICAST, 0),
            PacketType::GeoAnycast(shape) => (Self::TYPE_GEO_ANYCAST, shape.to_u8()),
            PacketType::GeoBroadcast(shape) => (Self::TYPE_GEO_BROADCAST, shape.to_u8()),
            PacketType::SingleHopBroadcast => (Self::TYPE_TSB, 0),
            PacketType::TopologicallyScopedBroadcast => (Self::TYPE_TSB, 1),
            PacketType::LocationServiceRequest => (Self::TYPE_LOCATION_SERVICE, 0),
            PacketType::LocationServiceReply => (Self::TYPE_LOCATION_SERVICE, 1),
        }
    }

    /// Whether packets of this type carry a sequence number
    pub fn is_multi_hop(&self) -> bool {
        !matches!(
            self,
            PacketType::Any | PacketType::Beacon | PacketType::SingleHopBroadcast
        )
    }
}

/// Traffic class byte
///
/// Bit 7 is store-carry-forward, bit 6 channel offload, bits 0-5 the class ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TrafficClass(u8);

impl TrafficClass {
    const STORE_CARRY_FORWARD: u8 = 0b1000_0000;
    const CHANNEL_OFFLOAD: u8 = 0b0100_0000;
    const ID_MASK: u8 = 0b0011_1111;

    pub fn new(store_carry_forward: bool, channel_offload: bool, id: u8) -> Self {
        let mut raw = id & Self::ID_MASK;
        if store_carry_forward {
            raw |= Self::STORE_CARRY_FORWARD;
        }
        if channel_offload {
            raw |= Self::CHANNEL_OFFLOAD;
        }
        TrafficClass(raw)
    }

    pub fn from_u8(raw: u8) -> Self {
        TrafficClass(raw)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn store_carry_forward(&self) -> bool {
        self.0 & Self::STORE_CARRY_FORWARD != 0
    }

    pub fn channel_offload(&self) -> bool {
        self.0 & Self::CHANNEL_OFFLOAD != 0
    }

    pub fn id(&self) -> u8 {
        self.0 & Self::ID_MASK
    }
}

/// Basic header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicHeader {
    pub version: u8,
    pub next_header: BasicNextHeader,
    pub lifetime: Lifetime,
    pub remaining_hop_limit: u8,
}

impl BasicHeader {
    pub fn new(lifetime: Lifetime, remaining_hop_limit: u8) -> Self {
        BasicHeader {
            version: GN_PROTOCOL_VERSION,
            next_header: BasicNextHeader::Common,
            lifetime,
            remaining_hop_limit,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push((self.version << 4) | (self.next_header as u8 & 0x0f));
        out.push(0);
        out.push(self.lifetime.raw());
        out.push(self.remaining_hop_limit);
    }

    /// Parse and validate the version and next-header fields
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BASIC_HEADER_SIZE {
            return Err(ProtocolError::TooShort {
                needed: BASIC_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let version = bytes[0] >> 4;
        if version > GN_PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let next_header = BasicNextHeader::from_u8(bytes[0] & 0x0f)?;

        Ok(BasicHeader {
            version,
            next_header,
            lifetime: Lifetime::from_raw(bytes[2]),
            remaining_hop_limit: bytes[3],
        })
    }
}

/// Common header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonHeader {
    pub next_header: CommonNextHeader,
    pub packet_type: PacketType,
    pub traffic_class: TrafficClass,
    /// Station is mobile (flags bit 7)
    pub mobile: bool,
    pub payload_length: u16,
    pub max_hop_limit: u8,
}

impl CommonHeader {
    const MOBILE_FLAG: u8 = 0b1000_0000;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let (header_type, subtype) = self.packet_type.type_subtype();
        out.push((self.next_header as u8) << 4);
        out.push((header_type << 4) | (subtype & 0x0f));
        out.push(self.traffic_class.as_u8());
        out.push(if self.mobile { Self::MOBILE_FLAG } else { 0 });
        out.extend_from_slice(&self.payload_length.to_be_bytes());
        out.push(self.max_hop_limit);
        out.push(0);
    }

    /// Parse and validate next header, header type and subtype
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < COMMON_HEADER_SIZE {
            return Err(ProtocolError::TooShort {
                needed: COMMON_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let next_header = CommonNextHeader::from_u8(bytes[0] >> 4)?;
        let packet_type = PacketType::from_type_subtype(bytes[1] >> 4, bytes[1] & 0x0f)?;

        Ok(CommonHeader {
            next_header,
            packet_type,
            traffic_class: TrafficClass::from_u8(bytes[2]),
            mobile: bytes[3] & Self::MOBILE_FLAG != 0,
            payload_length: read_u16(bytes, 4),
            max_hop_limit: bytes[6],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_common(packet_type: PacketType) -> CommonHeader {
        CommonHeader {
            next_header: CommonNextHeader::BtpB,
            packet_type,
            traffic_class: TrafficClass::new(true, false, 3),
            mobile: true,
            payload_length: 300,
            max_hop_limit: 10,
        }
    }

    #[test]
    fn test_basic_header_round_trip() {
        let header = BasicHeader::new(Lifetime::from_millis(60_000), 7);
        let mut bytes = Vec::new();
        header.write_to(&mut bytes);

        assert_eq!(bytes.len(), BASIC_HEADER_SIZE);
        assert_eq!(bytes[0], 0x11);
        assert_eq!(BasicHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_basic_header_rejects_future_version() {
        let bytes = [0x21, 0, 0, 1];
        assert_eq!(
            BasicHeader::from_bytes(&bytes),
            Err(ProtocolError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_basic_header_rejects_next_header() {
        let bytes = [0x13, 0, 0, 1];
        assert_eq!(
            BasicHeader::from_bytes(&bytes),
            Err(ProtocolError::InvalidBasicNextHeader(3))
        );
    }

    #[test]
    fn test_common_header_round_trip_all_types() {
        let types = [
            PacketType::Any,
            PacketType::Beacon,
            PacketType::GeoUnicast,
            PacketType::GeoAnycast(AreaShape::Ellipse),
            PacketType::GeoBroadcast(AreaShape::Rectangle),
            PacketType::SingleHopBroadcast,
            PacketType::TopologicallyScopedBroadcast,
            PacketType::LocationServiceRequest,
            PacketType::LocationServiceReply,
        ];

        for packet_type in types {
            let header = create_test_common(packet_type);
            let mut bytes = Vec::new();
            header.write_to(&mut bytes);

            assert_eq!(bytes.len(), COMMON_HEADER_SIZE);
            assert_eq!(CommonHeader::from_bytes(&bytes).unwrap(), header);
        }
    }

    #[test]
    fn test_subtype_only_valid_where_defined() {
        assert!(PacketType::from_type_subtype(PacketType::TYPE_BEACON, 1).is_err());
        assert!(PacketType::from_type_subtype(PacketType::TYPE_GEO_UNICAST, 2).is_err());
        assert!(PacketType::from_type_subtype(PacketType::TYPE_TSB, 2).is_err());
        assert!(PacketType::from_type_subtype(PacketType::TYPE_GEO_BROADCAST, 3).is_err());
        assert_eq!(
            PacketType::from_type_subtype(7, 0),
            Err(ProtocolError::InvalidHeaderType(7))
        );
    }

    #[test]
    fn test_common_header_rejects_next_header() {
        let mut bytes = Vec::new();
        create_test_common(PacketType::Beacon).write_to(&mut bytes);
        bytes[0] = 0x40;

        assert_eq!(
            CommonHeader::from_bytes(&bytes),
            Err(ProtocolError::InvalidCommonNextHeader(4))
        );
    }

    #[test]
    fn test_traffic_class_bits() {
        let tc = TrafficClass::new(true, true, 0x3f);
        assert_eq!(tc.as_u8(), 0xff);
        assert!(tc.store_carry_forward());
        assert!(tc.channel_offload());
        assert_eq!(tc.id(), 0x3f);

        let tc = TrafficClass::from_u8(0x05);
        assert!(!tc.store_carry_forward());
        assert_eq!(tc.id(), 5);
    }
}
