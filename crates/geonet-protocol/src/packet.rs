//! Complete GeoNetworking packets: Basic + Common + extended header + payload
//!
//! Extended header layouts (after the 12 bytes of Basic and Common header):
//! - GeoUnicast / LS Reply: SN (2) | reserved (2) | source LPV (24) | destination SPV (20)
//! - Single-Hop Broadcast: source LPV (24) | media-dependent data (4)
//! - Topologically-Scoped Broadcast: SN (2) | reserved (2) | source LPV (24)
//! - GeoBroadcast / GeoAnycast: SN (2) | reserved (4) | source LPV (24) |
//!   latitude (4) | longitude (4) | distance A (2) | distance B (2) | angle (2) | reserved (2)
//! - Beacon: source LPV (24)
//! - LS Request: SN (2) | reserved (2) | source LPV (24) | requested address (8)

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::header::{
    BasicHeader, BasicNextHeader, CommonHeader, PacketType, BASIC_HEADER_SIZE, COMMON_HEADER_SIZE,
};
use crate::position::{
    read_i32, read_u16, read_u32, GeoArea, LongPositionVector, ShortPositionVector,
    LONG_POSITION_VECTOR_SIZE, SHORT_POSITION_VECTOR_SIZE,
};
use crate::types::{GnAddress, SequenceNumber, GN_ADDRESS_SIZE};

/// Size of Basic + Common header
pub const FIXED_HEADER_SIZE: usize = BASIC_HEADER_SIZE + COMMON_HEADER_SIZE;

pub const GEO_UNICAST_HEADER_SIZE: usize =
    FIXED_HEADER_SIZE + 4 + LONG_POSITION_VECTOR_SIZE + SHORT_POSITION_VECTOR_SIZE;
pub const SHB_HEADER_SIZE: usize = FIXED_HEADER_SIZE + LONG_POSITION_VECTOR_SIZE + 4;
pub const TSB_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 4 + LONG_POSITION_VECTOR_SIZE;
pub const GEO_AREA_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 6 + LONG_POSITION_VECTOR_SIZE + 16;
pub const BEACON_HEADER_SIZE: usize = FIXED_HEADER_SIZE + LONG_POSITION_VECTOR_SIZE;
pub const LS_REQUEST_HEADER_SIZE: usize =
    FIXED_HEADER_SIZE + 4 + LONG_POSITION_VECTOR_SIZE + GN_ADDRESS_SIZE;

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// GeoUnicast and Location-Service-Reply extended header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicastHeader {
    pub sequence_number: SequenceNumber,
    pub source: LongPositionVector,
    pub destination: ShortPositionVector,
}

/// GeoBroadcast and GeoAnycast extended header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaHeader {
    pub sequence_number: SequenceNumber,
    pub source: LongPositionVector,
    pub area: GeoArea,
}

/// Single-Hop Broadcast extended header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleHopHeader {
    pub source: LongPositionVector,
    pub media_dependent: u32,
}

/// Multi-hop Topologically-Scoped Broadcast extended header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsbHeader {
    pub sequence_number: SequenceNumber,
    pub source: LongPositionVector,
}

/// Location-Service-Request extended header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsRequestHeader {
    pub sequence_number: SequenceNumber,
    pub source: LongPositionVector,
    pub requested_address: GnAddress,
}

/// Type-specific header following the Common header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendedHeader {
    Any,
    Beacon { source: LongPositionVector },
    Unicast(UnicastHeader),
    Area(AreaHeader),
    SingleHop(SingleHopHeader),
    Tsb(TsbHeader),
    LsRequest(LsRequestHeader),
}

impl ExtendedHeader {
    fn matches(&self, packet_type: PacketType) -> bool {
        matches!(
            (self, packet_type),
            (ExtendedHeader::Any, PacketType::Any)
                | (ExtendedHeader::Beacon { .. }, PacketType::Beacon)
                | (ExtendedHeader::Unicast(_), PacketType::GeoUnicast)
                | (ExtendedHeader::Unicast(_), PacketType::LocationServiceReply)
                | (ExtendedHeader::Area(_), PacketType::GeoAnycast(_))
                | (ExtendedHeader::Area(_), PacketType::GeoBroadcast(_))
                | (ExtendedHeader::SingleHop(_), PacketType::SingleHopBroadcast)
                | (ExtendedHeader::Tsb(_), PacketType::TopologicallyScopedBroadcast)
                | (ExtendedHeader::LsRequest(_), PacketType::LocationServiceRequest)
        )
    }

    /// Encoded size of this extended header
    pub fn len(&self) -> usize {
        match self {
            ExtendedHeader::Any => 0,
            ExtendedHeader::Beacon { .. } => BEACON_HEADER_SIZE - FIXED_HEADER_SIZE,
            ExtendedHeader::Unicast(_) => GEO_UNICAST_HEADER_SIZE - FIXED_HEADER_SIZE,
            ExtendedHeader::Area(_) => GEO_AREA_HEADER_SIZE - FIXED_HEADER_SIZE,
            ExtendedHeader::SingleHop(_) => SHB_HEADER_SIZE - FIXED_HEADER_SIZE,
            ExtendedHeader::Tsb(_) => TSB_HEADER_SIZE - FIXED_HEADER_SIZE,
            ExtendedHeader::LsRequest(_) => LS_REQUEST_HEADER_SIZE - FIXED_HEADER_SIZE,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source position vector, for every header that carries one
    pub fn source(&self) -> Option<&LongPositionVector> {
        match self {
            ExtendedHeader::Any => None,
            ExtendedHeader::Beacon { source } => Some(source),
            ExtendedHeader::Unicast(h) => Some(&h.source),
            ExtendedHeader::Area(h) => Some(&h.source),
            ExtendedHeader::SingleHop(h) => Some(&h.source),
            ExtendedHeader::Tsb(h) => Some(&h.source),
            ExtendedHeader::LsRequest(h) => Some(&h.source),
        }
    }

    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        match self {
            ExtendedHeader::Unicast(h) => Some(h.sequence_number),
            ExtendedHeader::Area(h) => Some(h.sequence_number),
            ExtendedHeader::Tsb(h) => Some(h.sequence_number),
            ExtendedHeader::LsRequest(h) => Some(h.sequence_number),
            _ => None,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            ExtendedHeader::Any => {}
            ExtendedHeader::Beacon { source } => source.write_to(out),
            ExtendedHeader::Unicast(h) => {
                out.extend_from_slice(&h.sequence_number.0.to_be_bytes());
                out.extend_from_slice(&[0, 0]);
                h.source.write_to(out);
                h.destination.write_to(out);
            }
            ExtendedHeader::Area(h) => {
                out.extend_from_slice(&h.sequence_number.0.to_be_bytes());
                out.extend_from_slice(&[0, 0, 0, 0]);
                h.source.write_to(out);
                out.extend_from_slice(&h.area.center_latitude.to_be_bytes());
                out.extend_from_slice(&h.area.center_longitude.to_be_bytes());
                out.extend_from_slice(&h.area.distance_a.to_be_bytes());
                out.extend_from_slice(&h.area.distance_b.to_be_bytes());
                out.extend_from_slice(&h.area.angle.to_be_bytes());
                out.extend_from_slice(&[0, 0]);
            }
            ExtendedHeader::SingleHop(h) => {
                h.source.write_to(out);
                out.extend_from_slice(&h.media_dependent.to_be_bytes());
            }
            ExtendedHeader::Tsb(h) => {
                out.extend_from_slice(&h.sequence_number.0.to_be_bytes());
                out.extend_from_slice(&[0, 0]);
                h.source.write_to(out);
            }
            ExtendedHeader::LsRequest(h) => {
                out.extend_from_slice(&h.sequence_number.0.to_be_bytes());
                out.extend_from_slice(&[0, 0]);
                h.source.write_to(out);
                out.extend_from_slice(h.requested_address.as_bytes());
            }
        }
    }

    /// Parse the extended header for `packet_type` from `bytes`
    ///
    /// `bytes` starts right after the Common header.
    fn parse(packet_type: PacketType, bytes: &[u8]) -> Result<Self> {
        let sequence_number = || SequenceNumber(read_u16(bytes, 0));

        let header = match packet_type {
            PacketType::Any => ExtendedHeader::Any,
            PacketType::Beacon => {
                ensure_len(bytes, BEACON_HEADER_SIZE - FIXED_HEADER_SIZE)?;
                ExtendedHeader::Beacon {
                    source: LongPositionVector::from_bytes(bytes)?,
                }
            }
            PacketType::GeoUnicast | PacketType::LocationServiceReply => {
                ensure_len(bytes, GEO_UNICAST_HEADER_SIZE - FIXED_HEADER_SIZE)?;
                ExtendedHeader::Unicast(UnicastHeader {
                    sequence_number: sequence_number(),
                    source: LongPositionVector::from_bytes(&bytes[4..])?,
                    destination: ShortPositionVector::from_bytes(
                        &bytes[4 + LONG_POSITION_VECTOR_SIZE..],
                    )?,
                })
            }
            PacketType::GeoAnycast(shape) | PacketType::GeoBroadcast(shape) => {
                ensure_len(bytes, GEO_AREA_HEADER_SIZE - FIXED_HEADER_SIZE)?;
                let source = LongPositionVector::from_bytes(&bytes[6..])?;
                let offset = 6 + LONG_POSITION_VECTOR_SIZE;
                ExtendedHeader::Area(AreaHeader {
                    sequence_number: sequence_number(),
                    source,
                    area: GeoArea {
                        center_latitude: read_i32(bytes, offset),
                        center_longitude: read_i32(bytes, offset + 4),
                        distance_a: read_u16(bytes, offset + 8),
                        distance_b: read_u16(bytes, offset + 10),
                        angle: read_u16(bytes, offset + 12),
                        shape,
                    },
                })
            }
            PacketType::SingleHopBroadcast => {
                ensure_len(bytes, SHB_HEADER_SIZE - FIXED_HEADER_SIZE)?;
                ExtendedHeader::SingleHop(SingleHopHeader {
                    source: LongPositionVector::from_bytes(bytes)?,
                    media_dependent: read_u32(bytes, LONG_POSITION_VECTOR_SIZE),
                })
            }
            PacketType::TopologicallyScopedBroadcast => {
                ensure_len(bytes, TSB_HEADER_SIZE - FIXED_HEADER_SIZE)?;
                ExtendedHeader::Tsb(TsbHeader {
                    sequence_number: sequence_number(),
                    source: LongPositionVector::from_bytes(&bytes[4..])?,
                })
            }
            PacketType::LocationServiceRequest => {
                ensure_len(bytes, LS_REQUEST_HEADER_SIZE - FIXED_HEADER_SIZE)?;
                ExtendedHeader::LsRequest(LsRequestHeader {
                    sequence_number: sequence_number(),
                    source: LongPositionVector::from_bytes(&bytes[4..])?,
                    requested_address: GnAddress::read(&bytes[4 + LONG_POSITION_VECTOR_SIZE..]),
                })
            }
        };

        Ok(header)
    }
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<()> {
    if bytes.len() < needed {
        return Err(ProtocolError::TooShort {
            needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// A parsed GeoNetworking packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GnPacket {
    pub basic: BasicHeader,
    pub common: CommonHeader,
    pub extended: ExtendedHeader,
    pub payload: Vec<u8>,
}

impl GnPacket {
    /// Assemble a packet, filling in the Common header payload length
    pub fn new(
        basic: BasicHeader,
        mut common: CommonHeader,
        extended: ExtendedHeader,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if !extended.matches(common.packet_type) {
            return Err(ProtocolError::HeaderMismatch(common.packet_type));
        }
        if let (ExtendedHeader::Area(area), PacketType::GeoAnycast(shape))
        | (ExtendedHeader::Area(area), PacketType::GeoBroadcast(shape)) =
            (&extended, common.packet_type)
        {
            if area.area.shape != shape {
                return Err(ProtocolError::HeaderMismatch(common.packet_type));
            }
        }

        common.payload_length = payload.len() as u16;

        Ok(GnPacket {
            basic,
            common,
            extended,
            payload,
        })
    }

    /// Total header length (Basic + Common + extended)
    pub fn header_len(&self) -> usize {
        FIXED_HEADER_SIZE + self.extended.len()
    }

    pub fn source(&self) -> Option<&LongPositionVector> {
        self.extended.source()
    }

    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        self.extended.sequence_number()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header_len() + self.payload.len());
        self.basic.write_to(&mut out);
        self.common.write_to(&mut out);
        self.extended.write_to(&mut out);
        debug_assert_eq!(out.len(), self.header_len(), "Header size mismatch");
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse and validate a packet
    ///
    /// Checks run in wire order: protocol version, Basic next header,
    /// Common next header and header type, header subtype, then
    /// `max_hop_limit >= remaining_hop_limit`. Trailing bytes beyond the
    /// declared payload length are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let basic = BasicHeader::from_bytes(bytes)?;
        if basic.next_header == BasicNextHeader::Secured {
            return Err(ProtocolError::SecuredPacketUnsupported);
        }

        let common = CommonHeader::from_bytes(&bytes[BASIC_HEADER_SIZE..])?;
        if common.max_hop_limit < basic.remaining_hop_limit {
            return Err(ProtocolError::HopLimitMismatch {
                remaining: basic.remaining_hop_limit,
                max: common.max_hop_limit,
            });
        }

        let extended = ExtendedHeader::parse(common.packet_type, &bytes[FIXED_HEADER_SIZE..])?;
        let header_len = FIXED_HEADER_SIZE + extended.len();

        let declared = common.payload_length as usize;
        let available = bytes.len() - header_len;
        if declared > available {
            return Err(ProtocolError::PayloadLengthMismatch {
                declared,
                available,
            });
        }

        Ok(GnPacket {
            basic,
            common,
            extended,
            payload: bytes[header_len..header_len + declared].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{CommonNextHeader, TrafficClass};
    use crate::lifetime::Lifetime;
    use crate::position::AreaShape;
    use crate::timestamp::Timestamp;
    use crate::types::{MacAddress, StationType};

    fn create_test_address(last: u8) -> GnAddress {
        GnAddress::new(
            false,
            StationType::PassengerCar,
            MacAddress::from_bytes([0x02, 0, 0, 0, 0, last]),
        )
    }

    fn create_test_lpv(last: u8) -> LongPositionVector {
        LongPositionVector {
            address: create_test_address(last),
            timestamp: Timestamp(1_000 * last as u32),
            latitude: 520_000_000 + last as i32,
            longitude: 130_000_000 - last as i32,
            position_accurate: true,
            speed: 1389,
            heading: 900,
        }
    }

    fn create_test_packet(packet_type: PacketType, extended: ExtendedHeader) -> GnPacket {
        GnPacket::new(
            BasicHeader::new(Lifetime::from_millis(60_000), 9),
            CommonHeader {
                next_header: CommonNextHeader::BtpB,
                packet_type,
                traffic_class: TrafficClass::new(false, false, 2),
                mobile: true,
                payload_length: 0,
                max_hop_limit: 10,
            },
            extended,
            b"hello geonet".to_vec(),
        )
        .unwrap()
    }

    fn all_test_packets() -> Vec<(GnPacket, usize)> {
        let area = GeoArea {
            center_latitude: 520_100_000,
            center_longitude: 130_100_000,
            distance_a: 500,
            distance_b: 200,
            angle: 45,
            shape: AreaShape::Rectangle,
        };

        vec![
            (
                create_test_packet(
                    PacketType::Beacon,
                    ExtendedHeader::Beacon {
                        source: create_test_lpv(1),
                    },
                ),
                BEACON_HEADER_SIZE,
            ),
            (
                create_test_packet(
                    PacketType::GeoUnicast,
                    ExtendedHeader::Unicast(UnicastHeader {
                        sequence_number: SequenceNumber(77),
                        source: create_test_lpv(2),
                        destination: create_test_lpv(3).to_short(),
                    }),
                ),
                GEO_UNICAST_HEADER_SIZE,
            ),
            (
                create_test_packet(
                    PacketType::LocationServiceReply,
                    ExtendedHeader::Unicast(UnicastHeader {
                        sequence_number: SequenceNumber(65535),
                        source: create_test_lpv(4),
                        destination: create_test_lpv(5).to_short(),
                    }),
                ),
                GEO_UNICAST_HEADER_SIZE,
            ),
            (
                create_test_packet(
                    PacketType::GeoBroadcast(AreaShape::Rectangle),
                    ExtendedHeader::Area(AreaHeader {
                        sequence_number: SequenceNumber(3),
                        source: create_test_lpv(6),
                        area,
                    }),
                ),
                GEO_AREA_HEADER_SIZE,
            ),
            (
                create_test_packet(
                    PacketType::GeoAnycast(AreaShape::Rectangle),
                    ExtendedHeader::Area(AreaHeader {
                        sequence_number: SequenceNumber(4),
                        source: create_test_lpv(7),
                        area,
                    }),
                ),
                GEO_AREA_HEADER_SIZE,
            ),
            (
                create_test_packet(
                    PacketType::SingleHopBroadcast,
                    ExtendedHeader::SingleHop(SingleHopHeader {
                        source: create_test_lpv(8),
                        media_dependent: 0xdead_beef,
                    }),
                ),
                SHB_HEADER_SIZE,
            ),
            (
                create_test_packet(
                    PacketType::TopologicallyScopedBroadcast,
                    ExtendedHeader::Tsb(TsbHeader {
                        sequence_number: SequenceNumber(9),
                        source: create_test_lpv(9),
                    }),
                ),
                TSB_HEADER_SIZE,
            ),
            (
                create_test_packet(
                    PacketType::LocationServiceRequest,
                    ExtendedHeader::LsRequest(LsRequestHeader {
                        sequence_number: SequenceNumber(10),
                        source: create_test_lpv(10),
                        requested_address: create_test_address(11),
                    }),
                ),
                LS_REQUEST_HEADER_SIZE,
            ),
        ]
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(GEO_UNICAST_HEADER_SIZE, 60);
        assert_eq!(SHB_HEADER_SIZE, 40);
        assert_eq!(TSB_HEADER_SIZE, 40);
        assert_eq!(GEO_AREA_HEADER_SIZE, 58);
        assert_eq!(BEACON_HEADER_SIZE, 36);
        assert_eq!(LS_REQUEST_HEADER_SIZE, 48);
    }

    #[test]
    fn test_every_packet_type_round_trips() {
        for (packet, expected_header_len) in all_test_packets() {
            let bytes = packet.encode();

            assert_eq!(packet.header_len(), expected_header_len);
            assert_eq!(bytes.len(), expected_header_len + packet.payload.len());
            assert_eq!(GnPacket::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_payload_length_filled_in() {
        let (packet, _) = all_test_packets().remove(0);
        assert_eq!(packet.common.payload_length as usize, b"hello geonet".len());
    }

    #[test]
    fn test_truncated_extended_header_rejected() {
        for (packet, header_len) in all_test_packets() {
            let bytes = packet.encode();
            let result = GnPacket::decode(&bytes[..header_len - 1]);
            assert!(
                matches!(result, Err(ProtocolError::TooShort { .. })),
                "{:?} accepted a truncated header",
                packet.common.packet_type
            );
        }
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let (packet, header_len) = all_test_packets().remove(1);
        let bytes = packet.encode();

        assert_eq!(
            GnPacket::decode(&bytes[..header_len + 3]),
            Err(ProtocolError::PayloadLengthMismatch {
                declared: 12,
                available: 3
            })
        );
    }

    #[test]
    fn test_hop_limit_above_maximum_rejected() {
        let (packet, _) = all_test_packets().remove(1);
        let mut bytes = packet.encode();
        bytes[3] = 11;

        assert_eq!(
            GnPacket::decode(&bytes),
            Err(ProtocolError::HopLimitMismatch {
                remaining: 11,
                max: 10
            })
        );
    }

    #[test]
    fn test_secured_packet_rejected() {
        let (packet, _) = all_test_packets().remove(0);
        let mut bytes = packet.encode();
        bytes[0] = 0x12;

        assert_eq!(
            GnPacket::decode(&bytes),
            Err(ProtocolError::SecuredPacketUnsupported)
        );
    }

    #[test]
    fn test_mismatched_extended_header_rejected() {
        let result = GnPacket::new(
            BasicHeader::new(Lifetime::from_millis(1_000), 1),
            CommonHeader {
                next_header: CommonNextHeader::BtpB,
                packet_type: PacketType::GeoUnicast,
                traffic_class: TrafficClass::default(),
                mobile: false,
                payload_length: 0,
                max_hop_limit: 1,
            },
            ExtendedHeader::Beacon {
                source: create_test_lpv(1),
            },
            Vec::new(),
        );

        assert_eq!(
            result,
            Err(ProtocolError::HeaderMismatch(PacketType::GeoUnicast))
        );
    }

    #[test]
    fn test_accessors() {
        let (packet, _) = all_test_packets().remove(1);
        assert_eq!(packet.sequence_number(), Some(SequenceNumber(77)));
        assert_eq!(packet.source().unwrap().address, create_test_address(2));

        let (beacon, _) = all_test_packets().remove(0);
        assert_eq!(beacon.sequence_number(), None);
    }
}
