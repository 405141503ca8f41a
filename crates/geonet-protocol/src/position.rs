//! Position vectors and geographic destination areas
//!
//! Latitude and longitude are signed integers in 1/10 micro-degree,
//! speed is in 0.01 m/s and heading in 0.1 degree from north.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::timestamp::Timestamp;
use crate::types::{GnAddress, GN_ADDRESS_SIZE};

/// Long position vector size on the wire
pub const LONG_POSITION_VECTOR_SIZE: usize = 24;

/// Short position vector size on the wire
pub const SHORT_POSITION_VECTOR_SIZE: usize = 20;

/// Smallest and largest speed representable in the 15-bit field
pub const MIN_SPEED: i16 = -(1 << 14);
pub const MAX_SPEED: i16 = (1 << 14) - 1;

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    read_u32(bytes, offset) as i32
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

/// Self-reported identity, position and motion of a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LongPositionVector {
    pub address: GnAddress,
    pub timestamp: Timestamp,
    /// 1/10 micro-degree
    pub latitude: i32,
    /// 1/10 micro-degree
    pub longitude: i32,
    /// Position accuracy indicator
    pub position_accurate: bool,
    /// 0.01 m/s, 15-bit signed
    pub speed: i16,
    /// 0.1 degree
    pub heading: u16,
}

impl LongPositionVector {
    /// Clamp a speed value into the 15-bit range
    pub fn clamp_speed(speed: i32) -> i16 {
        speed.clamp(MIN_SPEED as i32, MAX_SPEED as i32) as i16
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.address.as_bytes());
        out.extend_from_slice(&self.timestamp.0.to_be_bytes());
        out.extend_from_slice(&self.latitude.to_be_bytes());
        out.extend_from_slice(&self.longitude.to_be_bytes());

        let speed_field = ((self.position_accurate as u16) << 15) | (self.speed as u16 & 0x7fff);
        out.extend_from_slice(&speed_field.to_be_bytes());
        out.extend_from_slice(&self.heading.to_be_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LONG_POSITION_VECTOR_SIZE);
        self.write_to(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, LONG_POSITION_VECTOR_SIZE)?;

        let address = GnAddress::read(bytes);
        let mut offset = GN_ADDRESS_SIZE;

        let timestamp = Timestamp(read_u32(bytes, offset));
        offset += 4;
        let latitude = read_i32(bytes, offset);
        offset += 4;
        let longitude = read_i32(bytes, offset);
        offset += 4;

        let speed_field = read_u16(bytes, offset);
        offset += 2;
        let position_accurate = speed_field & 0x8000 != 0;
        // Sign-extend the low 15 bits
        let speed = (((speed_field & 0x7fff) << 1) as i16) >> 1;

        let heading = read_u16(bytes, offset);

        Ok(LongPositionVector {
            address,
            timestamp,
            latitude,
            longitude,
            position_accurate,
            speed,
            heading,
        })
    }

    /// The position-only projection of this vector
    pub fn to_short(&self) -> ShortPositionVector {
        ShortPositionVector {
            address: self.address,
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Address, timestamp and position of a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShortPositionVector {
    pub address: GnAddress,
    pub timestamp: Timestamp,
    pub latitude: i32,
    pub longitude: i32,
}

impl ShortPositionVector {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.address.as_bytes());
        out.extend_from_slice(&self.timestamp.0.to_be_bytes());
        out.extend_from_slice(&self.latitude.to_be_bytes());
        out.extend_from_slice(&self.longitude.to_be_bytes());
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, SHORT_POSITION_VECTOR_SIZE)?;

        Ok(ShortPositionVector {
            address: GnAddress::read(bytes),
            timestamp: Timestamp(read_u32(bytes, 8)),
            latitude: read_i32(bytes, 12),
            longitude: read_i32(bytes, 16),
        })
    }
}

/// Shape of a GeoBroadcast / GeoAnycast destination area
///
/// Encoded as the header subtype of the GBC and GAC header types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AreaShape {
    Circle = 0,
    Rectangle = 1,
    Ellipse = 2,
}

impl AreaShape {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AreaShape::Circle),
            1 => Some(AreaShape::Rectangle),
            2 => Some(AreaShape::Ellipse),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Geographic destination area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoArea {
    pub center_latitude: i32,
    pub center_longitude: i32,
    /// Meters; radius for circles, half-length along the azimuth otherwise
    pub distance_a: u16,
    /// Meters; half-width perpendicular to the azimuth
    pub distance_b: u16,
    /// Azimuth of the long side, degrees clockwise from north
    pub angle: u16,
    pub shape: AreaShape,
}

impl GeoArea {
    pub fn circle(center_latitude: i32, center_longitude: i32, radius: u16) -> Self {
        GeoArea {
            center_latitude,
            center_longitude,
            distance_a: radius,
            distance_b: 0,
            angle: 0,
            shape: AreaShape::Circle,
        }
    }
}
