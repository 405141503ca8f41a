//! Core protocol types: link-layer and GeoNetworking addresses, sequence numbers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a GeoNetworking address on the wire
pub const GN_ADDRESS_SIZE: usize = 8;

/// Size of a link-layer (MAC) address
pub const MAC_ADDRESS_SIZE: usize = 6;

/// A 48-bit link-layer address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MacAddress([u8; MAC_ADDRESS_SIZE]);

impl MacAddress {
    /// Link-layer broadcast address
    pub const BROADCAST: MacAddress = MacAddress([0xff; MAC_ADDRESS_SIZE]);

    pub fn from_bytes(bytes: [u8; MAC_ADDRESS_SIZE]) -> Self {
        MacAddress(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MAC_ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({})", self)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// ITS station type carried in the 5-bit field of a GeoNetworking address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StationType {
    Unknown = 0,
    Pedestrian = 1,
    Cyclist = 2,
    Moped = 3,
    Motorcycle = 4,
    PassengerCar = 5,
    Bus = 6,
    LightTruck = 7,
    HeavyTruck = 8,
    Trailer = 9,
    SpecialVehicle = 10,
    Tram = 11,
    RoadSideUnit = 15,
}

impl StationType {
    /// Decode the 5-bit station type; unassigned values map to `Unknown`
    pub fn from_u8(value: u8) -> Self {
        match value & 0x1f {
            1 => StationType::Pedestrian,
            2 => StationType::Cyclist,
            3 => StationType::Moped,
            4 => StationType::Motorcycle,
            5 => StationType::PassengerCar,
            6 => StationType::Bus,
            7 => StationType::LightTruck,
            8 => StationType::HeavyTruck,
            9 => StationType::Trailer,
            10 => StationType::SpecialVehicle,
            11 => StationType::Tram,
            15 => StationType::RoadSideUnit,
            _ => StationType::Unknown,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// GeoNetworking address
///
/// Layout (64 bits, network order):
/// - manual configuration flag (1 bit)
/// - station type (5 bits)
/// - reserved (10 bits)
/// - link-layer address (48 bits)
///
/// Equality and hashing are byte-wise over the encoded form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct GnAddress([u8; GN_ADDRESS_SIZE]);

impl GnAddress {
    pub fn new(manual: bool, station_type: StationType, mac: MacAddress) -> Self {
        let mut bytes = [0u8; GN_ADDRESS_SIZE];
        bytes[0] = ((manual as u8) << 7) | ((station_type.to_u8() & 0x1f) << 2);
        bytes[2..].copy_from_slice(mac.as_bytes());
        GnAddress(bytes)
    }

    pub fn from_bytes(bytes: [u8; GN_ADDRESS_SIZE]) -> Self {
        GnAddress(bytes)
    }

    /// Read an address from the first 8 bytes of `bytes`
    ///
    /// Callers are expected to have length-checked the slice.
    pub(crate) fn read(bytes: &[u8]) -> Self {
        let mut arr = [0u8; GN_ADDRESS_SIZE];
        arr.copy_from_slice(&bytes[..GN_ADDRESS_SIZE]);
        GnAddress(arr)
    }

    pub fn as_bytes(&self) -> &[u8; GN_ADDRESS_SIZE] {
        &self.0
    }

    pub fn is_manual(&self) -> bool {
        self.0[0] & 0x80 != 0
    }

    pub fn station_type(&self) -> StationType {
        StationType::from_u8(self.0[0] >> 2)
    }

    pub fn mac(&self) -> MacAddress {
        let mut mac = [0u8; MAC_ADDRESS_SIZE];
        mac.copy_from_slice(&self.0[2..]);
        MacAddress::from_bytes(mac)
    }
}

impl fmt::Debug for GnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GnAddress({})", hex::encode(self.0))
    }
}

impl fmt::Display for GnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mac())
    }
}

/// 16-bit packet sequence number with half-range wraparound ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SequenceNumber(pub u16);

impl SequenceNumber {
    const MAX_FORWARD_DELTA: u16 = (1 << 15) - 1;

    /// The number following this one, wrapping at 2^16
    pub fn next(self) -> Self {
        SequenceNumber(self.0.wrapping_add(1))
    }

    /// `true` when `self` is ahead of `other` by less than half the number space
    pub fn is_newer_than(self, other: SequenceNumber) -> bool {
        let (a, b) = (self.0, other.0);
        (a > b && a - b <= Self::MAX_FORWARD_DELTA) || (b > a && b - a > Self::MAX_FORWARD_DELTA)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_mac(last: u8) -> MacAddress {
        MacAddress::from_bytes([0x02, 0x00, 0x00, 0x00, 0x00, last])
    }

    #[test]
    fn test_address_fields() {
        let addr = GnAddress::new(true, StationType::PassengerCar, create_test_mac(7));

        assert!(addr.is_manual());
        assert_eq!(addr.station_type(), StationType::PassengerCar);
        assert_eq!(addr.mac(), create_test_mac(7));
        assert_eq!(addr.as_bytes()[0], 0x80 | (5 << 2));
    }

    #[test]
    fn test_address_byte_wise_equality() {
        let a = GnAddress::new(false, StationType::Bus, create_test_mac(1));
        let b = GnAddress::from_bytes(*a.as_bytes());
        let c = GnAddress::new(false, StationType::Tram, create_test_mac(1));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_unknown_station_type() {
        assert_eq!(StationType::from_u8(13), StationType::Unknown);
        assert_eq!(StationType::from_u8(15), StationType::RoadSideUnit);
    }

    #[test]
    fn test_mac_display() {
        assert_eq!(create_test_mac(0xab).to_string(), "02:00:00:00:00:ab");
    }

    #[test]
    fn test_sequence_number_wraparound() {
        assert!(SequenceNumber(5).is_newer_than(SequenceNumber(65530)));
        assert!(!SequenceNumber(65530).is_newer_than(SequenceNumber(5)));
        assert!(SequenceNumber(100).is_newer_than(SequenceNumber(99)));
        assert!(!SequenceNumber(99).is_newer_than(SequenceNumber(99)));
        assert_eq!(SequenceNumber(u16::MAX).next(), SequenceNumber(0));
    }
}
