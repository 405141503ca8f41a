//! Location table entry

use crate::duplicate::DuplicatePacketList;
use geonet_protocol::{GnAddress, LongPositionVector, SequenceNumber, Timestamp};

/// Weight of the previous estimate in the packet data rate average
pub const PDR_BETA: f64 = 0.9;

/// How far a remote clock may run ahead of ours before its stamps count as stale
pub const MAX_CLOCK_SKEW_MILLIS: u32 = 1_000;

/// What the router knows about one remote station
#[derive(Debug, Clone, PartialEq)]
pub struct LocationTableEntry {
    pub address: GnAddress,

    /// Last accepted position vector; its timestamp drives aging
    pub position_vector: LongPositionVector,

    /// Heard directly (single hop) at least once
    pub is_neighbor: bool,

    /// A location service lookup for this address is in progress
    pub location_service_pending: bool,

    /// Set on creation, cleared by the first update
    pub is_new: bool,

    /// Packet data rate estimate in bytes per second
    pub packet_data_rate: f64,

    /// Newest sequence number seen from this source
    pub last_sequence_number: Option<SequenceNumber>,

    pub duplicates: DuplicatePacketList,

    last_reception: Option<Timestamp>,
}

impl LocationTableEntry {
    pub fn new(position_vector: LongPositionVector, is_neighbor: bool) -> Self {
        LocationTableEntry {
            address: position_vector.address,
            position_vector,
            is_neighbor,
            location_service_pending: false,
            is_new: true,
            packet_data_rate: 0.0,
            last_sequence_number: None,
            duplicates: DuplicatePacketList::new(),
            last_reception: None,
        }
    }

    /// Placeholder created when a location service lookup starts
    ///
    /// It carries no usable position; its timestamp is the creation time
    /// so it ages like any other entry.
    pub fn pending(address: GnAddress, now: Timestamp) -> Self {
        let position_vector = LongPositionVector {
            address,
            timestamp: now,
            ..Default::default()
        };
        LocationTableEntry {
            location_service_pending: true,
            ..Self::new(position_vector, false)
        }
    }

    /// Position is known (not just a pending placeholder)
    pub fn has_position(&self) -> bool {
        !self.location_service_pending
    }

    /// Milliseconds since the position vector was stamped, modulo 2^32
    ///
    /// A stamp slightly ahead of `now` counts as fresh. One further ahead
    /// than [`MAX_CLOCK_SKEW_MILLIS`] wraps to a huge age and is stale.
    pub fn age_millis(&self, now: Timestamp) -> u32 {
        let stamped = self.position_vector.timestamp.0;
        if stamped.wrapping_sub(now.0) <= MAX_CLOCK_SKEW_MILLIS {
            return 0;
        }
        now.0.wrapping_sub(stamped)
    }

    /// Fold a received packet of `bytes` into the data rate average
    pub fn record_packet(&mut self, bytes: usize, now: Timestamp) {
        if let Some(last) = self.last_reception {
            let elapsed = now.millis_since(last);
            if elapsed > 0 {
                let rate = bytes as f64 * 1000.0 / elapsed as f64;
                self.packet_data_rate = PDR_BETA * self.packet_data_rate + (1.0 - PDR_BETA) * rate;
            }
        }
        self.last_reception = Some(now);
    }

    /// Track the newest sequence number seen from this source
    ///
    /// Returns false when `sn` is behind the newest one already seen.
    pub fn observe_sequence_number(&mut self, sn: SequenceNumber) -> bool {
        match self.last_sequence_number {
            Some(last) if !sn.is_newer_than(last) => false,
            _ => {
                self.last_sequence_number = Some(sn);
                true
            }
        }
    }
}
