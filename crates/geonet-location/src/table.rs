//! Location table: positions of known stations with soft-state aging

use crate::entry::LocationTableEntry;
use crate::geo::GeoPoint;
use geonet_protocol::{GnAddress, LongPositionVector, SequenceNumber, Timestamp};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Result of folding a position vector into the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableUpdate {
    /// A new entry was created
    pub created: bool,

    /// The stored position vector was replaced
    pub position_updated: bool,

    /// The entry was a location service placeholder that is now resolved
    pub resolved_pending: bool,
}

/// Outcome of checking a received sequence number against its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// First sighting, ahead of everything seen from the source
    InOrder,

    /// First sighting, but behind the newest number already seen
    Reordered,

    Duplicate,
}

/// Location table keyed by GeoNetworking address
///
/// Entries expire once their position vector is older than the configured
/// lifetime. Expired entries are invisible to lookups and are dropped by
/// [`LocationTable::purge_stale`] or replaced on the next update.
#[derive(Debug, Clone)]
pub struct LocationTable {
    /// Our own address, never stored
    local_address: GnAddress,

    entries: HashMap<GnAddress, LocationTableEntry>,

    lifetime_millis: u32,
}

impl LocationTable {
    pub fn new(local_address: GnAddress, lifetime: Duration) -> Self {
        LocationTable {
            local_address,
            entries: HashMap::new(),
            lifetime_millis: lifetime.as_millis().min(u32::MAX as u128) as u32,
        }
    }

    pub fn local_address(&self) -> &GnAddress {
        &self.local_address
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_millis as u64)
    }

    /// Number of stored entries, including stale ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_stale(&self, entry: &LocationTableEntry, now: Timestamp) -> bool {
        entry.age_millis(now) > self.lifetime_millis
    }

    /// Live entry for `address`
    pub fn find(&self, address: &GnAddress, now: Timestamp) -> Option<&LocationTableEntry> {
        self.entries
            .get(address)
            .filter(|entry| !self.is_stale(entry, now))
    }

    pub fn find_mut(
        &mut self,
        address: &GnAddress,
        now: Timestamp,
    ) -> Option<&mut LocationTableEntry> {
        let lifetime = self.lifetime_millis;
        self.entries
            .get_mut(address)
            .filter(|entry| entry.age_millis(now) <= lifetime)
    }

    /// Live entry with a known position (pending placeholders excluded)
    pub fn find_position(
        &self,
        address: &GnAddress,
        now: Timestamp,
    ) -> Option<&LocationTableEntry> {
        self.find(address, now).filter(|entry| entry.has_position())
    }

    /// Insert or refresh the entry for `lpv.address`
    ///
    /// The stored position vector is only replaced by a strictly newer one,
    /// unless the entry is a pending placeholder, which always takes the
    /// first real position. A stale entry is discarded and recreated.
    /// The neighbor flag is sticky: `is_neighbor == false` never clears it.
    pub fn update(
        &mut self,
        lpv: LongPositionVector,
        is_neighbor: bool,
        now: Timestamp,
    ) -> TableUpdate {
        if lpv.address == self.local_address {
            return TableUpdate::default();
        }

        let stale = self
            .entries
            .get(&lpv.address)
            .is_some_and(|entry| self.is_stale(entry, now));
        if stale {
            trace!("Replacing stale location entry for {}", lpv.address);
            self.entries.remove(&lpv.address);
        }

        match self.entries.get_mut(&lpv.address) {
            Some(entry) => {
                let resolved_pending = entry.location_service_pending;
                let position_updated =
                    resolved_pending || lpv.timestamp.is_newer_than(entry.position_vector.timestamp);

                if position_updated {
                    entry.position_vector = lpv;
                }
                entry.location_service_pending = false;
                entry.is_neighbor |= is_neighbor;
                entry.is_new = false;

                TableUpdate {
                    created: false,
                    position_updated,
                    resolved_pending,
                }
            }
            None => {
                debug!(
                    "New location entry for {} (neighbor: {})",
                    lpv.address, is_neighbor
                );
                self.entries
                    .insert(lpv.address, LocationTableEntry::new(lpv, is_neighbor));

                TableUpdate {
                    created: true,
                    position_updated: true,
                    resolved_pending: false,
                }
            }
        }
    }

    /// Create a location service placeholder for `address`
    ///
    /// Returns false if a live entry already exists.
    pub fn insert_pending(&mut self, address: GnAddress, now: Timestamp) -> bool {
        if address == self.local_address || self.find(&address, now).is_some() {
            return false;
        }
        self.entries
            .insert(address, LocationTableEntry::pending(address, now));
        true
    }

    /// Clear the pending flag on a placeholder, dropping it if it never resolved
    pub fn cancel_pending(&mut self, address: &GnAddress) {
        if let Some(entry) = self.entries.get(address) {
            if entry.location_service_pending {
                self.entries.remove(address);
            }
        }
    }

    /// Whether `(address, sn)` was seen before; records it otherwise
    ///
    /// Unknown sources are never duplicates.
    pub fn is_duplicate(&mut self, address: &GnAddress, sn: SequenceNumber) -> bool {
        self.check_sequence_number(address, sn) == SequenceCheck::Duplicate
    }

    /// Run `sn` through the source's duplicate list and sequence tracking
    pub fn check_sequence_number(&mut self, address: &GnAddress, sn: SequenceNumber) -> SequenceCheck {
        let entry = match self.entries.get_mut(address) {
            Some(entry) => entry,
            None => return SequenceCheck::InOrder,
        };

        if entry.duplicates.check_and_insert(sn) {
            SequenceCheck::Duplicate
        } else if entry.observe_sequence_number(sn) {
            SequenceCheck::InOrder
        } else {
            trace!("Out of order sequence number {} from {}", sn, address);
            SequenceCheck::Reordered
        }
    }

    /// Fold a received packet into the source's data rate estimate
    pub fn record_packet(&mut self, address: &GnAddress, bytes: usize, now: Timestamp) {
        if let Some(entry) = self.find_mut(address, now) {
            entry.record_packet(bytes, now);
        }
    }

    /// Live neighbors with a known position
    pub fn neighbors(&self, now: Timestamp) -> impl Iterator<Item = &LocationTableEntry> {
        self.entries
            .values()
            .filter(move |entry| entry.is_neighbor && entry.has_position())
            .filter(move |entry| !self.is_stale(entry, now))
    }

    pub fn has_neighbors(&self, now: Timestamp) -> bool {
        self.neighbors(now).next().is_some()
    }

    /// Neighbor closest to `target` and its distance in meters
    pub fn find_nearest_neighbor(
        &self,
        target: GeoPoint,
        now: Timestamp,
    ) -> Option<(&LocationTableEntry, f64)> {
        self.neighbors(now)
            .map(|entry| {
                let d = GeoPoint::from(&entry.position_vector).distance_to(&target);
                (entry, d)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn remove(&mut self, address: &GnAddress) -> Option<LocationTableEntry> {
        self.entries.remove(address)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_stale(&mut self, now: Timestamp) -> usize {
        let lifetime = self.lifetime_millis;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.age_millis(now) <= lifetime);
        before - self.entries.len()
    }

    /// Live entries
    pub fn entries(&self, now: Timestamp) -> Vec<LocationTableEntry> {
        self.entries
            .values()
            .filter(|entry| !self.is_stale(entry, now))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::EARTH_RADIUS_M;
    use geonet_protocol::{MacAddress, StationType};

    const LIFETIME: Duration = Duration::from_secs(20);

    fn create_test_address(last: u8) -> GnAddress {
        GnAddress::new(
            false,
            StationType::PassengerCar,
            MacAddress::from_bytes([0x02, 0, 0, 0, 0, last]),
        )
    }

    /// Longitude (1/10 micro-degree) of a point `meters` east of 0,0
    fn longitude_east(meters: f64) -> i32 {
        let meters_per_degree = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        (meters / meters_per_degree * 1e7).round() as i32
    }

    fn create_test_lpv(last: u8, timestamp: u32, longitude: i32) -> LongPositionVector {
        LongPositionVector {
            address: create_test_address(last),
            timestamp: Timestamp(timestamp),
            latitude: 0,
            longitude,
            ..Default::default()
        }
    }

    fn create_test_table() -> LocationTable {
        LocationTable::new(create_test_address(0), LIFETIME)
    }

    #[test]
    fn test_update_creates_entry() {
        let mut table = create_test_table();
        let result = table.update(create_test_lpv(1, 1_000, 0), true, Timestamp(1_000));

        assert!(result.created);
        assert!(result.position_updated);

        let entry = table.find(&create_test_address(1), Timestamp(1_000)).unwrap();
        assert!(entry.is_neighbor);
        assert!(entry.is_new);
    }

    #[test]
    fn test_dont_add_self() {
        let mut table = create_test_table();
        let result = table.update(create_test_lpv(0, 1_000, 0), true, Timestamp(1_000));

        assert_eq!(result, TableUpdate::default());
        assert!(table.is_empty());
    }

    #[test]
    fn test_older_position_is_ignored() {
        let mut table = create_test_table();
        table.update(create_test_lpv(1, 2_000, 100), false, Timestamp(2_000));

        let result = table.update(create_test_lpv(1, 1_500, 999), false, Timestamp(2_100));
        assert!(!result.position_updated);

        let entry = table.find(&create_test_address(1), Timestamp(2_100)).unwrap();
        assert_eq!(entry.position_vector.longitude, 100);
        assert!(!entry.is_new);

        let result = table.update(create_test_lpv(1, 2_500, 200), false, Timestamp(2_600));
        assert!(result.position_updated);
        let entry = table.find(&create_test_address(1), Timestamp(2_600)).unwrap();
        assert_eq!(entry.position_vector.longitude, 200);
    }

    #[test]
    fn test_neighbor_flag_is_sticky() {
        let mut table = create_test_table();
        table.update(create_test_lpv(1, 1_000, 0), true, Timestamp(1_000));
        table.update(create_test_lpv(1, 2_000, 0), false, Timestamp(2_000));

        let entry = table.find(&create_test_address(1), Timestamp(2_000)).unwrap();
        assert!(entry.is_neighbor);
    }

    #[test]
    fn test_aging_boundary() {
        let mut table = create_test_table();
        table.update(create_test_lpv(1, 10_000, 0), true, Timestamp(10_000));
        let address = create_test_address(1);

        // Exactly at the lifetime the entry is still live
        assert!(table.find(&address, Timestamp(30_000)).is_some());
        assert!(table.find(&address, Timestamp(30_001)).is_none());

        assert_eq!(table.purge_stale(Timestamp(30_000)), 0);
        assert_eq!(table.purge_stale(Timestamp(30_001)), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_month_old_entry_is_stale() {
        let mut table = create_test_table();
        let address = create_test_address(1);
        let now = Timestamp(3_000_000_000);
        let thirty_days = 30 * 24 * 3_600 * 1_000;

        table.update(
            create_test_lpv(1, now.0 - thirty_days, 0),
            true,
            Timestamp(now.0 - thirty_days),
        );

        assert!(table.find(&address, now).is_none());
        assert!(!table.has_neighbors(now));
        assert_eq!(table.purge_stale(now), 1);
    }

    #[test]
    fn test_future_stamped_entry_is_stale() {
        let mut table = create_test_table();
        let address = create_test_address(1);
        let now = Timestamp(3_000_000_000);
        let hour = 3_600 * 1_000;

        // Remote clock an hour ahead of ours
        table.update(create_test_lpv(1, now.0 + hour, 0), true, now);

        let later = now.add_millis(hour / 2);
        assert!(table.find(&address, later).is_none());
        assert!(table
            .find_nearest_neighbor(GeoPoint::default(), later)
            .is_none());
        assert_eq!(table.purge_stale(later), 1);
    }

    #[test]
    fn test_small_clock_skew_tolerated() {
        let mut table = create_test_table();
        table.update(create_test_lpv(1, 10_500, 0), true, Timestamp(10_000));

        assert!(table.find(&create_test_address(1), Timestamp(10_000)).is_some());
    }

    #[test]
    fn test_stale_entry_recreated_on_update() {
        let mut table = create_test_table();
        table.update(create_test_lpv(1, 1_000, 0), true, Timestamp(1_000));

        let result = table.update(create_test_lpv(1, 40_000, 0), false, Timestamp(40_000));
        assert!(result.created);

        let entry = table.find(&create_test_address(1), Timestamp(40_000)).unwrap();
        assert!(!entry.is_neighbor);
    }

    #[test]
    fn test_pending_placeholder_resolution() {
        let mut table = create_test_table();
        let address = create_test_address(3);

        assert!(table.insert_pending(address, Timestamp(5_000)));
        assert!(!table.insert_pending(address, Timestamp(5_100)));
        assert!(table.find(&address, Timestamp(5_100)).is_some());
        assert!(table.find_position(&address, Timestamp(5_100)).is_none());

        // A reply may carry a timestamp older than the placeholder
        let result = table.update(create_test_lpv(3, 4_000, 42), false, Timestamp(5_200));
        assert!(result.resolved_pending);
        assert!(result.position_updated);

        let entry = table.find_position(&address, Timestamp(5_200)).unwrap();
        assert_eq!(entry.position_vector.longitude, 42);
        assert!(!entry.location_service_pending);
    }

    #[test]
    fn test_cancel_pending() {
        let mut table = create_test_table();
        let address = create_test_address(3);

        table.insert_pending(address, Timestamp(5_000));
        table.cancel_pending(&address);
        assert!(table.is_empty());

        // Resolved entries survive a cancel
        table.update(create_test_lpv(4, 5_000, 0), false, Timestamp(5_000));
        table.cancel_pending(&create_test_address(4));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut table = create_test_table();
        let address = create_test_address(1);

        // Unknown source
        assert!(!table.is_duplicate(&address, SequenceNumber(1)));

        table.update(create_test_lpv(1, 1_000, 0), true, Timestamp(1_000));
        assert!(!table.is_duplicate(&address, SequenceNumber(1)));
        assert!(table.is_duplicate(&address, SequenceNumber(1)));
        assert!(!table.is_duplicate(&address, SequenceNumber(2)));

        let entry = table.find(&address, Timestamp(1_000)).unwrap();
        assert_eq!(entry.last_sequence_number, Some(SequenceNumber(2)));
    }

    #[test]
    fn test_sequence_number_ordering() {
        let mut table = create_test_table();
        let address = create_test_address(1);
        table.update(create_test_lpv(1, 1_000, 0), true, Timestamp(1_000));

        assert_eq!(
            table.check_sequence_number(&address, SequenceNumber(5)),
            SequenceCheck::InOrder
        );
        assert_eq!(
            table.check_sequence_number(&address, SequenceNumber(3)),
            SequenceCheck::Reordered
        );
        assert_eq!(
            table.check_sequence_number(&address, SequenceNumber(3)),
            SequenceCheck::Duplicate
        );
        assert_eq!(
            table.check_sequence_number(&address, SequenceNumber(6)),
            SequenceCheck::InOrder
        );
    }

    #[test]
    fn test_find_nearest_neighbor() {
        let mut table = create_test_table();
        table.update(create_test_lpv(1, 1_000, longitude_east(500.0)), true, Timestamp(1_000));
        table.update(create_test_lpv(2, 1_000, longitude_east(900.0)), true, Timestamp(1_000));
        // Closer but not a neighbor
        table.update(create_test_lpv(3, 1_000, longitude_east(590.0)), false, Timestamp(1_000));

        let target = GeoPoint::new(0, longitude_east(600.0));
        let (entry, d) = table.find_nearest_neighbor(target, Timestamp(1_000)).unwrap();

        assert_eq!(entry.address, create_test_address(1));
        assert!((d - 100.0).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_nearest_neighbor_ignores_stale() {
        let mut table = create_test_table();
        table.update(create_test_lpv(1, 1_000, 0), true, Timestamp(1_000));

        assert!(table.has_neighbors(Timestamp(1_000)));
        assert!(!table.has_neighbors(Timestamp(60_000)));
        assert!(table
            .find_nearest_neighbor(GeoPoint::default(), Timestamp(60_000))
            .is_none());
    }
}
