//! Duplicate packet detection per source

use geonet_protocol::SequenceNumber;
use std::collections::VecDeque;

/// Default number of sequence numbers remembered per source
pub const DPL_CAPACITY: usize = 20;

/// Bounded FIFO of recently seen sequence numbers with a hit counter each
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicatePacketList {
    entries: VecDeque<(SequenceNumber, u32)>,
    capacity: usize,
}

impl DuplicatePacketList {
    pub fn new() -> Self {
        Self::with_capacity(DPL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        DuplicatePacketList {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record `sn`; returns true if it was already in the list
    ///
    /// A duplicate bumps its counter. A new number is appended, evicting the
    /// oldest one when the list is full.
    pub fn check_and_insert(&mut self, sn: SequenceNumber) -> bool {
        if let Some((_, counter)) = self.entries.iter_mut().find(|(seen, _)| *seen == sn) {
            *counter = counter.saturating_add(1);
            return true;
        }

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((sn, 1));
        false
    }

    pub fn contains(&self, sn: SequenceNumber) -> bool {
        self.entries.iter().any(|(seen, _)| *seen == sn)
    }

    /// How many times `sn` was seen, if remembered
    pub fn count(&self, sn: SequenceNumber) -> Option<u32> {
        self.entries
            .iter()
            .find(|(seen, _)| *seen == sn)
            .map(|(_, counter)| *counter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DuplicatePacketList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_is_not_duplicate() {
        let mut dpl = DuplicatePacketList::new();
        assert!(!dpl.check_and_insert(SequenceNumber(7)));
        assert!(dpl.check_and_insert(SequenceNumber(7)));
        assert!(dpl.check_and_insert(SequenceNumber(7)));
        assert_eq!(dpl.count(SequenceNumber(7)), Some(3));
    }

    #[test]
    fn test_oldest_evicted_when_full() {
        let mut dpl = DuplicatePacketList::new();
        for sn in 0..DPL_CAPACITY as u16 {
            assert!(!dpl.check_and_insert(SequenceNumber(sn)));
        }
        assert_eq!(dpl.len(), DPL_CAPACITY);

        // One more pushes out sequence number 0
        assert!(!dpl.check_and_insert(SequenceNumber(100)));
        assert_eq!(dpl.len(), DPL_CAPACITY);
        assert!(!dpl.contains(SequenceNumber(0)));
        assert!(dpl.contains(SequenceNumber(1)));

        // So 0 is treated as new again
        assert!(!dpl.check_and_insert(SequenceNumber(0)));
    }
}
