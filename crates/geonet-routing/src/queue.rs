//! Outbound packet queues
//!
//! Three families of bounded FIFO queues hold packets that cannot be sent
//! yet: one broadcast queue (waiting for any neighbor), one unicast queue
//! per destination (waiting for forwarding progress) and one location
//! service queue per destination (waiting for address resolution).

use crate::error::RoutingError;
use crate::link::{LinkDestination, TransmitCallback};
use geonet_protocol::GnAddress;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Queue family selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Broadcast,
    Unicast,
    LocationService,
}

/// A packet parked in a queue
#[derive(Clone)]
pub struct QueueElement {
    /// Encoded GeoNetworking packet, owned by the queue
    pub bytes: Vec<u8>,

    /// Where the packet goes once released
    pub callback: TransmitCallback,

    pub enqueued_at: Instant,

    /// Packet lifetime from its Basic header
    pub lifetime: Duration,

    /// Contention timeout; zero outside the CBF queue
    pub cbf_timeout: Duration,

    /// Times this packet was re-queued
    pub retries: u32,
}

impl QueueElement {
    pub fn new(bytes: Vec<u8>, callback: TransmitCallback, lifetime: Duration) -> Self {
        QueueElement {
            bytes,
            callback,
            enqueued_at: Instant::now(),
            lifetime,
            cbf_timeout: Duration::ZERO,
            retries: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.enqueued_at) >= self.lifetime
    }

    /// Lifetime left at `now`
    pub fn remaining_lifetime(&self, now: Instant) -> Duration {
        self.lifetime
            .saturating_sub(now.saturating_duration_since(self.enqueued_at))
    }

    pub fn transmit(&self, destination: LinkDestination) {
        (self.callback)(destination, &self.bytes);
    }
}

impl fmt::Debug for QueueElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueElement")
            .field("len", &self.bytes.len())
            .field("enqueued_at", &self.enqueued_at)
            .field("lifetime", &self.lifetime)
            .field("cbf_timeout", &self.cbf_timeout)
            .field("retries", &self.retries)
            .finish()
    }
}

/// Outcome of a flush
#[derive(Debug, Default)]
pub struct Flushed {
    /// Live elements, in queue order, to be sent by the caller
    pub ready: Vec<QueueElement>,

    /// Elements dropped because their lifetime elapsed
    pub expired: usize,

    /// Elements discarded by a purge
    pub purged: usize,
}

#[derive(Debug)]
pub struct PacketQueues {
    broadcast: VecDeque<QueueElement>,
    unicast: HashMap<GnAddress, VecDeque<QueueElement>>,
    location_service: HashMap<GnAddress, VecDeque<QueueElement>>,

    broadcast_capacity: usize,
    unicast_capacity: usize,
    location_service_capacity: usize,
}

impl PacketQueues {
    pub fn new(
        broadcast_capacity: usize,
        unicast_capacity: usize,
        location_service_capacity: usize,
    ) -> Self {
        PacketQueues {
            broadcast: VecDeque::with_capacity(broadcast_capacity),
            unicast: HashMap::new(),
            location_service: HashMap::new(),
            broadcast_capacity,
            unicast_capacity,
            location_service_capacity,
        }
    }

    fn capacity(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Broadcast => self.broadcast_capacity,
            QueueKind::Unicast => self.unicast_capacity,
            QueueKind::LocationService => self.location_service_capacity,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind, address: GnAddress) -> &mut VecDeque<QueueElement> {
        match kind {
            QueueKind::Broadcast => &mut self.broadcast,
            QueueKind::Unicast => self.unicast.entry(address).or_default(),
            QueueKind::LocationService => self.location_service.entry(address).or_default(),
        }
    }

    /// Append an element; returns true if the oldest one was dropped to make room
    ///
    /// `address` is ignored for the broadcast queue.
    pub fn enqueue(&mut self, kind: QueueKind, address: GnAddress, element: QueueElement) -> bool {
        let capacity = self.capacity(kind);
        let queue = self.queue_mut(kind, address);

        let overflow = queue.len() >= capacity;
        if overflow {
            queue.pop_front();
            warn!(
                "{} on {:?} queue for {}, dropped oldest packet",
                RoutingError::QueueOverflow,
                kind,
                address
            );
        }
        queue.push_back(element);
        overflow
    }

    /// Drain matching queues
    ///
    /// With `address == None` every per-destination queue of `kind` is drained.
    /// Expired elements are dropped; with `purge` everything is dropped.
    pub fn flush(
        &mut self,
        kind: QueueKind,
        address: Option<&GnAddress>,
        purge: bool,
        now: Instant,
    ) -> Flushed {
        let drained: Vec<QueueElement> = match kind {
            QueueKind::Broadcast => self.broadcast.drain(..).collect(),
            QueueKind::Unicast | QueueKind::LocationService => {
                let map = if kind == QueueKind::Unicast {
                    &mut self.unicast
                } else {
                    &mut self.location_service
                };
                match address {
                    Some(address) => map.remove(address).map(Vec::from).unwrap_or_default(),
                    None => map.drain().flat_map(|(_, queue)| queue).collect(),
                }
            }
        };

        let mut flushed = Flushed::default();
        for element in drained {
            if purge {
                flushed.purged += 1;
            } else if element.is_expired(now) {
                flushed.expired += 1;
            } else {
                flushed.ready.push(element);
            }
        }

        if flushed.expired > 0 || flushed.purged > 0 {
            debug!(
                "Flushed {:?} queue: {} ready, {} expired, {} purged",
                kind,
                flushed.ready.len(),
                flushed.expired,
                flushed.purged
            );
        }
        flushed
    }

    /// Number of queued elements
    ///
    /// With `address == None` counts across all destinations of `kind`.
    pub fn len(&self, kind: QueueKind, address: Option<&GnAddress>) -> usize {
        let map = match kind {
            QueueKind::Broadcast => return self.broadcast.len(),
            QueueKind::Unicast => &self.unicast,
            QueueKind::LocationService => &self.location_service,
        };
        match address {
            Some(address) => map.get(address).map_or(0, VecDeque::len),
            None => map.values().map(VecDeque::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len(QueueKind::Broadcast, None) == 0
            && self.len(QueueKind::Unicast, None) == 0
            && self.len(QueueKind::LocationService, None) == 0
    }

    /// Drop every queued element
    pub fn clear(&mut self) -> usize {
        let total = self.len(QueueKind::Broadcast, None)
            + self.len(QueueKind::Unicast, None)
            + self.len(QueueKind::LocationService, None);
        self.broadcast.clear();
        self.unicast.clear();
        self.location_service.clear();
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geonet_protocol::{MacAddress, StationType};
    use std::sync::{Arc, Mutex};

    fn create_test_address(last: u8) -> GnAddress {
        GnAddress::new(
            false,
            StationType::PassengerCar,
            MacAddress::from_bytes([0x02, 0, 0, 0, 0, last]),
        )
    }

    fn create_test_element(tag: u8, lifetime: Duration) -> QueueElement {
        let callback: TransmitCallback = Arc::new(|_, _| {});
        QueueElement::new(vec![tag], callback, lifetime)
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut queues = PacketQueues::new(4, 3, 3);
        let dest = create_test_address(1);

        for tag in 0..3 {
            let overflow = queues.enqueue(
                QueueKind::Unicast,
                dest,
                create_test_element(tag, Duration::from_secs(60)),
            );
            assert!(!overflow);
        }
        assert!(queues.enqueue(
            QueueKind::Unicast,
            dest,
            create_test_element(3, Duration::from_secs(60))
        ));

        assert_eq!(queues.len(QueueKind::Unicast, Some(&dest)), 3);
        let flushed = queues.flush(QueueKind::Unicast, Some(&dest), false, Instant::now());
        let tags: Vec<u8> = flushed.ready.iter().map(|e| e.bytes[0]).collect();
        assert_eq!(tags, vec![1, 2, 3]);
    }

    #[test]
    fn test_queues_are_per_destination() {
        let mut queues = PacketQueues::new(4, 4, 4);
        let a = create_test_address(1);
        let b = create_test_address(2);

        queues.enqueue(
            QueueKind::LocationService,
            a,
            create_test_element(0, Duration::from_secs(60)),
        );
        queues.enqueue(
            QueueKind::LocationService,
            b,
            create_test_element(1, Duration::from_secs(60)),
        );

        let flushed = queues.flush(QueueKind::LocationService, Some(&a), false, Instant::now());
        assert_eq!(flushed.ready.len(), 1);
        assert_eq!(queues.len(QueueKind::LocationService, Some(&a)), 0);
        assert_eq!(queues.len(QueueKind::LocationService, Some(&b)), 1);
        assert_eq!(queues.len(QueueKind::LocationService, None), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_drops_expired() {
        let mut queues = PacketQueues::new(4, 4, 4);
        let dest = create_test_address(1);

        queues.enqueue(
            QueueKind::Broadcast,
            dest,
            create_test_element(0, Duration::from_secs(1)),
        );
        queues.enqueue(
            QueueKind::Broadcast,
            dest,
            create_test_element(1, Duration::from_secs(10)),
        );

        tokio::time::advance(Duration::from_secs(2)).await;

        let flushed = queues.flush(QueueKind::Broadcast, None, false, Instant::now());
        assert_eq!(flushed.expired, 1);
        assert_eq!(flushed.ready.len(), 1);
        assert_eq!(flushed.ready[0].bytes, vec![1]);
        assert_eq!(
            flushed.ready[0].remaining_lifetime(Instant::now()),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn test_purge_discards_everything() {
        let mut queues = PacketQueues::new(4, 4, 4);
        let dest = create_test_address(1);

        for tag in 0..2 {
            queues.enqueue(
                QueueKind::LocationService,
                dest,
                create_test_element(tag, Duration::from_secs(60)),
            );
        }

        let flushed = queues.flush(QueueKind::LocationService, Some(&dest), true, Instant::now());
        assert!(flushed.ready.is_empty());
        assert_eq!(flushed.purged, 2);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_element_transmit_uses_callback() {
        let sent: Arc<Mutex<Vec<(LinkDestination, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let callback: TransmitCallback = Arc::new(move |dest, bytes| {
            sink.lock().unwrap().push((dest, bytes.to_vec()));
        });

        let element = QueueElement::new(vec![1, 2, 3], callback, Duration::from_secs(1));
        element.transmit(LinkDestination::Broadcast);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (LinkDestination::Broadcast, vec![1, 2, 3]));
    }
}
