//! Outbound path: locally originated packets and queue release

use crate::cbf::CbfKey;
use crate::error::{Result, RoutingError};
use crate::forwarding::{ForwardingContext, ForwardingDecision};
use crate::link::{LinkDestination, TransmitCallback};
use crate::location_service::PendingTransmission;
use crate::queue::{QueueElement, QueueKind};
use crate::router::Shared;
use geonet_location::GeoPoint;
use geonet_protocol::{
    AreaHeader, BasicHeader, CommonHeader, CommonNextHeader, ExtendedHeader, GeoArea, GnAddress,
    GnPacket, Lifetime, LongPositionVector, PacketType, ShortPositionVector,
    SingleHopHeader, TrafficClass, TsbHeader, UnicastHeader,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Where a locally originated packet is going
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    GeoUnicast(GnAddress),
    GeoBroadcast(GeoArea),
    GeoAnycast(GeoArea),
    SingleHopBroadcast,
    TopologicallyScopedBroadcast,
}

/// A packet handed down by the upper layer
#[derive(Clone)]
pub struct TransmitRequest {
    pub destination: Destination,
    pub payload: Vec<u8>,
    pub next_header: CommonNextHeader,
    pub traffic_class: TrafficClass,

    /// Defaults to the configured packet lifetime
    pub lifetime: Option<Duration>,

    /// Defaults to the configured hop limit
    pub max_hop_limit: Option<u8>,

    /// Defaults to the router's link callback
    pub callback: Option<TransmitCallback>,
}

impl TransmitRequest {
    pub fn new(destination: Destination, payload: Vec<u8>) -> Self {
        TransmitRequest {
            destination,
            payload,
            next_header: CommonNextHeader::BtpB,
            traffic_class: TrafficClass::default(),
            lifetime: None,
            max_hop_limit: None,
            callback: None,
        }
    }

    pub fn with_next_header(mut self, next_header: CommonNextHeader) -> Self {
        self.next_header = next_header;
        self
    }

    pub fn with_traffic_class(mut self, traffic_class: TrafficClass) -> Self {
        self.traffic_class = traffic_class;
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn with_max_hop_limit(mut self, max_hop_limit: u8) -> Self {
        self.max_hop_limit = Some(max_hop_limit);
        self
    }

    pub fn with_callback(mut self, callback: TransmitCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl fmt::Debug for TransmitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitRequest")
            .field("destination", &self.destination)
            .field("payload_len", &self.payload.len())
            .field("next_header", &self.next_header)
            .field("traffic_class", &self.traffic_class)
            .field("lifetime", &self.lifetime)
            .field("max_hop_limit", &self.max_hop_limit)
            .finish()
    }
}

#[derive(Debug)]
pub enum TransmitOutcome {
    /// Handed to the link layer
    Sent,

    /// Parked in a queue or on a contention timer; a handle is returned
    /// when the packet waits on a location service lookup
    Queued(Option<PendingTransmission>),
}

impl TransmitOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, TransmitOutcome::Sent)
    }

    pub fn into_pending(self) -> Option<PendingTransmission> {
        match self {
            TransmitOutcome::Queued(pending) => pending,
            TransmitOutcome::Sent => None,
        }
    }
}

/// An encoded packet ready to be sent or parked
pub(crate) struct Outgoing {
    pub(crate) bytes: Vec<u8>,
    pub(crate) callback: TransmitCallback,
    pub(crate) lifetime: Duration,
    /// Unicast destination, selects the per-destination queue
    pub(crate) destination: Option<GnAddress>,
    /// Identity for the CBF queue
    pub(crate) key: Option<CbfKey>,
    pub(crate) retries: u32,
}

impl Outgoing {
    pub(crate) fn new(packet: &GnPacket, callback: TransmitCallback) -> Self {
        let key = match (packet.source(), packet.sequence_number()) {
            (Some(source), Some(sn)) => Some((source.address, sn)),
            _ => None,
        };
        Outgoing {
            bytes: packet.encode(),
            callback,
            lifetime: packet.basic.lifetime.as_duration(),
            destination: None,
            key,
            retries: 0,
        }
    }

    pub(crate) fn with_destination(mut self, destination: GnAddress) -> Self {
        self.destination = Some(destination);
        self
    }

    fn into_element(self) -> QueueElement {
        let mut element = QueueElement::new(self.bytes, self.callback, self.lifetime);
        element.retries = self.retries;
        element
    }
}

impl Shared {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build_packet(
        &self,
        packet_type: PacketType,
        extended: ExtendedHeader,
        lifetime: Lifetime,
        max_hop_limit: u8,
        next_header: CommonNextHeader,
        traffic_class: TrafficClass,
        payload: Vec<u8>,
    ) -> Result<GnPacket> {
        let common = CommonHeader {
            next_header,
            packet_type,
            traffic_class,
            mobile: self.config.is_mobile,
            payload_length: 0,
            max_hop_limit,
        };
        let packet = GnPacket::new(
            BasicHeader::new(lifetime, max_hop_limit),
            common,
            extended,
            payload,
        )?;
        Ok(packet)
    }

    /// Decide the next hop toward `destination` under the table read lock
    pub(crate) async fn route_toward(
        &self,
        local: GeoPoint,
        sender: Option<GeoPoint>,
        traffic_class: TrafficClass,
        destination: GeoPoint,
    ) -> ForwardingDecision {
        let table = self.table.read().await;
        let ctx = ForwardingContext {
            table: &table,
            local,
            sender,
            traffic_class,
            now: self.clock.now(),
        };
        self.engine.non_area(&ctx, destination)
    }

    /// Decide how to carry a packet into `area` under the table read lock
    pub(crate) async fn route_into(
        &self,
        local: GeoPoint,
        sender: Option<GeoPoint>,
        traffic_class: TrafficClass,
        area: &GeoArea,
    ) -> ForwardingDecision {
        let table = self.table.read().await;
        let ctx = ForwardingContext {
            table: &table,
            local,
            sender,
            traffic_class,
            now: self.clock.now(),
        };
        self.engine.area(&ctx, area)
    }

    pub(crate) async fn transmit(self: &Arc<Self>, request: TransmitRequest) -> Result<TransmitOutcome> {
        self.check_running()?;

        let callback = request
            .callback
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.link));
        let lifetime = Lifetime::from_duration(
            request
                .lifetime
                .unwrap_or_else(|| self.config.default_packet_lifetime()),
        );
        let max_hop_limit = request
            .max_hop_limit
            .unwrap_or(self.config.default_hop_limit)
            .max(1);
        let source = self.local_position_vector();

        match request.destination {
            Destination::SingleHopBroadcast => {
                let packet = self.build_packet(
                    PacketType::SingleHopBroadcast,
                    ExtendedHeader::SingleHop(SingleHopHeader {
                        source,
                        media_dependent: 0,
                    }),
                    lifetime,
                    1,
                    request.next_header,
                    request.traffic_class,
                    request.payload,
                )?;
                self.dispatch(ForwardingDecision::Broadcast, Outgoing::new(&packet, callback))
                    .await
            }
            Destination::TopologicallyScopedBroadcast => {
                let packet = self.build_packet(
                    PacketType::TopologicallyScopedBroadcast,
                    ExtendedHeader::Tsb(TsbHeader {
                        sequence_number: self.next_sequence_number(),
                        source,
                    }),
                    lifetime,
                    max_hop_limit,
                    request.next_header,
                    request.traffic_class,
                    request.payload,
                )?;

                let has_neighbors = self.table.read().await.has_neighbors(self.clock.now());
                let decision = if !has_neighbors && request.traffic_class.store_carry_forward() {
                    ForwardingDecision::BufferBroadcast
                } else {
                    ForwardingDecision::Broadcast
                };
                self.dispatch(decision, Outgoing::new(&packet, callback)).await
            }
            Destination::GeoBroadcast(area) | Destination::GeoAnycast(area) => {
                let packet_type = match request.destination {
                    Destination::GeoAnycast(_) => PacketType::GeoAnycast(area.shape),
                    _ => PacketType::GeoBroadcast(area.shape),
                };
                let packet = self.build_packet(
                    packet_type,
                    ExtendedHeader::Area(AreaHeader {
                        sequence_number: self.next_sequence_number(),
                        source,
                        area,
                    }),
                    lifetime,
                    max_hop_limit,
                    request.next_header,
                    request.traffic_class,
                    request.payload,
                )?;

                let decision = self
                    .route_into(GeoPoint::from(&source), None, request.traffic_class, &area)
                    .await;
                self.dispatch(decision, Outgoing::new(&packet, callback))
                    .await
            }
            Destination::GeoUnicast(target) => {
                self.transmit_unicast(
                    target,
                    source,
                    lifetime,
                    max_hop_limit,
                    request.next_header,
                    request.traffic_class,
                    request.payload,
                    callback,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn transmit_unicast(
        self: &Arc<Self>,
        target: GnAddress,
        source: LongPositionVector,
        lifetime: Lifetime,
        max_hop_limit: u8,
        next_header: CommonNextHeader,
        traffic_class: TrafficClass,
        payload: Vec<u8>,
        callback: TransmitCallback,
    ) -> Result<TransmitOutcome> {
        let now = self.clock.now();
        let known = self
            .table
            .read()
            .await
            .find_position(&target, now)
            .map(|entry| entry.position_vector);

        let destination = match known {
            Some(lpv) => lpv.to_short(),
            None => ShortPositionVector {
                address: target,
                ..Default::default()
            },
        };
        let packet = self.build_packet(
            PacketType::GeoUnicast,
            ExtendedHeader::Unicast(UnicastHeader {
                sequence_number: self.next_sequence_number(),
                source,
                destination,
            }),
            lifetime,
            max_hop_limit,
            next_header,
            traffic_class,
            payload,
        )?;
        let outgoing = Outgoing::new(&packet, callback).with_destination(target);

        if known.is_some() {
            let point = GeoPoint::new(destination.latitude, destination.longitude);
            let decision = self
                .route_toward(GeoPoint::from(&source), None, traffic_class, point)
                .await;
            return self.dispatch(decision, outgoing).await;
        }

        debug!("No position for {}, buffering behind location service", target);
        self.enqueue(QueueKind::LocationService, target, outgoing.into_element())
            .await;
        self.start_lookup(target).await?;
        let pending = self.location_service.subscribe(&target).await;
        Ok(TransmitOutcome::Queued(pending))
    }

    /// Act on a forwarding decision
    pub(crate) async fn dispatch(
        &self,
        decision: ForwardingDecision,
        outgoing: Outgoing,
    ) -> Result<TransmitOutcome> {
        match decision {
            ForwardingDecision::Unicast { next_hop, mac } => {
                debug!("Sending to next hop {}", next_hop);
                (outgoing.callback)(LinkDestination::Unicast(mac), &outgoing.bytes);
                self.count(|stats| stats.packets_sent += 1).await;
                Ok(TransmitOutcome::Sent)
            }
            ForwardingDecision::Broadcast => {
                (outgoing.callback)(LinkDestination::Broadcast, &outgoing.bytes);
                self.count(|stats| stats.packets_sent += 1).await;
                Ok(TransmitOutcome::Sent)
            }
            ForwardingDecision::Buffer => {
                match outgoing.destination {
                    Some(destination) => {
                        self.enqueue(QueueKind::Unicast, destination, outgoing.into_element())
                            .await
                    }
                    None => {
                        self.enqueue(
                            QueueKind::Broadcast,
                            self.local_address(),
                            outgoing.into_element(),
                        )
                        .await
                    }
                }
                Ok(TransmitOutcome::Queued(None))
            }
            ForwardingDecision::BufferBroadcast => {
                self.enqueue(
                    QueueKind::Broadcast,
                    self.local_address(),
                    outgoing.into_element(),
                )
                .await;
                Ok(TransmitOutcome::Queued(None))
            }
            ForwardingDecision::Defer(timeout) => match outgoing.key {
                Some(key) => {
                    self.cbf.schedule(key, outgoing.into_element(), timeout).await;
                    Ok(TransmitOutcome::Queued(None))
                }
                None => {
                    (outgoing.callback)(LinkDestination::Broadcast, &outgoing.bytes);
                    self.count(|stats| stats.packets_sent += 1).await;
                    Ok(TransmitOutcome::Sent)
                }
            },
            ForwardingDecision::Discard(reason) => Err(reason),
        }
    }

    pub(crate) async fn enqueue(&self, kind: QueueKind, address: GnAddress, element: QueueElement) {
        let overflow = self.queues.lock().await.enqueue(kind, address, element);
        self.count(|stats| {
            stats.packets_queued += 1;
            if overflow {
                stats.queue_overflows += 1;
                stats.packets_dropped += 1;
            }
        })
        .await;
    }

    /// Send every live packet in the broadcast queue
    pub(crate) async fn flush_broadcast_queue(&self) {
        let flushed = self
            .queues
            .lock()
            .await
            .flush(QueueKind::Broadcast, None, false, Instant::now());
        if flushed.ready.is_empty() && flushed.expired == 0 {
            return;
        }

        for element in &flushed.ready {
            element.transmit(LinkDestination::Broadcast);
        }
        let sent = flushed.ready.len() as u64;
        self.count(|stats| {
            stats.packets_sent += sent;
            stats.packets_dropped += flushed.expired as u64;
        })
        .await;
    }

    /// Re-run forwarding for every packet parked in a unicast queue
    pub(crate) async fn flush_unicast_queues(self: &Arc<Self>) {
        let flushed = self
            .queues
            .lock()
            .await
            .flush(QueueKind::Unicast, None, false, Instant::now());
        self.release(flushed.ready, flushed.expired).await;
    }

    /// Release the packets that waited on a lookup for `target`
    pub(crate) async fn flush_location_service(self: &Arc<Self>, target: GnAddress) {
        let flushed = self.queues.lock().await.flush(
            QueueKind::LocationService,
            Some(&target),
            false,
            Instant::now(),
        );
        self.release(flushed.ready, flushed.expired).await;
    }

    async fn release(self: &Arc<Self>, elements: Vec<QueueElement>, expired: usize) {
        if expired > 0 {
            self.count(|stats| stats.packets_dropped += expired as u64)
                .await;
        }
        for element in elements {
            if let Err(e) = self.release_unicast(element).await {
                debug!("Queued packet not released: {}", e);
                self.count(|stats| stats.packets_dropped += 1).await;
            }
        }
    }

    /// Forward a queued unicast packet with the freshest destination position
    async fn release_unicast(&self, element: QueueElement) -> Result<TransmitOutcome> {
        let mut packet = GnPacket::decode(&element.bytes)?;
        let remaining = element.remaining_lifetime(Instant::now());
        packet.basic.lifetime = Lifetime::from_duration(remaining);

        let (source, destination) = match &mut packet.extended {
            ExtendedHeader::Unicast(header) => (header.source, &mut header.destination),
            _ => return Err(RoutingError::MalformedPacket(
                geonet_protocol::ProtocolError::HeaderMismatch(packet.common.packet_type),
            )),
        };
        let target = destination.address;
        let now = self.clock.now();
        let local = self.local_address();

        let decision = {
            let table = self.table.read().await;
            if let Some(entry) = table.find_position(&target, now) {
                let known = entry.position_vector;
                // An unresolved destination was sent with an empty position
                let unresolved = destination.latitude == 0 && destination.longitude == 0;
                if unresolved || known.timestamp.is_newer_than(destination.timestamp) {
                    *destination = known.to_short();
                }
            }
            let point = GeoPoint::new(destination.latitude, destination.longitude);
            let ctx = ForwardingContext {
                table: &table,
                local: self.local_point(),
                sender: (source.address != local).then(|| GeoPoint::from(&source)),
                traffic_class: packet.common.traffic_class,
                now,
            };
            self.engine.non_area(&ctx, point)
        };

        let mut outgoing = Outgoing::new(&packet, Arc::clone(&element.callback)).with_destination(target);
        outgoing.retries = element.retries + 1;
        self.dispatch(decision, outgoing).await
    }

    pub(crate) async fn send_beacon(&self) -> Result<()> {
        self.check_running()?;

        let packet = self.build_packet(
            PacketType::Beacon,
            ExtendedHeader::Beacon {
                source: self.local_position_vector(),
            },
            Lifetime::from_duration(self.config.default_packet_lifetime()),
            1,
            CommonNextHeader::Any,
            TrafficClass::default(),
            Vec::new(),
        )?;

        (self.link)(LinkDestination::Broadcast, &packet.encode());
        self.count(|stats| {
            stats.beacons_sent += 1;
            stats.packets_sent += 1;
        })
        .await;
        Ok(())
    }
}
