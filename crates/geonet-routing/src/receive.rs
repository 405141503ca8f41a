//! Inbound path: validation, location table maintenance, duplicate
//! detection, local delivery and relaying

use crate::error::{Result, RoutingError};
use crate::forwarding::{ForwardingContext, ForwardingDecision};
use crate::router::Shared;
use crate::transmit::Outgoing;
use geonet_location::{GeoPoint, SequenceCheck};
use geonet_protocol::{
    CommonNextHeader, ExtendedHeader, GeoArea, GnAddress, GnPacket, Lifetime, LongPositionVector,
    PacketType, ProtocolError, TrafficClass,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// A packet delivered to the upper layer
#[derive(Debug, Clone, PartialEq)]
pub struct Indication {
    pub packet_type: PacketType,
    pub next_header: CommonNextHeader,
    pub source: LongPositionVector,

    /// Unicast destination, if any
    pub destination: Option<GnAddress>,

    /// Destination area of GeoBroadcast / GeoAnycast
    pub area: Option<GeoArea>,

    pub traffic_class: TrafficClass,
    pub remaining_hop_limit: u8,
    pub lifetime: Lifetime,
    pub payload: Vec<u8>,

    /// The packet was also relayed
    pub forwarded: bool,
}

impl Indication {
    fn new(packet: &GnPacket, forwarded: bool) -> Option<Self> {
        let source = *packet.source()?;
        let (destination, area) = match &packet.extended {
            ExtendedHeader::Unicast(header) => (Some(header.destination.address), None),
            ExtendedHeader::LsRequest(header) => (Some(header.requested_address), None),
            ExtendedHeader::Area(header) => (None, Some(header.area)),
            _ => (None, None),
        };

        Some(Indication {
            packet_type: packet.common.packet_type,
            next_header: packet.common.next_header,
            source,
            destination,
            area,
            traffic_class: packet.common.traffic_class,
            remaining_hop_limit: packet.basic.remaining_hop_limit,
            lifetime: packet.basic.lifetime,
            payload: packet.payload.clone(),
            forwarded,
        })
    }
}

/// Result of processing a received packet
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    /// Relayed (or scheduled for relay) but not for us
    Forward,

    /// Delivered locally
    Consume(Indication),

    Drop(RoutingError),
}

impl ReceiveOutcome {
    pub fn is_drop(&self) -> bool {
        matches!(self, ReceiveOutcome::Drop(_))
    }

    pub fn indication(&self) -> Option<&Indication> {
        match self {
            ReceiveOutcome::Consume(indication) => Some(indication),
            _ => None,
        }
    }
}

fn malformed(packet: &GnPacket) -> RoutingError {
    RoutingError::MalformedPacket(ProtocolError::HeaderMismatch(packet.common.packet_type))
}

impl Shared {
    pub(crate) async fn receive(self: &Arc<Self>, bytes: &[u8]) -> ReceiveOutcome {
        match self.process(bytes).await {
            Ok(outcome) => {
                match &outcome {
                    ReceiveOutcome::Consume(indication) => {
                        let forwarded = indication.forwarded;
                        self.count(|stats| {
                            stats.packets_delivered += 1;
                            if forwarded {
                                stats.packets_forwarded += 1;
                            }
                        })
                        .await
                    }
                    ReceiveOutcome::Forward => {
                        self.count(|stats| stats.packets_forwarded += 1).await
                    }
                    ReceiveOutcome::Drop(_) => {}
                }
                outcome
            }
            Err(e) => {
                match &e {
                    RoutingError::DuplicatePacket { .. } => {
                        trace!("{}", e);
                        self.count(|stats| stats.duplicates += 1).await;
                    }
                    RoutingError::MalformedPacket(_) | RoutingError::UnsupportedSecurity => {
                        debug!("Dropped packet: {}", e);
                        self.count(|stats| {
                            stats.malformed += 1;
                            stats.packets_dropped += 1;
                        })
                        .await;
                    }
                    _ => {
                        debug!("Dropped packet: {}", e);
                        self.count(|stats| stats.packets_dropped += 1).await;
                    }
                }
                ReceiveOutcome::Drop(e)
            }
        }
    }

    async fn process(self: &Arc<Self>, bytes: &[u8]) -> Result<ReceiveOutcome> {
        self.check_running()?;
        self.count(|stats| stats.packets_received += 1).await;

        let mut packet = GnPacket::decode(bytes).map_err(|e| match e {
            ProtocolError::SecuredPacketUnsupported => RoutingError::UnsupportedSecurity,
            e => RoutingError::MalformedPacket(e),
        })?;

        let source = match packet.source() {
            Some(source) => *source,
            None => {
                return Err(RoutingError::MalformedPacket(
                    ProtocolError::InvalidHeaderType(PacketType::TYPE_ANY),
                ))
            }
        };
        if source.address == self.local_address() {
            return Err(RoutingError::OwnPacket);
        }
        if packet.basic.remaining_hop_limit == 0 {
            return Err(RoutingError::HopLimitExhausted);
        }

        // Untouched hop limit means the source itself sent it to us
        let direct = matches!(
            packet.common.packet_type,
            PacketType::Beacon | PacketType::SingleHopBroadcast
        ) || packet.basic.remaining_hop_limit == packet.common.max_hop_limit;
        packet.basic.remaining_hop_limit -= 1;

        let now = self.clock.now();
        let sequence_number = packet.sequence_number();
        let check = {
            let mut table = self.table.write().await;
            table.update(source, direct, now);
            table.record_packet(&source.address, bytes.len(), now);
            sequence_number.map(|sn| (sn, table.check_sequence_number(&source.address, sn)))
        };

        match check {
            Some((sn, SequenceCheck::Duplicate)) => {
                if self.cbf.cancel(&(source.address, sn)).await {
                    self.count(|stats| stats.cbf_cancelled += 1).await;
                }
                return Err(RoutingError::DuplicatePacket {
                    address: source.address,
                    sequence_number: sn,
                });
            }
            Some((_, SequenceCheck::Reordered)) => {
                self.count(|stats| stats.reordered += 1).await;
            }
            _ => {}
        }

        if self.location_service.resolve(&source.address).await {
            self.count(|stats| stats.ls_resolved += 1).await;
            self.flush_location_service(source.address).await;
        }

        if direct {
            self.flush_broadcast_queue().await;
            self.flush_unicast_queues().await;
        }

        match packet.common.packet_type {
            PacketType::Any => Err(malformed(&packet)),
            PacketType::Beacon | PacketType::SingleHopBroadcast => self.deliver(&packet, false),
            PacketType::TopologicallyScopedBroadcast => {
                let forwarded = self.rebroadcast(&packet).await;
                self.deliver(&packet, forwarded)
            }
            PacketType::GeoUnicast | PacketType::LocationServiceReply => {
                self.receive_unicast(packet, source).await
            }
            PacketType::LocationServiceRequest => self.receive_location_request(packet, source).await,
            PacketType::GeoBroadcast(_) => self.receive_area(packet, source, false).await,
            PacketType::GeoAnycast(_) => self.receive_area(packet, source, true).await,
        }
    }

    fn deliver(&self, packet: &GnPacket, forwarded: bool) -> Result<ReceiveOutcome> {
        Indication::new(packet, forwarded)
            .map(ReceiveOutcome::Consume)
            .ok_or_else(|| malformed(packet))
    }

    /// Relay a broadcast-type packet while hop limit remains
    async fn rebroadcast(&self, packet: &GnPacket) -> bool {
        if packet.basic.remaining_hop_limit == 0 {
            return false;
        }
        let outgoing = Outgoing::new(packet, Arc::clone(&self.link));
        self.dispatch(ForwardingDecision::Broadcast, outgoing)
            .await
            .is_ok()
    }

    async fn receive_unicast(
        &self,
        mut packet: GnPacket,
        source: LongPositionVector,
    ) -> Result<ReceiveOutcome> {
        let local = self.local_address();
        let header = match &mut packet.extended {
            ExtendedHeader::Unicast(header) => header,
            _ => return Err(malformed(&packet)),
        };

        if header.destination.address == local {
            return self.deliver(&packet, false);
        }
        if packet.basic.remaining_hop_limit == 0 {
            return Err(RoutingError::HopLimitExhausted);
        }

        let target = header.destination.address;
        let now = self.clock.now();
        let decision = {
            let table = self.table.read().await;
            if let Some(entry) = table.find_position(&target, now) {
                if entry
                    .position_vector
                    .timestamp
                    .is_newer_than(header.destination.timestamp)
                {
                    header.destination = entry.position_vector.to_short();
                }
            }
            let ctx = ForwardingContext {
                table: &table,
                local: self.local_point(),
                sender: Some(GeoPoint::from(&source)),
                traffic_class: packet.common.traffic_class,
                now,
            };
            let point = GeoPoint::new(header.destination.latitude, header.destination.longitude);
            self.engine.non_area(&ctx, point)
        };

        trace!("Forwarding unicast from {} to {}: {:?}", source.address, target, decision);
        let outgoing = Outgoing::new(&packet, Arc::clone(&self.link)).with_destination(target);
        self.dispatch(decision, outgoing).await?;
        Ok(ReceiveOutcome::Forward)
    }

    async fn receive_location_request(
        &self,
        packet: GnPacket,
        source: LongPositionVector,
    ) -> Result<ReceiveOutcome> {
        let requested = match &packet.extended {
            ExtendedHeader::LsRequest(header) => header.requested_address,
            _ => return Err(malformed(&packet)),
        };

        if requested == self.local_address() {
            self.send_location_reply(source).await?;
            return self.deliver(&packet, false);
        }

        if self.rebroadcast(&packet).await {
            Ok(ReceiveOutcome::Forward)
        } else {
            Err(RoutingError::HopLimitExhausted)
        }
    }

    async fn receive_area(
        &self,
        packet: GnPacket,
        source: LongPositionVector,
        anycast: bool,
    ) -> Result<ReceiveOutcome> {
        let area = match &packet.extended {
            ExtendedHeader::Area(header) => header.area,
            _ => return Err(malformed(&packet)),
        };

        let local = self.local_point();
        let inside = local.relative_to(&area).is_within();

        // Anycast stops at the first station inside the area
        if inside && anycast {
            return self.deliver(&packet, false);
        }
        if packet.basic.remaining_hop_limit == 0 {
            return if inside {
                self.deliver(&packet, false)
            } else {
                Err(RoutingError::HopLimitExhausted)
            };
        }

        let decision = self
            .route_into(
                local,
                Some(GeoPoint::from(&source)),
                packet.common.traffic_class,
                &area,
            )
            .await;

        let outgoing = Outgoing::new(&packet, Arc::clone(&self.link));
        let forwarded = self.dispatch(decision, outgoing).await;

        match (inside, forwarded) {
            (true, forwarded) => self.deliver(&packet, forwarded.is_ok()),
            (false, Ok(_)) => Ok(ReceiveOutcome::Forward),
            (false, Err(e)) => Err(e),
        }
    }
}
