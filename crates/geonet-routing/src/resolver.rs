//! Location service driver
//!
//! Starts lookups for unresolved destinations, emits requests and replies,
//! and runs the per-lookup retry loop until resolution, expiry or shutdown.

use crate::error::Result;
use crate::link::LinkDestination;
use crate::location_service::Lookup;
use crate::queue::QueueKind;
use crate::router::Shared;
use crate::transmit::{Outgoing, TransmitOutcome};
use geonet_location::GeoPoint;
use geonet_protocol::{
    CommonNextHeader, ExtendedHeader, GnAddress, Lifetime, LongPositionVector, LsRequestHeader,
    PacketType, TrafficClass, UnicastHeader,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

impl Shared {
    /// Start resolving `target` unless a lookup is already running
    ///
    /// Fails with `ShuttingDown` when the router stopped between the caller's
    /// running check and the lookup being registered. The lookup and the
    /// packets buffered for `target` are dropped in that case.
    pub(crate) async fn start_lookup(self: &Arc<Self>, target: GnAddress) -> Result<()> {
        let lookup = match self.location_service.begin(target) {
            Some(lookup) => lookup,
            None => return Ok(()),
        };

        // stop() may have already run abort_all and will not see this lookup
        if let Err(e) = self.check_running() {
            self.location_service.abort(&target).await;
            let flushed = self.queues.lock().await.flush(
                QueueKind::LocationService,
                Some(&target),
                true,
                Instant::now(),
            );
            debug!(
                "Router stopping, dropped lookup for {} and {} packet(s)",
                target, flushed.purged
            );
            return Err(e);
        }

        self.table
            .write()
            .await
            .insert_pending(target, self.clock.now());

        let shared = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        self.tasks
            .spawn(
                "location service",
                run_location_service(shared, lookup, shutdown),
            )
            .await;
        Ok(())
    }

    /// Broadcast a Location Service request for `target`
    pub(crate) async fn send_location_request(&self, target: GnAddress) -> Result<()> {
        let packet = self.build_packet(
            PacketType::LocationServiceRequest,
            ExtendedHeader::LsRequest(LsRequestHeader {
                sequence_number: self.next_sequence_number(),
                source: self.local_position_vector(),
                requested_address: target,
            }),
            Lifetime::from_duration(self.config.default_packet_lifetime()),
            self.config.default_hop_limit,
            CommonNextHeader::Any,
            TrafficClass::default(),
            Vec::new(),
        )?;

        (self.link)(LinkDestination::Broadcast, &packet.encode());
        self.count(|stats| {
            stats.ls_requests_sent += 1;
            stats.packets_sent += 1;
        })
        .await;
        Ok(())
    }

    /// Answer a Location Service request addressed to us
    pub(crate) async fn send_location_reply(&self, requester: LongPositionVector) -> Result<TransmitOutcome> {
        let source = self.local_position_vector();
        let packet = self.build_packet(
            PacketType::LocationServiceReply,
            ExtendedHeader::Unicast(UnicastHeader {
                sequence_number: self.next_sequence_number(),
                source,
                destination: requester.to_short(),
            }),
            Lifetime::from_duration(self.config.default_packet_lifetime()),
            self.config.default_hop_limit,
            CommonNextHeader::Any,
            TrafficClass::default(),
            Vec::new(),
        )?;

        let decision = self
            .route_toward(
                GeoPoint::from(&source),
                None,
                TrafficClass::default(),
                GeoPoint::from(&requester),
            )
            .await;

        debug!("Answering location service request from {}", requester.address);
        let outgoing = Outgoing::new(&packet, Arc::clone(&self.link)).with_destination(requester.address);
        self.dispatch(decision, outgoing).await
    }

    /// Give up on `target`: fail waiters, purge its queue, drop the placeholder
    async fn expire_lookup(&self, target: GnAddress) {
        if !self.location_service.expire(&target).await {
            return;
        }

        let flushed = self.queues.lock().await.flush(
            QueueKind::LocationService,
            Some(&target),
            true,
            Instant::now(),
        );
        self.table.write().await.cancel_pending(&target);

        warn!(
            "Location service for {} timed out, discarded {} packet(s)",
            target, flushed.purged
        );
        self.count(|stats| {
            stats.ls_expired += 1;
            stats.packets_dropped += flushed.purged as u64;
        })
        .await;
    }
}

/// Retry loop of one lookup
///
/// Sends up to `location_service_max_retrans` requests spaced by the
/// retransmit timer, stopping early on resolution or shutdown.
async fn run_location_service(
    shared: Arc<Shared>,
    lookup: Arc<Lookup>,
    mut shutdown: watch::Receiver<bool>,
) {
    let target = lookup.target();
    let retransmit = shared.config.location_service_retransmit();
    let max_retrans = shared.config.location_service_max_retrans;

    while lookup.requests_sent() < max_retrans {
        if lookup.is_complete() || *shutdown.borrow() {
            return;
        }

        if let Err(e) = shared.send_location_request(target).await {
            warn!("Location service request for {} failed: {}", target, e);
        }
        let attempt = lookup.record_request();
        debug!(
            "Location service request {}/{} for {}",
            attempt, max_retrans, target
        );

        tokio::select! {
            _ = tokio::time::sleep(retransmit) => {}
            _ = lookup.notified() => {}
            _ = shutdown.changed() => return,
        }
    }

    if lookup.is_complete() || *shutdown.borrow() {
        return;
    }
    shared.expire_lookup(target).await;
}
