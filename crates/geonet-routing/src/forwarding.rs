//! Forwarding algorithm selection
//!
//! Pure decision logic: given the location table, our position and the
//! packet's destination, decide what to do with a packet. Acting on the
//! decision (sending, queueing, scheduling) is the router's job.

use crate::config::{AreaForwarding, NonAreaForwarding, RouterConfig};
use crate::error::RoutingError;
use geonet_location::{GeoPoint, LocationTable};
use geonet_protocol::{GeoArea, GnAddress, MacAddress, Timestamp, TrafficClass};
use std::time::Duration;
use tracing::debug;

/// What to do with a packet
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardingDecision {
    /// Link-layer unicast to a neighbor that makes progress
    Unicast { next_hop: GnAddress, mac: MacAddress },

    /// Link-layer broadcast now
    Broadcast,

    /// Park in the destination's unicast queue (store-carry-forward)
    Buffer,

    /// Park in the broadcast queue until a neighbor shows up
    BufferBroadcast,

    /// Contention: broadcast after the timeout unless someone else relays first
    Defer(Duration),

    Discard(RoutingError),
}

/// Inputs shared by every forwarding decision
#[derive(Debug, Clone, Copy)]
pub struct ForwardingContext<'a> {
    pub table: &'a LocationTable,

    /// Our position
    pub local: GeoPoint,

    /// Position of the packet's previous sender; `None` for packets we originate
    pub sender: Option<GeoPoint>,

    pub traffic_class: TrafficClass,

    pub now: Timestamp,
}

impl ForwardingContext<'_> {
    fn is_local_source(&self) -> bool {
        self.sender.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ForwardingEngine {
    non_area: NonAreaForwarding,
    area: AreaForwarding,
    cbf_min: Duration,
    cbf_max: Duration,
    max_range: f64,
}

impl ForwardingEngine {
    pub fn new(config: &RouterConfig) -> Self {
        ForwardingEngine {
            non_area: config.effective_non_area_forwarding(),
            area: config.effective_area_forwarding(),
            cbf_min: config.cbf_min_time(),
            cbf_max: config.cbf_max_time(),
            max_range: config.max_communication_range,
        }
    }

    pub fn non_area_algorithm(&self) -> NonAreaForwarding {
        self.non_area
    }

    pub fn area_algorithm(&self) -> AreaForwarding {
        self.area
    }

    /// Contention timeout for a given forwarding progress in meters
    ///
    /// Falls linearly from the max timer at zero progress to the min timer
    /// at the maximum communication range.
    pub fn cbf_timeout(&self, progress: f64) -> Duration {
        if progress <= 0.0 || !progress.is_finite() {
            return self.cbf_max;
        }
        if progress >= self.max_range {
            return self.cbf_min;
        }

        let min = self.cbf_min.as_secs_f64();
        let max = self.cbf_max.as_secs_f64();
        let timeout = max + (min - max) * progress / self.max_range;
        Duration::from_secs_f64(timeout.clamp(min, max))
    }

    /// Unicast / anycast forwarding toward a point
    pub fn non_area(&self, ctx: &ForwardingContext<'_>, destination: GeoPoint) -> ForwardingDecision {
        match self.non_area {
            NonAreaForwarding::Cbf => self.cbf(ctx, destination),
            NonAreaForwarding::Greedy | NonAreaForwarding::Unsupported => {
                self.greedy(ctx, destination)
            }
        }
    }

    /// Greedy: hand the packet to the neighbor closest to the destination
    pub fn greedy(&self, ctx: &ForwardingContext<'_>, destination: GeoPoint) -> ForwardingDecision {
        let mfr = ctx.local.distance_to(&destination);

        match ctx.table.find_nearest_neighbor(destination, ctx.now) {
            Some((entry, distance)) if distance < mfr => {
                debug!(
                    "Greedy: next hop {} ({:.1}m to destination, ours {:.1}m)",
                    entry.address, distance, mfr
                );
                ForwardingDecision::Unicast {
                    next_hop: entry.address,
                    mac: entry.address.mac(),
                }
            }
            nearest => {
                if ctx.traffic_class.store_carry_forward() {
                    ForwardingDecision::Buffer
                } else if nearest.is_none() {
                    ForwardingDecision::BufferBroadcast
                } else {
                    ForwardingDecision::Broadcast
                }
            }
        }
    }

    /// Contention-based: defer by a timer that shrinks with our progress
    pub fn cbf(&self, ctx: &ForwardingContext<'_>, destination: GeoPoint) -> ForwardingDecision {
        let sender = match ctx.sender {
            None => return ForwardingDecision::Broadcast,
            Some(sender) => sender,
        };

        let progress = sender.distance_to(&destination) - ctx.local.distance_to(&destination);
        ForwardingDecision::Defer(self.cbf_timeout(progress))
    }

    /// GeoBroadcast / GeoAnycast forwarding
    pub fn area(&self, ctx: &ForwardingContext<'_>, area: &GeoArea) -> ForwardingDecision {
        if ctx.local.relative_to(area).is_within() {
            return match self.area {
                AreaForwarding::Cbf if !ctx.is_local_source() => {
                    let to_edge = ctx.local.distance_to_boundary(area).max(0.0);
                    ForwardingDecision::Defer(self.cbf_timeout(self.max_range - to_edge))
                }
                _ => ForwardingDecision::Broadcast,
            };
        }

        // Outside the area: a sender already inside has covered it
        if let Some(sender) = ctx.sender {
            if sender.relative_to(area).is_within() {
                return ForwardingDecision::Discard(RoutingError::SenderInsideArea);
            }
        }

        self.non_area(ctx, GeoPoint::center_of(area))
    }
}
