//! GeoNetworking Router
//!
//! Geographic routing for vehicular ad-hoc networks:
//! - greedy and contention-based forwarding toward positions and areas
//! - location service address resolution with retransmission
//! - bounded, lifetime-aware packet queues
//! - background tasks tracked and joined on shutdown
//!
//! The radio and the positioning system are external: the router is given
//! a [`PositionSource`] to poll and a [`TransmitCallback`] to hand encoded
//! packets to, and is fed received frames through [`Router::receive`].

pub mod cbf;
pub mod config;
pub mod error;
pub mod forwarding;
pub mod link;
pub mod location_service;
pub mod logging;
pub mod position;
pub mod queue;
pub mod receive;
mod resolver;
pub mod router;
pub mod tasks;
pub mod transmit;

pub use config::{AreaForwarding, NonAreaForwarding, RouterConfig};
pub use error::{Result, RoutingError};
pub use forwarding::{ForwardingContext, ForwardingDecision, ForwardingEngine};
pub use link::{LinkDestination, TransmitCallback};
pub use location_service::PendingTransmission;
pub use position::{PositionFix, PositionSource, RouterClock, StaticPosition};
pub use queue::{PacketQueues, QueueElement, QueueKind};
pub use receive::{Indication, ReceiveOutcome};
pub use router::{Router, RouterStats};
pub use transmit::{Destination, TransmitOutcome, TransmitRequest};
