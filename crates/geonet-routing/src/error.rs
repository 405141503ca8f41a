//! Routing error types

use geonet_protocol::{GnAddress, ProtocolError, SequenceNumber};
use thiserror::Error;

/// Reasons a packet is dropped or a transmission rejected
///
/// None of these are fatal to the router; each affects a single packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Malformed packet: {0}")]
    MalformedPacket(#[from] ProtocolError),

    #[error("Duplicate packet {sequence_number} from {address}")]
    DuplicatePacket {
        address: GnAddress,
        sequence_number: SequenceNumber,
    },

    #[error("Hop limit exhausted")]
    HopLimitExhausted,

    #[error("Packet originated by this router")]
    OwnPacket,

    #[error("Secured packets are not supported")]
    UnsupportedSecurity,

    #[error("Sender already inside destination area")]
    SenderInsideArea,

    #[error("Queue overflow")]
    QueueOverflow,

    #[error("Location service timed out for {0}")]
    LocationServiceTimeout(GnAddress),

    #[error("Router is not running")]
    NotRunning,

    #[error("Router is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;
