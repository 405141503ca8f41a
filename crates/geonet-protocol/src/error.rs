//! Error types for header parsing and validation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Reasons a GeoNetworking packet is rejected as malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet too short: {actual} bytes (need {needed})")]
    TooShort { needed: usize, actual: usize },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid basic header next header: {0}")]
    InvalidBasicNextHeader(u8),

    #[error("Invalid common header next header: {0}")]
    InvalidCommonNextHeader(u8),

    #[error("Invalid header type: {0}")]
    InvalidHeaderType(u8),

    #[error("Invalid header subtype {subtype} for header type {header_type}")]
    InvalidHeaderSubtype { header_type: u8, subtype: u8 },

    #[error("Remaining hop limit {remaining} exceeds maximum hop limit {max}")]
    HopLimitMismatch { remaining: u8, max: u8 },

    #[error("Payload length {declared} exceeds available {available} bytes")]
    PayloadLengthMismatch { declared: usize, available: usize },

    #[error("Secured packets are not supported")]
    SecuredPacketUnsupported,

    #[error("Extended header does not match header type {0:?}")]
    HeaderMismatch(crate::header::PacketType),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
}
