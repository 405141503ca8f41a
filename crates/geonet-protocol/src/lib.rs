//! GeoNetworking Protocol Module
//!
//! Wire format of the GeoNetworking router: addresses, position vectors,
//! the Basic and Common headers, the type-specific extended headers and
//! the packet lifetime codec. All multi-byte fields are big-endian; bit
//! packed fields are packed and unpacked explicitly.

pub mod error;
pub mod header;
pub mod lifetime;
pub mod packet;
pub mod position;
pub mod timestamp;
pub mod types;

pub use error::{ProtocolError, Result};
pub use header::{
    BasicHeader, BasicNextHeader, CommonHeader, CommonNextHeader, PacketType, TrafficClass,
    GN_PROTOCOL_VERSION,
};
pub use lifetime::Lifetime;
pub use packet::{
    AreaHeader, ExtendedHeader, GnPacket, LsRequestHeader, SingleHopHeader, TsbHeader,
    UnicastHeader,
};
pub use position::{AreaShape, GeoArea, LongPositionVector, ShortPositionVector};
pub use timestamp::{newer, Timestamp};
pub use types::{GnAddress, MacAddress, SequenceNumber, StationType};
