//! GeoNetworking location table and geodesy
//!
//! Keeps the last known position vector of every station heard from,
//! ages entries out after a configurable lifetime, detects duplicate
//! packets per source and answers nearest-neighbor queries used by
//! greedy forwarding.

pub mod duplicate;
pub mod entry;
pub mod geo;
pub mod table;

pub use duplicate::{DuplicatePacketList, DPL_CAPACITY};
pub use entry::{LocationTableEntry, MAX_CLOCK_SKEW_MILLIS};
pub use geo::{
    area_function, bearing, cartesian_transform, distance, distance_to_boundary,
    relative_position, AngleUnit, GeoPoint, RelativePosition, EARTH_RADIUS_M,
};
pub use table::{LocationTable, SequenceCheck, TableUpdate};
