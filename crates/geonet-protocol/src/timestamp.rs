//! 32-bit GeoNetworking timestamps
//!
//! Timestamps count milliseconds since 2004-01-01T00:00:00Z and wrap at
//! 2^32 (roughly every 49.7 days), so every ordering decision goes through
//! the wraparound-safe comparison in [`newer`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_FORWARD_DELTA: u32 = (1 << 31) - 1;

/// `true` when `a` is later than `b` under 32-bit wraparound
pub fn newer(a: u32, b: u32) -> bool {
    (a > b && a - b <= MAX_FORWARD_DELTA) || (b > a && b - a > MAX_FORWARD_DELTA)
}

/// Milliseconds since the ITS epoch, modulo 2^32
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u32);

impl Timestamp {
    /// The ITS epoch (2004-01-01 00:00:00 UTC)
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2004, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    /// Timestamp for the given wall-clock instant
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let millis = (at - Self::epoch()).num_milliseconds();
        Timestamp(millis.rem_euclid(1i64 << 32) as u32)
    }

    /// Timestamp for the current wall-clock time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn as_millis(&self) -> u32 {
        self.0
    }

    pub fn is_newer_than(&self, other: Timestamp) -> bool {
        newer(self.0, other.0)
    }

    /// Milliseconds from `earlier` to `self`, or 0 if `earlier` is not in the past
    pub fn millis_since(&self, earlier: Timestamp) -> u32 {
        if newer(self.0, earlier.0) {
            self.0.wrapping_sub(earlier.0)
        } else {
            0
        }
    }

    /// Timestamp `millis` later, wrapping at 2^32
    pub fn add_millis(&self, millis: u32) -> Self {
        Timestamp(self.0.wrapping_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
