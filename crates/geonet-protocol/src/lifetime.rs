//! Packet lifetime field of the Basic header
//!
//! The 8-bit field packs a 6-bit multiplier and a 2-bit time base:
//! `multiplier << 2 | base`, where the base selects 50 ms, 1 s, 10 s or 100 s.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time base unit in milliseconds, indexed by the 2-bit base field
const BASE_MILLIS: [u64; 4] = [50, 1_000, 10_000, 100_000];

/// Largest multiplier that fits in 6 bits
const MAX_MULTIPLIER: u64 = 0x3f;

/// Encoded packet lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Lifetime(u8);

impl Lifetime {
    /// Longest representable lifetime (63 x 100 s)
    pub const MAX_MILLIS: u64 = MAX_MULTIPLIER * 100_000;

    pub fn from_raw(raw: u8) -> Self {
        Lifetime(raw)
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    /// Encode a lifetime, choosing the representation closest to `millis`
    /// from below
    ///
    /// The encoded value never exceeds the input; values beyond
    /// [`Lifetime::MAX_MILLIS`] saturate.
    pub fn from_millis(millis: u64) -> Self {
        let mut best = (0u64, 0u8, 0u8);

        for (base, unit) in BASE_MILLIS.iter().enumerate() {
            let multiplier = (millis / unit).min(MAX_MULTIPLIER);
            let value = multiplier * unit;
            // Strictly greater keeps the finest base on ties
            if value > best.0 {
                best = (value, multiplier as u8, base as u8);
            }
        }

        Lifetime((best.1 << 2) | best.2)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self::from_millis(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn multiplier(&self) -> u8 {
        self.0 >> 2
    }

    pub fn base(&self) -> u8 {
        self.0 & 0x03
    }

    pub fn as_millis(&self) -> u64 {
        self.multiplier() as u64 * BASE_MILLIS[self.base() as usize]
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }
}
