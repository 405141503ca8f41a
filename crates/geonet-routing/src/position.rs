//! Local position source and router clock

use geonet_location::GeoPoint;
use geonet_protocol::{GnAddress, LongPositionVector, Timestamp};
use std::sync::RwLock;
use tokio::time::Instant;

/// A position fix reported by the positioning system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionFix {
    /// 1/10 micro-degree
    pub latitude: i32,
    /// 1/10 micro-degree
    pub longitude: i32,
    /// 0.01 m/s
    pub speed: i32,
    /// 0.1 degree
    pub heading: u16,
    pub timestamp: Timestamp,
    pub position_accurate: bool,
}

impl PositionFix {
    pub fn new(latitude: i32, longitude: i32) -> Self {
        PositionFix {
            latitude,
            longitude,
            position_accurate: true,
            ..Default::default()
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn to_position_vector(&self, address: GnAddress) -> LongPositionVector {
        LongPositionVector {
            address,
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            position_accurate: self.position_accurate,
            speed: LongPositionVector::clamp_speed(self.speed),
            heading: self.heading,
        }
    }
}

/// Polled source of the local position
pub trait PositionSource: Send + Sync {
    fn current_position(&self) -> PositionFix;
}

impl<F> PositionSource for F
where
    F: Fn() -> PositionFix + Send + Sync,
{
    fn current_position(&self) -> PositionFix {
        self()
    }
}

/// Position source holding a fix set by the application
///
/// Every read is stamped with the current time.
#[derive(Debug, Default)]
pub struct StaticPosition {
    fix: RwLock<PositionFix>,
}

impl StaticPosition {
    pub fn new(fix: PositionFix) -> Self {
        StaticPosition {
            fix: RwLock::new(fix),
        }
    }

    pub fn set(&self, fix: PositionFix) {
        match self.fix.write() {
            Ok(mut guard) => *guard = fix,
            Err(poisoned) => *poisoned.into_inner() = fix,
        }
    }
}

impl PositionSource for StaticPosition {
    fn current_position(&self) -> PositionFix {
        let fix = match self.fix.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        PositionFix {
            timestamp: Timestamp::now(),
            ..fix
        }
    }
}

/// Protocol clock: wall-clock timestamp at construction advanced by the runtime clock
#[derive(Debug, Clone, Copy)]
pub struct RouterClock {
    base: Timestamp,
    origin: Instant,
}

impl RouterClock {
    pub fn new() -> Self {
        RouterClock {
            base: Timestamp::now(),
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.base.add_millis(elapsed as u32)
    }
}

impl Default for RouterClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fix_to_position_vector_clamps_speed() {
        let fix = PositionFix {
            speed: 100_000,
            ..PositionFix::new(10, 20)
        };
        let lpv = fix.to_position_vector(GnAddress::default());

        assert_eq!(lpv.latitude, 10);
        assert_eq!(lpv.longitude, 20);
        assert_eq!(lpv.speed, geonet_protocol::position::MAX_SPEED);
        assert!(lpv.position_accurate);
    }

    #[test]
    fn test_static_position_update() {
        let source = StaticPosition::new(PositionFix::new(1, 2));
        source.set(PositionFix::new(3, 4));

        let fix = source.current_position();
        assert_eq!(fix.point(), GeoPoint::new(3, 4));
    }

    #[test]
    fn test_closure_source() {
        let source = || PositionFix::new(7, 8);
        assert_eq!(source.current_position().latitude, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_runtime_time() {
        let clock = RouterClock::new();
        let start = clock.now();

        tokio::time::advance(Duration::from_millis(1_500)).await;

        assert_eq!(clock.now().millis_since(start), 1_500);
    }
}
