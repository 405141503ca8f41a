//! Geodesic helpers for geographic forwarding
//!
//! Distances are great-circle (haversine) distances in meters. Angles can
//! be supplied in degrees, micro-degrees or the 1/10 micro-degree unit
//! used on the wire.

use geonet_protocol::{AreaShape, GeoArea, LongPositionVector};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Unit of latitude / longitude inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AngleUnit {
    Degrees,
    MicroDegrees,
    TenthMicroDegrees,
}

impl AngleUnit {
    fn degrees_per_unit(self) -> f64 {
        match self {
            AngleUnit::Degrees => 1.0,
            AngleUnit::MicroDegrees => 1e-6,
            AngleUnit::TenthMicroDegrees => 1e-7,
        }
    }

    pub fn to_degrees(self, value: f64) -> f64 {
        value * self.degrees_per_unit()
    }

    pub fn to_radians(self, value: f64) -> f64 {
        self.to_degrees(value).to_radians()
    }

    pub fn from_degrees(self, degrees: f64) -> f64 {
        degrees / self.degrees_per_unit()
    }
}

/// Great-circle distance in meters between two points
pub fn distance(lat1: f64, long1: f64, lat2: f64, long2: f64, unit: AngleUnit) -> f64 {
    let phi1 = unit.to_radians(lat1);
    let phi2 = unit.to_radians(lat2);
    let d_phi = unit.to_radians(lat2 - lat1);
    let d_lambda = unit.to_radians(long2 - long1);

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from point 1 to point 2, in degrees clockwise from north `[0, 360)`
pub fn bearing(lat1: f64, long1: f64, lat2: f64, long2: f64, unit: AngleUnit) -> f64 {
    let phi1 = unit.to_radians(lat1);
    let phi2 = unit.to_radians(lat2);
    let d_lambda = unit.to_radians(long2 - long1);

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Project an observer into the frame of a rotated area
///
/// The origin is the area center, `x` runs along the area azimuth
/// (`rotation`, degrees clockwise from north) and `y` perpendicular to it.
/// Returns `(x, y)` in meters.
pub fn cartesian_transform(
    observer_lat: f64,
    observer_long: f64,
    center_lat: f64,
    center_long: f64,
    rotation: f64,
    unit: AngleUnit,
) -> (f64, f64) {
    let d = distance(center_lat, center_long, observer_lat, observer_long, unit);
    if d == 0.0 {
        return (0.0, 0.0);
    }

    let theta = bearing(center_lat, center_long, observer_lat, observer_long, unit);
    let phi = (theta - rotation).to_radians();

    (d * phi.cos(), d * phi.sin())
}

/// Where a point lies relative to an area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelativePosition {
    Inside,
    OnBoundary,
    Outside,
}

impl RelativePosition {
    /// Inside or on the boundary
    pub fn is_within(&self) -> bool {
        !matches!(self, RelativePosition::Outside)
    }
}

/// Signed area function: positive inside, zero on the boundary, negative outside
///
/// - circle: `a² - (x² + y²)`
/// - rectangle: `min(a² - x², b² - y²)`
/// - ellipse: `a²b² - (b²x² + a²y²)`
pub fn area_function(x: f64, y: f64, a: f64, b: f64, shape: AreaShape) -> f64 {
    let (a2, b2, x2, y2) = (a * a, b * b, x * x, y * y);
    match shape {
        AreaShape::Circle => a2 - (x2 + y2),
        AreaShape::Rectangle => (a2 - x2).min(b2 - y2),
        AreaShape::Ellipse => a2 * b2 - (b2 * x2 + a2 * y2),
    }
}

pub fn relative_position(x: f64, y: f64, a: f64, b: f64, shape: AreaShape) -> RelativePosition {
    let f = area_function(x, y, a, b, shape);
    if f > 0.0 {
        RelativePosition::Inside
    } else if f == 0.0 {
        RelativePosition::OnBoundary
    } else {
        RelativePosition::Outside
    }
}

/// Distance from `(x, y)` to the area edge along the ray from the center
///
/// Positive inside, negative outside.
pub fn distance_to_boundary(x: f64, y: f64, a: f64, b: f64, shape: AreaShape) -> f64 {
    let r = x.hypot(y);
    let (cx, cy) = if r == 0.0 { (1.0, 0.0) } else { (x / r, y / r) };

    let edge = match shape {
        AreaShape::Circle => a,
        AreaShape::Ellipse => {
            if a == 0.0 || b == 0.0 {
                0.0
            } else {
                1.0 / ((cx * cx) / (a * a) + (cy * cy) / (b * b)).sqrt()
            }
        }
        AreaShape::Rectangle => {
            let along = if cx == 0.0 { f64::INFINITY } else { a / cx.abs() };
            let across = if cy == 0.0 { f64::INFINITY } else { b / cy.abs() };
            along.min(across)
        }
    };

    edge - r
}

/// A wire-unit geographic point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    /// 1/10 micro-degree
    pub latitude: i32,
    /// 1/10 micro-degree
    pub longitude: i32,
}

impl GeoPoint {
    pub fn new(latitude: i32, longitude: i32) -> Self {
        GeoPoint {
            latitude,
            longitude,
        }
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance(
            self.latitude as f64,
            self.longitude as f64,
            other.latitude as f64,
            other.longitude as f64,
            AngleUnit::TenthMicroDegrees,
        )
    }

    /// Position of this point in the frame of `area`
    pub fn area_coordinates(&self, area: &GeoArea) -> (f64, f64) {
        cartesian_transform(
            self.latitude as f64,
            self.longitude as f64,
            area.center_latitude as f64,
            area.center_longitude as f64,
            area.angle as f64,
            AngleUnit::TenthMicroDegrees,
        )
    }

    pub fn relative_to(&self, area: &GeoArea) -> RelativePosition {
        let (x, y) = self.area_coordinates(area);
        relative_position(
            x,
            y,
            area.distance_a as f64,
            area.distance_b as f64,
            area.shape,
        )
    }

    pub fn distance_to_boundary(&self, area: &GeoArea) -> f64 {
        let (x, y) = self.area_coordinates(area);
        distance_to_boundary(
            x,
            y,
            area.distance_a as f64,
            area.distance_b as f64,
            area.shape,
        )
    }

    /// Center of `area`
    pub fn center_of(area: &GeoArea) -> Self {
        GeoPoint::new(area.center_latitude, area.center_longitude)
    }
}

impl From<&LongPositionVector> for GeoPoint {
    fn from(lpv: &LongPositionVector) -> Self {
        GeoPoint::new(lpv.latitude, lpv.longitude)
    }
}
