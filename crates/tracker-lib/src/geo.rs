//! Geodesy utilities
//!
//! Great-circle distance, degree/meter conversion and coordinate jitter.
//! Everything else in the crate measures distances through here.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula, in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (equirectangular approximation)
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// A WGS-84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to `other` in meters
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self.lat, self.lng, other.lat, other.lng)
    }

    /// Planar linear interpolation towards `other`; `frac` in [0, 1]
    pub fn lerp(&self, other: &GeoPoint, frac: f64) -> GeoPoint {
        GeoPoint {
            lat: self.lat + (other.lat - self.lat) * frac,
            lng: self.lng + (other.lng - self.lng) * frac,
        }
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// Haversine great-circle distance in meters
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Convert a north/south displacement in meters to degrees of latitude
pub fn meters_to_lat_deg(meters: f64) -> f64 {
    meters / METERS_PER_DEG_LAT
}

/// Convert an east/west displacement in meters to degrees of longitude at `lat`
pub fn meters_to_lng_deg(meters: f64, lat: f64) -> f64 {
    let cos = lat.to_radians().cos();
    // Poles: fall back to an unscaled divisor
    if cos.abs() < 1e-9 {
        meters
    } else {
        meters / (METERS_PER_DEG_LAT * cos)
    }
}

/// Displace `point` by up to `radius_m` on each axis, uniformly at random
pub fn jitter_point<R: Rng + ?Sized>(point: GeoPoint, radius_m: f64, rng: &mut R) -> GeoPoint {
    if radius_m <= 0.0 {
        return point;
    }

    let d_north = rng.gen_range(-radius_m..=radius_m);
    let d_east = rng.gen_range(-radius_m..=radius_m);

    GeoPoint {
        lat: point.lat + meters_to_lat_deg(d_north),
        lng: point.lng + meters_to_lng_deg(d_east, point.lat),
    }
}
