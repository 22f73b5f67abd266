//! Great-circle math for proximity checks.
//!
//! Distances are kept in meters as `f64` all the way through; rounding only
//! happens in [`round_meters`] when a value is shown to a person.

use crate::error::ValidationError;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct GeoPoint {
    #[n(0)]
    lat: f64,
    #[n(1)]
    lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        if !valid {
            return Err(ValidationError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }
    pub fn lat(&self) -> f64 {
        self.lat
    }
    pub fn lon(&self) -> f64 {
        self.lon
    }
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance_meters(self.lat, self.lon, other.lat, other.lon)
    }
    pub fn bearing_to(&self, other: &GeoPoint) -> f64 {
        bearing_degrees(self, other)
    }
}

/// Haversine distance between two coordinates, in meters.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    // clamp guards asin against a drifting a hair above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing from `from` towards `to`, clockwise from true north in [0, 360).
pub fn bearing_degrees(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let delta_lambda = (to.lon - from.lon).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

pub fn within_radius(current: &GeoPoint, target: &GeoPoint, radius_m: f64) -> bool {
    current.distance_to(target) <= radius_m
}

pub fn round_meters(meters: f64) -> u64 {
    meters.max(0.0).round() as u64
}
