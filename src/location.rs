//! Collaborators that know where drivers are and how far apart places are
use crate::error::ValidationError;
use crate::geo::{self, GeoPoint};
use crate::types::TimeStamp;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Average city speed used for straight-line ETA estimates.
const DEFAULT_SPEED_KMH: f64 = 25.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub point: GeoPoint,
    pub recorded_at: TimeStamp<Utc>,
}

impl LocationFix {
    pub fn new(point: GeoPoint, recorded_at: TimeStamp<Utc>) -> Self {
        Self { point, recorded_at }
    }
    /// Builds a fix the way devices report it: degrees plus epoch milliseconds.
    pub fn from_millis(lat: f64, lon: f64, timestamp_ms: i64) -> Result<Self, ValidationError> {
        let point = GeoPoint::new(lat, lon)?;
        let recorded_at = TimeStamp::from_millis(timestamp_ms)
            .ok_or(ValidationError::MissingField("fix timestamp"))?;
        Ok(Self { point, recorded_at })
    }
    pub fn age(&self, now: &TimeStamp<Utc>) -> Duration {
        now.since(&self.recorded_at)
    }
}

/// Queried once per claim; the core never subscribes to a stream.
pub trait LocationSource: Send + Sync {
    fn latest_fix(&self, driver_id: &str) -> Option<LocationFix>;
}

/// In-process location source holding the newest fix per driver.
#[derive(Debug, Default)]
pub struct FixBoard {
    fixes: RwLock<HashMap<String, LocationFix>>,
}

impl FixBoard {
    pub fn new() -> Self {
        Self::default()
    }
    /// Stores `fix` unless a newer one is already held.
    pub fn report(&self, driver_id: &str, fix: LocationFix) {
        let mut fixes = self.fixes.write().unwrap_or_else(|e| e.into_inner());
        match fixes.get(driver_id) {
            Some(held) if held.recorded_at > fix.recorded_at => {}
            _ => {
                fixes.insert(driver_id.to_string(), fix);
            }
        }
    }
    pub fn forget(&self, driver_id: &str) {
        let mut fixes = self.fixes.write().unwrap_or_else(|e| e.into_inner());
        fixes.remove(driver_id);
    }
}

impl LocationSource for FixBoard {
    fn latest_fix(&self, driver_id: &str) -> Option<LocationFix> {
        let fixes = self.fixes.read().unwrap_or_else(|e| e.into_inner());
        fixes.get(driver_id).cloned()
    }
}

/// Distance/ETA oracle. Road routing lives elsewhere; this is all the core asks of it.
pub trait RouteOracle: Send + Sync {
    fn distance_m(&self, from: &GeoPoint, to: &GeoPoint) -> f64;
    fn eta_seconds(&self, from: &GeoPoint, to: &GeoPoint) -> i64;
}

/// Straight-line oracle used when no routing service is wired in.
#[derive(Debug, Clone)]
pub struct GreatCircle {
    pub speed_kmh: f64,
}

impl Default for GreatCircle {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl RouteOracle for GreatCircle {
    fn distance_m(&self, from: &GeoPoint, to: &GeoPoint) -> f64 {
        geo::distance_meters(from.lat(), from.lon(), to.lat(), to.lon())
    }
    fn eta_seconds(&self, from: &GeoPoint, to: &GeoPoint) -> i64 {
        let hours = self.distance_m(from, to) / 1000.0 / self.speed_kmh;
        (hours * 3600.0).round() as i64
    }
}
