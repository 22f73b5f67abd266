//! Decides whether a driver's pickup or drop claim is verified.
//!
//! A claim passes when a fresh GPS fix puts the driver inside the geofence
//! around the checkpoint target, or when the matching one-time code is
//! presented. Geofence is preferred; the OTP is only consumed when the
//! geofence check did not already pass.

use crate::config::LifecycleConfig;
use crate::error::RideError;
use crate::geo::{self, GeoPoint};
use crate::location::LocationFix;
use crate::otp::{IssuedOtp, OtpCheck, OtpIssue, OtpLedger};
use crate::types::TimeStamp;
use chrono::{Duration, Utc};
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    #[n(0)]
    Pickup,
    #[n(1)]
    Drop,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Pickup => "pickup",
            Checkpoint::Drop => "drop",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMethod {
    #[n(0)]
    None,
    #[n(1)]
    Geofence,
    #[n(2)]
    Otp,
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerificationMethod::None => "none",
            VerificationMethod::Geofence => "geofence",
            VerificationMethod::Otp => "otp",
        };
        f.write_str(name)
    }
}

/// Why the geofence half of a check did not pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationIssue {
    NoFix,
    StaleFix { age_secs: i64 },
    TooFar { distance_m: f64 },
}

impl fmt::Display for LocationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationIssue::NoFix => f.write_str("no location fix"),
            LocationIssue::StaleFix { age_secs } => write!(f, "location fix is {age_secs}s old"),
            LocationIssue::TooFar { distance_m } => {
                write!(f, "too far ({} m)", geo::round_meters(*distance_m))
            }
        }
    }
}

/// Both halves of a failed check, so callers can tell the driver what to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationFailure {
    pub location: LocationIssue,
    pub otp: OtpIssue,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.location, self.otp)
    }
}

/// What the verifier saw, kept for logging and for the stored proof.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointReading {
    pub checkpoint: Checkpoint,
    pub target: GeoPoint,
    pub driver: Option<GeoPoint>,
    pub distance_m: Option<f64>,
    pub radius_m: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub checkpoint: Checkpoint,
    pub method: VerificationMethod,
    pub success: bool,
    pub reason: Option<VerificationFailure>,
    pub reading: CheckpointReading,
}

impl VerificationResult {
    /// The error a rejected claim surfaces as.
    ///
    /// A submitted code that was turned down is reported as an OTP problem;
    /// everything else is a plain verification failure.
    pub fn to_error(&self) -> Option<RideError> {
        let reason = self.reason?;
        if reason.otp.is_rejection() {
            Some(RideError::OtpExpiredOrInvalid {
                checkpoint: self.checkpoint,
                issue: reason.otp,
            })
        } else {
            Some(RideError::VerificationFailed {
                checkpoint: self.checkpoint,
                reason,
            })
        }
    }
}

#[derive(Clone)]
pub struct CheckpointVerifier {
    otp: OtpLedger,
    radius_m: f64,
    max_fix_age: Duration,
}

impl CheckpointVerifier {
    pub fn new(otp: OtpLedger, config: &LifecycleConfig) -> Self {
        Self {
            otp,
            radius_m: config.geofence_radius_m,
            max_fix_age: config.max_fix_age,
        }
    }

    pub fn ledger(&self) -> &OtpLedger {
        &self.otp
    }

    pub fn issue_otp(
        &self,
        ride_id: &str,
        checkpoint: Checkpoint,
        now: TimeStamp<Utc>,
    ) -> Result<IssuedOtp, RideError> {
        self.otp.issue(ride_id, checkpoint, now)
    }

    fn check_location(
        &self,
        target: &GeoPoint,
        fix: Option<&LocationFix>,
        now: &TimeStamp<Utc>,
    ) -> (Option<f64>, Result<(), LocationIssue>) {
        let Some(fix) = fix else {
            return (None, Err(LocationIssue::NoFix));
        };
        let distance = fix.point.distance_to(target);

        // fixes stamped slightly ahead of our clock count as fresh
        let age = fix.age(now);
        if age > self.max_fix_age {
            return (
                Some(distance),
                Err(LocationIssue::StaleFix {
                    age_secs: age.num_seconds(),
                }),
            );
        }
        if !geo::within_radius(&fix.point, target, self.radius_m) {
            return (
                Some(distance),
                Err(LocationIssue::TooFar {
                    distance_m: distance,
                }),
            );
        }
        (Some(distance), Ok(()))
    }

    /// Verifies one checkpoint claim.
    ///
    /// Returns `Ok` with `success == false` for an ordinary rejection; `Err`
    /// is reserved for storage failures while reading the OTP ledger.
    pub fn verify(
        &self,
        ride_id: &str,
        checkpoint: Checkpoint,
        target: GeoPoint,
        fix: Option<&LocationFix>,
        otp_code: Option<&str>,
        now: &TimeStamp<Utc>,
    ) -> Result<VerificationResult, RideError> {
        let (distance_m, location) = self.check_location(&target, fix, now);
        let reading = CheckpointReading {
            checkpoint,
            target,
            driver: fix.map(|f| f.point),
            distance_m,
            radius_m: self.radius_m,
        };

        let location_issue = match location {
            Ok(()) => {
                tracing::debug!(ride_id, %checkpoint, ?distance_m, "geofence passed");
                return Ok(VerificationResult {
                    checkpoint,
                    method: VerificationMethod::Geofence,
                    success: true,
                    reason: None,
                    reading,
                });
            }
            Err(issue) => issue,
        };

        let otp_check = match otp_code {
            Some(code) => self.otp.consume(ride_id, checkpoint, code, now)?,
            None => OtpCheck::Rejected(self.otp.status(ride_id, checkpoint, now)?),
        };

        match otp_check {
            OtpCheck::Verified => {
                tracing::debug!(ride_id, %checkpoint, "otp accepted");
                Ok(VerificationResult {
                    checkpoint,
                    method: VerificationMethod::Otp,
                    success: true,
                    reason: None,
                    reading,
                })
            }
            OtpCheck::Rejected(otp) => {
                let reason = VerificationFailure {
                    location: location_issue,
                    otp,
                };
                tracing::info!(ride_id, %checkpoint, %reason, "checkpoint not verified");
                Ok(VerificationResult {
                    checkpoint,
                    method: VerificationMethod::None,
                    success: false,
                    reason: Some(reason),
                    reading,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::EARTH_RADIUS_M;
    use tempfile::tempdir;

    fn north_of(point: &GeoPoint, meters: f64) -> GeoPoint {
        GeoPoint::new(point.lat() + (meters / EARTH_RADIUS_M).to_degrees(), point.lon()).unwrap()
    }

    fn verifier() -> anyhow::Result<(tempfile::TempDir, CheckpointVerifier)> {
        let temp_dir = tempdir()?;
        let db = sled::open(temp_dir.path().join("verifier.db"))?;
        let config = LifecycleConfig::default();
        let ledger = OtpLedger::open(&db, &config)?;
        Ok((temp_dir, CheckpointVerifier::new(ledger, &config)))
    }

    #[test]
    fn geofence_pass_leaves_otp_untouched() -> anyhow::Result<()> {
        let (_dir, verifier) = verifier()?;
        let now = TimeStamp::new_with(2025, 3, 1, 9, 0, 0);
        let target = GeoPoint::new(12.9716, 77.5946)?;
        verifier
            .ledger()
            .issue_with_code("ride_a", Checkpoint::Pickup, "1234", now.clone())?;

        let fix = LocationFix::new(north_of(&target, 120.0), now.clone());
        let result = verifier.verify(
            "ride_a",
            Checkpoint::Pickup,
            target,
            Some(&fix),
            Some("1234"),
            &now,
        )?;

        assert!(result.success);
        assert_eq!(result.method, VerificationMethod::Geofence);
        assert!(!verifier.ledger().peek("ride_a", Checkpoint::Pickup)?.unwrap().consumed);
        Ok(())
    }

    #[test]
    fn far_driver_with_no_code() -> anyhow::Result<()> {
        let (_dir, verifier) = verifier()?;
        let now = TimeStamp::new_with(2025, 3, 1, 9, 0, 0);
        let target = GeoPoint::new(12.9716, 77.5946)?;
        let fix = LocationFix::new(north_of(&target, 812.0), now.clone());

        let result = verifier.verify("ride_a", Checkpoint::Drop, target, Some(&fix), None, &now)?;

        assert!(!result.success);
        let reason = result.reason.unwrap();
        assert_eq!(reason.otp, OtpIssue::NotRequested);
        assert!(matches!(reason.location, LocationIssue::TooFar { .. }));
        assert_eq!(reason.to_string(), "too far (812 m) / otp not requested");
        assert!(matches!(
            result.to_error(),
            Some(RideError::VerificationFailed { .. })
        ));
        Ok(())
    }

    #[test]
    fn stale_fix_falls_back_to_otp() -> anyhow::Result<()> {
        let (_dir, verifier) = verifier()?;
        let now = TimeStamp::new_with(2025, 3, 1, 9, 0, 0);
        let target = GeoPoint::new(12.9716, 77.5946)?;
        let fix = LocationFix::new(target, now.plus(-Duration::minutes(10)));
        verifier
            .ledger()
            .issue_with_code("ride_a", Checkpoint::Drop, "4821", now.clone())?;

        let wrong = verifier.verify(
            "ride_a",
            Checkpoint::Drop,
            target,
            Some(&fix),
            Some("0000"),
            &now,
        )?;
        assert!(matches!(
            wrong.to_error(),
            Some(RideError::OtpExpiredOrInvalid {
                issue: OtpIssue::Mismatch,
                ..
            })
        ));

        let right = verifier.verify(
            "ride_a",
            Checkpoint::Drop,
            target,
            Some(&fix),
            Some("4821"),
            &now,
        )?;
        assert!(right.success);
        assert_eq!(right.method, VerificationMethod::Otp);
        Ok(())
    }

    #[test]
    fn missing_fix_is_reported() -> anyhow::Result<()> {
        let (_dir, verifier) = verifier()?;
        let now = TimeStamp::new();
        let target = GeoPoint::new(0.0, 0.0)?;
        let result = verifier.verify("ride_a", Checkpoint::Pickup, target, None, None, &now)?;
        assert_eq!(result.reason.unwrap().location, LocationIssue::NoFix);
        assert!(result.reading.distance_m.is_none());
        Ok(())
    }
}
