//! Lifecycle configuration.
//!
//! Every threshold the lifecycle depends on (geofence radius, fix freshness,
//! OTP lifetime, no-show grace) is an input here rather than a constant in
//! the code paths that use it.

use chrono::Duration;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("otp digits must be between 4 and 8, got {0}")]
    OtpDigits(u32),
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Tolerance around a checkpoint target, in meters
    pub geofence_radius_m: f64,

    /// Oldest GPS fix still trusted for a geofence check
    pub max_fix_age: Duration,

    /// Lifetime of an issued one-time code
    pub otp_ttl: Duration,

    pub otp_digits: u32,

    /// Wrong submissions allowed before a code stops working
    pub otp_max_attempts: u32,

    /// How long an assigned driver may go without verifying pickup
    pub no_show_grace: Duration,

    pub db_path: PathBuf,

    pub log_level: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            geofence_radius_m: 500.0,
            max_fix_age: Duration::minutes(2),
            otp_ttl: Duration::minutes(5),
            otp_digits: 4,
            otp_max_attempts: 5,
            no_show_grace: Duration::minutes(15),
            db_path: PathBuf::from("ride-dispatch.db"),
            log_level: "info".to_string(),
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}

impl LifecycleConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            geofence_radius_m: parsed("RIDE_GEOFENCE_RADIUS_M")?
                .unwrap_or(defaults.geofence_radius_m),
            max_fix_age: parsed("RIDE_MAX_FIX_AGE_SECS")?
                .map(Duration::seconds)
                .unwrap_or(defaults.max_fix_age),
            otp_ttl: parsed("RIDE_OTP_TTL_SECS")?
                .map(Duration::seconds)
                .unwrap_or(defaults.otp_ttl),
            otp_digits: parsed("RIDE_OTP_DIGITS")?.unwrap_or(defaults.otp_digits),
            otp_max_attempts: parsed("RIDE_OTP_MAX_ATTEMPTS")?
                .unwrap_or(defaults.otp_max_attempts),
            no_show_grace: parsed("RIDE_NO_SHOW_GRACE_SECS")?
                .map(Duration::seconds)
                .unwrap_or(defaults.no_show_grace),
            db_path: env::var("RIDE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.geofence_radius_m.is_finite() && self.geofence_radius_m > 0.0) {
            return Err(ConfigError::NotPositive("geofence radius"));
        }
        if self.max_fix_age <= Duration::zero() {
            return Err(ConfigError::NotPositive("max fix age"));
        }
        if self.otp_ttl <= Duration::zero() {
            return Err(ConfigError::NotPositive("otp ttl"));
        }
        if self.no_show_grace <= Duration::zero() {
            return Err(ConfigError::NotPositive("no-show grace"));
        }
        if self.otp_max_attempts == 0 {
            return Err(ConfigError::NotPositive("otp max attempts"));
        }
        if !(4..=8).contains(&self.otp_digits) {
            return Err(ConfigError::OtpDigits(self.otp_digits));
        }
        Ok(())
    }
}
