//! Ride lifecycle core for a driver-to-driver taxi dispatch marketplace.
//!
//! A posted offer becomes a ride that moves from `pending` through
//! assignment, a verified pickup, the trip itself and a verified drop to
//! settlement. Pickup and drop are proven either by a fresh GPS fix inside a
//! geofence or by a one-time code. Rides are versioned records in sled and
//! every write is an optimistic compare-and-swap.

pub mod cancellation;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod location;
pub mod machine;
pub mod offer;
pub mod otp;
pub mod ride;
pub mod service;
pub mod settlement;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use error::{Guard, RideError, ValidationError};
pub use service::{Envelope, RideLifecycleService, SweepReport, TransitionOutcome};
