use crate::checkpoint::{Checkpoint, VerificationFailure};
use crate::otp::OtpIssue;
use crate::ride::{ActionKind, RideStatus};
use crate::types::TimeStamp;
use chrono::Utc;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("offer is missing {0}")]
    MissingField(&'static str),
    #[error("coordinate out of range: lat {lat}, lon {lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("total amount must be greater than zero")]
    ZeroTotal,
    #[error("commission {commission} exceeds total amount {total}")]
    CommissionExceedsTotal { total: u64, commission: u64 },
    #[error("all-inclusive and all-exclusive cannot both be set, nor combined with individual requirements")]
    ConflictingRequirements,
    #[error("notes exceed {max} characters (got {len})")]
    NotesTooLong { len: usize, max: usize },
}

/// The invariant that blocked an otherwise legal action.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    #[error("offer is no longer open for assignment")]
    OfferClosed,
    #[error("a driver cannot be assigned to their own offer")]
    SelfAssignment,
    #[error("driver {0} already rejected this offer")]
    PreviouslyRejected(String),
    #[error("driver {0} is not the assigned driver")]
    NotAssignedDriver(String),
    #[error("{0} is not a party to this ride")]
    NotAParty(String),
    #[error("pickup has not been verified")]
    PickupNotVerified,
    #[error("no-show grace period has not elapsed")]
    GraceNotElapsed,
    #[error("fare {total} is below commission {commission}")]
    FareBelowCommission { total: u64, commission: u64 },
    #[error("payment would exceed the fare: paid {paid}, fare {total}")]
    Overpayment { paid: u64, total: u64 },
    #[error("payment amount must be greater than zero")]
    ZeroPayment,
    #[error("offer can no longer be revised by this actor")]
    OfferLocked,
    #[error("verification is for {found}, expected {expected}")]
    CheckpointMismatch {
        expected: Checkpoint,
        found: Checkpoint,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum RideError {
    #[error("ride {0} not found")]
    NotFound(String),
    #[error("action `{action}` is not legal from status {from}")]
    InvalidTransition { from: RideStatus, action: ActionKind },
    #[error("ride {ride_id} changed concurrently: expected version {expected}, found {found}")]
    ConcurrentModification {
        ride_id: String,
        expected: u64,
        found: u64,
    },
    #[error("ride {ride_id} is already terminal ({status})")]
    AlreadyTerminal { ride_id: String, status: RideStatus },
    #[error("{checkpoint} verification failed: {reason}")]
    VerificationFailed {
        checkpoint: Checkpoint,
        reason: VerificationFailure,
    },
    #[error("{checkpoint} one-time code rejected: {issue}")]
    OtpExpiredOrInvalid {
        checkpoint: Checkpoint,
        issue: OtpIssue,
    },
    #[error("event sent at {sent_at} precedes last recorded event at {last_event_at}")]
    OutOfOrderEvent {
        sent_at: TimeStamp<Utc>,
        last_event_at: TimeStamp<Utc>,
    },
    #[error("guard failed: {0}")]
    GuardFailed(#[from] Guard),
    #[error("invalid offer: {0}")]
    InvalidOffer(#[from] ValidationError),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RideError {
    /// Whether the caller should reload and try again rather than give up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RideError::ConcurrentModification { .. } | RideError::StorageUnavailable(_)
        )
    }
}

impl From<sled::Error> for RideError {
    fn from(err: sled::Error) -> Self {
        RideError::StorageUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split() {
        let conflict = RideError::ConcurrentModification {
            ride_id: "r".into(),
            expected: 1,
            found: 2,
        };
        assert!(conflict.is_retryable());
        assert!(RideError::StorageUnavailable("down".into()).is_retryable());
        assert!(!RideError::GuardFailed(Guard::ZeroPayment).is_retryable());
        assert!(!RideError::NotFound("r".into()).is_retryable());
    }

    #[test]
    fn sled_errors_are_storage_outages() {
        let err: RideError = sled::Error::Unsupported("nope".into()).into();
        assert!(matches!(err, RideError::StorageUnavailable(_)));
    }
}
