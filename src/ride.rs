//! The ride record: status, fare snapshot, checkpoint proofs and its history chain
use crate::cancellation::{CancellationRecord, CancelledBy};
use crate::checkpoint::{Checkpoint, VerificationMethod};
use crate::offer::RideOffer;
use crate::settlement::Reconciliation;
use crate::types::TimeStamp;
use chrono::{Duration, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RideStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    DriverAssigned,
    #[n(2)]
    ReachedPickup,
    #[n(3)]
    InProgress,
    #[n(4)]
    Completed,
    #[n(5)]
    DriverRejected,
    #[n(6)]
    NoShow,
    #[n(7)]
    CancelledByCustomer,
    #[n(8)]
    CancelledByDriver,
    #[n(9)]
    CancelledByAdmin,
    #[n(10)]
    Failed,
}

impl RideStatus {
    pub const ALL: [RideStatus; 11] = [
        RideStatus::Pending,
        RideStatus::DriverAssigned,
        RideStatus::ReachedPickup,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::DriverRejected,
        RideStatus::NoShow,
        RideStatus::CancelledByCustomer,
        RideStatus::CancelledByDriver,
        RideStatus::CancelledByAdmin,
        RideStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::DriverAssigned => "driver-assigned",
            RideStatus::ReachedPickup => "reached-pickup",
            RideStatus::InProgress => "in-progress",
            RideStatus::Completed => "completed",
            RideStatus::DriverRejected => "driver-rejected",
            RideStatus::NoShow => "no-show",
            RideStatus::CancelledByCustomer => "cancelled-by-customer",
            RideStatus::CancelledByDriver => "cancelled-by-driver",
            RideStatus::CancelledByAdmin => "cancelled-by-admin",
            RideStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            RideStatus::Pending
                | RideStatus::DriverAssigned
                | RideStatus::ReachedPickup
                | RideStatus::InProgress
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown ride status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for RideStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RideStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Names what was attempted; recorded in history and in errors.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    #[n(0)]
    Assign,
    #[n(1)]
    Reject,
    #[n(2)]
    ClaimPickup,
    #[n(3)]
    StartTrip,
    #[n(4)]
    ClaimDrop,
    #[n(5)]
    Cancel,
    #[n(6)]
    NoShow,
    #[n(7)]
    Fail,
    #[n(8)]
    RecordPayment,
    #[n(9)]
    ReviseOffer,
    #[n(10)]
    IssueOtp,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Assign => "assign",
            ActionKind::Reject => "reject",
            ActionKind::ClaimPickup => "claim-pickup",
            ActionKind::StartTrip => "start-trip",
            ActionKind::ClaimDrop => "claim-drop",
            ActionKind::Cancel => "cancel",
            ActionKind::NoShow => "no-show",
            ActionKind::Fail => "fail",
            ActionKind::RecordPayment => "record-payment",
            ActionKind::ReviseOffer => "revise-offer",
            ActionKind::IssueOtp => "issue-otp",
        };
        f.write_str(name)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    #[n(0)]
    Driver(#[n(0)] String),
    #[n(1)]
    Customer(#[n(0)] String),
    #[n(2)]
    Admin(#[n(0)] String),
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Actor::Driver(id) | Actor::Customer(id) | Actor::Admin(id) => id,
        }
    }
    pub fn cancelled_by(&self) -> CancelledBy {
        match self {
            Actor::Driver(_) => CancelledBy::Driver,
            Actor::Customer(_) => CancelledBy::Customer,
            Actor::Admin(_) => CancelledBy::Admin,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Driver(id) => write!(f, "driver:{id}"),
            Actor::Customer(id) => write!(f, "customer:{id}"),
            Actor::Admin(id) => write!(f, "admin:{id}"),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    #[n(0)]
    Unpaid,
    #[n(1)]
    PartiallyPaid,
    #[n(2)]
    Paid,
    #[n(3)]
    Underpaid,
    #[n(4)]
    Refunded,
    #[n(5)]
    PartiallyRefunded,
    #[n(6)]
    Forfeited,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct VerificationRecord {
    #[n(0)]
    pub checkpoint: Checkpoint,
    #[n(1)]
    pub method: VerificationMethod,
    #[n(2)]
    pub at: TimeStamp<Utc>,
    #[n(3)]
    pub distance_m: Option<f64>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    #[n(0)]
    pub action: ActionKind,
    #[n(1)]
    pub from: RideStatus,
    #[n(2)]
    pub to: RideStatus,
    #[n(3)]
    pub actor: Option<Actor>, // None for system actions such as the no-show sweep
    #[n(4)]
    pub sent_at: TimeStamp<Utc>,
    #[n(5)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(6)]
    pub version: u64,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Ride {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub offer_hash: String, // sha256 of the CBOR encoded offer
    #[n(2)]
    pub posted_by: String,
    #[n(3)]
    pub status: RideStatus,
    #[n(4)]
    pub assigned_driver_id: Option<String>,
    #[n(5)]
    pub assigned_at: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub pickup_verification: Option<VerificationRecord>,
    #[n(7)]
    pub drop_verification: Option<VerificationRecord>,
    #[n(8)]
    pub trip_started_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub total_amount: u64,
    #[n(11)]
    pub commission_amount: u64,
    #[n(12)]
    pub driver_earning: u64,
    #[n(13)]
    pub partial_payment_amount: u64,
    #[n(14)]
    pub collected_amount: Option<u64>,
    #[n(15)]
    pub reconciliation: Option<Reconciliation>,
    #[n(16)]
    pub payment_status: PaymentStatus,
    #[n(17)]
    pub cancellation: Option<CancellationRecord>,
    #[n(18)]
    pub failure_reason: Option<String>,
    #[n(19)]
    pub offer_flagged: bool,
    #[n(20)]
    pub reoffered_from: Option<String>,
    #[n(21)]
    pub rejected_by: Vec<String>,
    #[n(22)]
    pub version: u64,
    #[n(23)]
    pub last_event_at: Option<TimeStamp<Utc>>,
    #[n(24)]
    pub created_at: TimeStamp<Utc>,
    #[n(25)]
    pub updated_at: TimeStamp<Utc>,
    #[n(26)]
    pub history: Vec<HistoryEntry>,
}

impl Ride {
    /// A fresh pending ride for a newly posted offer.
    pub fn open(id: String, offer_hash: String, offer: &RideOffer, now: TimeStamp<Utc>) -> Self {
        Self {
            id,
            offer_hash,
            posted_by: offer.posted_by().to_string(),
            status: RideStatus::Pending,
            assigned_driver_id: None,
            assigned_at: None,
            pickup_verification: None,
            drop_verification: None,
            trip_started_at: None,
            completed_at: None,
            total_amount: offer.total_amount(),
            commission_amount: offer.commission_amount(),
            driver_earning: offer.driver_earning(),
            partial_payment_amount: 0,
            collected_amount: None,
            reconciliation: None,
            payment_status: PaymentStatus::Unpaid,
            cancellation: None,
            failure_reason: None,
            offer_flagged: false,
            reoffered_from: None,
            rejected_by: vec![],
            version: 0,
            last_event_at: None,
            created_at: now.clone(),
            updated_at: now,
            history: vec![],
        }
    }

    /// Re-opens the offer of a rejected ride as a new pending ride.
    ///
    /// Fare snapshot, payments already taken and the rejecting drivers carry over.
    pub fn reoffer(rejected: &Ride, id: String, now: TimeStamp<Utc>) -> Self {
        Self {
            id,
            offer_hash: rejected.offer_hash.clone(),
            posted_by: rejected.posted_by.clone(),
            status: RideStatus::Pending,
            assigned_driver_id: None,
            assigned_at: None,
            pickup_verification: None,
            drop_verification: None,
            trip_started_at: None,
            completed_at: None,
            total_amount: rejected.total_amount,
            commission_amount: rejected.commission_amount,
            driver_earning: rejected.driver_earning,
            partial_payment_amount: rejected.partial_payment_amount,
            collected_amount: None,
            reconciliation: None,
            payment_status: rejected.payment_status,
            cancellation: None,
            failure_reason: None,
            offer_flagged: false,
            reoffered_from: Some(rejected.id.clone()),
            rejected_by: rejected.rejected_by.clone(),
            version: 0,
            last_event_at: None,
            created_at: now.clone(),
            updated_at: now,
            history: vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
    pub fn pickup_verified(&self) -> bool {
        self.pickup_verification.is_some()
    }
    pub fn drop_verified(&self) -> bool {
        self.drop_verification.is_some()
    }
    pub fn is_assigned_to(&self, driver_id: &str) -> bool {
        self.assigned_driver_id.as_deref() == Some(driver_id)
    }

    /// driver-assigned, unverified and past the grace window
    pub fn no_show_due(&self, now: &TimeStamp<Utc>, grace: Duration) -> bool {
        match (&self.status, &self.assigned_at) {
            (RideStatus::DriverAssigned, Some(assigned_at)) => {
                !self.pickup_verified() && now.since(assigned_at) > grace
            }
            _ => false,
        }
    }

    pub fn fare_balanced(&self) -> bool {
        self.driver_earning + self.commission_amount == self.total_amount
    }

    /// Statuses entered, in order, according to the history chain.
    pub fn status_trail(&self) -> Vec<RideStatus> {
        let mut trail = vec![RideStatus::Pending];
        for entry in &self.history {
            if entry.to != entry.from {
                trail.push(entry.to);
            }
        }
        trail
    }

    pub fn history_lines(&self) -> Vec<String> {
        self.history
            .iter()
            .map(|entry| {
                let actor = entry
                    .actor
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "system".to_string());
                format!(
                    "v{} {} {} -> {} by {} (sent {}, recorded {})",
                    entry.version,
                    entry.action,
                    entry.from,
                    entry.to,
                    actor,
                    entry.sent_at,
                    entry.recorded_at
                )
            })
            .collect()
    }

    pub fn view_history(&self) {
        for line in self.history_lines() {
            tracing::info!(ride_id = %self.id, "{line}");
        }
    }
}
