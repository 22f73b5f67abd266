//! The ride state machine.
//!
//! `apply` is a pure function of the current ride, an action and the
//! transition context: it performs no I/O, so a caller that lost a
//! compare-and-swap can reload and run it again safely. Every legal action
//! bumps the version by exactly one and appends a history entry.

use crate::cancellation::{self, CancellationLedger, CancellationOutcome, FeePolicy};
use crate::checkpoint::{
    Checkpoint, LocationIssue, VerificationFailure, VerificationMethod, VerificationResult,
};
use crate::error::{Guard, RideError};
use crate::otp::OtpIssue;
use crate::ride::{
    ActionKind, Actor, HistoryEntry, PaymentStatus, Ride, RideStatus, VerificationRecord,
};
use crate::settlement::{self, SettlementResult};
use crate::types::TimeStamp;
use chrono::{Duration, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Assign {
        driver_id: String,
    },
    Reject {
        driver_id: String,
    },
    ClaimPickup {
        driver_id: String,
        verification: VerificationResult,
    },
    StartTrip {
        driver_id: String,
    },
    ClaimDrop {
        driver_id: String,
        verification: VerificationResult,
        collected_amount: u64,
        final_total: Option<u64>,
    },
    Cancel {
        actor: Actor,
        reason: String,
    },
    NoShow,
    Fail {
        actor: Actor,
        reason: String,
    },
    RecordPartialPayment {
        actor: Actor,
        amount: u64,
    },
    ReviseOffer {
        actor: Actor,
        offer_hash: String,
        total_amount: u64,
        commission_amount: u64,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Assign { .. } => ActionKind::Assign,
            Action::Reject { .. } => ActionKind::Reject,
            Action::ClaimPickup { .. } => ActionKind::ClaimPickup,
            Action::StartTrip { .. } => ActionKind::StartTrip,
            Action::ClaimDrop { .. } => ActionKind::ClaimDrop,
            Action::Cancel { .. } => ActionKind::Cancel,
            Action::NoShow => ActionKind::NoShow,
            Action::Fail { .. } => ActionKind::Fail,
            Action::RecordPartialPayment { .. } => ActionKind::RecordPayment,
            Action::ReviseOffer { .. } => ActionKind::ReviseOffer,
        }
    }

    /// Who asked for it; `None` for the no-show sweep.
    pub fn actor(&self) -> Option<Actor> {
        match self {
            Action::Assign { driver_id }
            | Action::Reject { driver_id }
            | Action::ClaimPickup { driver_id, .. }
            | Action::StartTrip { driver_id }
            | Action::ClaimDrop { driver_id, .. } => Some(Actor::Driver(driver_id.clone())),
            Action::Cancel { actor, .. }
            | Action::Fail { actor, .. }
            | Action::RecordPartialPayment { actor, .. }
            | Action::ReviseOffer { actor, .. } => Some(actor.clone()),
            Action::NoShow => None,
        }
    }

    /// Client events carry a device timestamp that must not run backwards.
    pub fn is_client_event(&self) -> bool {
        !matches!(self, Action::NoShow)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    StatusChanged {
        from: RideStatus,
        to: RideStatus,
    },
    NotifyAssignment {
        owner: String,
        assignee: String,
    },
    ReopenOffer {
        offer_hash: String,
        rejected_by: Vec<String>,
    },
    /// Added by the service once the replacement ride is stored.
    Reoffered {
        ride_id: String,
    },
    ReleaseDriver {
        driver_id: String,
    },
    CheckpointVerified {
        checkpoint: Checkpoint,
        method: VerificationMethod,
    },
    FareClockStarted {
        at: TimeStamp<Utc>,
    },
    Settled(SettlementResult),
    CancellationRecorded(CancellationOutcome),
    FlagOffer {
        offer_hash: String,
    },
    PaymentRecorded {
        amount: u64,
        partial_total: u64,
    },
    OfferRevised {
        offer_hash: String,
    },
}

pub struct TransitionContext<'a> {
    pub now: TimeStamp<Utc>,
    pub sent_at: TimeStamp<Utc>,
    pub no_show_grace: Duration,
    pub fee_policy: &'a dyn FeePolicy,
    /// Distance driven since pickup, used to price a cancellation
    pub distance_covered_m: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub ride: Ride,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    pub fn status_change(&self) -> Option<(RideStatus, RideStatus)> {
        self.effects.iter().find_map(|effect| match effect {
            SideEffect::StatusChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
    }
}

/// Whether `kind` is ever legal from `status`, before any guard is consulted.
pub fn admits(status: RideStatus, kind: ActionKind) -> bool {
    if status.is_terminal() {
        return false;
    }
    match kind {
        ActionKind::Assign => status == RideStatus::Pending,
        ActionKind::Reject | ActionKind::ClaimPickup | ActionKind::NoShow => {
            status == RideStatus::DriverAssigned
        }
        ActionKind::StartTrip => status == RideStatus::ReachedPickup,
        ActionKind::ClaimDrop => status == RideStatus::InProgress,
        ActionKind::IssueOtp => {
            matches!(status, RideStatus::DriverAssigned | RideStatus::InProgress)
        }
        ActionKind::Cancel
        | ActionKind::Fail
        | ActionKind::RecordPayment
        | ActionKind::ReviseOffer => true,
    }
}

fn check_ordering(ride: &Ride, sent_at: &TimeStamp<Utc>) -> Result<(), RideError> {
    match &ride.last_event_at {
        Some(last) if sent_at < last => Err(RideError::OutOfOrderEvent {
            sent_at: sent_at.clone(),
            last_event_at: last.clone(),
        }),
        _ => Ok(()),
    }
}

fn require_assignee(ride: &Ride, driver_id: &str) -> Result<(), Guard> {
    if ride.is_assigned_to(driver_id) {
        Ok(())
    } else {
        Err(Guard::NotAssignedDriver(driver_id.to_string()))
    }
}

/// The checks `apply` would run before looking at the action payload.
///
/// Used ahead of checkpoint verification so a doomed claim never consumes
/// a one-time code.
pub fn precheck(
    ride: &Ride,
    kind: ActionKind,
    driver_id: Option<&str>,
    sent_at: Option<&TimeStamp<Utc>>,
) -> Result<(), RideError> {
    if ride.is_terminal() {
        return Err(RideError::AlreadyTerminal {
            ride_id: ride.id.clone(),
            status: ride.status,
        });
    }
    if let Some(sent_at) = sent_at {
        check_ordering(ride, sent_at)?;
    }
    if !admits(ride.status, kind) {
        return Err(RideError::InvalidTransition {
            from: ride.status,
            action: kind,
        });
    }
    if let Some(driver_id) = driver_id {
        require_assignee(ride, driver_id)?;
    }
    Ok(())
}

/// Fare guard for a drop claim; holds whatever the verification outcome.
pub fn check_drop_fare(ride: &Ride, final_total: Option<u64>) -> Result<(), Guard> {
    let total = final_total.unwrap_or(ride.total_amount);
    if total < ride.commission_amount {
        return Err(Guard::FareBelowCommission {
            total,
            commission: ride.commission_amount,
        });
    }
    Ok(())
}

fn verified(
    verification: &VerificationResult,
    expected: Checkpoint,
    now: &TimeStamp<Utc>,
) -> Result<VerificationRecord, RideError> {
    if verification.checkpoint != expected {
        return Err(Guard::CheckpointMismatch {
            expected,
            found: verification.checkpoint,
        }
        .into());
    }
    if !verification.success {
        return Err(verification
            .to_error()
            .unwrap_or(RideError::VerificationFailed {
                checkpoint: expected,
                reason: VerificationFailure {
                    location: LocationIssue::NoFix,
                    otp: OtpIssue::NotSubmitted,
                },
            }));
    }
    Ok(VerificationRecord {
        checkpoint: expected,
        method: verification.method,
        at: now.clone(),
        distance_m: verification.reading.distance_m,
    })
}

fn release(ride: &Ride, effects: &mut Vec<SideEffect>) {
    if let Some(driver_id) = &ride.assigned_driver_id {
        effects.push(SideEffect::ReleaseDriver {
            driver_id: driver_id.clone(),
        });
    }
}

/// Applies `action` to `ride`, returning the next ride and what should follow from it.
pub fn apply(
    ride: &Ride,
    action: Action,
    ctx: &TransitionContext<'_>,
) -> Result<Transition, RideError> {
    let kind = action.kind();
    let actor = action.actor();

    if ride.is_terminal() {
        return Err(RideError::AlreadyTerminal {
            ride_id: ride.id.clone(),
            status: ride.status,
        });
    }
    if action.is_client_event() {
        check_ordering(ride, &ctx.sent_at)?;
    }
    if !admits(ride.status, kind) {
        return Err(RideError::InvalidTransition {
            from: ride.status,
            action: kind,
        });
    }

    let now = &ctx.now;
    let mut next = ride.clone();
    let mut effects = vec![];

    match action {
        Action::Assign { driver_id } => {
            if ride.offer_flagged {
                return Err(Guard::OfferClosed.into());
            }
            if driver_id == ride.posted_by {
                return Err(Guard::SelfAssignment.into());
            }
            if ride.rejected_by.contains(&driver_id) {
                return Err(Guard::PreviouslyRejected(driver_id).into());
            }
            next.status = RideStatus::DriverAssigned;
            next.assigned_at = Some(now.clone());
            next.assigned_driver_id = Some(driver_id.clone());
            effects.push(SideEffect::NotifyAssignment {
                owner: ride.posted_by.clone(),
                assignee: driver_id,
            });
        }

        Action::Reject { driver_id } => {
            require_assignee(ride, &driver_id)?;
            next.status = RideStatus::DriverRejected;
            next.rejected_by.push(driver_id.clone());
            effects.push(SideEffect::ReopenOffer {
                offer_hash: ride.offer_hash.clone(),
                rejected_by: next.rejected_by.clone(),
            });
            effects.push(SideEffect::ReleaseDriver { driver_id });
        }

        Action::ClaimPickup {
            driver_id,
            verification,
        } => {
            require_assignee(ride, &driver_id)?;
            let record = verified(&verification, Checkpoint::Pickup, now)?;
            effects.push(SideEffect::CheckpointVerified {
                checkpoint: Checkpoint::Pickup,
                method: record.method,
            });
            next.pickup_verification = Some(record);
            next.status = RideStatus::ReachedPickup;
        }

        Action::StartTrip { driver_id } => {
            require_assignee(ride, &driver_id)?;
            if !ride.pickup_verified() {
                return Err(Guard::PickupNotVerified.into());
            }
            next.status = RideStatus::InProgress;
            next.trip_started_at = Some(now.clone());
            effects.push(SideEffect::FareClockStarted { at: now.clone() });
        }

        Action::ClaimDrop {
            driver_id,
            verification,
            collected_amount,
            final_total,
        } => {
            require_assignee(ride, &driver_id)?;
            check_drop_fare(ride, final_total)?;
            let record = verified(&verification, Checkpoint::Drop, now)?;
            let settled = settlement::settle(
                final_total.unwrap_or(ride.total_amount),
                ride.commission_amount,
                ride.partial_payment_amount,
                collected_amount,
            )?;

            effects.push(SideEffect::CheckpointVerified {
                checkpoint: Checkpoint::Drop,
                method: record.method,
            });
            effects.push(SideEffect::Settled(settled));
            effects.push(SideEffect::ReleaseDriver { driver_id });

            next.drop_verification = Some(record);
            next.total_amount = settled.total_amount;
            next.driver_earning = settled.driver_earning;
            next.collected_amount = Some(settled.collected_amount);
            next.reconciliation = Some(settled.reconciliation);
            next.payment_status = settled.payment_status();
            next.completed_at = Some(now.clone());
            next.status = RideStatus::Completed;
        }

        Action::Cancel { actor, reason } => {
            if let Actor::Driver(id) = &actor {
                if !ride.is_assigned_to(id) && *id != ride.posted_by {
                    return Err(Guard::NotAParty(actor.to_string()).into());
                }
            }
            let (record, outcome) = CancellationLedger::cancel(
                ride,
                &actor,
                &reason,
                ctx.fee_policy,
                now,
                ctx.distance_covered_m,
            )?;
            next.status = record.by.terminal_status();
            next.payment_status = cancellation::payment_status_after_refund(
                ride.payment_status,
                ride.partial_payment_amount,
                outcome.refund_amount,
            );
            next.cancellation = Some(record);
            effects.push(SideEffect::CancellationRecorded(outcome));
            release(ride, &mut effects);
        }

        Action::NoShow => {
            if ride.pickup_verified() || !ride.no_show_due(now, ctx.no_show_grace) {
                return Err(Guard::GraceNotElapsed.into());
            }
            next.status = RideStatus::NoShow;
            next.offer_flagged = true;
            release(ride, &mut effects);
            effects.push(SideEffect::FlagOffer {
                offer_hash: ride.offer_hash.clone(),
            });
        }

        Action::Fail { actor, reason } => {
            match &actor {
                Actor::Customer(_) => return Err(Guard::NotAParty(actor.to_string()).into()),
                Actor::Driver(id) if !ride.is_assigned_to(id) && *id != ride.posted_by => {
                    return Err(Guard::NotAParty(actor.to_string()).into());
                }
                _ => {}
            }
            next.status = RideStatus::Failed;
            next.failure_reason = Some(reason);
            release(ride, &mut effects);
        }

        Action::RecordPartialPayment { amount, .. } => {
            if amount == 0 {
                return Err(Guard::ZeroPayment.into());
            }
            let paid = ride
                .partial_payment_amount
                .checked_add(amount)
                .filter(|paid| *paid <= ride.total_amount)
                .ok_or(Guard::Overpayment {
                    paid: ride.partial_payment_amount.saturating_add(amount),
                    total: ride.total_amount,
                })?;
            next.partial_payment_amount = paid;
            next.payment_status = if paid == ride.total_amount {
                PaymentStatus::Paid
            } else {
                PaymentStatus::PartiallyPaid
            };
            effects.push(SideEffect::PaymentRecorded {
                amount,
                partial_total: paid,
            });
        }

        Action::ReviseOffer {
            actor,
            offer_hash,
            total_amount,
            commission_amount,
        } => {
            match &actor {
                Actor::Admin(_) => {}
                Actor::Driver(id) if *id == ride.posted_by => {
                    if ride.status != RideStatus::Pending {
                        return Err(Guard::OfferLocked.into());
                    }
                }
                Actor::Driver(_) => return Err(Guard::NotAParty(actor.to_string()).into()),
                Actor::Customer(_) => return Err(Guard::OfferLocked.into()),
            }
            if commission_amount > total_amount {
                return Err(Guard::FareBelowCommission {
                    total: total_amount,
                    commission: commission_amount,
                }
                .into());
            }
            if ride.partial_payment_amount > total_amount {
                return Err(Guard::Overpayment {
                    paid: ride.partial_payment_amount,
                    total: total_amount,
                }
                .into());
            }
            next.offer_hash = offer_hash.clone();
            next.total_amount = total_amount;
            next.commission_amount = commission_amount;
            next.driver_earning = total_amount - commission_amount;
            effects.push(SideEffect::OfferRevised { offer_hash });
        }
    }

    next.version = ride.version + 1;
    next.updated_at = now.clone();
    let event_at = if kind == ActionKind::NoShow {
        now
    } else {
        &ctx.sent_at
    };
    next.last_event_at = match &ride.last_event_at {
        Some(last) if last > event_at => Some(last.clone()),
        _ => Some(event_at.clone()),
    };
    next.history.push(HistoryEntry {
        action: kind,
        from: ride.status,
        to: next.status,
        actor,
        sent_at: ctx.sent_at.clone(),
        recorded_at: now.clone(),
        version: next.version,
    });

    if next.status != ride.status {
        effects.insert(
            0,
            SideEffect::StatusChanged {
                from: ride.status,
                to: next.status,
            },
        );
    }

    Ok(Transition { ride: next, effects })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::{FlatFee, NoFee};
    use crate::checkpoint::CheckpointReading;
    use crate::geo::GeoPoint;
    use crate::offer::{AcceptMode, OfferDraft, PaymentMethod, TripType, VehicleType};

    fn start() -> TimeStamp<Utc> {
        TimeStamp::new_with(2025, 6, 1, 10, 0, 0)
    }

    fn pending() -> Ride {
        let offer = OfferDraft::new()
            .posted_by("drv_poster")
            .set_trip_type(TripType::OneWay)
            .set_vehicle_type(VehicleType::Hatchback)
            .set_pickup("Karol Bagh", 28.6519, 77.1909)
            .set_drop("Noida Sector 18", 28.5708, 77.3261)
            .set_pickup_at(start())
            .set_total_amount(2_000)
            .set_commission_amount(300)
            .set_accept_mode(AcceptMode::Instant)
            .set_payment_method(PaymentMethod::Upi)
            .finalise()
            .unwrap();
        Ride::open("ride_t".into(), "offer_hash".into(), &offer, start())
    }

    fn ctx(minutes: i64) -> TransitionContext<'static> {
        let at = start().plus(Duration::minutes(minutes));
        TransitionContext {
            now: at.clone(),
            sent_at: at,
            no_show_grace: Duration::minutes(15),
            fee_policy: &NoFee,
            distance_covered_m: 0.0,
        }
    }

    fn passed(checkpoint: Checkpoint, method: VerificationMethod) -> VerificationResult {
        VerificationResult {
            checkpoint,
            method,
            success: true,
            reason: None,
            reading: CheckpointReading {
                checkpoint,
                target: GeoPoint::new(28.6519, 77.1909).unwrap(),
                driver: None,
                distance_m: Some(120.0),
                radius_m: 500.0,
            },
        }
    }

    fn step(ride: &Ride, action: Action, minutes: i64) -> Ride {
        apply(ride, action, &ctx(minutes)).unwrap().ride
    }

    fn assigned() -> Ride {
        step(
            &pending(),
            Action::Assign {
                driver_id: "drv_a".into(),
            },
            1,
        )
    }

    fn in_progress() -> Ride {
        let ride = step(
            &assigned(),
            Action::ClaimPickup {
                driver_id: "drv_a".into(),
                verification: passed(Checkpoint::Pickup, VerificationMethod::Geofence),
            },
            5,
        );
        step(
            &ride,
            Action::StartTrip {
                driver_id: "drv_a".into(),
            },
            6,
        )
    }

    #[test]
    fn happy_path_bumps_version_each_step() {
        let ride = in_progress();
        assert_eq!(ride.version, 3);

        let transition = apply(
            &ride,
            Action::ClaimDrop {
                driver_id: "drv_a".into(),
                verification: passed(Checkpoint::Drop, VerificationMethod::Otp),
                collected_amount: 2_000,
                final_total: None,
            },
            &ctx(40),
        )
        .unwrap();

        let done = transition.ride;
        assert_eq!(done.status, RideStatus::Completed);
        assert_eq!(done.version, 4);
        assert_eq!(done.payment_status, PaymentStatus::Paid);
        assert!(done.fare_balanced());
        assert_eq!(
            done.status_trail(),
            vec![
                RideStatus::Pending,
                RideStatus::DriverAssigned,
                RideStatus::ReachedPickup,
                RideStatus::InProgress,
                RideStatus::Completed
            ]
        );
        assert_eq!(
            transition.effects[0],
            SideEffect::StatusChanged {
                from: RideStatus::InProgress,
                to: RideStatus::Completed
            }
        );
    }

    #[test]
    fn drop_cannot_skip_pickup() {
        let err = apply(
            &assigned(),
            Action::ClaimDrop {
                driver_id: "drv_a".into(),
                verification: passed(Checkpoint::Drop, VerificationMethod::Geofence),
                collected_amount: 2_000,
                final_total: None,
            },
            &ctx(3),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RideError::InvalidTransition {
                from: RideStatus::DriverAssigned,
                action: ActionKind::ClaimDrop
            }
        ));
    }

    #[test]
    fn assignment_guards() {
        let ride = pending();
        let err = apply(
            &ride,
            Action::Assign {
                driver_id: "drv_poster".into(),
            },
            &ctx(1),
        )
        .unwrap_err();
        assert!(matches!(err, RideError::GuardFailed(Guard::SelfAssignment)));

        let mut reoffered = pending();
        reoffered.rejected_by.push("drv_b".into());
        let err = apply(
            &reoffered,
            Action::Assign {
                driver_id: "drv_b".into(),
            },
            &ctx(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RideError::GuardFailed(Guard::PreviouslyRejected(_))
        ));
    }

    #[test]
    fn only_the_assignee_claims() {
        let err = apply(
            &assigned(),
            Action::ClaimPickup {
                driver_id: "drv_b".into(),
                verification: passed(Checkpoint::Pickup, VerificationMethod::Geofence),
            },
            &ctx(3),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RideError::GuardFailed(Guard::NotAssignedDriver(_))
        ));
    }

    #[test]
    fn failed_verification_keeps_status() {
        let mut verification = passed(Checkpoint::Pickup, VerificationMethod::None);
        verification.success = false;
        verification.reason = Some(VerificationFailure {
            location: LocationIssue::TooFar { distance_m: 800.0 },
            otp: OtpIssue::NotRequested,
        });
        let ride = assigned();
        let err = apply(
            &ride,
            Action::ClaimPickup {
                driver_id: "drv_a".into(),
                verification,
            },
            &ctx(3),
        )
        .unwrap_err();
        assert!(matches!(err, RideError::VerificationFailed { .. }));
        assert_eq!(ride.status, RideStatus::DriverAssigned);
    }

    #[test]
    fn stale_client_events_are_refused() {
        let ride = assigned();
        let mut late = ctx(10);
        late.sent_at = start();
        let err = apply(
            &ride,
            Action::Cancel {
                actor: Actor::Customer("cus_1".into()),
                reason: "changed plans".into(),
            },
            &late,
        )
        .unwrap_err();
        assert!(matches!(err, RideError::OutOfOrderEvent { .. }));
    }

    #[test]
    fn terminal_rides_refuse_everything() {
        let ride = step(
            &assigned(),
            Action::Fail {
                actor: Actor::Admin("adm_1".into()),
                reason: "vehicle breakdown".into(),
            },
            2,
        );
        assert_eq!(ride.status, RideStatus::Failed);
        let err = apply(
            &ride,
            Action::Cancel {
                actor: Actor::Admin("adm_1".into()),
                reason: "again".into(),
            },
            &ctx(3),
        )
        .unwrap_err();
        assert!(matches!(err, RideError::AlreadyTerminal { .. }));
    }

    #[test]
    fn cancellation_after_pickup_charges_fee() {
        let mut ride = in_progress();
        ride.partial_payment_amount = 500;
        ride.payment_status = PaymentStatus::PartiallyPaid;

        let policy = FlatFee(300);
        let context = TransitionContext {
            fee_policy: &policy,
            ..ctx(20)
        };
        let transition = apply(
            &ride,
            Action::Cancel {
                actor: Actor::Customer("cus_1".into()),
                reason: "emergency".into(),
            },
            &context,
        )
        .unwrap();

        assert_eq!(transition.ride.status, RideStatus::CancelledByCustomer);
        assert_eq!(
            transition.ride.payment_status,
            PaymentStatus::PartiallyRefunded
        );
        assert!(transition.effects.contains(&SideEffect::CancellationRecorded(
            CancellationOutcome {
                cancellation_fee: 300,
                refund_amount: 200
            }
        )));
        assert!(transition.effects.contains(&SideEffect::ReleaseDriver {
            driver_id: "drv_a".into()
        }));
    }

    #[test]
    fn outsiders_cannot_cancel() {
        let err = apply(
            &assigned(),
            Action::Cancel {
                actor: Actor::Driver("drv_z".into()),
                reason: "".into(),
            },
            &ctx(2),
        )
        .unwrap_err();
        assert!(matches!(err, RideError::GuardFailed(Guard::NotAParty(_))));
    }

    #[test]
    fn no_show_waits_for_grace() {
        let ride = assigned();
        let err = apply(&ride, Action::NoShow, &ctx(10)).unwrap_err();
        assert!(matches!(err, RideError::GuardFailed(Guard::GraceNotElapsed)));

        let transition = apply(&ride, Action::NoShow, &ctx(17)).unwrap();
        assert_eq!(transition.ride.status, RideStatus::NoShow);
        assert!(transition.ride.offer_flagged);
        assert_eq!(transition.ride.history.last().unwrap().actor, None);
    }

    #[test]
    fn partial_payments_accumulate() {
        let ride = step(
            &pending(),
            Action::RecordPartialPayment {
                actor: Actor::Customer("cus_1".into()),
                amount: 500,
            },
            1,
        );
        assert_eq!(ride.status, RideStatus::Pending);
        assert_eq!(ride.partial_payment_amount, 500);
        assert_eq!(ride.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(ride.version, 1);

        let err = apply(
            &ride,
            Action::RecordPartialPayment {
                actor: Actor::Customer("cus_1".into()),
                amount: 1_600,
            },
            &ctx(2),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RideError::GuardFailed(Guard::Overpayment {
                paid: 2_100,
                total: 2_000
            })
        ));
    }

    #[test]
    fn huge_payment_cannot_wrap_the_balance() {
        let ride = step(
            &pending(),
            Action::RecordPartialPayment {
                actor: Actor::Customer("cus_1".into()),
                amount: 500,
            },
            1,
        );
        let err = apply(
            &ride,
            Action::RecordPartialPayment {
                actor: Actor::Customer("cus_1".into()),
                amount: u64::MAX - 499,
            },
            &ctx(2),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RideError::GuardFailed(Guard::Overpayment {
                paid: u64::MAX,
                total: 2_000
            })
        ));
    }

    #[test]
    fn drop_fare_below_commission_is_refused() {
        let ride = in_progress();
        assert!(check_drop_fare(&ride, None).is_ok());
        assert!(check_drop_fare(&ride, Some(300)).is_ok());
        assert_eq!(
            check_drop_fare(&ride, Some(299)),
            Err(Guard::FareBelowCommission {
                total: 299,
                commission: 300
            })
        );
    }

    #[test]
    fn poster_revises_only_while_pending() {
        let revise = |actor: Actor| Action::ReviseOffer {
            actor,
            offer_hash: "revised".into(),
            total_amount: 2_400,
            commission_amount: 300,
        };

        let ride = step(&pending(), revise(Actor::Driver("drv_poster".into())), 1);
        assert_eq!(ride.driver_earning, 2_100);
        assert_eq!(ride.offer_hash, "revised");

        let err = apply(&assigned(), revise(Actor::Driver("drv_poster".into())), &ctx(2))
            .unwrap_err();
        assert!(matches!(err, RideError::GuardFailed(Guard::OfferLocked)));

        let ride = step(&assigned(), revise(Actor::Admin("adm_1".into())), 2);
        assert_eq!(ride.total_amount, 2_400);
        assert!(ride.fare_balanced());
    }

    #[test]
    fn precheck_matches_apply_ordering() {
        let ride = assigned();
        assert!(precheck(&ride, ActionKind::ClaimPickup, Some("drv_a"), None).is_ok());
        assert!(matches!(
            precheck(&ride, ActionKind::ClaimPickup, Some("drv_b"), None),
            Err(RideError::GuardFailed(Guard::NotAssignedDriver(_)))
        ));
        assert!(matches!(
            precheck(&ride, ActionKind::ClaimDrop, Some("drv_a"), None),
            Err(RideError::InvalidTransition { .. })
        ));
        assert!(admits(RideStatus::InProgress, ActionKind::IssueOtp));
        assert!(!admits(RideStatus::ReachedPickup, ActionKind::IssueOtp));
    }
}
