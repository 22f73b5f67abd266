//! Service layer API for ride lifecycle operations
use crate::cancellation::{FeePolicy, StandardFeePolicy};
use crate::checkpoint::{Checkpoint, CheckpointVerifier, VerificationResult};
use crate::clock::{Clock, SystemClock};
use crate::config::LifecycleConfig;
use crate::error::{Guard, RideError};
use crate::events::{EventSink, LogSink, RideStatusChanged};
use crate::location::{GreatCircle, LocationSource, RouteOracle};
use crate::machine::{self, Action, SideEffect, Transition, TransitionContext};
use crate::offer::{OfferDraft, RideOffer};
use crate::otp::{IssuedOtp, OtpLedger};
use crate::ride::{ActionKind, Actor, Ride, RideStatus};
use crate::store::{RideStore, SledRideStore};
use crate::types::TimeStamp;
use crate::utils::{IdKind, new_id};
use chrono::Utc;
use std::sync::Arc;

/// Addressing for every command: which ride, the version the caller read
/// and when the client produced the event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub ride_id: String,
    pub expected_version: u64,
    pub sent_at: TimeStamp<Utc>,
}

impl Envelope {
    pub fn new(ride_id: impl Into<String>, expected_version: u64, sent_at: TimeStamp<Utc>) -> Self {
        Self {
            ride_id: ride_id.into(),
            expected_version,
            sent_at,
        }
    }
    pub fn for_ride(ride: &Ride, sent_at: TimeStamp<Utc>) -> Self {
        Self::new(ride.id.clone(), ride.version, sent_at)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub ride: Ride,
    pub effects: Vec<SideEffect>,
}

impl TransitionOutcome {
    /// Id of the pending ride created when this outcome was a rejection.
    pub fn reoffered_ride(&self) -> Option<&str> {
        self.effects.iter().find_map(|effect| match effect {
            SideEffect::Reoffered { ride_id } => Some(ride_id.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub advanced: Vec<String>,
    /// Rides another writer changed first; not advanced by this run.
    pub contended: Vec<String>,
    pub failed: Vec<(String, RideError)>,
}

pub struct RideLifecycleService {
    store: Arc<dyn RideStore>,
    verifier: CheckpointVerifier,
    locations: Arc<dyn LocationSource>,
    routes: Arc<dyn RouteOracle>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    fee_policy: Arc<dyn FeePolicy>,
    config: LifecycleConfig,
}

impl RideLifecycleService {
    pub fn new(
        store: Arc<dyn RideStore>,
        otp: OtpLedger,
        locations: Arc<dyn LocationSource>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            verifier: CheckpointVerifier::new(otp, &config),
            locations,
            routes: Arc::new(GreatCircle::default()),
            clock: Arc::new(SystemClock),
            events: Arc::new(LogSink),
            fee_policy: Arc::new(StandardFeePolicy::default()),
            config,
        }
    }

    /// Wires the sled backed store and OTP ledger onto one database.
    pub fn open(
        instance: Arc<sled::Db>,
        locations: Arc<dyn LocationSource>,
        config: LifecycleConfig,
    ) -> Result<Self, RideError> {
        let otp = OtpLedger::open(&instance, &config)?;
        let store = Arc::new(SledRideStore::new(instance));
        Ok(Self::new(store, otp, locations, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
    pub fn with_fee_policy(mut self, fee_policy: Arc<dyn FeePolicy>) -> Self {
        self.fee_policy = fee_policy;
        self
    }
    pub fn with_routes(mut self, routes: Arc<dyn RouteOracle>) -> Self {
        self.routes = routes;
        self
    }

    pub fn verifier(&self) -> &CheckpointVerifier {
        &self.verifier
    }
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn ride(&self, ride_id: &str) -> Result<Ride, RideError> {
        self.store
            .load(ride_id)?
            .ok_or_else(|| RideError::NotFound(ride_id.to_string()))
    }

    pub fn offer_for(&self, ride: &Ride) -> Result<RideOffer, RideError> {
        self.store
            .offer(&ride.offer_hash)?
            .ok_or_else(|| RideError::CorruptRecord {
                key: format!("offer/{}", ride.offer_hash),
                reason: format!("referenced by ride {} but missing", ride.id),
            })
    }

    /// Loads the ride addressed by `envelope`, refusing a stale version.
    fn load_for(&self, envelope: &Envelope) -> Result<Ride, RideError> {
        let ride = self.ride(&envelope.ride_id)?;
        if ride.version != envelope.expected_version {
            return Err(RideError::ConcurrentModification {
                ride_id: ride.id,
                expected: envelope.expected_version,
                found: ride.version,
            });
        }
        Ok(ride)
    }

    fn transition(
        &self,
        ride: &Ride,
        action: Action,
        sent_at: TimeStamp<Utc>,
        now: TimeStamp<Utc>,
        distance_covered_m: f64,
    ) -> Result<Transition, RideError> {
        let ctx = TransitionContext {
            now,
            sent_at,
            no_show_grace: self.config.no_show_grace,
            fee_policy: self.fee_policy.as_ref(),
            distance_covered_m,
        };
        machine::apply(ride, action, &ctx)
    }

    /// Writes a transition and announces it.
    fn persist(&self, before: &Ride, transition: Transition) -> Result<TransitionOutcome, RideError> {
        self.store.replace(before.version, &transition.ride)?;
        Ok(self.announce(transition))
    }

    /// Runs what follows a stored transition: code cleanup, logs and events.
    fn announce(&self, transition: Transition) -> TransitionOutcome {
        let ride = transition.ride;
        if ride.is_terminal() && ride.status != RideStatus::Completed {
            if let Err(e) = self.verifier.ledger().discard(&ride.id) {
                tracing::warn!(ride_id = %ride.id, error = %e, "failed to discard one-time codes");
            }
        }

        for effect in &transition.effects {
            if let SideEffect::StatusChanged { from, to } = effect {
                tracing::info!(
                    ride_id = %ride.id,
                    from = %from,
                    to = %to,
                    version = ride.version,
                    "ride transitioned"
                );
                self.events.publish(&RideStatusChanged {
                    ride_id: ride.id.clone(),
                    from: *from,
                    to: *to,
                    at: ride.updated_at.clone(),
                    version: ride.version,
                });
            }
        }

        TransitionOutcome {
            ride,
            effects: transition.effects,
        }
    }

    fn commit(
        &self,
        ride: &Ride,
        action: Action,
        sent_at: TimeStamp<Utc>,
        distance_covered_m: f64,
    ) -> Result<TransitionOutcome, RideError> {
        let transition =
            self.transition(ride, action, sent_at, self.clock.now(), distance_covered_m)?;
        self.persist(ride, transition)
    }

    /// Validates an offer and opens a pending ride for it
    pub fn post_offer(&self, draft: OfferDraft) -> Result<Ride, RideError> {
        let offer = draft.finalise()?;
        let (offer_hash, _) = offer.encode()?;
        let ride = Ride::open(new_id(IdKind::Ride)?, offer_hash, &offer, self.clock.now());

        self.store.post(&offer, &ride)?;
        tracing::info!(ride_id = %ride.id, posted_by = %ride.posted_by, "offer posted");
        Ok(ride)
    }

    /// Replaces the ride's offer and re-snapshots the fare
    pub fn revise_offer(
        &self,
        envelope: &Envelope,
        actor: Actor,
        draft: OfferDraft,
    ) -> Result<TransitionOutcome, RideError> {
        let ride = self.load_for(envelope)?;
        let offer = draft.finalise()?;
        if offer.posted_by() != ride.posted_by {
            return Err(Guard::NotAParty(offer.posted_by().to_string()).into());
        }
        let (offer_hash, _) = offer.encode()?;

        let transition = self.transition(
            &ride,
            Action::ReviseOffer {
                actor,
                offer_hash,
                total_amount: offer.total_amount(),
                commission_amount: offer.commission_amount(),
            },
            envelope.sent_at.clone(),
            self.clock.now(),
            0.0,
        )?;
        self.store.revise(ride.version, &transition.ride, &offer)?;
        Ok(self.announce(transition))
    }

    pub fn record_partial_payment(
        &self,
        envelope: &Envelope,
        actor: Actor,
        amount: u64,
    ) -> Result<TransitionOutcome, RideError> {
        let ride = self.load_for(envelope)?;
        self.commit(
            &ride,
            Action::RecordPartialPayment { actor, amount },
            envelope.sent_at.clone(),
            0.0,
        )
    }

    pub fn assign(&self, envelope: &Envelope, driver_id: &str) -> Result<TransitionOutcome, RideError> {
        let ride = self.load_for(envelope)?;
        self.commit(
            &ride,
            Action::Assign {
                driver_id: driver_id.to_string(),
            },
            envelope.sent_at.clone(),
            0.0,
        )
    }

    /// Rejects the assignment and re-opens the offer as a new pending ride.
    pub fn reject(&self, envelope: &Envelope, driver_id: &str) -> Result<TransitionOutcome, RideError> {
        let ride = self.load_for(envelope)?;
        let mut outcome = self.commit(
            &ride,
            Action::Reject {
                driver_id: driver_id.to_string(),
            },
            envelope.sent_at.clone(),
            0.0,
        )?;

        // the rejection already stands; a failed re-offer is logged, not returned
        let reopened = new_id(IdKind::Ride)
            .map_err(RideError::from)
            .map(|id| Ride::reoffer(&outcome.ride, id, self.clock.now()))
            .and_then(|fresh| self.store.insert(&fresh).map(|_| fresh));
        match reopened {
            Ok(fresh) => {
                tracing::info!(ride_id = %fresh.id, reoffered_from = %ride.id, "offer re-opened");
                outcome
                    .effects
                    .push(SideEffect::Reoffered { ride_id: fresh.id });
            }
            Err(e) => {
                tracing::error!(ride_id = %ride.id, error = %e, "failed to re-open rejected offer");
            }
        }
        Ok(outcome)
    }

    /// Issues a one-time code for the checkpoint the ride can claim next.
    pub fn issue_otp(&self, ride_id: &str, checkpoint: Checkpoint) -> Result<IssuedOtp, RideError> {
        let ride = self.ride(ride_id)?;
        machine::precheck(&ride, ActionKind::IssueOtp, None, None)?;

        let claimable = match ride.status {
            RideStatus::DriverAssigned => Checkpoint::Pickup,
            _ => Checkpoint::Drop,
        };
        if checkpoint != claimable {
            return Err(Guard::CheckpointMismatch {
                expected: claimable,
                found: checkpoint,
            }
            .into());
        }
        self.verifier.issue_otp(ride_id, checkpoint, self.clock.now())
    }

    fn claim(
        &self,
        envelope: &Envelope,
        driver_id: &str,
        checkpoint: Checkpoint,
        otp_code: Option<&str>,
        payload_guard: impl FnOnce(&Ride) -> Result<(), Guard>,
        into_action: impl FnOnce(VerificationResult) -> Action,
    ) -> Result<TransitionOutcome, RideError> {
        let ride = self.load_for(envelope)?;
        let kind = match checkpoint {
            Checkpoint::Pickup => ActionKind::ClaimPickup,
            Checkpoint::Drop => ActionKind::ClaimDrop,
        };
        // everything that can refuse the claim runs before a code is consumed
        machine::precheck(&ride, kind, Some(driver_id), Some(&envelope.sent_at))?;
        payload_guard(&ride)?;

        let offer = self.offer_for(&ride)?;
        let target = match checkpoint {
            Checkpoint::Pickup => offer.pickup_point(),
            Checkpoint::Drop => offer.drop_point(),
        };
        let fix = self.locations.latest_fix(driver_id);
        let now = self.clock.now();
        let verification =
            self.verifier
                .verify(&ride.id, checkpoint, target, fix.as_ref(), otp_code, &now)?;

        let transition = self.transition(
            &ride,
            into_action(verification),
            envelope.sent_at.clone(),
            now,
            0.0,
        )?;
        self.persist(&ride, transition)
    }

    pub fn claim_pickup(
        &self,
        envelope: &Envelope,
        driver_id: &str,
        otp_code: Option<&str>,
    ) -> Result<TransitionOutcome, RideError> {
        self.claim(
            envelope,
            driver_id,
            Checkpoint::Pickup,
            otp_code,
            |_| Ok(()),
            |verification| Action::ClaimPickup {
                driver_id: driver_id.to_string(),
                verification,
            },
        )
    }

    pub fn start_trip(&self, envelope: &Envelope, driver_id: &str) -> Result<TransitionOutcome, RideError> {
        let ride = self.load_for(envelope)?;
        self.commit(
            &ride,
            Action::StartTrip {
                driver_id: driver_id.to_string(),
            },
            envelope.sent_at.clone(),
            0.0,
        )
    }

    /// Verifies the drop and settles the fare.
    ///
    /// `final_total` replaces the agreed fare when extra distance or time
    /// charges apply; `collected_amount` is what the driver took in hand.
    pub fn claim_drop(
        &self,
        envelope: &Envelope,
        driver_id: &str,
        otp_code: Option<&str>,
        collected_amount: u64,
        final_total: Option<u64>,
    ) -> Result<TransitionOutcome, RideError> {
        self.claim(
            envelope,
            driver_id,
            Checkpoint::Drop,
            otp_code,
            |ride| machine::check_drop_fare(ride, final_total),
            |verification| Action::ClaimDrop {
                driver_id: driver_id.to_string(),
                verification,
                collected_amount,
                final_total,
            },
        )
    }

    pub fn cancel(
        &self,
        envelope: &Envelope,
        actor: Actor,
        reason: &str,
    ) -> Result<TransitionOutcome, RideError> {
        let ride = self.load_for(envelope)?;
        let distance_covered_m = self.distance_covered(&ride)?;
        self.commit(
            &ride,
            Action::Cancel {
                actor,
                reason: reason.to_string(),
            },
            envelope.sent_at.clone(),
            distance_covered_m,
        )
    }

    // only a trip under way has covered any distance worth charging for
    fn distance_covered(&self, ride: &Ride) -> Result<f64, RideError> {
        if ride.status != RideStatus::InProgress {
            return Ok(0.0);
        }
        let Some(fix) = ride
            .assigned_driver_id
            .as_deref()
            .and_then(|driver_id| self.locations.latest_fix(driver_id))
        else {
            return Ok(0.0);
        };
        let offer = self.offer_for(ride)?;
        Ok(self.routes.distance_m(&offer.pickup_point(), &fix.point))
    }

    pub fn fail(
        &self,
        envelope: &Envelope,
        actor: Actor,
        reason: &str,
    ) -> Result<TransitionOutcome, RideError> {
        let ride = self.load_for(envelope)?;
        self.commit(
            &ride,
            Action::Fail {
                actor,
                reason: reason.to_string(),
            },
            envelope.sent_at.clone(),
            0.0,
        )
    }

    /// Moves every overdue driver-assigned ride to no-show.
    ///
    /// Safe to run concurrently with itself: each ride is advanced by a
    /// compare-and-swap, and the loser of a race reports it as contended.
    /// A ride that cannot be read or written lands in `failed`; the rest
    /// are still swept.
    pub fn no_show_sweep(&self) -> Result<SweepReport, RideError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let scan = self.store.with_status(RideStatus::DriverAssigned)?;

        for (ride_id, e) in scan.unreadable {
            tracing::warn!(ride_id = %ride_id, error = %e, "no-show sweep could not read ride");
            report.failed.push((ride_id, e));
        }
        for ride in scan.rides {
            if !ride.no_show_due(&now, self.config.no_show_grace) {
                continue;
            }
            let result = self
                .transition(&ride, Action::NoShow, now.clone(), now.clone(), 0.0)
                .and_then(|transition| self.persist(&ride, transition));
            match result {
                Ok(_) => report.advanced.push(ride.id),
                Err(RideError::ConcurrentModification { .. }) => report.contended.push(ride.id),
                Err(e) => {
                    tracing::warn!(ride_id = %ride.id, error = %e, "no-show sweep skipped ride");
                    report.failed.push((ride.id, e));
                }
            }
        }

        tracing::info!(
            advanced = report.advanced.len(),
            contended = report.contended.len(),
            failed = report.failed.len(),
            "no-show sweep finished"
        );
        Ok(report)
    }
}
