//! Cancellation fees, refunds and the record left on a cancelled ride.
use crate::error::RideError;
use crate::ride::{Actor, PaymentStatus, Ride, RideStatus};
use crate::types::TimeStamp;
use chrono::{Duration, Utc};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelledBy {
    #[n(0)]
    Customer,
    #[n(1)]
    Driver,
    #[n(2)]
    Admin,
}

impl CancelledBy {
    pub fn terminal_status(&self) -> RideStatus {
        match self {
            CancelledBy::Customer => RideStatus::CancelledByCustomer,
            CancelledBy::Driver => RideStatus::CancelledByDriver,
            CancelledBy::Admin => RideStatus::CancelledByAdmin,
        }
    }
}

/// Everything a fee policy may look at.
#[derive(Debug, Clone, PartialEq)]
pub struct CancellationContext {
    pub cancelled_by: CancelledBy,
    pub status_at_cancel: RideStatus,
    pub elapsed_since_assignment: Option<Duration>,
    pub distance_covered_m: f64,
    pub pickup_verified: bool,
    pub total_amount: u64,
    pub partial_payment_amount: u64,
}

pub trait FeePolicy: Send + Sync {
    fn fee(&self, ctx: &CancellationContext) -> u64;
}

impl<F> FeePolicy for F
where
    F: Fn(&CancellationContext) -> u64 + Send + Sync,
{
    fn fee(&self, ctx: &CancellationContext) -> u64 {
        self(ctx)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoFee;

impl FeePolicy for NoFee {
    fn fee(&self, _: &CancellationContext) -> u64 {
        0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlatFee(pub u64);

impl FeePolicy for FlatFee {
    fn fee(&self, _: &CancellationContext) -> u64 {
        self.0
    }
}

/// Customer pays nothing before assignment or inside the grace window,
/// a late fee after it, and the full fee once the driver has verified
/// pickup. Distance already driven adds `per_km_fee` per whole kilometre.
/// Drivers and admins are never charged.
#[derive(Debug, Clone)]
pub struct StandardFeePolicy {
    pub customer_grace: Duration,
    pub late_fee: u64,
    pub full_fee: u64,
    pub per_km_fee: u64,
}

impl Default for StandardFeePolicy {
    fn default() -> Self {
        Self {
            customer_grace: Duration::minutes(5),
            late_fee: 50,
            full_fee: 100,
            per_km_fee: 0,
        }
    }
}

impl FeePolicy for StandardFeePolicy {
    fn fee(&self, ctx: &CancellationContext) -> u64 {
        if ctx.cancelled_by != CancelledBy::Customer {
            return 0;
        }
        let base = if ctx.pickup_verified {
            self.full_fee
        } else {
            match ctx.elapsed_since_assignment {
                None => 0,
                Some(elapsed) if elapsed <= self.customer_grace => 0,
                Some(_) => self.late_fee,
            }
        };
        let km = (ctx.distance_covered_m.max(0.0) / 1000.0).floor() as u64;
        base.saturating_add(km.saturating_mul(self.per_km_fee))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationOutcome {
    pub cancellation_fee: u64,
    pub refund_amount: u64,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct CancellationRecord {
    #[n(0)]
    pub by: CancelledBy,
    #[n(1)]
    pub actor_id: String,
    #[n(2)]
    pub at: TimeStamp<Utc>,
    #[n(3)]
    pub reason: String,
    #[n(4)]
    pub fee: u64,
    #[n(5)]
    pub refund: u64,
}

/// Payment status once a refund has been decided.
pub fn payment_status_after_refund(
    current: PaymentStatus,
    partial_payment_amount: u64,
    refund_amount: u64,
) -> PaymentStatus {
    if partial_payment_amount == 0 {
        current
    } else if refund_amount == partial_payment_amount {
        PaymentStatus::Refunded
    } else if refund_amount == 0 {
        PaymentStatus::Forfeited
    } else {
        PaymentStatus::PartiallyRefunded
    }
}

pub struct CancellationLedger;

impl CancellationLedger {
    /// Prices a cancellation and produces the record to attach to the ride.
    ///
    /// The fee never exceeds the fare and the refund never exceeds what was
    /// paid. A ride that is terminal or already carries a record is refused.
    pub fn cancel(
        ride: &Ride,
        actor: &Actor,
        reason: &str,
        policy: &dyn FeePolicy,
        now: &TimeStamp<Utc>,
        distance_covered_m: f64,
    ) -> Result<(CancellationRecord, CancellationOutcome), RideError> {
        if ride.is_terminal() || ride.cancellation.is_some() {
            return Err(RideError::AlreadyTerminal {
                ride_id: ride.id.clone(),
                status: ride.status,
            });
        }

        let ctx = CancellationContext {
            cancelled_by: actor.cancelled_by(),
            status_at_cancel: ride.status,
            elapsed_since_assignment: ride.assigned_at.as_ref().map(|at| now.since(at)),
            distance_covered_m,
            pickup_verified: ride.pickup_verified(),
            total_amount: ride.total_amount,
            partial_payment_amount: ride.partial_payment_amount,
        };

        let cancellation_fee = policy.fee(&ctx).min(ride.total_amount);
        let refund_amount = ride.partial_payment_amount.saturating_sub(cancellation_fee);
        let outcome = CancellationOutcome {
            cancellation_fee,
            refund_amount,
        };

        let record = CancellationRecord {
            by: ctx.cancelled_by,
            actor_id: actor.id().to_string(),
            at: now.clone(),
            reason: reason.to_string(),
            fee: cancellation_fee,
            refund: refund_amount,
        };
        Ok((record, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(by: CancelledBy) -> CancellationContext {
        CancellationContext {
            cancelled_by: by,
            status_at_cancel: RideStatus::DriverAssigned,
            elapsed_since_assignment: Some(Duration::minutes(2)),
            distance_covered_m: 0.0,
            pickup_verified: false,
            total_amount: 2_000,
            partial_payment_amount: 500,
        }
    }

    #[test]
    fn standard_policy_schedule() {
        let policy = StandardFeePolicy::default();
        assert_eq!(policy.fee(&ctx(CancelledBy::Customer)), 0);

        let late = CancellationContext {
            elapsed_since_assignment: Some(Duration::minutes(9)),
            ..ctx(CancelledBy::Customer)
        };
        assert_eq!(policy.fee(&late), 50);

        let picked_up = CancellationContext {
            pickup_verified: true,
            ..ctx(CancelledBy::Customer)
        };
        assert_eq!(policy.fee(&picked_up), 100);

        let unassigned = CancellationContext {
            elapsed_since_assignment: None,
            status_at_cancel: RideStatus::Pending,
            ..ctx(CancelledBy::Customer)
        };
        assert_eq!(policy.fee(&unassigned), 0);

        assert_eq!(policy.fee(&ctx(CancelledBy::Driver)), 0);
    }

    #[test]
    fn per_km_charge() {
        let policy = StandardFeePolicy {
            per_km_fee: 12,
            ..StandardFeePolicy::default()
        };
        let driven = CancellationContext {
            pickup_verified: true,
            distance_covered_m: 3_900.0,
            ..ctx(CancelledBy::Customer)
        };
        assert_eq!(policy.fee(&driven), 100 + 3 * 12);
    }

    #[test]
    fn per_km_charge_saturates() {
        let policy = StandardFeePolicy {
            per_km_fee: u64::MAX / 2,
            ..StandardFeePolicy::default()
        };
        let driven = CancellationContext {
            pickup_verified: true,
            distance_covered_m: 40_000.0,
            ..ctx(CancelledBy::Customer)
        };
        assert_eq!(policy.fee(&driven), u64::MAX);
    }

    #[test]
    fn closures_are_policies() {
        let policy = |ctx: &CancellationContext| ctx.total_amount / 10;
        assert_eq!(policy.fee(&ctx(CancelledBy::Admin)), 200);
        assert_eq!(FlatFee(75).fee(&ctx(CancelledBy::Admin)), 75);
        assert_eq!(NoFee.fee(&ctx(CancelledBy::Customer)), 0);
    }

    #[test]
    fn refund_drives_payment_status() {
        use PaymentStatus::*;
        assert_eq!(payment_status_after_refund(PartiallyPaid, 500, 500), Refunded);
        assert_eq!(payment_status_after_refund(PartiallyPaid, 500, 200), PartiallyRefunded);
        assert_eq!(payment_status_after_refund(PartiallyPaid, 500, 0), Forfeited);
        assert_eq!(payment_status_after_refund(Unpaid, 0, 0), Unpaid);
    }
}
