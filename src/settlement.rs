//! Fare arithmetic at drop time.
//!
//! All amounts are in minor currency units.

use crate::error::{Guard, RideError};
use crate::ride::PaymentStatus;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    #[n(0)]
    Exact,
    #[n(1)]
    OverCollected(#[n(0)] u64),
    #[n(2)]
    UnderCollected(#[n(0)] u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementResult {
    pub total_amount: u64,
    pub commission_amount: u64,
    pub driver_earning: u64,
    pub partial_payment_amount: u64,
    pub remaining_amount: u64,
    pub collected_amount: u64,
    pub reconciliation: Reconciliation,
}

impl SettlementResult {
    pub fn payment_status(&self) -> PaymentStatus {
        match self.reconciliation {
            Reconciliation::UnderCollected(_) => PaymentStatus::Underpaid,
            Reconciliation::Exact | Reconciliation::OverCollected(_) => PaymentStatus::Paid,
        }
    }
}

/// Splits the final fare and reconciles what the driver collected against
/// what was still owed after partial payments.
pub fn settle(
    total_amount: u64,
    commission_amount: u64,
    partial_payment_amount: u64,
    collected_amount: u64,
) -> Result<SettlementResult, RideError> {
    if commission_amount > total_amount {
        return Err(Guard::FareBelowCommission {
            total: total_amount,
            commission: commission_amount,
        }
        .into());
    }

    let remaining_amount = total_amount.saturating_sub(partial_payment_amount);
    let reconciliation = match collected_amount.cmp(&remaining_amount) {
        std::cmp::Ordering::Equal => Reconciliation::Exact,
        std::cmp::Ordering::Greater => {
            Reconciliation::OverCollected(collected_amount - remaining_amount)
        }
        std::cmp::Ordering::Less => {
            Reconciliation::UnderCollected(remaining_amount - collected_amount)
        }
    };

    Ok(SettlementResult {
        total_amount,
        commission_amount,
        driver_earning: total_amount - commission_amount,
        partial_payment_amount,
        remaining_amount,
        collected_amount,
        reconciliation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collected_matches_remaining() -> anyhow::Result<()> {
        let result = settle(1_200, 200, 300, 900)?;
        assert_eq!(result.driver_earning, 1_000);
        assert_eq!(result.remaining_amount, 900);
        assert_eq!(result.reconciliation, Reconciliation::Exact);
        assert_eq!(result.payment_status(), PaymentStatus::Paid);
        Ok(())
    }

    #[test]
    fn short_collection_is_underpaid() -> anyhow::Result<()> {
        let result = settle(1_200, 200, 0, 1_000)?;
        assert_eq!(result.reconciliation, Reconciliation::UnderCollected(200));
        assert_eq!(result.payment_status(), PaymentStatus::Underpaid);

        let result = settle(1_200, 200, 0, 1_250)?;
        assert_eq!(result.reconciliation, Reconciliation::OverCollected(50));
        Ok(())
    }

    #[test]
    fn commission_above_fare_is_refused() {
        let err = settle(100, 150, 0, 100).unwrap_err();
        assert!(matches!(
            err,
            RideError::GuardFailed(Guard::FareBelowCommission {
                total: 100,
                commission: 150
            })
        ));
    }

    #[test]
    fn zero_commission() -> anyhow::Result<()> {
        let result = settle(800, 0, 0, 800)?;
        assert_eq!(result.driver_earning, 800);
        Ok(())
    }
}
