//! Minimal share-accounting hook for the reward-distribution collaborator.
//!
//! Reward mechanics live outside this core; obligations only maintain the
//! per-reserve share amounts the distributor needs. Shares live in an
//! index-addressed arena inside the obligation, created lazily on first
//! deposit or borrow of a reserve - never a map in the hot path.

use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;
use crate::error::Result;

/// Share amounts for one reserve within one obligation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardShare {
    pub reserve: usize,
    /// Deposit-side share: the ctoken amount held.
    pub deposit_share: u64,
    /// Borrow-side share: borrowed amount normalized by the cumulative
    /// borrow index, so accruing interest does not grow the share.
    pub borrow_share: u64,
}

/// Designated correlated reserve pairs whose looped positions (deposit one
/// side while borrowing the other) earn zero shares on both legs. Policy
/// data supplied by the admin collaborator, not fixed logic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPolicy {
    pub correlated_pairs: Vec<(usize, usize)>,
}

impl RewardPolicy {
    /// Whether depositing `deposit_reserve` while borrowing
    /// `borrow_reserve` is a designated correlated loop.
    pub fn is_correlated_loop(&self, deposit_reserve: usize, borrow_reserve: usize) -> bool {
        self.correlated_pairs.iter().any(|&(a, b)| {
            (a == deposit_reserve && b == borrow_reserve)
                || (a == borrow_reserve && b == deposit_reserve)
        })
    }
}

/// Normalized borrow share: ceil(borrowed / cumulative_borrow_rate).
pub fn borrow_share(borrowed_amount: Decimal, cumulative_borrow_rate: Decimal) -> Result<u64> {
    borrowed_amount.try_div(cumulative_borrow_rate)?.try_ceil_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_detection_is_symmetric() {
        let policy = RewardPolicy {
            correlated_pairs: vec![(0, 1)],
        };
        assert!(policy.is_correlated_loop(0, 1));
        assert!(policy.is_correlated_loop(1, 0));
        assert!(!policy.is_correlated_loop(0, 2));
        assert!(!policy.is_correlated_loop(2, 1));
    }

    #[test]
    fn borrow_share_is_interest_invariant() {
        // Debt and index growing by the same factor leaves the share fixed.
        let share_before = borrow_share(Decimal::from(1_000), Decimal::one()).unwrap();
        let share_after = borrow_share(
            Decimal::from(1_100),
            "1.1".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(share_before, share_after);
    }
}
