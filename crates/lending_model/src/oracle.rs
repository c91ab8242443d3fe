//! Oracle price-reading contract.
//!
//! The oracle collaborator validates confidence intervals and publishes
//! `valid`; this core only consumes the already-validated reading. Freshness
//! against each reserve's own staleness policy is checked separately at the
//! point of use.

use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;
use crate::error::{LendingError, Result};

/// One validated price observation for a single asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleReading {
    /// Spot price in USD per whole token.
    pub spot: Decimal,
    /// Confidence-derived lower price bound.
    pub lower_bound: Decimal,
    /// Confidence-derived upper price bound.
    pub upper_bound: Decimal,
    /// Unix timestamp of the observation, seconds.
    pub timestamp: u64,
    /// Whether the oracle collaborator accepted the reading.
    pub valid: bool,
}

impl OracleReading {
    /// Reject readings the collaborator flagged invalid, and readings whose
    /// bounds are not ordered `lower <= spot <= upper` or whose spot is
    /// zero.
    pub fn check(&self) -> Result<()> {
        if !self.valid {
            return Err(LendingError::InvalidOracleReading);
        }
        if self.spot == Decimal::zero()
            || self.lower_bound > self.spot
            || self.spot > self.upper_bound
        {
            return Err(LendingError::InvalidOracleReading);
        }
        Ok(())
    }
}
