//! Risk-accounting core for a collateralized lending market.
//!
//! Pure accounting, no custody: every operation computes the amounts the
//! ledger collaborator must move and either commits in full or fails
//! without touching state. All arithmetic is non-negative fixed-point with
//! explicit rounding directions; no unwrap/panic paths outside tests.
//!
//! Concurrency discipline for embedders: one active mutating operation per
//! obligation and per reserve at a time. Every operation reads then writes
//! aggregate fields with non-commutative arithmetic, so unserialized
//! concurrent mutation is a correctness bug. Snapshot reads need no lock.

#![forbid(unsafe_code)]

#[cfg(kani)]
extern crate kani;

pub mod decimal;
pub mod error;
pub mod obligation;
pub mod oracle;
pub mod rate_limiter;
pub mod reserve;
pub mod rewards;

pub use decimal::{Decimal, BPS_PER_ONE, WAD};
pub use error::{LendingError, Result};
pub use obligation::{
    full_liquidation_threshold, Borrow, Deposit, LiquidationSettlement, Obligation,
    LIQUIDATION_CLOSE_FACTOR_PCT,
};
pub use oracle::OracleReading;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use reserve::{
    BorrowSettlement, CurvePoint, EmodeOverride, InterestRateCurve, Reserve, ReserveConfig,
    SECONDS_PER_YEAR,
};
pub use rewards::{RewardPolicy, RewardShare};
