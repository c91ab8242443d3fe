//! Error taxonomy for the risk-accounting core.
//!
//! Every error is local to a single operation: no operation partially
//! mutates persisted state and then fails. Retry policy belongs entirely to
//! the caller.

use thiserror::Error;

/// Failure modes surfaced by the lending core.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LendingError {
    /// Malformed reserve or rate-limiter configuration. Rejected at the
    /// admin boundary, never reaches accounting state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A touched reserve's price is older than its staleness policy allows.
    /// The caller must refresh the oracle and retry; the core never
    /// substitutes a stale price.
    #[error("reserve price is stale")]
    StalePrice,

    /// The oracle collaborator flagged the reading invalid, or the reading
    /// violates lower <= spot <= upper.
    #[error("oracle reading is invalid")]
    InvalidOracleReading,

    /// A borrow or withdraw would push the weighted borrow value (upper
    /// price bound) past the allowed borrow value.
    #[error("operation would leave the obligation unhealthy")]
    InsufficientHealth,

    /// Liquidation attempted against a healthy obligation.
    #[error("obligation is not liquidatable")]
    NotLiquidatable,

    /// Debt forgiveness attempted while the obligation still holds deposits.
    #[error("obligation is not forgivable")]
    NotForgivable,

    /// Zero-value operation rejected outright to avoid rounding-driven
    /// no-ops.
    #[error("amount is too small")]
    AmountTooSmall,

    /// Aggregate outflow would exceed the sliding-window cap. The caller
    /// may retry in a later window.
    #[error("market outflow rate limit exceeded")]
    RateLimitExceeded,

    /// Repay or withdraw against a reserve the position never touched.
    #[error("no deposit or borrow record for this reserve")]
    RecordNotFound,

    /// A position may not deposit and borrow the same asset.
    #[error("cannot deposit and borrow the same asset")]
    DepositBorrowSameAsset,

    /// Borrowing an isolated asset requires the obligation to hold no other
    /// borrow, and vice versa.
    #[error("isolated asset borrow restriction violated")]
    IsolatedAssetViolation,

    /// Deposit would push the reserve past its deposit cap.
    #[error("reserve deposit limit exceeded")]
    DepositLimitExceeded,

    /// Borrow would push the reserve past its borrow cap.
    #[error("reserve borrow limit exceeded")]
    BorrowLimitExceeded,

    /// Requested outflow exceeds the reserve's available liquidity.
    #[error("insufficient reserve liquidity")]
    InsufficientLiquidity,

    /// Withdraw of more ctokens than the position holds.
    #[error("withdraw exceeds deposited amount")]
    WithdrawTooLarge,

    /// Arithmetic overflow, underflow, or division by zero.
    #[error("math overflow")]
    MathOverflow,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, LendingError>;
