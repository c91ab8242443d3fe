//! Per-asset pool accounting: interest compounding, price state, receipt
//! token exchange, fees, and caps.
//!
//! A reserve never moves funds. Every operation returns the integer amounts
//! the ledger collaborator must transfer or mint; rounding always favors
//! protocol solvency (amounts owed round up, amounts paid out round down).

use log::warn;
use serde::{Deserialize, Serialize};

use crate::decimal::{Decimal, BPS_PER_ONE};
use crate::error::{LendingError, Result};
use crate::oracle::OracleReading;

/// Seconds in a 365-day year, the time base for APR compounding.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// One breakpoint of the utilization -> APR curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Utilization, in basis points of total supply.
    pub util_bps: u64,
    /// Borrow APR at that utilization, in basis points.
    pub apr_bps: u64,
}

/// Piecewise-linear utilization -> APR curve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestRateCurve {
    pub points: Vec<CurvePoint>,
}

impl InterestRateCurve {
    pub fn validate(&self) -> Result<()> {
        if self.points.len() < 2 {
            return Err(LendingError::InvalidConfig(
                "interest curve needs at least two breakpoints",
            ));
        }
        if self.points[0].util_bps != 0 {
            return Err(LendingError::InvalidConfig(
                "interest curve must start at zero utilization",
            ));
        }
        if self.points[self.points.len() - 1].util_bps != BPS_PER_ONE {
            return Err(LendingError::InvalidConfig(
                "interest curve must end at full utilization",
            ));
        }
        for pair in self.points.windows(2) {
            if pair[1].util_bps <= pair[0].util_bps {
                return Err(LendingError::InvalidConfig(
                    "interest curve utilization must be strictly increasing",
                ));
            }
            if pair[1].apr_bps < pair[0].apr_bps {
                return Err(LendingError::InvalidConfig(
                    "interest curve APR must be non-decreasing",
                ));
            }
        }
        Ok(())
    }

    /// APR at `utilization`, linearly interpolated between the two
    /// bracketing breakpoints. Utilization is clamped to [0, 1].
    pub fn apr(&self, utilization: Decimal) -> Result<Decimal> {
        let utilization = utilization.min(Decimal::one());
        for pair in self.points.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let right_util = Decimal::from_bps(right.util_bps);
            if utilization > right_util {
                continue;
            }
            let left_util = Decimal::from_bps(left.util_bps);
            let left_apr = Decimal::from_bps(left.apr_bps);
            let right_apr = Decimal::from_bps(right.apr_bps);
            let weight = utilization
                .saturating_sub(left_util)
                .try_div(right_util.try_sub(left_util)?)?;
            return right_apr
                .try_sub(left_apr)?
                .try_mul(weight)?
                .try_add(left_apr);
        }
        // Unreachable for a validated curve; clamp makes the last point the
        // worst case.
        Err(LendingError::MathOverflow)
    }
}

/// Alternate LTV pair applied when this reserve collateralizes a borrow from
/// a designated correlated reserve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmodeOverride {
    /// Counterparty borrow-reserve array index.
    pub borrow_reserve: usize,
    pub open_ltv_pct: u8,
    pub close_ltv_pct: u8,
}

/// Admin-supplied risk parameters for one reserve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveConfig {
    /// Fraction of deposited value that may be borrowed against, percent.
    pub open_ltv_pct: u8,
    /// Deposited-value fraction at which liquidation triggers, percent.
    pub close_ltv_pct: u8,
    /// Risk multiplier on this asset's borrows, bps. At least 10_000.
    pub borrow_weight_bps: u64,
    /// Deposit cap in underlying token units.
    pub deposit_limit: u64,
    /// Borrow cap in underlying token units.
    pub borrow_limit: u64,
    /// Origination fee on borrows, bps.
    pub borrow_fee_bps: u64,
    /// Fraction of accrued interest diverted from depositors, bps.
    pub spread_fee_bps: u64,
    /// Liquidator premium, bps.
    pub liquidation_bonus_bps: u64,
    /// Protocol cut of seized collateral, bps.
    pub protocol_liquidation_fee_bps: u64,
    /// Isolated reserves restrict borrowers to a single borrow record.
    pub isolated: bool,
    /// Price readings older than this are unusable, seconds.
    pub max_price_staleness_secs: u64,
    pub interest_rate: InterestRateCurve,
    /// E-mode overrides keyed by counterparty reserve index.
    #[serde(default)]
    pub emode: Vec<EmodeOverride>,
}

impl ReserveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.open_ltv_pct > self.close_ltv_pct {
            return Err(LendingError::InvalidConfig(
                "open LTV must not exceed close LTV",
            ));
        }
        if self.close_ltv_pct > 100 {
            return Err(LendingError::InvalidConfig("close LTV must be at most 100%"));
        }
        if self.borrow_weight_bps < BPS_PER_ONE {
            return Err(LendingError::InvalidConfig(
                "borrow weight must be at least 1",
            ));
        }
        if self.borrow_fee_bps >= BPS_PER_ONE {
            return Err(LendingError::InvalidConfig("borrow fee must be below 100%"));
        }
        if self.spread_fee_bps > BPS_PER_ONE {
            return Err(LendingError::InvalidConfig(
                "spread fee must be at most 100%",
            ));
        }
        if self.liquidation_bonus_bps + self.protocol_liquidation_fee_bps > BPS_PER_ONE {
            return Err(LendingError::InvalidConfig(
                "liquidation premium must be at most 100%",
            ));
        }
        if self.isolated && (self.open_ltv_pct != 0 || self.close_ltv_pct != 0) {
            return Err(LendingError::InvalidConfig(
                "isolated reserves cannot be collateral",
            ));
        }
        if self.max_price_staleness_secs == 0 {
            return Err(LendingError::InvalidConfig(
                "price staleness bound must be positive",
            ));
        }
        self.interest_rate.validate()?;
        for (i, o) in self.emode.iter().enumerate() {
            if o.open_ltv_pct > o.close_ltv_pct || o.close_ltv_pct > 100 {
                return Err(LendingError::InvalidConfig("malformed e-mode override"));
            }
            if self.emode[..i].iter().any(|p| p.borrow_reserve == o.borrow_reserve) {
                return Err(LendingError::InvalidConfig(
                    "duplicate e-mode counterparty",
                ));
            }
        }
        Ok(())
    }
}

/// Amounts settled by a borrow: the position owes `total_owed`, the ledger
/// transfers `receive_amount` to the borrower, and `fee` goes to the
/// origination fee pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BorrowSettlement {
    pub total_owed: u64,
    pub receive_amount: u64,
    pub fee: u64,
}

/// One single-asset liquidity pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    /// Stable array index; obligation records refer to reserves by it. Never
    /// reused or reordered.
    pub index: usize,
    /// Opaque coin identity owned by the ledger collaborator.
    pub coin: String,
    /// Decimal precision of the underlying asset.
    pub mint_decimals: u8,
    pub config: ReserveConfig,

    /// Spot price in USD per whole token.
    pub price: Decimal,
    pub price_lower: Decimal,
    pub price_upper: Decimal,
    pub price_last_update: u64,

    /// Monotonically non-decreasing compounding index, starts at 1.
    pub cumulative_borrow_rate: Decimal,
    /// Principal plus accrued interest across all borrowers.
    pub borrowed_amount: Decimal,
    /// Liquidity on hand, integer token units.
    pub available_amount: u64,
    /// Receipt token supply; changes only via mint-on-deposit and
    /// burn-on-redeem.
    pub ctoken_supply: u64,

    /// Borrow origination fees awaiting claim, underlying units.
    pub origination_fee_pool: u64,
    /// Spread carve-out of accrued interest, underlying units. Excluded from
    /// the ctoken exchange ratio.
    pub spread_fee_pool: Decimal,
    /// Protocol's cut of seized collateral, receipt-token units.
    pub liquidation_fee_pool: u64,

    pub last_interest_update: u64,
}

impl Reserve {
    pub fn new(
        index: usize,
        coin: impl Into<String>,
        mint_decimals: u8,
        config: ReserveConfig,
        now: u64,
    ) -> Result<Self> {
        config.validate()?;
        if mint_decimals > 18 {
            return Err(LendingError::InvalidConfig("at most 18 mint decimals"));
        }
        Ok(Self {
            index,
            coin: coin.into(),
            mint_decimals,
            config,
            price: Decimal::zero(),
            price_lower: Decimal::zero(),
            price_upper: Decimal::zero(),
            price_last_update: 0,
            cumulative_borrow_rate: Decimal::one(),
            borrowed_amount: Decimal::zero(),
            available_amount: 0,
            ctoken_supply: 0,
            origination_fee_pool: 0,
            spread_fee_pool: Decimal::zero(),
            liquidation_fee_pool: 0,
            last_interest_update: now,
        })
    }

    /// Replace the risk parameters. Interest must be compounded to `now`
    /// first so the old curve prices the elapsed interval.
    pub fn set_config(&mut self, config: ReserveConfig, now: u64) -> Result<()> {
        config.validate()?;
        self.compound_interest(now)?;
        self.config = config;
        Ok(())
    }

    fn token_scale(&self) -> Decimal {
        Decimal::from(10u64.pow(self.mint_decimals as u32))
    }

    /// borrowed / (borrowed + available); zero on an empty pool.
    pub fn utilization(&self) -> Result<Decimal> {
        let denom = self.borrowed_amount.try_add(Decimal::from(self.available_amount))?;
        if denom == Decimal::zero() {
            return Ok(Decimal::zero());
        }
        self.borrowed_amount.try_div(denom)
    }

    /// Borrow APR at the current utilization.
    pub fn current_apr(&self) -> Result<Decimal> {
        self.config.interest_rate.apr(self.utilization()?)
    }

    /// Compound the borrow index and the outstanding debt over the elapsed
    /// seconds. Every code path that reads `borrowed_amount` must have
    /// compounded at the current timestamp first.
    pub fn compound_interest(&mut self, now: u64) -> Result<()> {
        let elapsed = now
            .checked_sub(self.last_interest_update)
            .ok_or(LendingError::MathOverflow)?;
        if elapsed == 0 {
            return Ok(());
        }

        let apr = self.current_apr()?;
        let per_second = apr.try_div(Decimal::from(SECONDS_PER_YEAR))?;
        let factor = Decimal::one().try_add(per_second)?.try_pow(elapsed)?;

        self.cumulative_borrow_rate = self.cumulative_borrow_rate.try_mul(factor)?;

        let net_new_debt = self
            .borrowed_amount
            .try_mul(factor)?
            .try_sub(self.borrowed_amount)?;
        let spread = net_new_debt.try_mul(Decimal::from_bps(self.config.spread_fee_bps))?;
        self.spread_fee_pool = self.spread_fee_pool.try_add(spread)?;
        self.borrowed_amount = self.borrowed_amount.try_add(net_new_debt)?;

        self.last_interest_update = now;
        Ok(())
    }

    /// Accept a validated oracle reading.
    pub fn update_price(&mut self, reading: OracleReading) -> Result<()> {
        reading.check()?;
        self.price = reading.spot;
        self.price_lower = reading.lower_bound;
        self.price_upper = reading.upper_bound;
        self.price_last_update = reading.timestamp;
        Ok(())
    }

    /// Fail unless the cached price is recent enough to act on.
    pub fn assert_price_is_fresh(&self, now: u64) -> Result<()> {
        if self.price == Decimal::zero() {
            return Err(LendingError::StalePrice);
        }
        let age = now
            .checked_sub(self.price_last_update)
            .ok_or(LendingError::StalePrice)?;
        if age > self.config.max_price_staleness_secs {
            warn!(
                "reserve {} price is {}s old (max {})",
                self.index, age, self.config.max_price_staleness_secs
            );
            return Err(LendingError::StalePrice);
        }
        Ok(())
    }

    /// Liquidity backing depositors: available plus borrowed, minus the
    /// spread carve-out (which belongs to the protocol, not to ctoken
    /// holders).
    pub fn total_supply(&self) -> Result<Decimal> {
        Decimal::from(self.available_amount)
            .try_add(self.borrowed_amount)?
            .try_sub(self.spread_fee_pool)
    }

    /// Underlying per ctoken; 1:1 on an empty pool, non-decreasing as
    /// interest accrues.
    pub fn ctoken_ratio(&self) -> Result<Decimal> {
        if self.ctoken_supply == 0 {
            return Ok(Decimal::one());
        }
        self.total_supply()?.try_div(Decimal::from(self.ctoken_supply))
    }

    /// Record a deposit, returning the ctokens to mint (floor).
    pub fn deposit_liquidity_and_mint_ctokens(&mut self, amount: u64) -> Result<u64> {
        if amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        let new_total = self.total_supply()?.try_add(Decimal::from(amount))?;
        if new_total > Decimal::from(self.config.deposit_limit) {
            return Err(LendingError::DepositLimitExceeded);
        }
        let ctoken_amount = Decimal::from(amount)
            .try_div(self.ctoken_ratio()?)?
            .try_floor_u64()?;
        if ctoken_amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        self.available_amount = self
            .available_amount
            .checked_add(amount)
            .ok_or(LendingError::MathOverflow)?;
        self.ctoken_supply = self
            .ctoken_supply
            .checked_add(ctoken_amount)
            .ok_or(LendingError::MathOverflow)?;
        Ok(ctoken_amount)
    }

    /// Burn ctokens, returning the underlying to pay out (floor), bounded by
    /// available liquidity.
    pub fn redeem_ctokens(&mut self, ctoken_amount: u64) -> Result<u64> {
        if ctoken_amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        if ctoken_amount > self.ctoken_supply {
            return Err(LendingError::InsufficientLiquidity);
        }
        let liquidity_amount = Decimal::from(ctoken_amount)
            .try_mul(self.ctoken_ratio()?)?
            .try_floor_u64()?;
        if liquidity_amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        if liquidity_amount > self.available_amount {
            warn!(
                "reserve {} redeem of {} exceeds available {}",
                self.index, liquidity_amount, self.available_amount
            );
            return Err(LendingError::InsufficientLiquidity);
        }
        self.ctoken_supply -= ctoken_amount;
        self.available_amount -= liquidity_amount;
        Ok(liquidity_amount)
    }

    /// Record a borrow of `requested` underlying. The origination fee is
    /// levied on top (ceil) and owed by the position.
    pub fn borrow_liquidity(&mut self, requested: u64) -> Result<BorrowSettlement> {
        if requested == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        let fee = Decimal::from(requested)
            .try_mul(Decimal::from_bps(self.config.borrow_fee_bps))?
            .try_ceil_u64()?;
        let total_owed = requested.checked_add(fee).ok_or(LendingError::MathOverflow)?;
        if total_owed > self.available_amount {
            return Err(LendingError::InsufficientLiquidity);
        }
        let new_borrowed = self.borrowed_amount.try_add(Decimal::from(total_owed))?;
        if new_borrowed > Decimal::from(self.config.borrow_limit) {
            warn!(
                "reserve {} borrow of {} would exceed borrow cap",
                self.index, total_owed
            );
            return Err(LendingError::BorrowLimitExceeded);
        }
        self.available_amount -= total_owed;
        self.borrowed_amount = new_borrowed;
        self.origination_fee_pool = self
            .origination_fee_pool
            .checked_add(fee)
            .ok_or(LendingError::MathOverflow)?;
        Ok(BorrowSettlement {
            total_owed,
            receive_amount: requested,
            fee,
        })
    }

    /// Record a repayment: `repay_amount` integer units collected from the
    /// borrower, `settle_amount` exact debt extinguished.
    pub fn repay_liquidity(&mut self, repay_amount: u64, settle_amount: Decimal) -> Result<()> {
        self.available_amount = self
            .available_amount
            .checked_add(repay_amount)
            .ok_or(LendingError::MathOverflow)?;
        let settle = settle_amount.min(self.borrowed_amount);
        self.borrowed_amount = self.borrowed_amount.try_sub(settle)?;
        Ok(())
    }

    /// Write down bad debt, socializing the loss across ctoken holders.
    pub fn forgive_debt(&mut self, amount: Decimal) -> Result<()> {
        let amount = amount.min(self.borrowed_amount);
        self.borrowed_amount = self.borrowed_amount.try_sub(amount)?;
        Ok(())
    }

    /// Pay out accumulated spread fees, bounded by available liquidity.
    /// Returns the integer amount for the ledger to transfer.
    pub fn claim_spread_fees(&mut self) -> Result<u64> {
        let claimable = self
            .spread_fee_pool
            .try_floor_u64()?
            .min(self.available_amount);
        self.spread_fee_pool = self.spread_fee_pool.try_sub(Decimal::from(claimable))?;
        self.available_amount -= claimable;
        Ok(claimable)
    }

    /// Drain the origination fee pool. The underlying units were debited
    /// from available liquidity when each borrow was recorded.
    pub fn claim_origination_fees(&mut self) -> u64 {
        core::mem::take(&mut self.origination_fee_pool)
    }

    /// USD value of `amount` underlying at the spot price.
    pub fn market_value(&self, amount: Decimal) -> Result<Decimal> {
        amount.try_mul(self.price)?.try_div(self.token_scale())
    }

    /// USD value at the confidence upper bound. Gates new borrows and
    /// withdrawals before prices move against the protocol.
    pub fn market_value_upper_bound(&self, amount: Decimal) -> Result<Decimal> {
        amount.try_mul(self.price_upper)?.try_div(self.token_scale())
    }

    /// USD value at the confidence lower bound. Discounts collateral.
    pub fn market_value_lower_bound(&self, amount: Decimal) -> Result<Decimal> {
        amount.try_mul(self.price_lower)?.try_div(self.token_scale())
    }

    /// USD value of `ctoken_amount` receipt tokens at the spot price.
    pub fn ctoken_market_value(&self, ctoken_amount: u64) -> Result<Decimal> {
        let liquidity = Decimal::from(ctoken_amount).try_mul(self.ctoken_ratio()?)?;
        self.market_value(liquidity)
    }

    /// USD value of receipt tokens at the lower price bound.
    pub fn ctoken_market_value_lower_bound(&self, ctoken_amount: u64) -> Result<Decimal> {
        let liquidity = Decimal::from(ctoken_amount).try_mul(self.ctoken_ratio()?)?;
        self.market_value_lower_bound(liquidity)
    }

    /// Convert a USD value into underlying tokens, using the upper price
    /// bound so the token amount is a lower bound.
    pub fn usd_to_token_amount_lower_bound(&self, usd: Decimal) -> Result<Decimal> {
        usd.try_mul(self.token_scale())?.try_div(self.price_upper)
    }

    /// 1 + liquidator bonus + protocol liquidation fee.
    pub fn liquidation_premium_rate(&self) -> Result<Decimal> {
        Decimal::one()
            .try_add(Decimal::from_bps(self.config.liquidation_bonus_bps))?
            .try_add(Decimal::from_bps(self.config.protocol_liquidation_fee_bps))
    }

    /// Split a gross seized ctoken amount into the protocol's cut (ceil,
    /// routed to the liquidation fee pool) and the liquidator's remainder.
    pub fn deduct_liquidation_fee(&mut self, ctoken_amount: u64) -> Result<(u64, u64)> {
        let fee_rate = Decimal::from_bps(self.config.protocol_liquidation_fee_bps);
        let protocol_fee = Decimal::from(ctoken_amount)
            .try_mul(fee_rate)?
            .try_div(self.liquidation_premium_rate()?)?
            .try_ceil_u64()?
            .min(ctoken_amount);
        self.liquidation_fee_pool = self
            .liquidation_fee_pool
            .checked_add(protocol_fee)
            .ok_or(LendingError::MathOverflow)?;
        Ok((protocol_fee, ctoken_amount - protocol_fee))
    }

    /// Borrow weight as a Decimal, at least 1.
    pub fn borrow_weight(&self) -> Decimal {
        Decimal::from_bps(self.config.borrow_weight_bps)
    }

    pub fn open_ltv(&self) -> Decimal {
        Decimal::from_percent(self.config.open_ltv_pct)
    }

    pub fn close_ltv(&self) -> Decimal {
        Decimal::from_percent(self.config.close_ltv_pct)
    }

    /// E-mode LTV pair against a counterparty borrow reserve, if declared.
    pub fn emode_ltvs(&self, borrow_reserve: usize) -> Option<(Decimal, Decimal)> {
        self.config
            .emode
            .iter()
            .find(|o| o.borrow_reserve == borrow_reserve)
            .map(|o| {
                (
                    Decimal::from_percent(o.open_ltv_pct),
                    Decimal::from_percent(o.close_ltv_pct),
                )
            })
    }

    /// Largest additional borrow the reserve itself can absorb (cap and
    /// liquidity). Callers intersect with obligation health and the market
    /// rate limiter.
    pub fn max_borrow_amount(&self) -> Result<u64> {
        let cap_room = Decimal::from(self.config.borrow_limit)
            .saturating_sub(self.borrowed_amount)
            .try_floor_u64()?;
        Ok(cap_room.min(self.available_amount))
    }

    /// Largest additional deposit the reserve can absorb under its cap.
    pub fn max_deposit_amount(&self) -> Result<u64> {
        Decimal::from(self.config.deposit_limit)
            .saturating_sub(self.total_supply()?)
            .try_floor_u64()
    }
}
