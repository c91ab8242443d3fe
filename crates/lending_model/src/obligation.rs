//! Per-borrower position accounting: health refresh, borrow, repay,
//! withdraw, liquidation, and debt forgiveness.
//!
//! `refresh` is mandatory in the same atomic operation before `borrow`,
//! `withdraw`, or `liquidate`. `deposit` and `repay` update the aggregates
//! incrementally without requiring fresh prices - an intentional relaxation:
//! those paths only tighten safety, never loosen it.
//!
//! Mutating operations are all-or-nothing: preconditions and candidate
//! aggregates are evaluated before the first committed write, so a failed
//! call leaves the obligation exactly as it was.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;
use crate::error::{LendingError, Result};
use crate::reserve::Reserve;
use crate::rewards::{self, RewardPolicy, RewardShare};

/// Fraction of the weighted borrow value liquidatable per call, percent.
pub const LIQUIDATION_CLOSE_FACTOR_PCT: u8 = 20;

/// Borrows at or below this USD value are closed out entirely.
pub fn full_liquidation_threshold() -> Decimal {
    Decimal::one()
}

/// Collateral position in a single reserve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Reserve array index.
    pub reserve: usize,
    /// Receipt tokens held.
    pub ctoken_amount: u64,
    /// Cached USD value at the spot price, recomputed on refresh.
    pub market_value: Decimal,
}

/// Borrow position in a single reserve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrow {
    /// Reserve array index.
    pub reserve: usize,
    /// Outstanding principal plus accrued interest, underlying units.
    pub borrowed_amount: Decimal,
    /// Snapshot of the reserve's cumulative borrow index at last
    /// interaction.
    pub cumulative_borrow_rate: Decimal,
    /// Cached USD value at the spot price, recomputed on refresh.
    pub market_value: Decimal,
}

/// Amounts settled by a liquidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiquidationSettlement {
    /// Receipt tokens seized from the position (gross, before the protocol
    /// fee split).
    pub ctokens_seized: u64,
    /// Debt extinguished, underlying units. The ledger collects exactly
    /// `repaid.try_ceil_u64()` from the liquidator.
    pub repaid: Decimal,
}

/// One borrower's aggregate position within a market.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    /// At most one record per reserve; removed when the amount reaches
    /// exactly zero.
    pub deposits: Vec<Deposit>,
    pub borrows: Vec<Borrow>,

    /// Sum of deposit values, spot price.
    pub deposited_value: Decimal,
    /// Sum of deposit value x open LTV, lower price bound, e-mode blended.
    pub allowed_borrow_value: Decimal,
    /// Sum of deposit value x close LTV, spot price, e-mode blended.
    pub unhealthy_borrow_value: Decimal,
    /// Sum of borrow values, spot price.
    pub unweighted_borrowed_value: Decimal,
    /// Sum of borrow value x borrow weight, spot price.
    pub weighted_borrowed_value: Decimal,
    /// Sum of borrow value x borrow weight, upper price bound.
    pub weighted_borrowed_value_upper_bound: Decimal,

    /// Whether any borrow is against an isolated reserve.
    pub borrowing_isolated_asset: bool,

    /// Lazily-grown share arena for the reward distributor.
    pub reward_shares: Vec<RewardShare>,
}

impl Obligation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_deposit(&self, reserve: usize) -> Option<usize> {
        self.deposits.iter().position(|d| d.reserve == reserve)
    }

    pub fn find_borrow(&self, reserve: usize) -> Option<usize> {
        self.borrows.iter().position(|b| b.reserve == reserve)
    }

    /// `weighted_borrowed_value_upper_bound <= allowed_borrow_value`.
    /// Enforced after every borrow and withdraw.
    pub fn is_healthy(&self) -> bool {
        self.weighted_borrowed_value_upper_bound <= self.allowed_borrow_value
    }

    /// `weighted_borrowed_value (spot) > unhealthy_borrow_value`. Spot is
    /// deliberate: the forward-looking health gate uses the upper price
    /// bound, but actual liquidation eligibility must not be overly
    /// conservative.
    pub fn is_liquidatable(&self) -> bool {
        self.weighted_borrowed_value > self.unhealthy_borrow_value
    }

    /// Bad debt may only be forgiven once no collateral remains.
    pub fn is_forgivable(&self) -> bool {
        self.deposits.is_empty()
    }

    /// Recompute every borrow's compounded debt, every cached market value,
    /// and all aggregate sums from scratch. Idempotent. Fails if any touched
    /// reserve's price is stale.
    pub fn refresh(&mut self, reserves: &[Reserve], now: u64) -> Result<()> {
        let mut unweighted = Decimal::zero();
        let mut weighted = Decimal::zero();
        let mut weighted_upper = Decimal::zero();
        let mut borrowing_isolated = false;

        for borrow in self.borrows.iter_mut() {
            let reserve = reserves.get(borrow.reserve).ok_or(LendingError::RecordNotFound)?;
            reserve.assert_price_is_fresh(now)?;

            // Compound this borrow's debt by the index ratio since its last
            // interaction.
            if reserve.cumulative_borrow_rate > borrow.cumulative_borrow_rate {
                borrow.borrowed_amount = borrow
                    .borrowed_amount
                    .try_mul(reserve.cumulative_borrow_rate)?
                    .try_div(borrow.cumulative_borrow_rate)?;
                borrow.cumulative_borrow_rate = reserve.cumulative_borrow_rate;
            }

            borrow.market_value = reserve.market_value(borrow.borrowed_amount)?;
            let upper_value = reserve.market_value_upper_bound(borrow.borrowed_amount)?;
            let weight = reserve.borrow_weight();

            unweighted = unweighted.try_add(borrow.market_value)?;
            weighted = weighted.try_add(borrow.market_value.try_mul(weight)?)?;
            weighted_upper = weighted_upper.try_add(upper_value.try_mul(weight)?)?;
            borrowing_isolated |= reserve.config.isolated;
        }

        // Residual weighted value per borrow, consumed by the e-mode walk.
        let mut residual_weighted: Vec<Decimal> = Vec::with_capacity(self.borrows.len());
        for borrow in self.borrows.iter() {
            let reserve = reserves.get(borrow.reserve).ok_or(LendingError::RecordNotFound)?;
            residual_weighted.push(borrow.market_value.try_mul(reserve.borrow_weight())?);
        }

        let mut deposited = Decimal::zero();
        let mut allowed = Decimal::zero();
        let mut unhealthy = Decimal::zero();

        for deposit in self.deposits.iter_mut() {
            let reserve = reserves.get(deposit.reserve).ok_or(LendingError::RecordNotFound)?;
            reserve.assert_price_is_fresh(now)?;

            deposit.market_value = reserve.ctoken_market_value(deposit.ctoken_amount)?;
            let lower_value = reserve.ctoken_market_value_lower_bound(deposit.ctoken_amount)?;
            deposited = deposited.try_add(deposit.market_value)?;

            if deposit.market_value == Decimal::zero() {
                continue;
            }
            // Collateral discount: the allowed-borrow term prices this
            // deposit at the lower bound.
            let lower_ratio = lower_value.try_div(deposit.market_value)?;

            // E-mode blend: walk borrows most-recent-first, allocating this
            // deposit's value to override LTVs up to each borrow's residual
            // weighted value, without double-counting across deposits.
            let mut remaining = deposit.market_value;
            for (i, borrow) in self.borrows.iter().enumerate().rev() {
                if remaining == Decimal::zero() {
                    break;
                }
                let (emode_open, emode_close) = match reserve.emode_ltvs(borrow.reserve) {
                    Some(ltvs) => ltvs,
                    None => continue,
                };
                let alloc = remaining.min(residual_weighted[i]);
                if alloc == Decimal::zero() {
                    continue;
                }
                allowed = allowed.try_add(alloc.try_mul(lower_ratio)?.try_mul(emode_open)?)?;
                unhealthy = unhealthy.try_add(alloc.try_mul(emode_close)?)?;
                residual_weighted[i] = residual_weighted[i].saturating_sub(alloc);
                remaining = remaining.saturating_sub(alloc);
            }

            // Remainder of the deposit's value at the reserve's normal LTVs.
            allowed = allowed.try_add(
                remaining
                    .try_mul(lower_ratio)?
                    .try_mul(reserve.open_ltv())?,
            )?;
            unhealthy = unhealthy.try_add(remaining.try_mul(reserve.close_ltv())?)?;
        }

        self.deposited_value = deposited;
        self.allowed_borrow_value = allowed;
        self.unhealthy_borrow_value = unhealthy;
        self.unweighted_borrowed_value = unweighted;
        self.weighted_borrowed_value = weighted;
        self.weighted_borrowed_value_upper_bound = weighted_upper;
        self.borrowing_isolated_asset = borrowing_isolated;
        Ok(())
    }

    /// Add receipt tokens to the position. Updates the aggregates
    /// incrementally with the reserve's cached prices; no freshness
    /// requirement, since a deposit can only make the position safer.
    pub fn deposit(&mut self, reserve: &Reserve, ctoken_amount: u64) -> Result<()> {
        if ctoken_amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        if self.find_borrow(reserve.index).is_some() {
            return Err(LendingError::DepositBorrowSameAsset);
        }

        let added_value = reserve.ctoken_market_value(ctoken_amount)?;
        let added_lower = reserve.ctoken_market_value_lower_bound(ctoken_amount)?;
        let allowed_add = added_lower.try_mul(reserve.open_ltv())?;
        let unhealthy_add = added_value.try_mul(reserve.close_ltv())?;

        let idx = match self.find_deposit(reserve.index) {
            Some(idx) => idx,
            None => {
                self.deposits.push(Deposit {
                    reserve: reserve.index,
                    ctoken_amount: 0,
                    market_value: Decimal::zero(),
                });
                self.deposits.len() - 1
            }
        };
        let deposit = &mut self.deposits[idx];
        deposit.ctoken_amount = deposit
            .ctoken_amount
            .checked_add(ctoken_amount)
            .ok_or(LendingError::MathOverflow)?;
        deposit.market_value = deposit.market_value.try_add(added_value)?;

        self.deposited_value = self.deposited_value.try_add(added_value)?;
        self.allowed_borrow_value = self.allowed_borrow_value.try_add(allowed_add)?;
        self.unhealthy_borrow_value = self.unhealthy_borrow_value.try_add(unhealthy_add)?;
        Ok(())
    }

    /// Add `amount` underlying (principal plus any origination fee) to the
    /// matching borrow record. Requires a prior same-transaction `refresh`;
    /// asserts health and the isolation rule before committing.
    pub fn borrow(&mut self, reserve: &Reserve, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        if self.find_deposit(reserve.index).is_some() {
            return Err(LendingError::DepositBorrowSameAsset);
        }

        let existing = self.find_borrow(reserve.index);
        let record_count = self.borrows.len() + usize::from(existing.is_none());
        if (reserve.config.isolated || self.borrowing_isolated_asset) && record_count > 1 {
            return Err(LendingError::IsolatedAssetViolation);
        }

        let value = reserve.market_value(Decimal::from(amount))?;
        let value_upper = reserve.market_value_upper_bound(Decimal::from(amount))?;
        let weight = reserve.borrow_weight();
        let weighted_add = value.try_mul(weight)?;
        let weighted_upper_add = value_upper.try_mul(weight)?;

        let new_weighted_upper = self
            .weighted_borrowed_value_upper_bound
            .try_add(weighted_upper_add)?;
        if new_weighted_upper > self.allowed_borrow_value {
            debug!(
                "borrow of {} on reserve {} rejected: {} > {}",
                amount, reserve.index, new_weighted_upper, self.allowed_borrow_value
            );
            return Err(LendingError::InsufficientHealth);
        }

        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.borrows.push(Borrow {
                    reserve: reserve.index,
                    borrowed_amount: Decimal::zero(),
                    cumulative_borrow_rate: reserve.cumulative_borrow_rate,
                    market_value: Decimal::zero(),
                });
                self.borrows.len() - 1
            }
        };
        let borrow = &mut self.borrows[idx];
        borrow.borrowed_amount = borrow.borrowed_amount.try_add(Decimal::from(amount))?;
        borrow.market_value = borrow.market_value.try_add(value)?;

        self.unweighted_borrowed_value = self.unweighted_borrowed_value.try_add(value)?;
        self.weighted_borrowed_value = self.weighted_borrowed_value.try_add(weighted_add)?;
        self.weighted_borrowed_value_upper_bound = new_weighted_upper;
        self.borrowing_isolated_asset |= reserve.config.isolated;
        Ok(())
    }

    /// Compound one borrow to the reserve's current index, crediting the
    /// interest delta to the cached value and the borrow sums.
    fn accrue_borrow(&mut self, idx: usize, reserve: &Reserve) -> Result<()> {
        let borrow = &mut self.borrows[idx];
        if reserve.cumulative_borrow_rate <= borrow.cumulative_borrow_rate {
            return Ok(());
        }
        let new_amount = borrow
            .borrowed_amount
            .try_mul(reserve.cumulative_borrow_rate)?
            .try_div(borrow.cumulative_borrow_rate)?;
        let delta = new_amount.try_sub(borrow.borrowed_amount)?;
        borrow.borrowed_amount = new_amount;
        borrow.cumulative_borrow_rate = reserve.cumulative_borrow_rate;

        let delta_value = reserve.market_value(delta)?;
        let delta_upper = reserve.market_value_upper_bound(delta)?;
        let weight = reserve.borrow_weight();
        borrow.market_value = borrow.market_value.try_add(delta_value)?;
        self.unweighted_borrowed_value = self.unweighted_borrowed_value.try_add(delta_value)?;
        self.weighted_borrowed_value = self
            .weighted_borrowed_value
            .try_add(delta_value.try_mul(weight)?)?;
        self.weighted_borrowed_value_upper_bound = self
            .weighted_borrowed_value_upper_bound
            .try_add(delta_upper.try_mul(weight)?)?;
        Ok(())
    }

    /// Reduce one borrow by up to `max_settle`, subtracting the settled
    /// value from the borrow sums and dropping the record at exactly zero.
    /// Returns the amount settled.
    fn settle_borrow(&mut self, idx: usize, reserve: &Reserve, max_settle: Decimal) -> Result<Decimal> {
        self.accrue_borrow(idx, reserve)?;

        let borrow = &mut self.borrows[idx];
        let settle_amount = max_settle.min(borrow.borrowed_amount);
        if settle_amount == Decimal::zero() {
            return Err(LendingError::AmountTooSmall);
        }

        let value = reserve.market_value(settle_amount)?;
        let value_upper = reserve.market_value_upper_bound(settle_amount)?;
        let weight = reserve.borrow_weight();

        borrow.borrowed_amount = borrow.borrowed_amount.try_sub(settle_amount)?;
        borrow.market_value = borrow.market_value.saturating_sub(value);

        self.unweighted_borrowed_value = self.unweighted_borrowed_value.saturating_sub(value);
        self.weighted_borrowed_value = self
            .weighted_borrowed_value
            .saturating_sub(value.try_mul(weight)?);
        self.weighted_borrowed_value_upper_bound = self
            .weighted_borrowed_value_upper_bound
            .saturating_sub(value_upper.try_mul(weight)?);

        if self.borrows[idx].borrowed_amount == Decimal::zero() {
            self.borrows.swap_remove(idx);
            self.borrowing_isolated_asset = false;
        }
        Ok(settle_amount)
    }

    /// Repay up to `max_repay_amount` of the borrow. No freshness
    /// requirement (repaying only tightens safety). Returns the exact
    /// amount repaid; the ledger collects `repaid.try_ceil_u64()` units.
    pub fn repay(&mut self, reserve: &Reserve, max_repay_amount: Decimal) -> Result<Decimal> {
        if max_repay_amount == Decimal::zero() {
            return Err(LendingError::AmountTooSmall);
        }
        let idx = self
            .find_borrow(reserve.index)
            .ok_or(LendingError::RecordNotFound)?;
        self.settle_borrow(idx, reserve, max_repay_amount)
    }

    /// Write down up to `max_amount` of bad debt. Only once the position
    /// holds no collateral at all; the loss is socialized by the reserve.
    pub fn forgive(&mut self, reserve: &Reserve, max_amount: Decimal) -> Result<Decimal> {
        if !self.is_forgivable() {
            return Err(LendingError::NotForgivable);
        }
        if max_amount == Decimal::zero() {
            return Err(LendingError::AmountTooSmall);
        }
        let idx = self
            .find_borrow(reserve.index)
            .ok_or(LendingError::RecordNotFound)?;
        self.settle_borrow(idx, reserve, max_amount)
    }

    /// Remove receipt tokens without the final health assertion. Used by
    /// liquidation, whose position is unhealthy by construction.
    pub fn withdraw_unchecked(&mut self, reserve: &Reserve, ctoken_amount: u64) -> Result<()> {
        if ctoken_amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        let idx = self
            .find_deposit(reserve.index)
            .ok_or(LendingError::RecordNotFound)?;
        let deposit = &mut self.deposits[idx];
        if ctoken_amount > deposit.ctoken_amount {
            return Err(LendingError::WithdrawTooLarge);
        }

        let value = reserve.ctoken_market_value(ctoken_amount)?;
        let value_lower = reserve.ctoken_market_value_lower_bound(ctoken_amount)?;
        let allowed_sub = value_lower.try_mul(reserve.open_ltv())?;
        let unhealthy_sub = value.try_mul(reserve.close_ltv())?;

        deposit.ctoken_amount -= ctoken_amount;
        deposit.market_value = deposit.market_value.saturating_sub(value);

        self.deposited_value = self.deposited_value.saturating_sub(value);
        self.allowed_borrow_value = self.allowed_borrow_value.saturating_sub(allowed_sub);
        self.unhealthy_borrow_value = self.unhealthy_borrow_value.saturating_sub(unhealthy_sub);

        if self.deposits[idx].ctoken_amount == 0 {
            self.deposits.swap_remove(idx);
        }
        Ok(())
    }

    /// Remove receipt tokens from the position. Requires a prior
    /// same-transaction `refresh`; fails without mutating if the withdrawal
    /// would breach the health bound.
    pub fn withdraw(&mut self, reserve: &Reserve, ctoken_amount: u64) -> Result<()> {
        if ctoken_amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        let idx = self
            .find_deposit(reserve.index)
            .ok_or(LendingError::RecordNotFound)?;
        if ctoken_amount > self.deposits[idx].ctoken_amount {
            return Err(LendingError::WithdrawTooLarge);
        }

        let value_lower = reserve.ctoken_market_value_lower_bound(ctoken_amount)?;
        let allowed_sub = value_lower.try_mul(reserve.open_ltv())?;
        let candidate_allowed = self.allowed_borrow_value.saturating_sub(allowed_sub);
        if self.weighted_borrowed_value_upper_bound > candidate_allowed {
            debug!(
                "withdraw of {} ctokens on reserve {} rejected as unhealthy",
                ctoken_amount, reserve.index
            );
            return Err(LendingError::InsufficientHealth);
        }

        self.withdraw_unchecked(reserve, ctoken_amount)
    }

    /// Liquidate an unhealthy position: repay part of one borrow, seize
    /// bonus-inflated collateral from one deposit. Requires a prior
    /// same-transaction `refresh`. The caller settles the returned amounts
    /// against the two reserves (`repay_liquidity`, then the fee split via
    /// `deduct_liquidation_fee`).
    pub fn liquidate(
        &mut self,
        repay_reserve: &Reserve,
        withdraw_reserve: &Reserve,
        max_repay_amount: u64,
    ) -> Result<LiquidationSettlement> {
        if max_repay_amount == 0 {
            return Err(LendingError::AmountTooSmall);
        }
        if !self.is_liquidatable() {
            return Err(LendingError::NotLiquidatable);
        }
        let borrow_idx = self
            .find_borrow(repay_reserve.index)
            .ok_or(LendingError::RecordNotFound)?;
        let deposit_idx = self
            .find_deposit(withdraw_reserve.index)
            .ok_or(LendingError::RecordNotFound)?;
        let borrow = &self.borrows[borrow_idx];
        let deposit = &self.deposits[deposit_idx];
        if borrow.market_value == Decimal::zero() || deposit.market_value == Decimal::zero() {
            return Err(LendingError::AmountTooSmall);
        }

        // Eligible repay: dust-sized borrows close in full; otherwise the
        // close factor and the caller's request cap the amount.
        let full_close = borrow.market_value <= full_liquidation_threshold();
        let eligible = if full_close {
            borrow.borrowed_amount
        } else {
            let close_factor_value = self
                .weighted_borrowed_value
                .try_mul(Decimal::from_percent(LIQUIDATION_CLOSE_FACTOR_PCT))?;
            let capped_value = borrow.market_value.min(close_factor_value);
            let capped_amount = borrow
                .borrowed_amount
                .try_mul(capped_value.try_div(borrow.market_value)?)?;
            capped_amount.min(Decimal::from(max_repay_amount))
        };

        let repay_ratio = eligible.try_div(borrow.borrowed_amount)?;
        let repay_value = borrow.market_value.try_mul(repay_ratio)?;
        let withdraw_value =
            repay_value.try_mul(withdraw_reserve.liquidation_premium_rate()?)?;

        let (final_settle, ctokens_seized) = if deposit.market_value < withdraw_value {
            // Deposit too small to cover the premium: seize it whole and
            // scale the repayment down proportionally.
            let scale = deposit.market_value.try_div(withdraw_value)?;
            (eligible.try_mul(scale)?, deposit.ctoken_amount)
        } else {
            let seized = Decimal::from(deposit.ctoken_amount)
                .try_mul(withdraw_value.try_div(deposit.market_value)?)?;
            // A dust close rounds the seizure up so nothing lingers; a
            // partial liquidation rounds down in the position's favor.
            let seized = if full_close {
                seized.try_ceil_u64()?.min(deposit.ctoken_amount)
            } else {
                seized.try_floor_u64()?
            };
            (eligible, seized)
        };
        if ctokens_seized == 0 || final_settle == Decimal::zero() {
            return Err(LendingError::AmountTooSmall);
        }

        // Settle through the ordinary paths so every invariant and the
        // share accounting stay consistent.
        let repaid = self.settle_borrow(borrow_idx, repay_reserve, final_settle)?;
        self.withdraw_unchecked(withdraw_reserve, ctokens_seized)?;

        Ok(LiquidationSettlement {
            ctokens_seized,
            repaid,
        })
    }

    /// Largest borrow of `reserve` that keeps the position healthy,
    /// accounting for the origination fee and intersected with the
    /// reserve's own cap and liquidity. The market rate limiter bound is
    /// intersected by the caller.
    pub fn max_borrow_amount(&self, reserve: &Reserve) -> Result<u64> {
        let spare = self
            .allowed_borrow_value
            .saturating_sub(self.weighted_borrowed_value_upper_bound);
        let tokens = reserve
            .usd_to_token_amount_lower_bound(spare.try_div(reserve.borrow_weight())?)?;
        let fee_rate = Decimal::from_bps(reserve.config.borrow_fee_bps);
        let after_fee = tokens.try_div(Decimal::one().try_add(fee_rate)?)?;
        Ok(after_fee.try_floor_u64()?.min(reserve.max_borrow_amount()?))
    }

    /// Largest ctoken withdrawal from `reserve` that keeps the position
    /// healthy, intersected with the reserve's redeemable liquidity.
    /// Unconstrained by health when the reserve has zero open LTV or the
    /// position has no borrows.
    pub fn max_withdraw_amount(&self, reserve: &Reserve) -> Result<u64> {
        let idx = match self.find_deposit(reserve.index) {
            Some(idx) => idx,
            None => return Ok(0),
        };
        let held = self.deposits[idx].ctoken_amount;
        let redeemable = Decimal::from(reserve.available_amount)
            .try_div(reserve.ctoken_ratio()?)?
            .try_floor_u64()?;

        if self.borrows.is_empty() || reserve.open_ltv() == Decimal::zero() {
            return Ok(held.min(redeemable));
        }

        // USD contributed to the allowed-borrow value by one ctoken.
        let per_ctoken = reserve
            .market_value_lower_bound(reserve.ctoken_ratio()?)?
            .try_mul(reserve.open_ltv())?;
        if per_ctoken == Decimal::zero() {
            return Ok(held.min(redeemable));
        }
        let spare = self
            .allowed_borrow_value
            .saturating_sub(self.weighted_borrowed_value_upper_bound);
        let by_health = spare.try_div(per_ctoken)?.try_floor_u64()?;
        Ok(by_health.min(held).min(redeemable))
    }

    /// Recompute the reward-share arena. The orchestration layer calls this
    /// after every mutating operation; reward mechanics beyond the share
    /// amounts live with the distributor collaborator.
    pub fn sync_reward_shares(&mut self, policy: &RewardPolicy) -> Result<()> {
        for deposit in self.deposits.iter() {
            let looped = self
                .borrows
                .iter()
                .any(|b| policy.is_correlated_loop(deposit.reserve, b.reserve));
            let share = if looped { 0 } else { deposit.ctoken_amount };
            Self::upsert_share(&mut self.reward_shares, deposit.reserve, |s| {
                s.deposit_share = share;
            });
        }
        for borrow in self.borrows.iter() {
            let looped = self
                .deposits
                .iter()
                .any(|d| policy.is_correlated_loop(d.reserve, borrow.reserve));
            let share = if looped {
                0
            } else {
                rewards::borrow_share(borrow.borrowed_amount, borrow.cumulative_borrow_rate)?
            };
            Self::upsert_share(&mut self.reward_shares, borrow.reserve, |s| {
                s.borrow_share = share;
            });
        }
        // Closed records keep a zeroed arena slot.
        for share in self.reward_shares.iter_mut() {
            if self.deposits.iter().all(|d| d.reserve != share.reserve) {
                share.deposit_share = 0;
            }
            if self.borrows.iter().all(|b| b.reserve != share.reserve) {
                share.borrow_share = 0;
            }
        }
        Ok(())
    }

    fn upsert_share(shares: &mut Vec<RewardShare>, reserve: usize, apply: impl FnOnce(&mut RewardShare)) {
        let idx = match shares.iter().position(|s| s.reserve == reserve) {
            Some(idx) => idx,
            None => {
                shares.push(RewardShare {
                    reserve,
                    ..RewardShare::default()
                });
                shares.len() - 1
            }
        };
        apply(&mut shares[idx]);
    }
}
