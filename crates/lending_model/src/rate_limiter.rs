//! Sliding-window cap on aggregate fund outflow.
//!
//! Three logical windows of fixed duration: current, previous, and
//! everything older (which collapses to zero). The previous window's
//! contribution decays linearly as the current window ages, which smooths
//! bucket-boundary gaming with O(1) state and O(1) updates.

use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;
use crate::error::{LendingError, Result};

/// Admin-supplied limiter parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Window length in seconds. Must be nonzero.
    pub window_duration: u64,
    /// Maximum decayed outflow per window, in USD value.
    pub max_outflow: u64,
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_duration == 0 {
            return Err(LendingError::InvalidConfig(
                "rate limiter window duration must be positive",
            ));
        }
        Ok(())
    }
}

/// One limiter per market, consulted on every borrow and withdraw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    /// Start of the current window.
    window_start: u64,
    /// Quantity admitted in the current window.
    cur_qty: Decimal,
    /// Quantity admitted in the previous window.
    prev_qty: Decimal,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, now: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            window_start: now,
            cur_qty: Decimal::zero(),
            prev_qty: Decimal::zero(),
        })
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Replace the limiter parameters and restart the window.
    pub fn set_config(&mut self, config: RateLimiterConfig, now: u64) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.window_start = now;
        self.cur_qty = Decimal::zero();
        self.prev_qty = Decimal::zero();
        Ok(())
    }

    /// Slide the window pair forward so that `now` falls inside the current
    /// window. `now` must not move backwards.
    fn roll(&mut self, now: u64) -> Result<()> {
        if now < self.window_start {
            return Err(LendingError::MathOverflow);
        }
        let d = self.config.window_duration;
        let elapsed = now - self.window_start;
        if elapsed >= 2 * d {
            self.window_start = now;
            self.prev_qty = Decimal::zero();
            self.cur_qty = Decimal::zero();
        } else if elapsed >= d {
            self.window_start += d;
            self.prev_qty = self.cur_qty;
            self.cur_qty = Decimal::zero();
        }
        Ok(())
    }

    /// Decayed outflow attributable to the window pair at `now`:
    /// `prev * (D - (now - start + 1)) / D + cur`.
    pub fn current_outflow(&mut self, now: u64) -> Result<Decimal> {
        self.roll(now)?;
        let d = self.config.window_duration;
        let into_window = now - self.window_start + 1;
        let prev_weight = Decimal::from(d)
            .try_sub(Decimal::from(into_window))?
            .try_div(Decimal::from(d))?;
        self.prev_qty.try_mul(prev_weight)?.try_add(self.cur_qty)
    }

    /// Admit `qty` at time `now`, or fail with `RateLimitExceeded` and leave
    /// the limiter unchanged apart from the window roll.
    pub fn process_qty(&mut self, now: u64, qty: Decimal) -> Result<()> {
        self.roll(now)?;
        self.cur_qty = self.cur_qty.try_add(qty)?;
        let outflow = self.current_outflow(now)?;
        if outflow > Decimal::from(self.config.max_outflow) {
            self.cur_qty = self.cur_qty.saturating_sub(qty);
            return Err(LendingError::RateLimitExceeded);
        }
        Ok(())
    }

    /// How much more outflow the window pair can absorb at `now`. Callers
    /// intersect this with per-reserve and per-obligation bounds when sizing
    /// a maximum borrow or withdraw.
    pub fn remaining_outflow(&mut self, now: u64) -> Result<Decimal> {
        let outflow = self.current_outflow(now)?;
        Ok(Decimal::from(self.config.max_outflow).saturating_sub(outflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window: u64, max: u64) -> RateLimiter {
        RateLimiter::new(
            RateLimiterConfig {
                window_duration: window,
                max_outflow: max,
            },
            0,
        )
        .unwrap()
    }

    #[test]
    fn rejects_zero_window() {
        assert!(RateLimiter::new(
            RateLimiterConfig {
                window_duration: 0,
                max_outflow: 1,
            },
            0,
        )
        .is_err());
    }

    #[test]
    fn window_example() {
        // The worked example: window 10, max 100.
        let mut rl = limiter(10, 100);
        rl.process_qty(0, Decimal::from(100)).unwrap();
        for t in 0..10 {
            assert_eq!(rl.clone().current_outflow(t).unwrap(), Decimal::from(100));
        }

        // Decay of the previous window admits 10 per second afterwards.
        for t in 10..19 {
            rl.process_qty(t, Decimal::from(10)).unwrap();
        }

        // Two full windows later everything has decayed away.
        rl.process_qty(100, Decimal::from(100)).unwrap();
    }

    #[test]
    fn overflowing_qty_is_rolled_back() {
        let mut rl = limiter(10, 100);
        rl.process_qty(0, Decimal::from(60)).unwrap();
        assert_eq!(
            rl.process_qty(1, Decimal::from(50)),
            Err(LendingError::RateLimitExceeded)
        );
        // The failed quantity must not count against later requests.
        rl.process_qty(2, Decimal::from(40)).unwrap();
    }

    #[test]
    fn distant_past_collapses_to_zero() {
        let mut rl = limiter(10, 100);
        rl.process_qty(0, Decimal::from(100)).unwrap();
        assert_eq!(rl.current_outflow(35).unwrap(), Decimal::zero());
        assert_eq!(
            rl.remaining_outflow(35).unwrap(),
            Decimal::from(100)
        );
    }

    #[test]
    fn one_window_past_shifts_current_into_previous() {
        let mut rl = limiter(10, 100);
        rl.process_qty(5, Decimal::from(80)).unwrap();
        // t=12 is one window past start=0: prev=80, cur=0, weight 7/10.
        assert_eq!(
            rl.current_outflow(12).unwrap(),
            Decimal::from(80)
                .try_mul(Decimal::from(7).try_div(Decimal::from(10)).unwrap())
                .unwrap()
        );
    }

    #[test]
    fn time_cannot_move_backwards() {
        let mut rl = limiter(10, 100);
        rl.process_qty(50, Decimal::from(1)).unwrap();
        assert!(rl.process_qty(3, Decimal::from(1)).is_err());
    }
}

#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// A successful process_qty never leaves decayed outflow above the cap.
    #[kani::proof]
    #[kani::unwind(3)]
    fn outflow_never_exceeds_cap() {
        let window: u64 = kani::any();
        let max: u64 = kani::any();
        let qty: u64 = kani::any();
        let now: u64 = kani::any();

        kani::assume(window > 0 && window < 1_000);
        kani::assume(max < 1_000_000);
        kani::assume(qty < 1_000_000);
        kani::assume(now < 1_000_000);

        let mut rl = RateLimiter::new(
            RateLimiterConfig {
                window_duration: window,
                max_outflow: max,
            },
            0,
        )
        .unwrap();

        if rl.process_qty(now, Decimal::from(qty)).is_ok() {
            let outflow = rl.current_outflow(now).unwrap();
            assert!(outflow <= Decimal::from(max));
        }
    }
}
