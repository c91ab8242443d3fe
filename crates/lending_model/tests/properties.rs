//! Property suite for the accounting core.
//!
//! Run with: cargo test
//! Increase cases: PROPTEST_CASES=1000 cargo test

use lending_model::*;
use proptest::prelude::*;

fn test_curve() -> InterestRateCurve {
    InterestRateCurve {
        points: vec![
            CurvePoint { util_bps: 0, apr_bps: 0 },
            CurvePoint { util_bps: 8_000, apr_bps: 1_000 },
            CurvePoint { util_bps: 10_000, apr_bps: 10_000 },
        ],
    }
}

fn test_config() -> ReserveConfig {
    ReserveConfig {
        open_ltv_pct: 50,
        close_ltv_pct: 80,
        borrow_weight_bps: 10_000,
        deposit_limit: u64::MAX,
        borrow_limit: u64::MAX,
        borrow_fee_bps: 0,
        spread_fee_bps: 1_000,
        liquidation_bonus_bps: 1_000,
        protocol_liquidation_fee_bps: 100,
        isolated: false,
        max_price_staleness_secs: u64::MAX,
        interest_rate: test_curve(),
        emode: Vec::new(),
    }
}

fn reserve_at_dollar(index: usize) -> Reserve {
    let mut r = Reserve::new(index, format!("coin{index}"), 0, test_config(), 0).unwrap();
    r.update_price(OracleReading {
        spot: Decimal::one(),
        lower_bound: Decimal::one(),
        upper_bound: Decimal::one(),
        timestamp: 0,
        valid: true,
    })
    .unwrap();
    r
}

proptest! {
    /// The cumulative borrow index and the outstanding debt never decrease
    /// under compounding with non-decreasing timestamps.
    #[test]
    fn interest_is_monotonic(
        deposit in 1_000u64..1_000_000_000,
        borrow_pct in 1u64..100,
        steps in proptest::collection::vec(1u64..100_000, 1..20),
    ) {
        let mut r = reserve_at_dollar(0);
        r.deposit_liquidity_and_mint_ctokens(deposit).unwrap();
        r.borrow_liquidity(deposit * borrow_pct / 100).unwrap();

        let mut now = 0u64;
        for step in steps {
            let rate_before = r.cumulative_borrow_rate;
            let debt_before = r.borrowed_amount;
            now += step;
            r.compound_interest(now).unwrap();
            prop_assert!(r.cumulative_borrow_rate >= rate_before);
            prop_assert!(r.borrowed_amount >= debt_before);
        }
    }

    /// Redeeming a freshly minted position never pays out more than was
    /// deposited, and loses at most one ctoken's worth to flooring. At a
    /// 1:1 ratio the round trip is exact.
    #[test]
    fn ctoken_mint_redeem_conserves(
        amount in 1u64..1_000_000_000_000,
        prior_available in 0u64..1_000_000_000_000,
        interest in 0u64..1_000_000_000_000,
    ) {
        let mut r = reserve_at_dollar(0);
        // Seed a prior depositor plus repaid interest sitting in the pool,
        // so the exchange ratio is an arbitrary value >= 1.
        if prior_available > 0 {
            r.deposit_liquidity_and_mint_ctokens(prior_available).unwrap();
            r.available_amount += interest;
        }
        let ratio = r.ctoken_ratio().unwrap();
        prop_assert!(ratio >= Decimal::one());

        let minted = match r.deposit_liquidity_and_mint_ctokens(amount) {
            Ok(minted) => minted,
            // A deposit worth less than one ctoken is rejected outright.
            Err(LendingError::AmountTooSmall) => return Ok(()),
            Err(e) => return Err(TestCaseError::fail(format!("{e}"))),
        };
        let redeemed = r.redeem_ctokens(minted).unwrap();

        prop_assert!(redeemed <= amount);
        let loss = amount - redeemed;
        prop_assert!(Decimal::from(loss) <= ratio.try_add(Decimal::one()).unwrap());
        if ratio == Decimal::one() {
            prop_assert_eq!(loss, 0);
        }
    }

    /// After any successful borrow the health bound holds, and a rejected
    /// borrow leaves the obligation untouched.
    #[test]
    fn borrow_health_invariant(
        collateral in 1u64..1_000_000,
        requests in proptest::collection::vec(1u64..1_000_000, 1..10),
    ) {
        let collateral_reserve = {
            let mut r = reserve_at_dollar(0);
            r.available_amount = u64::MAX / 2;
            r.ctoken_supply = u64::MAX / 2;
            r
        };
        let borrow_reserve = reserve_at_dollar(1);
        let reserves = vec![collateral_reserve, borrow_reserve];

        let mut ob = Obligation::new();
        ob.deposit(&reserves[0], collateral).unwrap();
        ob.refresh(&reserves, 0).unwrap();

        for request in requests {
            let snapshot = ob.clone();
            match ob.borrow(&reserves[1], request) {
                Ok(()) => {
                    prop_assert!(ob.is_healthy());
                }
                Err(LendingError::InsufficientHealth) => {
                    prop_assert_eq!(&ob, &snapshot);
                }
                Err(e) => return Err(TestCaseError::fail(format!("{e}"))),
            }
        }
    }

    /// max_borrow_amount is tight: the returned amount is admissible and
    /// one more unit is not.
    #[test]
    fn max_borrow_is_tight(
        collateral in 10u64..1_000_000,
        weight_bps in 10_000u64..30_000,
    ) {
        let collateral_reserve = {
            let mut r = reserve_at_dollar(0);
            r.available_amount = u64::MAX / 2;
            r.ctoken_supply = u64::MAX / 2;
            r
        };
        let borrow_reserve = {
            let mut r = reserve_at_dollar(1);
            r.config.borrow_weight_bps = weight_bps;
            r.available_amount = u64::MAX / 2;
            r.ctoken_supply = u64::MAX / 2;
            r
        };
        let reserves = vec![collateral_reserve, borrow_reserve];

        let mut ob = Obligation::new();
        ob.deposit(&reserves[0], collateral).unwrap();
        ob.refresh(&reserves, 0).unwrap();

        let max = ob.max_borrow_amount(&reserves[1]).unwrap();
        if max > 0 {
            ob.borrow(&reserves[1], max).unwrap();
            prop_assert!(ob.is_healthy());
        }
        prop_assert_eq!(
            ob.borrow(&reserves[1], 1),
            Err(LendingError::InsufficientHealth)
        );
    }

    /// A successful process_qty never leaves the decayed outflow above the
    /// cap, and a rejected one changes nothing.
    #[test]
    fn rate_limiter_respects_cap(
        window in 1u64..1_000,
        max_outflow in 1u64..1_000_000,
        events in proptest::collection::vec((0u64..10_000, 1u64..1_000_000), 1..50),
    ) {
        let mut rl = RateLimiter::new(
            RateLimiterConfig { window_duration: window, max_outflow },
            0,
        ).unwrap();

        let mut now = 0u64;
        for (step, qty) in events {
            now += step;
            let before = rl.clone();
            match rl.process_qty(now, Decimal::from(qty)) {
                Ok(()) => {
                    let outflow = rl.current_outflow(now).unwrap();
                    prop_assert!(outflow <= Decimal::from(max_outflow));
                }
                Err(LendingError::RateLimitExceeded) => {
                    let mut rolled = before;
                    // Only the window roll may differ, never the admitted
                    // quantities.
                    prop_assert_eq!(
                        rolled.current_outflow(now).unwrap(),
                        rl.current_outflow(now).unwrap()
                    );
                }
                Err(e) => return Err(TestCaseError::fail(format!("{e}"))),
            }
        }
    }

    /// Floor, round, and ceil conversions bracket each other.
    #[test]
    fn decimal_rounding_brackets(scaled in 0u128..u128::MAX / 2) {
        let d = Decimal::from_scaled_val(scaled);
        let floor = d.try_floor_u64();
        let ceil = d.try_ceil_u64();
        let round = d.try_round_u64();
        if let (Ok(floor), Ok(round), Ok(ceil)) = (floor, round, ceil) {
            prop_assert!(floor <= round && round <= ceil);
            prop_assert!(ceil - floor <= 1);
        }
    }

    /// Multiplying and dividing by the same nonzero value returns within
    /// one representable unit of the original.
    #[test]
    fn decimal_mul_div_roundtrip(a in 0u64..1_000_000_000, b in 1u64..1_000_000_000) {
        let a = Decimal::from(a);
        let b = Decimal::from(b);
        let roundtrip = a.try_mul(b).unwrap().try_div(b).unwrap();
        let diff = a.max(roundtrip).saturating_sub(a.min(roundtrip));
        prop_assert!(diff <= Decimal::from_scaled_val(1));
    }
}
