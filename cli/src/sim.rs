//! Deterministic simulations against the accounting core.

use anyhow::{bail, Context, Result};
use colored::Colorize;

use lending_model::{Decimal, LendingError, Obligation, RateLimiter, Reserve};

use crate::config::MarketFile;

/// Compound every reserve over `seconds`, reporting the trajectory in
/// `steps` equal slices.
pub fn accrue(market: &MarketFile, seconds: u64, steps: u64) -> Result<()> {
    if steps == 0 || seconds == 0 {
        bail!("accrual needs a positive horizon and step count");
    }
    let mut reserves = market.build_reserves(0)?;

    println!("{}", format!("market {}", market.name).bold());
    for step in 0..=steps {
        let now = (seconds as u128 * step as u128 / steps as u128) as u64;
        for reserve in reserves.iter_mut() {
            reserve
                .compound_interest(now)
                .with_context(|| format!("compounding {}", reserve.coin))?;
        }
        print_accrual_row(&reserves, now)?;
    }
    Ok(())
}

fn print_accrual_row(reserves: &[Reserve], now: u64) -> Result<()> {
    println!("t={now}s");
    for r in reserves {
        println!(
            "  {:<8} util {:>8} apr {:>8} index {:<22} borrowed {:<22} spread_fees {}",
            r.coin.cyan(),
            format!("{:.4}", decimal_to_f64(r.utilization()?)),
            format!("{:.4}", decimal_to_f64(r.current_apr()?)),
            r.cumulative_borrow_rate.to_string(),
            r.borrowed_amount.to_string(),
            r.spread_fee_pool.to_string(),
        );
    }
    Ok(())
}

/// Replay a `t:qty` event list against a fresh rate limiter.
pub fn limiter(window: u64, max_outflow: u64, events: &str) -> Result<()> {
    let mut rl = RateLimiter::new(
        lending_model::RateLimiterConfig {
            window_duration: window,
            max_outflow,
        },
        0,
    )
    .context("building rate limiter")?;

    for event in events.split(',') {
        let (t, qty) = event
            .trim()
            .split_once(':')
            .with_context(|| format!("malformed event '{event}', expected t:qty"))?;
        let t: u64 = t.trim().parse().context("event time")?;
        let qty: u64 = qty.trim().parse().context("event quantity")?;

        match rl.process_qty(t, Decimal::from(qty)) {
            Ok(()) => println!(
                "t={t:<6} +{qty:<12} outflow {:<16} {}",
                rl.current_outflow(t)?.to_string(),
                "admitted".green(),
            ),
            Err(LendingError::RateLimitExceeded) => println!(
                "t={t:<6} +{qty:<12} outflow {:<16} {}",
                rl.current_outflow(t)?.to_string(),
                "rejected".red(),
            ),
            Err(e) => return Err(e).context("rate limiter update"),
        }
    }
    Ok(())
}

/// Refresh a position against the market and report its aggregates and
/// verdicts.
pub fn health(market: &MarketFile, obligation: &mut Obligation, now: u64) -> Result<()> {
    let mut reserves = market.build_reserves(now)?;
    log::debug!("refreshing against {} reserves at t={now}", reserves.len());
    for reserve in reserves.iter_mut() {
        reserve.compound_interest(now)?;
    }
    obligation
        .refresh(&reserves, now)
        .context("refreshing obligation")?;

    println!("{}", format!("position in market {}", market.name).bold());
    for d in &obligation.deposits {
        println!(
            "  deposit {:<8} {:>16} ctokens  ${}",
            reserves[d.reserve].coin.cyan(),
            d.ctoken_amount,
            d.market_value
        );
    }
    for b in &obligation.borrows {
        println!(
            "  borrow  {:<8} {:>16} owed     ${}",
            reserves[b.reserve].coin.cyan(),
            b.borrowed_amount.to_string(),
            b.market_value
        );
    }
    println!("  deposited value        ${}", obligation.deposited_value);
    println!("  allowed borrow value   ${}", obligation.allowed_borrow_value);
    println!("  unhealthy borrow value ${}", obligation.unhealthy_borrow_value);
    println!(
        "  borrowed value         ${} (weighted ${}, upper bound ${})",
        obligation.unweighted_borrowed_value,
        obligation.weighted_borrowed_value,
        obligation.weighted_borrowed_value_upper_bound
    );

    if obligation.is_liquidatable() {
        println!("  {}", "LIQUIDATABLE".red().bold());
    } else if obligation.is_healthy() {
        println!("  {}", "healthy".green());
    } else {
        println!("  {}", "borrow/withdraw gated (upper-bound breach)".yellow());
    }
    Ok(())
}

fn decimal_to_f64(d: Decimal) -> f64 {
    // Display-only; the core never touches floats.
    d.to_string().parse().unwrap_or(f64::NAN)
}
