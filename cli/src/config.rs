//! Market description and position snapshot files.
//!
//! A market file is TOML: one rate limiter plus one `[[reserves]]` block
//! per asset with its risk config and a starting oracle reading. Position
//! files are JSON listing raw deposit/borrow records.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use lending_model::{
    obligation::{Borrow, Deposit},
    Decimal, Obligation, OracleReading, RateLimiterConfig, Reserve, ReserveConfig,
};

#[derive(Debug, Deserialize)]
pub struct MarketFile {
    pub name: String,
    pub rate_limiter: RateLimiterConfig,
    pub reserves: Vec<ReserveDecl>,
}

#[derive(Debug, Deserialize)]
pub struct ReserveDecl {
    pub coin: String,
    pub decimals: u8,
    /// Spot price in USD per whole token, e.g. "1.0" or "102.35".
    pub price: Decimal,
    /// Confidence bounds; default to the spot price.
    pub price_lower: Option<Decimal>,
    pub price_upper: Option<Decimal>,
    /// Seed liquidity for simulations, underlying units.
    #[serde(default)]
    pub available: u64,
    /// Seed debt for simulations, underlying units.
    #[serde(default)]
    pub borrowed: u64,
    pub config: ReserveConfig,
}

impl MarketFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading market file {}", path.display()))?;
        let market: MarketFile =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        if market.reserves.is_empty() {
            bail!("market {} declares no reserves", market.name);
        }
        Ok(market)
    }

    /// Instantiate every reserve at `now`, validating each config.
    pub fn build_reserves(&self, now: u64) -> Result<Vec<Reserve>> {
        let mut reserves = Vec::with_capacity(self.reserves.len());
        for (index, decl) in self.reserves.iter().enumerate() {
            let mut reserve =
                Reserve::new(index, decl.coin.clone(), decl.decimals, decl.config.clone(), now)
                    .with_context(|| format!("reserve {} ({})", index, decl.coin))?;
            reserve
                .update_price(OracleReading {
                    spot: decl.price,
                    lower_bound: decl.price_lower.unwrap_or(decl.price),
                    upper_bound: decl.price_upper.unwrap_or(decl.price),
                    timestamp: now,
                    valid: true,
                })
                .with_context(|| format!("price for reserve {} ({})", index, decl.coin))?;
            if decl.available > 0 {
                reserve
                    .deposit_liquidity_and_mint_ctokens(decl.available)
                    .with_context(|| format!("seeding liquidity for {}", decl.coin))?;
            }
            if decl.borrowed > 0 {
                reserve
                    .borrow_liquidity(decl.borrowed)
                    .with_context(|| format!("seeding debt for {}", decl.coin))?;
            }
            reserves.push(reserve);
        }
        Ok(reserves)
    }
}

#[derive(Debug, Deserialize)]
pub struct PositionFile {
    #[serde(default)]
    pub deposits: Vec<DepositDecl>,
    #[serde(default)]
    pub borrows: Vec<BorrowDecl>,
}

#[derive(Debug, Deserialize)]
pub struct DepositDecl {
    pub reserve: usize,
    pub ctoken_amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct BorrowDecl {
    pub reserve: usize,
    pub borrowed_amount: Decimal,
    /// Cumulative-index snapshot at the position's last interaction;
    /// defaults to the reserve's current index (no pending interest).
    pub cumulative_borrow_rate: Option<Decimal>,
}

impl PositionFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading position file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Build the raw obligation records; the caller refreshes against the
    /// market to derive the aggregates.
    pub fn build_obligation(&self, reserves: &[Reserve]) -> Result<Obligation> {
        let mut ob = Obligation::new();
        for d in &self.deposits {
            if d.reserve >= reserves.len() {
                bail!("deposit references unknown reserve {}", d.reserve);
            }
            ob.deposits.push(Deposit {
                reserve: d.reserve,
                ctoken_amount: d.ctoken_amount,
                market_value: Decimal::zero(),
            });
        }
        for b in &self.borrows {
            let reserve = reserves
                .get(b.reserve)
                .with_context(|| format!("borrow references unknown reserve {}", b.reserve))?;
            ob.borrows.push(Borrow {
                reserve: b.reserve,
                borrowed_amount: b.borrowed_amount,
                cumulative_borrow_rate: b
                    .cumulative_borrow_rate
                    .unwrap_or(reserve.cumulative_borrow_rate),
                market_value: Decimal::zero(),
            });
        }
        Ok(ob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKET: &str = r#"
        name = "demo"

        [rate_limiter]
        window_duration = 60
        max_outflow = 1000000

        [[reserves]]
        coin = "usdc"
        decimals = 6
        price = "1.0"
        available = 1000000

        [reserves.config]
        open_ltv_pct = 80
        close_ltv_pct = 90
        borrow_weight_bps = 10000
        deposit_limit = 9223372036854775807
        borrow_limit = 9223372036854775807
        borrow_fee_bps = 10
        spread_fee_bps = 1000
        liquidation_bonus_bps = 500
        protocol_liquidation_fee_bps = 100
        isolated = false
        max_price_staleness_secs = 60
        interest_rate = { points = [
            { util_bps = 0, apr_bps = 0 },
            { util_bps = 8000, apr_bps = 400 },
            { util_bps = 10000, apr_bps = 5000 },
        ] }
    "#;

    #[test]
    fn parses_and_builds_a_market() {
        let market: MarketFile = toml::from_str(MARKET).unwrap();
        assert_eq!(market.name, "demo");
        let reserves = market.build_reserves(0).unwrap();
        assert_eq!(reserves.len(), 1);
        assert_eq!(reserves[0].coin, "usdc");
        assert_eq!(reserves[0].available_amount, 1_000_000);
    }

    #[test]
    fn builds_an_obligation_from_json() {
        let market: MarketFile = toml::from_str(MARKET).unwrap();
        let reserves = market.build_reserves(0).unwrap();
        let position: PositionFile = serde_json::from_str(
            r#"{"deposits":[{"reserve":0,"ctoken_amount":500}],"borrows":[]}"#,
        )
        .unwrap();
        let mut ob = position.build_obligation(&reserves).unwrap();
        ob.refresh(&reserves, 0).unwrap();
        assert_eq!(ob.deposits[0].ctoken_amount, 500);
    }
}
