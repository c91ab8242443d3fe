//! Calyx CLI - offline operator tool for the lending risk core.
//!
//! Validates market configuration and runs deterministic simulations
//! (interest accrual, obligation health, rate-limiter windows) against the
//! accounting model. No custody, no networking.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

mod config;
mod sim;

use config::{MarketFile, PositionFile};

#[derive(Parser)]
#[command(name = "calyx")]
#[command(about = "Calyx lending core - config checks and simulations", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every reserve and rate-limiter config in a market file
    CheckConfig {
        /// Market description (TOML)
        #[arg(short, long)]
        market: PathBuf,
    },

    /// Simulate interest accrual across a market
    Accrue {
        /// Market description (TOML)
        #[arg(short, long)]
        market: PathBuf,

        /// Horizon in seconds
        #[arg(short, long)]
        seconds: u64,

        /// Number of reporting steps
        #[arg(long, default_value = "10")]
        steps: u64,
    },

    /// Replay outflow events against a rate limiter
    Limiter {
        /// Window duration in seconds
        #[arg(short, long)]
        window: u64,

        /// Maximum decayed outflow per window
        #[arg(short, long)]
        max_outflow: u64,

        /// Comma-separated events, each "t:qty"
        #[arg(short, long)]
        events: String,
    },

    /// Refresh a position against a market and report its health
    Health {
        /// Market description (TOML)
        #[arg(short, long)]
        market: PathBuf,

        /// Position snapshot (JSON)
        #[arg(short, long)]
        position: PathBuf,

        /// Evaluation timestamp, seconds
        #[arg(long, default_value = "0")]
        now: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    match cli.command {
        Commands::CheckConfig { market } => check_config(&market),
        Commands::Accrue {
            market,
            seconds,
            steps,
        } => {
            let market = MarketFile::load(&market)?;
            sim::accrue(&market, seconds, steps)
        }
        Commands::Limiter {
            window,
            max_outflow,
            events,
        } => sim::limiter(window, max_outflow, &events),
        Commands::Health {
            market,
            position,
            now,
        } => {
            let market = MarketFile::load(&market)?;
            let reserves = market.build_reserves(now)?;
            let position = PositionFile::load(&position)?;
            let mut obligation = position.build_obligation(&reserves)?;
            sim::health(&market, &mut obligation, now)
        }
    }
}

fn check_config(path: &PathBuf) -> Result<()> {
    let market = MarketFile::load(path)?;
    market.rate_limiter.validate()?;
    println!("rate limiter {}", "ok".green());

    let mut failures = 0usize;
    for (index, decl) in market.reserves.iter().enumerate() {
        match decl.config.validate() {
            Ok(()) => println!("reserve {:<3} {:<8} {}", index, decl.coin, "ok".green()),
            Err(e) => {
                failures += 1;
                println!("reserve {:<3} {:<8} {}: {e}", index, decl.coin, "BAD".red());
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} invalid reserve config(s) in {}", market.name);
    }
    println!("{}", format!("market {} validated", market.name).bold());
    Ok(())
}
