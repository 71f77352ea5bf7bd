// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # RWA Vault Node
//!
//! Entry point for the `rwa-vault-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and replays vault scenarios.
//!
//! The binary supports three subcommands:
//!
//! - `simulate` replays a scenario file and prints the summary as JSON
//! - `config`   prints the default vault and strategy configuration
//! - `version`  prints build version information

mod cli;
mod logging;
mod metrics;
mod scenario;

use anyhow::{bail, Result};
use clap::Parser;
use serde::Serialize;

use rwa_vault_protocol::config::{StrategyConfig, VaultConfig};

use cli::{Commands, SimulateArgs, VaultNodeCli};

fn main() -> Result<()> {
    let cli = VaultNodeCli::parse();

    match cli.command {
        Commands::Simulate(args) => simulate(args),
        Commands::Config => print_default_config(),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Replays a scenario. The summary goes to stdout, logs and metrics to
/// stderr.
fn simulate(args: SimulateArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format)?;

    tracing::info!(scenario = %args.scenario.display(), "starting rwa-vault-node");
    let scenario = scenario::load_scenario(&args.scenario)?;
    let (summary, metrics) = scenario::run_scenario(&scenario)?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if args.print_metrics {
        eprintln!("{}", metrics.encode()?);
    }

    if args.strict && summary.failed_steps > 0 {
        bail!(
            "{} of {} steps failed in scenario {:?}",
            summary.failed_steps,
            summary.steps,
            summary.scenario
        );
    }
    Ok(())
}

/// Defaults a scenario file starts from.
#[derive(Serialize)]
struct DefaultConfig {
    vault: VaultConfig,
    strategy: StrategyConfig,
}

fn print_default_config() -> Result<()> {
    let config = DefaultConfig {
        vault: VaultConfig::default(),
        strategy: StrategyConfig::default(),
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("rwa-vault-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc          {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
