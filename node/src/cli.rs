//! # CLI Interface
//!
//! Defines the command-line argument structure for `rwa-vault-node` using
//! `clap` derive. Three subcommands: `simulate`, `config` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// RWA yield vault operator tool.
///
/// Replays JSON scenarios against an in-process vault (deposits, queued
/// withdrawals, oracle updates, rebalances) and prints the resulting state.
#[derive(Parser, Debug)]
#[command(
    name = "rwa-vault-node",
    about = "RWA yield vault scenario runner",
    version,
    propagate_version = true
)]
pub struct VaultNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a scenario file and print the final vault summary as JSON.
    Simulate(SimulateArgs),
    /// Print the default vault and strategy configuration as JSON.
    Config,
    /// Print version information and exit.
    Version,
}

/// Arguments for the `simulate` subcommand.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Path to the scenario file (JSON).
    #[arg(long, short = 's', env = "RWA_VAULT_SCENARIO")]
    pub scenario: PathBuf,

    /// Log output format.
    #[arg(long, env = "RWA_VAULT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Also print the Prometheus metrics (to stderr) after the run.
    #[arg(long)]
    pub print_metrics: bool,

    /// Exit with a non-zero status if any step failed.
    #[arg(long)]
    pub strict: bool,
}
