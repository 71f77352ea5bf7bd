//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with configurable format (JSON or
//! pretty-printed) and environment-based filtering via `RUST_LOG`.
//!
//! All log output goes to stderr; stdout carries only the scenario summary
//! so it can be piped into `jq` or a file.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "rwa_vault_node=info,rwa_vault_contracts=info,rwa_vault_protocol=warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable output. Suitable for local runs.
    Pretty,
    /// Machine-parseable JSON lines. Suitable for log aggregation.
    Json,
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
///
/// # Environment
///
/// `RUST_LOG` overrides `default_filter` when set, e.g.:
///
/// ```text
/// RUST_LOG=rwa_vault_contracts=debug,rwa_vault_node=info
/// ```
pub fn init_logging(default_filter: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
            .try_init()?,
    }

    tracing::debug!(?format, "logging initialized");
    Ok(())
}
