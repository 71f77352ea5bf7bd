//! # Vault Configuration & Constants
//!
//! Every magic number in the vault lives here. If you're hardcoding a limit
//! somewhere else, move it here first.
//!
//! Amounts are raw integers in the smallest unit of an 18-decimal token.
//! Percentages are basis points. Durations are whole seconds so they
//! serialize cleanly into scenario files.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Fixed-Point Scales
// ---------------------------------------------------------------------------

/// Decimals of the share token. Matches the stable asset so the first
/// deposit can bootstrap 1:1.
pub const SHARE_DECIMALS: u8 = 18;

/// One whole unit at 18 decimals.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// 10 000 bps = 100%.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Largest basis-point value accepted anywhere in the vault.
pub const MAX_BPS: u16 = 10_000;

// ---------------------------------------------------------------------------
// Deposit / Withdrawal Limits
// ---------------------------------------------------------------------------

/// Smallest deposit the vault accepts: 100 units of the stable asset.
/// Keeps dust deposits from minting shares that round to nothing.
pub const MIN_DEPOSIT: u128 = 100 * WAD;

/// Largest single withdrawal, instant or emergency: 1,000,000 units.
pub const MAX_WITHDRAWAL: u128 = 1_000_000 * WAD;

/// Instant withdrawals above 10,000 units must go through the queue.
pub const INSTANT_WITHDRAWAL_LIMIT: u128 = 10_000 * WAD;

/// T+1: a queued request becomes claimable one day after it was made.
pub const WITHDRAWAL_DELAY_SECS: u64 = 86_400;

// ---------------------------------------------------------------------------
// NAV Protection
// ---------------------------------------------------------------------------

/// A NAV update that moves total assets by more than 10% pauses the vault.
pub const DEFAULT_CIRCUIT_BREAKER_BPS: u16 = 1_000;

/// Default slippage tolerance for rebalance trades: 1%.
pub const DEFAULT_MAX_SLIPPAGE_BPS: u16 = 100;

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Prices older than two hours are stale unless an asset overrides it.
pub const DEFAULT_STALENESS_THRESHOLD_SECS: u64 = 7_200;

/// Every resolved price is expressed with this many decimals.
pub const PRICE_DECIMALS: u8 = 18;

/// Push feeds whose confidence interval is wider than 2% of the price are
/// treated as unavailable.
pub const DEFAULT_MAX_CONFIDENCE_BPS: u16 = 200;

// ---------------------------------------------------------------------------
// Rebalance Strategy
// ---------------------------------------------------------------------------

/// 2.0x: one bp of APY above average adds two bps of target weight.
pub const DEFAULT_APY_SENSITIVITY_BPS: u32 = 20_000;

/// No active asset is allocated less than 5%...
pub const DEFAULT_MIN_WEIGHT_BPS: u16 = 500;

/// ...or more than 50%.
pub const DEFAULT_MAX_WEIGHT_BPS: u16 = 5_000;

/// Trades worth less than 100 units are dust and get dropped.
pub const DEFAULT_MIN_TRADE_SIZE: u128 = 100 * WAD;

// ---------------------------------------------------------------------------
// Config Structs
// ---------------------------------------------------------------------------

/// A configuration value failed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// A basis-point field exceeded 10 000.
    #[error("{field} is {value} bps, above the {max} bps maximum")]
    BpsOutOfRange {
        /// Offending field.
        field: &'static str,
        /// Value supplied.
        value: u32,
        /// Largest accepted value.
        max: u32,
    },

    /// Two fields contradict each other.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Limits and toggles for a single vault instance.
///
/// `Default` yields the constants above; scenario files override individual
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Smallest accepted deposit, in asset units.
    pub min_deposit: u128,
    /// Largest accepted single withdrawal, in asset units.
    pub max_withdrawal: u128,
    /// Largest instant (non-queued) withdrawal outside emergency mode.
    pub instant_withdrawal_limit: u128,
    /// Seconds between a withdrawal request and its claimability.
    pub withdrawal_delay_secs: u64,
    /// Relative NAV move that trips the circuit breaker. 0 disables it.
    pub circuit_breaker_threshold_bps: u16,
    /// Slippage tolerance applied to every rebalance trade.
    pub max_slippage_bps: u16,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            min_deposit: MIN_DEPOSIT,
            max_withdrawal: MAX_WITHDRAWAL,
            instant_withdrawal_limit: INSTANT_WITHDRAWAL_LIMIT,
            withdrawal_delay_secs: WITHDRAWAL_DELAY_SECS,
            circuit_breaker_threshold_bps: DEFAULT_CIRCUIT_BREAKER_BPS,
            max_slippage_bps: DEFAULT_MAX_SLIPPAGE_BPS,
        }
    }
}

impl VaultConfig {
    /// Rejects configurations the ledger cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_withdrawal == 0 {
            return Err(ConfigError::Zero("max_withdrawal"));
        }
        if self.withdrawal_delay_secs == 0 {
            return Err(ConfigError::Zero("withdrawal_delay_secs"));
        }
        if self.instant_withdrawal_limit > self.max_withdrawal {
            return Err(ConfigError::Inconsistent(format!(
                "instant_withdrawal_limit {} exceeds max_withdrawal {}",
                self.instant_withdrawal_limit, self.max_withdrawal
            )));
        }
        check_bps("circuit_breaker_threshold_bps", self.circuit_breaker_threshold_bps)?;
        check_bps("max_slippage_bps", self.max_slippage_bps)?;
        Ok(())
    }
}

/// Tuning for the target-allocation calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Weight bps added per APY bp above average, scaled by 10 000.
    pub apy_sensitivity_bps: u32,
    /// Lower clamp for any active asset's weight.
    pub min_weight_bps: u16,
    /// Upper clamp for any active asset's weight.
    pub max_weight_bps: u16,
    /// Trades below this value (in asset units) are dropped.
    pub min_trade_size: u128,
    /// Haircut on expected sale proceeds when sizing the buys they fund.
    /// Must cover the vault's `max_slippage_bps`.
    pub max_slippage_bps: u16,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            apy_sensitivity_bps: DEFAULT_APY_SENSITIVITY_BPS,
            min_weight_bps: DEFAULT_MIN_WEIGHT_BPS,
            max_weight_bps: DEFAULT_MAX_WEIGHT_BPS,
            min_trade_size: DEFAULT_MIN_TRADE_SIZE,
            max_slippage_bps: DEFAULT_MAX_SLIPPAGE_BPS,
        }
    }
}

impl StrategyConfig {
    /// Rejects weight bounds that are out of range or inverted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_bps("min_weight_bps", self.min_weight_bps)?;
        check_bps("max_weight_bps", self.max_weight_bps)?;
        check_bps("max_slippage_bps", self.max_slippage_bps)?;
        if self.max_weight_bps == 0 {
            return Err(ConfigError::Zero("max_weight_bps"));
        }
        if self.min_weight_bps > self.max_weight_bps {
            return Err(ConfigError::Inconsistent(format!(
                "min_weight_bps {} exceeds max_weight_bps {}",
                self.min_weight_bps, self.max_weight_bps
            )));
        }
        Ok(())
    }
}

fn check_bps(field: &'static str, value: u16) -> Result<(), ConfigError> {
    if value > MAX_BPS {
        return Err(ConfigError::BpsOutOfRange {
            field,
            value: value as u32,
            max: MAX_BPS as u32,
        });
    }
    Ok(())
}
