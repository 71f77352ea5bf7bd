//! # Rebalance Strategy
//!
//! Turns yield signals into target weights and target weights into trade
//! instructions. The calculator is pure: it reads prices and the registry,
//! never mutates the vault, and leaves execution to
//! `VaultLedger::rebalance`.
//!
//! ## Weights
//!
//! ```text
//! base_i   = 10000 / n
//! delta_i  = (apy_i - avg_apy) * sensitivity
//! weight_i = clamp(base_i + delta_i, min_weight, max_weight)
//! ```
//!
//! then normalized so the set sums to exactly 10000 bps, with the rounding
//! remainder assigned to the largest weight. The clamp bounds hold before
//! normalization only: when `n * max_weight < 10000` (or `n * min_weight >
//! 10000`) no weight set can satisfy both the bounds and the total, and the
//! total wins. All of it is integer math in
//! basis points; sensitivity is itself in bps (20000 = 2.0x).
//!
//! ## Trades
//!
//! Each asset's target value is `total * weight / 10000`, where `total` is
//! the oracle value of current holdings plus any idle cash to deploy.
//! Overweight assets are sold (amount in token units), underweight assets
//! are bought (amount in stable units). Trades worth less than
//! `min_trade_size` are dropped. Assets still held but no longer active get
//! a zero target and are sold in full.
//!
//! Buys are funded by idle cash plus the sale proceeds net of
//! `max_slippage_bps`. When the shortfalls exceed that budget every buy is
//! scaled down pro rata, so a batch whose sells fill inside the tolerance
//! never runs out of idle balance.

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::Address;
use rwa_vault_protocol::config::{ConfigError, StrategyConfig, BPS_DENOMINATOR, MAX_BPS};
use rwa_vault_protocol::math::{deduct_bps, mul_div, MathError, Rounding, Wad};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asset_registry::AssetRegistry;
use crate::oracle::{OracleError, PriceOracle};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("invalid strategy configuration: {0}")]
    Config(#[from] ConfigError),

    /// Nothing to allocate to.
    #[error("no active assets to allocate")]
    NoActiveAssets,

    #[error("duplicate yield signal for {0}")]
    DuplicateSignal(Address),

    /// A signal names an asset that is not active in the registry.
    #[error("asset {0} is not active")]
    InactiveAsset(Address),

    /// An active asset has no signal.
    #[error("no yield signal for active asset {0}")]
    MissingSignal(Address),

    #[error("price unavailable: {0}")]
    Oracle(#[from] OracleError),

    #[error("arithmetic error: {0}")]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Observed annualized yield of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldSignal {
    pub asset: Address,
    pub apy_bps: u32,
}

/// Target share of managed value for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub asset: Address,
    pub weight_bps: u16,
}

/// Oracle value of one holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetValuation {
    pub asset: Address,
    pub units: u128,
    pub price: Wad,
    /// `units * price`, in stable-asset units.
    pub value: u128,
}

/// One leg of a plan. Sell amounts are RWA token units; buy amounts are
/// stable-asset units to spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInstruction {
    pub asset: Address,
    pub amount: u128,
}

/// Output of [`RebalanceStrategy::plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub targets: Vec<AllocationTarget>,
    pub valuations: Vec<AssetValuation>,
    /// Holdings value plus cash to deploy.
    pub total_value: u128,
    pub sells: Vec<TradeInstruction>,
    pub buys: Vec<TradeInstruction>,
}

impl RebalancePlan {
    pub fn is_empty(&self) -> bool {
        self.sells.is_empty() && self.buys.is_empty()
    }

    /// `(sell_assets, sell_amounts, buy_assets, buy_amounts)`, the shape
    /// `VaultLedger::rebalance` takes.
    pub fn into_arrays(self) -> (Vec<Address>, Vec<u128>, Vec<Address>, Vec<u128>) {
        let (sell_assets, sell_amounts) = self.sells.into_iter().map(|t| (t.asset, t.amount)).unzip();
        let (buy_assets, buy_amounts) = self.buys.into_iter().map(|t| (t.asset, t.amount)).unzip();
        (sell_assets, sell_amounts, buy_assets, buy_amounts)
    }
}

// ---------------------------------------------------------------------------
// RebalanceStrategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RebalanceStrategy {
    config: StrategyConfig,
}

impl RebalanceStrategy {
    pub fn new(config: StrategyConfig) -> Result<Self, StrategyError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Target weights for the signalled assets, in signal order. The result
    /// always sums to exactly 10000 bps.
    pub fn compute_target_weights(&self, signals: &[YieldSignal]) -> Result<Vec<AllocationTarget>, StrategyError> {
        if signals.is_empty() {
            return Err(StrategyError::NoActiveAssets);
        }
        let mut seen = HashSet::with_capacity(signals.len());
        for signal in signals {
            if !seen.insert(signal.asset) {
                return Err(StrategyError::DuplicateSignal(signal.asset));
            }
        }

        let n = signals.len() as i128;
        let base = BPS_DENOMINATOR as i128 / n;
        let apy_sum: i128 = signals.iter().map(|s| s.apy_bps as i128).sum();
        let sensitivity = self.config.apy_sensitivity_bps as i128;
        let min = self.config.min_weight_bps as i128;
        let max = self.config.max_weight_bps as i128;

        // (apy - sum/n) * sens / 10000, kept exact by scaling through n.
        let clamped: Vec<u128> = signals
            .iter()
            .map(|s| {
                let delta = (s.apy_bps as i128 * n - apy_sum) * sensitivity / (n * BPS_DENOMINATOR as i128);
                (base + delta).clamp(min, max) as u128
            })
            .collect();

        let weights = normalize(&clamped)?;
        tracing::debug!(assets = signals.len(), ?weights, "target weights computed");
        Ok(signals
            .iter()
            .zip(weights)
            .map(|(s, weight_bps)| AllocationTarget {
                asset: s.asset,
                weight_bps,
            })
            .collect())
    }

    /// Current weights of `valuations` (value share of the total, floor).
    pub fn actual_allocation(valuations: &[AssetValuation]) -> Result<Vec<AllocationTarget>, StrategyError> {
        let total = valuations
            .iter()
            .try_fold(0u128, |acc, v| acc.checked_add(v.value))
            .ok_or(MathError::Overflow)?;
        valuations
            .iter()
            .map(|v| {
                let weight = if total == 0 {
                    0
                } else {
                    mul_div(v.value, BPS_DENOMINATOR, total, Rounding::Down)?
                };
                Ok(AllocationTarget {
                    asset: v.asset,
                    weight_bps: weight as u16,
                })
            })
            .collect()
    }

    /// Builds the trade list that moves `holdings` (plus `cash_to_deploy`
    /// of idle stable asset) to the target weights.
    ///
    /// # Errors
    ///
    /// - [`StrategyError::InactiveAsset`] / [`StrategyError::MissingSignal`]
    ///   when the signals do not cover exactly the active set.
    /// - [`StrategyError::Oracle`] when a held asset cannot be priced.
    pub fn plan(
        &self,
        registry: &AssetRegistry,
        oracle: &dyn PriceOracle,
        holdings: &BTreeMap<Address, u128>,
        cash_to_deploy: u128,
        signals: &[YieldSignal],
    ) -> Result<RebalancePlan, StrategyError> {
        let active = registry.get_active_assets();
        for signal in signals {
            if !registry.is_active(&signal.asset) {
                return Err(StrategyError::InactiveAsset(signal.asset));
            }
        }
        let signalled: HashSet<Address> = signals.iter().map(|s| s.asset).collect();
        if let Some(missing) = active.iter().find(|a| !signalled.contains(*a)) {
            return Err(StrategyError::MissingSignal(*missing));
        }

        let targets = self.compute_target_weights(signals)?;
        let mut weight_of: BTreeMap<Address, u16> = targets.iter().map(|t| (t.asset, t.weight_bps)).collect();
        for (asset, units) in holdings {
            if *units > 0 {
                weight_of.entry(*asset).or_insert(0);
            }
        }

        let mut valuations = Vec::new();
        let mut total_value = cash_to_deploy;
        for asset in weight_of.keys() {
            let units = holdings.get(asset).copied().unwrap_or(0);
            if units == 0 {
                continue;
            }
            let price = oracle.get_price_with_source(asset)?.price;
            let value = price.mul_amount(units, Rounding::Down)?;
            total_value = total_value.checked_add(value).ok_or(MathError::Overflow)?;
            valuations.push(AssetValuation {
                asset: *asset,
                units,
                price,
                value,
            });
        }

        let mut sells = Vec::new();
        let mut wanted = Vec::new();
        let mut funding = cash_to_deploy;
        for (asset, weight) in &weight_of {
            let target = mul_div(total_value, *weight as u128, BPS_DENOMINATOR, Rounding::Down)?;
            let current = valuations.iter().find(|v| v.asset == *asset);
            let value = current.map(|v| v.value).unwrap_or(0);

            if value > target {
                let excess = value - target;
                if excess < self.config.min_trade_size {
                    continue;
                }
                let Some(valuation) = current else { continue };
                let units = if target == 0 {
                    valuation.units
                } else {
                    valuation.price.div_amount(excess, Rounding::Down)?.min(valuation.units)
                };
                if units > 0 {
                    // Proceeds may land anywhere inside the slippage tolerance.
                    let proceeds = valuation.price.mul_amount(units, Rounding::Down)?;
                    let floor = deduct_bps(proceeds, self.config.max_slippage_bps)?;
                    funding = funding.checked_add(floor).ok_or(MathError::Overflow)?;
                    sells.push(TradeInstruction { asset: *asset, amount: units });
                }
            } else if target > value {
                let shortfall = target - value;
                if shortfall >= self.config.min_trade_size {
                    wanted.push((*asset, shortfall));
                }
            }
        }

        // Buys never spend more than idle cash plus worst-case sale proceeds.
        let requested = wanted
            .iter()
            .try_fold(0u128, |acc, (_, amount)| acc.checked_add(*amount))
            .ok_or(MathError::Overflow)?;
        let mut buys = Vec::with_capacity(wanted.len());
        for (asset, shortfall) in wanted {
            let amount = if requested > funding {
                mul_div(shortfall, funding, requested, Rounding::Down)?
            } else {
                shortfall
            };
            if amount >= self.config.min_trade_size {
                buys.push(TradeInstruction { asset, amount });
            }
        }

        tracing::info!(
            total_value,
            cash_to_deploy,
            sells = sells.len(),
            buys = buys.len(),
            "rebalance plan computed"
        );
        Ok(RebalancePlan {
            targets,
            valuations,
            total_value,
            sells,
            buys,
        })
    }
}

/// Scales `weights` to sum to exactly 10000. The floor remainder goes to
/// the largest weight (first one on ties). An all-zero input becomes an
/// equal split. The result may leave the clamp bounds the inputs were held
/// to; the 10000 total takes precedence.
fn normalize(weights: &[u128]) -> Result<Vec<u16>, MathError> {
    let total: u128 = weights.iter().sum();
    let mut scaled: Vec<u128> = if total == 0 {
        vec![BPS_DENOMINATOR / weights.len() as u128; weights.len()]
    } else {
        weights
            .iter()
            .map(|w| mul_div(*w, BPS_DENOMINATOR, total, Rounding::Down))
            .collect::<Result<_, _>>()?
    };

    let assigned: u128 = scaled.iter().sum();
    let remainder = BPS_DENOMINATOR.checked_sub(assigned).ok_or(MathError::Underflow)?;
    let largest = scaled
        .iter()
        .enumerate()
        .max_by(|(i, a), (j, b)| a.cmp(b).then(j.cmp(i)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    if let Some(w) = scaled.get_mut(largest) {
        *w += remainder;
    }

    Ok(scaled.into_iter().map(|w| w.min(MAX_BPS as u128) as u16).collect())
}
