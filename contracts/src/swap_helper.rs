//! # Swap Helper
//!
//! Bounded-slippage trade execution between the stable asset and RWA
//! tokens. The helper quotes a trade, derives the minimum acceptable output
//! (`expected * (1 - maxSlippageBps / 10000)`, rounded down) and hands both
//! to the market maker. A fill below the minimum fails the whole call; the
//! caller (the ledger's rebalance) then discards its staged batch.
//!
//! The market maker itself is a [`MarketMaker`] trait object. The crate
//! ships [`SimulatedMarket`], a deterministic rate table used by tests and
//! scenario replay.

use std::collections::HashMap;

use alloy_primitives::Address;
use rwa_vault_protocol::config::MAX_BPS;
use rwa_vault_protocol::math::{deduct_bps, mul_div, MathError, Rounding, Wad};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while quoting or executing a trade.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwapError {
    /// Trades must move a positive amount.
    #[error("swap amount must be greater than zero")]
    ZeroAmount,

    /// Input and output token are the same.
    #[error("cannot swap {0} for itself")]
    SameToken(Address),

    /// Slippage tolerance above 100%.
    #[error("max slippage {0} bps exceeds 10000")]
    InvalidSlippage(u16),

    /// The market has no rate for the pair.
    #[error("no route from {token_in} to {token_out}")]
    NoRoute { token_in: Address, token_out: Address },

    /// The fill came in below the slippage bound.
    #[error("slippage exceeded: expected {expected}, minimum {min_out}, got {actual}")]
    SlippageExceeded { expected: u128, min_out: u128, actual: u128 },

    /// The quote rounds to nothing.
    #[error("quote for {amount_in} of {token_in} is zero")]
    ZeroOutput { token_in: Address, amount_in: u128 },

    #[error("arithmetic error: {0}")]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// MarketMaker
// ---------------------------------------------------------------------------

/// External liquidity. Implementations must not partially fill: either the
/// full `amount_in` is exchanged for at least `min_amount_out`, or nothing
/// happens and an error is returned.
pub trait MarketMaker {
    /// Expected output for `amount_in`, without executing.
    fn quote(&self, token_in: &Address, token_out: &Address, amount_in: u128) -> Result<u128, SwapError>;

    /// Executes the trade and returns the actual output.
    fn swap(
        &mut self,
        token_in: &Address,
        token_out: &Address,
        amount_in: u128,
        min_amount_out: u128,
    ) -> Result<u128, SwapError>;
}

/// One executed trade on the simulated market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketFill {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: u128,
    pub amount_out: u128,
}

/// Deterministic market: pair rates, a flat fee, and an optional per-pair
/// execution shortfall that makes fills come in below the quote.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMarket {
    /// Units of `token_out` per unit of `token_in`, 18 decimals.
    rates: HashMap<(Address, Address), Wad>,
    fee_bps: u16,
    /// Gap between quote and fill, in bps of the quote.
    shortfall_bps: HashMap<(Address, Address), u16>,
    fills: Vec<MarketFill>,
}

impl SimulatedMarket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a flat fee charged on every quote and fill.
    pub fn with_fee_bps(mut self, fee_bps: u16) -> Self {
        self.fee_bps = fee_bps.min(MAX_BPS);
        self
    }

    /// Sets a one-directional rate.
    pub fn set_rate(&mut self, token_in: Address, token_out: Address, rate: Wad) {
        self.rates.insert((token_in, token_out), rate);
    }

    /// Sets both directions for an RWA priced in the stable asset.
    pub fn set_price(&mut self, rwa: Address, stable: Address, price: Wad) -> Result<(), SwapError> {
        let inverse = Wad::from_ratio(Wad::SCALE, price.raw(), Rounding::Down)?;
        self.rates.insert((rwa, stable), price);
        self.rates.insert((stable, rwa), inverse);
        Ok(())
    }

    /// Makes every subsequent fill on the pair land `bps` below the quote.
    pub fn set_execution_shortfall(&mut self, token_in: Address, token_out: Address, bps: u16) {
        self.shortfall_bps.insert((token_in, token_out), bps.min(MAX_BPS));
    }

    pub fn fills(&self) -> &[MarketFill] {
        &self.fills
    }
}

impl MarketMaker for SimulatedMarket {
    fn quote(&self, token_in: &Address, token_out: &Address, amount_in: u128) -> Result<u128, SwapError> {
        let rate = self
            .rates
            .get(&(*token_in, *token_out))
            .ok_or(SwapError::NoRoute {
                token_in: *token_in,
                token_out: *token_out,
            })?;
        let gross = rate.mul_amount(amount_in, Rounding::Down)?;
        Ok(deduct_bps(gross, self.fee_bps)?)
    }

    fn swap(
        &mut self,
        token_in: &Address,
        token_out: &Address,
        amount_in: u128,
        min_amount_out: u128,
    ) -> Result<u128, SwapError> {
        let quoted = self.quote(token_in, token_out, amount_in)?;
        let shortfall = self
            .shortfall_bps
            .get(&(*token_in, *token_out))
            .copied()
            .unwrap_or(0);
        let amount_out = deduct_bps(quoted, shortfall)?;
        if amount_out < min_amount_out {
            return Err(SwapError::SlippageExceeded {
                expected: quoted,
                min_out: min_amount_out,
                actual: amount_out,
            });
        }
        self.fills.push(MarketFill {
            token_in: *token_in,
            token_out: *token_out,
            amount_in,
            amount_out,
        });
        Ok(amount_out)
    }
}

// ---------------------------------------------------------------------------
// SwapHelper
// ---------------------------------------------------------------------------

/// Direction of a trade, used only for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Slippage-bounded front end over a [`MarketMaker`].
#[derive(Debug, Clone)]
pub struct SwapHelper<M> {
    market: M,
}

impl<M: MarketMaker> SwapHelper<M> {
    pub fn new(market: M) -> Self {
        Self { market }
    }

    pub fn market(&self) -> &M {
        &self.market
    }

    pub fn market_mut(&mut self) -> &mut M {
        &mut self.market
    }

    /// Pure estimate of the output for `amount_in`.
    pub fn get_amount_out(&self, token_in: &Address, token_out: &Address, amount_in: u128) -> Result<u128, SwapError> {
        self.market.quote(token_in, token_out, amount_in)
    }

    /// Spends `amount_in` of the stable asset (`token_in`) on the RWA
    /// `token_out`.
    pub fn buy_rwa_asset(
        &mut self,
        token_in: &Address,
        token_out: &Address,
        amount_in: u128,
        max_slippage_bps: u16,
    ) -> Result<u128, SwapError> {
        self.execute(Side::Buy, token_in, token_out, amount_in, max_slippage_bps)
    }

    /// Sells `amount_in` of the RWA `token_in` for the stable asset
    /// `token_out`.
    pub fn sell_rwa_asset(
        &mut self,
        token_in: &Address,
        token_out: &Address,
        amount_in: u128,
        max_slippage_bps: u16,
    ) -> Result<u128, SwapError> {
        self.execute(Side::Sell, token_in, token_out, amount_in, max_slippage_bps)
    }

    fn execute(
        &mut self,
        side: Side,
        token_in: &Address,
        token_out: &Address,
        amount_in: u128,
        max_slippage_bps: u16,
    ) -> Result<u128, SwapError> {
        if amount_in == 0 {
            return Err(SwapError::ZeroAmount);
        }
        if token_in == token_out {
            return Err(SwapError::SameToken(*token_in));
        }
        if max_slippage_bps > MAX_BPS {
            return Err(SwapError::InvalidSlippage(max_slippage_bps));
        }

        let expected = self.market.quote(token_in, token_out, amount_in)?;
        if expected == 0 {
            return Err(SwapError::ZeroOutput {
                token_in: *token_in,
                amount_in,
            });
        }
        let min_out = deduct_bps(expected, max_slippage_bps)?;
        let actual = self.market.swap(token_in, token_out, amount_in, min_out)?;
        if actual < min_out {
            tracing::warn!(%side, %token_in, %token_out, expected, min_out, actual, "fill below slippage bound");
            return Err(SwapError::SlippageExceeded {
                expected,
                min_out,
                actual,
            });
        }

        let slippage_bps = if actual >= expected {
            0
        } else {
            mul_div(expected - actual, 10_000, expected, Rounding::Up)?
        };
        tracing::info!(%side, %token_in, %token_out, amount_in, amount_out = actual, slippage_bps, "swap executed");
        Ok(actual)
    }
}
