//! # Fixed-Point Money Math
//!
//! Shares, assets and prices are unsigned integers. Prices and ratios use
//! an 18-decimal fixed-point scale ([`Wad`]); percentages use basis points.
//! Floating point never touches a balance.
//!
//! Products of two 18-decimal amounts easily exceed `u128` (10^21 × 10^21),
//! so every multiply-then-divide goes through a 256-bit intermediate and
//! rounds in an explicitly requested direction.

use alloy_primitives::{ruint::UintTryTo, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BPS_DENOMINATOR, MAX_BPS, PRICE_DECIMALS, WAD};

/// Errors raised by fixed-point arithmetic.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MathError {
    /// A divisor was zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A result did not fit into 128 bits.
    #[error("arithmetic overflow")]
    Overflow,

    /// A subtraction would have gone below zero.
    #[error("arithmetic underflow")]
    Underflow,
}

/// Direction in which a non-exact division is resolved.
///
/// Whoever computes an amount owed *to* the vault rounds [`Rounding::Up`];
/// whoever computes an amount owed *by* the vault rounds [`Rounding::Down`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Toward zero.
    Down,
    /// Away from zero.
    Up,
}

#[inline]
fn convert_from_u128(value: u128) -> U256 {
    U256::from_limbs([value as u64, (value >> 64) as u64, 0, 0])
}

#[inline]
fn try_convert_to_u128(value: U256) -> Option<u128> {
    value.uint_try_to().ok()
}

/// Computes `a * b / denominator` with a 256-bit intermediate.
///
/// # Errors
///
/// [`MathError::DivisionByZero`] when `denominator == 0`,
/// [`MathError::Overflow`] when the quotient does not fit in `u128`.
pub fn mul_div(a: u128, b: u128, denominator: u128, rounding: Rounding) -> Result<u128, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let product = convert_from_u128(a) * convert_from_u128(b);
    let denominator = convert_from_u128(denominator);
    let mut quotient = product / denominator;
    if rounding == Rounding::Up && !(product % denominator).is_zero() {
        quotient += U256::ONE;
    }
    try_convert_to_u128(quotient).ok_or(MathError::Overflow)
}

/// Takes `bps` basis points of `amount`.
pub fn apply_bps(amount: u128, bps: u16, rounding: Rounding) -> Result<u128, MathError> {
    mul_div(amount, bps as u128, BPS_DENOMINATOR, rounding)
}

/// `amount * (1 - bps / 10000)`, rounded down. Used for minimum-output
/// bounds.
pub fn deduct_bps(amount: u128, bps: u16) -> Result<u128, MathError> {
    let keep = MAX_BPS.checked_sub(bps).ok_or(MathError::Underflow)?;
    apply_bps(amount, keep, Rounding::Down)
}

/// Rescales a value with `decimals` native decimals to 18 decimals.
///
/// Scales up by `10^(18-d)` when `d < 18` and down by integer division
/// when `d > 18`. A down-scale factor too large for `u128` yields zero,
/// because no `u128` value survives it.
pub fn normalize_to_wad(value: u128, decimals: u8) -> Result<u128, MathError> {
    use std::cmp::Ordering;

    match decimals.cmp(&PRICE_DECIMALS) {
        Ordering::Equal => Ok(value),
        Ordering::Less => {
            let factor = 10u128
                .checked_pow((PRICE_DECIMALS - decimals) as u32)
                .ok_or(MathError::Overflow)?;
            value.checked_mul(factor).ok_or(MathError::Overflow)
        }
        Ordering::Greater => match 10u128.checked_pow((decimals - PRICE_DECIMALS) as u32) {
            Some(factor) => Ok(value / factor),
            None => Ok(0),
        },
    }
}

// ---------------------------------------------------------------------------
// Wad
// ---------------------------------------------------------------------------

/// An unsigned 18-decimal fixed-point number (`1.0 == Wad(10^18)`).
///
/// Used for prices, share prices and exchange rates. Plain token amounts
/// stay as raw `u128`; a `Wad` is what you multiply them by.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wad(pub u128);

impl Wad {
    /// Scale factor: `10^18`.
    pub const SCALE: u128 = WAD;
    /// 0.0
    pub const ZERO: Wad = Wad(0);
    /// 1.0
    pub const ONE: Wad = Wad(WAD);

    /// Wraps a raw 18-decimal integer.
    #[inline]
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Whole units, e.g. `Wad::from_units(3)` is 3.0.
    pub fn from_units(units: u128) -> Result<Self, MathError> {
        units.checked_mul(WAD).map(Self).ok_or(MathError::Overflow)
    }

    /// Builds `numerator / denominator` as a fixed-point value.
    pub fn from_ratio(numerator: u128, denominator: u128, rounding: Rounding) -> Result<Self, MathError> {
        mul_div(numerator, WAD, denominator, rounding).map(Self)
    }

    /// The raw 18-decimal integer.
    #[inline]
    pub const fn raw(&self) -> u128 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `amount * self`, e.g. token units times a price.
    pub fn mul_amount(&self, amount: u128, rounding: Rounding) -> Result<u128, MathError> {
        mul_div(amount, self.0, WAD, rounding)
    }

    /// `value / self`, e.g. a USD value divided by a price gives token units.
    pub fn div_amount(&self, value: u128, rounding: Rounding) -> Result<u128, MathError> {
        mul_div(value, WAD, self.0, rounding)
    }
}

/// Why a decimal string could not be read as a [`Wad`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseWadError {
    #[error("empty decimal string")]
    Empty,

    #[error("invalid digit in {0:?}")]
    InvalidDigit(String),

    #[error("{0:?} has more than 18 fractional digits")]
    TooPrecise(String),

    #[error("{0:?} does not fit in 128 bits")]
    Overflow(String),
}

impl std::str::FromStr for Wad {
    type Err = ParseWadError;

    /// Parses `"1"`, `"1.05"` or `"1_000.5"` exactly. Underscores are
    /// ignored; more than 18 fractional digits are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
        if cleaned.is_empty() {
            return Err(ParseWadError::Empty);
        }
        let (integral, fraction) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
        if integral.is_empty() && fraction.is_empty() {
            return Err(ParseWadError::InvalidDigit(s.to_string()));
        }
        if !integral.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(ParseWadError::InvalidDigit(s.to_string()));
        }
        if fraction.len() > PRICE_DECIMALS as usize {
            return Err(ParseWadError::TooPrecise(s.to_string()));
        }

        let overflow = || ParseWadError::Overflow(s.to_string());
        let whole: u128 = if integral.is_empty() {
            0
        } else {
            integral.parse().map_err(|_| overflow())?
        };
        let padded = format!("{fraction:0<18}");
        let frac: u128 = padded.parse().map_err(|_| overflow())?;
        whole
            .checked_mul(WAD)
            .and_then(|w| w.checked_add(frac))
            .map(Wad)
            .ok_or_else(overflow)
    }
}

impl std::fmt::Display for Wad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let integral = self.0 / WAD;
        let fraction = self.0 % WAD;
        write!(f, "{integral}.{fraction:018}")
    }
}
