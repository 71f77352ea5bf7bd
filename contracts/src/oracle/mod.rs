//! # Oracle
//!
//! Dual-source price resolution for RWA tokens.
//!
//! A [`PriceFeed`] is one external source of truth for one asset. Feeds
//! report a raw signed answer with native decimals and the time it was last
//! updated; they do not judge freshness. The [`OracleAdapter`] owns the
//! per-asset wiring (primary, optional backup, staleness threshold) and
//! decides which reading, if any, is usable.
//!
//! Two in-process feed implementations ship with the crate:
//!
//! - [`AggregatorFeed`]: round-based, answers carry a round id.
//! - [`PushFeed`]: publisher-pushed price with exponent and confidence.

mod adapter;
mod aggregator_feed;
mod push_feed;

pub use adapter::{OracleAdapter, OracleConfig, OracleError, PriceSource, ResolvedPrice, SourceFailure};
pub use aggregator_feed::{AggregatorFeed, RoundData};
pub use push_feed::{PushFeed, PushPrice};

use std::fmt;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name under which a feed is registered with the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(pub String);

impl SourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SourceRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for SourceRef {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A raw reading as reported by a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedReading {
    /// Signed answer in the feed's native decimals.
    pub answer: i128,
    pub decimals: u8,
    /// When the source last updated this answer.
    pub updated_at: DateTime<Utc>,
}

/// A feed could not produce a reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The call to the source failed.
    #[error("feed is offline")]
    Offline,

    /// Nothing has been published yet.
    #[error("feed has no data")]
    NoData,

    /// The latest round was started but never answered.
    #[error("round {round_id} incomplete (answered in round {answered_in_round})")]
    IncompleteRound {
        round_id: u64,
        answered_in_round: u64,
    },

    /// Exponent cannot be expressed as a decimal count.
    #[error("unsupported price exponent {0}")]
    InvalidExponent(i32),

    /// Confidence interval too wide relative to the price.
    #[error("confidence {confidence} exceeds {max_bps} bps of price {price}")]
    ConfidenceTooWide { price: i64, confidence: u64, max_bps: u16 },
}

/// One external price source.
pub trait PriceFeed: Send + Sync {
    /// Human-readable description, used in logs.
    fn description(&self) -> String;

    /// The most recent reading.
    fn latest_reading(&self) -> Result<FeedReading, FeedError>;
}

/// Read-only price access consumed by the strategy and the ledger's
/// valuation query.
pub trait PriceOracle {
    /// Resolved price (18 decimals), its timestamp and which source served it.
    fn get_price_with_source(&self, asset: &Address) -> Result<ResolvedPrice, OracleError>;

    /// `true` when the primary source is stale or unavailable.
    fn is_price_stale(&self, asset: &Address) -> Result<bool, OracleError>;
}
