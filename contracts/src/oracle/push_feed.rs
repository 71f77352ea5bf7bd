//! Publisher-pushed price feed.
//!
//! Prices arrive as `price * 10^expo` with a confidence interval in the same
//! units. Only non-positive exponents make sense for a price; a confidence
//! interval wider than `max_confidence_bps` of the price marks the reading
//! unusable.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rwa_vault_protocol::config::{BPS_DENOMINATOR, DEFAULT_MAX_CONFIDENCE_BPS};
use serde::{Deserialize, Serialize};

use super::{FeedError, FeedReading, PriceFeed};

/// One published update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPrice {
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub publish_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PushState {
    latest: Option<PushPrice>,
    offline: bool,
}

#[derive(Debug)]
pub struct PushFeed {
    description: String,
    max_confidence_bps: u16,
    state: RwLock<PushState>,
}

impl PushFeed {
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_confidence_limit(description, DEFAULT_MAX_CONFIDENCE_BPS)
    }

    pub fn with_confidence_limit(description: impl Into<String>, max_confidence_bps: u16) -> Self {
        Self {
            description: description.into(),
            max_confidence_bps,
            state: RwLock::new(PushState::default()),
        }
    }

    /// Replaces the latest update.
    pub fn push(&self, price: i64, conf: u64, expo: i32, publish_time: DateTime<Utc>) {
        self.state.write().latest = Some(PushPrice {
            price,
            conf,
            expo,
            publish_time,
        });
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.write().offline = offline;
        tracing::debug!(feed = %self.description, offline, "push feed availability changed");
    }

    pub fn latest(&self) -> Option<PushPrice> {
        self.state.read().latest
    }

    fn check_confidence(&self, update: &PushPrice) -> Result<(), FeedError> {
        if update.price <= 0 {
            // Non-positive prices are rejected by the adapter.
            return Ok(());
        }
        let scaled_conf = (update.conf as u128).saturating_mul(BPS_DENOMINATOR);
        let allowed = (update.price as u128).saturating_mul(self.max_confidence_bps as u128);
        if scaled_conf > allowed {
            return Err(FeedError::ConfidenceTooWide {
                price: update.price,
                confidence: update.conf,
                max_bps: self.max_confidence_bps,
            });
        }
        Ok(())
    }
}

impl PriceFeed for PushFeed {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn latest_reading(&self) -> Result<FeedReading, FeedError> {
        let state = self.state.read();
        if state.offline {
            return Err(FeedError::Offline);
        }
        let update = state.latest.ok_or(FeedError::NoData)?;
        if update.expo > 0 {
            return Err(FeedError::InvalidExponent(update.expo));
        }
        let decimals = u8::try_from(update.expo.unsigned_abs())
            .map_err(|_| FeedError::InvalidExponent(update.expo))?;
        self.check_confidence(&update)?;
        Ok(FeedReading {
            answer: update.price as i128,
            decimals,
            updated_at: update.publish_time,
        })
    }
}
