//! Per-asset primary/backup price resolution.
//!
//! Resolution rules:
//!
//! 1. A source is unavailable if the feed call fails, the answer is not
//!    positive, or the answer scales to zero at 18 decimals.
//! 2. A reading is stale iff `now - updated_at > threshold`. Readings
//!    stamped in the future are not stale.
//! 3. The primary is used when available and fresh. Otherwise the backup
//!    is used under the same rules and tagged [`PriceSource::Backup`].
//! 4. Values from the two sources are never blended, and nothing retries.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use rwa_vault_protocol::access::{AccessError, Role, RoleStore};
use rwa_vault_protocol::clock::Clock;
use rwa_vault_protocol::config::DEFAULT_STALENESS_THRESHOLD_SECS;
use rwa_vault_protocol::math::{normalize_to_wad, MathError, Wad};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{FeedError, PriceFeed, PriceOracle, SourceRef};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why one source could not serve a price.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceFailure {
    #[error("source {0} is not registered")]
    UnknownSource(SourceRef),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("non-positive answer {0}")]
    NonPositive(i128),

    #[error("answer rounds to zero at 18 decimals")]
    ZeroAfterScaling,

    #[error("answer out of range: {0}")]
    Scaling(MathError),

    #[error("price is {age_secs}s old, threshold is {threshold_secs}s")]
    Stale { age_secs: i64, threshold_secs: u64 },
}

/// Errors surfaced by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// No [`OracleConfig`] exists for the asset.
    #[error("asset {0} has no oracle configuration")]
    NotConfigured(Address),

    /// A config referenced a feed that was never registered.
    #[error("unknown price source {0}")]
    UnknownSource(SourceRef),

    /// A feed name is already taken.
    #[error("price source {0} already registered")]
    SourceExists(SourceRef),

    /// Neither source produced a fresh, positive price.
    #[error(
        "no valid price for {asset} (primary: {primary}; backup: {})",
        .backup.as_ref().map_or_else(|| "not configured".to_string(), ToString::to_string)
    )]
    NoValidPrice {
        asset: Address,
        primary: SourceFailure,
        backup: Option<SourceFailure>,
    },

    /// Thresholds must be positive.
    #[error("staleness threshold must be greater than zero")]
    ZeroThreshold,

    #[error(transparent)]
    Unauthorized(#[from] AccessError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which source served a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceSource {
    Primary,
    Backup,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceSource::Primary => write!(f, "PRIMARY"),
            PriceSource::Backup => write!(f, "BACKUP"),
        }
    }
}

/// A usable price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    /// 18-decimal price of one whole token in stable-asset units.
    pub price: Wad,
    pub updated_at: DateTime<Utc>,
    pub source: PriceSource,
}

/// Wiring for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub primary: SourceRef,
    #[serde(default)]
    pub backup: Option<SourceRef>,
    /// Overrides the adapter-wide threshold when set.
    #[serde(default)]
    pub staleness_threshold_secs: Option<u64>,
}

impl OracleConfig {
    pub fn new(primary: impl Into<SourceRef>) -> Self {
        Self {
            primary: primary.into(),
            backup: None,
            staleness_threshold_secs: None,
        }
    }

    pub fn with_backup(mut self, backup: impl Into<SourceRef>) -> Self {
        self.backup = Some(backup.into());
        self
    }

    pub fn with_staleness(mut self, secs: u64) -> Self {
        self.staleness_threshold_secs = Some(secs);
        self
    }
}

// ---------------------------------------------------------------------------
// OracleAdapter
// ---------------------------------------------------------------------------

pub struct OracleAdapter {
    roles: Arc<RoleStore>,
    clock: Arc<dyn Clock>,
    feeds: HashMap<SourceRef, Arc<dyn PriceFeed>>,
    configs: HashMap<Address, OracleConfig>,
    default_staleness_secs: u64,
}

impl OracleAdapter {
    pub fn new(roles: Arc<RoleStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            roles,
            clock,
            feeds: HashMap::new(),
            configs: HashMap::new(),
            default_staleness_secs: DEFAULT_STALENESS_THRESHOLD_SECS,
        }
    }

    // -- administration -----------------------------------------------------

    /// Makes a feed addressable by name.
    pub fn register_feed(
        &mut self,
        caller: &Address,
        source: SourceRef,
        feed: Arc<dyn PriceFeed>,
    ) -> Result<(), OracleError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        if self.feeds.contains_key(&source) {
            return Err(OracleError::SourceExists(source));
        }
        tracing::info!(%source, description = %feed.description(), "price source registered");
        self.feeds.insert(source, feed);
        Ok(())
    }

    /// Sets (or replaces) the sources used for `asset`.
    ///
    /// # Errors
    ///
    /// [`OracleError::UnknownSource`] if either source is not registered,
    /// [`OracleError::ZeroThreshold`] for a zero override.
    pub fn configure_asset(&mut self, caller: &Address, asset: Address, config: OracleConfig) -> Result<(), OracleError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        if config.staleness_threshold_secs == Some(0) {
            return Err(OracleError::ZeroThreshold);
        }
        for source in std::iter::once(&config.primary).chain(config.backup.as_ref()) {
            if !self.feeds.contains_key(source) {
                return Err(OracleError::UnknownSource(source.clone()));
            }
        }
        tracing::info!(
            %asset,
            primary = %config.primary,
            backup = ?config.backup.as_ref().map(SourceRef::as_str),
            threshold = ?config.staleness_threshold_secs,
            "oracle configured"
        );
        self.configs.insert(asset, config);
        Ok(())
    }

    pub fn remove_asset_config(&mut self, caller: &Address, asset: &Address) -> Result<OracleConfig, OracleError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        let removed = self
            .configs
            .remove(asset)
            .ok_or(OracleError::NotConfigured(*asset))?;
        tracing::info!(%asset, "oracle configuration removed");
        Ok(removed)
    }

    /// Changes the threshold for assets without an override.
    pub fn set_default_staleness(&mut self, caller: &Address, secs: u64) -> Result<(), OracleError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        if secs == 0 {
            return Err(OracleError::ZeroThreshold);
        }
        self.default_staleness_secs = secs;
        tracing::info!(secs, "default staleness threshold updated");
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    pub fn is_configured(&self, asset: &Address) -> bool {
        self.configs.contains_key(asset)
    }

    pub fn config(&self, asset: &Address) -> Option<&OracleConfig> {
        self.configs.get(asset)
    }

    pub fn default_staleness_secs(&self) -> u64 {
        self.default_staleness_secs
    }

    /// Threshold in force for `asset`.
    pub fn staleness_threshold(&self, asset: &Address) -> Result<u64, OracleError> {
        let config = self.configs.get(asset).ok_or(OracleError::NotConfigured(*asset))?;
        Ok(config
            .staleness_threshold_secs
            .unwrap_or(self.default_staleness_secs))
    }

    /// 18-decimal price of `asset`.
    pub fn get_price(&self, asset: &Address) -> Result<Wad, OracleError> {
        self.resolve(asset).map(|r| r.price)
    }

    pub fn get_price_with_timestamp(&self, asset: &Address) -> Result<(Wad, DateTime<Utc>), OracleError> {
        self.resolve(asset).map(|r| (r.price, r.updated_at))
    }

    pub fn get_price_with_source(&self, asset: &Address) -> Result<(Wad, PriceSource), OracleError> {
        self.resolve(asset).map(|r| (r.price, r.source))
    }

    /// `true` when the primary source is stale or unavailable, i.e. when a
    /// price read right now would not come from the primary.
    pub fn is_price_stale(&self, asset: &Address) -> Result<bool, OracleError> {
        let config = self.configs.get(asset).ok_or(OracleError::NotConfigured(*asset))?;
        let threshold = self.staleness_threshold(asset)?;
        Ok(self.read_source(&config.primary, threshold, self.clock.now()).is_err())
    }

    /// Full resolution: price, timestamp and serving source.
    pub fn resolve(&self, asset: &Address) -> Result<ResolvedPrice, OracleError> {
        let config = self.configs.get(asset).ok_or(OracleError::NotConfigured(*asset))?;
        let threshold = self.staleness_threshold(asset)?;
        let now = self.clock.now();

        let primary_failure = match self.read_source(&config.primary, threshold, now) {
            Ok((price, updated_at)) => {
                tracing::debug!(%asset, %price, "price served by primary");
                return Ok(ResolvedPrice {
                    price,
                    updated_at,
                    source: PriceSource::Primary,
                });
            }
            Err(failure) => failure,
        };

        let Some(backup) = &config.backup else {
            tracing::warn!(%asset, reason = %primary_failure, "primary unusable and no backup configured");
            return Err(OracleError::NoValidPrice {
                asset: *asset,
                primary: primary_failure,
                backup: None,
            });
        };

        match self.read_source(backup, threshold, now) {
            Ok((price, updated_at)) => {
                tracing::warn!(%asset, %price, reason = %primary_failure, "failing over to backup price source");
                Ok(ResolvedPrice {
                    price,
                    updated_at,
                    source: PriceSource::Backup,
                })
            }
            Err(backup_failure) => {
                tracing::warn!(
                    %asset,
                    primary = %primary_failure,
                    backup = %backup_failure,
                    "no usable price source"
                );
                Err(OracleError::NoValidPrice {
                    asset: *asset,
                    primary: primary_failure,
                    backup: Some(backup_failure),
                })
            }
        }
    }

    fn read_source(
        &self,
        source: &SourceRef,
        threshold_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<(Wad, DateTime<Utc>), SourceFailure> {
        let feed = self
            .feeds
            .get(source)
            .ok_or_else(|| SourceFailure::UnknownSource(source.clone()))?;
        let reading = feed.latest_reading()?;
        if reading.answer <= 0 {
            return Err(SourceFailure::NonPositive(reading.answer));
        }
        let age_secs = (now - reading.updated_at).num_seconds();
        if age_secs > 0 && age_secs as u64 > threshold_secs {
            return Err(SourceFailure::Stale {
                age_secs,
                threshold_secs,
            });
        }
        let price = normalize_to_wad(reading.answer as u128, reading.decimals).map_err(SourceFailure::Scaling)?;
        if price == 0 {
            return Err(SourceFailure::ZeroAfterScaling);
        }
        Ok((Wad(price), reading.updated_at))
    }
}

impl PriceOracle for OracleAdapter {
    fn get_price_with_source(&self, asset: &Address) -> Result<ResolvedPrice, OracleError> {
        self.resolve(asset)
    }

    fn is_price_stale(&self, asset: &Address) -> Result<bool, OracleError> {
        OracleAdapter::is_price_stale(self, asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{AggregatorFeed, PushFeed};
    use rwa_vault_protocol::clock::ManualClock;
    use rwa_vault_protocol::config::WAD;

    const START: i64 = 1_700_000_000;

    fn admin() -> Address {
        Address::repeat_byte(0xAD)
    }

    fn asset() -> Address {
        Address::repeat_byte(0x01)
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        primary: Arc<AggregatorFeed>,
        backup: Arc<PushFeed>,
        adapter: OracleAdapter,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_unix(START));
        let roles = Arc::new(RoleStore::new(admin()));
        let mut adapter = OracleAdapter::new(roles, clock.clone());
        let primary = Arc::new(AggregatorFeed::new("primary", 8));
        let backup = Arc::new(PushFeed::new("backup"));
        adapter
            .register_feed(&admin(), "agg".into(), primary.clone())
            .unwrap();
        adapter
            .register_feed(&admin(), "push".into(), backup.clone())
            .unwrap();
        adapter
            .configure_asset(&admin(), asset(), OracleConfig::new("agg").with_backup("push"))
            .unwrap();
        Fixture {
            clock,
            primary,
            backup,
            adapter,
        }
    }

    #[test]
    fn fresh_primary_is_normalized_and_tagged() {
        let f = fixture();
        f.primary.push_answer(101_500_000, f.clock.now()); // 1.015 at 8 decimals
        let resolved = f.adapter.resolve(&asset()).unwrap();
        assert_eq!(resolved.price, Wad(1_015_000_000_000_000_000));
        assert_eq!(resolved.source, PriceSource::Primary);
        assert!(!f.adapter.is_price_stale(&asset()).unwrap());
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let f = fixture();
        f.primary.push_answer(100_000_000, f.clock.now());
        f.clock.advance_secs(DEFAULT_STALENESS_THRESHOLD_SECS).unwrap();
        assert_eq!(
            f.adapter.get_price_with_source(&asset()).unwrap().1,
            PriceSource::Primary
        );
        f.clock.advance_secs(1).unwrap();
        assert!(f.adapter.is_price_stale(&asset()).unwrap());
    }

    #[test]
    fn stale_primary_fails_over_to_backup() {
        let f = fixture();
        f.primary.push_answer(100_000_000, f.clock.now());
        f.clock.advance_secs(3 * 3_600).unwrap();
        f.backup.push(99_000_000, 0, -8, f.clock.now());

        let (price, source) = f.adapter.get_price_with_source(&asset()).unwrap();
        assert_eq!(source, PriceSource::Backup);
        assert_eq!(price, Wad(990_000_000_000_000_000));
    }

    #[test]
    fn non_positive_primary_is_unavailable() {
        let f = fixture();
        f.primary.push_answer(0, f.clock.now());
        f.backup.push(100_000_000, 0, -8, f.clock.now());
        assert_eq!(
            f.adapter.get_price_with_source(&asset()).unwrap().1,
            PriceSource::Backup
        );
    }

    #[test]
    fn both_sources_down_is_an_error() {
        let f = fixture();
        f.primary.set_offline(true);
        f.backup.push(100_000_000, 0, -8, f.clock.now());
        f.clock.advance_secs(10_000).unwrap();
        let err = f.adapter.get_price(&asset()).unwrap_err();
        match err {
            OracleError::NoValidPrice { primary, backup, .. } => {
                assert_eq!(primary, SourceFailure::Feed(FeedError::Offline));
                assert!(matches!(backup, Some(SourceFailure::Stale { .. })));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn future_timestamps_are_not_stale() {
        let f = fixture();
        f.primary
            .push_answer(100_000_000, f.clock.now() + chrono::Duration::minutes(5));
        assert_eq!(f.adapter.get_price(&asset()).unwrap(), Wad(WAD));
    }

    #[test]
    fn per_asset_threshold_overrides_default() {
        let mut f = fixture();
        f.adapter
            .configure_asset(
                &admin(),
                asset(),
                OracleConfig::new("agg").with_staleness(60),
            )
            .unwrap();
        f.primary.push_answer(100_000_000, f.clock.now());
        f.clock.advance_secs(61).unwrap();
        assert_eq!(f.adapter.staleness_threshold(&asset()).unwrap(), 60);
        assert!(matches!(
            f.adapter.get_price(&asset()),
            Err(OracleError::NoValidPrice { backup: None, .. })
        ));
    }

    #[test]
    fn unconfigured_asset_and_unknown_source_rejected() {
        let mut f = fixture();
        let other = Address::repeat_byte(0x02);
        assert_eq!(
            f.adapter.get_price(&other),
            Err(OracleError::NotConfigured(other))
        );
        assert_eq!(
            f.adapter
                .configure_asset(&admin(), other, OracleConfig::new("nope")),
            Err(OracleError::UnknownSource("nope".into()))
        );
    }

    #[test]
    fn configuration_is_admin_only() {
        let mut f = fixture();
        let stranger = Address::repeat_byte(0x99);
        assert!(matches!(
            f.adapter.set_default_staleness(&stranger, 10),
            Err(OracleError::Unauthorized(_))
        ));
        assert_eq!(
            f.adapter.set_default_staleness(&admin(), 0),
            Err(OracleError::ZeroThreshold)
        );
    }
}
