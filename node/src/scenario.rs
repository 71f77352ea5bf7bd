//! # Scenario Replay
//!
//! A scenario is a JSON file describing the actors, the RWA assets with
//! their feeds and opening prices, and an ordered list of steps. The runner
//! wires a vault around a [`ManualClock`], replays the steps and returns a
//! [`ScenarioSummary`].
//!
//! A rejected step is logged, counted and recorded; the run continues with
//! the next step, exactly as a rejected call leaves the vault untouched.
//!
//! ```json
//! { "op": "deposit", "caller": "0xa1a1…", "assets": "1000" }
//! { "op": "rebalance_from_signals", "caller": "0xeeee…",
//!   "signals": [{ "asset": "0x0101…", "apy_bps": 520 }] }
//! ```
//!
//! Quantities are decimal strings (`"1000.5"`) or whole numbers, scaled to
//! 18 decimals.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rwa_vault_contracts::asset_registry::{AssetRegistry, AssetType, NewAsset};
use rwa_vault_contracts::oracle::{AggregatorFeed, OracleAdapter, OracleConfig, PriceFeed, PushFeed, SourceRef};
use rwa_vault_contracts::rebalance_strategy::{RebalanceStrategy, YieldSignal};
use rwa_vault_contracts::swap_helper::{SimulatedMarket, SwapHelper};
use rwa_vault_contracts::vault::{SharedVault, VaultLedger, VaultSnapshot};
use rwa_vault_protocol::access::{Role, RoleStore};
use rwa_vault_protocol::clock::{Clock, ManualClock};
use rwa_vault_protocol::config::{StrategyConfig, VaultConfig, PRICE_DECIMALS};
use rwa_vault_protocol::math::Wad;
use rwa_vault_protocol::Address;

use crate::metrics::VaultMetrics;

/// Scenario start time when the file does not set one (2023-11-14).
const DEFAULT_START_UNIX: i64 = 1_700_000_000;

/// Precision the simulated feeds publish at.
const FEED_DECIMALS: u8 = 8;

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

/// An 18-decimal quantity: `"1000.5"` or `1000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "DecimalRepr")]
pub struct Decimal(pub Wad);

impl Decimal {
    pub fn raw(self) -> u128 {
        self.0.raw()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DecimalRepr {
    Whole(u64),
    Text(String),
}

impl TryFrom<DecimalRepr> for Decimal {
    type Error = String;

    fn try_from(repr: DecimalRepr) -> Result<Self, Self::Error> {
        match repr {
            DecimalRepr::Whole(units) => Wad::from_units(u128::from(units))
                .map(Decimal)
                .map_err(|e| e.to_string()),
            DecimalRepr::Text(text) => text.parse::<Wad>().map(Decimal).map_err(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default = "default_start")]
    pub start_unix: i64,
    /// Holds DEFAULT_ADMIN and ADMIN.
    pub admin: Address,
    /// Granted REBALANCER at start.
    #[serde(default)]
    pub rebalancers: Vec<Address>,
    pub stable_asset: Address,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub default_staleness_secs: Option<u64>,
    #[serde(default)]
    pub market_fee_bps: u16,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
    pub steps: Vec<Step>,
}

fn default_start() -> i64 {
    DEFAULT_START_UNIX
}

fn default_true() -> bool {
    true
}

/// An RWA token: registry entry, feeds and opening price.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetSpec {
    pub token: Address,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub asset_type: AssetType,
    /// Opening price in the stable asset, published on every feed and used
    /// as the market rate.
    pub price: Decimal,
    #[serde(default)]
    pub primary: FeedKind,
    #[serde(default)]
    pub backup: Option<FeedKind>,
    #[serde(default)]
    pub staleness_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Round-based feed.
    #[default]
    Aggregator,
    /// Publisher-pushed price with confidence interval.
    Push,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSlot {
    #[default]
    Primary,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TradeSpec {
    pub asset: Address,
    pub amount: Decimal,
}

/// One scenario action. `receiver` and `owner` default to the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Deposit {
        caller: Address,
        assets: Decimal,
        receiver: Option<Address>,
    },
    Mint {
        caller: Address,
        shares: Decimal,
        receiver: Option<Address>,
    },
    Withdraw {
        caller: Address,
        assets: Decimal,
        receiver: Option<Address>,
        owner: Option<Address>,
    },
    Redeem {
        caller: Address,
        shares: Decimal,
        receiver: Option<Address>,
        owner: Option<Address>,
    },
    Transfer {
        caller: Address,
        to: Address,
        shares: Decimal,
    },
    Approve {
        caller: Address,
        spender: Address,
        shares: Decimal,
    },
    RequestWithdraw {
        caller: Address,
        shares: Decimal,
        receiver: Option<Address>,
    },
    Claim {
        caller: Address,
        request_id: u64,
    },
    AdvanceTime {
        secs: u64,
    },
    UpdateManagedAssets {
        caller: Address,
        value: Decimal,
    },
    /// Values the holdings through the oracle and applies the result.
    SyncNav {
        caller: Address,
    },
    Pause {
        caller: Address,
    },
    Unpause {
        caller: Address,
    },
    SetEmergencyWithdraw {
        caller: Address,
        enabled: bool,
    },
    SetCircuitBreaker {
        caller: Address,
        bps: u16,
    },
    /// Publishes a price on one feed and, by default, moves the market rate.
    SetPrice {
        asset: Address,
        price: Decimal,
        #[serde(default)]
        source: FeedSlot,
        #[serde(default = "default_true")]
        move_market: bool,
    },
    SetFeedOffline {
        asset: Address,
        #[serde(default)]
        source: FeedSlot,
        offline: bool,
    },
    /// Makes fills on one side of an asset's market land `bps` under quote.
    SetExecutionShortfall {
        asset: Address,
        side: TradeSide,
        bps: u16,
    },
    DeactivateAsset {
        caller: Address,
        asset: Address,
    },
    ReactivateAsset {
        caller: Address,
        asset: Address,
    },
    Rebalance {
        caller: Address,
        #[serde(default)]
        sells: Vec<TradeSpec>,
        #[serde(default)]
        buys: Vec<TradeSpec>,
    },
    /// Plans with the strategy, executes the plan and (by default) syncs
    /// the NAV afterwards.
    RebalanceFromSignals {
        caller: Address,
        signals: Vec<YieldSignal>,
        /// Idle balance left undeployed.
        #[serde(default)]
        keep_idle: Option<Decimal>,
        #[serde(default = "default_true")]
        sync_nav: bool,
    },
}

impl Step {
    /// Stable name for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Deposit { .. } => "deposit",
            Step::Mint { .. } => "mint",
            Step::Withdraw { .. } => "withdraw",
            Step::Redeem { .. } => "redeem",
            Step::Transfer { .. } => "transfer",
            Step::Approve { .. } => "approve",
            Step::RequestWithdraw { .. } => "request_withdraw",
            Step::Claim { .. } => "claim",
            Step::AdvanceTime { .. } => "advance_time",
            Step::UpdateManagedAssets { .. } => "update_managed_assets",
            Step::SyncNav { .. } => "sync_nav",
            Step::Pause { .. } => "pause",
            Step::Unpause { .. } => "unpause",
            Step::SetEmergencyWithdraw { .. } => "set_emergency_withdraw",
            Step::SetCircuitBreaker { .. } => "set_circuit_breaker",
            Step::SetPrice { .. } => "set_price",
            Step::SetFeedOffline { .. } => "set_feed_offline",
            Step::SetExecutionShortfall { .. } => "set_execution_shortfall",
            Step::DeactivateAsset { .. } => "deactivate_asset",
            Step::ReactivateAsset { .. } => "reactivate_asset",
            Step::Rebalance { .. } => "rebalance",
            Step::RebalanceFromSignals { .. } => "rebalance_from_signals",
        }
    }

    /// Share holders this step touches, for the summary's balance table.
    fn holders(&self) -> Vec<Address> {
        match self {
            Step::Deposit { caller, receiver, .. }
            | Step::Mint { caller, receiver, .. }
            | Step::RequestWithdraw { caller, receiver, .. } => {
                vec![*caller, receiver.unwrap_or(*caller)]
            }
            Step::Withdraw { caller, receiver, owner, .. } | Step::Redeem { caller, receiver, owner, .. } => {
                vec![*caller, receiver.unwrap_or(*caller), owner.unwrap_or(*caller)]
            }
            Step::Transfer { caller, to, .. } => vec![*caller, *to],
            Step::Claim { caller, .. } => vec![*caller],
            _ => Vec::new(),
        }
    }
}

/// Reads and parses a scenario file.
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse scenario {}", path.display()))
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub index: usize,
    pub op: &'static str,
    pub error: String,
}

/// What the runner prints when a scenario finishes.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub scenario: String,
    pub finished_at: DateTime<Utc>,
    pub steps: usize,
    pub failed_steps: usize,
    pub failures: Vec<StepFailure>,
    /// Events committed over the whole run.
    pub events: usize,
    pub vault: VaultSnapshot,
    pub share_balances: BTreeMap<Address, u128>,
    /// Pending (unclaimed) request ids per owner.
    pub pending_requests: BTreeMap<Address, Vec<u64>>,
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum FeedHandle {
    Aggregator(Arc<AggregatorFeed>),
    Push(Arc<PushFeed>),
}

impl FeedHandle {
    fn new(kind: FeedKind, description: String) -> Self {
        match kind {
            FeedKind::Aggregator => FeedHandle::Aggregator(Arc::new(AggregatorFeed::new(description, FEED_DECIMALS))),
            FeedKind::Push => FeedHandle::Push(Arc::new(PushFeed::new(description))),
        }
    }

    fn as_price_feed(&self) -> Arc<dyn PriceFeed> {
        match self {
            FeedHandle::Aggregator(feed) => feed.clone(),
            FeedHandle::Push(feed) => feed.clone(),
        }
    }

    /// Publishes `price`, truncated to the feed precision.
    fn publish(&self, price: Wad, at: DateTime<Utc>) -> Result<()> {
        let scaled = price.raw() / 10u128.pow(u32::from(PRICE_DECIMALS - FEED_DECIMALS));
        match self {
            FeedHandle::Aggregator(feed) => {
                feed.push_answer(i128::try_from(scaled)?, at);
            }
            FeedHandle::Push(feed) => {
                feed.push(i64::try_from(scaled)?, 0, -i32::from(FEED_DECIMALS), at);
            }
        }
        Ok(())
    }

    fn set_offline(&self, offline: bool) {
        match self {
            FeedHandle::Aggregator(feed) => feed.set_offline(offline),
            FeedHandle::Push(feed) => feed.set_offline(offline),
        }
    }
}

struct AssetFeeds {
    primary: FeedHandle,
    backup: Option<FeedHandle>,
}

impl AssetFeeds {
    fn slot(&self, asset: &Address, slot: FeedSlot) -> Result<&FeedHandle> {
        match slot {
            FeedSlot::Primary => Ok(&self.primary),
            FeedSlot::Backup => self
                .backup
                .as_ref()
                .ok_or_else(|| anyhow!("asset {asset} has no backup feed")),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// A vault and everything around it, driven step by step.
pub struct ScenarioRunner {
    name: String,
    stable: Address,
    clock: Arc<ManualClock>,
    registry: Arc<RwLock<AssetRegistry>>,
    oracle: OracleAdapter,
    feeds: HashMap<Address, AssetFeeds>,
    strategy: RebalanceStrategy,
    vault: SharedVault<SimulatedMarket>,
    metrics: VaultMetrics,
    holders: BTreeSet<Address>,
    events: usize,
    failures: Vec<StepFailure>,
}

impl ScenarioRunner {
    /// Builds the vault, registry, oracle and market described by `scenario`.
    pub fn new(scenario: &Scenario) -> Result<Self> {
        // Planned buys must stay fundable when sells fill at the tolerance.
        ensure!(
            scenario.strategy.max_slippage_bps >= scenario.vault.max_slippage_bps,
            "strategy max_slippage_bps {} is below the vault tolerance {}",
            scenario.strategy.max_slippage_bps,
            scenario.vault.max_slippage_bps
        );
        let clock = Arc::new(ManualClock::at_unix(scenario.start_unix));
        let admin = scenario.admin;
        let roles = Arc::new(RoleStore::with_clock(admin, clock.clone()));
        for rebalancer in &scenario.rebalancers {
            roles.grant_role(&admin, Role::Rebalancer, *rebalancer)?;
        }

        let mut registry = AssetRegistry::new(roles.clone(), clock.clone());
        let mut oracle = OracleAdapter::new(roles.clone(), clock.clone());
        if let Some(secs) = scenario.default_staleness_secs {
            oracle.set_default_staleness(&admin, secs)?;
        }
        let mut market = SimulatedMarket::new().with_fee_bps(scenario.market_fee_bps);
        let mut feeds = HashMap::new();

        for spec in &scenario.assets {
            let primary_ref = SourceRef::new(format!("{}-primary", spec.symbol));
            registry.register_asset(
                &admin,
                NewAsset {
                    token_address: spec.token,
                    name: spec.name.clone().unwrap_or_else(|| spec.symbol.clone()),
                    symbol: spec.symbol.clone(),
                    asset_type: spec.asset_type,
                    oracle_source: primary_ref.to_string(),
                },
            )?;

            let primary = FeedHandle::new(spec.primary, format!("{} / stable", spec.symbol));
            oracle.register_feed(&admin, primary_ref.clone(), primary.as_price_feed())?;
            primary.publish(spec.price.0, clock.now())?;
            let mut config = OracleConfig::new(primary_ref);

            let backup = match spec.backup {
                Some(kind) => {
                    let backup_ref = SourceRef::new(format!("{}-backup", spec.symbol));
                    let handle = FeedHandle::new(kind, format!("{} / stable backup", spec.symbol));
                    oracle.register_feed(&admin, backup_ref.clone(), handle.as_price_feed())?;
                    handle.publish(spec.price.0, clock.now())?;
                    config = config.with_backup(backup_ref);
                    Some(handle)
                }
                None => None,
            };
            if let Some(secs) = spec.staleness_secs {
                config = config.with_staleness(secs);
            }
            oracle.configure_asset(&admin, spec.token, config)?;
            market.set_price(spec.token, scenario.stable_asset, spec.price.0)?;
            feeds.insert(spec.token, AssetFeeds { primary, backup });
        }

        let registry = Arc::new(RwLock::new(registry));
        let ledger = VaultLedger::new(
            scenario.stable_asset,
            scenario.vault.clone(),
            roles,
            clock.clone(),
            registry.clone(),
            SwapHelper::new(market),
        )?;

        tracing::info!(
            scenario = %scenario.name,
            assets = scenario.assets.len(),
            steps = scenario.steps.len(),
            "scenario loaded"
        );

        Ok(Self {
            name: scenario.name.clone(),
            stable: scenario.stable_asset,
            clock,
            registry,
            oracle,
            feeds,
            strategy: RebalanceStrategy::new(scenario.strategy.clone())?,
            vault: SharedVault::new(ledger),
            metrics: VaultMetrics::new()?,
            holders: BTreeSet::new(),
            events: 0,
            failures: Vec::new(),
        })
    }

    pub fn metrics(&self) -> &VaultMetrics {
        &self.metrics
    }

    /// Replays `steps` in order and summarizes the final state.
    pub fn run(&mut self, steps: &[Step]) -> Result<ScenarioSummary> {
        for (index, step) in steps.iter().enumerate() {
            self.holders.extend(step.holders());
            match self.apply(step) {
                Ok(()) => tracing::info!(step = index, op = step.name(), "step applied"),
                Err(err) => {
                    tracing::warn!(step = index, op = step.name(), error = %format!("{err:#}"), "step rejected");
                    self.metrics.record_failure(step.name());
                    self.failures.push(StepFailure {
                        index,
                        op: step.name(),
                        error: format!("{err:#}"),
                    });
                }
            }
            let events = self.vault.with(|v| Ok(v.drain_events()))?;
            self.events += events.len();
            self.metrics.observe_events(&events);
        }

        let snapshot = self.vault.snapshot()?;
        self.metrics.observe_snapshot(&snapshot);
        let (share_balances, pending_requests) = self.vault.read(|v| {
            let balances = self.holders.iter().map(|h| (*h, v.balance_of(h))).collect();
            let pending = self
                .holders
                .iter()
                .map(|h| (*h, v.get_user_pending_requests(h)))
                .filter(|(_, ids)| !ids.is_empty())
                .collect();
            (balances, pending)
        })?;

        let summary = ScenarioSummary {
            scenario: self.name.clone(),
            finished_at: self.clock.now(),
            steps: steps.len(),
            failed_steps: self.failures.len(),
            failures: self.failures.clone(),
            events: self.events,
            vault: snapshot,
            share_balances,
            pending_requests,
        };
        tracing::info!(
            scenario = %summary.scenario,
            steps = summary.steps,
            failed = summary.failed_steps,
            total_assets = summary.vault.total_assets,
            share_price = %summary.vault.share_price,
            "scenario finished"
        );
        Ok(summary)
    }

    fn apply(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Deposit { caller, assets, receiver } => {
                self.vault.deposit(caller, assets.raw(), receiver.unwrap_or(*caller))?;
            }
            Step::Mint { caller, shares, receiver } => {
                self.vault.mint(caller, shares.raw(), receiver.unwrap_or(*caller))?;
            }
            Step::Withdraw {
                caller,
                assets,
                receiver,
                owner,
            } => {
                self.vault.withdraw(
                    caller,
                    assets.raw(),
                    receiver.unwrap_or(*caller),
                    owner.unwrap_or(*caller),
                )?;
            }
            Step::Redeem {
                caller,
                shares,
                receiver,
                owner,
            } => {
                self.vault.redeem(
                    caller,
                    shares.raw(),
                    receiver.unwrap_or(*caller),
                    owner.unwrap_or(*caller),
                )?;
            }
            Step::Transfer { caller, to, shares } => {
                self.vault.with(|v| v.transfer(caller, *to, shares.raw()))?;
            }
            Step::Approve { caller, spender, shares } => {
                self.vault.with(|v| v.approve(caller, *spender, shares.raw()))?;
            }
            Step::RequestWithdraw { caller, shares, receiver } => {
                self.vault
                    .request_withdraw(caller, shares.raw(), receiver.unwrap_or(*caller))?;
            }
            Step::Claim { caller, request_id } => {
                self.vault.claim_withdraw(caller, *request_id)?;
            }
            Step::AdvanceTime { secs } => {
                self.clock.advance_secs(*secs)?;
            }
            Step::UpdateManagedAssets { caller, value } => {
                self.vault.update_managed_assets(caller, value.raw())?;
            }
            Step::SyncNav { caller } => self.sync_nav(caller)?,
            Step::Pause { caller } => self.vault.pause(caller)?,
            Step::Unpause { caller } => self.vault.unpause(caller)?,
            Step::SetEmergencyWithdraw { caller, enabled } => {
                self.vault.set_emergency_withdraw(caller, *enabled)?;
            }
            Step::SetCircuitBreaker { caller, bps } => {
                self.vault.with(|v| v.set_circuit_breaker_threshold(caller, *bps))?;
            }
            Step::SetPrice {
                asset,
                price,
                source,
                move_market,
            } => {
                self.feeds_of(asset)?
                    .slot(asset, *source)?
                    .publish(price.0, self.clock.now())?;
                if *move_market {
                    let stable = self.stable;
                    self.vault.with(|v| {
                        v.swap_helper_mut().market_mut().set_price(*asset, stable, price.0)?;
                        Ok(())
                    })?;
                }
            }
            Step::SetFeedOffline { asset, source, offline } => {
                self.feeds_of(asset)?.slot(asset, *source)?.set_offline(*offline);
            }
            Step::SetExecutionShortfall { asset, side, bps } => {
                let (token_in, token_out) = match side {
                    TradeSide::Buy => (self.stable, *asset),
                    TradeSide::Sell => (*asset, self.stable),
                };
                self.vault.with(|v| {
                    v.swap_helper_mut()
                        .market_mut()
                        .set_execution_shortfall(token_in, token_out, *bps);
                    Ok(())
                })?;
            }
            Step::DeactivateAsset { caller, asset } => {
                self.registry.write().deactivate_asset(caller, asset)?;
            }
            Step::ReactivateAsset { caller, asset } => {
                self.registry.write().reactivate_asset(caller, asset)?;
            }
            Step::Rebalance { caller, sells, buys } => {
                let (sell_assets, sell_amounts): (Vec<_>, Vec<_>) = sells.iter().map(|t| (t.asset, t.amount.raw())).unzip();
                let (buy_assets, buy_amounts): (Vec<_>, Vec<_>) = buys.iter().map(|t| (t.asset, t.amount.raw())).unzip();
                self.vault
                    .rebalance(caller, &sell_assets, &sell_amounts, &buy_assets, &buy_amounts)?;
            }
            Step::RebalanceFromSignals {
                caller,
                signals,
                keep_idle,
                sync_nav,
            } => {
                let (holdings, idle) = self.vault.read(|v| (v.holdings().clone(), v.idle_assets()))?;
                let cash = idle.saturating_sub(keep_idle.map(Decimal::raw).unwrap_or(0));
                let plan = self
                    .strategy
                    .plan(&self.registry.read(), &self.oracle, &holdings, cash, signals)?;
                if plan.is_empty() {
                    tracing::info!("allocation already on target");
                } else {
                    let (sell_assets, sell_amounts, buy_assets, buy_amounts) = plan.into_arrays();
                    self.vault
                        .rebalance(caller, &sell_assets, &sell_amounts, &buy_assets, &buy_amounts)?;
                }
                if *sync_nav {
                    self.sync_nav(caller)?;
                }
            }
        }
        Ok(())
    }

    /// Revalues the holdings through the oracle and applies the result.
    fn sync_nav(&self, caller: &Address) -> Result<()> {
        let value = self.vault.read(|v| v.valuate_holdings(&self.oracle))??;
        let update = self.vault.update_managed_assets(caller, value)?;
        tracing::debug!(
            managed_assets_value = value,
            total_assets = update.total_assets,
            tripped = update.circuit_breaker_tripped,
            "NAV synced from oracle"
        );
        Ok(())
    }

    fn feeds_of(&self, asset: &Address) -> Result<&AssetFeeds> {
        self.feeds
            .get(asset)
            .ok_or_else(|| anyhow!("asset {asset} is not part of the scenario"))
    }
}

/// Runs a scenario and returns its summary with the metrics it produced.
pub fn run_scenario(scenario: &Scenario) -> Result<(ScenarioSummary, VaultMetrics)> {
    let mut runner = ScenarioRunner::new(scenario)?;
    let summary = runner.run(&scenario.steps)?;
    Ok((summary, runner.metrics().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwa_vault_protocol::config::WAD;

    const DEMO: &str = include_str!("../scenarios/demo.json");

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn units(n: u128) -> u128 {
        n * WAD
    }

    fn scenario(steps: serde_json::Value) -> Scenario {
        serde_json::from_value(serde_json::json!({
            "name": "inline",
            "admin": addr(0xAD),
            "rebalancers": [addr(0xEE)],
            "stable_asset": addr(0x5A),
            "assets": [
                {
                    "token": addr(0x01),
                    "symbol": "UST3M",
                    "asset_type": "treasury_bill",
                    "price": "1.00",
                    "backup": "push"
                }
            ],
            "steps": steps
        }))
        .unwrap()
    }

    #[test]
    fn decimals_accept_strings_and_whole_numbers() {
        let parsed: Vec<Decimal> = serde_json::from_str(r#"["1000.5", 7, "0.000000000000000001"]"#).unwrap();
        assert_eq!(parsed[0].raw(), 1_000_500_000_000_000_000_000);
        assert_eq!(parsed[1].raw(), units(7));
        assert_eq!(parsed[2].raw(), 1);
        assert!(serde_json::from_str::<Decimal>(r#""1.2.3""#).is_err());
    }

    #[test]
    fn failed_steps_are_counted_and_the_run_continues() {
        let scenario = scenario(serde_json::json!([
            { "op": "deposit", "caller": addr(0xA1), "assets": "50" },
            { "op": "deposit", "caller": addr(0xA1), "assets": "1000" },
            { "op": "pause", "caller": addr(0xA1) },
            { "op": "redeem", "caller": addr(0xA1), "shares": "400" }
        ]));
        let (summary, metrics) = run_scenario(&scenario).unwrap();

        assert_eq!(summary.steps, 4);
        assert_eq!(summary.failed_steps, 2);
        assert_eq!(summary.failures[0].index, 0);
        assert_eq!(summary.failures[0].op, "deposit");
        assert!(summary.failures[0].error.contains("below the minimum"));
        assert_eq!(summary.failures[1].op, "pause");
        assert_eq!(summary.share_balances[&addr(0xA1)], units(600));
        assert_eq!(summary.vault.total_assets, units(600));
        assert_eq!(metrics.deposits_total.get(), 1);
        assert_eq!(metrics.withdrawals_total.get(), 1);
        assert_eq!(metrics.failed_steps_total.with_label_values(&["deposit"]).get(), 1);
    }

    #[test]
    fn backup_feed_keeps_nav_sync_alive() {
        let scenario = scenario(serde_json::json!([
            { "op": "deposit", "caller": addr(0xA1), "assets": "10000" },
            { "op": "rebalance", "caller": addr(0xEE), "buys": [{ "asset": addr(0x01), "amount": "4000" }] },
            { "op": "advance_time", "secs": 7201 },
            { "op": "set_feed_offline", "asset": addr(0x01), "offline": true },
            { "op": "set_price", "asset": addr(0x01), "source": "backup", "price": "1.02", "move_market": false },
            { "op": "sync_nav", "caller": addr(0xEE) }
        ]));
        let (summary, metrics) = run_scenario(&scenario).unwrap();

        assert!(summary.failures.is_empty(), "{:?}", summary.failures);
        assert_eq!(summary.vault.managed_assets_value, units(4_080));
        assert_eq!(summary.vault.total_assets, units(10_080));
        assert_eq!(metrics.rebalances_total.get(), 1);
    }

    #[test]
    fn oversized_time_jump_fails_the_step() {
        let scenario = scenario(serde_json::json!([
            { "op": "advance_time", "secs": u64::MAX },
            { "op": "advance_time", "secs": 60 }
        ]));
        let (summary, metrics) = run_scenario(&scenario).unwrap();

        assert_eq!(summary.failed_steps, 1);
        assert_eq!(summary.failures[0].op, "advance_time");
        assert!(summary.failures[0].error.contains("cannot advance"));
        assert_eq!(summary.finished_at.timestamp(), default_start() + 60);
        assert_eq!(metrics.failed_steps_total.with_label_values(&["advance_time"]).get(), 1);
    }

    #[test]
    fn strategy_haircut_must_cover_vault_tolerance() {
        let mut scenario = scenario(serde_json::json!([]));
        scenario.strategy.max_slippage_bps = 50;
        let err = run_scenario(&scenario).unwrap_err();
        assert!(err.to_string().contains("below the vault tolerance"));
    }

    #[test]
    fn demo_scenario_replays() {
        let scenario: Scenario = serde_json::from_str(DEMO).unwrap();
        let (summary, _) = run_scenario(&scenario).unwrap();

        // Only the early claim is rejected.
        assert_eq!(summary.failed_steps, 1, "{:?}", summary.failures);
        assert_eq!(summary.failures[0].op, "claim");
        assert!(summary.failures[0].error.contains("not claimable"));

        let vault = &summary.vault;
        assert!(!vault.paused);
        assert_eq!(vault.total_shares, units(12_500));
        assert_eq!(vault.locked_shares, 0);
        assert_eq!(vault.idle_assets, 448_970_000_000_000_000_000);
        assert_eq!(vault.managed_assets_value, 12_244_944_000_000_000_000_000);
        assert_eq!(summary.share_balances[&addr(0xA1)], units(8_000));
        assert_eq!(summary.share_balances[&addr(0xB0)], units(4_500));
        assert!(summary.pending_requests.is_empty());
    }

    #[test]
    fn load_scenario_reports_the_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_scenario(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
        assert!(load_scenario(&dir.path().join("missing.json")).is_err());
    }
}
