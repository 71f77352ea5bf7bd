//! # Vault Ledger
//!
//! The accounting engine. Users deposit the stable asset and receive shares
//! priced at current NAV; they leave either instantly (small amounts, paid
//! from idle balance) or through the delayed withdrawal queue.
//!
//! ## Pricing
//!
//! ```text
//! total_assets = idle_asset_balance + managed_assets_value
//! shares_out   = assets * total_shares / total_assets
//! assets_out   = shares * total_assets / total_shares
//! ```
//!
//! Whichever side of a conversion the vault is paying rounds down; whatever
//! the user owes rounds up. With no shares outstanding the first deposit
//! is priced 1:1.
//!
//! ## Atomicity
//!
//! Every mutation runs against a staged copy of [`VaultState`] and is
//! committed, together with its events, only if every step succeeds.
//! Rebalance additionally stages the swap helper so a failed trade leaves
//! neither the ledger nor the market touched.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rwa_vault_protocol::access::{Role, RoleStore};
use rwa_vault_protocol::clock::Clock;
use rwa_vault_protocol::config::{ConfigError, VaultConfig, BPS_DENOMINATOR, MAX_BPS};
use rwa_vault_protocol::events::{EmittedEvent, EventLog, TradeFill, VaultEvent};
use rwa_vault_protocol::math::{mul_div, MathError, Rounding, Wad};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::VaultError;
use super::share_ledger::ShareLedger;
use super::withdrawal_queue::{RequestStatus, WithdrawRequest, WithdrawalQueue};
use crate::asset_registry::AssetRegistry;
use crate::oracle::PriceOracle;
use crate::swap_helper::{MarketMaker, SwapHelper};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything an operation may change. Cloned to stage a unit of work.
#[derive(Debug, Clone, Default)]
pub struct VaultState {
    idle_asset_balance: u128,
    /// Book value of the RWA holdings. Revalued only by
    /// `update_managed_assets`; rebalance moves traded value in and out.
    managed_assets_value: u128,
    paused: bool,
    emergency_withdraw_enabled: bool,
    circuit_breaker_threshold_bps: u16,
    last_nav_update: Option<DateTime<Utc>>,
    shares: ShareLedger,
    queue: WithdrawalQueue,
    /// RWA token units held by the vault.
    holdings: BTreeMap<Address, u128>,
}

impl VaultState {
    fn total_assets(&self) -> Result<u128, VaultError> {
        self.idle_asset_balance
            .checked_add(self.managed_assets_value)
            .ok_or(VaultError::Math(MathError::Overflow))
    }

    fn convert_to_shares(&self, assets: u128, rounding: Rounding) -> Result<u128, VaultError> {
        let supply = self.shares.total_supply();
        if supply == 0 {
            return Ok(assets);
        }
        let total = self.total_assets()?;
        if total == 0 {
            return Err(VaultError::ZeroNav);
        }
        Ok(mul_div(assets, supply, total, rounding)?)
    }

    fn convert_to_assets(&self, shares: u128, rounding: Rounding) -> Result<u128, VaultError> {
        let supply = self.shares.total_supply();
        if supply == 0 {
            return Ok(shares);
        }
        Ok(mul_div(shares, self.total_assets()?, supply, rounding)?)
    }

    fn share_price(&self) -> Result<Wad, VaultError> {
        let supply = self.shares.total_supply();
        if supply == 0 {
            return Ok(Wad::ONE);
        }
        Ok(Wad::from_ratio(self.total_assets()?, supply, Rounding::Down)?)
    }

    /// The instant path is closed while paused unless emergency mode is on.
    fn ensure_instant_open(&self) -> Result<(), VaultError> {
        if self.paused && !self.emergency_withdraw_enabled {
            return Err(VaultError::Paused);
        }
        Ok(())
    }

    fn credit_idle(&mut self, amount: u128) -> Result<(), VaultError> {
        self.idle_asset_balance = self
            .idle_asset_balance
            .checked_add(amount)
            .ok_or(VaultError::Math(MathError::Overflow))?;
        Ok(())
    }

    fn debit_idle(&mut self, amount: u128) -> Result<(), VaultError> {
        self.idle_asset_balance =
            self.idle_asset_balance
                .checked_sub(amount)
                .ok_or(VaultError::InsufficientLiquidity {
                    available: self.idle_asset_balance,
                    required: amount,
                })?;
        Ok(())
    }

    fn credit_holding(&mut self, asset: Address, units: u128) -> Result<(), VaultError> {
        let held = self.holdings.entry(asset).or_insert(0);
        *held = held.checked_add(units).ok_or(VaultError::Math(MathError::Overflow))?;
        Ok(())
    }

    fn debit_holding(&mut self, asset: Address, units: u128) -> Result<(), VaultError> {
        let held = self.holdings.get(&asset).copied().unwrap_or(0);
        if held < units {
            return Err(VaultError::InsufficientHoldings {
                asset,
                held,
                required: units,
            });
        }
        if held == units {
            self.holdings.remove(&asset);
        } else {
            self.holdings.insert(asset, held - units);
        }
        Ok(())
    }

    /// Burns `shares` from `owner` (spending `caller`'s allowance) and pays
    /// `assets` out of idle balance.
    fn pay_out(
        &mut self,
        events: &mut Vec<VaultEvent>,
        caller: Address,
        receiver: Address,
        owner: Address,
        assets: u128,
        shares: u128,
    ) -> Result<(), VaultError> {
        self.shares.spend_allowance(owner, caller, shares)?;
        self.shares.burn(owner, shares)?;
        self.debit_idle(assets)?;
        events.push(VaultEvent::WithdrawProcessed {
            caller,
            receiver,
            owner,
            assets,
            shares,
        });
        Ok(())
    }
}

/// Serializable view of the vault, used for summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub total_assets: u128,
    pub idle_assets: u128,
    pub managed_assets_value: u128,
    pub total_shares: u128,
    pub locked_shares: u128,
    pub share_price: Wad,
    pub paused: bool,
    pub emergency_withdraw_enabled: bool,
    pub last_nav_update: Option<DateTime<Utc>>,
    pub holdings: BTreeMap<Address, u128>,
    pub withdraw_requests: usize,
}

/// Result of a NAV update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavUpdate {
    pub previous_total_assets: u128,
    pub total_assets: u128,
    pub share_price: Wad,
    /// The move exceeded the threshold and the vault is now paused.
    pub circuit_breaker_tripped: bool,
}

// ---------------------------------------------------------------------------
// VaultLedger
// ---------------------------------------------------------------------------

pub struct VaultLedger<M> {
    /// The stable asset deposits are denominated in.
    asset: Address,
    config: VaultConfig,
    roles: Arc<RoleStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<RwLock<AssetRegistry>>,
    swap: SwapHelper<M>,
    state: VaultState,
    events: EventLog,
}

impl<M: MarketMaker + Clone> VaultLedger<M> {
    /// Creates an empty vault.
    ///
    /// # Errors
    ///
    /// [`VaultError::ZeroAddress`] for a zero stable asset, or
    /// [`VaultError::Config`] when `config` fails validation.
    pub fn new(
        asset: Address,
        config: VaultConfig,
        roles: Arc<RoleStore>,
        clock: Arc<dyn Clock>,
        registry: Arc<RwLock<AssetRegistry>>,
        swap: SwapHelper<M>,
    ) -> Result<Self, VaultError> {
        if asset == Address::ZERO {
            return Err(VaultError::ZeroAddress);
        }
        config.validate()?;
        let state = VaultState {
            circuit_breaker_threshold_bps: config.circuit_breaker_threshold_bps,
            ..VaultState::default()
        };
        tracing::info!(%asset, ?config, "vault initialized");
        Ok(Self {
            asset,
            config,
            roles,
            clock,
            registry,
            swap,
            state,
            events: EventLog::new(),
        })
    }

    /// Runs `apply` against a staged copy of the state and commits it, with
    /// the events it produced, only on success.
    fn commit<R>(
        &mut self,
        operation: &'static str,
        apply: impl FnOnce(&mut VaultState, &mut Vec<VaultEvent>) -> Result<R, VaultError>,
    ) -> Result<R, VaultError> {
        let mut staged = self.state.clone();
        let mut events = Vec::new();
        let out = apply(&mut staged, &mut events).map_err(|err| {
            tracing::warn!(operation, error = %err, "operation rejected");
            err
        })?;
        self.state = staged;
        self.events.publish(self.clock.now(), events);
        Ok(out)
    }

    fn withdrawal_delay(&self) -> Duration {
        // chrono panics past i64::MAX / 1000 seconds.
        Duration::seconds(self.config.withdrawal_delay_secs.min(i32::MAX as u64) as i64)
    }

    // -----------------------------------------------------------------------
    // Deposits
    // -----------------------------------------------------------------------

    /// Deposits `assets` and mints shares to `receiver`, rounded down.
    ///
    /// # Errors
    ///
    /// [`VaultError::Paused`], [`VaultError::ZeroAmount`],
    /// [`VaultError::ZeroAddress`], [`VaultError::BelowMinimumDeposit`],
    /// [`VaultError::ZeroNav`] when shares exist but total assets are zero,
    /// [`VaultError::ZeroShares`] when the deposit is too small to mint.
    pub fn deposit(&mut self, caller: &Address, assets: u128, receiver: Address) -> Result<u128, VaultError> {
        let caller = *caller;
        let min_deposit = self.config.min_deposit;
        let shares = self.commit("deposit", |state, events| {
            if state.paused {
                return Err(VaultError::Paused);
            }
            if assets == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if receiver == Address::ZERO {
                return Err(VaultError::ZeroAddress);
            }
            if assets < min_deposit {
                return Err(VaultError::BelowMinimumDeposit {
                    assets,
                    minimum: min_deposit,
                });
            }
            let shares = state.convert_to_shares(assets, Rounding::Down)?;
            if shares == 0 {
                return Err(VaultError::ZeroShares(assets));
            }
            state.credit_idle(assets)?;
            state.shares.mint(receiver, shares)?;
            events.push(VaultEvent::DepositProcessed {
                caller,
                receiver,
                assets,
                shares,
            });
            Ok(shares)
        })?;
        tracing::info!(%caller, %receiver, assets, shares, "deposit processed");
        Ok(shares)
    }

    /// Mints exactly `shares` to `receiver`, charging assets rounded up.
    pub fn mint(&mut self, caller: &Address, shares: u128, receiver: Address) -> Result<u128, VaultError> {
        let caller = *caller;
        let min_deposit = self.config.min_deposit;
        let assets = self.commit("mint", |state, events| {
            if state.paused {
                return Err(VaultError::Paused);
            }
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if receiver == Address::ZERO {
                return Err(VaultError::ZeroAddress);
            }
            if state.shares.total_supply() > 0 && state.total_assets()? == 0 {
                return Err(VaultError::ZeroNav);
            }
            let assets = state.convert_to_assets(shares, Rounding::Up)?;
            if assets < min_deposit {
                return Err(VaultError::BelowMinimumDeposit {
                    assets,
                    minimum: min_deposit,
                });
            }
            state.credit_idle(assets)?;
            state.shares.mint(receiver, shares)?;
            events.push(VaultEvent::DepositProcessed {
                caller,
                receiver,
                assets,
                shares,
            });
            Ok(assets)
        })?;
        tracing::info!(%caller, %receiver, assets, shares, "mint processed");
        Ok(assets)
    }

    // -----------------------------------------------------------------------
    // Instant withdrawals
    // -----------------------------------------------------------------------

    /// Withdraws exactly `assets` to `receiver`, burning `owner`'s shares
    /// rounded up.
    ///
    /// # Errors
    ///
    /// [`VaultError::Paused`] unless emergency mode is on,
    /// [`VaultError::ExceedsMaxWithdrawal`],
    /// [`VaultError::ExceedsInstantLimit`] outside emergency mode,
    /// [`VaultError::InsufficientShares`], [`VaultError::InsufficientAllowance`],
    /// [`VaultError::InsufficientLiquidity`].
    pub fn withdraw(
        &mut self,
        caller: &Address,
        assets: u128,
        receiver: Address,
        owner: Address,
    ) -> Result<u128, VaultError> {
        let caller = *caller;
        let config = self.config.clone();
        let shares = self.commit("withdraw", |state, events| {
            state.ensure_instant_open()?;
            if assets == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if receiver == Address::ZERO || owner == Address::ZERO {
                return Err(VaultError::ZeroAddress);
            }
            check_withdrawal_limits(&config, state.emergency_withdraw_enabled, assets)?;
            let shares = state.convert_to_shares(assets, Rounding::Up)?;
            state.pay_out(events, caller, receiver, owner, assets, shares)?;
            Ok(shares)
        })?;
        tracing::info!(%caller, %receiver, %owner, assets, shares, "withdraw processed");
        Ok(shares)
    }

    /// Redeems exactly `shares` of `owner`, paying assets rounded down.
    pub fn redeem(
        &mut self,
        caller: &Address,
        shares: u128,
        receiver: Address,
        owner: Address,
    ) -> Result<u128, VaultError> {
        let caller = *caller;
        let config = self.config.clone();
        let assets = self.commit("redeem", |state, events| {
            state.ensure_instant_open()?;
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if receiver == Address::ZERO || owner == Address::ZERO {
                return Err(VaultError::ZeroAddress);
            }
            let assets = state.convert_to_assets(shares, Rounding::Down)?;
            if assets == 0 {
                return Err(VaultError::ZeroAssets(shares));
            }
            check_withdrawal_limits(&config, state.emergency_withdraw_enabled, assets)?;
            state.pay_out(events, caller, receiver, owner, assets, shares)?;
            Ok(assets)
        })?;
        tracing::info!(%caller, %receiver, %owner, assets, shares, "redeem processed");
        Ok(assets)
    }

    // -----------------------------------------------------------------------
    // Queued withdrawals
    // -----------------------------------------------------------------------

    /// Locks `shares` of the caller and opens a withdrawal request payable
    /// to `receiver` once the delay has elapsed. Blocked while paused, even
    /// in emergency mode.
    pub fn request_withdraw(&mut self, caller: &Address, shares: u128, receiver: Address) -> Result<u64, VaultError> {
        let owner = *caller;
        let now = self.clock.now();
        let delay = self.withdrawal_delay();
        let request_id = self.commit("request_withdraw", |state, events| {
            if state.paused {
                return Err(VaultError::Paused);
            }
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if receiver == Address::ZERO {
                return Err(VaultError::ZeroAddress);
            }
            let assets_at_request = state.convert_to_assets(shares, Rounding::Down)?;
            state.shares.lock(owner, shares)?;
            let request_id = state
                .queue
                .enqueue(owner, receiver, shares, assets_at_request, now);
            events.push(VaultEvent::WithdrawRequested {
                request_id,
                owner,
                receiver,
                shares,
                assets_at_request,
                claimable_at: now + delay,
            });
            Ok(request_id)
        })?;
        tracing::info!(request_id, %owner, %receiver, shares, "withdrawal requested");
        Ok(request_id)
    }

    /// Claims a matured request, paying at the share price current at
    /// claim time.
    ///
    /// # Errors
    ///
    /// [`VaultError::RequestNotFound`], [`VaultError::AlreadyClaimed`],
    /// [`VaultError::NotRequestParty`], [`VaultError::ClaimTooEarly`],
    /// [`VaultError::InsufficientLiquidity`], and [`VaultError::Paused`]
    /// while paused outside emergency mode.
    pub fn claim_withdraw(&mut self, caller: &Address, request_id: u64) -> Result<u128, VaultError> {
        let caller = *caller;
        let now = self.clock.now();
        let delay = self.withdrawal_delay();
        let (assets, shares) = self.commit("claim_withdraw", |state, events| {
            state.ensure_instant_open()?;
            let request = state.queue.check_claim(request_id, &caller, now, delay)?;
            let (shares, owner, receiver) = (request.shares, request.owner, request.receiver);

            let assets = state.convert_to_assets(shares, Rounding::Down)?;
            state.debit_idle(assets)?;
            state.shares.burn_locked(shares)?;
            state.queue.mark_claimed(request_id)?;
            events.push(VaultEvent::WithdrawClaimed {
                request_id,
                owner,
                receiver,
                shares,
                assets,
            });
            Ok((assets, shares))
        })?;
        tracing::info!(request_id, %caller, shares, assets, "withdrawal claimed");
        Ok(assets)
    }

    // -----------------------------------------------------------------------
    // Shares
    // -----------------------------------------------------------------------

    pub fn transfer(&mut self, caller: &Address, to: Address, shares: u128) -> Result<(), VaultError> {
        let from = *caller;
        self.commit("transfer", |state, events| {
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if to == Address::ZERO {
                return Err(VaultError::ZeroAddress);
            }
            state.shares.transfer(from, to, shares)?;
            events.push(VaultEvent::SharesTransferred { from, to, shares });
            Ok(())
        })?;
        tracing::debug!(%from, %to, shares, "shares transferred");
        Ok(())
    }

    /// Lets `spender` withdraw or redeem up to `shares` of the caller's.
    pub fn approve(&mut self, caller: &Address, spender: Address, shares: u128) -> Result<(), VaultError> {
        let owner = *caller;
        self.commit("approve", |state, _| {
            if spender == Address::ZERO {
                return Err(VaultError::ZeroAddress);
            }
            state.shares.approve(owner, spender, shares);
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Privileged
    // -----------------------------------------------------------------------

    /// Overwrites the managed-assets value (REBALANCER). A move in total
    /// assets beyond the circuit-breaker threshold is still applied, but
    /// pauses the vault.
    pub fn update_managed_assets(&mut self, caller: &Address, new_value: u128) -> Result<NavUpdate, VaultError> {
        self.roles.ensure_role(Role::Rebalancer, caller)?;
        let now = self.clock.now();
        let update = self.commit("update_managed_assets", |state, events| {
            let previous_total_assets = state.total_assets()?;
            let previous_managed_value = state.managed_assets_value;
            state.managed_assets_value = new_value;
            state.last_nav_update = Some(now);
            let total_assets = state.total_assets()?;
            let share_price = state.share_price()?;
            events.push(VaultEvent::NavUpdated {
                previous_managed_value,
                new_managed_value: new_value,
                total_assets,
                share_price,
            });

            let threshold_bps = state.circuit_breaker_threshold_bps;
            let mut circuit_breaker_tripped = false;
            if threshold_bps > 0 && previous_total_assets > 0 {
                let move_bps = mul_div(
                    previous_total_assets.abs_diff(total_assets),
                    BPS_DENOMINATOR,
                    previous_total_assets,
                    Rounding::Down,
                )?;
                if move_bps > threshold_bps as u128 {
                    state.paused = true;
                    circuit_breaker_tripped = true;
                    events.push(VaultEvent::CircuitBreakerTriggered {
                        previous_total_assets,
                        new_total_assets: total_assets,
                        move_bps,
                        threshold_bps,
                    });
                }
            }
            Ok(NavUpdate {
                previous_total_assets,
                total_assets,
                share_price,
                circuit_breaker_tripped,
            })
        })?;

        if update.circuit_breaker_tripped {
            tracing::warn!(
                previous = update.previous_total_assets,
                current = update.total_assets,
                "circuit breaker tripped, vault paused"
            );
        }
        tracing::info!(
            caller = %caller,
            managed_assets_value = new_value,
            total_assets = update.total_assets,
            share_price = %update.share_price,
            "NAV updated"
        );
        Ok(update)
    }

    pub fn pause(&mut self, caller: &Address) -> Result<(), VaultError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        let caller = *caller;
        self.commit("pause", |state, events| {
            if state.paused {
                return Err(VaultError::AlreadyPaused);
            }
            state.paused = true;
            events.push(VaultEvent::Paused { caller });
            Ok(())
        })?;
        tracing::info!(%caller, "vault paused");
        Ok(())
    }

    pub fn unpause(&mut self, caller: &Address) -> Result<(), VaultError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        let caller = *caller;
        self.commit("unpause", |state, events| {
            if !state.paused {
                return Err(VaultError::NotPaused);
            }
            state.paused = false;
            events.push(VaultEvent::Unpaused { caller });
            Ok(())
        })?;
        tracing::info!(%caller, "vault unpaused");
        Ok(())
    }

    /// Opens (or closes) the instant path while paused and lifts the
    /// instant-withdrawal limit. Only `MAX_WITHDRAWAL` still applies.
    pub fn set_emergency_withdraw(&mut self, caller: &Address, enabled: bool) -> Result<(), VaultError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        let caller = *caller;
        self.commit("set_emergency_withdraw", |state, events| {
            state.emergency_withdraw_enabled = enabled;
            events.push(VaultEvent::EmergencyModeChanged { caller, enabled });
            Ok(())
        })?;
        tracing::warn!(%caller, enabled, "emergency withdraw mode changed");
        Ok(())
    }

    /// Sets the NAV move (bps) that trips the circuit breaker. 0 disables it.
    pub fn set_circuit_breaker_threshold(&mut self, caller: &Address, bps: u16) -> Result<(), VaultError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        if bps > MAX_BPS {
            return Err(ConfigError::BpsOutOfRange {
                field: "circuit_breaker_threshold_bps",
                value: bps as u32,
                max: MAX_BPS as u32,
            }
            .into());
        }
        self.commit("set_circuit_breaker_threshold", |state, _| {
            state.circuit_breaker_threshold_bps = bps;
            Ok(())
        })?;
        tracing::info!(caller = %caller, bps, "circuit breaker threshold updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rebalance
    // -----------------------------------------------------------------------

    /// Executes a batch of sells (RWA to stable), then buys (stable to RWA),
    /// each bounded by the configured slippage. Sell amounts are token
    /// units, buy amounts are stable units to spend. Returns the amounts
    /// received per leg, in input order.
    ///
    /// Sell legs take a registered asset, or a removed one the vault still
    /// holds. Buy legs take active assets only.
    ///
    /// The batch is all-or-nothing: any failed leg discards every staged
    /// change, including earlier legs.
    ///
    /// Traded value moves between idle and `managed_assets_value` at
    /// execution amounts, so total assets are unchanged by the batch. Price
    /// moves and slippage reach the NAV only through
    /// [`VaultLedger::update_managed_assets`].
    pub fn rebalance(
        &mut self,
        caller: &Address,
        sell_assets: &[Address],
        sell_amounts: &[u128],
        buy_assets: &[Address],
        buy_amounts: &[u128],
    ) -> Result<(Vec<u128>, Vec<u128>), VaultError> {
        self.roles.ensure_role(Role::Rebalancer, caller)?;
        if self.state.paused {
            return Err(VaultError::Paused);
        }
        if sell_assets.len() != sell_amounts.len() {
            return Err(VaultError::ArrayLengthMismatch {
                side: "sell",
                assets: sell_assets.len(),
                amounts: sell_amounts.len(),
            });
        }
        if buy_assets.len() != buy_amounts.len() {
            return Err(VaultError::ArrayLengthMismatch {
                side: "buy",
                assets: buy_assets.len(),
                amounts: buy_amounts.len(),
            });
        }
        {
            let registry = self.registry.read();
            // A hard-removed token can still be sold while the vault holds it.
            if let Some(asset) = sell_assets
                .iter()
                .find(|a| !registry.is_registered(a) && !self.state.holdings.contains_key(*a))
            {
                return Err(VaultError::AssetNotRegistered(*asset));
            }
            if let Some(asset) = buy_assets.iter().find(|a| !registry.is_active(a)) {
                return Err(VaultError::AssetNotActive(*asset));
            }
        }
        if sell_amounts.iter().chain(buy_amounts).any(|amount| *amount == 0) {
            return Err(VaultError::ZeroAmount);
        }

        let mut staged = self.state.clone();
        let mut swap = self.swap.clone();
        let batch = Batch {
            stable: self.asset,
            max_slippage_bps: self.config.max_slippage_bps,
            sells: sell_assets.iter().copied().zip(sell_amounts.iter().copied()).collect(),
            buys: buy_assets.iter().copied().zip(buy_amounts.iter().copied()).collect(),
        };
        let (sells, buys) = batch.execute(&mut staged, &mut swap).map_err(|err| {
            tracing::warn!(caller = %caller, error = %err, "rebalance batch reverted");
            err
        })?;

        self.state = staged;
        self.swap = swap;
        let batch_id = Uuid::new_v4();
        let sell_received = sells.iter().map(|f| f.amount_out).collect();
        let buy_received = buys.iter().map(|f| f.amount_out).collect();
        tracing::info!(
            %batch_id,
            caller = %caller,
            sells = sells.len(),
            buys = buys.len(),
            idle = self.state.idle_asset_balance,
            "rebalance executed"
        );
        self.events.publish(
            self.clock.now(),
            [VaultEvent::RebalanceExecuted {
                batch_id,
                caller: *caller,
                sells,
                buys,
            }],
        );
        Ok((sell_received, buy_received))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn asset(&self) -> Address {
        self.asset
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<RwLock<AssetRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn swap_helper(&self) -> &SwapHelper<M> {
        &self.swap
    }

    pub fn swap_helper_mut(&mut self) -> &mut SwapHelper<M> {
        &mut self.swap
    }

    pub fn total_assets(&self) -> Result<u128, VaultError> {
        self.state.total_assets()
    }

    /// Assets per share, 18 decimals. 1.0 while no shares exist.
    pub fn share_price(&self) -> Result<Wad, VaultError> {
        self.state.share_price()
    }

    pub fn total_shares(&self) -> u128 {
        self.state.shares.total_supply()
    }

    pub fn total_locked_shares(&self) -> u128 {
        self.state.shares.locked()
    }

    pub fn idle_assets(&self) -> u128 {
        self.state.idle_asset_balance
    }

    pub fn managed_assets_value(&self) -> u128 {
        self.state.managed_assets_value
    }

    pub fn last_nav_update(&self) -> Option<DateTime<Utc>> {
        self.state.last_nav_update
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn emergency_withdraw_enabled(&self) -> bool {
        self.state.emergency_withdraw_enabled
    }

    pub fn circuit_breaker_threshold_bps(&self) -> u16 {
        self.state.circuit_breaker_threshold_bps
    }

    pub fn balance_of(&self, account: &Address) -> u128 {
        self.state.shares.balance_of(account)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.state.shares.allowance(owner, spender)
    }

    /// RWA token units held, by token.
    pub fn holdings(&self) -> &BTreeMap<Address, u128> {
        &self.state.holdings
    }

    pub fn holding_of(&self, asset: &Address) -> u128 {
        self.state.holdings.get(asset).copied().unwrap_or(0)
    }

    pub fn convert_to_shares(&self, assets: u128) -> Result<u128, VaultError> {
        self.state.convert_to_shares(assets, Rounding::Down)
    }

    pub fn convert_to_assets(&self, shares: u128) -> Result<u128, VaultError> {
        self.state.convert_to_assets(shares, Rounding::Down)
    }

    pub fn preview_deposit(&self, assets: u128) -> Result<u128, VaultError> {
        self.state.convert_to_shares(assets, Rounding::Down)
    }

    pub fn preview_mint(&self, shares: u128) -> Result<u128, VaultError> {
        self.state.convert_to_assets(shares, Rounding::Up)
    }

    pub fn preview_withdraw(&self, assets: u128) -> Result<u128, VaultError> {
        self.state.convert_to_shares(assets, Rounding::Up)
    }

    pub fn preview_redeem(&self, shares: u128) -> Result<u128, VaultError> {
        self.state.convert_to_assets(shares, Rounding::Down)
    }

    pub fn max_deposit(&self, _receiver: &Address) -> u128 {
        if self.state.paused {
            0
        } else {
            u128::MAX
        }
    }

    pub fn max_mint(&self, _receiver: &Address) -> u128 {
        if self.state.paused {
            0
        } else {
            u128::MAX
        }
    }

    /// Largest `assets` an instant `withdraw` by `owner` would accept now.
    pub fn max_withdraw(&self, owner: &Address) -> u128 {
        if self.state.ensure_instant_open().is_err() {
            return 0;
        }
        let owned = self.convert_to_assets(self.balance_of(owner)).unwrap_or(0);
        owned.min(self.instant_cap())
    }

    /// Largest `shares` an instant `redeem` by `owner` would accept now.
    pub fn max_redeem(&self, owner: &Address) -> u128 {
        if self.state.ensure_instant_open().is_err() {
            return 0;
        }
        let cap_shares = self
            .state
            .convert_to_shares(self.instant_cap(), Rounding::Down)
            .unwrap_or(0);
        self.balance_of(owner).min(cap_shares)
    }

    fn instant_cap(&self) -> u128 {
        let limit = if self.state.emergency_withdraw_enabled {
            self.config.max_withdrawal
        } else {
            self.config
                .instant_withdrawal_limit
                .min(self.config.max_withdrawal)
        };
        limit.min(self.state.idle_asset_balance)
    }

    pub fn get_request(&self, request_id: u64) -> Option<&WithdrawRequest> {
        self.state.queue.get(request_id)
    }

    /// Status of a request, with `Claimable` evaluated against the clock now.
    pub fn request_status(&self, request_id: u64) -> Option<RequestStatus> {
        self.state
            .queue
            .status(request_id, self.clock.now(), self.withdrawal_delay())
    }

    /// Ids of `user`'s unclaimed requests, oldest first.
    pub fn get_user_pending_requests(&self, user: &Address) -> Vec<u64> {
        self.state
            .queue
            .pending_for(user)
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    pub fn get_user_locked_shares(&self, user: &Address) -> u128 {
        self.state.queue.locked_shares_of(user)
    }

    /// Oracle value of the RWA holdings, in stable units. Read-only; feed
    /// the result to [`VaultLedger::update_managed_assets`] to apply it.
    pub fn valuate_holdings(&self, oracle: &dyn PriceOracle) -> Result<u128, VaultError> {
        let mut total: u128 = 0;
        for (asset, units) in &self.state.holdings {
            let resolved = oracle.get_price_with_source(asset)?;
            let value = resolved.price.mul_amount(*units, Rounding::Down)?;
            tracing::debug!(%asset, units, price = %resolved.price, source = %resolved.source, "holding valued");
            total = total.checked_add(value).ok_or(MathError::Overflow)?;
        }
        Ok(total)
    }

    /// Verifies the share-sum invariant and the queue/custody agreement.
    pub fn check_invariants(&self) -> Result<(), VaultError> {
        let shares = &self.state.shares;
        let accounted = shares
            .free_supply()
            .checked_add(shares.locked())
            .ok_or(MathError::Overflow)?;
        if accounted != shares.total_supply() {
            return Err(VaultError::InvariantViolation(format!(
                "balances {} + locked {} != total shares {}",
                shares.free_supply(),
                shares.locked(),
                shares.total_supply()
            )));
        }
        let pending = self.state.queue.total_pending_shares();
        if pending != shares.locked() {
            return Err(VaultError::InvariantViolation(format!(
                "pending requests hold {pending} shares but {} are locked",
                shares.locked()
            )));
        }
        self.state.total_assets()?;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        Ok(VaultSnapshot {
            total_assets: self.total_assets()?,
            idle_assets: self.idle_assets(),
            managed_assets_value: self.managed_assets_value(),
            total_shares: self.total_shares(),
            locked_shares: self.total_locked_shares(),
            share_price: self.share_price()?,
            paused: self.is_paused(),
            emergency_withdraw_enabled: self.emergency_withdraw_enabled(),
            last_nav_update: self.last_nav_update(),
            holdings: self.state.holdings.clone(),
            withdraw_requests: self.state.queue.len(),
        })
    }

    /// Committed events not yet drained.
    pub fn pending_events(&self) -> &[EmittedEvent] {
        self.events.pending()
    }

    pub fn drain_events(&mut self) -> Vec<EmittedEvent> {
        self.events.drain()
    }
}

fn check_withdrawal_limits(config: &VaultConfig, emergency: bool, assets: u128) -> Result<(), VaultError> {
    if assets > config.max_withdrawal {
        return Err(VaultError::ExceedsMaxWithdrawal {
            assets,
            maximum: config.max_withdrawal,
        });
    }
    if !emergency && assets > config.instant_withdrawal_limit {
        return Err(VaultError::ExceedsInstantLimit {
            assets,
            limit: config.instant_withdrawal_limit,
        });
    }
    Ok(())
}

/// A validated rebalance batch.
struct Batch {
    stable: Address,
    max_slippage_bps: u16,
    sells: Vec<(Address, u128)>,
    buys: Vec<(Address, u128)>,
}

impl Batch {
    fn execute<M: MarketMaker>(
        &self,
        state: &mut VaultState,
        swap: &mut SwapHelper<M>,
    ) -> Result<(Vec<TradeFill>, Vec<TradeFill>), VaultError> {
        let mut sells = Vec::with_capacity(self.sells.len());
        for (asset, units) in &self.sells {
            state.debit_holding(*asset, *units)?;
            let received = swap.sell_rwa_asset(asset, &self.stable, *units, self.max_slippage_bps)?;
            state.credit_idle(received)?;
            // Sale proceeds above book value are realized gains.
            state.managed_assets_value = state.managed_assets_value.saturating_sub(received);
            sells.push(TradeFill {
                asset: *asset,
                amount_in: *units,
                amount_out: received,
            });
        }

        let mut buys = Vec::with_capacity(self.buys.len());
        for (asset, spend) in &self.buys {
            state.debit_idle(*spend)?;
            let received = swap.buy_rwa_asset(&self.stable, asset, *spend, self.max_slippage_bps)?;
            state.credit_holding(*asset, received)?;
            state.managed_assets_value = state
                .managed_assets_value
                .checked_add(*spend)
                .ok_or(VaultError::Math(MathError::Overflow))?;
            buys.push(TradeFill {
                asset: *asset,
                amount_in: *spend,
                amount_out: received,
            });
        }
        Ok((sells, buys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap_helper::SimulatedMarket;
    use rwa_vault_protocol::clock::ManualClock;
    use rwa_vault_protocol::config::WAD;

    fn admin() -> Address {
        Address::repeat_byte(0xAD)
    }

    fn keeper() -> Address {
        Address::repeat_byte(0xEE)
    }

    fn alice() -> Address {
        Address::repeat_byte(0xA1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xB0)
    }

    fn stable() -> Address {
        Address::repeat_byte(0x5A)
    }

    fn ledger_with(config: VaultConfig) -> (VaultLedger<SimulatedMarket>, Arc<ManualClock>) {
        let roles = Arc::new(RoleStore::new(admin()));
        roles.grant_role(&admin(), Role::Rebalancer, keeper()).unwrap();
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let registry = Arc::new(RwLock::new(AssetRegistry::new(roles.clone(), clock.clone())));
        let ledger = VaultLedger::new(
            stable(),
            config,
            roles,
            clock.clone(),
            registry,
            SwapHelper::new(SimulatedMarket::new()),
        )
        .unwrap();
        (ledger, clock)
    }

    fn ledger() -> VaultLedger<SimulatedMarket> {
        ledger_with(VaultConfig::default()).0
    }

    /// Small-unit vault without a minimum deposit or circuit breaker.
    fn raw_ledger() -> VaultLedger<SimulatedMarket> {
        ledger_with(VaultConfig {
            min_deposit: 1,
            circuit_breaker_threshold_bps: 0,
            ..VaultConfig::default()
        })
        .0
    }

    #[test]
    fn previews_round_against_the_user() {
        let mut vault = raw_ledger();
        vault.deposit(&alice(), 3, alice()).unwrap();
        vault.update_managed_assets(&keeper(), 1).unwrap();
        // A = 4, S = 3
        assert_eq!(vault.preview_deposit(2).unwrap(), 1);
        assert_eq!(vault.preview_mint(1).unwrap(), 2);
        assert_eq!(vault.preview_redeem(1).unwrap(), 1);
        assert_eq!(vault.preview_withdraw(1).unwrap(), 1);
        assert_eq!(vault.preview_withdraw(2).unwrap(), 2);
        assert_eq!(
            vault.deposit(&bob(), 1, bob()),
            Err(VaultError::ZeroShares(1))
        );
    }

    #[test]
    fn full_exit_resets_pricing_to_one_to_one() {
        let mut vault = raw_ledger();
        vault.deposit(&alice(), 100, alice()).unwrap();
        vault.update_managed_assets(&keeper(), 50).unwrap();
        assert_eq!(
            vault.redeem(&alice(), 100, alice(), alice()),
            Err(VaultError::InsufficientLiquidity {
                available: 100,
                required: 150,
            })
        );
        vault.update_managed_assets(&keeper(), 0).unwrap();
        assert_eq!(vault.redeem(&alice(), 100, alice(), alice()).unwrap(), 100);
        assert_eq!(vault.total_shares(), 0);
        assert_eq!(vault.deposit(&bob(), 10, bob()).unwrap(), 10);
    }

    #[test]
    fn zero_nav_with_outstanding_shares_blocks_deposit_and_mint() {
        let mut vault = raw_ledger();
        vault.deposit(&alice(), 100, alice()).unwrap();
        vault.state.idle_asset_balance = 0;
        assert_eq!(vault.deposit(&bob(), 10, bob()), Err(VaultError::ZeroNav));
        assert_eq!(vault.mint(&bob(), 10, bob()), Err(VaultError::ZeroNav));
    }

    #[test]
    fn mint_charges_rounded_up_assets() {
        let mut vault = raw_ledger();
        vault.deposit(&alice(), 3, alice()).unwrap();
        vault.update_managed_assets(&keeper(), 1).unwrap();
        let assets = vault.mint(&bob(), 1, bob()).unwrap();
        assert_eq!(assets, 2);
        assert_eq!(vault.balance_of(&bob()), 1);
        assert_eq!(vault.total_assets().unwrap(), 6);
    }

    #[test]
    fn mint_enforces_minimum_deposit_on_computed_assets() {
        let mut vault = ledger();
        let err = vault.mint(&alice(), 99 * WAD, alice()).unwrap_err();
        assert_eq!(
            err,
            VaultError::BelowMinimumDeposit {
                assets: 99 * WAD,
                minimum: 100 * WAD,
            }
        );
    }

    #[test]
    fn third_party_withdraw_spends_allowance() {
        let mut vault = raw_ledger();
        vault.deposit(&alice(), 1_000, alice()).unwrap();
        assert!(matches!(
            vault.withdraw(&bob(), 100, bob(), alice()),
            Err(VaultError::InsufficientAllowance { .. })
        ));
        vault.approve(&alice(), bob(), 150).unwrap();
        let shares = vault.withdraw(&bob(), 100, bob(), alice()).unwrap();
        assert_eq!(shares, 100);
        assert_eq!(vault.allowance(&alice(), &bob()), 50);
        assert_eq!(vault.balance_of(&alice()), 900);
    }

    #[test]
    fn transfer_moves_shares_and_emits() {
        let mut vault = raw_ledger();
        vault.deposit(&alice(), 1_000, alice()).unwrap();
        vault.drain_events();
        vault.transfer(&alice(), bob(), 400).unwrap();
        assert_eq!(vault.balance_of(&bob()), 400);
        assert_eq!(vault.pending_events()[0].event.name(), "SharesTransferred");
        assert_eq!(vault.transfer(&alice(), Address::ZERO, 1), Err(VaultError::ZeroAddress));
    }

    #[test]
    fn circuit_breaker_applies_value_and_pauses() {
        let mut vault = ledger();
        vault.deposit(&alice(), 1_000 * WAD, alice()).unwrap();

        // +10% exactly does not trip a 10% breaker.
        let update = vault.update_managed_assets(&keeper(), 100 * WAD).unwrap();
        assert!(!update.circuit_breaker_tripped);
        assert!(!vault.is_paused());

        // 1100 -> 1400 is +27%.
        let update = vault.update_managed_assets(&keeper(), 400 * WAD).unwrap();
        assert!(update.circuit_breaker_tripped);
        assert!(vault.is_paused());
        assert_eq!(vault.total_assets().unwrap(), 1_400 * WAD);
        let names: Vec<_> = vault.pending_events().iter().map(|e| e.event.name()).collect();
        assert!(names.ends_with(&["NavUpdated", "CircuitBreakerTriggered"]));
    }

    #[test]
    fn disabled_circuit_breaker_never_trips() {
        let mut vault = raw_ledger();
        vault.deposit(&alice(), 10, alice()).unwrap();
        let update = vault.update_managed_assets(&keeper(), 1_000_000).unwrap();
        assert!(!update.circuit_breaker_tripped);
        assert!(!vault.is_paused());
    }

    #[test]
    fn privileged_calls_check_roles_first() {
        let mut vault = ledger();
        assert!(matches!(
            vault.update_managed_assets(&alice(), 1),
            Err(VaultError::Access(_))
        ));
        assert!(matches!(vault.pause(&keeper()), Err(VaultError::Access(_))));
        assert!(matches!(
            vault.rebalance(&admin(), &[], &[], &[], &[]),
            Err(VaultError::Access(_))
        ));
        assert!(vault.pending_events().is_empty());
    }

    #[test]
    fn pause_and_unpause_are_not_idempotent() {
        let mut vault = ledger();
        vault.pause(&admin()).unwrap();
        assert_eq!(vault.pause(&admin()), Err(VaultError::AlreadyPaused));
        vault.unpause(&admin()).unwrap();
        assert_eq!(vault.unpause(&admin()), Err(VaultError::NotPaused));
    }

    #[test]
    fn circuit_breaker_threshold_is_validated() {
        let mut vault = ledger();
        assert!(matches!(
            vault.set_circuit_breaker_threshold(&admin(), 10_001),
            Err(VaultError::Config(ConfigError::BpsOutOfRange { .. }))
        ));
        vault.set_circuit_breaker_threshold(&admin(), 0).unwrap();
        assert_eq!(vault.circuit_breaker_threshold_bps(), 0);
    }

    #[test]
    fn max_queries_respect_limits_and_liquidity() {
        let mut vault = ledger();
        vault.deposit(&alice(), 50_000 * WAD, alice()).unwrap();
        assert_eq!(vault.max_withdraw(&alice()), 10_000 * WAD);
        assert_eq!(vault.max_redeem(&alice()), 10_000 * WAD);
        assert_eq!(vault.max_deposit(&alice()), u128::MAX);

        vault.pause(&admin()).unwrap();
        assert_eq!(vault.max_withdraw(&alice()), 0);
        assert_eq!(vault.max_deposit(&alice()), 0);
        assert_eq!(vault.max_mint(&alice()), 0);

        vault.set_emergency_withdraw(&admin(), true).unwrap();
        assert_eq!(vault.max_withdraw(&alice()), 50_000 * WAD);
    }

    #[test]
    fn failed_operations_publish_nothing() {
        let mut vault = ledger();
        let _ = vault.deposit(&alice(), 10 * WAD, alice());
        let _ = vault.claim_withdraw(&alice(), 0);
        assert!(vault.pending_events().is_empty());
        assert_eq!(vault.total_shares(), 0);
    }

    #[test]
    fn new_rejects_bad_config() {
        let roles = Arc::new(RoleStore::new(admin()));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_unix(0));
        let registry = Arc::new(RwLock::new(AssetRegistry::new(roles.clone(), clock.clone())));
        let result = VaultLedger::new(
            stable(),
            VaultConfig {
                withdrawal_delay_secs: 0,
                ..VaultConfig::default()
            },
            roles,
            clock,
            registry,
            SwapHelper::new(SimulatedMarket::new()),
        );
        assert!(matches!(result, Err(VaultError::Config(ConfigError::Zero(_)))));
    }
}
