//! # Prometheus Metrics
//!
//! Counters for what the vault did during a run and gauges for where it
//! ended up. Everything lives in a dedicated [`prometheus::Registry`] with
//! the `rwa_vault` prefix and is rendered in the text exposition format on
//! request.

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use rwa_vault_contracts::vault::VaultSnapshot;
use rwa_vault_protocol::config::WAD;
use rwa_vault_protocol::events::{EmittedEvent, VaultEvent};

/// Metric handles for one scenario run.
#[derive(Clone, Debug)]
pub struct VaultMetrics {
    registry: Registry,
    pub deposits_total: IntCounter,
    pub withdrawals_total: IntCounter,
    pub withdraw_requests_total: IntCounter,
    pub claims_total: IntCounter,
    pub rebalances_total: IntCounter,
    pub circuit_breaker_trips_total: IntCounter,
    /// Failed scenario steps, labelled by step kind.
    pub failed_steps_total: IntCounterVec,
    /// Total assets in whole stable units.
    pub total_assets: Gauge,
    /// Total shares in whole units.
    pub total_shares: Gauge,
    pub locked_shares: Gauge,
    pub paused: IntGauge,
}

impl VaultMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("rwa_vault".into()), None)?;

        let deposits_total = IntCounter::new("deposits_total", "Deposits and mints processed")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let withdrawals_total = IntCounter::new("withdrawals_total", "Instant withdrawals and redemptions processed")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let withdraw_requests_total = IntCounter::new("withdraw_requests_total", "Queued withdrawal requests opened")?;
        registry.register(Box::new(withdraw_requests_total.clone()))?;

        let claims_total = IntCounter::new("claims_total", "Queued withdrawals claimed")?;
        registry.register(Box::new(claims_total.clone()))?;

        let rebalances_total = IntCounter::new("rebalances_total", "Rebalance batches committed")?;
        registry.register(Box::new(rebalances_total.clone()))?;

        let circuit_breaker_trips_total =
            IntCounter::new("circuit_breaker_trips_total", "NAV updates that paused the vault")?;
        registry.register(Box::new(circuit_breaker_trips_total.clone()))?;

        let failed_steps_total = IntCounterVec::new(
            Opts::new("failed_steps_total", "Scenario steps rejected by the vault"),
            &["step"],
        )?;
        registry.register(Box::new(failed_steps_total.clone()))?;

        let total_assets = Gauge::new("total_assets", "Idle plus managed assets, whole units")?;
        registry.register(Box::new(total_assets.clone()))?;

        let total_shares = Gauge::new("total_shares", "Outstanding shares including locked, whole units")?;
        registry.register(Box::new(total_shares.clone()))?;

        let locked_shares = Gauge::new("locked_shares", "Shares held by pending withdrawal requests, whole units")?;
        registry.register(Box::new(locked_shares.clone()))?;

        let paused = IntGauge::new("paused", "1 while the vault is paused")?;
        registry.register(Box::new(paused.clone()))?;

        Ok(Self {
            registry,
            deposits_total,
            withdrawals_total,
            withdraw_requests_total,
            claims_total,
            rebalances_total,
            circuit_breaker_trips_total,
            failed_steps_total,
            total_assets,
            total_shares,
            locked_shares,
            paused,
        })
    }

    /// Counts committed events.
    pub fn observe_events(&self, events: &[EmittedEvent]) {
        for emitted in events {
            match &emitted.event {
                VaultEvent::DepositProcessed { .. } => self.deposits_total.inc(),
                VaultEvent::WithdrawProcessed { .. } => self.withdrawals_total.inc(),
                VaultEvent::WithdrawRequested { .. } => self.withdraw_requests_total.inc(),
                VaultEvent::WithdrawClaimed { .. } => self.claims_total.inc(),
                VaultEvent::RebalanceExecuted { .. } => self.rebalances_total.inc(),
                VaultEvent::CircuitBreakerTriggered { .. } => self.circuit_breaker_trips_total.inc(),
                _ => {}
            }
        }
    }

    pub fn observe_snapshot(&self, snapshot: &VaultSnapshot) {
        self.total_assets.set(whole_units(snapshot.total_assets));
        self.total_shares.set(whole_units(snapshot.total_shares));
        self.locked_shares.set(whole_units(snapshot.locked_shares));
        self.paused.set(i64::from(snapshot.paused));
    }

    pub fn record_failure(&self, step: &str) {
        self.failed_steps_total.with_label_values(&[step]).inc();
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Lossy conversion for display only; balances never go through `f64`.
fn whole_units(raw: u128) -> f64 {
    raw as f64 / WAD as f64
}
