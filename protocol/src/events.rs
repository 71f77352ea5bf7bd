//! # Vault Events
//!
//! Everything the off-chain indexer needs to reconstruct vault history.
//! Events are only published once the operation that produced them has
//! committed; a failed operation leaves no trace in the log.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::math::Wad;

/// One executed leg of a rebalance batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFill {
    /// The RWA token bought or sold.
    pub asset: Address,
    /// Units handed to the market.
    pub amount_in: u128,
    /// Units received from the market.
    pub amount_out: u128,
}

/// State changes published by the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    DepositProcessed {
        caller: Address,
        receiver: Address,
        assets: u128,
        shares: u128,
    },
    WithdrawProcessed {
        caller: Address,
        receiver: Address,
        owner: Address,
        assets: u128,
        shares: u128,
    },
    WithdrawRequested {
        request_id: u64,
        owner: Address,
        receiver: Address,
        shares: u128,
        /// Informational only; the payout is recomputed at claim time.
        assets_at_request: u128,
        claimable_at: DateTime<Utc>,
    },
    WithdrawClaimed {
        request_id: u64,
        owner: Address,
        receiver: Address,
        shares: u128,
        assets: u128,
    },
    NavUpdated {
        previous_managed_value: u128,
        new_managed_value: u128,
        total_assets: u128,
        share_price: Wad,
    },
    EmergencyModeChanged {
        caller: Address,
        enabled: bool,
    },
    RebalanceExecuted {
        batch_id: Uuid,
        caller: Address,
        sells: Vec<TradeFill>,
        buys: Vec<TradeFill>,
    },
    Paused {
        caller: Address,
    },
    Unpaused {
        caller: Address,
    },
    CircuitBreakerTriggered {
        previous_total_assets: u128,
        new_total_assets: u128,
        move_bps: u128,
        threshold_bps: u16,
    },
    SharesTransferred {
        from: Address,
        to: Address,
        shares: u128,
    },
}

impl VaultEvent {
    /// Stable name used for log lines and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            VaultEvent::DepositProcessed { .. } => "DepositProcessed",
            VaultEvent::WithdrawProcessed { .. } => "WithdrawProcessed",
            VaultEvent::WithdrawRequested { .. } => "WithdrawRequested",
            VaultEvent::WithdrawClaimed { .. } => "WithdrawClaimed",
            VaultEvent::NavUpdated { .. } => "NavUpdated",
            VaultEvent::EmergencyModeChanged { .. } => "EmergencyModeChanged",
            VaultEvent::RebalanceExecuted { .. } => "RebalanceExecuted",
            VaultEvent::Paused { .. } => "Paused",
            VaultEvent::Unpaused { .. } => "Unpaused",
            VaultEvent::CircuitBreakerTriggered { .. } => "CircuitBreakerTriggered",
            VaultEvent::SharesTransferred { .. } => "SharesTransferred",
        }
    }
}

/// An event together with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedEvent {
    /// Strictly increasing across the lifetime of the log, never reused
    /// after a drain.
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub event: VaultEvent,
}

/// Buffer of committed events awaiting the indexer.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    next_sequence: u64,
    pending: Vec<EmittedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch produced by one committed operation.
    pub fn publish(&mut self, at: DateTime<Utc>, events: impl IntoIterator<Item = VaultEvent>) {
        for event in events {
            tracing::debug!(sequence = self.next_sequence, event = event.name(), "event published");
            self.pending.push(EmittedEvent {
                sequence: self.next_sequence,
                at,
                event,
            });
            self.next_sequence += 1;
        }
    }

    /// Events not yet drained, oldest first.
    pub fn pending(&self) -> &[EmittedEvent] {
        &self.pending
    }

    /// Hands every pending event to the caller and empties the buffer.
    pub fn drain(&mut self) -> Vec<EmittedEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
