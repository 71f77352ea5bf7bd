// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # RWA Vault Contracts
//!
//! The vault engine, leaves first:
//!
//! - **Asset Registry**: which RWA tokens the vault may hold, with stable
//!   ids and soft/hard removal.
//! - **Oracle**: primary/backup price resolution with staleness detection
//!   and automatic failover, plus two in-process feed implementations.
//! - **Swap Helper**: slippage-bounded trades against a market maker.
//! - **Rebalance Strategy**: yield signals in, target weights and trade
//!   instructions out.
//! - **Vault**: share accounting, instant and queued withdrawals, NAV
//!   updates, circuit breaker and atomic rebalance execution.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow. Every division states its
//!    rounding direction, and rounding always favors the remaining holders.
//! 2. A failed call leaves no trace: state and events commit together or
//!    not at all.
//! 3. Capability checks run before any state is read for mutation.
//! 4. Every public data type is serializable (serde) for scenario files and
//!    summaries.

pub mod asset_registry;
pub mod oracle;
pub mod rebalance_strategy;
pub mod swap_helper;
pub mod vault;
