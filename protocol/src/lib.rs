// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # RWA Vault Protocol: Primitives
//!
//! The building blocks shared by every vault component:
//!
//! - **config**: Limits, defaults and the serde config structs.
//! - **math**: 18-decimal fixed point with explicit rounding direction.
//! - **access**: Role membership checked before any privileged mutation.
//! - **clock**: Injectable wall clock for delays and staleness.
//! - **events**: What the vault publishes once an operation commits.
//!
//! ## Design Philosophy
//!
//! 1. Integers only. Every division states which way it rounds.
//! 2. Checked arithmetic wherever money moves.
//! 3. Authorization is a lookup, never a side effect.

pub mod access;
pub mod clock;
pub mod config;
pub mod events;
pub mod math;

pub use alloy_primitives::Address;
