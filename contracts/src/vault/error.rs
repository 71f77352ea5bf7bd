use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use rwa_vault_protocol::access::AccessError;
use rwa_vault_protocol::config::ConfigError;
use rwa_vault_protocol::math::MathError;
use thiserror::Error;

use crate::oracle::OracleError;
use crate::swap_helper::SwapError;

/// Errors that can occur during vault operations.
///
/// Every variant is returned before any state is committed; a failed call
/// leaves the ledger exactly as it was.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    // -- validation ---------------------------------------------------------
    /// Amounts must be positive.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// Receivers, owners and spenders cannot be the zero address.
    #[error("address cannot be zero")]
    ZeroAddress,

    /// Deposit (or the assets computed for a mint) below the minimum.
    #[error("deposit of {assets} is below the minimum of {minimum}")]
    BelowMinimumDeposit { assets: u128, minimum: u128 },

    /// Withdrawal above the absolute per-call cap.
    #[error("withdrawal of {assets} exceeds the maximum of {maximum}")]
    ExceedsMaxWithdrawal { assets: u128, maximum: u128 },

    /// Instant withdrawal above the instant limit; use the queue.
    #[error("instant withdrawal of {assets} exceeds the limit of {limit}; request a queued withdrawal")]
    ExceedsInstantLimit { assets: u128, limit: u128 },

    /// The conversion rounds to zero shares.
    #[error("deposit of {0} assets would mint zero shares")]
    ZeroShares(u128),

    /// The conversion rounds to zero assets.
    #[error("redemption of {0} shares would pay zero assets")]
    ZeroAssets(u128),

    /// Shares exist but the vault holds nothing; a deposit would be
    /// unpriceable.
    #[error("total assets are zero while shares are outstanding")]
    ZeroNav,

    /// Rebalance arrays of unequal length.
    #[error("{side} arrays differ in length: {assets} assets, {amounts} amounts")]
    ArrayLengthMismatch {
        side: &'static str,
        assets: usize,
        amounts: usize,
    },

    #[error("asset {0} is not registered")]
    AssetNotRegistered(Address),

    #[error("asset {0} is not active")]
    AssetNotActive(Address),

    // -- state --------------------------------------------------------------
    #[error("vault is paused")]
    Paused,

    #[error("vault is already paused")]
    AlreadyPaused,

    #[error("vault is not paused")]
    NotPaused,

    #[error("insufficient shares: {account} holds {available}, needs {required}")]
    InsufficientShares {
        account: Address,
        available: u128,
        required: u128,
    },

    #[error("insufficient allowance: {spender} may spend {allowance} of {owner}'s shares, needs {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: u128,
        required: u128,
    },

    /// Idle balance cannot cover a payout or purchase.
    #[error("insufficient liquidity: {available} idle, {required} required")]
    InsufficientLiquidity { available: u128, required: u128 },

    #[error("insufficient holdings of {asset}: {held} held, {required} required")]
    InsufficientHoldings { asset: Address, held: u128, required: u128 },

    #[error("withdrawal request {0} not found")]
    RequestNotFound(u64),

    #[error("withdrawal request {0} already claimed")]
    AlreadyClaimed(u64),

    #[error("withdrawal request {request_id} is not claimable until {claimable_at}")]
    ClaimTooEarly {
        request_id: u64,
        claimable_at: DateTime<Utc>,
    },

    /// Only the request's owner or receiver may claim it.
    #[error("{caller} is neither owner nor receiver of request {request_id}")]
    NotRequestParty { request_id: u64, caller: Address },

    /// A mutating call was made while another one was in progress on the
    /// same thread.
    #[error("reentrant call rejected")]
    Reentrancy,

    /// Internal bookkeeping disagrees with itself.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    // -- wrapped ------------------------------------------------------------
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("arithmetic error: {0}")]
    Math(#[from] MathError),

    #[error("swap failed: {0}")]
    Swap(#[from] SwapError),

    #[error("oracle failed: {0}")]
    Oracle(#[from] OracleError),
}
