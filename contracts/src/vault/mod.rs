//! # Vault
//!
//! Share accounting, the two-tier withdrawal path and rebalance execution.
//!
//! - [`VaultLedger`]: the engine; every method takes `&mut self`.
//! - [`SharedVault`]: the handle to share across threads, with the
//!   reentrancy guard.
//! - [`WithdrawalQueue`] / [`ShareLedger`]: state owned by the ledger.

mod error;
mod ledger;
mod share_ledger;
mod shared;
mod withdrawal_queue;

pub use error::VaultError;
pub use ledger::{NavUpdate, VaultLedger, VaultSnapshot, VaultState};
pub use share_ledger::ShareLedger;
pub use shared::SharedVault;
pub use withdrawal_queue::{RequestStatus, WithdrawRequest, WithdrawalQueue};
