//! Thread-safe, reentrancy-guarded handle to a [`VaultLedger`].
//!
//! ```text
//!             other thread          same thread, nested
//!                  │                        │
//!         ReentrantMutex::lock    ReentrantMutex::lock (re-acquired)
//!                  │                        │
//!             waits its turn     RefCell::try_borrow_mut fails
//!                  │                        │
//!                runs              VaultError::Reentrancy
//! ```
//!
//! Calls from different threads are serialized. A call made while another
//! call is in progress on the same thread (for instance from inside a
//! callback passed to [`SharedVault::with`]) is rejected before it touches
//! any state.

use std::cell::RefCell;
use std::sync::Arc;

use alloy_primitives::Address;
use parking_lot::ReentrantMutex;

use super::error::VaultError;
use super::ledger::{NavUpdate, VaultLedger, VaultSnapshot};
use crate::swap_helper::MarketMaker;

pub struct SharedVault<M> {
    inner: Arc<ReentrantMutex<RefCell<VaultLedger<M>>>>,
}

impl<M> Clone for SharedVault<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: MarketMaker + Clone> SharedVault<M> {
    pub fn new(ledger: VaultLedger<M>) -> Self {
        Self {
            inner: Arc::new(ReentrantMutex::new(RefCell::new(ledger))),
        }
    }

    /// Runs `f` with exclusive access to the ledger.
    ///
    /// # Errors
    ///
    /// [`VaultError::Reentrancy`] if this thread is already inside the
    /// vault, otherwise whatever `f` returns.
    pub fn with<R>(&self, f: impl FnOnce(&mut VaultLedger<M>) -> Result<R, VaultError>) -> Result<R, VaultError> {
        let guard = self.inner.lock();
        let mut ledger = guard.try_borrow_mut().map_err(|_| {
            tracing::warn!("reentrant vault call rejected");
            VaultError::Reentrancy
        })?;
        f(&mut ledger)
    }

    /// Runs `f` with shared access. Fails with [`VaultError::Reentrancy`]
    /// only while a mutating call is in progress on this thread.
    pub fn read<R>(&self, f: impl FnOnce(&VaultLedger<M>) -> R) -> Result<R, VaultError> {
        let guard = self.inner.lock();
        let ledger = guard.try_borrow().map_err(|_| VaultError::Reentrancy)?;
        Ok(f(&ledger))
    }

    pub fn deposit(&self, caller: &Address, assets: u128, receiver: Address) -> Result<u128, VaultError> {
        self.with(|v| v.deposit(caller, assets, receiver))
    }

    pub fn mint(&self, caller: &Address, shares: u128, receiver: Address) -> Result<u128, VaultError> {
        self.with(|v| v.mint(caller, shares, receiver))
    }

    pub fn withdraw(&self, caller: &Address, assets: u128, receiver: Address, owner: Address) -> Result<u128, VaultError> {
        self.with(|v| v.withdraw(caller, assets, receiver, owner))
    }

    pub fn redeem(&self, caller: &Address, shares: u128, receiver: Address, owner: Address) -> Result<u128, VaultError> {
        self.with(|v| v.redeem(caller, shares, receiver, owner))
    }

    pub fn request_withdraw(&self, caller: &Address, shares: u128, receiver: Address) -> Result<u64, VaultError> {
        self.with(|v| v.request_withdraw(caller, shares, receiver))
    }

    pub fn claim_withdraw(&self, caller: &Address, request_id: u64) -> Result<u128, VaultError> {
        self.with(|v| v.claim_withdraw(caller, request_id))
    }

    pub fn update_managed_assets(&self, caller: &Address, new_value: u128) -> Result<NavUpdate, VaultError> {
        self.with(|v| v.update_managed_assets(caller, new_value))
    }

    pub fn pause(&self, caller: &Address) -> Result<(), VaultError> {
        self.with(|v| v.pause(caller))
    }

    pub fn unpause(&self, caller: &Address) -> Result<(), VaultError> {
        self.with(|v| v.unpause(caller))
    }

    pub fn set_emergency_withdraw(&self, caller: &Address, enabled: bool) -> Result<(), VaultError> {
        self.with(|v| v.set_emergency_withdraw(caller, enabled))
    }

    pub fn rebalance(
        &self,
        caller: &Address,
        sell_assets: &[Address],
        sell_amounts: &[u128],
        buy_assets: &[Address],
        buy_amounts: &[u128],
    ) -> Result<(Vec<u128>, Vec<u128>), VaultError> {
        self.with(|v| v.rebalance(caller, sell_assets, sell_amounts, buy_assets, buy_amounts))
    }

    pub fn snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        self.read(|v| v.snapshot())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_registry::AssetRegistry;
    use crate::swap_helper::{SimulatedMarket, SwapHelper};
    use parking_lot::RwLock;
    use rwa_vault_protocol::access::RoleStore;
    use rwa_vault_protocol::clock::ManualClock;
    use rwa_vault_protocol::config::{VaultConfig, WAD};

    fn admin() -> Address {
        Address::repeat_byte(0xAD)
    }

    fn alice() -> Address {
        Address::repeat_byte(0xA1)
    }

    fn shared() -> SharedVault<SimulatedMarket> {
        let roles = Arc::new(RoleStore::new(admin()));
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let registry = Arc::new(RwLock::new(AssetRegistry::new(roles.clone(), clock.clone())));
        let ledger = VaultLedger::new(
            Address::repeat_byte(0x5A),
            VaultConfig::default(),
            roles,
            clock,
            registry,
            SwapHelper::new(SimulatedMarket::new()),
        )
        .unwrap();
        SharedVault::new(ledger)
    }

    #[test]
    fn nested_call_is_rejected_without_side_effects() {
        let vault = shared();
        let inner = vault.clone();
        let result = vault.with(|ledger| {
            ledger.deposit(&alice(), 1_000 * WAD, alice())?;
            inner.deposit(&alice(), 1_000 * WAD, alice())
        });
        assert_eq!(result, Err(VaultError::Reentrancy));
        // The outer deposit committed; the nested one never ran.
        assert_eq!(vault.read(|l| l.total_shares()).unwrap(), 1_000 * WAD);
    }

    #[test]
    fn reads_inside_a_mutation_are_rejected() {
        let vault = shared();
        let inner = vault.clone();
        let result = vault.with(|_| inner.read(|l| l.total_shares()));
        assert_eq!(result, Err(VaultError::Reentrancy));
    }

    #[test]
    fn other_threads_are_serialized() {
        let vault = shared();
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let vault = vault.clone();
                std::thread::spawn(move || {
                    let user = Address::repeat_byte(i + 1);
                    vault.deposit(&user, 100 * WAD, user)
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 100 * WAD);
        }
        let snapshot = vault.snapshot().unwrap();
        assert_eq!(snapshot.total_shares, 800 * WAD);
        assert_eq!(snapshot.total_assets, 800 * WAD);
    }
}
