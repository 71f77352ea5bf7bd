//! Share balances, allowances and the locked pool.
//!
//! `total_supply` counts every share in existence: free balances plus the
//! shares held in custody for pending withdrawal requests. It only goes
//! down when shares are burned.

use std::collections::HashMap;

use alloy_primitives::Address;
use rwa_vault_protocol::math::MathError;

use super::error::VaultError;

#[derive(Debug, Clone, Default)]
pub struct ShareLedger {
    balances: HashMap<Address, u128>,
    allowances: HashMap<(Address, Address), u128>,
    total_supply: u128,
    locked: u128,
}

impl ShareLedger {
    pub fn balance_of(&self, account: &Address) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn locked(&self) -> u128 {
        self.locked
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    /// Sum of free balances. Linear in the number of holders.
    pub fn free_supply(&self) -> u128 {
        self.balances.values().sum()
    }

    pub fn holders(&self) -> usize {
        self.balances.len()
    }

    pub fn mint(&mut self, to: Address, shares: u128) -> Result<(), VaultError> {
        let total = self.total_supply.checked_add(shares).ok_or(overflow())?;
        let balance = self.balance_of(&to).checked_add(shares).ok_or(overflow())?;
        self.total_supply = total;
        self.balances.insert(to, balance);
        Ok(())
    }

    pub fn burn(&mut self, from: Address, shares: u128) -> Result<(), VaultError> {
        self.debit(from, shares)?;
        self.total_supply = self.total_supply.checked_sub(shares).ok_or(underflow())?;
        Ok(())
    }

    /// Moves shares from `from` into custody.
    pub fn lock(&mut self, from: Address, shares: u128) -> Result<(), VaultError> {
        self.debit(from, shares)?;
        self.locked = self.locked.checked_add(shares).ok_or(overflow())?;
        Ok(())
    }

    /// Burns shares out of custody.
    pub fn burn_locked(&mut self, shares: u128) -> Result<(), VaultError> {
        self.locked = self.locked.checked_sub(shares).ok_or(underflow())?;
        self.total_supply = self.total_supply.checked_sub(shares).ok_or(underflow())?;
        Ok(())
    }

    pub fn transfer(&mut self, from: Address, to: Address, shares: u128) -> Result<(), VaultError> {
        self.debit(from, shares)?;
        let balance = self.balance_of(&to).checked_add(shares).ok_or(overflow())?;
        self.balances.insert(to, balance);
        Ok(())
    }

    pub fn approve(&mut self, owner: Address, spender: Address, shares: u128) {
        if shares == 0 {
            self.allowances.remove(&(owner, spender));
        } else {
            self.allowances.insert((owner, spender), shares);
        }
    }

    /// Decrements `spender`'s allowance over `owner`. An owner spending its
    /// own shares needs no allowance; `u128::MAX` is never decremented.
    pub fn spend_allowance(&mut self, owner: Address, spender: Address, shares: u128) -> Result<(), VaultError> {
        if owner == spender {
            return Ok(());
        }
        let allowance = self.allowance(&owner, &spender);
        if allowance == u128::MAX {
            return Ok(());
        }
        if allowance < shares {
            return Err(VaultError::InsufficientAllowance {
                owner,
                spender,
                allowance,
                required: shares,
            });
        }
        self.approve(owner, spender, allowance - shares);
        Ok(())
    }

    fn debit(&mut self, from: Address, shares: u128) -> Result<(), VaultError> {
        let available = self.balance_of(&from);
        if available < shares {
            return Err(VaultError::InsufficientShares {
                account: from,
                available,
                required: shares,
            });
        }
        let remaining = available - shares;
        if remaining == 0 {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, remaining);
        }
        Ok(())
    }
}

fn overflow() -> VaultError {
    VaultError::Math(MathError::Overflow)
}

fn underflow() -> VaultError {
    VaultError::Math(MathError::Underflow)
}
