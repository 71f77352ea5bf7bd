//! # Capability Store
//!
//! Membership of the three privileged roles. Governance (a k-of-n approval
//! process in production) lives outside the vault; what reaches us is an
//! already-authenticated actor address, and all we do is check it against
//! this store before touching any state.
//!
//! The store is shared between the registry, the oracle adapter and the
//! ledger via `Arc<RoleStore>`. Membership changes only through
//! [`RoleStore::grant_role`], [`RoleStore::revoke_role`] and
//! [`RoleStore::renounce_role`], each of which appends an audit entry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Authorization failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    /// The actor does not hold the role the operation requires.
    #[error("account {account} is missing role {role}")]
    MissingRole {
        /// Role the operation requires.
        role: Role,
        /// Actor that attempted it.
        account: Address,
    },

    /// Removing this member would leave nobody able to manage roles.
    #[error("cannot remove the last {0} member")]
    LastDefaultAdmin(Role),

    /// Roles cannot be granted to the zero address.
    #[error("cannot grant a role to the zero address")]
    ZeroAddress,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Privileged capabilities recognised by the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Manages membership of every role, including its own.
    DefaultAdmin,
    /// Pauses the vault, toggles emergency mode, manages assets and oracles.
    Admin,
    /// Publishes NAV updates and executes rebalances.
    Rebalancer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::DefaultAdmin => write!(f, "DEFAULT_ADMIN"),
            Role::Admin => write!(f, "ADMIN"),
            Role::Rebalancer => write!(f, "REBALANCER"),
        }
    }
}

/// Kind of membership change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleChange {
    Granted,
    Revoked,
    Renounced,
}

/// One membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAuditEntry {
    pub role: Role,
    pub account: Address,
    pub change: RoleChange,
    /// Who made the change (equals `account` for renunciations).
    pub sender: Address,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RoleState {
    members: HashMap<Role, HashSet<Address>>,
    audit: Vec<RoleAuditEntry>,
}

impl RoleState {
    fn contains(&self, role: Role, account: &Address) -> bool {
        self.members
            .get(&role)
            .map(|set| set.contains(account))
            .unwrap_or(false)
    }

    fn count(&self, role: Role) -> usize {
        self.members.get(&role).map(HashSet::len).unwrap_or(0)
    }

    fn record(&mut self, role: Role, account: Address, change: RoleChange, sender: Address, at: DateTime<Utc>) {
        self.audit.push(RoleAuditEntry {
            role,
            account,
            change,
            sender,
            at,
        });
    }
}

// ---------------------------------------------------------------------------
// RoleStore
// ---------------------------------------------------------------------------

/// Thread-safe role membership with an append-only audit trail.
#[derive(Debug)]
pub struct RoleStore {
    inner: RwLock<RoleState>,
    clock: Arc<dyn Clock>,
}

impl RoleStore {
    /// Creates a store whose initial administrator holds `DefaultAdmin` and
    /// `Admin`. Rebalancers must be granted explicitly. Audit entries are
    /// stamped with the system clock.
    pub fn new(admin: Address) -> Self {
        Self::with_clock(admin, Arc::new(SystemClock))
    }

    /// Like [`RoleStore::new`], stamping audit entries with `clock`.
    pub fn with_clock(admin: Address, clock: Arc<dyn Clock>) -> Self {
        let mut state = RoleState::default();
        let now = clock.now();
        for role in [Role::DefaultAdmin, Role::Admin] {
            state.members.entry(role).or_default().insert(admin);
            state.record(role, admin, RoleChange::Granted, admin, now);
        }
        Self {
            inner: RwLock::new(state),
            clock,
        }
    }

    /// `hasRole(role, actor)`.
    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.inner.read().contains(role, account)
    }

    /// Fails with [`AccessError::MissingRole`] unless `account` holds `role`.
    pub fn ensure_role(&self, role: Role, account: &Address) -> Result<(), AccessError> {
        if self.has_role(role, account) {
            Ok(())
        } else {
            Err(AccessError::MissingRole {
                role,
                account: *account,
            })
        }
    }

    /// Grants `role` to `account`. Returns `false` when it was already held.
    ///
    /// # Errors
    ///
    /// [`AccessError::MissingRole`] unless `caller` is a `DefaultAdmin`.
    pub fn grant_role(&self, caller: &Address, role: Role, account: Address) -> Result<bool, AccessError> {
        if account == Address::ZERO {
            return Err(AccessError::ZeroAddress);
        }
        let mut state = self.inner.write();
        if !state.contains(Role::DefaultAdmin, caller) {
            return Err(AccessError::MissingRole {
                role: Role::DefaultAdmin,
                account: *caller,
            });
        }
        let inserted = state.members.entry(role).or_default().insert(account);
        if inserted {
            state.record(role, account, RoleChange::Granted, *caller, self.clock.now());
            tracing::info!(%role, %account, sender = %caller, "role granted");
        }
        Ok(inserted)
    }

    /// Revokes `role` from `account`. Returns `false` when it was not held.
    pub fn revoke_role(&self, caller: &Address, role: Role, account: Address) -> Result<bool, AccessError> {
        let mut state = self.inner.write();
        if !state.contains(Role::DefaultAdmin, caller) {
            return Err(AccessError::MissingRole {
                role: Role::DefaultAdmin,
                account: *caller,
            });
        }
        Self::remove(&mut state, role, account, RoleChange::Revoked, *caller, self.clock.now())
    }

    /// Drops one of the caller's own roles.
    pub fn renounce_role(&self, caller: &Address, role: Role) -> Result<bool, AccessError> {
        let mut state = self.inner.write();
        Self::remove(&mut state, role, *caller, RoleChange::Renounced, *caller, self.clock.now())
    }

    fn remove(
        state: &mut RoleState,
        role: Role,
        account: Address,
        change: RoleChange,
        sender: Address,
        at: DateTime<Utc>,
    ) -> Result<bool, AccessError> {
        if !state.contains(role, &account) {
            return Ok(false);
        }
        if role == Role::DefaultAdmin && state.count(role) == 1 {
            return Err(AccessError::LastDefaultAdmin(role));
        }
        if let Some(set) = state.members.get_mut(&role) {
            set.remove(&account);
        }
        state.record(role, account, change, sender, at);
        tracing::info!(%role, %account, %sender, ?change, "role removed");
        Ok(true)
    }

    /// Current members of `role`, in no particular order.
    pub fn members(&self, role: Role) -> Vec<Address> {
        self.inner
            .read()
            .members
            .get(&role)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every membership change since construction, oldest first.
    pub fn audit_log(&self) -> Vec<RoleAuditEntry> {
        self.inner.read().audit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn admin() -> Address {
        Address::repeat_byte(0xAD)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xB0)
    }

    #[test]
    fn initial_admin_holds_admin_roles_only() {
        let store = RoleStore::new(admin());
        assert!(store.has_role(Role::DefaultAdmin, &admin()));
        assert!(store.has_role(Role::Admin, &admin()));
        assert!(!store.has_role(Role::Rebalancer, &admin()));
    }

    #[test]
    fn grant_requires_default_admin() {
        let store = RoleStore::new(admin());
        let err = store.grant_role(&bob(), Role::Rebalancer, bob()).unwrap_err();
        assert_eq!(
            err,
            AccessError::MissingRole {
                role: Role::DefaultAdmin,
                account: bob(),
            }
        );
        assert!(store.grant_role(&admin(), Role::Rebalancer, bob()).unwrap());
        assert!(!store.grant_role(&admin(), Role::Rebalancer, bob()).unwrap());
        assert!(store.ensure_role(Role::Rebalancer, &bob()).is_ok());
    }

    #[test]
    fn last_default_admin_cannot_leave() {
        let store = RoleStore::new(admin());
        assert_eq!(
            store.renounce_role(&admin(), Role::DefaultAdmin),
            Err(AccessError::LastDefaultAdmin(Role::DefaultAdmin))
        );
        store.grant_role(&admin(), Role::DefaultAdmin, bob()).unwrap();
        assert!(store.renounce_role(&admin(), Role::DefaultAdmin).unwrap());
        assert!(!store.has_role(Role::DefaultAdmin, &admin()));
    }

    #[test]
    fn every_change_is_audited() {
        let store = RoleStore::new(admin());
        store.grant_role(&admin(), Role::Rebalancer, bob()).unwrap();
        store.revoke_role(&admin(), Role::Rebalancer, bob()).unwrap();
        let log = store.audit_log();
        // two bootstrap grants + grant + revoke
        assert_eq!(log.len(), 4);
        assert_eq!(log[3].change, RoleChange::Revoked);
        assert_eq!(log[3].account, bob());
        assert_eq!(log[3].sender, admin());
    }

    #[test]
    fn audit_entries_use_the_injected_clock() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let store = RoleStore::with_clock(admin(), clock.clone());
        clock.advance_secs(3_600).unwrap();
        store.grant_role(&admin(), Role::Rebalancer, bob()).unwrap();
        let log = store.audit_log();
        assert_eq!(log[0].at.timestamp(), 1_700_000_000);
        assert_eq!(log[2].at.timestamp(), 1_700_003_600);
    }

    #[test]
    fn zero_address_cannot_be_granted() {
        let store = RoleStore::new(admin());
        assert_eq!(
            store.grant_role(&admin(), Role::Admin, Address::ZERO),
            Err(AccessError::ZeroAddress)
        );
    }
}
