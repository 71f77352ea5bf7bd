//! # Asset Registry
//!
//! Catalog of the real-world-asset tokens the vault may hold. Registration
//! is keyed on the token address, so registering the same token twice is
//! rejected rather than silently overwritten.
//!
//! ## Storage Layout
//!
//! Records live in an append-only arena (`Vec<Option<RwaAsset>>`) addressed
//! by a stable [`AssetId`]. A token index maps addresses to ids, and an
//! ordered active set drives iteration. Removing an asset never moves any
//! other record, so ids held elsewhere stay valid.
//!
//! - **Soft removal** ([`AssetRegistry::deactivate_asset`]) keeps the record
//!   with `is_active = false` and drops it from the active set.
//! - **Hard removal** ([`AssetRegistry::remove_asset`]) clears the record and
//!   its index entry entirely. The slot is not reused.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use rwa_vault_protocol::access::{AccessError, Role, RoleStore};
use rwa_vault_protocol::clock::Clock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The token is already registered.
    #[error("asset already registered: {0}")]
    AlreadyRegistered(Address),

    /// The token is not registered.
    #[error("asset not registered: {0}")]
    NotRegistered(Address),

    /// Soft removal of an asset that is already inactive.
    #[error("asset already inactive: {0}")]
    AlreadyInactive(Address),

    /// Reactivation of an asset that is already active.
    #[error("asset already active: {0}")]
    AlreadyActive(Address),

    /// The zero address cannot be registered.
    #[error("asset address cannot be zero")]
    ZeroAddress,

    /// The caller lacks the required role.
    #[error(transparent)]
    Unauthorized(#[from] AccessError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Stable arena index of a registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub usize);

/// Category of a real-world asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    TreasuryBill,
    CorporateBond,
    MoneyMarket,
    PrivateCredit,
    RealEstate,
    Commodity,
    Equity,
    Other,
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AssetType::TreasuryBill => "TreasuryBill",
            AssetType::CorporateBond => "CorporateBond",
            AssetType::MoneyMarket => "MoneyMarket",
            AssetType::PrivateCredit => "PrivateCredit",
            AssetType::RealEstate => "RealEstate",
            AssetType::Commodity => "Commodity",
            AssetType::Equity => "Equity",
            AssetType::Other => "Other",
        };
        write!(f, "{name}")
    }
}

/// A registered RWA token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RwaAsset {
    /// Token contract address. Unique across the registry.
    pub token_address: Address,
    /// Human-readable name (e.g., "US Treasury 3M").
    pub name: String,
    /// Ticker symbol (e.g., "UST3M").
    pub symbol: String,
    pub asset_type: AssetType,
    /// Reference of the price source the oracle adapter resolves this
    /// asset through.
    pub oracle_source: String,
    /// `false` after a soft removal.
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
}

/// Parameters for [`AssetRegistry::register_asset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAsset {
    pub token_address: Address,
    pub name: String,
    pub symbol: String,
    pub asset_type: AssetType,
    pub oracle_source: String,
}

// ---------------------------------------------------------------------------
// AssetRegistry
// ---------------------------------------------------------------------------

/// The registry itself. Mutations require [`Role::Admin`].
pub struct AssetRegistry {
    roles: Arc<RoleStore>,
    clock: Arc<dyn Clock>,
    /// Arena of records. `None` marks a hard-removed slot.
    slots: Vec<Option<RwaAsset>>,
    /// Token address to arena slot.
    index: HashMap<Address, AssetId>,
    /// Active records, iterated in registration order.
    active: BTreeSet<AssetId>,
}

impl AssetRegistry {
    /// Creates an empty registry.
    pub fn new(roles: Arc<RoleStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            roles,
            clock,
            slots: Vec::new(),
            index: HashMap::new(),
            active: BTreeSet::new(),
        }
    }

    /// Registers a new, active asset.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if the token is already
    /// in the registry (active or not). Returns [`RegistryError::ZeroAddress`]
    /// for the zero address.
    pub fn register_asset(&mut self, caller: &Address, asset: NewAsset) -> Result<AssetId, RegistryError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        if asset.token_address == Address::ZERO {
            return Err(RegistryError::ZeroAddress);
        }
        if self.index.contains_key(&asset.token_address) {
            return Err(RegistryError::AlreadyRegistered(asset.token_address));
        }

        let id = AssetId(self.slots.len());
        let token = asset.token_address;
        self.slots.push(Some(RwaAsset {
            token_address: token,
            name: asset.name,
            symbol: asset.symbol,
            asset_type: asset.asset_type,
            oracle_source: asset.oracle_source,
            is_active: true,
            registered_at: self.clock.now(),
        }));
        self.index.insert(token, id);
        self.active.insert(id);

        tracing::info!(%token, slot = id.0, "asset registered");
        Ok(id)
    }

    /// Soft removal: keeps the record, flags it inactive.
    pub fn deactivate_asset(&mut self, caller: &Address, token: &Address) -> Result<(), RegistryError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        let id = self.id_of(token)?;
        let record = self.record_mut(id, token)?;
        if !record.is_active {
            return Err(RegistryError::AlreadyInactive(*token));
        }
        record.is_active = false;
        self.active.remove(&id);
        tracing::info!(%token, "asset deactivated");
        Ok(())
    }

    /// Returns a soft-removed asset to the active set.
    pub fn reactivate_asset(&mut self, caller: &Address, token: &Address) -> Result<(), RegistryError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        let id = self.id_of(token)?;
        let record = self.record_mut(id, token)?;
        if record.is_active {
            return Err(RegistryError::AlreadyActive(*token));
        }
        record.is_active = true;
        self.active.insert(id);
        tracing::info!(%token, "asset reactivated");
        Ok(())
    }

    /// Hard removal: the record is cleared and the token may be registered
    /// again later under a fresh id.
    pub fn remove_asset(&mut self, caller: &Address, token: &Address) -> Result<RwaAsset, RegistryError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        let id = self.id_of(token)?;
        let record = self
            .slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(RegistryError::NotRegistered(*token))?;
        self.index.remove(token);
        self.active.remove(&id);
        tracing::info!(%token, slot = id.0, "asset removed");
        Ok(record)
    }

    /// Points an asset at a different price source.
    pub fn update_oracle_source(
        &mut self,
        caller: &Address,
        token: &Address,
        oracle_source: String,
    ) -> Result<(), RegistryError> {
        self.roles.ensure_role(Role::Admin, caller)?;
        let id = self.id_of(token)?;
        let record = self.record_mut(id, token)?;
        tracing::info!(%token, from = %record.oracle_source, to = %oracle_source, "oracle source updated");
        record.oracle_source = oracle_source;
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// Addresses of every active asset, in registration order.
    pub fn get_active_assets(&self) -> Vec<Address> {
        self.active
            .iter()
            .filter_map(|id| self.slots.get(id.0).and_then(Option::as_ref))
            .map(|asset| asset.token_address)
            .collect()
    }

    /// Every registered record (active or not), in registration order.
    pub fn get_all_assets(&self) -> Vec<&RwaAsset> {
        self.slots.iter().filter_map(Option::as_ref).collect()
    }

    pub fn get_asset(&self, token: &Address) -> Option<&RwaAsset> {
        self.index
            .get(token)
            .and_then(|id| self.slots.get(id.0))
            .and_then(Option::as_ref)
    }

    pub fn is_registered(&self, token: &Address) -> bool {
        self.index.contains_key(token)
    }

    pub fn is_active(&self, token: &Address) -> bool {
        self.get_asset(token).map(|a| a.is_active).unwrap_or(false)
    }

    /// Number of registered records, including inactive ones.
    pub fn asset_count(&self) -> usize {
        self.index.len()
    }

    /// Number of active records.
    pub fn active_asset_count(&self) -> usize {
        self.active.len()
    }

    fn id_of(&self, token: &Address) -> Result<AssetId, RegistryError> {
        self.index
            .get(token)
            .copied()
            .ok_or(RegistryError::NotRegistered(*token))
    }

    fn record_mut(&mut self, id: AssetId, token: &Address) -> Result<&mut RwaAsset, RegistryError> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(RegistryError::NotRegistered(*token))
    }
}
