//! Shared fixture for the integration tests: a vault wired to a manual
//! clock, a registry with two RWA tokens, an oracle adapter with a primary
//! and a backup feed per token, and a simulated market.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::RwLock;
use rwa_vault_contracts::asset_registry::{AssetRegistry, AssetType, NewAsset};
use rwa_vault_contracts::oracle::{AggregatorFeed, OracleAdapter, OracleConfig, PushFeed};
use rwa_vault_contracts::swap_helper::{SimulatedMarket, SwapHelper};
use rwa_vault_contracts::vault::VaultLedger;
use rwa_vault_protocol::access::{Role, RoleStore};
use rwa_vault_protocol::clock::{Clock, ManualClock};
use rwa_vault_protocol::config::{VaultConfig, WAD};
use rwa_vault_protocol::math::Wad;
use rwa_vault_protocol::Address;

pub const START: i64 = 1_700_000_000;

pub fn admin() -> Address {
    Address::repeat_byte(0xAD)
}

pub fn keeper() -> Address {
    Address::repeat_byte(0xEE)
}

pub fn alice() -> Address {
    Address::repeat_byte(0xA1)
}

pub fn bob() -> Address {
    Address::repeat_byte(0xB0)
}

pub fn stable() -> Address {
    Address::repeat_byte(0x5A)
}

/// Treasury bill token, priced at 1.00.
pub fn bill() -> Address {
    Address::repeat_byte(0x01)
}

/// Corporate bond token, priced at 2.00.
pub fn bond() -> Address {
    Address::repeat_byte(0x02)
}

pub fn units(n: u128) -> u128 {
    n * WAD
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub roles: Arc<RoleStore>,
    pub registry: Arc<RwLock<AssetRegistry>>,
    pub oracle: OracleAdapter,
    pub bill_primary: Arc<AggregatorFeed>,
    pub bill_backup: Arc<PushFeed>,
    pub bond_primary: Arc<AggregatorFeed>,
    pub vault: VaultLedger<SimulatedMarket>,
}

pub fn harness() -> Harness {
    harness_with(VaultConfig::default())
}

pub fn harness_with(config: VaultConfig) -> Harness {
    let clock = Arc::new(ManualClock::at_unix(START));
    let roles = Arc::new(RoleStore::with_clock(admin(), clock.clone()));
    roles.grant_role(&admin(), Role::Rebalancer, keeper()).unwrap();

    let mut registry = AssetRegistry::new(roles.clone(), clock.clone());
    for (token, symbol, asset_type) in [
        (bill(), "UST3M", AssetType::TreasuryBill),
        (bond(), "CORP5Y", AssetType::CorporateBond),
    ] {
        registry
            .register_asset(
                &admin(),
                NewAsset {
                    token_address: token,
                    name: format!("{symbol} token"),
                    symbol: symbol.to_string(),
                    asset_type,
                    oracle_source: format!("{symbol}-agg"),
                },
            )
            .unwrap();
    }
    let registry = Arc::new(RwLock::new(registry));

    let mut oracle = OracleAdapter::new(roles.clone(), clock.clone());
    let bill_primary = Arc::new(AggregatorFeed::new("UST3M / USD", 8));
    let bill_backup = Arc::new(PushFeed::new("UST3M / USD push"));
    let bond_primary = Arc::new(AggregatorFeed::new("CORP5Y / USD", 8));
    oracle
        .register_feed(&admin(), "UST3M-agg".into(), bill_primary.clone())
        .unwrap();
    oracle
        .register_feed(&admin(), "UST3M-push".into(), bill_backup.clone())
        .unwrap();
    oracle
        .register_feed(&admin(), "CORP5Y-agg".into(), bond_primary.clone())
        .unwrap();
    oracle
        .configure_asset(
            &admin(),
            bill(),
            OracleConfig::new("UST3M-agg").with_backup("UST3M-push"),
        )
        .unwrap();
    oracle
        .configure_asset(&admin(), bond(), OracleConfig::new("CORP5Y-agg"))
        .unwrap();
    bill_primary.push_answer(100_000_000, clock.now());
    bond_primary.push_answer(200_000_000, clock.now());

    let mut market = SimulatedMarket::new();
    market.set_price(bill(), stable(), Wad(WAD)).unwrap();
    market.set_price(bond(), stable(), Wad(2 * WAD)).unwrap();

    let vault = VaultLedger::new(
        stable(),
        config,
        roles.clone(),
        clock.clone(),
        registry.clone(),
        SwapHelper::new(market),
    )
    .unwrap();

    Harness {
        clock,
        roles,
        registry,
        oracle,
        bill_primary,
        bill_backup,
        bond_primary,
        vault,
    }
}
