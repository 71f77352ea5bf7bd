//! Integration tests for rebalance execution: batch atomicity, the
//! strategy-to-ledger flow and oracle-backed valuation with failover.

mod common;

use common::*;
use rwa_vault_contracts::oracle::{OracleError, PriceSource, SourceFailure};
use rwa_vault_contracts::rebalance_strategy::{RebalanceStrategy, YieldSignal};
use rwa_vault_contracts::swap_helper::SwapError;
use rwa_vault_contracts::vault::VaultError;
use rwa_vault_protocol::access::{AccessError, Role};
use rwa_vault_protocol::clock::Clock;
use rwa_vault_protocol::config::{StrategyConfig, DEFAULT_STALENESS_THRESHOLD_SECS};
use rwa_vault_protocol::events::VaultEvent;
use rwa_vault_protocol::math::Wad;
use rwa_vault_protocol::Address;

/// Helper: a vault holding `bill_units` of the treasury bill, bought with
/// part of a 10 000 deposit.
fn funded_with_bills(bill_units: u128) -> Harness {
    let mut h = harness();
    h.vault.deposit(&alice(), units(10_000), alice()).unwrap();
    h.vault
        .rebalance(&keeper(), &[], &[], &[bill()], &[bill_units])
        .unwrap();
    h.vault.drain_events();
    h
}

fn signals(bill_apy: u32, bond_apy: u32) -> Vec<YieldSignal> {
    vec![
        YieldSignal {
            asset: bill(),
            apy_bps: bill_apy,
        },
        YieldSignal {
            asset: bond(),
            apy_bps: bond_apy,
        },
    ]
}

// ---- Atomicity ----

#[test]
fn slippage_failure_reverts_the_whole_batch() {
    let mut h = funded_with_bills(units(3_000));
    // Bond buys fill 2% under quote against a 1% tolerance.
    h.vault
        .swap_helper_mut()
        .market_mut()
        .set_execution_shortfall(stable(), bond(), 200);

    let before = h.vault.snapshot().unwrap();
    let fills_before = h.vault.swap_helper().market().fills().len();

    let err = h
        .vault
        .rebalance(&keeper(), &[bill()], &[units(1_000)], &[bond()], &[units(2_000)])
        .unwrap_err();
    assert!(matches!(err, VaultError::Swap(SwapError::SlippageExceeded { .. })));

    // The bill sale that ran first is gone too.
    assert_eq!(h.vault.snapshot().unwrap(), before);
    assert_eq!(h.vault.holding_of(&bill()), units(3_000));
    assert_eq!(h.vault.holding_of(&bond()), 0);
    assert_eq!(h.vault.idle_assets(), units(7_000));
    assert_eq!(h.vault.swap_helper().market().fills().len(), fills_before);
    assert!(h.vault.pending_events().is_empty());
}

#[test]
fn successful_batch_sells_before_buying() {
    let mut h = funded_with_bills(units(9_000));
    // Idle is 1 000; the 3 000 bond buy only works with the sale proceeds.
    let (sold, bought) = h
        .vault
        .rebalance(&keeper(), &[bill()], &[units(4_000)], &[bond()], &[units(3_000)])
        .unwrap();

    assert_eq!(sold, vec![units(4_000)]);
    assert_eq!(bought, vec![units(1_500)]);
    assert_eq!(h.vault.holding_of(&bill()), units(5_000));
    assert_eq!(h.vault.holding_of(&bond()), units(1_500));
    assert_eq!(h.vault.idle_assets(), units(2_000));
    // 9 000 bought, 4 000 sold, 3 000 bought: NAV is unchanged.
    assert_eq!(h.vault.managed_assets_value(), units(8_000));
    assert_eq!(h.vault.total_assets().unwrap(), units(10_000));

    let events = h.vault.drain_events();
    assert_eq!(events.len(), 1);
    match &events[0].event {
        VaultEvent::RebalanceExecuted { sells, buys, caller, .. } => {
            assert_eq!(*caller, keeper());
            assert_eq!(sells[0].asset, bill());
            assert_eq!(buys[0].amount_out, units(1_500));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn overspending_idle_reverts_with_insufficient_liquidity() {
    let mut h = funded_with_bills(units(9_000));
    let before = h.vault.snapshot().unwrap();

    let err = h
        .vault
        .rebalance(&keeper(), &[], &[], &[bond()], &[units(1_001)])
        .unwrap_err();
    assert_eq!(
        err,
        VaultError::InsufficientLiquidity {
            available: units(1_000),
            required: units(1_001),
        }
    );
    assert_eq!(h.vault.snapshot().unwrap(), before);
}

#[test]
fn rebalance_validates_before_trading() {
    let mut h = funded_with_bills(units(1_000));

    let err = h.vault.rebalance(&alice(), &[], &[], &[bill()], &[units(1)]).unwrap_err();
    assert_eq!(
        err,
        VaultError::Access(AccessError::MissingRole {
            role: Role::Rebalancer,
            account: alice(),
        })
    );

    assert!(matches!(
        h.vault.rebalance(&keeper(), &[bill()], &[], &[], &[]),
        Err(VaultError::ArrayLengthMismatch { side: "sell", .. })
    ));

    let unknown = Address::repeat_byte(0x77);
    assert_eq!(
        h.vault.rebalance(&keeper(), &[unknown], &[units(1)], &[], &[]),
        Err(VaultError::AssetNotRegistered(unknown))
    );

    assert_eq!(
        h.vault.rebalance(&keeper(), &[], &[], &[bill()], &[0]),
        Err(VaultError::ZeroAmount)
    );

    h.vault.pause(&admin()).unwrap();
    assert_eq!(
        h.vault.rebalance(&keeper(), &[], &[], &[bill()], &[units(1)]),
        Err(VaultError::Paused)
    );
}

#[test]
fn deactivated_assets_can_be_sold_but_not_bought() {
    let mut h = funded_with_bills(units(2_000));
    h.registry.write().deactivate_asset(&admin(), &bill()).unwrap();

    assert_eq!(
        h.vault.rebalance(&keeper(), &[], &[], &[bill()], &[units(100)]),
        Err(VaultError::AssetNotActive(bill()))
    );
    let (sold, _) = h
        .vault
        .rebalance(&keeper(), &[bill()], &[units(2_000)], &[], &[])
        .unwrap();
    assert_eq!(sold, vec![units(2_000)]);
    assert!(h.vault.holdings().is_empty());
}

#[test]
fn removed_holding_can_still_be_exited() {
    let mut h = funded_with_bills(units(4_000));
    h.registry.write().remove_asset(&admin(), &bill()).unwrap();
    assert!(!h.registry.read().is_registered(&bill()));

    // Buying the removed token is refused.
    assert_eq!(
        h.vault.rebalance(&keeper(), &[], &[], &[bill()], &[units(100)]),
        Err(VaultError::AssetNotActive(bill()))
    );

    let strategy = RebalanceStrategy::new(StrategyConfig::default()).unwrap();
    let plan = strategy
        .plan(
            &h.registry.read(),
            &h.oracle,
            h.vault.holdings(),
            h.vault.idle_assets(),
            &[YieldSignal {
                asset: bond(),
                apy_bps: 450,
            }],
        )
        .unwrap();
    assert_eq!(plan.sells.len(), 1);
    assert_eq!(plan.sells[0].amount, units(4_000));
    // 6 000 idle plus 4 000 of proceeds less the 1% haircut.
    assert_eq!(plan.buys[0].amount, units(9_960));

    let (sell_assets, sell_amounts, buy_assets, buy_amounts) = plan.into_arrays();
    h.vault
        .rebalance(&keeper(), &sell_assets, &sell_amounts, &buy_assets, &buy_amounts)
        .unwrap();
    assert_eq!(h.vault.holding_of(&bill()), 0);
    assert_eq!(h.vault.holding_of(&bond()), units(4_980));
    assert_eq!(h.vault.idle_assets(), units(40));

    // Once exited, the token is unknown again.
    assert_eq!(
        h.vault.rebalance(&keeper(), &[bill()], &[units(1)], &[], &[]),
        Err(VaultError::AssetNotRegistered(bill()))
    );
}

// ---- Strategy ----

#[test]
fn plan_survives_sell_fills_inside_tolerance() {
    let mut h = funded_with_bills(units(8_000));
    // Bill sales fill 0.5% under quote, inside the 1% tolerance.
    h.vault
        .swap_helper_mut()
        .market_mut()
        .set_execution_shortfall(bill(), stable(), 50);

    let strategy = RebalanceStrategy::new(StrategyConfig::default()).unwrap();
    let plan = strategy
        .plan(
            &h.registry.read(),
            &h.oracle,
            h.vault.holdings(),
            h.vault.idle_assets(),
            &signals(500, 500),
        )
        .unwrap();
    assert_eq!(plan.sells[0].amount, units(3_000));
    // 2 000 idle plus 3 000 of proceeds at the 1% worst case.
    assert_eq!(plan.buys[0].asset, bond());
    assert_eq!(plan.buys[0].amount, units(4_970));

    let (sell_assets, sell_amounts, buy_assets, buy_amounts) = plan.into_arrays();
    let (sold, bought) = h
        .vault
        .rebalance(&keeper(), &sell_assets, &sell_amounts, &buy_assets, &buy_amounts)
        .unwrap();
    assert_eq!(sold, vec![units(2_985)]);
    assert_eq!(bought, vec![units(2_485)]);
    assert_eq!(h.vault.holding_of(&bill()), units(5_000));
    assert_eq!(h.vault.idle_assets(), units(15));
}

#[test]
fn plan_executes_and_lands_on_target() {
    let mut h = harness();
    h.vault.deposit(&alice(), units(10_000), alice()).unwrap();
    let strategy = RebalanceStrategy::new(StrategyConfig::default()).unwrap();

    let plan = strategy
        .plan(
            &h.registry.read(),
            &h.oracle,
            h.vault.holdings(),
            h.vault.idle_assets(),
            &signals(500, 300),
        )
        .unwrap();
    let weights: Vec<u16> = plan.targets.iter().map(|t| t.weight_bps).collect();
    assert_eq!(weights.iter().map(|w| *w as u32).sum::<u32>(), 10_000);
    assert!(weights[0] > weights[1], "higher yield gets the larger weight");
    assert!(plan.sells.is_empty());
    assert_eq!(plan.buys.len(), 2);

    let (sell_assets, sell_amounts, buy_assets, buy_amounts) = plan.into_arrays();
    h.vault
        .rebalance(&keeper(), &sell_assets, &sell_amounts, &buy_assets, &buy_amounts)
        .unwrap();
    assert_eq!(h.vault.idle_assets(), 0);
    assert_eq!(h.vault.total_assets().unwrap(), units(10_000));

    let valuation = h.vault.valuate_holdings(&h.oracle).unwrap();
    assert_eq!(valuation, units(10_000));
    let update = h.vault.update_managed_assets(&keeper(), valuation).unwrap();
    assert!(!update.circuit_breaker_tripped);
    assert_eq!(h.vault.share_price().unwrap(), Wad::ONE);

    // Already on target: nothing left to do.
    let again = strategy
        .plan(
            &h.registry.read(),
            &h.oracle,
            h.vault.holdings(),
            h.vault.idle_assets(),
            &signals(500, 300),
        )
        .unwrap();
    assert!(again.is_empty());
}

#[test]
fn deactivated_holding_is_sold_in_full() {
    let h = funded_with_bills(units(4_000));
    h.registry.write().deactivate_asset(&admin(), &bill()).unwrap();
    let strategy = RebalanceStrategy::new(StrategyConfig::default()).unwrap();

    let plan = strategy
        .plan(
            &h.registry.read(),
            &h.oracle,
            h.vault.holdings(),
            h.vault.idle_assets(),
            &[YieldSignal {
                asset: bond(),
                apy_bps: 450,
            }],
        )
        .unwrap();

    assert_eq!(plan.sells.len(), 1);
    assert_eq!(plan.sells[0].asset, bill());
    assert_eq!(plan.sells[0].amount, units(4_000));
    // The single active asset is clamped, then normalized back to 100%.
    assert_eq!(plan.targets.len(), 1);
    assert_eq!(plan.targets[0].weight_bps, 10_000);
}

// ---- Oracle ----

#[test]
fn stale_primary_fails_over_to_backup() {
    let h = funded_with_bills(units(1_000));
    h.clock.advance_secs(DEFAULT_STALENESS_THRESHOLD_SECS + 1).unwrap();
    h.bill_backup.push(101_000_000, 50_000, -8, h.clock.now());

    assert!(h.oracle.is_price_stale(&bill()).unwrap());
    let (price, source) = h.oracle.get_price_with_source(&bill()).unwrap();
    assert_eq!(source, PriceSource::Backup);
    assert_eq!(price, Wad(1_010_000_000_000_000_000));

    // Only bills are held, so the book values at the backup price.
    assert_eq!(h.vault.valuate_holdings(&h.oracle).unwrap(), units(1_010));
}

#[test]
fn valuation_fails_when_no_source_is_usable() {
    let h = funded_with_bills(units(1_000));
    h.bill_primary.set_offline(true);

    let err = h.vault.valuate_holdings(&h.oracle).unwrap_err();
    match err {
        VaultError::Oracle(OracleError::NoValidPrice { asset, backup, .. }) => {
            assert_eq!(asset, bill());
            // The backup feed exists but has never published.
            assert!(backup.is_some());
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(
        h.oracle.resolve(&bill()),
        Err(OracleError::NoValidPrice {
            primary: SourceFailure::Feed(_),
            ..
        })
    ));
}
