//! Property-based invariants over the public API.

use matchbook_rs::prelude::*;
use matchbook_rs::{BPlusTree, DECIMALS};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Ins;
impl CoinType for Ins {
    const SYMBOL: &'static str = "INS";
    const DECIMALS: u8 = 8;
}

struct Qte;
impl CoinType for Qte {
    const SYMBOL: &'static str = "QTE";
    const DECIMALS: u8 = 8;
}

proptest! {
    /// Converting raw units to canonical form and back is the identity
    /// whenever the precision fits.
    #[test]
    fn fp_unit_conversion_round_trips(value in 0u64..=u64::MAX / 100, decimals in 0u8..=DECIMALS) {
        let fp = Fp::from_units(value, decimals, RoundingMode::NoLoss).unwrap();
        prop_assert_eq!(fp.to_units(decimals, RoundingMode::NoLoss).unwrap(), value);
    }

    /// Display then parse is the identity.
    #[test]
    fn fp_display_parse_round_trips(raw in 0u128..=10u128.pow(30)) {
        let fp = Fp::from_raw(raw);
        let parsed: Fp = fp.to_string().parse().unwrap();
        prop_assert_eq!(parsed, fp);
    }

    /// Truncating and rounding-up division bracket the exact quotient.
    #[test]
    fn fp_div_rounding_brackets(a in 1u64..1_000_000, b in 1u64..1_000_000) {
        let a = Fp::from_int(a);
        let b = Fp::from_int(b);
        let down = a.div(b, RoundingMode::Trunc).unwrap();
        let up = a.div(b, RoundingMode::RoundUp).unwrap();
        prop_assert!(down <= up);
        prop_assert!(up.raw() - down.raw() <= 1);
        // When no-loss succeeds, all three agree.
        if let Ok(exact) = a.div(b, RoundingMode::NoLoss) {
            prop_assert_eq!(exact, down);
            prop_assert_eq!(exact, up);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The B+ tree agrees with a BTreeMap model under arbitrary
    /// insert/remove interleavings, in both iteration directions.
    #[test]
    fn btree_matches_model(ops in proptest::collection::vec((any::<bool>(), 0u64..200), 1..400)) {
        let mut tree: BPlusTree<u64> = BPlusTree::default();
        let mut model: BTreeMap<u64, u64> = BTreeMap::new();
        for (insert, key) in ops {
            let fp_key = Fp::from_int(key);
            if insert {
                prop_assert_eq!(tree.insert(fp_key, key), model.insert(key, key));
            } else {
                prop_assert_eq!(tree.remove(fp_key), model.remove(&key));
            }
            prop_assert_eq!(tree.len(), model.len());
            prop_assert_eq!(tree.min_key(), model.keys().next().map(|k| Fp::from_int(*k)));
            prop_assert_eq!(tree.max_key(), model.keys().last().map(|k| Fp::from_int(*k)));
        }
        let forward: Vec<u64> = tree.iter().map(|(_, v)| *v).collect();
        let expected: Vec<u64> = model.values().copied().collect();
        prop_assert_eq!(forward, expected);
        let mut backward: Vec<u64> = tree.iter_rev().map(|(_, v)| *v).collect();
        backward.reverse();
        let expected: Vec<u64> = model.values().copied().collect();
        prop_assert_eq!(backward, expected);
    }
}

#[derive(Debug, Clone)]
enum BookOp {
    Limit {
        user: usize,
        buy: bool,
        behavior: u8,
        price: u64,
        qty: u64,
    },
    Market {
        user: usize,
        buy: bool,
        qty: u64,
        cap: u64,
    },
    Cancel {
        slot: usize,
    },
    Crank {
        limit: usize,
    },
    Rebalance {
        limit: usize,
    },
}

fn book_op() -> impl Strategy<Value = BookOp> {
    prop_oneof![
        4 => (0usize..3, any::<bool>(), 1u8..=4, 5u64..15, 1u64..5).prop_map(
            |(user, buy, behavior, price, qty)| BookOp::Limit { user, buy, behavior, price, qty }
        ),
        1 => (0usize..3, any::<bool>(), 1u64..4, 10u64..50).prop_map(
            |(user, buy, qty, cap)| BookOp::Market { user, buy, qty, cap }
        ),
        2 => (0usize..8).prop_map(|slot| BookOp::Cancel { slot }),
        2 => (0usize..4).prop_map(|limit| BookOp::Crank { limit }),
        1 => (1usize..3).prop_map(|limit| BookOp::Rebalance { limit }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any operation sequence conserves coins: after settling and
    /// cancelling everything, every unit is back in vaults and accounts.
    #[test]
    fn book_workload_conserves_coins(ops in proptest::collection::vec(book_op(), 1..80)) {
        let i_vault = Arc::new(CoinVault::<Ins>::new());
        let q_vault = Arc::new(CoinVault::<Qte>::new());
        let mut market =
            Orderbook::init_market(3, 3, 2, FeeType::free(), i_vault.clone(), q_vault.clone())
                .unwrap();

        let users: Vec<(Address, MarketAccountKey)> = (0..3)
            .map(|n| {
                let address = Address::derive(&format!("prop-user-{n}"));
                i_vault.mint(address, 1_000_000_000_000);
                q_vault.mint(address, 1_000_000_000_000);
                let key = market
                    .open_market_account(address, AccountIdentifier::direct(address))
                    .unwrap();
                market
                    .deposit(address, key, 1_000_000_000_000, 1_000_000_000_000)
                    .unwrap();
                (address, key)
            })
            .collect();
        let initial_i = i_vault.total_supply();
        let initial_q = q_vault.total_supply();

        let mut live: Vec<(Address, OrderId)> = Vec::new();
        for op in ops {
            match op {
                BookOp::Limit { user, buy, behavior, price, qty } => {
                    let (address, key) = users[user];
                    let side = if buy { Side::Buy } else { Side::Sell };
                    let behavior = Behavior::try_from(behavior).unwrap();
                    if let Ok(Some(id)) = market.add_order(
                        address,
                        key,
                        side,
                        behavior,
                        Fp::from_int(price),
                        Fp::from_int(qty),
                        None,
                        Fp::ZERO,
                    ) {
                        live.push((address, id));
                    }
                }
                BookOp::Market { user, buy, qty, cap } => {
                    let (address, key) = users[user];
                    let (side, cap) = if buy {
                        (Side::Buy, Fp::from_int(cap))
                    } else {
                        (Side::Sell, Fp::ZERO)
                    };
                    if let Ok(Some(id)) = market.add_order(
                        address,
                        key,
                        side,
                        Behavior::Ioc,
                        Fp::ZERO,
                        Fp::from_int(qty),
                        None,
                        cap,
                    ) {
                        live.push((address, id));
                    }
                }
                BookOp::Cancel { slot } => {
                    if !live.is_empty() {
                        let (address, id) = live.swap_remove(slot % live.len());
                        let _ = market.cancel_order(address, id);
                    }
                }
                BookOp::Crank { limit } => {
                    market.crank(limit).unwrap();
                }
                BookOp::Rebalance { limit } => {
                    market.rebalance(limit);
                }
            }
        }

        // Settle the backlog, cancel every survivor, settle again.
        market.crank(usize::MAX).unwrap();
        for (address, key) in &users {
            for id in market.account_active_orders(*key).unwrap() {
                let _ = market.cancel_order(*address, id);
            }
        }
        market.crank(usize::MAX).unwrap();

        // Nothing live, nothing pending, every coin accounted for.
        prop_assert_eq!(market.pending_crank_events(), 0);
        let (live_orders, _, _) = market.order_pool_stats();
        prop_assert_eq!(live_orders, 0);
        let mut total_i = 0u64;
        let mut total_q = 0u64;
        for (address, key) in &users {
            let (i, q) = market.account_balances(*key).unwrap();
            market.withdraw(*address, *key, i, q).unwrap();
            total_i += i;
            total_q += q;
        }
        let _ = (total_i, total_q);
        prop_assert_eq!(i_vault.total_supply(), initial_i);
        prop_assert_eq!(q_vault.total_supply(), initial_q);
    }
}
