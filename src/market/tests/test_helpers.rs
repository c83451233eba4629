//! Shared fixtures: coin markers, a funded market harness, and balance
//! assertions in whole units.

use crate::market::Orderbook;
use crate::market::account::{AccountIdentifier, Address, MarketAccountKey};
use crate::market::coin::{CoinType, CoinVault};
use crate::market::events::{IndexingExecutionEvent, IndexingFinalizeEvent};
use crate::market::fees::FeeType;
use crate::market::fixed_point::{Fp, Price, Qty, RoundingMode};
use crate::market::order::{Behavior, OrderId, Side};
use std::sync::{Arc, Mutex};

pub struct Ins;
impl CoinType for Ins {
    const SYMBOL: &'static str = "INS";
    const DECIMALS: u8 = 8;
}

pub struct Qte;
impl CoinType for Qte {
    const SYMBOL: &'static str = "QTE";
    const DECIMALS: u8 = 8;
}

pub type TestBook = Orderbook<Ins, Qte>;

pub struct Harness {
    pub market: TestBook,
    pub instrument_vault: Arc<CoinVault<Ins>>,
    pub quote_vault: Arc<CoinVault<Qte>>,
    pub finalize_events: Arc<Mutex<Vec<IndexingFinalizeEvent>>>,
    pub execution_events: Arc<Mutex<Vec<IndexingExecutionEvent>>>,
}

pub fn fp(s: &str) -> Fp {
    s.parse().expect("valid fixed-point literal")
}

/// Whole units expressed in raw coin units (8 decimals in these tests).
pub fn units(n: u64) -> u64 {
    Fp::from_int(n)
        .to_units(Ins::DECIMALS, RoundingMode::NoLoss)
        .expect("whole units convert exactly")
}

/// A market with 3/3 decimals, free fees, and event collectors installed.
pub fn setup(max_cache_size: usize) -> Harness {
    let instrument_vault = Arc::new(CoinVault::<Ins>::new());
    let quote_vault = Arc::new(CoinVault::<Qte>::new());
    let mut market = Orderbook::init_market(
        3,
        3,
        max_cache_size,
        FeeType::free(),
        instrument_vault.clone(),
        quote_vault.clone(),
    )
    .expect("valid market config");

    let finalize_events = Arc::new(Mutex::new(Vec::new()));
    let sink = finalize_events.clone();
    market.finalize_listener = Some(Arc::new(move |event: &IndexingFinalizeEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    let execution_events = Arc::new(Mutex::new(Vec::new()));
    let sink = execution_events.clone();
    market.execution_listener = Some(Arc::new(move |event: &IndexingExecutionEvent| {
        sink.lock().unwrap().push(event.clone());
    }));

    Harness {
        market,
        instrument_vault,
        quote_vault,
        finalize_events,
        execution_events,
    }
}

impl Harness {
    /// Open an account for a fresh user funded with `i_units` / `q_units`
    /// whole coins already deposited into the market account.
    pub fn user(&self, name: &str, i_units: u64, q_units: u64) -> (Address, MarketAccountKey) {
        let address = Address::derive(name);
        self.instrument_vault.mint(address, units(i_units));
        self.quote_vault.mint(address, units(q_units));
        let key = self
            .market
            .open_market_account(address, AccountIdentifier::direct(address))
            .expect("fresh account");
        self.market
            .deposit(address, key, units(i_units), units(q_units))
            .expect("funded deposit");
        (address, key)
    }

    pub fn limit(
        &mut self,
        caller: Address,
        key: MarketAccountKey,
        side: Side,
        behavior: Behavior,
        price: &str,
        qty: &str,
    ) -> Option<OrderId> {
        self.market
            .add_order(caller, key, side, behavior, fp(price), fp(qty), None, Fp::ZERO)
            .expect("valid limit order")
    }

    pub fn market_order(
        &mut self,
        caller: Address,
        key: MarketAccountKey,
        side: Side,
        behavior: Behavior,
        qty: &str,
        max_collateral: &str,
    ) -> Option<OrderId> {
        self.market
            .add_order(
                caller,
                key,
                side,
                behavior,
                Fp::ZERO,
                fp(qty),
                None,
                fp(max_collateral),
            )
            .expect("valid market order")
    }

    /// Account balances in raw coin units.
    pub fn balances(&self, key: MarketAccountKey) -> (u64, u64) {
        self.market.account_balances(key).expect("account open")
    }

    /// Seed the five-maker book used across the scenario suite, on `side`:
    /// prices 5..=9 with quantities 3,3,5,4,3 (ordered best-last for buys).
    pub fn seed_five_makers(
        &mut self,
        caller: Address,
        key: MarketAccountKey,
        side: Side,
    ) -> Vec<OrderId> {
        let ladder: &[(&str, &str)] = &[("5", "3"), ("6", "3"), ("7", "5"), ("8", "4"), ("9", "3")];
        ladder
            .iter()
            .map(|(price, qty)| {
                self.limit(caller, key, side, Behavior::Gtc, price, qty)
                    .expect("maker rests")
            })
            .collect()
    }

    /// Total coins in existence for conservation checks: vault balances
    /// plus account balances plus live order collateral, in raw units.
    pub fn total_instrument(&self) -> u128 {
        let vault = self.instrument_vault.total_supply() as u128;
        let accounts: u128 = self
            .market
            .accounts
            .iter()
            .map(|entry| entry.instrument_balance() as u128)
            .sum();
        let collateral: u128 = self
            .market
            .orders
            .iter_live()
            .map(|(_, order)| order.collateral_i.value() as u128)
            .sum();
        vault + accounts + collateral
    }

    pub fn total_quote(&self) -> u128 {
        let vault = self.quote_vault.total_supply() as u128;
        let accounts: u128 = self
            .market
            .accounts
            .iter()
            .map(|entry| entry.quote_balance() as u128)
            .sum();
        let collateral: u128 = self
            .market
            .orders
            .iter_live()
            .map(|(_, order)| order.collateral_q.value() as u128)
            .sum();
        vault + accounts + collateral
    }
}

/// Assert the summary fields equal what a full recomputation from the
/// underlying structures yields, on both sides.
pub fn assert_summary_exact(market: &TestBook) {
    for side in [Side::Buy, Side::Sell] {
        let store = market.store(side);
        let summary = store.summary();
        let cache: Vec<(Price, Qty)> = store
            .iter_best_first()
            .take(summary.cache_size)
            .map(|(p, e)| (p, e.qty))
            .collect();
        assert_eq!(summary.cache_size, cache.len());
        let cache_qty = cache.iter().fold(Qty::ZERO, |acc, (_, q)| acc.add(*q));
        assert_eq!(summary.cache_qty, cache_qty, "cache qty drift on {side}");
    }
}

/// Assert order-pool and level-pool accounting: live + free = allocated.
pub fn assert_pool_safety(market: &TestBook) {
    let (live, free, allocated) = market.order_pool_stats();
    assert_eq!(live + free, allocated, "order pool leak");
    let (live, free, allocated) = market.level_pool_stats();
    assert_eq!(live + free, allocated, "level pool leak");
}
