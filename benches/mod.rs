//! Criterion benchmarks: add-only flow, an aggressive taker walk, and a
//! crank drain.

use criterion::{Criterion, criterion_group, criterion_main};
use matchbook_rs::prelude::*;
use std::hint::black_box;
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

struct Fixture {
    market: Orderbook<Ins, Qte>,
    maker: (Address, MarketAccountKey),
    taker: (Address, MarketAccountKey),
}

fn fixture(max_cache_size: usize) -> Fixture {
    let i_vault = Arc::new(CoinVault::<Ins>::new());
    let q_vault = Arc::new(CoinVault::<Qte>::new());
    let market =
        Orderbook::init_market(3, 3, max_cache_size, FeeType::free(), i_vault.clone(), q_vault.clone())
            .unwrap();

    let open = |name: &str| {
        let address = Address::derive(name);
        i_vault.mint(address, u64::MAX / 4);
        q_vault.mint(address, u64::MAX / 4);
        let key = market
            .open_market_account(address, AccountIdentifier::direct(address))
            .unwrap();
        market
            .deposit(address, key, u64::MAX / 4, u64::MAX / 4)
            .unwrap();
        (address, key)
    };
    let maker = open("bench-maker");
    let taker = open("bench-taker");
    Fixture {
        market,
        maker,
        taker,
    }
}

fn bench_add_only(c: &mut Criterion) {
    c.bench_function("add_resting_bids_100_levels", |b| {
        b.iter_batched(
            || fixture(16),
            |mut f| {
                let (maker, key) = f.maker;
                for n in 0..100u64 {
                    let id = f
                        .market
                        .add_order(
                            maker,
                            key,
                            Side::Buy,
                            Behavior::Gtc,
                            Fp::from_int(1_000 + n),
                            Fp::from_int(1),
                            None,
                            Fp::ZERO,
                        )
                        .unwrap();
                    black_box(id);
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_aggressive_walk(c: &mut Criterion) {
    c.bench_function("taker_sweep_64_levels", |b| {
        b.iter_batched(
            || {
                let mut f = fixture(8);
                let (maker, key) = f.maker;
                for n in 0..64u64 {
                    f.market
                        .add_order(
                            maker,
                            key,
                            Side::Sell,
                            Behavior::Gtc,
                            Fp::from_int(1_000 + n),
                            Fp::from_int(2),
                            None,
                            Fp::ZERO,
                        )
                        .unwrap();
                }
                f
            },
            |mut f| {
                let (taker, key) = f.taker;
                let id = f
                    .market
                    .add_order(
                        taker,
                        key,
                        Side::Buy,
                        Behavior::Ioc,
                        Fp::from_int(2_000),
                        Fp::from_int(128),
                        None,
                        Fp::ZERO,
                    )
                    .unwrap();
                black_box(id);
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_crank_drain(c: &mut Criterion) {
    c.bench_function("crank_64_events", |b| {
        b.iter_batched(
            || {
                let mut f = fixture(8);
                let (maker, maker_key) = f.maker;
                let (taker, taker_key) = f.taker;
                for n in 0..64u64 {
                    f.market
                        .add_order(
                            maker,
                            maker_key,
                            Side::Sell,
                            Behavior::Gtc,
                            Fp::from_int(1_000 + n),
                            Fp::from_int(2),
                            None,
                            Fp::ZERO,
                        )
                        .unwrap();
                }
                f.market
                    .add_order(
                        taker,
                        taker_key,
                        Side::Buy,
                        Behavior::Ioc,
                        Fp::from_int(2_000),
                        Fp::from_int(128),
                        None,
                        Fp::ZERO,
                    )
                    .unwrap();
                f
            },
            |mut f| {
                let settled = f.market.crank(usize::MAX).unwrap();
                black_box(settled);
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_add_only, bench_aggressive_walk, bench_crank_drain);
criterion_main!(benches);
