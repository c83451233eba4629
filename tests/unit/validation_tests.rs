//! Argument validation and error taxonomy through the public API.

use matchbook_rs::prelude::*;
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

struct DeadCoin;
impl CoinType for DeadCoin {
    const SYMBOL: &'static str = "DEAD";
    const DECIMALS: u8 = 6;
    fn is_initialized() -> bool {
        false
    }
}

struct TooFine;
impl CoinType for TooFine {
    const SYMBOL: &'static str = "FINE";
    const DECIMALS: u8 = 12;
}

fn fp(s: &str) -> Fp {
    s.parse().unwrap()
}

fn vaults() -> (Arc<CoinVault<Ins>>, Arc<CoinVault<Qte>>) {
    (Arc::new(CoinVault::new()), Arc::new(CoinVault::new()))
}

fn market() -> Orderbook<Ins, Qte> {
    let (i, q) = vaults();
    Orderbook::init_market(3, 3, 8, FeeType::free(), i, q).unwrap()
}

/// Market plus a funded direct account.
fn market_with_account() -> (Orderbook<Ins, Qte>, Address, MarketAccountKey) {
    let (i, q) = vaults();
    let market = Orderbook::init_market(3, 3, 8, FeeType::free(), i.clone(), q.clone()).unwrap();
    let alice = Address::derive("alice");
    i.mint(alice, 100_000_000_000);
    q.mint(alice, 100_000_000_000);
    let key = market
        .open_market_account(alice, AccountIdentifier::direct(alice))
        .unwrap();
    market
        .deposit(alice, key, 100_000_000_000, 100_000_000_000)
        .unwrap();
    (market, alice, key)
}

#[test]
fn init_rejects_decimal_sum_beyond_coin_precision() {
    let (i, q) = vaults();
    // 5 + 4 = 9 exceeds the 8-decimal coins.
    let result = Orderbook::<Ins, Qte>::init_market(5, 4, 8, FeeType::free(), i, q);
    assert!(matches!(result, Err(MarketError::InvalidConfig { .. })));
}

#[test]
fn init_rejects_uninitialized_coin() {
    let result = Orderbook::<DeadCoin, Qte>::init_market(
        3,
        3,
        8,
        FeeType::free(),
        Arc::new(CoinVault::new()),
        Arc::new(CoinVault::new()),
    );
    assert!(matches!(
        result,
        Err(MarketError::CoinUninitialized { symbol: "DEAD" })
    ));
}

#[test]
fn init_rejects_coin_finer_than_canonical_scale() {
    let result = Orderbook::<TooFine, Qte>::init_market(
        3,
        3,
        8,
        FeeType::free(),
        Arc::new(CoinVault::new()),
        Arc::new(CoinVault::new()),
    );
    assert!(matches!(
        result,
        Err(MarketError::CoinDecimalsExceedMax {
            symbol: "FINE",
            decimals: 12,
            ..
        })
    ));
}

#[test]
fn init_rejects_zero_cache_and_bad_fee_tiers() {
    let (i, q) = vaults();
    let result = Orderbook::<Ins, Qte>::init_market(3, 3, 0, FeeType::free(), i.clone(), q.clone());
    assert!(matches!(result, Err(MarketError::InvalidConfig { .. })));

    let bad_fees = FeeType::Tiered(vec![]);
    let result = Orderbook::<Ins, Qte>::init_market(3, 3, 8, bad_fees, i, q);
    assert!(matches!(result, Err(MarketError::InvalidConfig { .. })));
}

#[test]
fn account_open_is_not_idempotent() {
    let market = market();
    let alice = Address::derive("alice");
    let ident = AccountIdentifier::direct(alice);
    market.open_market_account(alice, ident).unwrap();
    let err = market.open_market_account(alice, ident).unwrap_err();
    assert!(matches!(err, MarketError::AccountExists { .. }));
}

#[test]
fn account_open_requires_owner_or_protocol() {
    let market = market();
    let alice = Address::derive("alice");
    let mallory = Address::derive("mallory");
    let err = market
        .open_market_account(mallory, AccountIdentifier::direct(alice))
        .unwrap_err();
    assert!(matches!(err, MarketError::NotOwner { .. }));

    // The protocol half of the pair may open on the user's behalf.
    let protocol = Address::derive("protocol");
    market
        .open_market_account(protocol, AccountIdentifier::new(protocol, alice))
        .unwrap();
}

#[test]
fn deposit_and_withdraw_enforce_accounts_and_balances() {
    let market = market();
    let alice = Address::derive("alice");
    let ghost_key = AccountIdentifier::direct(alice).key();
    let err = market.deposit(alice, ghost_key, 1, 1).unwrap_err();
    assert!(matches!(err, MarketError::NoMarketAccount { .. }));

    let key = market
        .open_market_account(alice, AccountIdentifier::direct(alice))
        .unwrap();
    // Nothing minted: the vault balance is short.
    let err = market.deposit(alice, key, 1, 0).unwrap_err();
    assert!(matches!(err, MarketError::Coin(CoinError::InsufficientBalance { .. })));

    let err = market.withdraw(alice, key, 1, 0).unwrap_err();
    assert!(matches!(err, MarketError::Coin(CoinError::InsufficientBalance { .. })));

    let mallory = Address::derive("mallory");
    let err = market.withdraw(mallory, key, 0, 0).unwrap_err();
    assert!(matches!(err, MarketError::NotOwner { .. }));
}

#[test]
fn protocol_withdrawal_delivers_to_the_owner() {
    let (i_vault, q_vault) = vaults();
    let market =
        Orderbook::<Ins, Qte>::init_market(3, 3, 8, FeeType::free(), i_vault.clone(), q_vault)
            .unwrap();
    let protocol = Address::derive("protocol");
    let user = Address::derive("user");
    i_vault.mint(user, 500);
    let key = market
        .open_market_account(user, AccountIdentifier::new(protocol, user))
        .unwrap();
    market.deposit(user, key, 500, 0).unwrap();

    // The protocol initiates, but the coins land at the user's address.
    market.withdraw(protocol, key, 500, 0).unwrap();
    assert_eq!(i_vault.balance(user), 500);
    assert_eq!(i_vault.balance(protocol), 0);
}

#[test]
fn add_order_rejects_market_orders_that_are_not_ioc_or_fok() {
    let (mut market, alice, key) = market_with_account();
    for behavior in [Behavior::Gtc, Behavior::Post] {
        let err = market
            .add_order(alice, key, Side::Buy, behavior, Fp::ZERO, fp("1"), None, fp("10"))
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidBehavior { .. }));
    }
}

#[test]
fn add_order_validates_the_collateral_cap_shape() {
    let (mut market, alice, key) = market_with_account();

    // Market buy without a cap.
    let err = market
        .add_order(alice, key, Side::Buy, Behavior::Ioc, Fp::ZERO, fp("1"), None, Fp::ZERO)
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidMaxCollateralAmt { .. }));

    // Market sell with a cap.
    let err = market
        .add_order(alice, key, Side::Sell, Behavior::Ioc, Fp::ZERO, fp("1"), None, fp("5"))
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidMaxCollateralAmt { .. }));

    // Limit order with a cap.
    let err = market
        .add_order(alice, key, Side::Buy, Behavior::Gtc, fp("5"), fp("1"), None, fp("5"))
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidMaxCollateralAmt { .. }));
}

#[test]
fn add_order_enforces_price_and_qty_precision() {
    let (mut market, alice, key) = market_with_account();

    // Prices carry at most 3 decimals here.
    let err = market
        .add_order(alice, key, Side::Buy, Behavior::Gtc, fp("5.0001"), fp("1"), None, Fp::ZERO)
        .unwrap_err();
    assert!(matches!(err, MarketError::Fp(FpError::ExceedsDecimals { limit: 3 })));

    // Quantities too.
    let err = market
        .add_order(alice, key, Side::Buy, Behavior::Gtc, fp("5"), fp("1.0001"), None, Fp::ZERO)
        .unwrap_err();
    assert!(matches!(err, MarketError::Fp(FpError::ExceedsDecimals { limit: 3 })));

    // Exactly 3 decimals is fine.
    market
        .add_order(alice, key, Side::Buy, Behavior::Gtc, fp("5.001"), fp("1.001"), None, Fp::ZERO)
        .unwrap()
        .expect("books");
}

#[test]
fn add_order_rejects_zero_quantity() {
    let (mut market, alice, key) = market_with_account();
    let err = market
        .add_order(alice, key, Side::Buy, Behavior::Gtc, fp("5"), Fp::ZERO, None, Fp::ZERO)
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidBehavior { .. }));
}

#[test]
fn add_order_requires_account_ownership_and_collateral() {
    let (mut market, _alice, key) = market_with_account();
    let mallory = Address::derive("mallory");
    let err = market
        .add_order(mallory, key, Side::Buy, Behavior::Gtc, fp("5"), fp("1"), None, Fp::ZERO)
        .unwrap_err();
    assert!(matches!(err, MarketError::NotOwner { .. }));

    // A buy for more quote than the account holds.
    let (mut market, alice, key) = market_with_account();
    let err = market
        .add_order(alice, key, Side::Buy, Behavior::Gtc, fp("100"), fp("100"), None, Fp::ZERO)
        .unwrap_err();
    assert!(matches!(err, MarketError::Coin(CoinError::InsufficientBalance { .. })));
}

#[test]
fn add_order_raw_parses_the_wire_vocabulary() {
    let (mut market, alice, key) = market_with_account();

    let err = market
        .add_order_raw(alice, key, 3, 1, fp("5").raw(), fp("1").raw(), None, 0)
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidSide { value: 3 }));

    let err = market
        .add_order_raw(alice, key, 1, 9, fp("5").raw(), fp("1").raw(), None, 0)
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidBehavior { .. }));

    // BUY=1, GTC=1.
    let id = market
        .add_order_raw(alice, key, 1, 1, fp("5").raw(), fp("1").raw(), None, 0)
        .unwrap()
        .expect("books");
    assert_eq!(market.order_metadata(id).unwrap().side, Side::Buy);
}

#[test]
fn errors_format_for_humans() {
    let err = MarketError::InvalidSide { value: 7 };
    assert_eq!(err.to_string(), "invalid side value: 7");
    let err = MarketError::Fp(FpError::PrecisionLoss);
    assert!(err.to_string().contains("precision"));
}
