//! Core Orderbook facade binding the price stores, pools, accounts, and
//! the execution queue.

use super::account::{AccountIdentifier, Address, MarketAccount, MarketAccountKey};
use super::coin::{CoinError, CoinVault, CoinType};
use super::error::MarketError;
use super::events::{
    ExecutionListener, ExecutionQueueEvent, FinalizeListener, IndexingFinalizeEvent,
    PriceUpdateEvent, PriceUpdateListener,
};
use super::fees::FeeType;
use super::fixed_point::{self, Fp, Price, Qty, RoundingMode};
use super::node_list::NodeList;
use super::order::{OrderId, OrderMetadata, OrderPool, Side};
use super::price_level::PriceLevelReuseTable;
use super::price_store::{MarketSummary, PriceStore};
use crate::utils::{current_time_micros, current_time_secs};
use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Last published top of book, for change detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TopOfBook {
    max_bid: u128,
    bid_size: u128,
    min_ask: u128,
    ask_size: u128,
}

/// A single spot market for instrument coin `I` priced in quote coin `Q`.
///
/// The book owns every piece of matching state: both hybrid price stores,
/// the pooled order and level tables, and the execution queue. Market
/// accounts are shared with their owners through a concurrent table; the
/// matching paths themselves take `&mut self` and run to completion, so
/// each public operation is atomic from the caller's point of view.
pub struct Orderbook<I: CoinType, Q: CoinType> {
    /// Decimal places accepted on order quantities.
    instrument_decimals: u8,
    /// Decimal places accepted on order prices.
    quote_decimals: u8,
    fee_type: FeeType,

    pub(crate) buy_store: PriceStore,
    pub(crate) sell_store: PriceStore,
    pub(crate) orders: OrderPool<I, Q>,
    pub(crate) levels: PriceLevelReuseTable,
    pub(crate) exec_queue: NodeList<ExecutionQueueEvent>,

    pub(crate) accounts: DashMap<MarketAccountKey, MarketAccount<I, Q>>,
    pub(crate) instrument_vault: Arc<CoinVault<I>>,
    pub(crate) quote_vault: Arc<CoinVault<Q>>,

    /// Protocol fee accrual, in raw quote units. See `market::fees`.
    pub(crate) fees_accrued: i128,

    /// Raw price of the most recent settled fill.
    last_trade_price: AtomicCell<u128>,
    has_traded: AtomicBool,
    last_top: AtomicCell<TopOfBook>,

    /// Invoked once per settled fill.
    pub execution_listener: Option<ExecutionListener>,
    /// Invoked once per order finalization.
    pub finalize_listener: Option<FinalizeListener>,
    /// Invoked when the top of the book changes.
    pub price_update_listener: Option<PriceUpdateListener>,
}

impl<I: CoinType, Q: CoinType> Orderbook<I, Q> {
    /// Create a market.
    ///
    /// `instrument_decimals` and `quote_decimals` bound the precision of
    /// user-visible quantities and prices. Their sum may not exceed either
    /// coin's own precision: that bound is what lets settlement convert
    /// canonical `price * qty` products into raw coin units without
    /// precision loss.
    ///
    /// # Errors
    /// - [`MarketError::CoinUninitialized`] when a coin is not live.
    /// - [`MarketError::CoinDecimalsExceedMax`] when a coin is finer than
    ///   the canonical scale.
    /// - [`MarketError::InvalidConfig`] for bad decimal bounds, an empty
    ///   cache, or an unusable fee type.
    pub fn init_market(
        instrument_decimals: u8,
        quote_decimals: u8,
        max_cache_size: usize,
        fee_type: FeeType,
        instrument_vault: Arc<CoinVault<I>>,
        quote_vault: Arc<CoinVault<Q>>,
    ) -> Result<Self, MarketError> {
        if !I::is_initialized() {
            return Err(MarketError::CoinUninitialized { symbol: I::SYMBOL });
        }
        if !Q::is_initialized() {
            return Err(MarketError::CoinUninitialized { symbol: Q::SYMBOL });
        }
        for (symbol, decimals) in [(I::SYMBOL, I::DECIMALS), (Q::SYMBOL, Q::DECIMALS)] {
            if decimals > fixed_point::DECIMALS {
                return Err(MarketError::CoinDecimalsExceedMax {
                    symbol,
                    decimals,
                    max: fixed_point::DECIMALS,
                });
            }
        }
        let coin_floor = I::DECIMALS.min(Q::DECIMALS);
        if instrument_decimals + quote_decimals > coin_floor {
            return Err(MarketError::InvalidConfig {
                message: format!(
                    "instrument_decimals {instrument_decimals} + quote_decimals \
                     {quote_decimals} exceeds coin precision floor {coin_floor}"
                ),
            });
        }
        if max_cache_size == 0 {
            return Err(MarketError::InvalidConfig {
                message: "max_cache_size must be at least 1".to_string(),
            });
        }
        if !fee_type.is_valid() {
            return Err(MarketError::InvalidConfig {
                message: "fee type tiers must start at zero and strictly ascend".to_string(),
            });
        }

        debug!(
            instrument = I::SYMBOL,
            quote = Q::SYMBOL,
            instrument_decimals,
            quote_decimals,
            max_cache_size,
            "market initialized"
        );

        Ok(Orderbook {
            instrument_decimals,
            quote_decimals,
            fee_type,
            buy_store: PriceStore::new(Side::Buy, max_cache_size),
            sell_store: PriceStore::new(Side::Sell, max_cache_size),
            orders: OrderPool::new(),
            levels: PriceLevelReuseTable::new(),
            exec_queue: NodeList::new(),
            accounts: DashMap::new(),
            instrument_vault,
            quote_vault,
            fees_accrued: 0,
            last_trade_price: AtomicCell::new(0),
            has_traded: AtomicBool::new(false),
            last_top: AtomicCell::new(TopOfBook::default()),
            execution_listener: None,
            finalize_listener: None,
            price_update_listener: None,
        })
    }

    /// Decimal places accepted on order quantities.
    #[inline]
    pub fn instrument_decimals(&self) -> u8 {
        self.instrument_decimals
    }

    /// Decimal places accepted on order prices.
    #[inline]
    pub fn quote_decimals(&self) -> u8 {
        self.quote_decimals
    }

    #[inline]
    pub fn fee_type(&self) -> &FeeType {
        &self.fee_type
    }

    /// Raw quote units of protocol fees accrued so far.
    #[inline]
    pub fn fees_accrued(&self) -> i128 {
        self.fees_accrued
    }

    /// Open a market account under `identifier`'s `(protocol, user)` key.
    ///
    /// # Errors
    /// - [`MarketError::NotOwner`] unless the caller is the user or the
    ///   protocol of the identifier.
    /// - [`MarketError::AccountExists`] on re-open; opening is not
    ///   idempotent.
    pub fn open_market_account(
        &self,
        caller: Address,
        identifier: AccountIdentifier,
    ) -> Result<MarketAccountKey, MarketError> {
        let key = identifier.key();
        if caller != key.user && caller != key.protocol {
            return Err(MarketError::NotOwner { caller });
        }
        if self.accounts.contains_key(&key) {
            return Err(MarketError::AccountExists { key });
        }
        self.accounts.insert(key, MarketAccount::new(key));
        trace!(%key, "market account opened");
        Ok(key)
    }

    /// Move coins from the caller's vault balances into the account.
    ///
    /// # Errors
    /// - [`MarketError::NoMarketAccount`] / [`MarketError::NotOwner`].
    /// - [`MarketError::Coin`] when a vault balance is short. An error on
    ///   the quote leg leaves the instrument leg untouched as well.
    pub fn deposit(
        &self,
        caller: Address,
        key: MarketAccountKey,
        instrument_amount: u64,
        quote_amount: u64,
    ) -> Result<(), MarketError> {
        let mut account = self
            .accounts
            .get_mut(&key)
            .ok_or(MarketError::NoMarketAccount { key })?;
        if !account.allows(caller) {
            return Err(MarketError::NotOwner { caller });
        }
        // Validate both legs before moving either, to keep the operation
        // atomic.
        if self.instrument_vault.balance(caller) < instrument_amount {
            return Err(CoinError::InsufficientBalance {
                address: caller,
                requested: instrument_amount,
                available: self.instrument_vault.balance(caller),
                symbol: I::SYMBOL,
            }
            .into());
        }
        if self.quote_vault.balance(caller) < quote_amount {
            return Err(CoinError::InsufficientBalance {
                address: caller,
                requested: quote_amount,
                available: self.quote_vault.balance(caller),
                symbol: Q::SYMBOL,
            }
            .into());
        }
        if instrument_amount > 0 {
            let coin = self.instrument_vault.withdraw(caller, instrument_amount)?;
            account.instrument.merge(coin);
        }
        if quote_amount > 0 {
            let coin = self.quote_vault.withdraw(caller, quote_amount)?;
            account.quote.merge(coin);
        }
        trace!(%key, instrument_amount, quote_amount, "deposit");
        Ok(())
    }

    /// Move coins out of the account into the owner's vault balances.
    ///
    /// Withdrawn funds always land at the account owner's address, no
    /// matter which authorized caller initiated the withdrawal.
    ///
    /// # Errors
    /// - [`MarketError::NoMarketAccount`] / [`MarketError::NotOwner`].
    /// - [`MarketError::Coin`] when the account balance is short; neither
    ///   leg moves in that case.
    pub fn withdraw(
        &self,
        caller: Address,
        key: MarketAccountKey,
        instrument_amount: u64,
        quote_amount: u64,
    ) -> Result<(), MarketError> {
        let mut account = self
            .accounts
            .get_mut(&key)
            .ok_or(MarketError::NoMarketAccount { key })?;
        if !account.allows(caller) {
            return Err(MarketError::NotOwner { caller });
        }
        let owner = account.owner();
        if account.instrument.value() < instrument_amount {
            return Err(CoinError::InsufficientBalance {
                address: owner,
                requested: instrument_amount,
                available: account.instrument.value(),
                symbol: I::SYMBOL,
            }
            .into());
        }
        if account.quote.value() < quote_amount {
            return Err(CoinError::InsufficientBalance {
                address: owner,
                requested: quote_amount,
                available: account.quote.value(),
                symbol: Q::SYMBOL,
            }
            .into());
        }
        if instrument_amount > 0 {
            let coin = account
                .instrument
                .extract(instrument_amount)
                .expect("balance checked above");
            self.instrument_vault.deposit(owner, coin);
        }
        if quote_amount > 0 {
            let coin = account
                .quote
                .extract(quote_amount)
                .expect("balance checked above");
            self.quote_vault.deposit(owner, coin);
        }
        trace!(%key, instrument_amount, quote_amount, "withdraw");
        Ok(())
    }

    /// Pull up to `limit` tree extremes per side into the caches.
    pub fn rebalance(&mut self, limit: usize) {
        let mut moved_buy = 0usize;
        let mut moved_sell = 0usize;
        for _ in 0..limit {
            if !self.buy_store.rebalance_step() {
                break;
            }
            moved_buy += 1;
        }
        for _ in 0..limit {
            if !self.sell_store.rebalance_step() {
                break;
            }
            moved_sell += 1;
        }
        if moved_buy + moved_sell > 0 {
            debug!(moved_buy, moved_sell, "rebalanced caches from trees");
        }
        self.emit_price_update_if_changed();
    }

    /// Snapshot of both sides' cached aggregates.
    pub fn summary(&self) -> MarketSummary {
        MarketSummary {
            buy: self.buy_store.summary(),
            sell: self.sell_store.summary(),
        }
    }

    /// Best bid, if the buy side is non-empty.
    pub fn best_bid(&self) -> Option<Price> {
        let best = self.buy_store.summary().best(Side::Buy);
        (!best.is_zero()).then_some(best)
    }

    /// Best ask, if the sell side is non-empty.
    pub fn best_ask(&self) -> Option<Price> {
        let best = self.sell_store.summary().best(Side::Sell);
        (!best.is_zero()).then_some(best)
    }

    /// Price of the most recent settled fill.
    pub fn last_trade_price(&self) -> Option<Price> {
        if self.has_traded.load(Ordering::Relaxed) {
            Some(Fp::from_raw(self.last_trade_price.load()))
        } else {
            None
        }
    }

    /// Live metadata at `id`, if the id currently names a live order.
    pub fn order_metadata(&self, id: OrderId) -> Option<OrderMetadata> {
        self.orders
            .get(id)
            .filter(|order| order.is_live())
            .map(|order| order.metadata.clone())
    }

    /// Account balances in raw coin units: `(instrument, quote)`.
    pub fn account_balances(&self, key: MarketAccountKey) -> Option<(u64, u64)> {
        self.accounts
            .get(&key)
            .map(|account| (account.instrument_balance(), account.quote_balance()))
    }

    /// Ids of the account's live orders.
    pub fn account_active_orders(&self, key: MarketAccountKey) -> Option<Vec<OrderId>> {
        self.accounts
            .get(&key)
            .map(|account| account.active_orders().to_vec())
    }

    /// Number of fills queued and not yet settled.
    pub fn pending_crank_events(&self) -> usize {
        self.exec_queue.len()
    }

    /// Copies of the queued events, oldest first.
    pub fn queued_events(&self) -> Vec<ExecutionQueueEvent> {
        self.exec_queue.iter().copied().collect()
    }

    /// `(live, free, allocated)` of the order pool.
    pub fn order_pool_stats(&self) -> (usize, usize, usize) {
        (self.orders.live(), self.orders.free(), self.orders.allocated())
    }

    /// `(live, free, allocated)` of the level pool.
    pub fn level_pool_stats(&self) -> (usize, usize, usize) {
        (self.levels.live(), self.levels.free(), self.levels.allocated())
    }

    // ---- internal plumbing shared by the matching, cancel, and crank
    // paths ----

    pub(crate) fn store(&self, side: Side) -> &PriceStore {
        match side {
            Side::Buy => &self.buy_store,
            Side::Sell => &self.sell_store,
        }
    }

    pub(crate) fn store_mut(&mut self, side: Side) -> &mut PriceStore {
        match side {
            Side::Buy => &mut self.buy_store,
            Side::Sell => &mut self.sell_store,
        }
    }

    /// Convert a canonical quote amount into raw quote units. Exact by the
    /// init-time decimal bound.
    pub(crate) fn quote_units(&self, amount: Fp) -> Result<u64, MarketError> {
        Ok(amount.to_units(Q::DECIMALS, RoundingMode::NoLoss)?)
    }

    /// Convert a canonical instrument amount into raw instrument units.
    pub(crate) fn instrument_units(&self, amount: Fp) -> Result<u64, MarketError> {
        Ok(amount.to_units(I::DECIMALS, RoundingMode::NoLoss)?)
    }

    pub(crate) fn note_trade(&self, price: Price) {
        self.last_trade_price.store(price.raw());
        self.has_traded.store(true, Ordering::Relaxed);
    }

    pub(crate) fn emit_finalize(&self, metadata: &OrderMetadata) {
        if let Some(listener) = &self.finalize_listener {
            listener(&IndexingFinalizeEvent {
                account_key: metadata.account_key,
                original_qty: metadata.original_qty,
                price: metadata.price,
                timestamp_secs: current_time_secs(),
            });
        }
    }

    /// Release an order slot: drain any residual collateral back to its
    /// account, emit the finalize event, untrack, and free the record.
    pub(crate) fn finalize_order(&mut self, id: OrderId) {
        let metadata = self
            .orders
            .get(id)
            .expect("finalized order exists")
            .metadata
            .clone();
        debug_assert!(metadata.is_finalized(), "finalizing a non-finalized order");
        self.emit_finalize(&metadata);
        let (residual_i, residual_q) = self.orders.release(id);
        if let Some(mut account) = self.accounts.get_mut(&metadata.account_key) {
            if !residual_i.is_zero() {
                account.instrument.merge(residual_i);
            }
            if !residual_q.is_zero() {
                account.quote.merge(residual_q);
            }
            account.untrack_order(id);
        } else {
            debug_assert!(false, "live order without a market account");
        }
        trace!(order = %id, "order finalized");
    }

    /// Publish a price update when the top of either side moved.
    pub(crate) fn emit_price_update_if_changed(&self) {
        let (max_bid, bid_size) = self
            .buy_store
            .top_of_book()
            .map(|(p, q)| (p.raw(), q.raw()))
            .unwrap_or((0, 0));
        let (min_ask, ask_size) = self
            .sell_store
            .top_of_book()
            .map(|(p, q)| (p.raw(), q.raw()))
            .unwrap_or((0, 0));
        let top = TopOfBook {
            max_bid,
            bid_size,
            min_ask,
            ask_size,
        };
        if self.last_top.load() == top {
            return;
        }
        self.last_top.store(top);
        if let Some(listener) = &self.price_update_listener {
            listener(&PriceUpdateEvent {
                instrument_type: I::SYMBOL,
                quote_type: Q::SYMBOL,
                max_bid: Fp::from_raw(top.max_bid),
                bid_size: Qty::from_raw(top.bid_size),
                min_ask: Fp::from_raw(top.min_ask),
                ask_size: Qty::from_raw(top.ask_size),
                timestamp_micro_seconds: current_time_micros(),
            });
        }
    }
}
