//! Order submission and the taker matching walk.
//!
//! `add_order` validates, applies the behavior gate, acquires collateral,
//! then matches against the opposite cache and (when the summary says it
//! could help) the opposite tree. Matching never settles: it moves resting
//! quantity into the pending-crank columns and appends execution events
//! for the crank to drain, so a taker can sweep many makers without
//! touching a single maker record.

use super::account::{Address, MarketAccountKey};
use super::coin::{Coin, CoinError, CoinType};
use super::error::MarketError;
use super::events::ExecutionQueueEvent;
use super::fixed_point::{Fp, FpError, Price, Qty, RoundingMode};
use super::order::{Behavior, OrderId, OrderMetadata, Side};
use super::price_store::PriceStoreElem;
use crate::Orderbook;
use crate::utils::current_time_secs;
use either::Either;
use tracing::trace;

/// Outcome of clamping a fill to a market buy's remaining collateral.
struct ClampedFill {
    fill: Qty,
    collateral_after: Fp,
}

/// Re-derive the fill a market buy can afford at `book_price`, deducting
/// the spend from its collateral cap. Returns `None` when the collateral
/// cannot buy a single instrument tick, which ends the walk.
fn clamp_market_buy(
    fill: Qty,
    book_price: Price,
    collateral: Fp,
    instrument_decimals: u8,
) -> Result<Option<ClampedFill>, FpError> {
    let mut fill = fill;
    let mut used = fill.mul(book_price, RoundingMode::NoLoss)?;
    if used > collateral {
        fill = collateral
            .div(book_price, RoundingMode::Trunc)?
            .floor_to_decimals(instrument_decimals);
        if fill.is_zero() {
            return Ok(None);
        }
        used = fill.mul(book_price, RoundingMode::NoLoss)?;
    }
    let mut collateral_after = collateral.sub(used);
    // Dust that cannot pay for one instrument tick at this price will
    // never execute; zeroing it lets the order finalize.
    let tick_cost = Fp::tick(instrument_decimals).mul(book_price, RoundingMode::NoLoss)?;
    if collateral_after < tick_cost {
        collateral_after = Fp::ZERO;
    }
    Ok(Some(ClampedFill {
        fill,
        collateral_after,
    }))
}

/// True when a resting price at `book_price` is matchable by a taker with
/// `limit` on `taker_side`. A zero limit is a market order and matches any
/// price.
#[inline]
fn limit_crosses(taker_side: Side, limit: Price, book_price: Price) -> bool {
    if limit.is_zero() {
        return true;
    }
    match taker_side {
        Side::Buy => book_price <= limit,
        Side::Sell => book_price >= limit,
    }
}

impl<I: CoinType, Q: CoinType> Orderbook<I, Q> {
    /// Submit an order.
    ///
    /// Returns `Ok(Some(id))` while the order stays live (resting,
    /// or fully taken and awaiting the crank), and `Ok(None)` when the
    /// submission finalized on the spot: rejected by its behavior gate, or
    /// consumed/cancelled in full within this call. Both are successes; a
    /// gate rejection emits the finalize event and leaves balances
    /// untouched.
    ///
    /// # Errors
    /// Argument validation, ownership, and collateral failures abort with
    /// no book mutation.
    #[allow(clippy::too_many_arguments)]
    pub fn add_order(
        &mut self,
        caller: Address,
        account_key: MarketAccountKey,
        side: Side,
        behavior: Behavior,
        price: Price,
        qty: Qty,
        client_order_id: Option<u64>,
        market_buy_max_collateral: Fp,
    ) -> Result<Option<OrderId>, MarketError> {
        self.validate_order_args(behavior, price, qty, side, market_buy_max_collateral)?;
        {
            let account = self
                .accounts
                .get(&account_key)
                .ok_or(MarketError::NoMarketAccount { key: account_key })?;
            if !account.allows(caller) {
                return Err(MarketError::NotOwner { caller });
            }
        }

        let crosses = self.crosses_spread(side, price);
        trace!(%side, %behavior, %price, %qty, crosses, "add_order");

        // Behavior gate: a rejected submission is a success that finalizes
        // immediately, before any balance moves.
        let gate_reject = match behavior {
            Behavior::Ioc => !crosses,
            Behavior::Post => crosses,
            Behavior::Fok => !self.fok_fully_coverable(side, price, qty),
            Behavior::Gtc => false,
        };
        if gate_reject {
            let ghost = OrderMetadata {
                side,
                behavior,
                price,
                original_qty: qty,
                unfilled_qty: qty,
                taker_crank_pending_qty: Qty::ZERO,
                client_order_id,
                owner: account_key.user,
                account_key,
                market_buy_remaining_collateral: Fp::ZERO,
            };
            self.emit_finalize(&ghost);
            trace!(%side, %behavior, "submission finalized at the behavior gate");
            return Ok(None);
        }

        let (collateral_i, collateral_q) =
            self.acquire_collateral(account_key, side, price, qty, market_buy_max_collateral)?;

        let metadata = OrderMetadata {
            side,
            behavior,
            price,
            original_qty: qty,
            unfilled_qty: qty,
            taker_crank_pending_qty: Qty::ZERO,
            client_order_id,
            owner: account_key.user,
            account_key,
            market_buy_remaining_collateral: if price.is_zero() && side == Side::Buy {
                market_buy_max_collateral
            } else {
                Fp::ZERO
            },
        };
        let order_id = self.orders.acquire(metadata, collateral_i, collateral_q);
        if let Some(mut account) = self.accounts.get_mut(&account_key) {
            account.track_order(order_id);
        }

        if crosses {
            self.match_against_cache(order_id)?;
            let metadata = &self
                .orders
                .get(order_id)
                .expect("taker order exists")
                .metadata;
            if !metadata.remaining_to_execute().is_zero() {
                let opposite = self.store(side.opposite()).summary();
                let tree_best = match side {
                    Side::Buy => opposite.tree_min,
                    Side::Sell => opposite.tree_max,
                };
                if !tree_best.is_zero() && limit_crosses(side, price, tree_best) {
                    self.match_against_tree(order_id)?;
                }
            }
        }

        let result = self.settle_residual(order_id);
        self.emit_price_update_if_changed();
        result
    }

    /// Wire-level submission: parses the `u8` side and behavior values of
    /// the caller vocabulary and raw fixed-point amounts.
    ///
    /// # Errors
    /// [`MarketError::InvalidSide`] / [`MarketError::InvalidBehavior`] on
    /// unknown wire values, then everything [`Self::add_order`] raises.
    #[allow(clippy::too_many_arguments)]
    pub fn add_order_raw(
        &mut self,
        caller: Address,
        account_key: MarketAccountKey,
        side: u8,
        behavior: u8,
        price_raw: u128,
        qty_raw: u128,
        client_order_id: Option<u64>,
        market_buy_max_collateral_raw: u128,
    ) -> Result<Option<OrderId>, MarketError> {
        let side = Side::try_from(side).map_err(|value| MarketError::InvalidSide { value })?;
        let behavior = Behavior::try_from(behavior).map_err(|value| {
            MarketError::InvalidBehavior {
                message: format!("unknown behavior value {value}"),
            }
        })?;
        self.add_order(
            caller,
            account_key,
            side,
            behavior,
            Fp::from_raw(price_raw),
            Fp::from_raw(qty_raw),
            client_order_id,
            Fp::from_raw(market_buy_max_collateral_raw),
        )
    }

    /// Spread test, answered from the summaries alone.
    pub(crate) fn crosses_spread(&self, side: Side, price: Price) -> bool {
        if price.is_zero() {
            return true;
        }
        match side {
            Side::Buy => {
                let min_ask = self.sell_store.summary().best(Side::Sell);
                !min_ask.is_zero() && price >= min_ask
            }
            Side::Sell => {
                let max_bid = self.buy_store.summary().best(Side::Buy);
                !max_bid.is_zero() && price <= max_bid
            }
        }
    }

    fn validate_order_args(
        &self,
        behavior: Behavior,
        price: Price,
        qty: Qty,
        side: Side,
        market_buy_max_collateral: Fp,
    ) -> Result<(), MarketError> {
        if qty.is_zero() {
            return Err(MarketError::InvalidBehavior {
                message: "order quantity must be positive".to_string(),
            });
        }
        if !price.fits_decimals(self.quote_decimals()) {
            return Err(MarketError::Fp(FpError::ExceedsDecimals {
                limit: self.quote_decimals(),
            }));
        }
        if !qty.fits_decimals(self.instrument_decimals()) {
            return Err(MarketError::Fp(FpError::ExceedsDecimals {
                limit: self.instrument_decimals(),
            }));
        }
        if price.is_zero() {
            if !matches!(behavior, Behavior::Ioc | Behavior::Fok) {
                return Err(MarketError::InvalidBehavior {
                    message: format!("market orders must be IOC or FOK, got {behavior}"),
                });
            }
            match side {
                Side::Buy if market_buy_max_collateral.is_zero() => {
                    return Err(MarketError::InvalidMaxCollateralAmt {
                        message: "market buys require a positive collateral cap".to_string(),
                    });
                }
                Side::Sell if !market_buy_max_collateral.is_zero() => {
                    return Err(MarketError::InvalidMaxCollateralAmt {
                        message: "market sells take no collateral cap".to_string(),
                    });
                }
                _ => {}
            }
        } else if !market_buy_max_collateral.is_zero() {
            return Err(MarketError::InvalidMaxCollateralAmt {
                message: "limit orders take no collateral cap".to_string(),
            });
        }
        Ok(())
    }

    /// Simulate the fill-or-kill walk: opposite cache then tree, counting
    /// only immediately-matchable quantity, without touching the book.
    fn fok_fully_coverable(&self, side: Side, price: Price, qty: Qty) -> bool {
        let mut covered = Qty::ZERO;
        for (book_price, elem) in self.store(side.opposite()).iter_best_first() {
            if !limit_crosses(side, price, book_price) {
                break;
            }
            covered = covered.add(elem.qty);
            if covered >= qty {
                return true;
            }
        }
        false
    }

    /// Pull the order's collateral out of its market account: quote for
    /// buys (the collateral cap for market buys), instrument for sells.
    fn acquire_collateral(
        &self,
        account_key: MarketAccountKey,
        side: Side,
        price: Price,
        qty: Qty,
        market_buy_max_collateral: Fp,
    ) -> Result<(Coin<I>, Coin<Q>), MarketError> {
        let mut account = self
            .accounts
            .get_mut(&account_key)
            .ok_or(MarketError::NoMarketAccount { key: account_key })?;
        let owner = account.owner();
        match side {
            Side::Buy => {
                let required = if price.is_zero() {
                    market_buy_max_collateral
                } else {
                    price.mul(qty, RoundingMode::NoLoss)?
                };
                let raw = self.quote_units(required)?;
                if account.quote.value() < raw {
                    return Err(CoinError::InsufficientBalance {
                        address: owner,
                        requested: raw,
                        available: account.quote.value(),
                        symbol: Q::SYMBOL,
                    }
                    .into());
                }
                let coin = account.quote.extract(raw).expect("balance checked above");
                Ok((Coin::zero(), coin))
            }
            Side::Sell => {
                let raw = self.instrument_units(qty)?;
                if account.instrument.value() < raw {
                    return Err(CoinError::InsufficientBalance {
                        address: owner,
                        requested: raw,
                        available: account.instrument.value(),
                        symbol: I::SYMBOL,
                    }
                    .into());
                }
                let coin = account
                    .instrument
                    .extract(raw)
                    .expect("balance checked above");
                Ok((coin, Coin::zero()))
            }
        }
    }

    /// Walk the opposite cache best-first, filling the taker.
    fn match_against_cache(&mut self, taker_id: OrderId) -> Result<(), MarketError> {
        let metadata = self
            .orders
            .get(taker_id)
            .expect("taker order exists")
            .metadata
            .clone();
        let taker_side = metadata.side;
        let opposite = taker_side.opposite();
        let limit = metadata.price;
        let is_market_buy = metadata.is_market_buy();
        let instrument_decimals = self.instrument_decimals();
        let now = current_time_secs();

        let mut remaining = metadata.remaining_to_execute();
        let mut collateral = metadata.market_buy_remaining_collateral;
        let mut pending_added = Qty::ZERO;

        let prices = self.store(opposite).cache_prices_best_first();
        for book_price in prices {
            if remaining.is_zero() {
                break;
            }
            if !limit_crosses(taker_side, limit, book_price) {
                break;
            }
            let (available, level_id) = {
                let elem = self
                    .store(opposite)
                    .elem(book_price)
                    .ok_or(MarketError::CacheItemNotFound { price: book_price })?;
                (elem.qty, elem.price_level_id)
            };
            if available.is_zero() {
                // Ghost entry: everything here is already pending crank.
                continue;
            }

            let mut fill = available.min(remaining);
            if is_market_buy {
                match clamp_market_buy(fill, book_price, collateral, instrument_decimals)? {
                    Some(clamped) => {
                        fill = clamped.fill;
                        collateral = clamped.collateral_after;
                    }
                    None => break,
                }
            }

            {
                let store = self.store_mut(opposite);
                let elem = store
                    .elem_mut(book_price)
                    .ok_or(MarketError::CacheItemNotFound { price: book_price })?;
                elem.qty = elem.qty.sub(fill);
                elem.maker_crank_pending_qty = elem.maker_crank_pending_qty.add(fill);
            }
            remaining = remaining.sub(fill);
            pending_added = pending_added.add(fill);
            self.exec_queue.push_back(ExecutionQueueEvent {
                qty: fill,
                taker_order_id: taker_id,
                price_level_id: level_id,
                timestamp_secs: now,
            });
            trace!(taker = %taker_id, price = %book_price, qty = %fill, "matched in cache");
        }

        let metadata = &mut self
            .orders
            .get_mut(taker_id)
            .expect("taker order exists")
            .metadata;
        metadata.taker_crank_pending_qty = metadata.taker_crank_pending_qty.add(pending_added);
        metadata.market_buy_remaining_collateral = collateral;
        self.store_mut(opposite).sync_summary();
        Ok(())
    }

    /// Walk the opposite tree best-first. The walk itself only reads the
    /// tree; quantity decrements are collected and applied afterwards, so
    /// no tree surgery happens under a live iterator.
    fn match_against_tree(&mut self, taker_id: OrderId) -> Result<(), MarketError> {
        let metadata = self
            .orders
            .get(taker_id)
            .expect("taker order exists")
            .metadata
            .clone();
        let taker_side = metadata.side;
        let opposite = taker_side.opposite();
        let limit = metadata.price;
        let is_market_buy = metadata.is_market_buy();
        let instrument_decimals = self.instrument_decimals();
        let now = current_time_secs();

        let mut remaining = metadata.remaining_to_execute();
        let mut collateral = metadata.market_buy_remaining_collateral;
        let mut pending_added = Qty::ZERO;

        // Candidate collection pass: enough best-first depth to cover the
        // taker, bounded by the limit price.
        let mut candidates: Vec<(Price, Qty, _)> = Vec::new();
        {
            let store = self.store(opposite);
            let iter = match taker_side {
                Side::Buy => Either::Left(store.tree().iter()),
                Side::Sell => Either::Right(store.tree().iter_rev()),
            };
            let mut depth = Qty::ZERO;
            for (book_price, elem) in iter {
                if !limit_crosses(taker_side, limit, book_price) {
                    break;
                }
                if elem.qty.is_zero() {
                    continue;
                }
                candidates.push((book_price, elem.qty, elem.price_level_id));
                depth = depth.add(elem.qty);
                if depth >= remaining {
                    break;
                }
            }
        }

        let mut fills: Vec<(Price, Qty)> = Vec::with_capacity(candidates.len());
        for (book_price, available, level_id) in candidates {
            if remaining.is_zero() {
                break;
            }
            let mut fill = available.min(remaining);
            if is_market_buy {
                match clamp_market_buy(fill, book_price, collateral, instrument_decimals)? {
                    Some(clamped) => {
                        fill = clamped.fill;
                        collateral = clamped.collateral_after;
                    }
                    None => break,
                }
            }
            remaining = remaining.sub(fill);
            pending_added = pending_added.add(fill);
            fills.push((book_price, fill));
            self.exec_queue.push_back(ExecutionQueueEvent {
                qty: fill,
                taker_order_id: taker_id,
                price_level_id: level_id,
                timestamp_secs: now,
            });
            trace!(taker = %taker_id, price = %book_price, qty = %fill, "matched in tree");
        }

        // Deferred decrement pass.
        for (book_price, fill) in fills {
            if !self.store_mut(opposite).apply_fill(book_price, fill) {
                return Err(MarketError::TreeElemDoesNotExist { price: book_price });
            }
        }

        let metadata = &mut self
            .orders
            .get_mut(taker_id)
            .expect("taker order exists")
            .metadata;
        metadata.taker_crank_pending_qty = metadata.taker_crank_pending_qty.add(pending_added);
        metadata.market_buy_remaining_collateral = collateral;
        Ok(())
    }

    /// Post-matching residual handling: keep, cancel, or book what's left
    /// of the taker.
    fn settle_residual(&mut self, order_id: OrderId) -> Result<Option<OrderId>, MarketError> {
        let metadata = self
            .orders
            .get(order_id)
            .expect("submitted order exists")
            .metadata
            .clone();

        if metadata.remaining_to_execute().is_zero() {
            if metadata.is_finalized() {
                self.finalize_order(order_id);
                return Ok(None);
            }
            // Fully taken; lives unbooked until the crank settles it.
            return Ok(Some(order_id));
        }

        if matches!(metadata.behavior, Behavior::Ioc | Behavior::Fok) || metadata.is_market() {
            // Cancel the residual: clamp the unfilled quantity down to what
            // is already matched and pending settlement.
            let metadata = &mut self
                .orders
                .get_mut(order_id)
                .expect("submitted order exists")
                .metadata;
            metadata.unfilled_qty = metadata.taker_crank_pending_qty;
            let finalized = metadata.is_finalized();
            if finalized {
                self.finalize_order(order_id);
                return Ok(None);
            }
            return Ok(Some(order_id));
        }

        // Book the residual at the order's limit price.
        let residual = metadata.remaining_to_execute();
        let side = metadata.side;
        let price = metadata.price;
        let existing_level = self.store(side).elem(price).map(|elem| elem.price_level_id);
        let level_id = match existing_level {
            Some(level_id) => {
                let store = self.store_mut(side);
                let elem = store.elem_mut(price).expect("price present");
                elem.qty = elem.qty.add(residual);
                store.sync_summary();
                level_id
            }
            None => {
                let level_id = self.levels.acquire();
                self.store_mut(side).place_new(
                    price,
                    PriceStoreElem {
                        qty: residual,
                        maker_crank_pending_qty: Qty::ZERO,
                        price_level_id: level_id,
                    },
                );
                level_id
            }
        };
        self.levels
            .get_mut(level_id)
            .expect("level exists")
            .append(order_id, residual);
        self.orders
            .get_mut(order_id)
            .expect("submitted order exists")
            .price_level = Some(level_id);
        trace!(order = %order_id, %price, %residual, level = %level_id, "residual booked");
        Ok(Some(order_id))
    }
}
