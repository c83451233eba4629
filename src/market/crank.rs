//! Batch settlement of queued execution events.
//!
//! The crank is the second phase of the two-phase pipeline: matching only
//! queued fills and moved quantities into pending columns; the crank walks
//! each event's maker level head-first, moves the actual coins, emits the
//! indexing events, and retires whatever finished. Events settle strictly
//! FIFO, which is the assumption the cancel path's pending attribution
//! relies on.

use super::coin::{Coin, CoinType};
use super::error::MarketError;
use super::events::{ExecutionQueueEvent, IndexingExecutionEvent};
use super::fixed_point::RoundingMode;
use super::order::Side;
use crate::Orderbook;
use crate::utils::current_time_secs;
use tracing::trace;
use uuid::Uuid;

impl<I: CoinType, Q: CoinType> Orderbook<I, Q> {
    /// Settle up to `limit` queued execution events, oldest first.
    ///
    /// # Errors
    /// Only integrity violations: [`MarketError::CrankUnfulfilledQty`] and
    /// the price-store lookups, none of which are reachable on an
    /// uncorrupted book.
    pub fn crank(&mut self, limit: usize) -> Result<usize, MarketError> {
        let mut settled = 0usize;
        for _ in 0..limit {
            let Some(event) = self.exec_queue.pop_front() else {
                break;
            };
            self.settle_event(event)?;
            settled += 1;
        }
        if settled > 0 {
            trace!(settled, "crank drained events");
        }
        self.buy_store.sync_summary();
        self.sell_store.sync_summary();
        self.emit_price_update_if_changed();
        Ok(settled)
    }

    fn settle_event(&mut self, event: ExecutionQueueEvent) -> Result<(), MarketError> {
        let taker_id = event.taker_order_id;
        let taker = self
            .orders
            .get(taker_id)
            .expect("taker of a queued event is live");
        let taker_side = taker.metadata.side;
        let taker_limit = taker.metadata.price;
        let taker_key = taker.metadata.account_key;
        let taker_owner = taker.metadata.owner;
        let maker_side = taker_side.opposite();
        let level_id = event.price_level_id;
        let now = current_time_secs();

        let mut remaining = event.qty;
        let mut drop_count = 0usize;
        let mut proceeds_i: Coin<I> = Coin::zero();
        let mut proceeds_q: Coin<Q> = Coin::zero();

        let mut pos_opt = self
            .levels
            .get(level_id)
            .expect("level of a queued event is live")
            .orders
            .head_pos();
        while !remaining.is_zero() {
            let Some(pos) = pos_opt else {
                return Err(MarketError::CrankUnfulfilledQty {
                    taker_order_id: taker_id,
                    missing: remaining,
                });
            };
            let entry = *self
                .levels
                .get(level_id)
                .expect("level exists")
                .orders
                .get(pos)
                .expect("walk position valid");
            if entry.qty.is_zero() {
                drop_count += 1;
                pos_opt = self
                    .levels
                    .get(level_id)
                    .expect("level exists")
                    .orders
                    .next_pos(pos);
                continue;
            }

            let exec = entry.qty.min(remaining);
            let entry_left = entry.qty.sub(exec);
            self.levels
                .get_mut(level_id)
                .expect("level exists")
                .orders
                .get_mut(pos)
                .expect("walk position valid")
                .qty = entry_left;
            if entry_left.is_zero() {
                drop_count += 1;
            }
            remaining = remaining.sub(exec);

            let maker_id = entry.order_id;
            let maker_metadata = self
                .orders
                .get(maker_id)
                .expect("maker of a resting entry is live")
                .metadata
                .clone();
            let maker_price = maker_metadata.price;
            let maker_key = maker_metadata.account_key;

            {
                let maker = self.orders.get_mut(maker_id).expect("maker exists");
                maker.metadata.unfilled_qty = maker.metadata.unfilled_qty.sub(exec);
            }

            // Coin movement at the maker's limit price.
            let quote_raw = self.quote_units(maker_price.mul(exec, RoundingMode::NoLoss)?)?;
            let instrument_raw = self.instrument_units(exec)?;
            match taker_side {
                Side::Buy => {
                    // Maker sells: instrument flows to the taker, quote to
                    // the maker, both out of order collateral.
                    let coin_i = self
                        .orders
                        .get_mut(maker_id)
                        .expect("maker exists")
                        .collateral_i
                        .extract(instrument_raw)?;
                    proceeds_i.merge(coin_i);
                    let coin_q = self
                        .orders
                        .get_mut(taker_id)
                        .expect("taker exists")
                        .collateral_q
                        .extract(quote_raw)?;
                    self.accounts
                        .get_mut(&maker_key)
                        .ok_or(MarketError::NoMarketAccount { key: maker_key })?
                        .quote
                        .merge(coin_q);
                    // A limit buy reserved quote at its own price; release
                    // the improvement over the maker's price right away.
                    if !taker_limit.is_zero() && maker_price < taker_limit {
                        let excess = taker_limit
                            .sub(maker_price)
                            .mul(exec, RoundingMode::NoLoss)?;
                        let excess_raw = self.quote_units(excess)?;
                        if excess_raw > 0 {
                            let coin = self
                                .orders
                                .get_mut(taker_id)
                                .expect("taker exists")
                                .collateral_q
                                .extract(excess_raw)?;
                            self.accounts
                                .get_mut(&taker_key)
                                .ok_or(MarketError::NoMarketAccount { key: taker_key })?
                                .quote
                                .merge(coin);
                        }
                    }
                }
                Side::Sell => {
                    // Maker buys: instrument flows to the maker, quote to
                    // the taker.
                    let coin_i = self
                        .orders
                        .get_mut(taker_id)
                        .expect("taker exists")
                        .collateral_i
                        .extract(instrument_raw)?;
                    self.accounts
                        .get_mut(&maker_key)
                        .ok_or(MarketError::NoMarketAccount { key: maker_key })?
                        .instrument
                        .merge(coin_i);
                    let coin_q = self
                        .orders
                        .get_mut(maker_id)
                        .expect("maker exists")
                        .collateral_q
                        .extract(quote_raw)?;
                    proceeds_q.merge(coin_q);
                }
            }

            // Retire the settled quantity from the maker's price store
            // element; the element leaves once nothing rests or pends.
            {
                let store = self.store_mut(maker_side);
                let elem = store.elem_mut(maker_price).ok_or(
                    MarketError::PriceStoreElemNotFound { price: maker_price },
                )?;
                elem.maker_crank_pending_qty = elem.maker_crank_pending_qty.sub(exec);
                if elem.is_exhausted() {
                    store.remove(maker_price);
                } else {
                    store.sync_summary();
                }
            }

            // Fee schedules are resolved per fill from the taker's fee
            // token balance; amounts accrue without moving coins yet.
            let fee_token_balance = self.quote_vault.balance(taker_owner);
            let protocol_fee = self
                .fee_type()
                .protocol_fee(fee_token_balance, quote_raw as u128);
            self.fees_accrued += protocol_fee;

            self.note_trade(maker_price);
            if let Some(listener) = &self.execution_listener {
                listener(&IndexingExecutionEvent {
                    fill_id: Uuid::new_v4(),
                    maker_account_key: maker_key,
                    taker_account_key: taker_key,
                    price: maker_price,
                    qty: exec,
                    timestamp_secs: now,
                });
            }
            trace!(maker = %maker_id, taker = %taker_id, price = %maker_price, qty = %exec, "fill settled");

            let maker_finalized = self
                .orders
                .get(maker_id)
                .expect("maker exists")
                .metadata
                .is_finalized();
            if maker_finalized {
                self.finalize_order(maker_id);
            }

            pos_opt = self
                .levels
                .get(level_id)
                .expect("level exists")
                .orders
                .next_pos(pos);
        }

        // Drop the entries this event exhausted; they form a prefix of the
        // level because consumption is head-first.
        {
            let level = self.levels.get_mut(level_id).expect("level exists");
            level.orders.drop_front(drop_count);
            if level.orders.is_empty() {
                self.levels.release(level_id);
            }
        }

        // Taker bookkeeping: both unfilled and pending shrink by the
        // event's quantity, and the proceeds land in the taker's account.
        {
            let taker = self.orders.get_mut(taker_id).expect("taker exists");
            taker.metadata.unfilled_qty = taker.metadata.unfilled_qty.sub(event.qty);
            taker.metadata.taker_crank_pending_qty =
                taker.metadata.taker_crank_pending_qty.sub(event.qty);
        }
        if !proceeds_i.is_zero() || !proceeds_q.is_zero() {
            let mut account = self
                .accounts
                .get_mut(&taker_key)
                .ok_or(MarketError::NoMarketAccount { key: taker_key })?;
            account.instrument.merge(proceeds_i);
            account.quote.merge(proceeds_q);
        }

        let taker_finalized = self
            .orders
            .get(taker_id)
            .expect("taker exists")
            .metadata
            .is_finalized();
        if taker_finalized {
            // Any leftover collateral (price improvement on markets, dust
            // below a tick) rides back with the release.
            self.finalize_order(taker_id);
        }
        Ok(())
    }
}
