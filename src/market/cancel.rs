//! Order cancellation.
//!
//! The subtlety is deferred settlement: a resting order's level entry may
//! already be spoken for by queued execution events that have not cranked
//! yet. The level's pending quantity is attributed to entries head-first
//! (the crank consumes the level in FIFO order), so the cancellable
//! portion of an entry is whatever the attribution leaves uncovered.

use super::account::Address;
use super::coin::CoinType;
use super::error::MarketError;
use super::fixed_point::{Qty, RoundingMode};
use super::order::{OrderId, Side};
use crate::Orderbook;
use tracing::trace;

impl<I: CoinType, Q: CoinType> Orderbook<I, Q> {
    /// Cancel the unmatched remainder of a live order.
    ///
    /// # Errors
    /// - [`MarketError::UnknownOrder`] when `order_id` does not name a
    ///   live order (freed slots included).
    /// - [`MarketError::NotOwner`] unless the caller is the order's owner
    ///   or its protocol.
    /// - [`MarketError::PendingCrank`] when everything still unfilled is
    ///   already matched and awaiting settlement.
    pub fn cancel_order(&mut self, caller: Address, order_id: OrderId) -> Result<(), MarketError> {
        let metadata = match self.orders.get(order_id) {
            Some(order) if order.is_live() => order.metadata.clone(),
            _ => return Err(MarketError::UnknownOrder { order_id }),
        };
        if caller != metadata.owner && caller != metadata.account_key.protocol {
            return Err(MarketError::NotOwner { caller });
        }
        if metadata.unfilled_qty <= metadata.taker_crank_pending_qty {
            return Err(MarketError::PendingCrank { order_id });
        }
        // An order with cancellable quantity is always booked; a missing
        // level reference means the book is corrupted.
        let level_id = self
            .orders
            .get(order_id)
            .expect("liveness checked above")
            .price_level()
            .ok_or(MarketError::PriceStoreElemNotFound {
                price: metadata.price,
            })?;

        let side = metadata.side;
        let price = metadata.price;
        let pending_at_level = self
            .store(side)
            .elem(price)
            .ok_or(MarketError::PriceStoreElemNotFound { price })?
            .maker_crank_pending_qty;

        // Attribute the level's pending quantity to entries in FIFO order
        // until we reach this order's entry.
        let (entry_pos, entry_qty, pending_here) = {
            let level = self
                .levels
                .get(level_id)
                .ok_or(MarketError::PriceStoreElemNotFound { price })?;
            let mut unattributed = pending_at_level;
            let mut found = None;
            for (pos, entry) in level.orders.iter_with_pos() {
                if entry.order_id == order_id {
                    found = Some((pos, entry.qty, unattributed));
                    break;
                }
                unattributed = unattributed.sub(unattributed.min(entry.qty));
            }
            found.ok_or(MarketError::PriceStoreElemNotFound { price })?
        };

        if pending_here >= entry_qty {
            // The whole entry is matched and merely unsettled.
            return Err(MarketError::PendingCrank { order_id });
        }
        let cancelled = entry_qty.sub(pending_here);

        // Price store: drop the cancelled quantity, and the element itself
        // once nothing matchable or pending remains at this price.
        {
            let store = self.store_mut(side);
            let elem = store
                .elem_mut(price)
                .ok_or(MarketError::PriceStoreElemNotFound { price })?;
            elem.qty = elem.qty.sub(cancelled);
            let exhausted = elem.is_exhausted();
            if exhausted {
                store.remove(price);
            } else {
                store.sync_summary();
            }
        }

        // Level: shrink the entry to its pending portion, or drop it
        // outright; a drained level goes back to the reuse pool.
        {
            let level = self.levels.get_mut(level_id).expect("level exists");
            if pending_here.is_zero() {
                level.orders.remove(entry_pos);
            } else {
                level
                    .orders
                    .get_mut(entry_pos)
                    .expect("entry position valid")
                    .qty = pending_here;
            }
            if level.orders.is_empty() {
                self.levels.release(level_id);
            }
        }
        if pending_here.is_zero() {
            self.orders
                .get_mut(order_id)
                .expect("order exists")
                .price_level = None;
        }

        // Give the cancelled portion's collateral back to the account.
        let refund = match side {
            Side::Buy => {
                let amount = price.mul(cancelled, RoundingMode::NoLoss)?;
                self.quote_units(amount)?
            }
            Side::Sell => self.instrument_units(cancelled)?,
        };
        {
            let order = self.orders.get_mut(order_id).expect("order exists");
            order.metadata.unfilled_qty = order.metadata.unfilled_qty.sub(cancelled);
            let account_key = order.metadata.account_key;
            let coin_i;
            let coin_q;
            match side {
                Side::Buy => {
                    coin_i = None;
                    coin_q = Some(order.collateral_q.extract(refund)?);
                }
                Side::Sell => {
                    coin_i = Some(order.collateral_i.extract(refund)?);
                    coin_q = None;
                }
            }
            let mut account = self
                .accounts
                .get_mut(&account_key)
                .ok_or(MarketError::NoMarketAccount { key: account_key })?;
            if let Some(coin) = coin_i {
                account.instrument.merge(coin);
            }
            if let Some(coin) = coin_q {
                account.quote.merge(coin);
            }
        }

        let finalized = self
            .orders
            .get(order_id)
            .expect("order exists")
            .metadata
            .is_finalized();
        if finalized {
            self.finalize_order(order_id);
        }

        trace!(order = %order_id, %price, cancelled = %cancelled, finalized, "order cancelled");
        self.emit_price_update_if_changed();
        Ok(())
    }

    /// Cancellable quantity of a live order: its resting entry minus the
    /// FIFO-attributed pending portion. Zero when fully spoken for.
    pub fn cancellable_qty(&self, order_id: OrderId) -> Qty {
        let Some(order) = self.orders.get(order_id).filter(|o| o.is_live()) else {
            return Qty::ZERO;
        };
        let Some(level_id) = order.price_level() else {
            return Qty::ZERO;
        };
        let metadata = &order.metadata;
        let Some(elem) = self.store(metadata.side).elem(metadata.price) else {
            return Qty::ZERO;
        };
        let Some(level) = self.levels.get(level_id) else {
            return Qty::ZERO;
        };
        let mut unattributed = elem.maker_crank_pending_qty;
        for entry in level.orders.iter() {
            if entry.order_id == order_id {
                if unattributed >= entry.qty {
                    return Qty::ZERO;
                }
                return entry.qty.sub(unattributed);
            }
            unattributed = unattributed.sub(unattributed.min(entry.qty));
        }
        Qty::ZERO
    }
}
