//! Execution-queue payloads and the indexing events the market emits.
//!
//! Listeners are shared closures so callers can fan events out to an
//! indexer, a websocket feed, or a test collector without the market
//! knowing. A market with no listener installed skips event construction
//! costs where it can.

use super::account::MarketAccountKey;
use super::fixed_point::{Price, Qty};
use super::order::{OrderId, PriceLevelId};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// One matched fill awaiting settlement, as queued by `add_order` and
/// drained by the crank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionQueueEvent {
    pub qty: Qty,
    pub taker_order_id: OrderId,
    pub price_level_id: PriceLevelId,
    pub timestamp_secs: u64,
}

/// Emitted once per settled fill. A single queue event produces several of
/// these when it walks through several maker orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexingExecutionEvent {
    /// Unique id of this fill, for downstream dedup.
    pub fill_id: Uuid,
    pub maker_account_key: MarketAccountKey,
    pub taker_account_key: MarketAccountKey,
    /// Execution price: the maker's limit price.
    pub price: Price,
    pub qty: Qty,
    pub timestamp_secs: u64,
}

/// Emitted once when an order leaves the live set, whether filled out or
/// cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexingFinalizeEvent {
    pub account_key: MarketAccountKey,
    pub original_qty: Qty,
    /// The order's limit price; zero for market orders.
    pub price: Price,
    pub timestamp_secs: u64,
}

/// Emitted when the top of the book changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceUpdateEvent {
    /// Ticker of the instrument coin.
    pub instrument_type: &'static str,
    /// Ticker of the quote coin.
    pub quote_type: &'static str,
    /// Best bid; zero when the buy side is empty.
    pub max_bid: Price,
    /// Immediately matchable quantity at the best bid.
    pub bid_size: Qty,
    /// Best ask; zero when the sell side is empty.
    pub min_ask: Price,
    /// Immediately matchable quantity at the best ask.
    pub ask_size: Qty,
    pub timestamp_micro_seconds: u64,
}

/// Listener invoked for every settled fill.
pub type ExecutionListener = Arc<dyn Fn(&IndexingExecutionEvent) + Send + Sync>;

/// Listener invoked for every order finalization.
pub type FinalizeListener = Arc<dyn Fn(&IndexingFinalizeEvent) + Send + Sync>;

/// Listener invoked on top-of-book changes.
pub type PriceUpdateListener = Arc<dyn Fn(&PriceUpdateEvent) + Send + Sync>;
