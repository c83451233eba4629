//! # Spot Limit-Order-Book Matching Engine
//!
//! A single-pair spot matching engine built around deferred settlement:
//! order submission matches against the book and queues execution events,
//! and a separate bounded `crank` drains the queue and moves the coins.
//! The split lets one taker sweep any number of makers without touching a
//! single maker record in the submission path.
//!
//! ## Architecture
//!
//! - **Hybrid price store**: each side keeps its best prices in a short
//!   ordered cache backed by a B+ tree for the rest, with an always-exact
//!   summary of sizes, quantities, and extremes. Most decisions (spread
//!   tests, placement, top-of-book) read only the summary.
//! - **Object pools**: order records, price levels, list nodes, and tree
//!   nodes are all arena-allocated and recycled through LIFO free lists,
//!   so a steady-state market stops allocating. Handles recycle with the
//!   slots; the live metadata at a handle is the order's identity.
//! - **Two-phase execution**: matching moves resting quantity into
//!   pending-crank columns and appends to the execution queue;
//!   [`Orderbook::crank`] settles queued fills FIFO, at the maker's limit
//!   price, refunding buy takers their price improvement.
//! - **Order behaviors**: GTC, post-only, IOC, and FOK limit orders plus
//!   IOC/FOK market orders, including market buys capped by a quote
//!   collateral budget rather than quantity alone.
//!
//! Collateral lives inside the order records as linear [`Coin`] values
//! withdrawn from per-account balances, so every unit the engine holds is
//! accounted for: nothing is created or destroyed by matching, settling,
//! or cancelling.
//!
//! ## Example
//!
//! ```
//! use matchbook_rs::prelude::*;
//! use std::sync::Arc;
//!
//! struct Apt;
//! impl CoinType for Apt {
//!     const SYMBOL: &'static str = "APT";
//!     const DECIMALS: u8 = 8;
//! }
//! struct Usdc;
//! impl CoinType for Usdc {
//!     const SYMBOL: &'static str = "USDC";
//!     const DECIMALS: u8 = 6;
//! }
//!
//! let apt = Arc::new(CoinVault::<Apt>::new());
//! let usdc = Arc::new(CoinVault::<Usdc>::new());
//! let mut market = Orderbook::<Apt, Usdc>::init_market(
//!     3, 3, 16, FeeType::free(), apt.clone(), usdc.clone(),
//! ).unwrap();
//!
//! let alice = Address::derive("alice");
//! usdc.mint(alice, 1_000_000_000);
//! let key = market
//!     .open_market_account(alice, AccountIdentifier::direct(alice))
//!     .unwrap();
//! market.deposit(alice, key, 0, 1_000_000_000).unwrap();
//!
//! let order_id = market
//!     .add_order(
//!         alice,
//!         key,
//!         Side::Buy,
//!         Behavior::Gtc,
//!         "9.5".parse().unwrap(),
//!         "2".parse().unwrap(),
//!         None,
//!         Fp::ZERO,
//!     )
//!     .unwrap();
//! assert!(order_id.is_some());
//! assert_eq!(market.best_bid(), Some("9.5".parse().unwrap()));
//! ```

pub mod market;
pub mod prelude;
mod utils;

pub use market::Orderbook;
pub use market::account::{AccountIdentifier, Address, MarketAccount, MarketAccountKey};
pub use market::btree::{BPlusTree, IterDirection};
pub use market::coin::{Coin, CoinError, CoinType, CoinVault};
pub use market::error::MarketError;
pub use market::events::{
    ExecutionListener, ExecutionQueueEvent, FinalizeListener, IndexingExecutionEvent,
    IndexingFinalizeEvent, PriceUpdateEvent, PriceUpdateListener,
};
pub use market::fees::{FeeSchedule, FeeTier, FeeType};
pub use market::fixed_point::{DECIMALS, Fp, FpError, Price, Qty, RoundingMode, SCALE};
pub use market::order::{Behavior, OrderId, OrderMetadata, PriceLevelId, Side};
pub use market::price_store::{MarketSummary, PriceStoreElem, SideSummary};
pub use market::registry::{
    MarketDescriptor, MarketRegistry, MarketRegistryStd, MarketRegistryTokio, RoutedExecution,
};
pub use market::snapshot::{
    EnrichedSnapshot, LevelSnapshot, MarketSnapshot, MetricFlags, SnapshotPackage,
};
pub use utils::{current_time_micros, current_time_millis, current_time_secs};
