//! Prelude module that re-exports commonly used types and traits.
//!
//! Instead of importing each type individually, you can use:
//!
//! ```rust
//! use matchbook_rs::prelude::*;
//! ```

// Core market types
pub use crate::market::Orderbook;
pub use crate::market::error::MarketError;

// Identity and accounts
pub use crate::market::account::{AccountIdentifier, Address, MarketAccount, MarketAccountKey};

// Coin substrate
pub use crate::market::coin::{Coin, CoinError, CoinType, CoinVault};

// Fixed-point arithmetic
pub use crate::market::fixed_point::{Fp, FpError, Price, Qty, RoundingMode};

// Order vocabulary
pub use crate::market::order::{Behavior, OrderId, OrderMetadata, PriceLevelId, Side};

// Summaries and events
pub use crate::market::events::{
    IndexingExecutionEvent, IndexingFinalizeEvent, PriceUpdateEvent,
};
pub use crate::market::price_store::{MarketSummary, SideSummary};

// Fees
pub use crate::market::fees::{FeeSchedule, FeeTier, FeeType};

// Snapshots
pub use crate::market::snapshot::{EnrichedSnapshot, MarketSnapshot, MetricFlags, SnapshotPackage};

// Registry and routing
pub use crate::market::registry::{
    MarketDescriptor, MarketRegistry, MarketRegistryStd, MarketRegistryTokio,
};

// Time helpers
pub use crate::utils::{current_time_micros, current_time_millis, current_time_secs};
