//! Depth snapshots for market data consumers.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

use super::coin::CoinType;
use super::error::MarketError;
use super::fixed_point::{Price, Qty};
use super::price_store::MarketSummary;
use crate::Orderbook;
use crate::utils::current_time_millis;

/// One price level as seen from outside: resting, pending, and queue
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub price: Price,
    /// Immediately matchable quantity.
    pub qty: Qty,
    /// Matched quantity awaiting the crank.
    pub pending_qty: Qty,
    /// Orders queued at this price.
    pub order_count: usize,
}

/// A point-in-time view of the whole book, best prices first on each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Ticker of the instrument coin.
    pub instrument_type: String,
    /// Ticker of the quote coin.
    pub quote_type: String,
    /// Milliseconds since epoch at capture.
    pub timestamp: u64,
    /// Buy side, best bid first.
    pub bids: Vec<LevelSnapshot>,
    /// Sell side, best ask first.
    pub asks: Vec<LevelSnapshot>,
}

impl MarketSnapshot {
    /// Best bid level, if any.
    pub fn best_bid(&self) -> Option<&LevelSnapshot> {
        self.bids.first()
    }

    /// Best ask level, if any.
    pub fn best_ask(&self) -> Option<&LevelSnapshot> {
        self.asks.first()
    }

    /// Sum of immediately matchable bid quantity.
    pub fn total_bid_qty(&self) -> Qty {
        self.bids
            .iter()
            .fold(Qty::ZERO, |acc, level| acc.add(level.qty))
    }

    /// Sum of immediately matchable ask quantity.
    pub fn total_ask_qty(&self) -> Qty {
        self.asks
            .iter()
            .fold(Qty::ZERO, |acc, level| acc.add(level.qty))
    }
}

bitflags! {
    /// Selects which derived metrics an enriched snapshot computes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MetricFlags: u32 {
        const MID_PRICE  = 0b0001;
        const SPREAD_BPS = 0b0010;
        const DEPTH      = 0b0100;
        const IMBALANCE  = 0b1000;
    }
}

impl MetricFlags {
    /// Every metric.
    pub fn full() -> Self {
        MetricFlags::all()
    }
}

/// A [`MarketSnapshot`] with pre-computed display metrics, built in a
/// single pass over the depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedSnapshot {
    pub snapshot: MarketSnapshot,
    pub summary: MarketSummary,
    /// Mid between best bid and ask. `None` for a one-sided book or when
    /// not requested.
    pub mid_price: Option<f64>,
    /// Spread in basis points of the mid. `None` as above.
    pub spread_bps: Option<f64>,
    /// `(bid, ask)` totals of matchable quantity.
    pub depth: Option<(Qty, Qty)>,
    /// Buy/sell pressure in `[-1, 1]`; positive means bid-heavy.
    pub imbalance: Option<f64>,
}

/// Format version of checksum-carrying snapshot packages.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Integrity wrapper: snapshot plus a SHA-256 checksum of its JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPackage {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub snapshot: MarketSnapshot,
    /// Hex-encoded SHA-256 of the serialized snapshot.
    pub checksum: String,
}

impl SnapshotPackage {
    pub fn new(snapshot: MarketSnapshot) -> Result<Self, MarketError> {
        let checksum = Self::compute_checksum(&snapshot)?;
        Ok(Self {
            version: SNAPSHOT_FORMAT_VERSION,
            snapshot,
            checksum,
        })
    }

    pub fn to_json(&self) -> Result<String, MarketError> {
        serde_json::to_string(self).map_err(|error| MarketError::InvalidConfig {
            message: format!("snapshot serialization failed: {error}"),
        })
    }

    pub fn from_json(data: &str) -> Result<Self, MarketError> {
        serde_json::from_str(data).map_err(|error| MarketError::InvalidConfig {
            message: format!("snapshot deserialization failed: {error}"),
        })
    }

    /// Validate the version and checksum, then unwrap the snapshot.
    pub fn into_snapshot(self) -> Result<MarketSnapshot, MarketError> {
        if self.version != SNAPSHOT_FORMAT_VERSION {
            return Err(MarketError::InvalidConfig {
                message: format!(
                    "unsupported snapshot version {} (expected {SNAPSHOT_FORMAT_VERSION})",
                    self.version
                ),
            });
        }
        let computed = Self::compute_checksum(&self.snapshot)?;
        if computed != self.checksum {
            return Err(MarketError::InvalidConfig {
                message: format!(
                    "snapshot checksum mismatch: expected {}, computed {computed}",
                    self.checksum
                ),
            });
        }
        Ok(self.snapshot)
    }

    fn compute_checksum(snapshot: &MarketSnapshot) -> Result<String, MarketError> {
        let payload = serde_json::to_vec(snapshot).map_err(|error| MarketError::InvalidConfig {
            message: format!("snapshot serialization failed: {error}"),
        })?;
        let mut hasher = Sha256::new();
        hasher.update(payload);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl<I: CoinType, Q: CoinType> Orderbook<I, Q> {
    /// Capture the full depth of both sides, best prices first.
    pub fn snapshot(&self) -> MarketSnapshot {
        let capture = |store: &super::price_store::PriceStore| -> Vec<LevelSnapshot> {
            store
                .iter_best_first()
                .map(|(price, elem)| LevelSnapshot {
                    price,
                    qty: elem.qty,
                    pending_qty: elem.maker_crank_pending_qty,
                    order_count: self
                        .levels
                        .get(elem.price_level_id)
                        .map(|level| level.order_count())
                        .unwrap_or(0),
                })
                .collect()
        };
        let snapshot = MarketSnapshot {
            instrument_type: I::SYMBOL.to_string(),
            quote_type: Q::SYMBOL.to_string(),
            timestamp: current_time_millis(),
            bids: capture(&self.buy_store),
            asks: capture(&self.sell_store),
        };
        trace!(
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "snapshot captured"
        );
        snapshot
    }

    /// Capture the depth and compute the requested metrics in one pass.
    pub fn enriched_snapshot(&self, flags: MetricFlags) -> EnrichedSnapshot {
        let snapshot = self.snapshot();
        let summary = self.summary();

        let best_bid = snapshot.best_bid().map(|level| level.price.to_f64());
        let best_ask = snapshot.best_ask().map(|level| level.price.to_f64());

        let mid_price = if flags.contains(MetricFlags::MID_PRICE) {
            match (best_bid, best_ask) {
                (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
                _ => None,
            }
        } else {
            None
        };
        let spread_bps = if flags.contains(MetricFlags::SPREAD_BPS) {
            match (best_bid, best_ask) {
                (Some(bid), Some(ask)) if bid + ask > 0.0 => {
                    Some((ask - bid) / ((ask + bid) / 2.0) * 10_000.0)
                }
                _ => None,
            }
        } else {
            None
        };
        let depth = flags
            .contains(MetricFlags::DEPTH)
            .then(|| (snapshot.total_bid_qty(), snapshot.total_ask_qty()));
        let imbalance = if flags.contains(MetricFlags::IMBALANCE) {
            let bid = snapshot.total_bid_qty().to_f64();
            let ask = snapshot.total_ask_qty().to_f64();
            (bid + ask > 0.0).then(|| (bid - ask) / (bid + ask))
        } else {
            None
        };

        EnrichedSnapshot {
            snapshot,
            summary,
            mid_price,
            spread_bps,
            depth,
            imbalance,
        }
    }
}
