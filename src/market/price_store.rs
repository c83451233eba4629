//! Hybrid per-side price store: a short cache of the best prices in front
//! of a B+ tree holding the rest, plus an always-exact summary.
//!
//! The partition invariant: every price in the cache is strictly better
//! than every price in the tree of the same side. New prices are placed by
//! the policy below, overflow evicts the worst cache price into the tree,
//! and `rebalance` pulls tree extremes back when the cache has room. The
//! summary lets the matching engine answer "does this order cross" and
//! "where does this price live" without touching the tree.

use super::btree::{BPlusTree, DEFAULT_TREE_ORDER};
use super::cache::{Cache, SortOrder};
use super::fixed_point::{Fp, Price, Qty};
use super::order::{PriceLevelId, Side};
use either::Either;
use serde::Serialize;

/// Aggregate state of one price at one side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceStoreElem {
    /// Quantity available to match right now.
    pub qty: Qty,
    /// Quantity already matched and awaiting the crank.
    pub maker_crank_pending_qty: Qty,
    /// Level holding the resting orders at this price.
    pub price_level_id: PriceLevelId,
}

impl PriceStoreElem {
    /// An element lives until both quantities reach zero; in between it is
    /// a ghost: it pins summary bounds but is skipped while matching.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.qty.is_zero() && self.maker_crank_pending_qty.is_zero()
    }
}

/// Cached aggregates of one side. Price fields use zero for "empty".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SideSummary {
    pub cache_size: usize,
    pub cache_qty: Qty,
    pub cache_max: Price,
    pub cache_min: Price,
    pub tree_max: Price,
    pub tree_min: Price,
}

impl SideSummary {
    /// Best price of the side: the cache extreme when the cache is
    /// populated, else the tree extreme. Zero when the side is empty.
    pub fn best(&self, side: Side) -> Price {
        match side {
            Side::Buy => {
                if self.cache_size > 0 {
                    self.cache_max
                } else {
                    self.tree_max
                }
            }
            Side::Sell => {
                if self.cache_size > 0 {
                    self.cache_min
                } else {
                    self.tree_min
                }
            }
        }
    }
}

/// Both sides' summaries, as exposed to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MarketSummary {
    pub buy: SideSummary,
    pub sell: SideSummary,
}

impl MarketSummary {
    /// Best bid, zero when the buy side is empty.
    pub fn max_bid(&self) -> Price {
        self.buy.best(Side::Buy)
    }

    /// Best ask, zero when the sell side is empty.
    pub fn min_ask(&self) -> Price {
        self.sell.best(Side::Sell)
    }
}

/// Where `place_new` put a price. Used by tests and debug logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Cache,
    Tree,
}

/// One side's price storage.
#[derive(Debug)]
pub struct PriceStore {
    side: Side,
    cache: Cache<PriceStoreElem>,
    tree: BPlusTree<PriceStoreElem>,
    summary: SideSummary,
    max_cache_size: usize,
}

impl PriceStore {
    pub fn new(side: Side, max_cache_size: usize) -> Self {
        let order = match side {
            Side::Buy => SortOrder::Ascending,
            Side::Sell => SortOrder::Descending,
        };
        PriceStore {
            side,
            cache: Cache::new(order),
            tree: BPlusTree::new(DEFAULT_TREE_ORDER),
            summary: SideSummary::default(),
            max_cache_size,
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub fn summary(&self) -> SideSummary {
        self.summary
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty() && self.tree.is_empty()
    }

    /// Total number of distinct prices, ghosts included.
    pub fn price_count(&self) -> usize {
        self.cache.len() + self.tree.len()
    }

    /// True when the summary places `price` in the cache, assuming it is
    /// present at all. With the partition invariant this needs only the
    /// cache bound of the summary.
    fn in_cache_range(&self, price: Price) -> bool {
        if self.summary.cache_size == 0 {
            return false;
        }
        match self.side {
            Side::Buy => price >= self.summary.cache_min,
            Side::Sell => price <= self.summary.cache_max,
        }
    }

    pub fn contains(&self, price: Price) -> bool {
        self.elem(price).is_some()
    }

    /// Point lookup: one structure only, chosen by the summary.
    pub fn elem(&self, price: Price) -> Option<&PriceStoreElem> {
        if self.in_cache_range(price) {
            self.cache.get(price)
        } else {
            self.tree.get(price)
        }
    }

    pub fn elem_mut(&mut self, price: Price) -> Option<&mut PriceStoreElem> {
        if self.in_cache_range(price) {
            self.cache.get_mut(price)
        } else {
            self.tree.get_mut(price)
        }
    }

    /// Insert a price that is not yet present, per the placement policy:
    /// a roomy cache admits only prices better than the whole tree; a full
    /// cache admits prices no worse than its own worst, evicting that
    /// worst price into the tree.
    pub fn place_new(&mut self, price: Price, elem: PriceStoreElem) -> Placement {
        debug_assert!(!self.contains(price), "price {price} already stored");
        let to_cache = if self.cache.len() < self.max_cache_size {
            match self.side {
                Side::Buy => self.summary.tree_max.is_zero() || price > self.summary.tree_max,
                Side::Sell => self.summary.tree_min.is_zero() || price < self.summary.tree_min,
            }
        } else {
            match self.side {
                Side::Buy => price >= self.summary.cache_min,
                Side::Sell => price <= self.summary.cache_max,
            }
        };

        let placement = if to_cache {
            self.cache.insert(price, elem);
            if self.cache.len() > self.max_cache_size {
                let (worst_price, worst_elem) =
                    self.cache.pop_worst().expect("overfull cache has entries");
                self.tree.insert(worst_price, worst_elem);
            }
            Placement::Cache
        } else {
            self.tree.insert(price, elem);
            Placement::Tree
        };
        self.sync_summary();
        placement
    }

    /// Remove a price wherever it lives.
    pub fn remove(&mut self, price: Price) -> Option<PriceStoreElem> {
        let removed = if self.in_cache_range(price) {
            self.cache.remove(price)
        } else {
            self.tree.remove(price)
        };
        if removed.is_some() {
            self.sync_summary();
        }
        removed
    }

    /// Move resting quantity to the pending side of the element, after a
    /// match. The element stays put even at zero quantity while settlement
    /// is owed.
    pub fn apply_fill(&mut self, price: Price, fill: Qty) -> bool {
        let Some(elem) = self.elem_mut(price) else {
            return false;
        };
        debug_assert!(fill <= elem.qty, "fill exceeds resting qty at {price}");
        elem.qty = elem.qty.sub(fill);
        elem.maker_crank_pending_qty = elem.maker_crank_pending_qty.add(fill);
        self.sync_summary();
        true
    }

    /// One rebalance step: pull the tree's best price into a roomy cache.
    /// Returns false when there is nothing to move.
    pub fn rebalance_step(&mut self) -> bool {
        if self.cache.len() >= self.max_cache_size || self.tree.is_empty() {
            return false;
        }
        let (price, elem) = match self.side {
            Side::Buy => self.tree.pop_max().expect("non-empty tree"),
            Side::Sell => self.tree.pop_min().expect("non-empty tree"),
        };
        self.cache.insert(price, elem);
        self.sync_summary();
        true
    }

    /// Recompute every summary field from the underlying structures. Cheap
    /// by construction: the cache is bounded and tree extremes are held at
    /// the ends of the leaf chain.
    pub fn sync_summary(&mut self) {
        self.summary = SideSummary {
            cache_size: self.cache.len(),
            cache_qty: self
                .cache
                .iter()
                .fold(Qty::ZERO, |acc, (_, elem)| acc.add(elem.qty)),
            cache_max: self.cache.max_key().unwrap_or(Fp::ZERO),
            cache_min: self.cache.min_key().unwrap_or(Fp::ZERO),
            tree_max: self.tree.max_key().unwrap_or(Fp::ZERO),
            tree_min: self.tree.min_key().unwrap_or(Fp::ZERO),
        };
    }

    /// Best price and its immediately-matchable quantity, ghosts included.
    pub fn top_of_book(&self) -> Option<(Price, Qty)> {
        let best = self.summary.best(self.side);
        if best.is_zero() {
            return None;
        }
        self.elem(best).map(|elem| (best, elem.qty))
    }

    /// All prices best-first with their elements: the cache (already best
    /// to worst) followed by the tree in side order. Used by the
    /// fill-or-kill simulation and by depth snapshots.
    pub fn iter_best_first(&self) -> impl Iterator<Item = (Price, &PriceStoreElem)> {
        let tree_iter = match self.side {
            Side::Buy => Either::Left(self.tree.iter_rev()),
            Side::Sell => Either::Right(self.tree.iter()),
        };
        self.cache.iter_best_first().chain(tree_iter)
    }

    // Internal accessors for the matching walk.

    /// Snapshot of cache prices from best to worst. Matching walks this
    /// by value: nothing is removed from the cache mid-walk (exhausted
    /// entries linger as ghosts), so the snapshot stays accurate.
    pub(crate) fn cache_prices_best_first(&self) -> Vec<Price> {
        self.cache.iter_best_first().map(|(price, _)| price).collect()
    }

    pub(crate) fn tree(&self) -> &BPlusTree<PriceStoreElem> {
        &self.tree
    }

    #[cfg(test)]
    pub(crate) fn cache_prices(&self) -> Vec<Price> {
        self.cache.iter().map(|(price, _)| price).collect()
    }

    #[cfg(test)]
    pub(crate) fn tree_prices(&self) -> Vec<Price> {
        self.tree.iter().map(|(price, _)| price).collect()
    }
}
