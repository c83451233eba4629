//! Order records, their metadata, and the pooled order table.
//!
//! Orders live in a keyed table and are recycled through a LIFO free list
//! threaded through the records themselves, so a steady-state market does
//! not allocate per submission. An [`OrderId`] therefore does not uniquely
//! identify a logical order across time: once a record is freed its id may
//! be handed to a new submission. The live metadata at the id is the
//! order's identity; freed records have a zeroed owner address.

use super::account::{Address, MarketAccountKey};
use super::coin::{Coin, CoinType};
use super::fixed_point::{Fp, Price, Qty};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Book side of an order. The discriminants are part of the caller-facing
/// wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Buy = 1,
    Sell = 2,
}

impl Side {
    /// The side an incoming order matches against.
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(Side::Buy),
            2 => Ok(Side::Sell),
            other => Err(other),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Execution behavior of an order. The discriminants are part of the
/// caller-facing wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Behavior {
    /// Good-till-cancelled; may rest on the book.
    Gtc = 1,
    /// Post-only; cancelled instead of taking.
    Post = 2,
    /// Immediate-or-cancel; any residual is cancelled.
    Ioc = 3,
    /// Fill-or-kill; executes in full or not at all.
    Fok = 4,
}

impl TryFrom<u8> for Behavior {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(Behavior::Gtc),
            2 => Ok(Behavior::Post),
            3 => Ok(Behavior::Ioc),
            4 => Ok(Behavior::Fok),
            other => Err(other),
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Behavior::Gtc => write!(f, "GTC"),
            Behavior::Post => write!(f, "POST"),
            Behavior::Ioc => write!(f, "IOC"),
            Behavior::Fok => write!(f, "FOK"),
        }
    }
}

/// Handle into the order pool. Ids recycle after a record is freed; see
/// the module docs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OrderId(u32);

impl OrderId {
    pub fn new(raw: u32) -> Self {
        OrderId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle into the price-level reuse table. Recycles like [`OrderId`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PriceLevelId(u16);

impl PriceLevelId {
    pub fn new(raw: u16) -> Self {
        PriceLevelId(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PriceLevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// The plain-value state of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMetadata {
    pub side: Side,
    pub behavior: Behavior,
    /// Limit price; zero marks a market order.
    pub price: Price,
    pub original_qty: Qty,
    pub unfilled_qty: Qty,
    /// Quantity this order has taken but not yet settled.
    pub taker_crank_pending_qty: Qty,
    pub client_order_id: Option<u64>,
    pub owner: Address,
    pub account_key: MarketAccountKey,
    /// Quote collateral a market buy may still spend. Zero for every other
    /// kind of order, and monotonically non-increasing while matching.
    pub market_buy_remaining_collateral: Fp,
}

impl OrderMetadata {
    /// Zero for market orders.
    #[inline]
    pub fn is_market(&self) -> bool {
        self.price.is_zero()
    }

    #[inline]
    pub fn is_market_buy(&self) -> bool {
        self.is_market() && self.side == Side::Buy
    }

    /// Quantity still eligible to take liquidity. A market buy whose
    /// collateral is exhausted has no capacity left regardless of its
    /// unfilled quantity.
    pub fn remaining_to_execute(&self) -> Qty {
        if self.is_market_buy() && self.market_buy_remaining_collateral.is_zero() {
            return Fp::ZERO;
        }
        self.unfilled_qty.sub(self.taker_crank_pending_qty)
    }

    /// True once nothing remains to execute and nothing awaits the crank.
    /// Note the market-buy case: exhausted collateral finalizes the order
    /// even with unfilled quantity on the books.
    pub fn is_finalized(&self) -> bool {
        self.remaining_to_execute().is_zero() && self.taker_crank_pending_qty.is_zero()
    }
}

/// A pooled order record: metadata plus the collateral it owns.
///
/// Exactly one of the two collateral reservoirs is non-empty for a live
/// order: quote for buys, instrument for sells.
#[derive(Debug)]
pub struct Order<I: CoinType, Q: CoinType> {
    pub metadata: OrderMetadata,
    pub(crate) collateral_i: Coin<I>,
    pub(crate) collateral_q: Coin<Q>,
    /// Level the residual quantity rests at; `None` while taker-only.
    pub(crate) price_level: Option<PriceLevelId>,
    /// Next record in the free list; meaningful only while freed.
    next_free: u32,
}

impl<I: CoinType, Q: CoinType> Order<I, Q> {
    /// A freed or never-assigned record has a zeroed owner.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.metadata.owner.is_zero()
    }

    pub fn price_level(&self) -> Option<PriceLevelId> {
        self.price_level
    }
}

fn blank_metadata() -> OrderMetadata {
    OrderMetadata {
        side: Side::Buy,
        behavior: Behavior::Gtc,
        price: Fp::ZERO,
        original_qty: Fp::ZERO,
        unfilled_qty: Fp::ZERO,
        taker_crank_pending_qty: Fp::ZERO,
        client_order_id: None,
        owner: Address::ZERO,
        account_key: MarketAccountKey {
            protocol: Address::ZERO,
            user: Address::ZERO,
        },
        market_buy_remaining_collateral: Fp::ZERO,
    }
}

/// Keyed table of order records with LIFO slot reuse.
#[derive(Debug)]
pub struct OrderPool<I: CoinType, Q: CoinType> {
    slots: HashMap<u32, Order<I, Q>>,
    next_id: u32,
    free_head: u32,
    free_count: usize,
}

impl<I: CoinType, Q: CoinType> Default for OrderPool<I, Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: CoinType, Q: CoinType> OrderPool<I, Q> {
    pub fn new() -> Self {
        OrderPool {
            slots: HashMap::new(),
            next_id: 1,
            free_head: 0,
            free_count: 0,
        }
    }

    /// Records ever created.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    /// Records currently on the free list.
    pub fn free(&self) -> usize {
        self.free_count
    }

    /// Records currently holding a live order.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free_count
    }

    /// Take a slot off the free list, or grow the table, and move the
    /// order's state in.
    pub fn acquire(
        &mut self,
        metadata: OrderMetadata,
        collateral_i: Coin<I>,
        collateral_q: Coin<Q>,
    ) -> OrderId {
        debug_assert!(!metadata.owner.is_zero(), "live orders carry an owner");
        if self.free_head != 0 {
            let id = self.free_head;
            let slot = self.slots.get_mut(&id).expect("free-list slot");
            self.free_head = slot.next_free;
            self.free_count -= 1;
            slot.metadata = metadata;
            slot.collateral_i = collateral_i;
            slot.collateral_q = collateral_q;
            slot.price_level = None;
            slot.next_free = 0;
            return OrderId(id);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(
            id,
            Order {
                metadata,
                collateral_i,
                collateral_q,
                price_level: None,
                next_free: 0,
            },
        );
        OrderId(id)
    }

    /// Look up a record. Freed records are visible here (with zeroed
    /// metadata); callers gate on [`Order::is_live`].
    pub fn get(&self, id: OrderId) -> Option<&Order<I, Q>> {
        self.slots.get(&id.0)
    }

    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut Order<I, Q>> {
        self.slots.get_mut(&id.0)
    }

    /// Zero the record and push its slot onto the free list. Returns any
    /// collateral still held so the caller can release it; a correct
    /// caller drains the reservoirs first.
    pub fn release(&mut self, id: OrderId) -> (Coin<I>, Coin<Q>) {
        let slot = self.slots.get_mut(&id.0).expect("released order exists");
        debug_assert!(slot.is_live(), "double release of order slot");
        slot.metadata = blank_metadata();
        slot.price_level = None;
        let coins = (slot.collateral_i.extract_all(), slot.collateral_q.extract_all());
        slot.next_free = self.free_head;
        self.free_head = id.0;
        self.free_count += 1;
        coins
    }

    /// Iterate live records.
    pub fn iter_live(&self) -> impl Iterator<Item = (OrderId, &Order<I, Q>)> {
        self.slots
            .iter()
            .filter(|(_, order)| order.is_live())
            .map(|(id, order)| (OrderId(*id), order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct I8;
    impl CoinType for I8 {
        const SYMBOL: &'static str = "INS";
        const DECIMALS: u8 = 8;
    }
    struct Q6;
    impl CoinType for Q6 {
        const SYMBOL: &'static str = "QTE";
        const DECIMALS: u8 = 6;
    }

    fn metadata(owner: &str) -> OrderMetadata {
        let owner = Address::derive(owner);
        OrderMetadata {
            side: Side::Buy,
            behavior: Behavior::Gtc,
            price: Fp::from_int(10),
            original_qty: Fp::from_int(5),
            unfilled_qty: Fp::from_int(5),
            taker_crank_pending_qty: Fp::ZERO,
            client_order_id: None,
            owner,
            account_key: MarketAccountKey {
                protocol: owner,
                user: owner,
            },
            market_buy_remaining_collateral: Fp::ZERO,
        }
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(Side::try_from(1), Ok(Side::Buy));
        assert_eq!(Side::try_from(2), Ok(Side::Sell));
        assert_eq!(Side::try_from(0), Err(0));
        assert_eq!(Behavior::try_from(1), Ok(Behavior::Gtc));
        assert_eq!(Behavior::try_from(4), Ok(Behavior::Fok));
        assert_eq!(Behavior::try_from(5), Err(5));
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_remaining_to_execute() {
        let mut md = metadata("alice");
        assert_eq!(md.remaining_to_execute(), Fp::from_int(5));
        md.taker_crank_pending_qty = Fp::from_int(2);
        assert_eq!(md.remaining_to_execute(), Fp::from_int(3));
        assert!(!md.is_finalized());
    }

    #[test]
    fn test_market_buy_collateral_exhaustion_counts_as_no_capacity() {
        let mut md = metadata("alice");
        md.behavior = Behavior::Ioc;
        md.price = Fp::ZERO;
        md.market_buy_remaining_collateral = Fp::from_int(1);
        assert_eq!(md.remaining_to_execute(), Fp::from_int(5));

        md.market_buy_remaining_collateral = Fp::ZERO;
        assert_eq!(md.remaining_to_execute(), Fp::ZERO);
        // Unfilled quantity remains, yet the order counts as finalized.
        assert!(md.is_finalized());
    }

    #[test]
    fn test_pool_acquire_release_reuse() {
        let mut pool: OrderPool<I8, Q6> = OrderPool::new();
        let a = pool.acquire(metadata("a"), Coin::zero(), Coin::zero());
        let b = pool.acquire(metadata("b"), Coin::zero(), Coin::zero());
        assert_ne!(a, b);
        assert_eq!(pool.live(), 2);
        assert_eq!(pool.free(), 0);

        let (ci, cq) = pool.release(a);
        assert!(ci.is_zero() && cq.is_zero());
        assert_eq!(pool.live(), 1);
        assert_eq!(pool.free(), 1);
        assert!(!pool.get(a).unwrap().is_live());

        // LIFO reuse hands the freed slot back.
        let c = pool.acquire(metadata("c"), Coin::zero(), Coin::zero());
        assert_eq!(c, a);
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.live() + pool.free(), pool.allocated());
    }

    #[test]
    fn test_pool_release_returns_collateral() {
        let mut pool: OrderPool<I8, Q6> = OrderPool::new();
        let mut funds: Coin<Q6> = Coin::zero();
        funds.merge({
            let vault: crate::market::coin::CoinVault<Q6> = crate::market::coin::CoinVault::new();
            vault.mint(Address::derive("x"), 50);
            vault.withdraw(Address::derive("x"), 50).unwrap()
        });
        let id = pool.acquire(metadata("a"), Coin::zero(), funds);
        let (_, cq) = pool.release(id);
        assert_eq!(cq.value(), 50);
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut pool: OrderPool<I8, Q6> = OrderPool::new();
        let ids: Vec<OrderId> = (0..4)
            .map(|n| pool.acquire(metadata(&format!("u{n}")), Coin::zero(), Coin::zero()))
            .collect();
        for id in &ids {
            pool.release(*id);
        }
        // Released in order, so reacquisition observes the reverse order.
        for expected in ids.iter().rev() {
            let got = pool.acquire(metadata("again"), Coin::zero(), Coin::zero());
            assert_eq!(got, *expected);
        }
    }
}
