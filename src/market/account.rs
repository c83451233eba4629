//! Platform identity and per-market accounts.
//!
//! A market account is keyed by `(protocol, user)` so that several
//! protocols can custody balances for the same user independently. The
//! user address is the account owner; the protocol address may also act on
//! the account (the owner-or-protocol rule).

use super::coin::{Coin, CoinType};
use super::order::OrderId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte platform address.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Address([u8; 32]);

impl Address {
    /// The all-zero address. Never owns anything; doubles as the "no
    /// owner" marker on freed order records.
    pub const ZERO: Address = Address([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Address(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Deterministically derive an address from a label. Handy for tests
    /// and tooling; real addresses come from the platform.
    pub fn derive(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(label.as_bytes());
        Address(hasher.finalize().into())
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Leading 4 bytes are enough to tell addresses apart in logs.
        write!(
            f,
            "0x{:02x}{:02x}{:02x}{:02x}…",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Opaque platform identity, convertible to a [`MarketAccountKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountIdentifier {
    protocol: Address,
    user: Address,
}

impl AccountIdentifier {
    pub fn new(protocol: Address, user: Address) -> Self {
        AccountIdentifier { protocol, user }
    }

    /// Identity for a user acting directly, with no custodial protocol in
    /// front; the user address fills both roles.
    pub fn direct(user: Address) -> Self {
        AccountIdentifier {
            protocol: user,
            user,
        }
    }

    pub fn key(&self) -> MarketAccountKey {
        MarketAccountKey {
            protocol: self.protocol,
            user: self.user,
        }
    }
}

/// Key of a market account: the `(protocol, user)` address pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketAccountKey {
    pub protocol: Address,
    pub user: Address,
}

impl fmt::Display for MarketAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.user)
    }
}

/// Balances and live orders of one `(protocol, user)` pair on one market.
#[derive(Debug)]
pub struct MarketAccount<I: CoinType, Q: CoinType> {
    key: MarketAccountKey,
    owner: Address,
    pub(crate) instrument: Coin<I>,
    pub(crate) quote: Coin<Q>,
    pub(crate) active_orders: Vec<OrderId>,
}

impl<I: CoinType, Q: CoinType> MarketAccount<I, Q> {
    pub(crate) fn new(key: MarketAccountKey) -> Self {
        MarketAccount {
            key,
            owner: key.user,
            instrument: Coin::zero(),
            quote: Coin::zero(),
            active_orders: Vec::new(),
        }
    }

    #[inline]
    pub fn key(&self) -> MarketAccountKey {
        self.key
    }

    /// The owning user address. Never changes for the account's lifetime.
    #[inline]
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Instrument balance in raw coin units.
    pub fn instrument_balance(&self) -> u64 {
        self.instrument.value()
    }

    /// Quote balance in raw coin units.
    pub fn quote_balance(&self) -> u64 {
        self.quote.value()
    }

    /// Order ids currently live for this account.
    pub fn active_orders(&self) -> &[OrderId] {
        &self.active_orders
    }

    /// The owner-or-protocol rule: only these two addresses may move the
    /// account's funds or act on its orders.
    pub fn allows(&self, caller: Address) -> bool {
        caller == self.owner || caller == self.key.protocol
    }

    pub(crate) fn track_order(&mut self, id: OrderId) {
        self.active_orders.push(id);
    }

    pub(crate) fn untrack_order(&mut self, id: OrderId) {
        if let Some(pos) = self.active_orders.iter().position(|o| *o == id) {
            self.active_orders.swap_remove(pos);
        }
    }
}
