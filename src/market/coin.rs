//! Capability-style coin substrate.
//!
//! The engine never touches raw balances directly; it withdraws [`Coin`]
//! values out of a [`CoinVault`], carries them inside order records as
//! collateral, and deposits them back on settlement. `Coin` is linear: it
//! cannot be cloned, so every unit the engine holds came out of a vault
//! exactly once.
//!
//! Amounts at this boundary are raw integer units in the coin's own
//! decimals, not the engine's canonical fixed-point form; conversions go
//! through [`Fp::from_units`] / [`Fp::to_units`](super::fixed_point::Fp).

use super::account::Address;
use dashmap::DashMap;
use std::marker::PhantomData;
use thiserror::Error;

/// Static description of a coin. Implemented by zero-sized marker types.
pub trait CoinType: Send + Sync + 'static {
    /// Ticker used in logs and errors.
    const SYMBOL: &'static str;

    /// Number of decimal places of the coin's raw unit.
    const DECIMALS: u8;

    /// Whether the coin has been initialized on the hosting platform.
    fn is_initialized() -> bool {
        true
    }
}

/// Errors raised by the coin substrate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoinError {
    /// The coin type has not been initialized on the platform.
    #[error("coin {symbol} is not initialized")]
    Uninitialized {
        /// Ticker of the offending coin.
        symbol: &'static str,
    },

    /// The address has no balance record in the vault.
    #[error("address {address} is not registered with the {symbol} vault")]
    NotRegistered {
        /// The unregistered address.
        address: Address,
        /// Ticker of the vault's coin.
        symbol: &'static str,
    },

    /// The balance does not cover the requested amount.
    #[error("address {address} holds {available} {symbol}, requested {requested}")]
    InsufficientBalance {
        /// The debited address.
        address: Address,
        /// Amount requested, in raw units.
        requested: u64,
        /// Amount available, in raw units.
        available: u64,
        /// Ticker of the vault's coin.
        symbol: &'static str,
    },
}

/// A linear amount of coin `C`, in raw units of `C::DECIMALS` places.
#[derive(Debug, Default)]
pub struct Coin<C: CoinType> {
    value: u64,
    _marker: PhantomData<C>,
}

impl<C: CoinType> Coin<C> {
    /// The empty coin.
    pub fn zero() -> Self {
        Coin {
            value: 0,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Absorb `other` into `self`.
    pub fn merge(&mut self, other: Coin<C>) {
        self.value = self.value.saturating_add(other.value);
    }

    /// Split `amount` raw units off `self`.
    pub fn extract(&mut self, amount: u64) -> Result<Coin<C>, CoinError> {
        if amount > self.value {
            return Err(CoinError::InsufficientBalance {
                address: Address::ZERO,
                requested: amount,
                available: self.value,
                symbol: C::SYMBOL,
            });
        }
        self.value -= amount;
        Ok(Coin {
            value: amount,
            _marker: PhantomData,
        })
    }

    /// Take the full contents, leaving `self` empty.
    pub fn extract_all(&mut self) -> Coin<C> {
        let value = std::mem::take(&mut self.value);
        Coin {
            value,
            _marker: PhantomData,
        }
    }
}

/// Per-address balances of one coin type.
///
/// Owners and the matching engine share the vault, so the table is a
/// [`DashMap`]; the engine only ever holds one entry reference at a time.
#[derive(Debug, Default)]
pub struct CoinVault<C: CoinType> {
    balances: DashMap<Address, u64>,
    _marker: PhantomData<C>,
}

impl<C: CoinType> CoinVault<C> {
    pub fn new() -> Self {
        CoinVault {
            balances: DashMap::new(),
            _marker: PhantomData,
        }
    }

    /// Create a zero balance record for `address`. Idempotent.
    pub fn register(&self, address: Address) {
        self.balances.entry(address).or_insert(0);
    }

    pub fn is_registered(&self, address: Address) -> bool {
        self.balances.contains_key(&address)
    }

    /// Current balance in raw units; zero for unknown addresses.
    pub fn balance(&self, address: Address) -> u64 {
        self.balances.get(&address).map(|b| *b).unwrap_or(0)
    }

    /// Credit freshly issued units to `address`. Registers the address as
    /// a side effect.
    pub fn mint(&self, address: Address, amount: u64) {
        *self.balances.entry(address).or_insert(0) += amount;
    }

    /// Debit `amount` raw units from `address`, returning them as a coin.
    pub fn withdraw(&self, address: Address, amount: u64) -> Result<Coin<C>, CoinError> {
        let mut balance = self
            .balances
            .get_mut(&address)
            .ok_or(CoinError::NotRegistered {
                address,
                symbol: C::SYMBOL,
            })?;
        if *balance < amount {
            return Err(CoinError::InsufficientBalance {
                address,
                requested: amount,
                available: *balance,
                symbol: C::SYMBOL,
            });
        }
        *balance -= amount;
        Ok(Coin {
            value: amount,
            _marker: PhantomData,
        })
    }

    /// Credit a coin to `address`. Registers the address as a side effect,
    /// so deposits cannot strand funds.
    pub fn deposit(&self, address: Address, coin: Coin<C>) {
        *self.balances.entry(address).or_insert(0) += coin.value;
    }

    /// Sum of every registered balance, in raw units.
    pub fn total_supply(&self) -> u64 {
        self.balances.iter().map(|entry| *entry.value()).sum()
    }
}
