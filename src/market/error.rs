//! Market error types.

use super::account::{Address, MarketAccountKey};
use super::coin::CoinError;
use super::fixed_point::{FpError, Price, Qty};
use super::order::OrderId;
use std::fmt;

/// Errors raised by the public market operations.
///
/// Every error aborts its operation atomically: validation runs before any
/// book state is touched, so a returned error implies an unchanged book.
/// The `PriceStoreElemNotFound`, `TreeElemDoesNotExist`,
/// `CacheItemNotFound`, and `CrankUnfulfilledQty` variants are integrity
/// violations that are unreachable on an uncorrupted book.
#[derive(Debug)]
#[non_exhaustive]
pub enum MarketError {
    /// Market configuration rejected at init.
    InvalidConfig {
        /// Description of the rejected configuration.
        message: String,
    },

    /// The wire value does not name a side.
    InvalidSide {
        /// The rejected wire value.
        value: u8,
    },

    /// The behavior is unknown or not allowed for this order shape.
    InvalidBehavior {
        /// Description of the rejected combination.
        message: String,
    },

    /// The market-buy collateral cap is inconsistent with the order shape.
    InvalidMaxCollateralAmt {
        /// Description of the rejected amount.
        message: String,
    },

    /// A coin used by the market is not initialized on the platform.
    CoinUninitialized {
        /// Ticker of the offending coin.
        symbol: &'static str,
    },

    /// A coin's precision exceeds what the engine can represent.
    CoinDecimalsExceedMax {
        /// Ticker of the offending coin.
        symbol: &'static str,
        /// The coin's decimal places.
        decimals: u8,
        /// Largest supported number of decimal places.
        max: u8,
    },

    /// Vault-level failure while moving coins.
    Coin(CoinError),

    /// The order id does not refer to a live order.
    UnknownOrder {
        /// The rejected order id.
        order_id: OrderId,
    },

    /// Caller is neither the account owner nor its protocol.
    NotOwner {
        /// The rejected caller address.
        caller: Address,
    },

    /// The requested portion of the order is matched and awaiting the
    /// crank, so it can no longer be cancelled.
    PendingCrank {
        /// The order that could not be cancelled.
        order_id: OrderId,
    },

    /// No market account is open under this key.
    NoMarketAccount {
        /// The missing account key.
        key: MarketAccountKey,
    },

    /// A market account is already open under this key.
    AccountExists {
        /// The conflicting account key.
        key: MarketAccountKey,
    },

    /// A price expected in the price store was absent.
    PriceStoreElemNotFound {
        /// The missing price.
        price: Price,
    },

    /// A price expected in the tree was absent.
    TreeElemDoesNotExist {
        /// The missing price.
        price: Price,
    },

    /// A price expected in the cache was absent.
    CacheItemNotFound {
        /// The missing price.
        price: Price,
    },

    /// A queued execution event could not be settled in full.
    CrankUnfulfilledQty {
        /// Taker of the unsettleable event.
        taker_order_id: OrderId,
        /// Quantity that found no maker entries.
        missing: Qty,
    },

    /// Fixed-point conversion failure.
    Fp(FpError),
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketError::InvalidConfig { message } => {
                write!(f, "invalid market config: {message}")
            }
            MarketError::InvalidSide { value } => {
                write!(f, "invalid side value: {value}")
            }
            MarketError::InvalidBehavior { message } => {
                write!(f, "invalid behavior: {message}")
            }
            MarketError::InvalidMaxCollateralAmt { message } => {
                write!(f, "invalid max collateral amount: {message}")
            }
            MarketError::CoinUninitialized { symbol } => {
                write!(f, "coin {symbol} is not initialized")
            }
            MarketError::CoinDecimalsExceedMax {
                symbol,
                decimals,
                max,
            } => {
                write!(
                    f,
                    "coin {symbol} has {decimals} decimals, more than the supported {max}"
                )
            }
            MarketError::Coin(err) => write!(f, "coin error: {err}"),
            MarketError::UnknownOrder { order_id } => {
                write!(f, "order {order_id} is not live")
            }
            MarketError::NotOwner { caller } => {
                write!(f, "caller {caller} is neither owner nor protocol")
            }
            MarketError::PendingCrank { order_id } => {
                write!(
                    f,
                    "order {order_id} is matched and awaiting the crank; cannot cancel"
                )
            }
            MarketError::NoMarketAccount { key } => {
                write!(f, "no market account open for {key}")
            }
            MarketError::AccountExists { key } => {
                write!(f, "market account already open for {key}")
            }
            MarketError::PriceStoreElemNotFound { price } => {
                write!(f, "price store element not found at {price}")
            }
            MarketError::TreeElemDoesNotExist { price } => {
                write!(f, "tree element does not exist at {price}")
            }
            MarketError::CacheItemNotFound { price } => {
                write!(f, "cache item not found at {price}")
            }
            MarketError::CrankUnfulfilledQty {
                taker_order_id,
                missing,
            } => {
                write!(
                    f,
                    "crank could not settle {missing} for taker {taker_order_id}"
                )
            }
            MarketError::Fp(err) => write!(f, "fixed-point error: {err}"),
        }
    }
}

impl std::error::Error for MarketError {}

impl From<FpError> for MarketError {
    fn from(err: FpError) -> Self {
        MarketError::Fp(err)
    }
}

impl From<CoinError> for MarketError {
    fn from(err: CoinError) -> Self {
        MarketError::Coin(err)
    }
}
