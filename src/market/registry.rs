//! Market registry with centralized execution-event routing.
//!
//! Markets are independent values; the registry is the explicit handle a
//! deployment passes around instead of process-global state. It records
//! which markets exist and hands each one an execution listener that tags
//! fills with the market symbol and forwards them into one shared channel,
//! with implementations for standard library (`MarketRegistryStd`) and
//! Tokio (`MarketRegistryTokio`) channels.

use super::events::{ExecutionListener, IndexingExecutionEvent};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Static description of a registered market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketDescriptor {
    /// Symbol the deployment routes by, e.g. `"APT/USDC"`.
    pub symbol: String,
    /// Ticker of the instrument coin.
    pub instrument_type: &'static str,
    /// Ticker of the quote coin.
    pub quote_type: &'static str,
    /// Decimal places accepted on quantities.
    pub instrument_decimals: u8,
    /// Decimal places accepted on prices.
    pub quote_decimals: u8,
}

/// A settled fill tagged with the market it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedExecution {
    pub symbol: String,
    pub event: IndexingExecutionEvent,
}

/// Interface of a market registry, independent of the channel flavor.
pub trait MarketRegistry {
    /// Record a market and return the listener to install as its
    /// `execution_listener`.
    fn register_market(&self, descriptor: MarketDescriptor) -> ExecutionListener;

    /// Descriptor for a symbol, if registered.
    fn descriptor(&self, symbol: &str) -> Option<MarketDescriptor>;

    /// All registered symbols.
    fn symbols(&self) -> Vec<String>;

    fn has_market(&self, symbol: &str) -> bool;

    fn market_count(&self) -> usize;
}

/// Registry routing execution events through a standard library channel.
pub struct MarketRegistryStd {
    markets: DashMap<String, MarketDescriptor>,
    sender: std::sync::mpsc::Sender<RoutedExecution>,
    receiver: std::sync::Mutex<Option<std::sync::mpsc::Receiver<RoutedExecution>>>,
}

impl MarketRegistryStd {
    pub fn new() -> Self {
        let (sender, receiver) = std::sync::mpsc::channel();
        Self {
            markets: DashMap::new(),
            sender,
            receiver: std::sync::Mutex::new(Some(receiver)),
        }
    }

    /// Take the receiving end of the routed-event channel. Yields `None`
    /// after the first call.
    pub fn take_receiver(&self) -> Option<std::sync::mpsc::Receiver<RoutedExecution>> {
        self.receiver.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Drain routed events on a dedicated thread, logging each fill.
    ///
    /// # Panics
    /// Panics when the processor was already started.
    pub fn start_event_processor(&self) -> std::thread::JoinHandle<()> {
        let receiver = self
            .take_receiver()
            .expect("event processor already started");
        std::thread::spawn(move || {
            info!("execution event processor started");
            while let Ok(routed) = receiver.recv() {
                info!(
                    symbol = %routed.symbol,
                    price = %routed.event.price,
                    qty = %routed.event.qty,
                    "fill routed"
                );
            }
            info!("execution event processor stopped");
        })
    }
}

impl Default for MarketRegistryStd {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketRegistry for MarketRegistryStd {
    fn register_market(&self, descriptor: MarketDescriptor) -> ExecutionListener {
        let symbol = descriptor.symbol.clone();
        let sender = self.sender.clone();
        self.markets.insert(symbol.clone(), descriptor);
        info!(%symbol, "market registered");
        Arc::new(move |event: &IndexingExecutionEvent| {
            let routed = RoutedExecution {
                symbol: symbol.clone(),
                event: event.clone(),
            };
            if let Err(e) = sender.send(routed) {
                error!(%symbol, "failed to route execution event: {e}");
            }
        })
    }

    fn descriptor(&self, symbol: &str) -> Option<MarketDescriptor> {
        self.markets.get(symbol).map(|entry| entry.value().clone())
    }

    fn symbols(&self) -> Vec<String> {
        self.markets.iter().map(|entry| entry.key().clone()).collect()
    }

    fn has_market(&self, symbol: &str) -> bool {
        self.markets.contains_key(symbol)
    }

    fn market_count(&self) -> usize {
        self.markets.len()
    }
}

/// Registry routing execution events through a Tokio broadcast channel,
/// for deployments with several async consumers (indexer, feeds).
pub struct MarketRegistryTokio {
    markets: DashMap<String, MarketDescriptor>,
    sender: tokio::sync::broadcast::Sender<RoutedExecution>,
}

impl MarketRegistryTokio {
    /// `capacity` bounds the broadcast backlog per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self {
            markets: DashMap::new(),
            sender,
        }
    }

    /// Subscribe to the routed execution stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RoutedExecution> {
        self.sender.subscribe()
    }
}

impl MarketRegistry for MarketRegistryTokio {
    fn register_market(&self, descriptor: MarketDescriptor) -> ExecutionListener {
        let symbol = descriptor.symbol.clone();
        let sender = self.sender.clone();
        self.markets.insert(symbol.clone(), descriptor);
        info!(%symbol, "market registered");
        Arc::new(move |event: &IndexingExecutionEvent| {
            let routed = RoutedExecution {
                symbol: symbol.clone(),
                event: event.clone(),
            };
            // Send fails only with zero subscribers, which is fine: nobody
            // is listening yet.
            let _ = sender.send(routed);
        })
    }

    fn descriptor(&self, symbol: &str) -> Option<MarketDescriptor> {
        self.markets.get(symbol).map(|entry| entry.value().clone())
    }

    fn symbols(&self) -> Vec<String> {
        self.markets.iter().map(|entry| entry.key().clone()).collect()
    }

    fn has_market(&self, symbol: &str) -> bool {
        self.markets.contains_key(symbol)
    }

    fn market_count(&self) -> usize {
        self.markets.len()
    }
}
