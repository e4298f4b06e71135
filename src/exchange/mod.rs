//! Exchange collaborators
//!
//! Ports the core consumes for market data and order execution, plus the
//! REST and paper adapters behind them.

pub mod binance;
pub mod bybit;
pub mod paper;

pub use binance::BinanceMarketData;
pub use bybit::BybitExecution;
pub use paper::PaperExecution;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    Candle, ClosedPnl, InstrumentRules, OrderRequest, OrderResult, Side, Ticker, Timeframe,
};

/// Read-only market data
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Last `limit` candles, oldest first. Empty on any failure.
    async fn candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle>;

    /// 24h statistics for every listed symbol
    async fn tickers(&self) -> Result<Vec<Ticker>>;
}

/// Order execution and account state
#[async_trait]
pub trait Execution: Send + Sync {
    /// Get the venue name
    fn name(&self) -> &'static str;

    /// Lot and price constraints; `None` when the symbol is not tradable
    async fn instrument_rules(&self, symbol: &str) -> Result<Option<InstrumentRules>>;

    /// Available quote balance; `None` when it cannot be read
    async fn account_balance(&self) -> Option<f64>;

    /// Symbols with a non-zero position
    async fn open_positions(&self) -> Result<Vec<String>>;

    /// Set leverage and submit a market order with its protective levels
    async fn place_order(&self, request: &OrderRequest) -> OrderResult;

    /// Close the whole position opened on `side` with a reduce-only order
    async fn close_position(&self, symbol: &str, side: Side) -> OrderResult;

    /// Closing records on `symbol` stamped at or after `since`, oldest first.
    /// Empty until the venue has published the close.
    async fn closed_pnl_since(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<ClosedPnl>>;
}
