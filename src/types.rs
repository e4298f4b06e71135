//! Core types used throughout fibscan
//!
//! Defines common data structures for candles, tickers, orders and the
//! events handed to the notification and metrics collaborators.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle intervals used by the scanners and the tier ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    /// Get duration in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            Timeframe::Min5 => 5 * 60,
            Timeframe::Min15 => 15 * 60,
            Timeframe::Hour1 => 60 * 60,
            Timeframe::Hour4 => 4 * 60 * 60,
            Timeframe::Day1 => 24 * 60 * 60,
        }
    }

    /// Interval code shared by Binance and most CEX REST APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "5m" | "5min" => Some(Timeframe::Min5),
            "15m" | "15min" => Some(Timeframe::Min15),
            "1h" | "1hour" => Some(Timeframe::Hour1),
            "4h" | "4hour" => Some(Timeframe::Hour4),
            "1d" | "1day" => Some(Timeframe::Day1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade direction of a setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Order side that opens a position in this direction
    pub fn entry_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Exchange order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Side::Buy => Direction::Long,
            Side::Sell => Direction::Short,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time (start of period, Unix ms)
    pub open_time: i64,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Volume in base currency
    pub volume: f64,
}

/// 24h ticker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    /// 24h price change in percent (5.0 = +5%)
    pub change_24h_pct: f64,
    /// 24h volume in base currency
    pub volume: f64,
    /// 24h volume in quote currency
    pub quote_volume: f64,
}

/// Lot/price constraints of a tradable instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRules {
    pub qty_step: Decimal,
    pub min_qty: Decimal,
    pub tick_size: Decimal,
}

/// How a position's take-profit is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TpMode {
    /// Take-profit is attached to the order and handled by the exchange
    Fixed,
    /// Take-profit is decided by the RSI exit rule
    DynamicRsi,
}

/// Sizing inputs kept alongside an order for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingMetadata {
    pub balance: Decimal,
    pub risk_fraction: Decimal,
    pub risk_capital: Decimal,
    pub leverage: Decimal,
    pub notional: Decimal,
    /// Reference price the quantity was sized against
    pub entry_price: Decimal,
}

/// Bounded order handed to the execution collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Option<Decimal>,
    pub strategy_label: String,
    pub sizing: SizingMetadata,
}

/// Execution result: exchange order id or error message
pub type OrderResult = Result<String, String>;

/// Realized result of one closing fill as published by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPnl {
    pub symbol: String,
    pub pnl: f64,
    pub closed_at: DateTime<Utc>,
}

/// What happened to an order attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderOutcome {
    /// Order accepted by the exchange
    Placed,
    /// Pending signal checked, no confirmation found
    Ignored,
    /// Signal geometry or account state makes the order unsafe
    Rejected,
    /// Risk governor is paused
    Blocked,
    /// Exchange refused or failed the request
    Failed,
}

impl fmt::Display for OrderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderOutcome::Placed => write!(f, "PLACED"),
            OrderOutcome::Ignored => write!(f, "IGNORED"),
            OrderOutcome::Rejected => write!(f, "REJECTED"),
            OrderOutcome::Blocked => write!(f, "BLOCKED"),
            OrderOutcome::Failed => write!(f, "FAILED"),
        }
    }
}

/// Stage a momentum alert refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumStage {
    /// Symbol entered the 5m tier
    Discovered,
    /// RSI crossover confirmed on the tier timeframe
    Confirmed,
}

/// Fibonacci opportunity as delivered to notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciAlert {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub level: String,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub probability: u8,
    pub wave_3_start: bool,
}

/// Momentum pullback alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumAlert {
    pub symbol: String,
    pub tier: String,
    pub stage: MomentumStage,
    pub price: f64,
    pub rsi: f64,
    pub change_24h_pct: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Events emitted for the notification collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalEvent {
    FibonacciAlert(FibonacciAlert),
    MomentumAlert(MomentumAlert),
    TpDynamicClose {
        symbol: String,
        tier: String,
        rsi: f64,
        promoted_to: Option<String>,
    },
    DrawdownAlert {
        reason: String,
        balance: f64,
        peak_equity: f64,
        drawdown: f64,
        consecutive_losses: u32,
    },
    OrderUpdate {
        symbol: String,
        strategy_label: String,
        outcome: OrderOutcome,
        detail: String,
    },
    Started {
        tag: String,
    },
    Stopped,
    CycleError {
        message: String,
    },
}

impl SignalEvent {
    /// Stable name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SignalEvent::FibonacciAlert(_) => "fibonacci_alert",
            SignalEvent::MomentumAlert(_) => "momentum_alert",
            SignalEvent::TpDynamicClose { .. } => "tp_dynamic_close",
            SignalEvent::DrawdownAlert { .. } => "drawdown_alert",
            SignalEvent::OrderUpdate { .. } => "order_update",
            SignalEvent::Started { .. } => "started",
            SignalEvent::Stopped => "stopped",
            SignalEvent::CycleError { .. } => "cycle_error",
        }
    }
}

/// Observability snapshot emitted after every cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub cycles_completed: u64,
    pub alerts_sent: u64,
    pub critical_errors: u64,
    /// Opportunities found in the last cycle
    pub opportunities_found: u64,
    pub orders_placed: u64,
    pub orders_ignored: u64,
    pub orders_rejected: u64,
    pub orders_blocked: u64,
    pub orders_failed: u64,
    pub trading_paused: bool,
}
