//! Error taxonomy
//!
//! Data gaps are not errors here: collaborators return empty data and the
//! caller skips the symbol. What remains are the reasons an order is not
//! sent and the ways the staging state machine can refuse a transition.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{OrderOutcome, Side};

/// Why the governor stopped new orders
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PauseReason {
    MaxDrawdown { drawdown: f64, limit: f64 },
    ConsecutiveLosses { losses: u32, limit: u32 },
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::MaxDrawdown { drawdown, limit } => write!(
                f,
                "drawdown {:.2}% exceeded limit {:.2}%",
                drawdown * 100.0,
                limit * 100.0
            ),
            PauseReason::ConsecutiveLosses { losses, limit } => {
                write!(f, "{} consecutive losses (limit {})", losses, limit)
            }
        }
    }
}

/// Reasons the risk sizer refuses to emit an order
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("account balance unavailable or non-positive ({0:?})")]
    BalanceUnavailable(Option<f64>),
    #[error("instrument rules unavailable for {0}")]
    RulesUnavailable(String),
    #[error("invalid entry price {0}")]
    InvalidEntry(f64),
    #[error("computed quantity is not positive after rounding to step {step}")]
    NonPositiveQuantity { step: Decimal },
    #[error("quantity {quantity} below instrument minimum {min_qty}")]
    BelowMinimum { quantity: Decimal, min_qty: Decimal },
    #[error("stop-loss {stop_loss} is not on the loss side of entry {entry} for a {side} order")]
    InvalidStop {
        stop_loss: Decimal,
        entry: Decimal,
        side: Side,
    },
    #[error("take-profit {take_profit} is not on the profit side of entry {entry} for a {side} order")]
    InvalidTakeProfit {
        take_profit: Decimal,
        entry: Decimal,
        side: Side,
    },
    #[error("trading paused by risk governor: {0}")]
    GovernanceBlocked(PauseReason),
}

impl SizingError {
    /// Map to the operator-visible outcome class
    pub fn outcome(&self) -> OrderOutcome {
        match self {
            SizingError::GovernanceBlocked(_) => OrderOutcome::Blocked,
            _ => OrderOutcome::Rejected,
        }
    }

    /// Account or venue reads that can succeed on the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SizingError::BalanceUnavailable(_) | SizingError::RulesUnavailable(_)
        )
    }
}

/// Degenerate swing geometry found while building a Fibonacci setup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("swing range is zero")]
    ZeroSwingRange,
    #[error("extension target {0} is not a positive price")]
    NonPositiveTarget(f64),
}

/// State machine transition refusals
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StagingError {
    #[error("{0} has no pending signal")]
    NotPending(String),
    #[error("{0} already has a live position reference")]
    AlreadyTracked(String),
}
