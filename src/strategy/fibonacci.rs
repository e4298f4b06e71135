//! Fibonacci retracement analysis
//!
//! Uses the two most recent pivots as the swing. Low then High is a Long
//! setup (buy the pullback), High then Low is a Short setup. Levels are
//! measured from the newer pivot back toward the older one.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::elliott::ElliottContext;
use super::pivots::{Pivot, PivotKind};
use crate::error::GeometryError;
use crate::types::{Candle, Direction};

/// Extension used for the second take-profit
pub const EXTENSION_RATIO: f64 = 1.618;

/// Retracement levels in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FibLevel {
    R382,
    R500,
    R618,
}

impl FibLevel {
    /// First level within proximity wins, checked in this order
    pub const RULES: [FibLevel; 3] = [FibLevel::R382, FibLevel::R500, FibLevel::R618];

    pub fn ratio(&self) -> f64 {
        match self {
            FibLevel::R382 => 0.382,
            FibLevel::R500 => 0.5,
            FibLevel::R618 => 0.618,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FibLevel::R382 => "0.382",
            FibLevel::R500 => "0.500",
            FibLevel::R618 => "0.618",
        }
    }
}

impl fmt::Display for FibLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Entry setup found near a retracement level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciCandidate {
    pub direction: Direction,
    pub pivot_low: Pivot,
    pub pivot_high: Pivot,
    pub level: FibLevel,
    /// Price of the retracement level; used as the entry
    pub target_price: f64,
    /// Last close at analysis time
    pub current_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    /// Distance of the current price from the level (fraction)
    pub distance_pct: f64,
    pub immediate: bool,
    /// Volume of the older (originating) pivot
    pub pivot_volume: f64,
    pub elliott_context: ElliottContext,
}

impl FibonacciCandidate {
    /// Elliott wave-3 start pointing the same way as the trade
    pub fn has_wave3_confluence(&self) -> bool {
        self.elliott_context.confirms(self.direction)
    }
}

/// Swing geometry shared by every level of one setup
struct Swing {
    direction: Direction,
    low: Pivot,
    high: Pivot,
    origin_volume: f64,
    stop_loss: f64,
    take_profit_1: f64,
    take_profit_2: f64,
}

impl Swing {
    fn from_pivots(
        older: &Pivot,
        newer: &Pivot,
        stop_loss_buffer: f64,
    ) -> Option<Result<Self, GeometryError>> {
        let (direction, low, high) = match (older.kind, newer.kind) {
            (PivotKind::Low, PivotKind::High) => (Direction::Long, *older, *newer),
            (PivotKind::High, PivotKind::Low) => (Direction::Short, *newer, *older),
            _ => return None,
        };

        let range = high.price - low.price;
        if range <= 0.0 {
            return Some(Err(GeometryError::ZeroSwingRange));
        }

        let (stop_loss, take_profit_1, take_profit_2) = match direction {
            Direction::Long => (
                low.price * (1.0 - stop_loss_buffer),
                high.price,
                high.price + range * EXTENSION_RATIO,
            ),
            Direction::Short => (
                high.price * (1.0 + stop_loss_buffer),
                low.price,
                low.price - range * EXTENSION_RATIO,
            ),
        };
        if take_profit_2 <= 0.0 {
            return Some(Err(GeometryError::NonPositiveTarget(take_profit_2)));
        }

        Some(Ok(Self {
            direction,
            low,
            high,
            origin_volume: older.volume,
            stop_loss,
            take_profit_1,
            take_profit_2,
        }))
    }

    fn level_price(&self, level: FibLevel) -> f64 {
        let range = self.high.price - self.low.price;
        match self.direction {
            Direction::Long => self.high.price - range * level.ratio(),
            Direction::Short => self.low.price + range * level.ratio(),
        }
    }
}

/// Look for an entry near a retracement level of the latest swing.
///
/// Returns `None` when fewer than two pivots exist, when the last two
/// pivots do not form a swing, on degenerate geometry, or when the price is
/// not close to any level.
pub fn analyze(
    candles: &[Candle],
    pivots: &[Pivot],
    stop_loss_buffer: f64,
    proximity_pct: f64,
    elliott: &ElliottContext,
) -> Option<FibonacciCandidate> {
    let (older, newer) = match pivots {
        [.., older, newer] => (older, newer),
        _ => return None,
    };
    let current_price = candles.last()?.close;

    let swing = match Swing::from_pivots(older, newer, stop_loss_buffer)? {
        Ok(swing) => swing,
        Err(e) => {
            tracing::debug!(error = %e, "Fibonacci: degenerate swing skipped");
            return None;
        }
    };

    FibLevel::RULES.iter().find_map(|&level| {
        let target = swing.level_price(level);
        if target <= 0.0 {
            return None;
        }
        let distance = (current_price - target).abs() / target;
        if distance > proximity_pct {
            return None;
        }
        Some(FibonacciCandidate {
            direction: swing.direction,
            pivot_low: swing.low,
            pivot_high: swing.high,
            level,
            target_price: target,
            current_price,
            stop_loss: swing.stop_loss,
            take_profit_1: swing.take_profit_1,
            take_profit_2: swing.take_profit_2,
            distance_pct: distance,
            immediate: true,
            pivot_volume: swing.origin_volume,
            elliott_context: *elliott,
        })
    })
}
