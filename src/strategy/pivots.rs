//! Swing pivot detection
//!
//! A candle is a Low pivot when its low is the minimum low of the symmetric
//! window `[i - r, i + r]`, and a High pivot when its high is the maximum high
//! of that window. The output always alternates High/Low.

use serde::{Deserialize, Serialize};

use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PivotKind {
    High,
    Low,
}

/// Local price extremum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub kind: PivotKind,
    pub price: f64,
    /// Volume of the pivot candle
    pub volume: f64,
    /// Index of the pivot candle in the source window
    pub index: usize,
}

/// Find alternating pivots in chronological order.
///
/// Fewer than `2r + 1` candles yields an empty sequence.
pub fn detect_pivots(candles: &[Candle], radius: usize) -> Vec<Pivot> {
    let mut pivots: Vec<Pivot> = Vec::new();
    if radius == 0 || candles.len() < 2 * radius + 1 {
        return pivots;
    }

    for i in radius..candles.len() - radius {
        let window = &candles[i - radius..=i + radius];
        let candle = &candles[i];

        let window_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let window_high = window
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);

        // A candle can be both; the low is recorded first
        if candle.low == window_low {
            push_alternating(&mut pivots, PivotKind::Low, candle.low, candle.volume, i);
        }
        if candle.high == window_high {
            push_alternating(&mut pivots, PivotKind::High, candle.high, candle.volume, i);
        }
    }

    pivots
}

/// Append a pivot, replacing the previous one if it has the same kind
fn push_alternating(
    pivots: &mut Vec<Pivot>,
    kind: PivotKind,
    price: f64,
    volume: f64,
    index: usize,
) {
    let pivot = Pivot {
        kind,
        price,
        volume,
        index,
    };
    match pivots.last_mut() {
        Some(last) if last.kind == kind => *last = pivot,
        _ => pivots.push(pivot),
    }
}
