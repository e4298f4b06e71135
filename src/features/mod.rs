//! Technical indicators
//!
//! Stateless indicator functions over candle windows. Every function returns
//! `None` (or an empty series) when the window is too short instead of
//! erroring; callers treat that as "no data for this symbol".

use crate::types::Candle;

/// RSI from a pair of Wilder-smoothed averages
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss < 1e-12 && avg_gain < 1e-12 {
        return 50.0; // No movement = neutral
    }
    if avg_loss < 1e-12 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Wilder RSI for every close from index `period` onwards.
///
/// The first value is seeded with the simple average of the first `period`
/// changes; every later value uses Wilder's smoothing. The returned series
/// has `closes.len() - period` entries, the last one belonging to the most
/// recent close.
pub fn rsi_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        tracing::debug!(
            candle_count = candles.len(),
            required = period + 1,
            "RSI: Not enough candles"
        );
        return Vec::new();
    }

    let changes: Vec<f64> = candles
        .windows(2)
        .map(|pair| pair[1].close - pair[0].close)
        .collect();

    let mut gains = 0.0;
    let mut losses = 0.0;
    for change in &changes[..period] {
        if *change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }
    let p = period as f64;
    let mut avg_gain = gains / p;
    let mut avg_loss = losses / p;

    let mut series = Vec::with_capacity(changes.len() - period + 1);
    series.push(rsi_from_averages(avg_gain, avg_loss));

    for change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        series.push(rsi_from_averages(avg_gain, avg_loss));
    }

    series
}

/// RSI of the most recent close
pub fn rsi(candles: &[Candle], period: usize) -> Option<f64> {
    rsi_series(candles, period).last().copied()
}

/// RSI of the previous and the most recent close, in that order
pub fn rsi_pair(candles: &[Candle], period: usize) -> Option<(f64, f64)> {
    let series = rsi_series(candles, period);
    match series.as_slice() {
        [.., prev, curr] => Some((*prev, *curr)),
        _ => None,
    }
}

fn true_range(curr: &Candle, prev: &Candle) -> f64 {
    (curr.high - curr.low)
        .max((curr.high - prev.close).abs())
        .max((curr.low - prev.close).abs())
}

/// Wilder ATR of the most recent candle
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let tr_values: Vec<f64> = candles
        .windows(2)
        .map(|pair| true_range(&pair[1], &pair[0]))
        .collect();

    let p = period as f64;
    let mut value = tr_values[..period].iter().sum::<f64>() / p;
    for tr in &tr_values[period..] {
        value = (value * (p - 1.0) + tr) / p;
    }

    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Mean volume of the trailing `lookback` candles (all candles if fewer)
pub fn average_volume(candles: &[Candle], lookback: usize) -> Option<f64> {
    if candles.is_empty() || lookback == 0 {
        return None;
    }
    let start = candles.len().saturating_sub(lookback);
    let window = &candles[start..];
    Some(window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64)
}
