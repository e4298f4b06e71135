//! Momentum pullback scanner
//!
//! Takes the strongest 24h performers and flags those whose short-term RSI
//! has pulled back into oversold territory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{MomentumConfig, UniverseConfig};
use crate::exchange::MarketData;
use crate::features;
use crate::types::{Candle, Ticker, Timeframe};

/// Oversold top performer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumCandidate {
    pub symbol: String,
    pub change_24h_pct: f64,
    pub rsi_14: f64,
    pub price: f64,
    /// Indicative ATR stop for the alert
    pub stop_loss: Option<f64>,
    /// Indicative ATR target for the alert
    pub take_profit: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

pub struct MomentumScanner {
    config: MomentumConfig,
    universe: UniverseConfig,
    request_pause: Duration,
}

impl MomentumScanner {
    pub fn new(config: MomentumConfig, universe: UniverseConfig, request_pause: Duration) -> Self {
        Self {
            config,
            universe,
            request_pause,
        }
    }

    /// Eligible symbols above the change threshold, best first
    pub fn rank_performers(&self, tickers: &[Ticker]) -> Vec<Ticker> {
        let mut eligible: Vec<Ticker> = tickers
            .iter()
            .filter(|t| self.universe.is_eligible(&t.symbol))
            .filter(|t| t.change_24h_pct.is_finite())
            .filter(|t| t.change_24h_pct > self.config.min_change_24h_pct)
            .cloned()
            .collect();

        eligible.sort_by(|a, b| b.change_24h_pct.total_cmp(&a.change_24h_pct));
        eligible.truncate(self.config.top_performers);
        eligible
    }

    /// Old enough to trade: at least `min_age_days` daily candles
    pub fn is_seasoned(&self, daily: &[Candle]) -> bool {
        daily.len() >= self.config.min_age_days
    }

    /// Check a ranked ticker against its 5m candles
    pub fn evaluate(
        &self,
        ticker: &Ticker,
        candles_5m: &[Candle],
        now: DateTime<Utc>,
    ) -> Option<MomentumCandidate> {
        let rsi = features::rsi(candles_5m, self.config.rsi_period)?;
        if rsi >= self.config.rsi_oversold {
            return None;
        }
        let price = candles_5m.last()?.close;
        let atr = features::atr(candles_5m, self.config.atr_period);

        Some(MomentumCandidate {
            symbol: ticker.symbol.clone(),
            change_24h_pct: ticker.change_24h_pct,
            rsi_14: rsi,
            price,
            stop_loss: atr
                .map(|a| price - self.config.alert_stop_atr_multiplier * a)
                .filter(|sl| *sl > 0.0),
            take_profit: atr.map(|a| price + self.config.alert_take_profit_atr_multiplier * a),
            observed_at: now,
        })
    }

    /// Full scan against a market data source
    pub async fn scan<M: MarketData + ?Sized>(
        &self,
        market: &M,
        now: DateTime<Utc>,
    ) -> Vec<MomentumCandidate> {
        let tickers = match market.tickers().await {
            Ok(tickers) => tickers,
            Err(e) => {
                tracing::warn!(error = %e, "Momentum: ticker fetch failed, skipping scan");
                return Vec::new();
            }
        };

        let performers = self.rank_performers(&tickers);
        if performers.is_empty() {
            tracing::info!("Momentum: no eligible performers");
            return Vec::new();
        }
        tracing::info!(count = performers.len(), "Momentum: scanning top performers");

        let mut candidates = Vec::new();
        let total = performers.len();
        for (i, ticker) in performers.iter().enumerate() {
            tracing::debug!(
                symbol = %ticker.symbol,
                progress = %format!("{}/{}", i + 1, total),
                change_24h = ticker.change_24h_pct,
                "Momentum: analyzing"
            );

            let daily = market
                .candles(&ticker.symbol, Timeframe::Day1, self.config.min_age_days + 1)
                .await;
            if !self.is_seasoned(&daily) {
                tracing::debug!(symbol = %ticker.symbol, days = daily.len(), "Momentum: listing too recent");
                continue;
            }

            let candles = market
                .candles(&ticker.symbol, Timeframe::Min5, self.config.candle_limit)
                .await;
            if let Some(candidate) = self.evaluate(ticker, &candles, now) {
                tracing::info!(
                    symbol = %candidate.symbol,
                    rsi = %format!("{:.2}", candidate.rsi_14),
                    change_24h = candidate.change_24h_pct,
                    "Momentum: oversold pullback found"
                );
                candidates.push(candidate);
            }

            if !self.request_pause.is_zero() {
                tokio::time::sleep(self.request_pause).await;
            }
        }

        candidates
    }
}
