//! Signal generation
//!
//! Pivot, Fibonacci, Elliott and scoring building blocks, the momentum
//! scanner, and the Fibonacci scanner that ties the first four together
//! across the liquidity universe.

pub mod elliott;
pub mod fibonacci;
pub mod momentum;
pub mod pivots;
pub mod scoring;

pub use elliott::{check_confluence, ElliottContext, ElliottLabel};
pub use fibonacci::{FibLevel, FibonacciCandidate};
pub use momentum::{MomentumCandidate, MomentumScanner};
pub use pivots::{detect_pivots, Pivot, PivotKind};
pub use scoring::{ScoreFeatures, ScoredCandidate, ScoringEngine};

use std::time::Duration;

use crate::config::{FibonacciConfig, ScoringConfig, UniverseConfig};
use crate::exchange::MarketData;
use crate::features;
use crate::types::{Candle, FibonacciAlert, Ticker, Timeframe};

impl ScoredCandidate {
    /// Operator-facing alert payload
    pub fn to_alert(&self) -> FibonacciAlert {
        let c = &self.candidate;
        FibonacciAlert {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            direction: c.direction,
            level: c.level.label().to_string(),
            entry: c.target_price,
            stop_loss: c.stop_loss,
            take_profit_1: c.take_profit_1,
            take_profit_2: c.take_profit_2,
            probability: self.probability,
            wave_3_start: c.has_wave3_confluence(),
        }
    }

    /// De-duplication key for alerts
    pub fn alert_key(&self) -> String {
        format!(
            "FIB-{}-{}-{}",
            self.symbol, self.timeframe, self.candidate.direction
        )
    }
}

/// Fibonacci + Elliott scan over the most liquid pairs
pub struct FibonacciScanner {
    config: FibonacciConfig,
    universe: UniverseConfig,
    scoring: ScoringEngine,
    volume_lookback: usize,
    request_pause: Duration,
}

impl FibonacciScanner {
    pub fn new(
        config: FibonacciConfig,
        scoring: ScoringConfig,
        universe: UniverseConfig,
        request_pause: Duration,
    ) -> Self {
        let volume_lookback = scoring.volume_lookback;
        Self {
            config,
            universe,
            scoring: ScoringEngine::new(scoring),
            volume_lookback,
            request_pause,
        }
    }

    /// Top `num_pairs` eligible symbols by quote volume
    pub fn liquidity_universe(&self, tickers: &[Ticker]) -> Vec<String> {
        let mut eligible: Vec<&Ticker> = tickers
            .iter()
            .filter(|t| self.universe.is_eligible(&t.symbol))
            .collect();
        eligible.sort_by(|a, b| b.quote_volume.total_cmp(&a.quote_volume));
        eligible
            .into_iter()
            .take(self.config.num_pairs)
            .map(|t| t.symbol.clone())
            .collect()
    }

    /// Run the pivot/Elliott/Fibonacci chain on one window and score it
    pub fn analyze_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
        sequence: usize,
    ) -> Option<ScoredCandidate> {
        let pivots = detect_pivots(candles, self.config.pivot_radius);
        if pivots.is_empty() {
            return None;
        }

        let elliott = check_confluence(&pivots);
        let candidate = fibonacci::analyze(
            candles,
            &pivots,
            self.config.stop_loss_buffer,
            self.config.proximity_pct,
            &elliott,
        )?;

        let average_volume = features::average_volume(candles, self.volume_lookback);
        let features = ScoreFeatures::from_candidate(&candidate, timeframe, average_volume);
        let score = self.scoring.score(&features);

        tracing::debug!(
            symbol = %symbol,
            timeframe = %timeframe,
            level = %candidate.level,
            direction = %candidate.direction,
            score = score,
            "Fibonacci: candidate near level"
        );

        Some(ScoredCandidate {
            symbol: symbol.to_string(),
            timeframe,
            candidate,
            score,
            probability: ScoringEngine::probability(score),
            sequence,
        })
    }

    /// Rank raw candidates of one cycle
    pub fn rank(&self, candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        self.scoring.rank(candidates)
    }

    /// Full scan: universe, candles per timeframe, ranking
    pub async fn scan<M: MarketData + ?Sized>(&self, market: &M) -> Vec<ScoredCandidate> {
        let tickers = match market.tickers().await {
            Ok(tickers) => tickers,
            Err(e) => {
                tracing::warn!(error = %e, "Fibonacci: ticker fetch failed, skipping scan");
                return Vec::new();
            }
        };
        let pairs = self.liquidity_universe(&tickers);
        if pairs.is_empty() {
            return Vec::new();
        }

        let total = pairs.len() * self.config.timeframes.len();
        tracing::info!(
            pairs = pairs.len(),
            timeframes = ?self.config.timeframes,
            total = total,
            "Fibonacci: scanning"
        );

        let mut raw = Vec::new();
        let mut sequence = 0usize;
        for symbol in &pairs {
            for &timeframe in &self.config.timeframes {
                let candles = market
                    .candles(symbol, timeframe, self.config.candle_limit)
                    .await;
                if candles.len() < self.config.pivot_radius * 2 {
                    continue;
                }
                if let Some(scored) = self.analyze_window(symbol, timeframe, &candles, sequence) {
                    raw.push(scored);
                    sequence += 1;
                }
                if !self.request_pause.is_zero() {
                    tokio::time::sleep(self.request_pause).await;
                }
            }
        }

        let ranked = self.rank(raw);
        tracing::info!(found = ranked.len(), "Fibonacci: scan complete");
        ranked
    }
}
