//! Probability scoring for Fibonacci candidates
//!
//! Each qualifying feature adds points; the integer score maps through a
//! fixed table to a probability. A cross-timeframe confluence bonus is then
//! applied per symbol and the result capped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::fibonacci::{FibLevel, FibonacciCandidate};
use crate::config::ScoringConfig;
use crate::types::Timeframe;

/// Score (index) to probability percentage
pub const PROBABILITY_TABLE: [u8; 8] = [20, 35, 50, 65, 75, 85, 95, 99];

/// Feature rules, evaluated in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreRule {
    Level618,
    Level500,
    VolumeSpike,
    FourHour,
    ElliottWave3,
}

impl ScoreRule {
    pub const ALL: [ScoreRule; 5] = [
        ScoreRule::Level618,
        ScoreRule::Level500,
        ScoreRule::VolumeSpike,
        ScoreRule::FourHour,
        ScoreRule::ElliottWave3,
    ];

    pub fn points(&self) -> u8 {
        match self {
            ScoreRule::Level618 => 2,
            ScoreRule::Level500 => 1,
            ScoreRule::VolumeSpike => 1,
            ScoreRule::FourHour => 1,
            ScoreRule::ElliottWave3 => 3,
        }
    }
}

/// Inputs the rules look at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreFeatures {
    pub level: FibLevel,
    pub pivot_volume: f64,
    pub average_volume: Option<f64>,
    pub timeframe: Timeframe,
    pub elliott_confirmed: bool,
}

impl ScoreFeatures {
    pub fn from_candidate(
        candidate: &FibonacciCandidate,
        timeframe: Timeframe,
        average_volume: Option<f64>,
    ) -> Self {
        Self {
            level: candidate.level,
            pivot_volume: candidate.pivot_volume,
            average_volume,
            timeframe,
            elliott_confirmed: candidate.has_wave3_confluence(),
        }
    }
}

/// Scored candidate with its origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candidate: FibonacciCandidate,
    pub score: u8,
    /// Probability in percent, after confluence
    pub probability: u8,
    /// Discovery order within the cycle
    pub sequence: usize,
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Rules that fire for these features
    pub fn matched_rules(&self, features: &ScoreFeatures) -> Vec<ScoreRule> {
        ScoreRule::ALL
            .iter()
            .copied()
            .filter(|rule| self.rule_applies(*rule, features))
            .collect()
    }

    fn rule_applies(&self, rule: ScoreRule, f: &ScoreFeatures) -> bool {
        match rule {
            ScoreRule::Level618 => f.level == FibLevel::R618,
            ScoreRule::Level500 => f.level == FibLevel::R500,
            ScoreRule::VolumeSpike => f
                .average_volume
                .map(|avg| f.pivot_volume > avg * self.config.volume_spike_multiplier)
                .unwrap_or(false),
            ScoreRule::FourHour => f.timeframe == Timeframe::Hour4,
            ScoreRule::ElliottWave3 => f.elliott_confirmed,
        }
    }

    pub fn score(&self, features: &ScoreFeatures) -> u8 {
        self.matched_rules(features)
            .iter()
            .map(ScoreRule::points)
            .sum()
    }

    pub fn probability(score: u8) -> u8 {
        let idx = (score as usize).min(PROBABILITY_TABLE.len() - 1);
        PROBABILITY_TABLE[idx]
    }

    /// Apply the confluence bonus, filter and sort.
    ///
    /// Every candidate of a symbol with `n` candidates this cycle gains
    /// `(n - 1) * bonus` points, capped. Survivors are immediate and at or
    /// above the minimum probability, sorted by probability descending with
    /// later discoveries first on ties.
    pub fn rank(&self, mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        let mut per_symbol: HashMap<String, u32> = HashMap::new();
        for c in &candidates {
            *per_symbol.entry(c.symbol.clone()).or_insert(0) += 1;
        }

        for c in candidates.iter_mut() {
            let extra = per_symbol.get(&c.symbol).copied().unwrap_or(1).saturating_sub(1);
            let bonus = extra.saturating_mul(self.config.confluence_bonus as u32);
            let base = Self::probability(c.score) as u32;
            c.probability = base
                .saturating_add(bonus)
                .min(self.config.probability_cap as u32) as u8;
        }

        candidates.retain(|c| {
            c.candidate.immediate && c.probability >= self.config.min_probability
        });
        candidates.sort_by(|a, b| {
            b.probability
                .cmp(&a.probability)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        candidates
    }
}
