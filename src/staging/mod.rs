//! Staged momentum signals
//!
//! Owns the per-symbol lifecycle of momentum pullbacks across the 5m, 15m
//! and 4h tiers:
//!
//! ```text
//! Absent -> Pending(5m) -> Position(5m) -(TP)-> Pending(15m) -> Position(15m)
//!        -(dynamic TP)-> Pending(4h) -> Position(4h) -> Absent
//! ```
//!
//! A symbol has at most one pending signal or open position reference at
//! any time. Both maps are keyed by symbol, and every transition removes the
//! old record before inserting the new one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::StagingConfig;
use crate::error::StagingError;
use crate::types::{Side, Timeframe, TpMode};

/// One rung of the escalation ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Tier5m,
    Tier15m,
    Tier4h,
}

impl Tier {
    /// Evaluation order within a cycle
    pub const ALL: [Tier; 3] = [Tier::Tier5m, Tier::Tier15m, Tier::Tier4h];

    /// Timeframe the RSI crossover is evaluated on
    pub fn timeframe(&self) -> Timeframe {
        match self {
            Tier::Tier5m => Timeframe::Min5,
            Tier::Tier15m => Timeframe::Min15,
            Tier::Tier4h => Timeframe::Hour4,
        }
    }

    /// Tier a take-profit closure promotes to
    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Tier5m => Some(Tier::Tier15m),
            Tier::Tier15m => Some(Tier::Tier4h),
            Tier::Tier4h => None,
        }
    }

    pub fn tp_mode(&self) -> TpMode {
        match self {
            Tier::Tier5m => TpMode::Fixed,
            Tier::Tier15m | Tier::Tier4h => TpMode::DynamicRsi,
        }
    }

    /// Strategy label attached to orders and journal rows
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Tier5m => "momentum_pullback_5m",
            Tier::Tier15m => "momentum_pullback_15m",
            Tier::Tier4h => "momentum_pullback_4h",
        }
    }

    pub fn timeout(&self, config: &StagingConfig) -> Duration {
        let mins = match self {
            Tier::Tier5m => config.tier5m_timeout_mins,
            Tier::Tier15m => config.tier15m_timeout_mins,
            Tier::Tier4h => config.tier4h_timeout_mins,
        };
        Duration::minutes(mins)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.timeframe().as_str())
    }
}

/// Waiting for an RSI crossover on its tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSignal {
    pub symbol: String,
    pub tier: Tier,
    /// When this tier's wait started
    pub created_at: DateTime<Utc>,
    /// Set when the signal came from a promotion
    pub promoted_at: Option<DateTime<Utc>>,
    pub strategy_label: String,
    /// When the symbol first entered the ladder
    pub ladder_started_at: DateTime<Utc>,
}

/// Live position opened from a confirmed signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPositionRef {
    pub symbol: String,
    pub tier_of_origin: Tier,
    pub tp_mode: TpMode,
    pub side: Side,
    pub entry_price: f64,
    /// Order notional in quote currency
    pub notional: f64,
    pub opened_at: DateTime<Utc>,
    pub ladder_started_at: DateTime<Utc>,
}

/// Result of offering a scanner candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Tracked,
    AlreadyPending,
    LivePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    Timeout,
    LadderReset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expired {
    pub signal: PendingSignal,
    pub reason: ExpiryReason,
}

/// How a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureKind {
    /// Fixed take-profit hit on the exchange
    TakeProfit,
    /// Closed by the RSI exit rule
    DynamicTakeProfit,
    StopLoss,
}

impl ClosureKind {
    pub fn is_take_profit(&self) -> bool {
        matches!(self, ClosureKind::TakeProfit | ClosureKind::DynamicTakeProfit)
    }

    /// Journal close reason
    pub fn reason(&self) -> &'static str {
        match self {
            ClosureKind::TakeProfit => "TAKE_PROFIT",
            ClosureKind::DynamicTakeProfit => "DYNAMIC_TP",
            ClosureKind::StopLoss => "STOP_LOSS",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub position: OpenPositionRef,
    pub promoted_to: Option<Tier>,
}

/// Protective levels for a confirmed entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitPlan {
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
    pub tp_mode: TpMode,
}

/// RSI crossing up through `level`
pub fn is_crossover(prev: f64, curr: f64, level: f64) -> bool {
    prev <= level && curr > level && curr > prev
}

pub struct StagedSignalStateMachine {
    config: StagingConfig,
    pending: HashMap<String, PendingSignal>,
    positions: HashMap<String, OpenPositionRef>,
}

impl StagedSignalStateMachine {
    pub fn new(config: StagingConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Offer a scanner candidate; only absent symbols enter the 5m tier
    pub fn track_candidate(
        &mut self,
        symbol: &str,
        live_positions: &[String],
        now: DateTime<Utc>,
    ) -> TrackOutcome {
        if self.pending.contains_key(symbol) {
            return TrackOutcome::AlreadyPending;
        }
        if self.positions.contains_key(symbol) || live_positions.iter().any(|s| s == symbol) {
            return TrackOutcome::LivePosition;
        }

        let tier = Tier::Tier5m;
        self.pending.insert(
            symbol.to_string(),
            PendingSignal {
                symbol: symbol.to_string(),
                tier,
                created_at: now,
                promoted_at: None,
                strategy_label: tier.label().to_string(),
                ladder_started_at: now,
            },
        );
        tracing::info!(symbol = %symbol, tier = %tier, "Staging: signal pending");
        TrackOutcome::Tracked
    }

    /// Drop pending signals past their tier timeout or ladder age
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<Expired> {
        let ladder_age = Duration::hours(self.config.ladder_reset_hours);
        let mut expired = Vec::new();

        let mut symbols: Vec<String> = self.pending.keys().cloned().collect();
        symbols.sort();
        for symbol in symbols {
            let Some(signal) = self.pending.get(&symbol) else {
                continue;
            };
            let reason = if now - signal.ladder_started_at >= ladder_age {
                Some(ExpiryReason::LadderReset)
            } else if now - signal.created_at >= signal.tier.timeout(&self.config) {
                Some(ExpiryReason::Timeout)
            } else {
                None
            };

            if let Some(reason) = reason {
                if let Some(signal) = self.pending.remove(&symbol) {
                    tracing::info!(
                        symbol = %signal.symbol,
                        tier = %signal.tier,
                        reason = ?reason,
                        "Staging: pending signal expired"
                    );
                    expired.push(Expired { signal, reason });
                }
            }
        }
        expired
    }

    /// Pending signals waiting on `tier`, ordered by symbol
    pub fn pending_in_tier(&self, tier: Tier) -> Vec<PendingSignal> {
        let mut signals: Vec<PendingSignal> = self
            .pending
            .values()
            .filter(|s| s.tier == tier)
            .cloned()
            .collect();
        signals.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        signals
    }

    pub fn pending(&self, symbol: &str) -> Option<&PendingSignal> {
        self.pending.get(symbol)
    }

    pub fn position(&self, symbol: &str) -> Option<&OpenPositionRef> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> Vec<OpenPositionRef> {
        let mut positions: Vec<OpenPositionRef> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    /// Positions whose take-profit is the RSI exit rule
    pub fn dynamic_positions(&self) -> Vec<OpenPositionRef> {
        self.positions()
            .into_iter()
            .filter(|p| p.tp_mode == TpMode::DynamicRsi)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Stop/target policy of a tier
    pub fn exit_plan(&self, tier: Tier, entry: f64, atr: Option<f64>) -> ExitPlan {
        let cfg = &self.config;
        match tier.tp_mode() {
            TpMode::Fixed => ExitPlan {
                stop_loss: entry * (1.0 - cfg.fixed_stop_loss_pct),
                take_profit: Some(entry * (1.0 + cfg.fixed_take_profit_pct)),
                tp_mode: TpMode::Fixed,
            },
            TpMode::DynamicRsi => {
                let fallback = entry * (1.0 - cfg.fallback_stop_pct);
                let stop_loss = match atr {
                    Some(atr) if atr.is_finite() && atr > 0.0 => {
                        let candidate = entry - cfg.atr_stop_multiplier * atr;
                        if candidate > 0.0 && candidate < entry {
                            candidate
                        } else {
                            fallback
                        }
                    }
                    _ => fallback,
                };
                ExitPlan {
                    stop_loss,
                    take_profit: None,
                    tp_mode: TpMode::DynamicRsi,
                }
            }
        }
    }

    /// Drop a pending signal without opening a position
    pub fn discard_pending(&mut self, symbol: &str) -> Option<PendingSignal> {
        self.pending.remove(symbol)
    }

    /// Confirmed entry was placed: pending becomes a position
    pub fn record_fill(
        &mut self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        notional: f64,
        now: DateTime<Utc>,
    ) -> Result<OpenPositionRef, StagingError> {
        if self.positions.contains_key(symbol) {
            return Err(StagingError::AlreadyTracked(symbol.to_string()));
        }
        let signal = self
            .pending
            .remove(symbol)
            .ok_or_else(|| StagingError::NotPending(symbol.to_string()))?;

        let position = OpenPositionRef {
            symbol: symbol.to_string(),
            tier_of_origin: signal.tier,
            tp_mode: signal.tier.tp_mode(),
            side,
            entry_price,
            notional,
            opened_at: now,
            ladder_started_at: signal.ladder_started_at,
        };
        self.positions.insert(symbol.to_string(), position.clone());
        tracing::info!(
            symbol = %symbol,
            tier = %signal.tier,
            entry = entry_price,
            "Staging: position opened"
        );
        Ok(position)
    }

    /// Position is gone; promote on a take-profit closure.
    ///
    /// Returns `None` when the symbol had no position reference.
    pub fn record_closure(
        &mut self,
        symbol: &str,
        kind: ClosureKind,
        now: DateTime<Utc>,
    ) -> Option<Closure> {
        let position = self.positions.remove(symbol)?;

        let promoted_to = if kind.is_take_profit() {
            position.tier_of_origin.next()
        } else {
            None
        };

        if let Some(tier) = promoted_to {
            self.pending.insert(
                symbol.to_string(),
                PendingSignal {
                    symbol: symbol.to_string(),
                    tier,
                    created_at: now,
                    promoted_at: Some(now),
                    strategy_label: tier.label().to_string(),
                    ladder_started_at: position.ladder_started_at,
                },
            );
        }

        tracing::info!(
            symbol = %symbol,
            origin = %position.tier_of_origin,
            kind = ?kind,
            promoted_to = ?promoted_to,
            "Staging: position closed"
        );
        Some(Closure {
            position,
            promoted_to,
        })
    }
}
