//! Drawdown governor
//!
//! Circuit breaker over account equity. Trips on a drawdown from peak above
//! the configured maximum or on a run of consecutive losing trades. Once
//! tripped it stays paused until `reset` is called.

use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;
use crate::error::PauseReason;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownState {
    /// First balance observed
    pub initial_equity: Option<f64>,
    /// Highest balance observed; never decreases
    pub peak_equity: f64,
    pub last_balance: Option<f64>,
    pub consecutive_losses: u32,
    pub paused: bool,
    pub pause_reason: Option<PauseReason>,
}

impl DrawdownState {
    /// Fractional decline of the last balance from peak
    pub fn drawdown(&self) -> f64 {
        match self.last_balance {
            Some(balance) if self.peak_equity > 0.0 => {
                ((self.peak_equity - balance) / self.peak_equity).max(0.0)
            }
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DrawdownGovernor {
    max_drawdown: f64,
    max_consecutive_losses: u32,
    state: DrawdownState,
}

impl DrawdownGovernor {
    pub fn new(max_drawdown: f64, max_consecutive_losses: u32) -> Self {
        Self {
            max_drawdown,
            max_consecutive_losses,
            state: DrawdownState::default(),
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.max_drawdown, config.max_consecutive_losses)
    }

    /// Feed the latest balance. Returns the reason if this call tripped the breaker.
    pub fn observe_balance(&mut self, balance: f64) -> Option<PauseReason> {
        if !balance.is_finite() {
            tracing::warn!(balance = balance, "Governor: ignoring non-finite balance");
            return None;
        }

        let state = &mut self.state;
        if state.initial_equity.is_none() {
            state.initial_equity = Some(balance);
        }
        state.last_balance = Some(balance);

        if balance > state.peak_equity {
            state.peak_equity = balance;
            state.consecutive_losses = 0;
        }

        let drawdown = state.drawdown();
        if drawdown > self.max_drawdown {
            return self.pause(PauseReason::MaxDrawdown {
                drawdown,
                limit: self.max_drawdown,
            });
        }
        None
    }

    /// Feed a realized trade result. Returns the reason if this call tripped the breaker.
    pub fn record_trade(&mut self, pnl: f64) -> Option<PauseReason> {
        if pnl < 0.0 {
            self.state.consecutive_losses += 1;
        } else {
            self.state.consecutive_losses = 0;
        }

        if self.max_consecutive_losses > 0
            && self.state.consecutive_losses >= self.max_consecutive_losses
        {
            return self.pause(PauseReason::ConsecutiveLosses {
                losses: self.state.consecutive_losses,
                limit: self.max_consecutive_losses,
            });
        }
        None
    }

    fn pause(&mut self, reason: PauseReason) -> Option<PauseReason> {
        if self.state.paused {
            return None;
        }
        self.state.paused = true;
        self.state.pause_reason = Some(reason);
        tracing::warn!(reason = %reason, "Governor: trading paused");
        Some(reason)
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.state.pause_reason
    }

    pub fn state(&self) -> &DrawdownState {
        &self.state
    }

    /// Operator reset: clears the pause and re-bases the peak on the last balance
    pub fn reset(&mut self) {
        let state = &mut self.state;
        state.paused = false;
        state.pause_reason = None;
        state.consecutive_losses = 0;
        if let Some(balance) = state.last_balance {
            state.peak_equity = balance;
        }
        tracing::info!(peak = state.peak_equity, "Governor: reset");
    }
}
