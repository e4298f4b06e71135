//! Paper execution venue
//!
//! In-memory balance and positions for dry runs. Fills happen at the sized
//! reference price; stops and targets are checked against the latest 5m
//! candle whenever positions are listed.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Execution, MarketData};
use crate::config::ExecutionConfig;
use crate::types::{
    Candle, ClosedPnl, InstrumentRules, OrderRequest, OrderResult, Side, Timeframe,
};

#[derive(Debug, Clone, PartialEq)]
struct PaperPosition {
    side: Side,
    quantity: f64,
    entry_price: f64,
    stop_loss: f64,
    take_profit: Option<f64>,
}

impl PaperPosition {
    fn pnl_at(&self, exit_price: f64) -> f64 {
        match self.side {
            Side::Buy => (exit_price - self.entry_price) * self.quantity,
            Side::Sell => (self.entry_price - exit_price) * self.quantity,
        }
    }

    /// Exit price if the candle touched the stop or the target. Stop wins ties.
    fn exit_on(&self, candle: &Candle) -> Option<f64> {
        match self.side {
            Side::Buy => {
                if candle.low <= self.stop_loss {
                    Some(self.stop_loss)
                } else {
                    self.take_profit.filter(|tp| candle.high >= *tp)
                }
            }
            Side::Sell => {
                if candle.high >= self.stop_loss {
                    Some(self.stop_loss)
                } else {
                    self.take_profit.filter(|tp| candle.low <= *tp)
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    balance: f64,
    positions: HashMap<String, PaperPosition>,
    closed: Vec<ClosedPnl>,
}

impl PaperState {
    fn realize(&mut self, symbol: &str, exit_price: f64) -> Option<f64> {
        let position = self.positions.remove(symbol)?;
        let pnl = position.pnl_at(exit_price);
        self.balance += pnl;
        self.closed.push(ClosedPnl {
            symbol: symbol.to_string(),
            pnl,
            closed_at: Utc::now(),
        });
        tracing::info!(
            symbol = %symbol,
            side = %position.side,
            entry = position.entry_price,
            exit = exit_price,
            pnl = %format!("{:.4}", pnl),
            balance = %format!("{:.2}", self.balance),
            "📝 Paper: position closed"
        );
        Some(pnl)
    }
}

pub struct PaperExecution {
    market: Arc<dyn MarketData>,
    rules: InstrumentRules,
    state: Mutex<PaperState>,
}

impl PaperExecution {
    pub fn new(market: Arc<dyn MarketData>, balance: f64, rules: InstrumentRules) -> Self {
        Self {
            market,
            rules,
            state: Mutex::new(PaperState {
                balance,
                ..Default::default()
            }),
        }
    }

    pub fn from_config(market: Arc<dyn MarketData>, config: &ExecutionConfig) -> Self {
        let to_dec = |v: f64| Decimal::from_f64(v).unwrap_or(Decimal::ZERO).normalize();
        let rules = InstrumentRules {
            qty_step: to_dec(config.paper_qty_step),
            min_qty: to_dec(config.paper_min_qty),
            tick_size: to_dec(config.paper_tick_size),
        };
        Self::new(market, config.paper_balance, rules)
    }

    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    async fn latest_candle(&self, symbol: &str) -> Option<Candle> {
        self.market
            .candles(symbol, Timeframe::Min5, 1)
            .await
            .into_iter()
            .last()
    }
}

#[async_trait]
impl Execution for PaperExecution {
    fn name(&self) -> &'static str {
        "Paper"
    }

    async fn instrument_rules(&self, _symbol: &str) -> Result<Option<InstrumentRules>> {
        Ok(Some(self.rules))
    }

    async fn account_balance(&self) -> Option<f64> {
        Some(self.state.lock().await.balance)
    }

    async fn open_positions(&self) -> Result<Vec<String>> {
        let held: Vec<(String, PaperPosition)> = {
            let state = self.state.lock().await;
            state
                .positions
                .iter()
                .map(|(s, p)| (s.clone(), p.clone()))
                .collect()
        };

        let mut exits = Vec::new();
        for (symbol, position) in &held {
            if let Some(candle) = self.latest_candle(symbol).await {
                if let Some(exit) = position.exit_on(&candle) {
                    exits.push((symbol.clone(), exit));
                }
            }
        }

        let mut state = self.state.lock().await;
        for (symbol, exit) in exits {
            state.realize(&symbol, exit);
        }
        let mut symbols: Vec<String> = state.positions.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn place_order(&self, request: &OrderRequest) -> OrderResult {
        let quantity = request
            .quantity
            .to_f64()
            .ok_or_else(|| format!("unrepresentable quantity {}", request.quantity))?;
        let entry_price = request
            .sizing
            .entry_price
            .to_f64()
            .ok_or_else(|| format!("unrepresentable entry {}", request.sizing.entry_price))?;

        let mut state = self.state.lock().await;
        if state.positions.contains_key(&request.symbol) {
            return Err(format!("position already open on {}", request.symbol));
        }
        state.positions.insert(
            request.symbol.clone(),
            PaperPosition {
                side: request.side,
                quantity,
                entry_price,
                stop_loss: request.stop_loss.to_f64().unwrap_or(0.0),
                take_profit: request.take_profit.and_then(|tp| tp.to_f64()),
            },
        );

        tracing::info!(
            symbol = %request.symbol,
            side = %request.side,
            qty = quantity,
            entry = entry_price,
            strategy = %request.strategy_label,
            "📝 Paper: order filled"
        );
        Ok(format!("paper-{}", uuid::Uuid::new_v4()))
    }

    async fn close_position(&self, symbol: &str, side: Side) -> OrderResult {
        {
            let state = self.state.lock().await;
            match state.positions.get(symbol) {
                Some(p) if p.side == side => {}
                _ => return Err(format!("no open {} position on {}", side, symbol)),
            }
        }

        let candle = self
            .latest_candle(symbol)
            .await
            .ok_or_else(|| format!("no price available for {}", symbol))?;

        let mut state = self.state.lock().await;
        state
            .realize(symbol, candle.close)
            .map(|_| format!("paper-close-{}", uuid::Uuid::new_v4()))
            .ok_or_else(|| format!("position on {} already closed", symbol))
    }

    async fn closed_pnl_since(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<ClosedPnl>> {
        let state = self.state.lock().await;
        Ok(state
            .closed
            .iter()
            .filter(|c| c.symbol == symbol && c.closed_at >= since)
            .cloned()
            .collect())
    }
}
