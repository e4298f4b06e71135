//! Signal engine
//!
//! Owns every stateful component and drives one scan/confirm/manage cycle
//! at a time against the market data, execution and notification
//! collaborators.

pub mod metrics;

pub use metrics::EngineMetrics;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::PauseReason;
use crate::exchange::{Execution, MarketData};
use crate::features;
use crate::notify::{AlertLedger, Notifier};
use crate::persistence::{JournalRecord, TradeJournal};
use crate::risk::{DrawdownGovernor, RiskSizer, SizingInput};
use crate::staging::{
    is_crossover, ClosureKind, ExitPlan, OpenPositionRef, PendingSignal,
    StagedSignalStateMachine, Tier, TrackOutcome,
};
use crate::strategy::{FibonacciScanner, MomentumScanner};
use crate::types::{
    ClosedPnl, MetricEvent, MomentumAlert, MomentumStage, OrderOutcome, Side, SignalEvent, Timeframe,
};

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub balance: Option<f64>,
    /// Tracked positions found closed by the exchange
    pub reconciled: usize,
    pub momentum_tracked: usize,
    pub fibonacci_alerts: usize,
    pub expired: usize,
    /// (symbol, outcome) of every confirmation that reached sizing
    pub orders: Vec<(String, OrderOutcome)>,
    pub dynamic_closes: usize,
    /// Engine-initiated closes still waiting for their PnL record
    pub unsettled: usize,
    pub opportunities_found: usize,
}

/// Position closed by the engine whose realized PnL is not yet published
#[derive(Debug, Clone)]
struct Unsettled {
    position: OpenPositionRef,
    exit_price: Option<f64>,
    closed_at: DateTime<Utc>,
    attempts: u32,
}

pub struct SignalEngine {
    config: AppConfig,
    market: Arc<dyn MarketData>,
    execution: Arc<dyn Execution>,
    notifier: Arc<dyn Notifier>,
    fibonacci: FibonacciScanner,
    momentum: MomentumScanner,
    staging: StagedSignalStateMachine,
    sizer: RiskSizer,
    governor: DrawdownGovernor,
    ledger: AlertLedger,
    journal: Option<TradeJournal>,
    metrics: EngineMetrics,
    request_pause: Duration,
    /// Newest closing record already attributed, per symbol
    settled_through: HashMap<String, DateTime<Utc>>,
    /// Cycles spent waiting on the PnL of exchange-side closes
    pnl_waits: HashMap<String, u32>,
    unsettled: Vec<Unsettled>,
}

impl SignalEngine {
    pub fn new(
        config: AppConfig,
        market: Arc<dyn MarketData>,
        execution: Arc<dyn Execution>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let request_pause = Duration::from_millis(config.bot.request_pause_ms);

        let journal = if config.journal.enabled {
            match TradeJournal::open(&config.journal.path) {
                Ok(journal) => Some(journal),
                Err(e) => {
                    tracing::warn!(path = %config.journal.path, error = %e, "Journal unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        Self {
            fibonacci: FibonacciScanner::new(
                config.fibonacci.clone(),
                config.scoring.clone(),
                config.universe.clone(),
                request_pause,
            ),
            momentum: MomentumScanner::new(
                config.momentum.clone(),
                config.universe.clone(),
                request_pause,
            ),
            staging: StagedSignalStateMachine::new(config.staging.clone()),
            sizer: RiskSizer::from_config(&config.risk),
            governor: DrawdownGovernor::from_config(&config.risk),
            ledger: AlertLedger::new(),
            journal,
            metrics: EngineMetrics::new(),
            request_pause,
            settled_through: HashMap::new(),
            pnl_waits: HashMap::new(),
            unsettled: Vec::new(),
            config,
            market,
            execution,
            notifier,
        }
    }

    pub fn staging(&self) -> &StagedSignalStateMachine {
        &self.staging
    }

    pub fn governor(&self) -> &DrawdownGovernor {
        &self.governor
    }

    /// Operator reset of a tripped governor
    pub fn reset_governor(&mut self) {
        self.governor.reset();
    }

    pub fn metrics(&self) -> MetricEvent {
        self.metrics.snapshot()
    }

    async fn pause(&self) {
        if !self.request_pause.is_zero() {
            tokio::time::sleep(self.request_pause).await;
        }
    }

    async fn emit(&mut self, event: SignalEvent) {
        if matches!(
            event,
            SignalEvent::FibonacciAlert(_) | SignalEvent::MomentumAlert(_) | SignalEvent::TpDynamicClose { .. }
        ) {
            self.metrics.record_alert();
        }
        self.notifier.notify(&event).await;
    }

    async fn emit_drawdown_alert(&mut self, reason: PauseReason) {
        let state = self.governor.state().clone();
        self.emit(SignalEvent::DrawdownAlert {
            reason: reason.to_string(),
            balance: state.last_balance.unwrap_or(0.0),
            peak_equity: state.peak_equity,
            drawdown: state.drawdown(),
            consecutive_losses: state.consecutive_losses,
        })
        .await;
    }

    async fn record_realized(&mut self, pnl: Option<f64>) {
        if let Some(pnl) = pnl {
            if let Some(reason) = self.governor.record_trade(pnl) {
                self.emit_drawdown_alert(reason).await;
            }
        }
    }

    /// Realized PnL of `position`, from closing records newer than both its
    /// open and anything already attributed on the symbol. Records at or
    /// after `until` belong to a later position.
    async fn settled_pnl(
        &mut self,
        position: &OpenPositionRef,
        until: Option<DateTime<Utc>>,
    ) -> Option<f64> {
        let since = match self.settled_through.get(&position.symbol) {
            Some(through) => {
                let after = *through + ChronoDuration::milliseconds(1);
                after.max(position.opened_at)
            }
            None => position.opened_at,
        };
        let records: Vec<ClosedPnl> =
            match self.execution.closed_pnl_since(&position.symbol, since).await {
                Ok(records) => records
                    .into_iter()
                    .filter(|r| r.closed_at >= since)
                    .filter(|r| until.map_or(true, |u| r.closed_at < u))
                    .collect(),
                Err(e) => {
                    tracing::warn!(symbol = %position.symbol, error = %e, "Closed PnL unavailable");
                    return None;
                }
            };

        let through = records.iter().map(|r| r.closed_at).max()?;
        self.settled_through.insert(position.symbol.clone(), through);
        Some(records.iter().map(|r| r.pnl).sum())
    }

    fn journal_close(
        &mut self,
        position: &OpenPositionRef,
        pnl: Option<f64>,
        exit_price: Option<f64>,
        kind: ClosureKind,
        now: DateTime<Utc>,
    ) {
        if let Some(journal) = self.journal.as_mut() {
            journal.record(&JournalRecord::closed(
                now,
                position.tier_of_origin.label(),
                &position.symbol,
                position.side.direction(),
                position.entry_price,
                position.notional,
                pnl,
                exit_price,
                kind.reason(),
            ));
        }
    }

    /// Exit price implied by realized PnL on a known notional
    fn implied_exit(position: &OpenPositionRef, pnl: Option<f64>) -> Option<f64> {
        let pnl = pnl?;
        if position.notional <= 0.0 {
            return None;
        }
        let move_pct = pnl / position.notional;
        Some(match position.side {
            Side::Buy => position.entry_price * (1.0 + move_pct),
            Side::Sell => position.entry_price * (1.0 - move_pct),
        })
    }

    /// Tracked positions missing from the live list were closed by the exchange.
    ///
    /// The closure stays unrecorded until its PnL is published, since the
    /// result decides promotion. After `pnl_settle_attempts` cycles it is
    /// settled as a stop-loss with unknown PnL.
    async fn reconcile(&mut self, live: &[String], now: DateTime<Utc>) -> usize {
        let gone: Vec<OpenPositionRef> = self
            .staging
            .positions()
            .into_iter()
            .filter(|p| !live.contains(&p.symbol))
            .collect();
        let limit = self.config.bot.pnl_settle_attempts;
        let mut settled = 0;

        for position in &gone {
            let pnl = self.settled_pnl(position, None).await;
            if pnl.is_none() {
                let waited = self.pnl_waits.entry(position.symbol.clone()).or_insert(0);
                *waited += 1;
                if *waited < limit {
                    tracing::info!(
                        symbol = %position.symbol,
                        attempt = *waited,
                        "Closed PnL not published yet, retrying next cycle"
                    );
                    continue;
                }
                tracing::warn!(symbol = %position.symbol, "Closed PnL never published, settling as stop-loss");
            }
            self.pnl_waits.remove(&position.symbol);
            self.record_realized(pnl).await;

            let kind = match pnl {
                Some(p) if p > 0.0 => ClosureKind::TakeProfit,
                _ => ClosureKind::StopLoss,
            };
            self.journal_close(position, pnl, Self::implied_exit(position, pnl), kind, now);

            if let Some(closure) = self.staging.record_closure(&position.symbol, kind, now) {
                tracing::info!(
                    symbol = %position.symbol,
                    pnl = ?pnl,
                    reason = kind.reason(),
                    promoted_to = ?closure.promoted_to,
                    "Position closed by exchange"
                );
            }
            settled += 1;
        }
        settled
    }

    /// Retry PnL attribution for engine-initiated closes
    async fn settle_deferred(&mut self) {
        let limit = self.config.bot.pnl_settle_attempts;
        let mut waiting = Vec::new();

        for mut entry in std::mem::take(&mut self.unsettled) {
            let reopened_at = self
                .staging
                .position(&entry.position.symbol)
                .map(|p| p.opened_at);
            let pnl = self.settled_pnl(&entry.position, reopened_at).await;
            entry.attempts += 1;
            if pnl.is_none() && entry.attempts < limit {
                waiting.push(entry);
                continue;
            }
            if pnl.is_none() {
                tracing::warn!(symbol = %entry.position.symbol, "Closed PnL never published, journaling without it");
            }
            self.finish_dynamic(&entry.position, pnl, entry.exit_price, entry.closed_at).await;
        }
        self.unsettled = waiting;
    }

    async fn finish_dynamic(
        &mut self,
        position: &OpenPositionRef,
        pnl: Option<f64>,
        exit_price: Option<f64>,
        closed_at: DateTime<Utc>,
    ) {
        self.record_realized(pnl).await;
        let exit_price = exit_price.or_else(|| Self::implied_exit(position, pnl));
        self.journal_close(position, pnl, exit_price, ClosureKind::DynamicTakeProfit, closed_at);
    }

    async fn track_momentum(&mut self, live: &[String], now: DateTime<Utc>) -> (usize, usize) {
        let candidates = self.momentum.scan(self.market.as_ref(), now).await;
        let mut tracked = 0;

        for candidate in &candidates {
            if self.staging.track_candidate(&candidate.symbol, live, now) != TrackOutcome::Tracked {
                continue;
            }
            tracked += 1;

            let tier = Tier::Tier5m.to_string();
            if self.ledger.insert(AlertLedger::momentum_key(&candidate.symbol, &tier)) {
                self.emit(SignalEvent::MomentumAlert(MomentumAlert {
                    symbol: candidate.symbol.clone(),
                    tier,
                    stage: MomentumStage::Discovered,
                    price: candidate.price,
                    rsi: candidate.rsi_14,
                    change_24h_pct: Some(candidate.change_24h_pct),
                    stop_loss: candidate.stop_loss,
                    take_profit: candidate.take_profit,
                }))
                .await;
            }
        }
        (candidates.len(), tracked)
    }

    async fn alert_fibonacci(&mut self) -> (usize, usize) {
        let ranked = self.fibonacci.scan(self.market.as_ref()).await;
        let mut alerts = 0;

        for scored in &ranked {
            if !self.ledger.insert(scored.alert_key()) {
                continue;
            }
            tracing::info!(
                symbol = %scored.symbol,
                timeframe = %scored.timeframe,
                direction = %scored.candidate.direction,
                probability = scored.probability,
                "🎯 Fibonacci opportunity"
            );
            alerts += 1;
            self.emit(SignalEvent::FibonacciAlert(scored.to_alert())).await;
        }
        (ranked.len(), alerts)
    }

    /// Size and place a confirmed pending signal; decides its fate on failure
    async fn enter(
        &mut self,
        signal: &PendingSignal,
        entry_price: f64,
        plan: &ExitPlan,
        now: DateTime<Utc>,
    ) -> OrderOutcome {
        let symbol = signal.symbol.as_str();
        let side = Side::Buy;

        let rules = match self.execution.instrument_rules(symbol).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Instrument rules unavailable");
                None
            }
        };
        let balance = self.execution.account_balance().await;

        let input = SizingInput {
            symbol,
            side,
            strategy_label: &signal.strategy_label,
            balance,
            rules,
            entry_price,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
        };

        let mut keep_pending = false;
        let (outcome, detail) = match self.sizer.size(&input, &self.governor) {
            Err(e) => {
                keep_pending = e.is_transient();
                (e.outcome(), e.to_string())
            }
            Ok(request) => match self.execution.place_order(&request).await {
                Ok(order_id) => {
                    let notional = request.sizing.notional_f64();
                    if let Err(e) = self.staging.record_fill(symbol, side, entry_price, notional, now) {
                        tracing::warn!(symbol = %symbol, error = %e, "Fill not tracked");
                    }
                    if let Some(journal) = self.journal.as_mut() {
                        journal.record(&JournalRecord::opened(
                            now,
                            &request.strategy_label,
                            symbol,
                            side.direction(),
                            entry_price,
                            notional,
                        ));
                    }
                    tracing::info!(
                        symbol = %symbol,
                        order_id = %order_id,
                        qty = %request.quantity,
                        strategy = %request.strategy_label,
                        "✅ Order placed"
                    );
                    (OrderOutcome::Placed, order_id)
                }
                Err(msg) => (OrderOutcome::Failed, msg),
            },
        };

        if outcome == OrderOutcome::Rejected && !keep_pending {
            self.staging.discard_pending(symbol);
        }
        if outcome != OrderOutcome::Placed {
            tracing::warn!(symbol = %symbol, outcome = %outcome, detail = %detail, "Entry not placed");
        }

        self.metrics.record_order(outcome);
        self.emit(SignalEvent::OrderUpdate {
            symbol: symbol.to_string(),
            strategy_label: signal.strategy_label.clone(),
            outcome,
            detail,
        })
        .await;
        outcome
    }

    /// Check pending signals tier by tier for an RSI crossover
    async fn confirm_pending(&mut self, now: DateTime<Utc>) -> Vec<(String, OrderOutcome)> {
        let cfg = self.staging.config().clone();
        let mut orders = Vec::new();

        for tier in Tier::ALL {
            for signal in self.staging.pending_in_tier(tier) {
                let candles = self
                    .market
                    .candles(&signal.symbol, tier.timeframe(), cfg.candle_limit)
                    .await;
                self.pause().await;

                let Some((prev, curr)) = features::rsi_pair(&candles, cfg.rsi_period) else {
                    self.metrics.record_order(OrderOutcome::Ignored);
                    continue;
                };
                if !is_crossover(prev, curr, cfg.crossover_level) {
                    self.metrics.record_order(OrderOutcome::Ignored);
                    continue;
                }
                let Some(entry_price) = candles.last().map(|c| c.close) else {
                    continue;
                };

                let atr = features::atr(&candles, cfg.atr_period);
                let plan = self.staging.exit_plan(tier, entry_price, atr);
                tracing::info!(
                    symbol = %signal.symbol,
                    tier = %tier,
                    rsi_prev = %format!("{:.2}", prev),
                    rsi = %format!("{:.2}", curr),
                    "RSI crossover confirmed"
                );

                self.emit(SignalEvent::MomentumAlert(MomentumAlert {
                    symbol: signal.symbol.clone(),
                    tier: tier.to_string(),
                    stage: MomentumStage::Confirmed,
                    price: entry_price,
                    rsi: curr,
                    change_24h_pct: None,
                    stop_loss: Some(plan.stop_loss),
                    take_profit: plan.take_profit,
                }))
                .await;

                let outcome = self.enter(&signal, entry_price, &plan, now).await;
                orders.push((signal.symbol.clone(), outcome));
            }
        }
        orders
    }

    /// Close dynamic-TP positions whose 5m RSI reached the exit level
    async fn manage_dynamic(&mut self, live: &[String], now: DateTime<Utc>) -> usize {
        let cfg = self.staging.config().clone();
        let mut closed = 0;

        for position in self.staging.dynamic_positions() {
            if !live.contains(&position.symbol) {
                continue;
            }
            let candles = self
                .market
                .candles(&position.symbol, Timeframe::Min5, cfg.candle_limit)
                .await;
            self.pause().await;

            let Some(rsi) = features::rsi(&candles, cfg.rsi_period) else {
                continue;
            };
            if rsi < cfg.exit_rsi {
                continue;
            }

            tracing::info!(
                symbol = %position.symbol,
                rsi = %format!("{:.2}", rsi),
                "Dynamic take-profit triggered"
            );
            if let Err(msg) = self.execution.close_position(&position.symbol, position.side).await {
                tracing::error!(symbol = %position.symbol, error = %msg, "❌ Dynamic close failed");
                continue;
            }

            let exit_price = candles.last().map(|c| c.close);
            match self.settled_pnl(&position, None).await {
                Some(pnl) => self.finish_dynamic(&position, Some(pnl), exit_price, now).await,
                None => self.unsettled.push(Unsettled {
                    position: position.clone(),
                    exit_price,
                    closed_at: now,
                    attempts: 0,
                }),
            }

            let promoted_to = self
                .staging
                .record_closure(&position.symbol, ClosureKind::DynamicTakeProfit, now)
                .and_then(|c| c.promoted_to);
            closed += 1;

            self.emit(SignalEvent::TpDynamicClose {
                symbol: position.symbol.clone(),
                tier: position.tier_of_origin.to_string(),
                rsi,
                promoted_to: promoted_to.map(|t| t.to_string()),
            })
            .await;
        }
        closed
    }

    /// One full cycle. Only a failure to read live positions aborts it.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        report.balance = self.execution.account_balance().await;
        match report.balance {
            Some(balance) => {
                if let Some(reason) = self.governor.observe_balance(balance) {
                    self.emit_drawdown_alert(reason).await;
                }
            }
            None => tracing::warn!(venue = self.execution.name(), "Balance unavailable"),
        }

        let live = self
            .execution
            .open_positions()
            .await
            .context("Failed to read open positions")?;

        report.reconciled = self.reconcile(&live, now).await;
        self.settle_deferred().await;

        let mut momentum_found = 0;
        if self.config.momentum.enabled {
            let (found, tracked) = self.track_momentum(&live, now).await;
            momentum_found = found;
            report.momentum_tracked = tracked;
        }

        let mut fibonacci_found = 0;
        if self.config.fibonacci.enabled {
            let (found, alerts) = self.alert_fibonacci().await;
            fibonacci_found = found;
            report.fibonacci_alerts = alerts;
        }
        report.opportunities_found = momentum_found + fibonacci_found;

        report.expired = self.staging.expire(now).len();
        report.orders = self.confirm_pending(now).await;
        report.dynamic_closes = self.manage_dynamic(&live, now).await;
        report.unsettled = self.unsettled.len();

        self.metrics
            .record_cycle(report.opportunities_found as u64, self.governor.is_paused());
        self.metrics.log();

        tracing::info!(
            pending = self.staging.pending_count(),
            positions = self.staging.position_count(),
            orders = report.orders.len(),
            opportunities = report.opportunities_found,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Run cycles until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let interval = Duration::from_secs(self.config.bot.cycle_interval_secs);
        let backoff = Duration::from_secs(self.config.bot.error_backoff_secs);

        tracing::info!(
            venue = self.execution.name(),
            interval_secs = interval.as_secs(),
            "🚀 Engine started"
        );
        self.emit(SignalEvent::Started {
            tag: self.config.bot.tag.clone(),
        })
        .await;

        loop {
            let result = tokio::select! {
                _ = &mut shutdown => break,
                result = self.run_cycle(Utc::now()) => result,
            };

            let wait = match result {
                Ok(_) => interval,
                Err(e) => {
                    self.metrics.record_critical_error();
                    tracing::error!(error = %format!("{:#}", e), "❌ Cycle failed");
                    self.emit(SignalEvent::CycleError {
                        message: format!("{:#}", e),
                    })
                    .await;
                    backoff
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!("Shutdown requested, stopping engine");
        self.emit(SignalEvent::Stopped).await;
        Ok(())
    }
}
