//! End-to-end engine cycles against in-memory collaborators

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fibscan::config::AppConfig;
use fibscan::engine::SignalEngine;
use fibscan::exchange::{Execution, MarketData};
use fibscan::notify::Notifier;
use fibscan::staging::Tier;
use fibscan::types::{
    Candle, ClosedPnl, InstrumentRules, MomentumStage, OrderOutcome, OrderRequest, OrderResult, Side,
    SignalEvent, Ticker, Timeframe,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeMarket {
    candles: Mutex<HashMap<(String, Timeframe), Vec<Candle>>>,
    tickers: Mutex<Vec<Ticker>>,
}

impl FakeMarket {
    fn set_candles(&self, symbol: &str, tf: Timeframe, candles: Vec<Candle>) {
        self.candles
            .lock()
            .unwrap()
            .insert((symbol.to_string(), tf), candles);
    }

    fn set_tickers(&self, tickers: Vec<Ticker>) {
        *self.tickers.lock().unwrap() = tickers;
    }
}

#[async_trait]
impl MarketData for FakeMarket {
    async fn candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        let map = self.candles.lock().unwrap();
        match map.get(&(symbol.to_string(), timeframe)) {
            Some(candles) => {
                let start = candles.len().saturating_sub(limit);
                candles[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    async fn tickers(&self) -> Result<Vec<Ticker>> {
        Ok(self.tickers.lock().unwrap().clone())
    }
}

struct FakeExecution {
    balance: Mutex<Option<f64>>,
    live: Mutex<Vec<String>>,
    closed: Mutex<Vec<ClosedPnl>>,
    orders: Mutex<Vec<OrderRequest>>,
    fail_positions: Mutex<bool>,
    /// Exchange time stamped on closing records
    clock: Mutex<DateTime<Utc>>,
    /// PnL published by `close_position`; `None` delays the record
    close_pnl: Mutex<Option<f64>>,
}

impl FakeExecution {
    fn new(balance: f64) -> Self {
        Self {
            balance: Mutex::new(Some(balance)),
            live: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
            fail_positions: Mutex::new(false),
            clock: Mutex::new(t0()),
            close_pnl: Mutex::new(Some(30.0)),
        }
    }

    fn set_clock(&self, now: DateTime<Utc>) {
        *self.clock.lock().unwrap() = now;
    }

    fn publish_closed(&self, symbol: &str, pnl: f64, closed_at: DateTime<Utc>) {
        self.closed.lock().unwrap().push(ClosedPnl {
            symbol: symbol.to_string(),
            pnl,
            closed_at,
        });
    }

    /// Exchange closed the position on its own (fixed TP/SL)
    fn close_externally(&self, symbol: &str, pnl: f64, closed_at: DateTime<Utc>) {
        self.live.lock().unwrap().retain(|s| s != symbol);
        self.publish_closed(symbol, pnl, closed_at);
    }
}

#[async_trait]
impl Execution for FakeExecution {
    fn name(&self) -> &'static str {
        "Fake"
    }

    async fn instrument_rules(&self, _symbol: &str) -> Result<Option<InstrumentRules>> {
        Ok(Some(InstrumentRules {
            qty_step: dec!(0.01),
            min_qty: dec!(0.01),
            tick_size: dec!(0.001),
        }))
    }

    async fn account_balance(&self) -> Option<f64> {
        *self.balance.lock().unwrap()
    }

    async fn open_positions(&self) -> Result<Vec<String>> {
        if *self.fail_positions.lock().unwrap() {
            bail!("exchange unreachable");
        }
        Ok(self.live.lock().unwrap().clone())
    }

    async fn place_order(&self, request: &OrderRequest) -> OrderResult {
        self.orders.lock().unwrap().push(request.clone());
        self.live.lock().unwrap().push(request.symbol.clone());
        Ok(format!("order-{}", self.orders.lock().unwrap().len()))
    }

    async fn close_position(&self, symbol: &str, _side: Side) -> OrderResult {
        let mut live = self.live.lock().unwrap();
        if !live.iter().any(|s| s == symbol) {
            return Err(format!("no position on {}", symbol));
        }
        live.retain(|s| s != symbol);
        if let Some(pnl) = *self.close_pnl.lock().unwrap() {
            let now = *self.clock.lock().unwrap();
            self.publish_closed(symbol, pnl, now);
        }
        Ok("close-1".to_string())
    }

    async fn closed_pnl_since(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<ClosedPnl>> {
        Ok(self
            .closed
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.symbol == symbol && c.closed_at >= since)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<SignalEvent>>,
}

impl RecordingNotifier {
    fn take(&self) -> Vec<SignalEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &SignalEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn at(minutes: i64) -> DateTime<Utc> {
    t0() + ChronoDuration::minutes(minutes)
}

/// Candles whose open is the previous close
fn series(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                open_time: i as i64 * 300_000,
                open,
                high: open.max(close),
                low: open.min(close),
                close,
                volume: 100.0,
            }
        })
        .collect()
}

/// 100 down to 80: RSI pinned at 0
fn oversold() -> Vec<Candle> {
    let closes: Vec<f64> = (0..=20).map(|i| 100.0 - i as f64).collect();
    series(&closes)
}

/// Oversold run then a +10 bar: RSI 0 -> ~43.5, entry 90
fn crossing() -> Vec<Candle> {
    let mut closes: Vec<f64> = (0..=20).map(|i| 100.0 - i as f64).collect();
    closes.push(90.0);
    series(&closes)
}

/// Steady rise: RSI 100
fn overbought() -> Vec<Candle> {
    let closes: Vec<f64> = (0..=21).map(|i| 90.0 + i as f64).collect();
    series(&closes)
}

fn ticker(symbol: &str, change: f64, quote_volume: f64) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        change_24h_pct: change,
        volume: 0.0,
        quote_volume,
    }
}

fn momentum_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.bot.request_pause_ms = 0;
    config.fibonacci.enabled = false;
    config.journal.enabled = false;
    config
}

struct Harness {
    market: Arc<FakeMarket>,
    execution: Arc<FakeExecution>,
    notifier: Arc<RecordingNotifier>,
    engine: SignalEngine,
}

fn make_harness(config: AppConfig) -> Harness {
    let market = Arc::new(FakeMarket::default());
    let execution = Arc::new(FakeExecution::new(1000.0));
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = SignalEngine::new(config, market.clone(), execution.clone(), notifier.clone());
    Harness {
        market,
        execution,
        notifier,
        engine,
    }
}

fn seed_momentum(h: &Harness) {
    h.market.set_tickers(vec![ticker("SOLUSDT", 12.0, 1e6)]);
    h.market.set_candles("SOLUSDT", Timeframe::Day1, series(&[10.0; 10]));
    h.market.set_candles("SOLUSDT", Timeframe::Min5, oversold());
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_momentum_ladder_end_to_end() {
    let mut h = make_harness(momentum_config());
    seed_momentum(&h);

    // Cycle 1: discovery
    let report = h.engine.run_cycle(at(0)).await.unwrap();
    assert_eq!(report.momentum_tracked, 1);
    assert_eq!(report.opportunities_found, 1);
    assert!(report.orders.is_empty());
    assert_eq!(h.engine.staging().pending("SOLUSDT").unwrap().tier, Tier::Tier5m);
    assert_eq!(h.engine.metrics().orders_ignored, 1, "checked without a crossover");

    let events = h.notifier.take();
    assert!(events.iter().any(|e| matches!(
        e,
        SignalEvent::MomentumAlert(a) if a.stage == MomentumStage::Discovered && a.symbol == "SOLUSDT"
    )));

    // Cycle 2: 5m crossover places a fixed-TP order
    h.market.set_candles("SOLUSDT", Timeframe::Min5, crossing());
    let report = h.engine.run_cycle(at(5)).await.unwrap();
    assert_eq!(report.orders, vec![("SOLUSDT".to_string(), OrderOutcome::Placed)]);

    let order = h.execution.orders.lock().unwrap()[0].clone();
    assert_eq!(order.side, Side::Buy);
    assert_eq!(order.quantity, dec!(5.55));
    assert_eq!(order.stop_loss, dec!(87.75));
    assert_eq!(order.take_profit, Some(dec!(94.5)));
    assert_eq!(order.strategy_label, "momentum_pullback_5m");
    assert!(h.engine.staging().pending("SOLUSDT").is_none());
    assert!(h.engine.staging().position("SOLUSDT").is_some());

    // Cycle 3: exchange hit the take-profit, signal promoted to 15m
    h.execution.close_externally("SOLUSDT", 25.0, at(8));
    let report = h.engine.run_cycle(at(10)).await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert!(h.engine.staging().position("SOLUSDT").is_none());
    let pending = h.engine.staging().pending("SOLUSDT").unwrap();
    assert_eq!(pending.tier, Tier::Tier15m);
    assert_eq!(pending.ladder_started_at, at(0));

    // Cycle 4: 15m crossover opens a dynamic-TP position
    h.market.set_candles("SOLUSDT", Timeframe::Min15, crossing());
    let report = h.engine.run_cycle(at(15)).await.unwrap();
    assert_eq!(report.orders, vec![("SOLUSDT".to_string(), OrderOutcome::Placed)]);
    let order = h.execution.orders.lock().unwrap()[1].clone();
    assert_eq!(order.take_profit, None);
    assert!(order.stop_loss < dec!(90));
    assert_eq!(order.strategy_label, "momentum_pullback_15m");

    // Cycle 5: 5m RSI above exit level closes and promotes to 4h
    h.notifier.take();
    h.execution.set_clock(at(20));
    h.market.set_candles("SOLUSDT", Timeframe::Min5, overbought());
    let report = h.engine.run_cycle(at(20)).await.unwrap();
    assert_eq!(report.dynamic_closes, 1);
    assert_eq!(report.unsettled, 0);
    assert_eq!(h.engine.staging().pending("SOLUSDT").unwrap().tier, Tier::Tier4h);

    let events = h.notifier.take();
    assert!(events.iter().any(|e| matches!(
        e,
        SignalEvent::TpDynamicClose { symbol, promoted_to: Some(next), .. }
            if symbol == "SOLUSDT" && next == "4h"
    )));
    assert_eq!(h.engine.governor().state().consecutive_losses, 0);
    assert_eq!(h.engine.metrics().orders_placed, 2);
    assert_eq!(h.engine.metrics().cycles_completed, 5);
}

#[tokio::test]
async fn test_paused_governor_blocks_and_keeps_pending() {
    let mut h = make_harness(momentum_config());
    seed_momentum(&h);

    h.engine.run_cycle(at(0)).await.unwrap();
    h.notifier.take();

    *h.execution.balance.lock().unwrap() = Some(800.0);
    h.market.set_candles("SOLUSDT", Timeframe::Min5, crossing());
    let report = h.engine.run_cycle(at(5)).await.unwrap();

    assert!(h.engine.governor().is_paused());
    assert_eq!(report.orders, vec![("SOLUSDT".to_string(), OrderOutcome::Blocked)]);
    assert!(h.execution.orders.lock().unwrap().is_empty());
    assert!(h.engine.staging().pending("SOLUSDT").is_some());

    let events = h.notifier.take();
    assert!(events
        .iter()
        .any(|e| matches!(e, SignalEvent::DrawdownAlert { drawdown, .. } if (*drawdown - 0.2).abs() < 1e-9)));

    // Recovery does not lift the pause
    *h.execution.balance.lock().unwrap() = Some(1000.0);
    h.engine.run_cycle(at(6)).await.unwrap();
    assert!(h.engine.governor().is_paused());
    assert!(h.engine.metrics().trading_paused);
}

#[tokio::test]
async fn test_unsizeable_order_consumes_pending() {
    let mut h = make_harness(momentum_config());
    seed_momentum(&h);
    // 5% of 1.5 at 10x is 0.75 USDT of notional: quantity floors to zero at 90
    *h.execution.balance.lock().unwrap() = Some(1.5);
    h.engine.run_cycle(at(0)).await.unwrap();

    h.market.set_candles("SOLUSDT", Timeframe::Min5, crossing());
    let report = h.engine.run_cycle(at(5)).await.unwrap();

    assert_eq!(report.orders, vec![("SOLUSDT".to_string(), OrderOutcome::Rejected)]);
    assert!(h.engine.staging().pending("SOLUSDT").is_none());
}

#[tokio::test]
async fn test_fibonacci_alert_is_deduplicated() {
    let mut config = AppConfig::default();
    config.bot.request_pause_ms = 0;
    config.momentum.enabled = false;
    config.journal.enabled = false;
    config.fibonacci.timeframes = vec![Timeframe::Hour4];
    config.fibonacci.pivot_radius = 2;
    config.scoring.min_probability = 75;

    let mut h = make_harness(config);
    h.market.set_tickers(vec![ticker("ETHUSDT", 1.0, 5e8), ticker("USDCUSDT", 0.0, 9e9)]);

    // Low 100 @2 (heavy volume), High 150 @6, last close 119
    let bars = [
        (110.0, 112.0, 111.0),
        (105.0, 108.0, 106.0),
        (100.0, 103.0, 102.0),
        (104.0, 110.0, 108.0),
        (112.0, 120.0, 118.0),
        (125.0, 135.0, 130.0),
        (140.0, 150.0, 145.0),
        (135.0, 145.0, 140.0),
        (125.0, 138.0, 130.0),
        (120.0, 130.0, 122.0),
        (118.0, 124.0, 119.0),
    ];
    let candles: Vec<Candle> = bars
        .iter()
        .enumerate()
        .map(|(i, &(low, high, close))| Candle {
            open_time: i as i64 * 14_400_000,
            open: close,
            high,
            low,
            close,
            volume: if i == 2 { 1000.0 } else { 100.0 },
        })
        .collect();
    h.market.set_candles("ETHUSDT", Timeframe::Hour4, candles);

    let report = h.engine.run_cycle(at(0)).await.unwrap();
    assert_eq!(report.fibonacci_alerts, 1);
    assert_eq!(report.opportunities_found, 1);

    let events = h.notifier.take();
    let alert = events
        .iter()
        .find_map(|e| match e {
            SignalEvent::FibonacciAlert(a) => Some(a.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(alert.symbol, "ETHUSDT");
    assert_eq!(alert.level, "0.618");
    assert_eq!(alert.probability, 75);
    assert!((alert.stop_loss - 99.0).abs() < 1e-9);

    let report = h.engine.run_cycle(at(5)).await.unwrap();
    assert_eq!(report.opportunities_found, 1);
    assert_eq!(report.fibonacci_alerts, 0, "already alerted");
    assert!(h.execution.orders.lock().unwrap().is_empty(), "fibonacci is alert-only");
}

#[tokio::test]
async fn test_position_read_failure_aborts_cycle_and_run_recovers() {
    let mut config = momentum_config();
    config.bot.error_backoff_secs = 3600;
    let mut h = make_harness(config);
    *h.execution.fail_positions.lock().unwrap() = true;

    assert!(h.engine.run_cycle(at(0)).await.is_err());
    assert_eq!(h.engine.metrics().cycles_completed, 0);

    let shutdown = tokio::time::sleep(Duration::from_millis(200));
    h.engine.run(shutdown).await.unwrap();

    let events = h.notifier.take();
    assert!(matches!(events.first(), Some(SignalEvent::Started { .. })));
    assert!(events.iter().any(|e| matches!(e, SignalEvent::CycleError { .. })));
    assert!(matches!(events.last(), Some(SignalEvent::Stopped)));
    assert_eq!(h.engine.metrics().critical_errors, 1);
}

/// Walk SOLUSDT up to an open 15m dynamic position opened at(15), after a
/// winning 5m take-profit published at(8)
async fn open_dynamic_position(h: &mut Harness) {
    seed_momentum(h);
    h.engine.run_cycle(at(0)).await.unwrap();
    h.market.set_candles("SOLUSDT", Timeframe::Min5, crossing());
    h.engine.run_cycle(at(5)).await.unwrap();
    h.execution.close_externally("SOLUSDT", 25.0, at(8));
    h.engine.run_cycle(at(10)).await.unwrap();
    h.market.set_candles("SOLUSDT", Timeframe::Min15, crossing());
    h.engine.run_cycle(at(15)).await.unwrap();
    assert_eq!(h.engine.staging().position("SOLUSDT").unwrap().opened_at, at(15));
}

#[tokio::test]
async fn test_dynamic_close_waits_for_its_own_pnl_record() {
    let mut h = make_harness(momentum_config());
    open_dynamic_position(&mut h).await;

    // Close submitted, exchange has not published the losing record yet
    *h.execution.close_pnl.lock().unwrap() = None;
    h.market.set_candles("SOLUSDT", Timeframe::Min5, overbought());
    let report = h.engine.run_cycle(at(20)).await.unwrap();

    assert_eq!(report.dynamic_closes, 1);
    assert_eq!(report.unsettled, 1);
    assert_eq!(h.engine.staging().pending("SOLUSDT").unwrap().tier, Tier::Tier4h);
    // The earlier +25 take-profit is not attributed to this close
    assert_eq!(h.engine.governor().state().consecutive_losses, 0);

    h.execution.publish_closed("SOLUSDT", -40.0, at(20));
    let report = h.engine.run_cycle(at(25)).await.unwrap();
    assert_eq!(report.unsettled, 0);
    assert_eq!(h.engine.governor().state().consecutive_losses, 1);
}

#[tokio::test]
async fn test_exchange_close_settles_only_after_fresh_record() {
    let mut h = make_harness(momentum_config());
    seed_momentum(&h);
    h.engine.run_cycle(at(0)).await.unwrap();
    h.market.set_candles("SOLUSDT", Timeframe::Min5, crossing());
    h.engine.run_cycle(at(5)).await.unwrap();

    // Stale record from before the fill, position gone without a new one
    h.execution.publish_closed("SOLUSDT", 25.0, at(1));
    h.execution.live.lock().unwrap().clear();
    let report = h.engine.run_cycle(at(10)).await.unwrap();

    assert_eq!(report.reconciled, 0);
    assert!(h.engine.staging().position("SOLUSDT").is_some());
    assert!(h.engine.staging().pending("SOLUSDT").is_none());

    // Stop-loss published: settled as a loss, no promotion
    h.execution.publish_closed("SOLUSDT", -12.0, at(9));
    let report = h.engine.run_cycle(at(11)).await.unwrap();

    assert_eq!(report.reconciled, 1);
    assert!(h.engine.staging().position("SOLUSDT").is_none());
    assert!(h.engine.staging().pending("SOLUSDT").is_none());
    assert_eq!(h.engine.governor().state().consecutive_losses, 1);
}

#[tokio::test]
async fn test_missing_pnl_settles_after_retry_limit() {
    let mut config = momentum_config();
    config.bot.pnl_settle_attempts = 2;
    let mut h = make_harness(config);
    seed_momentum(&h);
    h.engine.run_cycle(at(0)).await.unwrap();
    h.market.set_candles("SOLUSDT", Timeframe::Min5, crossing());
    h.engine.run_cycle(at(5)).await.unwrap();

    h.execution.live.lock().unwrap().clear();
    assert_eq!(h.engine.run_cycle(at(10)).await.unwrap().reconciled, 0);
    assert_eq!(h.engine.run_cycle(at(11)).await.unwrap().reconciled, 1);

    assert!(h.engine.staging().position("SOLUSDT").is_none());
    assert!(h.engine.staging().pending("SOLUSDT").is_none());
    assert_eq!(h.engine.governor().state().consecutive_losses, 0);
}

#[tokio::test]
async fn test_balance_read_failure_keeps_pending() {
    let mut h = make_harness(momentum_config());
    seed_momentum(&h);
    h.engine.run_cycle(at(0)).await.unwrap();

    *h.execution.balance.lock().unwrap() = None;
    h.market.set_candles("SOLUSDT", Timeframe::Min5, crossing());
    let report = h.engine.run_cycle(at(5)).await.unwrap();

    assert_eq!(report.orders, vec![("SOLUSDT".to_string(), OrderOutcome::Rejected)]);
    assert_eq!(h.engine.staging().pending("SOLUSDT").unwrap().tier, Tier::Tier5m);
    assert_eq!(h.engine.metrics().orders_rejected, 1);

    *h.execution.balance.lock().unwrap() = Some(1000.0);
    let report = h.engine.run_cycle(at(6)).await.unwrap();
    assert_eq!(report.orders, vec![("SOLUSDT".to_string(), OrderOutcome::Placed)]);
    assert!(h.engine.staging().position("SOLUSDT").is_some());
}
