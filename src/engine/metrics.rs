//! Engine counters
//!
//! Accumulates the `MetricEvent` snapshot and logs it under the
//! `fibscan::metrics` target once per cycle.

use crate::types::{MetricEvent, OrderOutcome};

#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    snapshot: MetricEvent,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_alert(&mut self) {
        self.snapshot.alerts_sent += 1;
    }

    pub fn record_order(&mut self, outcome: OrderOutcome) {
        let counter = match outcome {
            OrderOutcome::Placed => &mut self.snapshot.orders_placed,
            OrderOutcome::Ignored => &mut self.snapshot.orders_ignored,
            OrderOutcome::Rejected => &mut self.snapshot.orders_rejected,
            OrderOutcome::Blocked => &mut self.snapshot.orders_blocked,
            OrderOutcome::Failed => &mut self.snapshot.orders_failed,
        };
        *counter += 1;
    }

    pub fn record_critical_error(&mut self) {
        self.snapshot.critical_errors += 1;
    }

    /// Close out a successful cycle
    pub fn record_cycle(&mut self, opportunities_found: u64, trading_paused: bool) {
        self.snapshot.cycles_completed += 1;
        self.snapshot.opportunities_found = opportunities_found;
        self.snapshot.trading_paused = trading_paused;
    }

    pub fn snapshot(&self) -> MetricEvent {
        self.snapshot.clone()
    }

    pub fn log(&self) {
        let m = &self.snapshot;
        tracing::info!(
            target: "fibscan::metrics",
            cycles_completed = m.cycles_completed,
            alerts_sent = m.alerts_sent,
            critical_errors = m.critical_errors,
            opportunities_found = m.opportunities_found,
            orders_placed = m.orders_placed,
            orders_ignored = m.orders_ignored,
            orders_rejected = m.orders_rejected,
            orders_blocked = m.orders_blocked,
            orders_failed = m.orders_failed,
            trading_paused = m.trading_paused,
            "📊 Metrics"
        );
    }
}
