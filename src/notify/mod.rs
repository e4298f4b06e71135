//! Operator notifications
//!
//! `Notifier` port with a Telegram Bot API adapter and a tracing-only
//! adapter, the message renderer, and the alert de-duplication ledger.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use crate::types::{FibonacciAlert, MomentumAlert, MomentumStage, SignalEvent};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Keys kept before the ledger starts over
pub const LEDGER_CAPACITY: usize = 200;

/// Delivery of operator events. Implementations never fail the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &SignalEvent);
}

/// Logs every event through tracing
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &SignalEvent) {
        tracing::info!(kind = event.kind(), message = %render(event), "🔔 Notification");
    }
}

/// Telegram Bot API `sendMessage` with Markdown
pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: TELEGRAM_API_URL.to_string(),
            token,
            chat_id,
        })
    }

    /// Build from TELEGRAM_TOKEN / TELEGRAM_CHAT_ID
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TELEGRAM_TOKEN").context("TELEGRAM_TOKEN not set")?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").context("TELEGRAM_CHAT_ID not set")?;
        Self::new(token, chat_id)
    }

    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to reach Telegram")?;

        if !response.status().is_success() {
            bail!("Telegram API returned error: {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: &SignalEvent) {
        let text = render(event);
        let first_line = text.lines().next().unwrap_or_default();
        match self.send(&text).await {
            Ok(()) => tracing::debug!(kind = event.kind(), head = %first_line, "Telegram: message sent"),
            Err(e) => tracing::warn!(kind = event.kind(), error = %e, "Telegram: delivery failed"),
        }
    }
}

/// 8 decimals for sub-cent prices, 4 otherwise
pub fn format_price(price: f64) -> String {
    if price.abs() < 0.01 {
        format!("{:.8}", price)
    } else {
        format!("{:.4}", price)
    }
}

fn pct_distance(level: f64, entry: f64) -> f64 {
    if entry == 0.0 {
        return 0.0;
    }
    ((level - entry) / entry).abs() * 100.0
}

fn render_fibonacci(alert: &FibonacciAlert) -> String {
    let (header, confluence) = if alert.wave_3_start {
        (
            "💎 *ELITE SIGNAL: FIBONACCI + ELLIOTT* 💎",
            "\n*Confluence:* potential start of wave 3.",
        )
    } else {
        ("🚨 *IMMEDIATE ENTRY ALERT* 🚨", "")
    };

    format!(
        "{header}\n\n*{symbol} ({tf})*\n*{dir}* with *{prob}%* probability{confluence}\n\n\
         📈 *Entry:* near `{entry}` (Fibo {level})\n\
         🎯 *Take Profit 1:* `{tp1}` (+{tp1_pct:.2}%)\n\
         🎯 *Take Profit 2:* `{tp2}` (+{tp2_pct:.2}%)\n\
         🛑 *Stop Loss:* `{sl}` (-{sl_pct:.2}%)",
        symbol = alert.symbol,
        tf = alert.timeframe,
        dir = alert.direction,
        prob = alert.probability,
        entry = format_price(alert.entry),
        level = alert.level,
        tp1 = format_price(alert.take_profit_1),
        tp1_pct = pct_distance(alert.take_profit_1, alert.entry),
        tp2 = format_price(alert.take_profit_2),
        tp2_pct = pct_distance(alert.take_profit_2, alert.entry),
        sl = format_price(alert.stop_loss),
        sl_pct = pct_distance(alert.stop_loss, alert.entry),
    )
}

fn render_momentum(alert: &MomentumAlert) -> String {
    let mut text = match alert.stage {
        MomentumStage::Discovered => format!(
            "📈 *MOMENTUM PULLBACK* 📈\n\n*{}*{} is pulling back.\n\nRSI(14) on 5m: *{:.2}* (oversold trigger)\nTracking on tier *{}*",
            alert.symbol,
            alert
                .change_24h_pct
                .map(|c| format!(" ({:+.2}% in 24h)", c))
                .unwrap_or_default(),
            alert.rsi,
            alert.tier,
        ),
        MomentumStage::Confirmed => format!(
            "✅ *PULLBACK CONFIRMED* ✅\n\n*{}* RSI crossed up on tier *{}*: *{:.2}*",
            alert.symbol, alert.tier, alert.rsi,
        ),
    };

    text.push_str(&format!("\n\n📈 *Entry:* near `{}`", format_price(alert.price)));
    if let Some(tp) = alert.take_profit {
        text.push_str(&format!(
            "\n🎯 *Take Profit:* `{}` (+{:.2}%)",
            format_price(tp),
            pct_distance(tp, alert.price)
        ));
    }
    if let Some(sl) = alert.stop_loss {
        text.push_str(&format!(
            "\n🛑 *Stop Loss:* `{}` (-{:.2}%)",
            format_price(sl),
            pct_distance(sl, alert.price)
        ));
    }
    text
}

/// Operator-facing Markdown message for an event
pub fn render(event: &SignalEvent) -> String {
    match event {
        SignalEvent::FibonacciAlert(alert) => render_fibonacci(alert),
        SignalEvent::MomentumAlert(alert) => render_momentum(alert),
        SignalEvent::TpDynamicClose {
            symbol,
            tier,
            rsi,
            promoted_to,
        } => {
            let next = match promoted_to {
                Some(tier) => format!("Promoted to tier *{}*.", tier),
                None => "Ladder complete.".to_string(),
            };
            format!(
                "💰 *DYNAMIC TAKE PROFIT* 💰\n\n*{}* closed on tier *{}* with RSI *{:.2}*.\n{}",
                symbol, tier, rsi, next
            )
        }
        SignalEvent::DrawdownAlert {
            reason,
            balance,
            peak_equity,
            drawdown,
            consecutive_losses,
        } => format!(
            "⛔ *TRADING PAUSED* ⛔\n\n{}\nBalance: `{:.2}` (peak `{:.2}`, drawdown {:.2}%)\nConsecutive losses: {}",
            reason,
            balance,
            peak_equity,
            drawdown * 100.0,
            consecutive_losses
        ),
        SignalEvent::OrderUpdate {
            symbol,
            strategy_label,
            outcome,
            detail,
        } => format!("🧾 *ORDER {}* {} ({})\n`{}`", outcome, symbol, strategy_label, detail),
        SignalEvent::Started { tag } => {
            format!("✅ *Scanner started* ({})\nMonitoring the market.", tag)
        }
        SignalEvent::Stopped => "🛑 *Scanner stopped*\nMonitoring has ended.".to_string(),
        SignalEvent::CycleError { message } => format!(
            "⚠️ *Critical error in the scan loop:*\n`{}`\n\nRetrying after backoff.",
            message
        ),
    }
}

/// Alert keys already delivered
#[derive(Debug, Clone, Default)]
pub struct AlertLedger {
    sent: HashSet<String>,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn momentum_key(symbol: &str, tier: &str) -> String {
        format!("MOMENTUM-{}-{}", symbol, tier)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sent.contains(key)
    }

    /// Record `key`; false when it was already sent
    pub fn insert(&mut self, key: String) -> bool {
        if self.sent.len() > LEDGER_CAPACITY {
            tracing::debug!(size = self.sent.len(), "Alert ledger cleared");
            self.sent.clear();
        }
        self.sent.insert(key)
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
