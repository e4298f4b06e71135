//! Configuration management for fibscan
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::Timeframe;

/// Keys overridable from the environment as comma-separated lists
const LIST_KEYS: [&str; 4] = [
    "fibonacci.timeframes",
    "universe.leveraged_markers",
    "universe.allow",
    "universe.ignore",
];

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub universe: UniverseConfig,
    pub fibonacci: FibonacciConfig,
    pub scoring: ScoringConfig,
    pub momentum: MomentumConfig,
    pub staging: StagingConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub notify: NotifyConfig,
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot version tag for logging and notices
    pub tag: String,
    /// Dry run mode (paper venue, no real orders)
    pub dry_run: bool,
    /// Sleep between cycles in seconds
    pub cycle_interval_secs: u64,
    /// Sleep after a failed cycle in seconds
    pub error_backoff_secs: u64,
    /// Pause between external data requests in milliseconds
    pub request_pause_ms: u64,
    /// Cycles to wait for a closed-PnL record before settling a close without it
    pub pnl_settle_attempts: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tag: env!("CARGO_PKG_VERSION").to_string(),
            dry_run: true,
            cycle_interval_secs: 60,
            error_backoff_secs: 60,
            request_pause_ms: 100,
            pnl_settle_attempts: 5,
        }
    }
}

/// Which symbols are eligible for scanning at all
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    /// Quote asset suffix (USDT pairs only)
    pub quote_asset: String,
    /// Base-asset suffixes marking leveraged tokens (BTCUP, ETHBEAR)
    pub leveraged_markers: Vec<String>,
    /// Shortest underlying asset a leveraged token is built on
    pub min_underlying_len: usize,
    /// Pairs that look leveraged but are not
    pub allow: Vec<String>,
    /// Symbols never scanned (stablecoin pairs)
    pub ignore: Vec<String>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            leveraged_markers: ["UP", "DOWN", "BEAR", "BULL"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_underlying_len: 3,
            allow: vec!["SYRUPUSDT".to_string()],
            ignore: ["USDCUSDT", "FDUSDUSDT", "TUSDUSDT", "USDPUSDT", "BUSDUSDT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl UniverseConfig {
    /// Quote-asset pair that is neither a leveraged token nor ignored
    pub fn is_eligible(&self, symbol: &str) -> bool {
        let Some(base) = symbol.strip_suffix(self.quote_asset.as_str()) else {
            return false;
        };
        if base.is_empty() {
            return false;
        }
        if self.ignore.iter().any(|s| s == symbol) {
            return false;
        }
        if self.allow.iter().any(|s| s == symbol) {
            return true;
        }
        !self.is_leveraged(base)
    }

    fn is_leveraged(&self, base: &str) -> bool {
        self.leveraged_markers.iter().any(|marker| {
            base.strip_suffix(marker.as_str())
                .map_or(false, |underlying| underlying.len() >= self.min_underlying_len)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FibonacciConfig {
    pub enabled: bool,
    /// Number of most liquid pairs to scan
    pub num_pairs: usize,
    pub timeframes: Vec<Timeframe>,
    /// Symmetric pivot window radius
    pub pivot_radius: usize,
    pub candle_limit: usize,
    /// Stop-loss distance beyond the originating pivot (0.01 = 1%)
    pub stop_loss_buffer: f64,
    /// Max distance from a level to count as immediate (0.015 = 1.5%)
    pub proximity_pct: f64,
}

impl Default for FibonacciConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_pairs: 100,
            timeframes: vec![Timeframe::Min15, Timeframe::Hour1, Timeframe::Hour4],
            pivot_radius: 15,
            candle_limit: 300,
            stop_loss_buffer: 0.01,
            proximity_pct: 0.015,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum probability (percent) for an alert
    pub min_probability: u8,
    /// Pivot volume above this multiple of average counts as a spike
    pub volume_spike_multiplier: f64,
    pub volume_lookback: usize,
    /// Percentage points added per extra candidate on the same symbol
    pub confluence_bonus: u8,
    pub probability_cap: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_probability: 85,
            volume_spike_multiplier: 1.5,
            volume_lookback: 50,
            confluence_bonus: 5,
            probability_cap: 99,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub enabled: bool,
    /// How many top 24h performers are inspected
    pub top_performers: usize,
    /// 24h change must be strictly above this (percent)
    pub min_change_24h_pct: f64,
    pub rsi_period: usize,
    /// RSI must be strictly below this to flag a pullback
    pub rsi_oversold: f64,
    /// 5m candles fetched for the RSI
    pub candle_limit: usize,
    /// Minimum daily candles of trading history
    pub min_age_days: usize,
    pub atr_period: usize,
    /// Indicative alert stop: price - multiplier * ATR
    pub alert_stop_atr_multiplier: f64,
    /// Indicative alert target: price + multiplier * ATR
    pub alert_take_profit_atr_multiplier: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_performers: 50,
            min_change_24h_pct: 0.0,
            rsi_period: 14,
            rsi_oversold: 28.0,
            candle_limit: 100,
            min_age_days: 7,
            atr_period: 14,
            alert_stop_atr_multiplier: 1.5,
            alert_take_profit_atr_multiplier: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// RSI level a pending signal must cross upwards
    pub crossover_level: f64,
    /// RSI(5m) at or above this closes dynamic-TP positions
    pub exit_rsi: f64,
    pub tier5m_timeout_mins: i64,
    pub tier15m_timeout_mins: i64,
    pub tier4h_timeout_mins: i64,
    /// Age after which the escalation ladder of a symbol is dropped
    pub ladder_reset_hours: i64,
    /// Fixed take-profit for 5m entries (0.05 = +5%)
    pub fixed_take_profit_pct: f64,
    /// Fixed stop-loss for 5m entries (0.025 = -2.5%)
    pub fixed_stop_loss_pct: f64,
    pub atr_period: usize,
    pub atr_stop_multiplier: f64,
    /// Stop used when the ATR stop is unavailable or invalid (0.02 = -2%)
    pub fallback_stop_pct: f64,
    pub rsi_period: usize,
    pub candle_limit: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            crossover_level: 30.0,
            exit_rsi: 70.0,
            tier5m_timeout_mins: 15,
            tier15m_timeout_mins: 30,
            tier4h_timeout_mins: 120,
            ladder_reset_hours: 24,
            fixed_take_profit_pct: 0.05,
            fixed_stop_loss_pct: 0.025,
            atr_period: 14,
            atr_stop_multiplier: 1.5,
            fallback_stop_pct: 0.02,
            rsi_period: 14,
            candle_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of balance risked per trade (0.05 = 5%)
    pub risk_per_trade: f64,
    pub leverage: u32,
    /// Drawdown from peak that pauses trading (0.15 = 15%)
    pub max_drawdown: f64,
    pub max_consecutive_losses: u32,
    /// Balance at or below this is treated as unavailable (USDT)
    pub min_balance: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.05,
            leverage: 10,
            max_drawdown: 0.15,
            max_consecutive_losses: 5,
            min_balance: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Paper,
    Bybit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub venue: Venue,
    pub bybit_url: String,
    pub recv_window_ms: u64,
    /// Market data endpoint
    pub binance_url: String,
    /// Starting balance of the paper venue (USDT)
    pub paper_balance: f64,
    pub paper_qty_step: f64,
    pub paper_min_qty: f64,
    pub paper_tick_size: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            venue: Venue::Paper,
            bybit_url: crate::exchange::bybit::BYBIT_REST_URL.to_string(),
            recv_window_ms: 5000,
            binance_url: crate::exchange::binance::BINANCE_REST_URL.to_string(),
            paper_balance: 1000.0,
            paper_qty_step: 0.001,
            paper_min_qty: 0.001,
            paper_tick_size: 0.0001,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "logs/trade_history.csv".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.dry_run", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (FIBSCAN__*)
            .add_source(Self::environment())
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// FIBSCAN__SECTION__KEY variables; list keys take comma-separated values
    fn environment() -> Environment {
        LIST_KEYS.iter().fold(
            Environment::with_prefix("FIBSCAN")
                .separator("__")
                .list_separator(",")
                .try_parsing(true),
            |env, key| env.with_list_parse_key(key),
        )
    }

    /// Reject values that would make sizing or staging unsafe
    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk;
        if !(risk.risk_per_trade > 0.0 && risk.risk_per_trade <= 1.0) {
            bail!("risk.risk_per_trade must be in (0, 1], got {}", risk.risk_per_trade);
        }
        if risk.leverage < 1 {
            bail!("risk.leverage must be at least 1");
        }
        if !(risk.max_drawdown > 0.0 && risk.max_drawdown < 1.0) {
            bail!("risk.max_drawdown must be in (0, 1), got {}", risk.max_drawdown);
        }
        if self.fibonacci.pivot_radius == 0 {
            bail!("fibonacci.pivot_radius must be positive");
        }
        if self.fibonacci.enabled && self.fibonacci.timeframes.is_empty() {
            bail!("fibonacci.timeframes must not be empty");
        }
        if !(self.fibonacci.stop_loss_buffer > 0.0 && self.fibonacci.stop_loss_buffer < 1.0) {
            bail!("fibonacci.stop_loss_buffer must be in (0, 1)");
        }
        let staging = &self.staging;
        if staging.tier5m_timeout_mins <= 0
            || staging.tier15m_timeout_mins <= 0
            || staging.tier4h_timeout_mins <= 0
            || staging.ladder_reset_hours <= 0
        {
            bail!("staging timeouts must be positive");
        }
        if !(staging.fixed_stop_loss_pct > 0.0 && staging.fixed_stop_loss_pct < 1.0)
            || !(staging.fallback_stop_pct > 0.0 && staging.fallback_stop_pct < 1.0)
        {
            bail!("staging stop fractions must be in (0, 1)");
        }
        if staging.rsi_period == 0 || staging.atr_period == 0 || self.momentum.rsi_period == 0 {
            bail!("indicator periods must be positive");
        }
        if self.scoring.probability_cap > 100 {
            bail!("scoring.probability_cap must not exceed 100");
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} dry_run={} venue={:?} pairs={} timeframes={:?} min_prob={} risk={:.3} lev={} max_dd={:.2}",
            self.bot.tag,
            self.bot.dry_run,
            self.execution.venue,
            self.fibonacci.num_pairs,
            self.fibonacci.timeframes,
            self.scoring.min_probability,
            self.risk.risk_per_trade,
            self.risk.leverage,
            self.risk.max_drawdown
        )
    }

    /// Venue actually used: dry-run always forces the paper venue
    pub fn effective_venue(&self) -> Venue {
        if self.bot.dry_run {
            Venue::Paper
        } else {
            self.execution.venue
        }
    }

    /// Validate required environment variables
    pub fn validate_env(&self) -> Result<()> {
        let mut required = Vec::new();
        if self.effective_venue() == Venue::Bybit {
            required.extend(["BYBIT_API_KEY", "BYBIT_API_SECRET"]);
        }
        if self.notify.telegram_enabled {
            required.extend(["TELEGRAM_TOKEN", "TELEGRAM_CHAT_ID"]);
        }

        for var in required {
            match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => {}
                _ => bail!("Required environment variable {} is not set", var),
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
