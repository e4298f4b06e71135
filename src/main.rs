//! fibscan - Fibonacci scanner and staged momentum trader
//!
//! Main entry point for the scan loop

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fibscan::config::{AppConfig, Venue};
use fibscan::engine::SignalEngine;
use fibscan::exchange::{BinanceMarketData, BybitExecution, Execution, MarketData, PaperExecution};
use fibscan::notify::{LogNotifier, Notifier, TelegramNotifier};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FIBSCAN_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the subscriber reads RUST_LOG
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::load()?;
    config.validate_env()?;
    tracing::info!(config = %config, "📋 Configuration loaded");

    let market: Arc<dyn MarketData> = Arc::new(
        BinanceMarketData::new(&config.execution.binance_url)
            .context("Failed to build market data client")?,
    );

    let execution: Arc<dyn Execution> = match config.effective_venue() {
        Venue::Paper => {
            tracing::info!(balance = config.execution.paper_balance, "🧪 Paper venue selected");
            Arc::new(PaperExecution::from_config(market.clone(), &config.execution))
        }
        Venue::Bybit => {
            tracing::warn!("⚠️ LIVE venue selected: orders will reach Bybit");
            Arc::new(BybitExecution::from_env(
                &config.execution.bybit_url,
                config.execution.recv_window_ms,
            )?)
        }
    };

    let notifier: Arc<dyn Notifier> = if config.notify.telegram_enabled {
        Arc::new(TelegramNotifier::from_env()?)
    } else {
        Arc::new(LogNotifier)
    };

    let mut engine = SignalEngine::new(config, market, execution, notifier);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    engine.run(shutdown).await?;
    tracing::info!("👋 fibscan stopped");
    Ok(())
}
