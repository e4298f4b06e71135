//! Binance REST client for public market data
//!
//! Klines and 24h tickers from the spot API. Numbers arrive as strings and
//! malformed rows are skipped.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::MarketData;
use crate::types::{Candle, Ticker, Timeframe};

pub const BINANCE_REST_URL: &str = "https://api.binance.com";

#[derive(Debug, Clone)]
pub struct BinanceMarketData {
    client: reqwest::Client,
    base_url: String,
}

/// Raw 24hr ticker row
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    price_change_percent: String,
    volume: String,
    quote_volume: String,
}

impl BinanceMarketData {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch klines, propagating transport and status errors
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit = limit.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", timeframe.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .context("Failed to fetch klines from Binance")?;

        if !response.status().is_success() {
            bail!("Binance API returned error: {}", response.status());
        }

        // [[open_time, open, high, low, close, volume, close_time, ...], ...]
        let klines: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .context("Failed to parse Binance klines response")?;

        Ok(parse_klines(klines))
    }
}

pub fn parse_klines(klines: Vec<Vec<serde_json::Value>>) -> Vec<Candle> {
    klines
        .into_iter()
        .filter_map(|kline| {
            if kline.len() < 6 {
                return None;
            }

            let open_time = kline[0].as_i64()?;
            let open: f64 = kline[1].as_str()?.parse().ok()?;
            let high: f64 = kline[2].as_str()?.parse().ok()?;
            let low: f64 = kline[3].as_str()?.parse().ok()?;
            let close: f64 = kline[4].as_str()?.parse().ok()?;
            let volume: f64 = kline[5].as_str()?.parse().ok()?;

            Some(Candle {
                open_time,
                open,
                high,
                low,
                close,
                volume,
            })
        })
        .collect()
}

fn parse_ticker(raw: RawTicker) -> Option<Ticker> {
    Some(Ticker {
        change_24h_pct: raw.price_change_percent.parse().ok()?,
        volume: raw.volume.parse().ok()?,
        quote_volume: raw.quote_volume.parse().ok()?,
        symbol: raw.symbol,
    })
}

#[async_trait]
impl MarketData for BinanceMarketData {
    async fn candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        match self.fetch_klines(symbol, timeframe, limit).await {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!(
                    symbol = %symbol,
                    timeframe = %timeframe,
                    error = %e,
                    "Binance: candle fetch failed"
                );
                Vec::new()
            }
        }
    }

    async fn tickers(&self) -> Result<Vec<Ticker>> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch 24h tickers from Binance")?;

        if !response.status().is_success() {
            bail!("Binance API returned error: {}", response.status());
        }

        let raw: Vec<RawTicker> = response
            .json()
            .await
            .context("Failed to parse Binance ticker response")?;

        let tickers: Vec<Ticker> = raw.into_iter().filter_map(parse_ticker).collect();
        tracing::debug!(count = tickers.len(), "📥 Binance tickers fetched");
        Ok(tickers)
    }
}
