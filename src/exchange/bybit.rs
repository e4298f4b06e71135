//! Bybit V5 REST client for linear USDT perpetuals
//!
//! Unified-account endpoints for instrument rules, balance, positions,
//! leverage, market orders with attached TP/SL and closed PnL.
//! Private requests are signed with HMAC-SHA256 over
//! `timestamp + api_key + recv_window + payload`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client, Url,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

use super::Execution;
use crate::types::{ClosedPnl, InstrumentRules, OrderRequest, OrderResult, Side};

pub const BYBIT_REST_URL: &str = "https://api.bybit.com";

/// retCode returned when the requested leverage equals the current one
const LEVERAGE_NOT_MODIFIED: i64 = 110043;

/// Widest startTime..endTime span the closed-pnl endpoint accepts
const CLOSED_PNL_WINDOW_DAYS: i64 = 7;

/// Common V5 response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstrument {
    lot_size_filter: RawLotSize,
    price_filter: RawPriceFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLotSize {
    qty_step: String,
    min_order_qty: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPriceFilter {
    tick_size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWallet {
    #[serde(default)]
    total_margin_balance: Option<String>,
    #[serde(default)]
    total_wallet_balance: Option<String>,
    #[serde(default)]
    total_equity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClosedPnl {
    closed_pnl: String,
    #[serde(default)]
    created_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrderCreated {
    order_id: String,
}

/// Lowercase hex HMAC-SHA256 signature of a V5 request
pub fn sign(
    secret: &str,
    timestamp: &str,
    api_key: &str,
    recv_window: &str,
    payload: &str,
) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("Failed to initialize HMAC for Bybit signature")?;
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

/// Endpoint URL with form-encoded parameters in the given order
fn build_url(base_url: &str, path: &str, params: &[(&str, String)]) -> Result<Url> {
    let mut url = Url::parse(&format!("{}{}", base_url, path))
        .with_context(|| format!("Invalid Bybit URL for {}", path))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
}

/// Closing records stamped at or after `since`, oldest first
fn parse_closed(symbol: &str, records: Vec<RawClosedPnl>, since: DateTime<Utc>) -> Vec<ClosedPnl> {
    let mut closed: Vec<ClosedPnl> = records
        .into_iter()
        .filter_map(|r| {
            let ms = r.created_time.parse::<i64>().ok()?;
            Some(ClosedPnl {
                symbol: symbol.to_string(),
                pnl: r.closed_pnl.parse::<f64>().ok()?,
                closed_at: Utc.timestamp_millis_opt(ms).single()?,
            })
        })
        .filter(|c| c.closed_at >= since)
        .collect();
    closed.sort_by_key(|c| c.closed_at);
    closed
}

fn parse_rules(raw: &RawInstrument) -> Option<InstrumentRules> {
    Some(InstrumentRules {
        qty_step: Decimal::from_str(&raw.lot_size_filter.qty_step).ok()?,
        min_qty: Decimal::from_str(&raw.lot_size_filter.min_order_qty).ok()?,
        tick_size: Decimal::from_str(&raw.price_filter.tick_size).ok()?,
    })
}

fn parse_balance(raw: &RawWallet) -> Option<f64> {
    [
        &raw.total_margin_balance,
        &raw.total_wallet_balance,
        &raw.total_equity,
    ]
    .into_iter()
    .flatten()
    .find_map(|s| s.parse::<f64>().ok())
}

/// REST client for Bybit order execution
pub struct BybitExecution {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window: String,
    rules_cache: Mutex<HashMap<String, InstrumentRules>>,
}

impl BybitExecution {
    pub fn new(base_url: &str, api_key: String, api_secret: String, recv_window_ms: u64) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            recv_window: recv_window_ms.to_string(),
            rules_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Build from BYBIT_API_KEY / BYBIT_API_SECRET
    pub fn from_env(base_url: &str, recv_window_ms: u64) -> Result<Self> {
        let api_key = std::env::var("BYBIT_API_KEY").context("BYBIT_API_KEY not set")?;
        let api_secret = std::env::var("BYBIT_API_SECRET").context("BYBIT_API_SECRET not set")?;
        Self::new(base_url, api_key, api_secret, recv_window_ms)
    }

    fn auth_headers(&self, payload: &str) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(
            &self.api_secret,
            &timestamp,
            &self.api_key,
            &self.recv_window,
            payload,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-BAPI-API-KEY",
            HeaderValue::from_str(&self.api_key).context("Invalid X-BAPI-API-KEY header value")?,
        );
        headers.insert(
            "X-BAPI-TIMESTAMP",
            HeaderValue::from_str(&timestamp).context("Invalid X-BAPI-TIMESTAMP header value")?,
        );
        headers.insert(
            "X-BAPI-SIGN",
            HeaderValue::from_str(&signature).context("Invalid X-BAPI-SIGN header value")?,
        );
        headers.insert(
            "X-BAPI-RECV-WINDOW",
            HeaderValue::from_str(&self.recv_window)
                .context("Invalid X-BAPI-RECV-WINDOW header value")?,
        );
        Ok(headers)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<Envelope<T>> {
        let url = build_url(&self.base_url, path, params)?;
        let query = url.query().unwrap_or_default().to_string();

        let mut request = self.client.get(url);
        if signed {
            request = request.headers(self.auth_headers(&query)?);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed GET {}", path))?;
        if !response.status().is_success() {
            bail!("Bybit API returned error on {}: {}", path, response.status());
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Bybit response for {}", path))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Envelope<T>> {
        let payload = body.to_string();
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers(&payload)?)
            .body(payload)
            .send()
            .await
            .with_context(|| format!("Failed POST {}", path))?;
        if !response.status().is_success() {
            bail!("Bybit API returned error on {}: {}", path, response.status());
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Bybit response for {}", path))
    }

    async fn set_leverage(&self, symbol: &str, leverage: &str) -> Result<()> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "buyLeverage": leverage,
            "sellLeverage": leverage,
        });
        let resp: Envelope<serde_json::Value> = self.post("/v5/position/set-leverage", &body).await?;

        if resp.ret_code == 0
            || resp.ret_code == LEVERAGE_NOT_MODIFIED
            || resp.ret_msg.to_lowercase().contains("leverage not modified")
        {
            return Ok(());
        }
        bail!("set leverage failed: {} ({})", resp.ret_msg, resp.ret_code)
    }

    async fn position_list(&self, params: &[(&str, String)]) -> Result<Vec<RawPosition>> {
        let resp: Envelope<ListResult<RawPosition>> =
            self.get("/v5/position/list", params, true).await?;
        if resp.ret_code != 0 {
            bail!("position list failed: {} ({})", resp.ret_msg, resp.ret_code);
        }
        Ok(resp.result.map(|r| r.list).unwrap_or_default())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<String> {
        let leverage = request.sizing.leverage.normalize().to_string();
        self.set_leverage(&request.symbol, &leverage)
            .await
            .context("Failed to configure leverage")?;

        let mut body = serde_json::json!({
            "category": "linear",
            "symbol": request.symbol,
            "side": side_str(request.side),
            "orderType": "Market",
            "qty": request.quantity.normalize().to_string(),
            "stopLoss": request.stop_loss.normalize().to_string(),
            "orderLinkId": uuid::Uuid::new_v4().simple().to_string(),
        });
        if let Some(tp) = request.take_profit {
            body["takeProfit"] = serde_json::Value::String(tp.normalize().to_string());
            body["tpslMode"] = serde_json::Value::String("Full".to_string());
        }

        tracing::info!(
            symbol = %request.symbol,
            side = %request.side,
            qty = %request.quantity,
            stop_loss = %request.stop_loss,
            take_profit = ?request.take_profit,
            strategy = %request.strategy_label,
            "📤 Placing Bybit market order"
        );

        let resp: Envelope<RawOrderCreated> = self.post("/v5/order/create", &body).await?;
        if resp.ret_code != 0 {
            bail!("{} ({})", resp.ret_msg, resp.ret_code);
        }
        resp.result
            .map(|r| r.order_id)
            .context("Order accepted without an order id")
    }

    async fn submit_close(&self, symbol: &str, side: Side) -> Result<String> {
        let positions = self
            .position_list(&[("category", "linear".to_string()), ("symbol", symbol.to_string())])
            .await?;
        let size = positions
            .iter()
            .find(|p| p.symbol == symbol && p.side == side_str(side))
            .map(|p| p.size.clone())
            .filter(|s| s.parse::<f64>().map(|v| v > 0.0).unwrap_or(false))
            .with_context(|| format!("No open {} position for {}", side, symbol))?;

        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "side": side_str(side.opposite()),
            "orderType": "Market",
            "qty": size,
            "reduceOnly": true,
            "orderLinkId": uuid::Uuid::new_v4().simple().to_string(),
        });
        let resp: Envelope<RawOrderCreated> = self.post("/v5/order/create", &body).await?;
        if resp.ret_code != 0 {
            bail!("{} ({})", resp.ret_msg, resp.ret_code);
        }
        resp.result
            .map(|r| r.order_id)
            .context("Close accepted without an order id")
    }
}

#[async_trait]
impl Execution for BybitExecution {
    fn name(&self) -> &'static str {
        "Bybit"
    }

    async fn instrument_rules(&self, symbol: &str) -> Result<Option<InstrumentRules>> {
        if let Some(rules) = self.rules_cache.lock().await.get(symbol) {
            return Ok(Some(*rules));
        }

        let resp: Envelope<ListResult<RawInstrument>> = self
            .get(
                "/v5/market/instruments-info",
                &[("category", "linear".to_string()), ("symbol", symbol.to_string())],
                false,
            )
            .await?;
        if resp.ret_code != 0 {
            bail!("instruments-info failed: {} ({})", resp.ret_msg, resp.ret_code);
        }

        let rules = resp
            .result
            .and_then(|r| r.list.into_iter().next())
            .and_then(|raw| parse_rules(&raw));
        if let Some(rules) = rules {
            self.rules_cache.lock().await.insert(symbol.to_string(), rules);
        }
        Ok(rules)
    }

    async fn account_balance(&self) -> Option<f64> {
        let result: Result<Envelope<ListResult<RawWallet>>> = self
            .get(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string()), ("coin", "USDT".to_string())],
                true,
            )
            .await;

        match result {
            Ok(resp) if resp.ret_code == 0 => resp
                .result
                .and_then(|r| r.list.into_iter().next())
                .and_then(|w| parse_balance(&w)),
            Ok(resp) => {
                tracing::warn!(code = resp.ret_code, msg = %resp.ret_msg, "Bybit: balance query rejected");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Bybit: balance query failed");
                None
            }
        }
    }

    async fn open_positions(&self) -> Result<Vec<String>> {
        let positions = self
            .position_list(&[
                ("category", "linear".to_string()),
                ("settleCoin", "USDT".to_string()),
            ])
            .await?;
        Ok(positions
            .into_iter()
            .filter(|p| p.size.parse::<f64>().map(|s| s > 0.0).unwrap_or(false))
            .map(|p| p.symbol)
            .collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> OrderResult {
        self.submit_order(request).await.map_err(|e| {
            tracing::error!(symbol = %request.symbol, error = %e, "Bybit: order failed");
            format!("{:#}", e)
        })
    }

    async fn close_position(&self, symbol: &str, side: Side) -> OrderResult {
        self.submit_close(symbol, side).await.map_err(|e| {
            tracing::error!(symbol = %symbol, error = %e, "Bybit: close failed");
            format!("{:#}", e)
        })
    }

    async fn closed_pnl_since(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<ClosedPnl>> {
        let start = since.max(Utc::now() - ChronoDuration::days(CLOSED_PNL_WINDOW_DAYS));
        let resp: Envelope<ListResult<RawClosedPnl>> = self
            .get(
                "/v5/position/closed-pnl",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", symbol.to_string()),
                    ("startTime", start.timestamp_millis().to_string()),
                    ("limit", "50".to_string()),
                ],
                true,
            )
            .await?;
        if resp.ret_code != 0 {
            bail!("closed-pnl failed: {} ({})", resp.ret_msg, resp.ret_code);
        }
        let records = resp.result.map(|r| r.list).unwrap_or_default();
        Ok(parse_closed(symbol, records, since))
    }
}
