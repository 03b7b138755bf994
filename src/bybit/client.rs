use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::auth::{AuthError, BybitAuth};
use super::types::{ApiOrder, ApiResponse, Kline, ListResult, OrderRef, Ticker};
use crate::models::{LegKind, NewOrder, Order};

const MAINNET_BASE: &str = "https://api.bybit.com";
const TESTNET_BASE: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW: &str = "5000";
const CATEGORY: &str = "linear";
const PAGE_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The exchange refused the specific request (bad price, margin, ...).
    #[error("request rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// Connectivity-level failure; the next poll retries.
    #[error("transport: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl ExchangeError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ExchangeError::Rejected { .. })
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::Transport(e.to_string())
    }
}

impl From<AuthError> for ExchangeError {
    fn from(e: AuthError) -> Self {
        ExchangeError::Unexpected(e.to_string())
    }
}

/// The exchange surface the lifecycle manager consumes. Injected so tests
/// can run the reconciliation pipeline against a scripted double.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn ticker(&self) -> Result<Ticker, ExchangeError>;

    /// Recent 1-minute candles in chronological order.
    async fn recent_klines(&self, limit: u32) -> Result<Vec<Kline>, ExchangeError>;

    async fn open_orders(&self) -> Result<Vec<ApiOrder>, ExchangeError>;

    async fn order_history(&self) -> Result<Vec<ApiOrder>, ExchangeError>;

    /// Submit the entry limit order; returns the exchange order id.
    async fn place_entry(&self, new: &NewOrder) -> Result<String, ExchangeError>;

    /// Submit one partial take-profit leg at `trigger` for half the
    /// position. The id is not returned here; it is reconciled later from
    /// the order list.
    async fn place_take_profit(
        &self,
        order: &Order,
        kind: LegKind,
        trigger: Decimal,
    ) -> Result<(), ExchangeError>;

    /// Submit the stop-loss for the full position at `trigger`.
    async fn place_stop_loss(&self, order: &Order, trigger: Decimal)
        -> Result<(), ExchangeError>;

    /// Submit a reduce-only market close; returns the exchange order id.
    async fn place_close(&self, order: &Order) -> Result<String, ExchangeError>;

    async fn cancel_order(&self, exchange_id: &str) -> Result<(), ExchangeError>;

    async fn amend_stop_loss(
        &self,
        exchange_id: &str,
        trigger: Decimal,
    ) -> Result<(), ExchangeError>;

    async fn set_leverage(&self, buy: Decimal, sell: Decimal) -> Result<(), ExchangeError>;
}

#[derive(Debug, Clone)]
pub struct BybitClient {
    http: Client,
    auth: BybitAuth,
    base_url: String,
    symbol: String,
}

impl BybitClient {
    pub fn new(http: Client, auth: BybitAuth, testnet: bool, symbol: String) -> Self {
        let base_url = if testnet { TESTNET_BASE } else { MAINNET_BASE };
        Self {
            http,
            auth,
            base_url: base_url.into(),
            symbol,
        }
    }

    fn timestamp() -> String {
        chrono::Utc::now().timestamp_millis().to_string()
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query_string = query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let timestamp = Self::timestamp();
        let signature = self.auth.sign(&timestamp, RECV_WINDOW, &query_string)?;

        let url = format!("{}{path}?{query_string}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("X-BAPI-API-KEY", &self.auth.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .send()
            .await?
            .error_for_status()?;

        Self::unwrap_envelope(resp.json::<ApiResponse<T>>().await?)
    }

    async fn signed_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ExchangeError> {
        let payload = body.to_string();
        let timestamp = Self::timestamp();
        let signature = self.auth.sign(&timestamp, RECV_WINDOW, &payload)?;

        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("X-BAPI-API-KEY", &self.auth.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?
            .error_for_status()?;

        Self::unwrap_envelope(resp.json::<ApiResponse<T>>().await?)
    }

    fn unwrap_envelope<T>(envelope: ApiResponse<T>) -> Result<T, ExchangeError> {
        if envelope.ret_code != 0 {
            return Err(ExchangeError::Rejected {
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }
        envelope
            .result
            .ok_or_else(|| ExchangeError::Unexpected("missing result".into()))
    }
}

#[async_trait]
impl Exchange for BybitClient {
    async fn ticker(&self) -> Result<Ticker, ExchangeError> {
        let result: ListResult<Ticker> = self
            .signed_get(
                "/v5/market/tickers",
                &[
                    ("category", CATEGORY.into()),
                    ("symbol", self.symbol.clone()),
                ],
            )
            .await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Unexpected("empty ticker list".into()))
    }

    async fn recent_klines(&self, limit: u32) -> Result<Vec<Kline>, ExchangeError> {
        let result: ListResult<Vec<String>> = self
            .signed_get(
                "/v5/market/kline",
                &[
                    ("category", CATEGORY.into()),
                    ("symbol", self.symbol.clone()),
                    ("interval", "1".into()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        // the API returns newest first
        let mut klines = Vec::with_capacity(result.list.len());
        for row in result.list.iter().rev() {
            let kline = Kline::from_row(row)
                .map_err(|e| ExchangeError::Unexpected(e.to_string()))?;
            klines.push(kline);
        }
        Ok(klines)
    }

    async fn open_orders(&self) -> Result<Vec<ApiOrder>, ExchangeError> {
        let result: ListResult<ApiOrder> = self
            .signed_get(
                "/v5/order/realtime",
                &[
                    ("category", CATEGORY.into()),
                    ("symbol", self.symbol.clone()),
                    ("limit", PAGE_LIMIT.to_string()),
                ],
            )
            .await?;
        Ok(result.list)
    }

    async fn order_history(&self) -> Result<Vec<ApiOrder>, ExchangeError> {
        let result: ListResult<ApiOrder> = self
            .signed_get(
                "/v5/order/history",
                &[
                    ("category", CATEGORY.into()),
                    ("symbol", self.symbol.clone()),
                    ("limit", PAGE_LIMIT.to_string()),
                ],
            )
            .await?;
        Ok(result.list)
    }

    async fn place_entry(&self, new: &NewOrder) -> Result<String, ExchangeError> {
        let result: OrderRef = self
            .signed_post(
                "/v5/order/create",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": self.symbol,
                    "side": new.open_side().to_string(),
                    "orderType": "Limit",
                    "price": new.price_open.to_string(),
                    "qty": new.value.to_string(),
                    "isLeverage": 1,
                    "positionIdx": new.position_idx(),
                }),
            )
            .await?;
        tracing::info!(
            order_id = %result.order_id,
            price = %new.price_open,
            qty = %new.value,
            "entry order submitted"
        );
        Ok(result.order_id)
    }

    async fn place_take_profit(
        &self,
        order: &Order,
        kind: LegKind,
        trigger: Decimal,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_post(
                "/v5/position/trading-stop",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": self.symbol,
                    "takeProfit": trigger.to_string(),
                    "tpSize": order.half_size().to_string(),
                    "positionIdx": order.position_idx(),
                    "tpslMode": "Partial",
                    "tpTriggerBy": "LastPrice",
                    "tpOrderType": "Limit",
                    "tpLimitPrice": trigger.to_string(),
                }),
            )
            .await?;
        tracing::info!(leg = kind.as_str(), %trigger, "take-profit submitted");
        Ok(())
    }

    async fn place_stop_loss(
        &self,
        order: &Order,
        trigger: Decimal,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_post(
                "/v5/position/trading-stop",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": self.symbol,
                    "stopLoss": trigger.to_string(),
                    "slSize": order.value.to_string(),
                    "positionIdx": order.position_idx(),
                    "tpslMode": "Partial",
                    "slTriggerBy": "MarkPrice",
                }),
            )
            .await?;
        tracing::info!(%trigger, "stop-loss submitted");
        Ok(())
    }

    async fn place_close(&self, order: &Order) -> Result<String, ExchangeError> {
        let result: OrderRef = self
            .signed_post(
                "/v5/order/create",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": self.symbol,
                    "side": order.close_side().to_string(),
                    "orderType": "Market",
                    "qty": "0",
                    "isLeverage": 1,
                    "positionIdx": order.position_idx(),
                    "reduceOnly": true,
                    "closeOnTrigger": true,
                }),
            )
            .await?;
        tracing::info!(order_id = %result.order_id, "close order submitted");
        Ok(result.order_id)
    }

    async fn cancel_order(&self, exchange_id: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_post(
                "/v5/order/cancel",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": self.symbol,
                    "orderId": exchange_id,
                }),
            )
            .await?;
        tracing::info!(order_id = exchange_id, "order cancelled");
        Ok(())
    }

    async fn amend_stop_loss(
        &self,
        exchange_id: &str,
        trigger: Decimal,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_post(
                "/v5/order/amend",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": self.symbol,
                    "orderId": exchange_id,
                    "triggerPrice": trigger.to_string(),
                }),
            )
            .await?;
        tracing::info!(order_id = exchange_id, %trigger, "stop-loss amended");
        Ok(())
    }

    async fn set_leverage(&self, buy: Decimal, sell: Decimal) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_post(
                "/v5/position/set-leverage",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": self.symbol,
                    "buyLeverage": buy.to_string(),
                    "sellLeverage": sell.to_string(),
                }),
            )
            .await?;
        tracing::info!(%buy, %sell, "leverage set");
        Ok(())
    }
}
