use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::signal::{Candle, Sample};

// ---------------------------------------------------------------------------
// Wire-format helpers — the v5 API quotes every number as a string and uses
// empty strings for absent values.
// ---------------------------------------------------------------------------

fn de_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(de::Error::custom)
}

fn de_opt_decimal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Decimal>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(de::Error::custom),
    }
}

fn de_ms_datetime<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let millis: i64 = raw.parse().map_err(de::Error::custom)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {millis}")))
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    #[serde(rename = "lastPrice", deserialize_with = "de_decimal")]
    pub last: Decimal,
    #[serde(rename = "markPrice", deserialize_with = "de_decimal")]
    pub mark: Decimal,
}

/// One OHLCV bar. The API returns kline rows as arrays of strings:
/// `[start, open, high, low, close, volume, turnover]`.
#[derive(Debug, Clone)]
pub struct Kline {
    pub start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub turnover: Decimal,
}

impl Kline {
    pub fn from_row(row: &[String]) -> anyhow::Result<Self> {
        if row.len() < 7 {
            anyhow::bail!("kline row has {} fields, expected 7", row.len());
        }
        let millis: i64 = row[0].parse()?;
        let start = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| anyhow::anyhow!("kline start out of range: {millis}"))?;
        Ok(Self {
            start,
            open: row[1].parse()?,
            high: row[2].parse()?,
            low: row[3].parse()?,
            close: row[4].parse()?,
            volume: row[5].parse()?,
            turnover: row[6].parse()?,
        })
    }
}

impl From<Kline> for Sample {
    fn from(k: Kline) -> Self {
        Sample::Candle(Candle {
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
        })
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// The exchange's own classification tag for conditional exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum StopOrderKind {
    PartialTakeProfit,
    StopLoss,
    #[serde(other)]
    #[default]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrder {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "orderStatus")]
    pub status: OrderStatus,
    #[serde(rename = "avgPrice", default, deserialize_with = "de_opt_decimal")]
    pub avg_price: Option<Decimal>,
    #[serde(rename = "triggerPrice", default, deserialize_with = "de_opt_decimal")]
    pub trigger_price: Option<Decimal>,
    #[serde(rename = "qty", deserialize_with = "de_decimal")]
    pub qty: Decimal,
    #[serde(rename = "createdTime", deserialize_with = "de_ms_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedTime", deserialize_with = "de_ms_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "stopOrderType", default)]
    pub stop_order_type: StopOrderKind,
    #[serde(rename = "createType", default)]
    pub create_type: String,
}

impl ApiOrder {
    /// True for child orders the exchange spawned from a triggered
    /// conditional (stop) order.
    pub fn created_via_stop_order(&self) -> bool {
        self.create_type == "CreateByStopOrder"
    }

    /// Average fill price, treating the API's zero placeholder as absent.
    pub fn fill_price(&self) -> Option<Decimal> {
        self.avg_price.filter(|p| !p.is_zero())
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg")]
    pub ret_msg: String,
    pub result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct ListResult<T> {
    pub list: Vec<T>,
}

/// Result of order create/cancel/amend calls.
#[derive(Debug, Deserialize)]
pub struct OrderRef {
    #[serde(rename = "orderId")]
    pub order_id: String,
}
