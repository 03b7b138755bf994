pub mod order;

pub use order::{LegKind, NewOrder, Order, OrderPatch};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// OrderKind — position direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Long,
    Short,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Long => write!(f, "long"),
            OrderKind::Short => write!(f, "short"),
        }
    }
}

// ---------------------------------------------------------------------------
// Side — exchange order side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rounding — the single place values are quantized before they cross the
// exchange/persistence boundary. Stored and submitted values must come from
// the same call so they can never diverge.
// ---------------------------------------------------------------------------

/// Prices are quoted to 1 decimal place.
pub fn round_price(value: Decimal) -> Decimal {
    value.round_dp(1)
}

/// Contract sizes are quoted to 3 decimal places.
pub fn round_size(value: Decimal) -> Decimal {
    value.round_dp(3)
}

/// Monetary values (USDT) are quoted to 2 decimal places.
pub fn round_value(value: Decimal) -> Decimal {
    value.round_dp(2)
}

// ---------------------------------------------------------------------------
// TradeResult — closed-order P&L aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TradeResult {
    pub spent: Decimal,
    pub received: Decimal,
}

impl TradeResult {
    pub fn difference(&self) -> Decimal {
        self.received - self.spent
    }
}
