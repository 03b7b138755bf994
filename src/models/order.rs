use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{round_price, round_size, round_value, OrderKind, Side};

/// Notional budget per entry, in USDT. Position size is
/// `leverage * NOTIONAL_BUDGET / price_open`.
pub const NOTIONAL_BUDGET: u32 = 20;

// ---------------------------------------------------------------------------
// LegKind — the three exit legs attached to an open position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegKind {
    Tp1,
    Tp2,
    Sl,
}

impl LegKind {
    pub const ALL: [LegKind; 3] = [LegKind::Tp1, LegKind::Tp2, LegKind::Sl];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegKind::Tp1 => "tp1",
            LegKind::Tp2 => "tp2",
            LegKind::Sl => "sl",
        }
    }
}

/// Borrowed, kind-indexed view over one leg's columns.
#[derive(Debug, Clone, Copy)]
pub struct LegView<'a> {
    pub kind: LegKind,
    pub price: Decimal,
    pub requested_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub exchange_id: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Order — database row, one per position attempt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    pub order_type: OrderKind,
    /// Position size in base units (e.g. BTC).
    pub value: Decimal,
    /// Size * entry price, informational.
    pub value_tokens: Decimal,
    pub leverage: Decimal,

    pub price_open: Decimal,
    pub price_tp1: Decimal,
    pub price_tp2: Decimal,
    pub price_sl: Decimal,
    pub price_close: Option<Decimal>,

    pub open_at: Option<DateTime<Utc>>,
    pub tp1_at: Option<DateTime<Utc>>,
    pub tp2_at: Option<DateTime<Utc>>,
    pub sl_at: Option<DateTime<Utc>>,
    pub close_at: Option<DateTime<Utc>>,

    pub tp1_executed_at: Option<DateTime<Utc>>,
    pub tp2_executed_at: Option<DateTime<Utc>>,
    pub sl_executed_at: Option<DateTime<Utc>>,

    pub entry_order_id: String,
    pub tp1_order_id: Option<String>,
    pub tp2_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub close_order_id: Option<String>,

    /// Alternate sizing/threshold profile used by the legacy hedging
    /// variant of the entry rule. Kept for schema compatibility.
    pub reverse: bool,
}

impl Order {
    pub fn open_side(&self) -> Side {
        match self.order_type {
            OrderKind::Long => Side::Buy,
            OrderKind::Short => Side::Sell,
        }
    }

    pub fn close_side(&self) -> Side {
        match self.order_type {
            OrderKind::Long => Side::Sell,
            OrderKind::Short => Side::Buy,
        }
    }

    /// Hedge-mode position slot: 1 = long side, 2 = short side.
    pub fn position_idx(&self) -> u8 {
        match self.order_type {
            OrderKind::Long => 1,
            OrderKind::Short => 2,
        }
    }

    /// Quantity of one take-profit leg. tp1 closes half the position.
    pub fn half_size(&self) -> Decimal {
        round_size(self.value / Decimal::from(2))
    }

    pub fn is_closed(&self) -> bool {
        self.close_at.is_some()
    }

    /// All three exit legs have been requested at least once.
    pub fn all_legs_requested(&self) -> bool {
        self.tp1_at.is_some() && self.tp2_at.is_some() && self.sl_at.is_some()
    }

    /// All three exit legs have a confirmed exchange order id.
    pub fn all_leg_ids_known(&self) -> bool {
        LegKind::ALL.iter().all(|k| self.leg(*k).exchange_id.is_some())
    }

    pub fn leg(&self, kind: LegKind) -> LegView<'_> {
        match kind {
            LegKind::Tp1 => LegView {
                kind,
                price: self.price_tp1,
                requested_at: self.tp1_at,
                executed_at: self.tp1_executed_at,
                exchange_id: self.tp1_order_id.as_deref(),
            },
            LegKind::Tp2 => LegView {
                kind,
                price: self.price_tp2,
                requested_at: self.tp2_at,
                executed_at: self.tp2_executed_at,
                exchange_id: self.tp2_order_id.as_deref(),
            },
            LegKind::Sl => LegView {
                kind,
                price: self.price_sl,
                requested_at: self.sl_at,
                executed_at: self.sl_executed_at,
                exchange_id: self.sl_order_id.as_deref(),
            },
        }
    }

    /// Break-even-protected stop target: 0.1% past the entry price, in the
    /// profitable direction. Used when the trailing stop ratchets.
    pub fn trail_price(&self) -> Decimal {
        let offset = match self.order_type {
            OrderKind::Long => Decimal::new(1001, 3),  // 1.001
            OrderKind::Short => Decimal::new(999, 3),  // 0.999
        };
        round_price(self.price_open * offset)
    }

    /// Price band that triggered the legacy reverse-hedge entry. Carried
    /// over as-is; the two-leg lifecycle loop does not act on it.
    pub fn in_reverse_band(&self, price: Decimal) -> bool {
        match self.order_type {
            OrderKind::Long => {
                self.price_open * Decimal::new(99, 2) < price
                    && price < self.price_open * Decimal::new(995, 3)
            }
            OrderKind::Short => {
                self.price_open * Decimal::new(1005, 3) < price
                    && price < self.price_open * Decimal::new(101, 2)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// NewOrder — computed construction of a position attempt
// ---------------------------------------------------------------------------

/// Everything derived at the moment the manager decides to enter. The exit
/// targets are fixed here, once, from an ATR multiple, and the same rounded
/// values are both submitted to the exchange and persisted.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_type: OrderKind,
    pub price_open: Decimal,
    pub leverage: Decimal,
    pub atr: Decimal,
    pub reverse: bool,

    pub value: Decimal,
    pub value_tokens: Decimal,
    pub price_tp1: Decimal,
    pub price_tp2: Decimal,
    pub price_sl: Decimal,
}

impl NewOrder {
    pub fn new(order_type: OrderKind, price: Decimal, leverage: Decimal, atr: Decimal) -> Self {
        let price_open = round_price(price);
        let value = round_size(leverage * Decimal::from(NOTIONAL_BUDGET) / price_open);
        let value_tokens = round_value(value * price_open);

        // tp1/sl sit one ATR from the entry, tp2 two and a half.
        let tp2_offset = atr * Decimal::new(25, 1);
        let (price_tp1, price_tp2, price_sl) = match order_type {
            OrderKind::Long => (
                round_price(price_open + atr),
                round_price(price_open + tp2_offset),
                round_price(price_open - atr),
            ),
            OrderKind::Short => (
                round_price(price_open - atr),
                round_price(price_open - tp2_offset),
                round_price(price_open + atr),
            ),
        };

        Self {
            order_type,
            price_open,
            leverage,
            atr,
            reverse: false,
            value,
            value_tokens,
            price_tp1,
            price_tp2,
            price_sl,
        }
    }

    pub fn open_side(&self) -> Side {
        match self.order_type {
            OrderKind::Long => Side::Buy,
            OrderKind::Short => Side::Sell,
        }
    }

    pub fn position_idx(&self) -> u8 {
        match self.order_type {
            OrderKind::Long => 1,
            OrderKind::Short => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// OrderPatch — one mutation group, applied as a single UPDATE
// ---------------------------------------------------------------------------

/// A set of field changes that must become visible together. The store
/// applies a patch as one UPDATE statement so a crash between poll cycles
/// never leaves a partially written step behind.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub price_open: Option<Decimal>,
    pub price_tp1: Option<Decimal>,
    pub price_tp2: Option<Decimal>,
    pub price_sl: Option<Decimal>,
    pub price_close: Option<Decimal>,

    pub open_at: Option<DateTime<Utc>>,
    pub tp1_at: Option<DateTime<Utc>>,
    pub tp2_at: Option<DateTime<Utc>>,
    pub sl_at: Option<DateTime<Utc>>,
    pub close_at: Option<DateTime<Utc>>,

    pub tp1_executed_at: Option<DateTime<Utc>>,
    pub tp2_executed_at: Option<DateTime<Utc>>,
    pub sl_executed_at: Option<DateTime<Utc>>,

    pub tp1_order_id: Option<String>,
    pub tp2_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub close_order_id: Option<String>,
}

impl OrderPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(mut self, at: DateTime<Utc>, price: Decimal) -> Self {
        self.open_at = Some(at);
        self.price_open = Some(price);
        self
    }

    pub fn closed(mut self, at: DateTime<Utc>, price: Decimal) -> Self {
        self.close_at = Some(at);
        self.price_close = Some(price);
        self
    }

    pub fn close_id(mut self, id: &str) -> Self {
        self.close_order_id = Some(id.to_string());
        self
    }

    pub fn leg_requested(mut self, kind: LegKind, at: DateTime<Utc>) -> Self {
        match kind {
            LegKind::Tp1 => self.tp1_at = Some(at),
            LegKind::Tp2 => self.tp2_at = Some(at),
            LegKind::Sl => self.sl_at = Some(at),
        }
        self
    }

    pub fn leg_price(mut self, kind: LegKind, price: Decimal) -> Self {
        match kind {
            LegKind::Tp1 => self.price_tp1 = Some(price),
            LegKind::Tp2 => self.price_tp2 = Some(price),
            LegKind::Sl => self.price_sl = Some(price),
        }
        self
    }

    pub fn leg_id(mut self, kind: LegKind, id: &str) -> Self {
        match kind {
            LegKind::Tp1 => self.tp1_order_id = Some(id.to_string()),
            LegKind::Tp2 => self.tp2_order_id = Some(id.to_string()),
            LegKind::Sl => self.sl_order_id = Some(id.to_string()),
        }
        self
    }

    pub fn leg_executed(mut self, kind: LegKind, at: DateTime<Utc>) -> Self {
        match kind {
            LegKind::Tp1 => self.tp1_executed_at = Some(at),
            LegKind::Tp2 => self.tp2_executed_at = Some(at),
            LegKind::Sl => self.sl_executed_at = Some(at),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.price_open.is_none()
            && self.price_tp1.is_none()
            && self.price_tp2.is_none()
            && self.price_sl.is_none()
            && self.price_close.is_none()
            && self.open_at.is_none()
            && self.tp1_at.is_none()
            && self.tp2_at.is_none()
            && self.sl_at.is_none()
            && self.close_at.is_none()
            && self.tp1_executed_at.is_none()
            && self.tp2_executed_at.is_none()
            && self.sl_executed_at.is_none()
            && self.tp1_order_id.is_none()
            && self.tp2_order_id.is_none()
            && self.sl_order_id.is_none()
            && self.close_order_id.is_none()
    }
}
