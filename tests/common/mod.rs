use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use perpbot::bybit::types::{ApiOrder, Ticker};
use perpbot::bybit::{Exchange, ExchangeError, Kline};
use perpbot::db::{OrderStore, StoreError};
use perpbot::models::{LegKind, NewOrder, Order, OrderKind, OrderPatch, TradeResult};
use perpbot::signal::{DirectionSource, Sample};

#[allow(dead_code)]
pub fn dec(s: &str) -> Decimal {
    s.parse().expect("decimal literal")
}

// ---------------------------------------------------------------------------
// MockExchange — scripted exchange double that records every mutating call
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockExchange {
    pub ticker: Mutex<Option<Ticker>>,
    pub api_orders: Mutex<Vec<ApiOrder>>,
    pub klines: Mutex<Vec<Kline>>,

    pub placed_entries: Mutex<Vec<NewOrder>>,
    pub placed_tps: Mutex<Vec<(LegKind, Decimal)>>,
    pub placed_sls: Mutex<Vec<Decimal>>,
    pub placed_closes: Mutex<Vec<Uuid>>,
    pub cancelled: Mutex<Vec<String>>,
    pub amended: Mutex<Vec<(String, Decimal)>>,
    pub leverage_calls: Mutex<Vec<(Decimal, Decimal)>>,

    pub reject_entries: Mutex<bool>,
    pub reject_legs: Mutex<bool>,
    pub reject_closes: Mutex<bool>,
    pub fail_cancel: Mutex<bool>,
    pub reject_amend: Mutex<bool>,

    next_id: AtomicU64,
}

#[allow(dead_code)]
impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ticker(&self, last: &str, mark: &str) {
        *self.ticker.lock().unwrap() = Some(Ticker {
            last: dec(last),
            mark: dec(mark),
        });
    }

    pub fn set_api_orders(&self, orders: Vec<ApiOrder>) {
        *self.api_orders.lock().unwrap() = orders;
    }

    /// Total number of mutating calls made against the exchange.
    pub fn mutation_count(&self) -> usize {
        self.placed_entries.lock().unwrap().len()
            + self.placed_tps.lock().unwrap().len()
            + self.placed_sls.lock().unwrap().len()
            + self.placed_closes.lock().unwrap().len()
            + self.cancelled.lock().unwrap().len()
            + self.amended.lock().unwrap().len()
            + self.leverage_calls.lock().unwrap().len()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn rejected() -> ExchangeError {
        ExchangeError::Rejected {
            code: 110_007,
            message: "rejected by test double".into(),
        }
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn ticker(&self) -> Result<Ticker, ExchangeError> {
        self.ticker
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ExchangeError::Unexpected("ticker not scripted".into()))
    }

    async fn recent_klines(&self, _limit: u32) -> Result<Vec<Kline>, ExchangeError> {
        Ok(self.klines.lock().unwrap().clone())
    }

    async fn open_orders(&self) -> Result<Vec<ApiOrder>, ExchangeError> {
        Ok(self.api_orders.lock().unwrap().clone())
    }

    async fn order_history(&self) -> Result<Vec<ApiOrder>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn place_entry(&self, new: &NewOrder) -> Result<String, ExchangeError> {
        if *self.reject_entries.lock().unwrap() {
            return Err(Self::rejected());
        }
        self.placed_entries.lock().unwrap().push(new.clone());
        Ok(self.fresh_id("entry"))
    }

    async fn place_take_profit(
        &self,
        _order: &Order,
        kind: LegKind,
        trigger: Decimal,
    ) -> Result<(), ExchangeError> {
        if *self.reject_legs.lock().unwrap() {
            return Err(Self::rejected());
        }
        self.placed_tps.lock().unwrap().push((kind, trigger));
        Ok(())
    }

    async fn place_stop_loss(
        &self,
        _order: &Order,
        trigger: Decimal,
    ) -> Result<(), ExchangeError> {
        if *self.reject_legs.lock().unwrap() {
            return Err(Self::rejected());
        }
        self.placed_sls.lock().unwrap().push(trigger);
        Ok(())
    }

    async fn place_close(&self, order: &Order) -> Result<String, ExchangeError> {
        if *self.reject_closes.lock().unwrap() {
            return Err(Self::rejected());
        }
        self.placed_closes.lock().unwrap().push(order.id);
        Ok(self.fresh_id("close"))
    }

    async fn cancel_order(&self, exchange_id: &str) -> Result<(), ExchangeError> {
        if *self.fail_cancel.lock().unwrap() {
            return Err(ExchangeError::Transport("connection reset".into()));
        }
        self.cancelled.lock().unwrap().push(exchange_id.into());
        Ok(())
    }

    async fn amend_stop_loss(
        &self,
        exchange_id: &str,
        trigger: Decimal,
    ) -> Result<(), ExchangeError> {
        if *self.reject_amend.lock().unwrap() {
            return Err(Self::rejected());
        }
        self.amended
            .lock()
            .unwrap()
            .push((exchange_id.into(), trigger));
        Ok(())
    }

    async fn set_leverage(&self, buy: Decimal, sell: Decimal) -> Result<(), ExchangeError> {
        self.leverage_calls.lock().unwrap().push((buy, sell));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore — in-memory order store with a write counter
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    pub orders: Mutex<Vec<Order>>,
    pub writes: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, order: Order) {
        self.orders.lock().unwrap().push(order);
    }

    pub fn first(&self) -> Order {
        self.orders.lock().unwrap()[0].clone()
    }

    pub fn count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn apply_patch(order: &mut Order, patch: OrderPatch) {
    if let Some(v) = patch.price_open {
        order.price_open = v;
    }
    if let Some(v) = patch.price_tp1 {
        order.price_tp1 = v;
    }
    if let Some(v) = patch.price_tp2 {
        order.price_tp2 = v;
    }
    if let Some(v) = patch.price_sl {
        order.price_sl = v;
    }
    if patch.price_close.is_some() {
        order.price_close = patch.price_close;
    }
    if patch.open_at.is_some() {
        order.open_at = patch.open_at;
    }
    if patch.tp1_at.is_some() {
        order.tp1_at = patch.tp1_at;
    }
    if patch.tp2_at.is_some() {
        order.tp2_at = patch.tp2_at;
    }
    if patch.sl_at.is_some() {
        order.sl_at = patch.sl_at;
    }
    if patch.close_at.is_some() {
        order.close_at = patch.close_at;
    }
    if patch.tp1_executed_at.is_some() {
        order.tp1_executed_at = patch.tp1_executed_at;
    }
    if patch.tp2_executed_at.is_some() {
        order.tp2_executed_at = patch.tp2_executed_at;
    }
    if patch.sl_executed_at.is_some() {
        order.sl_executed_at = patch.sl_executed_at;
    }
    if patch.tp1_order_id.is_some() {
        order.tp1_order_id = patch.tp1_order_id;
    }
    if patch.tp2_order_id.is_some() {
        order.tp2_order_id = patch.tp2_order_id;
    }
    if patch.sl_order_id.is_some() {
        order.sl_order_id = patch.sl_order_id;
    }
    if patch.close_order_id.is_some() {
        order.close_order_id = patch.close_order_id;
    }
    order.updated_at = Some(Utc::now());
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_open(&self, reverse: bool) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        let open: Vec<&Order> = orders
            .iter()
            .filter(|o| o.close_at.is_none() && o.reverse == reverse)
            .collect();
        if open.len() > 1 {
            return Err(StoreError::Conflict(open.len()));
        }
        Ok(open.first().map(|o| (*o).clone()))
    }

    async fn insert(&self, new: &NewOrder, entry_order_id: &str) -> Result<Order, StoreError> {
        let order = Order {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: None,
            order_type: new.order_type,
            value: new.value,
            value_tokens: new.value_tokens,
            leverage: new.leverage,
            price_open: new.price_open,
            price_tp1: new.price_tp1,
            price_tp2: new.price_tp2,
            price_sl: new.price_sl,
            price_close: None,
            open_at: None,
            tp1_at: None,
            tp2_at: None,
            sl_at: None,
            close_at: None,
            tp1_executed_at: None,
            tp2_executed_at: None,
            sl_executed_at: None,
            entry_order_id: entry_order_id.into(),
            tp1_order_id: None,
            tp2_order_id: None,
            sl_order_id: None,
            close_order_id: None,
            reverse: new.reverse,
        };
        self.orders.lock().unwrap().push(order.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(order)
    }

    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<Order, StoreError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(StoreError::NotFound)?;
        apply_patch(order, patch);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(order.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().unwrap();
        let before = orders.len();
        orders.retain(|o| o.id != id);
        if orders.len() == before {
            return Err(StoreError::NotFound);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn trade_result(&self) -> Result<TradeResult, StoreError> {
        let orders = self.orders.lock().unwrap();
        let mut spent = Decimal::ZERO;
        let mut received = Decimal::ZERO;
        for o in orders.iter().filter(|o| o.close_at.is_some()) {
            spent += o.value * o.price_open;
            received += o.value * o.price_close.unwrap_or_default();
        }
        Ok(TradeResult { spent, received })
    }
}

// ---------------------------------------------------------------------------
// StubSignal — scripted direction source with shared handles
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct StubSignal {
    pub direction: Arc<Mutex<Option<OrderKind>>>,
    pub atr: Arc<Mutex<Option<Decimal>>>,
    pub history_loaded: Arc<Mutex<usize>>,
}

#[allow(dead_code)]
impl StubSignal {
    pub fn voting(direction: Option<OrderKind>, atr: Option<Decimal>) -> Self {
        Self {
            direction: Arc::new(Mutex::new(direction)),
            atr: Arc::new(Mutex::new(atr)),
            history_loaded: Arc::new(Mutex::new(0)),
        }
    }

    pub fn set_direction(&self, direction: Option<OrderKind>) {
        *self.direction.lock().unwrap() = direction;
    }
}

impl DirectionSource for StubSignal {
    fn load_history(&mut self, samples: Vec<Sample>) {
        *self.history_loaded.lock().unwrap() = samples.len();
    }

    fn observe(&mut self, _sample: Sample, _now: DateTime<Utc>) {}

    fn direction(&self) -> Option<OrderKind> {
        *self.direction.lock().unwrap()
    }

    fn atr(&self, _period: usize) -> Option<Decimal> {
        *self.atr.lock().unwrap()
    }
}
