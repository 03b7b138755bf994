use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::bybit::types::{ApiOrder, OrderStatus, StopOrderKind, Ticker};
use crate::bybit::Exchange;
use crate::db::OrderStore;
use crate::errors::BotError;
use crate::models::{round_price, LegKind, NewOrder, Order, OrderKind, OrderPatch};
use crate::signal::{DirectionSource, Sample};

/// ATR lookback used for the entry gate and the exit targets.
const ATR_PERIOD: usize = 14;

/// Minimum ATR as a fraction of price; entries below this are skipped.
const ATR_FLOOR_RATIO: Decimal = Decimal::from_parts(15, 0, 0, false, 4); // 0.0015

/// Candles requested at startup to seed the indicator window.
const HISTORY_DEPTH: u32 = 1000;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub leverage: Decimal,
    pub poll_interval: Duration,
}

/// Single-position lifecycle loop. Each poll cycle reconciles the one open
/// database row against the exchange's view of its orders and advances it
/// one step: open confirmation, exit-leg placement, fill detection, stop
/// trailing and forced closes. With no open row it evaluates an entry.
pub struct Manager<E, S, D> {
    exchange: E,
    store: S,
    signal: D,
    settings: ManagerSettings,
    leverage_sent: Option<(Decimal, Decimal)>,
}

impl<E, S, D> Manager<E, S, D>
where
    E: Exchange,
    S: OrderStore,
    D: DirectionSource,
{
    pub fn new(exchange: E, store: S, signal: D, settings: ManagerSettings) -> Self {
        Self {
            exchange,
            store,
            signal,
            settings,
            leverage_sent: None,
        }
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Seed the slow indicator timeframe from recent candles so the first
    /// direction vote does not have to wait for the window to fill live.
    pub async fn preload_history(&mut self) -> Result<(), BotError> {
        let klines = self.exchange.recent_klines(HISTORY_DEPTH).await?;
        let count = klines.len();
        self.signal
            .load_history(klines.into_iter().map(Sample::from).collect());
        tracing::info!(count, "indicator history seeded");
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), BotError> {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                if e.is_fatal() {
                    tracing::error!(error = %e, "halting");
                    return Err(e);
                }
                tracing::error!(error = %e, "poll cycle failed");
            }
        }
    }

    pub async fn tick(&mut self) -> Result<(), BotError> {
        let ticker = self.exchange.ticker().await?;
        self.signal
            .observe(Sample::Tick { close: ticker.last }, Utc::now());

        let mut api_orders = self.exchange.open_orders().await?;
        api_orders.extend(self.exchange.order_history().await?);

        let result = self.store.trade_result().await?;
        tracing::info!(
            last = %ticker.last,
            spent = %result.spent,
            received = %result.received,
            pnl = %result.difference(),
            "cycle"
        );

        match self.store.find_open(false).await? {
            Some(order) => self.manage(order, &api_orders, &ticker).await,
            None => self.try_open(ticker.last).await,
        }
    }

    async fn manage(
        &mut self,
        order: Order,
        api_orders: &[ApiOrder],
        ticker: &Ticker,
    ) -> Result<(), BotError> {
        let Some(mut order) = self.check_opening(order, api_orders, ticker.last).await? else {
            return Ok(());
        };
        order = self.reconcile_leg_ids(order, api_orders).await?;
        order = self
            .place_take_profit(order, LegKind::Tp1, ticker.last)
            .await?;
        order = self
            .place_take_profit(order, LegKind::Tp2, ticker.last)
            .await?;
        order = self.place_stop_loss(order, ticker.last).await?;
        order = self.detect_fills(order, api_orders).await?;
        order = self.trail_stop(order).await?;
        self.check_forced_close(order, ticker.mark).await
    }

    /// Resolve the state of an entry that has not been confirmed open yet.
    /// Returns `None` when the row was abandoned and deleted.
    async fn check_opening(
        &mut self,
        order: Order,
        api_orders: &[ApiOrder],
        price: Decimal,
    ) -> Result<Option<Order>, BotError> {
        if order.open_at.is_some() {
            return Ok(Some(order));
        }
        let Some(api) = api_orders
            .iter()
            .find(|a| a.order_id == order.entry_order_id)
        else {
            return Ok(Some(order));
        };

        match api.status {
            OrderStatus::Filled => {
                let price_open = api.fill_price().unwrap_or(order.price_open);
                let updated = self
                    .store
                    .update(order.id, OrderPatch::new().opened(Utc::now(), price_open))
                    .await?;
                tracing::info!(id = %updated.id, price = %price_open, "entry filled");
                Ok(Some(updated))
            }
            OrderStatus::Cancelled => {
                if let Some(avg) = api.fill_price() {
                    // cancelled after a partial fill: record the position as
                    // opened and closed at the same price and skip the legs
                    let now = Utc::now();
                    let patch = OrderPatch::new()
                        .opened(now, avg)
                        .closed(now, avg)
                        .leg_requested(LegKind::Tp1, now)
                        .leg_requested(LegKind::Tp2, now)
                        .leg_requested(LegKind::Sl, now);
                    let updated = self.store.update(order.id, patch).await?;
                    tracing::warn!(id = %updated.id, %avg, "entry cancelled with a fill");
                    Ok(Some(updated))
                } else {
                    self.store.delete(order.id).await?;
                    tracing::info!(id = %order.id, "entry cancelled externally, row dropped");
                    Ok(None)
                }
            }
            _ => {
                // the entry is resting: abandon it if the market ran away or
                // the signal no longer agrees with the direction, a flipped
                // vote and a withdrawn one both count
                let ran_away = match order.order_type {
                    OrderKind::Long => price >= order.price_open * Decimal::new(1005, 3),
                    OrderKind::Short => price <= order.price_open * Decimal::new(995, 3),
                };
                let vote_lost = self.signal.direction() != Some(order.order_type);
                if ran_away || vote_lost {
                    self.exchange.cancel_order(&order.entry_order_id).await?;
                    self.store.delete(order.id).await?;
                    tracing::info!(id = %order.id, ran_away, vote_lost, "resting entry abandoned");
                    return Ok(None);
                }
                Ok(Some(order))
            }
        }
    }

    /// Attach exchange ids to exit legs that were requested through the
    /// position endpoint, which does not return them directly.
    async fn reconcile_leg_ids(
        &self,
        order: Order,
        api_orders: &[ApiOrder],
    ) -> Result<Order, BotError> {
        if order.is_closed() {
            return Ok(order);
        }
        let mut patch = OrderPatch::new();
        for kind in LegKind::ALL {
            let leg = order.leg(kind);
            if leg.exchange_id.is_some() || leg.requested_at.is_none() {
                continue;
            }
            if let Some(api) = api_orders.iter().find(|a| leg_matches(&order, a, kind)) {
                patch = patch.leg_id(kind, &api.order_id);
                tracing::info!(id = %order.id, leg = kind.as_str(), exchange_id = %api.order_id, "leg id reconciled");
            }
        }
        if patch.is_empty() {
            return Ok(order);
        }
        Ok(self.store.update(order.id, patch).await?)
    }

    async fn place_take_profit(
        &self,
        order: Order,
        kind: LegKind,
        price: Decimal,
    ) -> Result<Order, BotError> {
        if order.is_closed() || order.open_at.is_none() {
            return Ok(order);
        }
        let leg = order.leg(kind);
        if leg.exchange_id.is_some() || leg.requested_at.is_some() {
            return Ok(order);
        }

        // if the market has already passed the stored target, trigger at the
        // current price instead so the exchange accepts the request
        let passed = match order.order_type {
            OrderKind::Long => price >= leg.price,
            OrderKind::Short => price <= leg.price,
        };
        let trigger = if passed { round_price(price) } else { leg.price };

        match self.exchange.place_take_profit(&order, kind, trigger).await {
            Ok(()) => {
                let mut patch = OrderPatch::new().leg_requested(kind, Utc::now());
                if trigger != leg.price {
                    patch = patch.leg_price(kind, trigger);
                }
                Ok(self.store.update(order.id, patch).await?)
            }
            Err(e) if e.is_rejected() => {
                tracing::warn!(id = %order.id, leg = kind.as_str(), error = %e, "take-profit rejected");
                Ok(order)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn place_stop_loss(&self, order: Order, price: Decimal) -> Result<Order, BotError> {
        if order.is_closed() || order.open_at.is_none() {
            return Ok(order);
        }
        let leg = order.leg(LegKind::Sl);
        if leg.exchange_id.is_some() || leg.requested_at.is_some() {
            return Ok(order);
        }

        let passed = match order.order_type {
            OrderKind::Long => price <= leg.price,
            OrderKind::Short => price >= leg.price,
        };
        let trigger = if passed { round_price(price) } else { leg.price };

        match self.exchange.place_stop_loss(&order, trigger).await {
            Ok(()) => {
                let mut patch = OrderPatch::new().leg_requested(LegKind::Sl, Utc::now());
                if trigger != leg.price {
                    patch = patch.leg_price(LegKind::Sl, trigger);
                }
                Ok(self.store.update(order.id, patch).await?)
            }
            Err(e) if e.is_rejected() => {
                tracing::warn!(id = %order.id, error = %e, "stop-loss rejected");
                Ok(order)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Walk the exchange's order list for fills of our exit legs or of the
    /// forced-close order, recording each as it is found.
    async fn detect_fills(&self, order: Order, api_orders: &[ApiOrder]) -> Result<Order, BotError> {
        if order.is_closed() {
            return Ok(order);
        }
        let armed = order.all_legs_requested()
            || (order.close_order_id.is_some() && order.close_at.is_none());
        if !armed {
            return Ok(order);
        }

        let mut current = order;
        for api in api_orders {
            if current.is_closed() {
                break;
            }
            let is_close = current.close_order_id.as_deref() == Some(api.order_id.as_str());
            if api.trigger_price.is_none() && !is_close && !api.created_via_stop_order() {
                continue;
            }
            if api.status != OrderStatus::Filled {
                continue;
            }

            let now = Utc::now();
            let fill = api.fill_price();
            let patch = if current.tp1_order_id.as_deref() == Some(api.order_id.as_str()) {
                if current.tp1_executed_at.is_some() {
                    continue;
                }
                tracing::info!(id = %current.id, "tp1 filled, half closed");
                OrderPatch::new().leg_executed(LegKind::Tp1, now)
            } else if current.tp2_order_id.as_deref() == Some(api.order_id.as_str()) {
                if current.tp2_executed_at.is_some() {
                    continue;
                }
                let price = fill.unwrap_or(current.price_tp2);
                tracing::info!(id = %current.id, %price, "tp2 filled, position closed");
                OrderPatch::new()
                    .leg_executed(LegKind::Tp2, now)
                    .closed(now, price)
                    .close_id(&api.order_id)
            } else if current.sl_order_id.as_deref() == Some(api.order_id.as_str()) {
                if current.sl_executed_at.is_some() {
                    continue;
                }
                let price = fill.unwrap_or(current.price_sl);
                tracing::info!(id = %current.id, %price, "stop filled, position closed");
                OrderPatch::new()
                    .leg_executed(LegKind::Sl, now)
                    .closed(now, price)
                    .close_id(&api.order_id)
            } else if is_close {
                let price = fill.unwrap_or(current.price_open);
                tracing::info!(id = %current.id, %price, "forced close filled");
                OrderPatch::new().closed(now, price)
            } else if api.created_via_stop_order()
                && api.stop_order_type == StopOrderKind::StopLoss
                && api.trigger_price == Some(current.price_sl)
            {
                // market order the exchange spawned when our stop triggered;
                // its id differs from the stop order we placed
                if current.sl_executed_at.is_some() {
                    continue;
                }
                let price = fill.unwrap_or(current.price_sl);
                tracing::info!(id = %current.id, %price, "stop child filled, position closed");
                OrderPatch::new()
                    .leg_executed(LegKind::Sl, now)
                    .closed(now, price)
                    .close_id(&api.order_id)
            } else {
                continue;
            };

            current = self.store.update(current.id, patch).await?;
        }
        Ok(current)
    }

    /// After tp1 executes, move the stop to just past break-even. The stored
    /// stop price ratchets, so this fires at most once per position.
    async fn trail_stop(&self, order: Order) -> Result<Order, BotError> {
        if order.is_closed() || order.tp1_executed_at.is_none() {
            return Ok(order);
        }
        let Some(sl_id) = order.sl_order_id.clone() else {
            return Ok(order);
        };
        let losing_stop = match order.order_type {
            OrderKind::Long => order.price_sl < order.price_open,
            OrderKind::Short => order.price_sl > order.price_open,
        };
        if !losing_stop {
            return Ok(order);
        }

        let target = order.trail_price();
        if let Err(e) = self.exchange.amend_stop_loss(&sl_id, target).await {
            tracing::warn!(id = %order.id, error = %e, "stop-loss amend failed");
            return Ok(order);
        }
        tracing::info!(id = %order.id, %target, "stop trailed past break-even");
        Ok(self
            .store
            .update(order.id, OrderPatch::new().leg_price(LegKind::Sl, target))
            .await?)
    }

    /// Close at market when the stop should already have fired, when the
    /// mark price slips past break-even, or when the trend reverses after
    /// tp1 and gives back most of the move.
    async fn check_forced_close(&mut self, order: Order, mark: Decimal) -> Result<(), BotError> {
        if order.is_closed() || order.close_order_id.is_some() || !order.all_leg_ids_known() {
            return Ok(());
        }

        // strictly past the stop; at exactly the trigger price the stop
        // order itself is still expected to fire
        let sl_crossed = match order.order_type {
            OrderKind::Long => mark < order.price_sl,
            OrderKind::Short => mark > order.price_sl,
        };
        let past_breakeven = match order.order_type {
            OrderKind::Long => order.price_open * Decimal::new(998, 3) > mark,
            OrderKind::Short => order.price_open * Decimal::new(1002, 3) < mark,
        };
        let retraced = order.tp1_executed_at.is_some()
            && self
                .signal
                .direction()
                .is_some_and(|d| d != order.order_type)
            && match order.order_type {
                OrderKind::Long => mark < order.price_tp1 * Decimal::new(998, 3),
                OrderKind::Short => mark > order.price_tp1 * Decimal::new(1002, 3),
            };

        if !(sl_crossed || past_breakeven || retraced) {
            return Ok(());
        }

        match self.exchange.place_close(&order).await {
            Ok(id) => {
                self.store
                    .update(order.id, OrderPatch::new().close_id(&id))
                    .await?;
                tracing::info!(
                    id = %order.id, %mark, sl_crossed, past_breakeven, retraced,
                    "forced close submitted"
                );
                Ok(())
            }
            Err(e) if e.is_rejected() => {
                tracing::warn!(id = %order.id, error = %e, "forced close rejected");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// With no open row: enter when both timeframes vote the same way and
    /// volatility clears the floor.
    async fn try_open(&mut self, price: Decimal) -> Result<(), BotError> {
        let Some(direction) = self.signal.direction() else {
            return Ok(());
        };
        let Some(atr) = self.signal.atr(ATR_PERIOD) else {
            return Ok(());
        };
        if atr < price * ATR_FLOOR_RATIO {
            tracing::debug!(%atr, %price, "volatility below entry floor");
            return Ok(());
        }

        self.ensure_leverage().await?;

        let new = NewOrder::new(direction, price, self.settings.leverage, atr);
        match self.exchange.place_entry(&new).await {
            Ok(entry_id) => {
                let order = self.store.insert(&new, &entry_id).await?;
                tracing::info!(
                    id = %order.id,
                    kind = %order.order_type,
                    price = %order.price_open,
                    size = %order.value,
                    "entry submitted"
                );
                Ok(())
            }
            Err(e) if e.is_rejected() => {
                tracing::warn!(error = %e, "entry rejected");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_leverage(&mut self) -> Result<(), BotError> {
        let lev = self.settings.leverage;
        if self.leverage_sent == Some((lev, lev)) {
            return Ok(());
        }
        match self.exchange.set_leverage(lev, lev).await {
            Ok(()) => {
                self.leverage_sent = Some((lev, lev));
                Ok(())
            }
            // retCode 110043: leverage not modified, already at this value
            Err(e) if e.is_rejected() => {
                self.leverage_sent = Some((lev, lev));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Match one of our exit legs against an order the exchange reports. The
/// position endpoint gives no id back, so the trigger price and quantity
/// are the join key.
fn leg_matches(order: &Order, api: &ApiOrder, kind: LegKind) -> bool {
    let Some(trigger) = api.trigger_price else {
        return false;
    };
    if trigger != order.leg(kind).price {
        return false;
    }
    match kind {
        LegKind::Tp1 | LegKind::Tp2 => {
            api.qty == order.half_size()
                && api.stop_order_type == StopOrderKind::PartialTakeProfit
        }
        // the exchange reports the stop sized either to the full position
        // or to the remaining half after tp1
        LegKind::Sl => {
            (api.qty == order.value || api.qty == order.half_size())
                && api.stop_order_type == StopOrderKind::StopLoss
        }
    }
}
