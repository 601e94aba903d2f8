#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};

use sniper_engine::config::EngineConfig;
use sniper_engine::controller::Clock;
use sniper_engine::error::{GatewayError, NotifyError, StatsError};
use sniper_engine::gateway::{Event, Gateway, Notifier, StatsSink};
use sniper_engine::lifecycle::ClosureEvent;
use sniper_engine::types::{
    AccountState, Candle, DealInfo, InstrumentConstraints, OrderReceipt, OrderRequest, PositionSnapshot, Quote,
    Side, Ticket, TradingMode,
};

/// Monday 2024-01-01 00:00 UTC.
pub const MONDAY: i64 = 1_704_067_200;

pub fn at(ts: i64) -> NaiveDateTime {
    DateTime::from_timestamp(ts, 0).map(|t| t.naive_utc()).unwrap()
}

fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle { timestamp: ts, open, high, low, close, volume: 100.0 }
}

/// M1 bars: a long uptrend, a five-bar pullback, one uptick. The default
/// indicator rules give a BUY on the last bar.
pub fn pullback_in_uptrend(start: i64) -> Vec<Candle> {
    let mut out = Vec::new();
    for i in 0..240 {
        let close = 100.0 + i as f64;
        out.push(candle(start + i * 60, close - 0.8, close + 0.3, close - 1.1, close));
    }
    let mut prev = 339.0;
    for k in 0..5 {
        let close = prev - 3.0;
        out.push(candle(start + (240 + k) * 60, prev, prev + 0.2, close - 0.2, close));
        prev = close;
    }
    let close = prev + 0.6;
    out.push(candle(start + 245 * 60, prev, close + 0.1, prev - 0.1, close));
    out
}

pub fn config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.broker.symbol = "XAUUSD".into();
    cfg.broker.magic_number = 7901;
    cfg.trading.timeframe = "M1".into();
    cfg.trading.lot_size = 0.1;
    cfg.news.enabled = false;
    cfg
}

#[derive(Default)]
pub struct GatewayState {
    pub candles: Vec<Candle>,
    pub positions: Vec<PositionSnapshot>,
    pub quote: Option<Quote>,
    pub closing_deal: Option<DealInfo>,
    pub deals: Vec<DealInfo>,
    pub account: Option<AccountState>,
    pub orders: Vec<OrderRequest>,
    pub reject_orders: bool,
    pub order_attempts: usize,
    pub deal_queries: usize,
    pub calls: usize,
    pub next_ticket: Ticket,
}

/// In-memory terminal. Filled orders show up as open positions.
#[derive(Clone, Default)]
pub struct MockGateway(pub Arc<Mutex<GatewayState>>);

impl MockGateway {
    pub fn with_candles(candles: Vec<Candle>) -> Self {
        let gw = MockGateway::default();
        {
            let mut s = gw.0.lock().unwrap();
            s.candles = candles;
            s.quote = Some(Quote { bid: 324.5, ask: 324.7 });
            s.next_ticket = 1;
        }
        gw
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.0.lock().unwrap()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn recent_candles(&self, count: usize) -> Result<Vec<Candle>, GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        let skip = s.candles.len().saturating_sub(count);
        Ok(s.candles[skip..].to_vec())
    }

    async fn open_positions(&self) -> Result<Vec<PositionSnapshot>, GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        Ok(s.positions.clone())
    }

    async fn submit_market_order(&self, order: &OrderRequest) -> Result<OrderReceipt, GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        s.order_attempts += 1;
        if s.reject_orders {
            return Err(GatewayError::Transient("reply lost".into()));
        }
        let q = s.quote.ok_or_else(|| GatewayError::Unavailable("no quote".into()))?;
        let price = match order.side {
            Side::Buy => q.ask,
            Side::Sell => q.bid,
        };
        let ticket = s.next_ticket;
        s.next_ticket += 1;
        s.orders.push(order.clone());
        s.positions.push(PositionSnapshot {
            ticket,
            side: order.side,
            volume: order.volume,
            entry_price: price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            current_price: price,
            profit: 0.0,
            open_time: 0,
        });
        Ok(OrderReceipt { ticket, price, status: "filled".into() })
    }

    async fn modify_stop_target(&self, ticket: Ticket, stop_loss: f64, take_profit: f64) -> Result<(), GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        if let Some(p) = s.positions.iter_mut().find(|p| p.ticket == ticket) {
            p.stop_loss = stop_loss;
            p.take_profit = take_profit;
        }
        Ok(())
    }

    async fn close_position(&self, ticket: Ticket, _side: Side, _volume: f64, _comment: &str) -> Result<(), GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        s.positions.retain(|p| p.ticket != ticket);
        Ok(())
    }

    async fn closing_deal(&self, _ticket: Ticket) -> Result<DealInfo, GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        s.closing_deal.clone().ok_or_else(|| GatewayError::Unavailable("no deal".into()))
    }

    async fn deals_between(&self, _from: i64, _to: i64) -> Result<Vec<DealInfo>, GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        s.deal_queries += 1;
        Ok(s.deals.clone())
    }

    async fn account_state(&self) -> Result<AccountState, GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        s.account.clone().ok_or_else(|| GatewayError::Unavailable("no account".into()))
    }

    async fn instrument_constraints(&self) -> Result<InstrumentConstraints, GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        Ok(InstrumentConstraints { min_stop_distance: 0.0, pip_size: 0.1 })
    }

    async fn quote(&self, _symbol: &str) -> Result<Quote, GatewayError> {
        let mut s = self.state();
        s.calls += 1;
        s.quote.ok_or_else(|| GatewayError::Unavailable("no quote".into()))
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier(pub Arc<Mutex<Vec<Event>>>);

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| e.kind() == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A sink whose sends never complete.
pub struct StalledNotifier;

#[async_trait]
impl Notifier for StalledNotifier {
    async fn notify(&self, _event: &Event) -> Result<(), NotifyError> {
        std::future::pending().await
    }
}

/// Lets queued notifications reach the recording sink.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[derive(Clone, Default)]
pub struct RecordingStats {
    pub opened: Arc<Mutex<Vec<(Ticket, TradingMode)>>>,
    pub closed: Arc<Mutex<Vec<ClosureEvent>>>,
}

impl StatsSink for RecordingStats {
    fn record_trade_opened(&mut self, receipt: &OrderReceipt, _order: &OrderRequest, mode: TradingMode, _time: i64) {
        self.opened.lock().unwrap().push((receipt.ticket, mode));
    }

    fn record_trade_closed(&mut self, event: &ClosureEvent) {
        self.closed.lock().unwrap().push(event.clone());
    }

    fn flush(&mut self) -> Result<(), StatsError> {
        Ok(())
    }
}

/// Local and UTC clocks pinned to the same instant; tests move it by hand.
#[derive(Clone)]
pub struct FixedClock(pub Arc<Mutex<NaiveDateTime>>);

impl FixedClock {
    pub fn new(ts: i64) -> Self {
        FixedClock(Arc::new(Mutex::new(at(ts))))
    }

    pub fn advance(&self, secs: i64) {
        let mut t = self.0.lock().unwrap();
        *t += chrono::Duration::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn local(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }

    fn utc(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}
