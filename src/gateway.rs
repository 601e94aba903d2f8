//! Boundaries to everything the engine does not own: the broker terminal,
//! the notification sink, the news calendar and the trade journal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, NotifyError, StatsError};
use crate::lifecycle::ClosureEvent;
use crate::types::{
    AccountState, Candle, DealInfo, InstrumentConstraints, NewsEvent, OrderReceipt, OrderRequest,
    PositionSnapshot, Quote, Side, Ticket, TradingMode,
};

/// Market data and order execution for the configured instrument.
///
/// Every call may fail; callers skip the dependent action for the cycle.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Most recent `count` bars, oldest first. May include the forming bar.
    async fn recent_candles(&self, count: usize) -> Result<Vec<Candle>, GatewayError>;

    /// Open positions tagged with this engine's magic number.
    async fn open_positions(&self) -> Result<Vec<PositionSnapshot>, GatewayError>;

    async fn submit_market_order(&self, order: &OrderRequest) -> Result<OrderReceipt, GatewayError>;

    async fn modify_stop_target(&self, ticket: Ticket, stop_loss: f64, take_profit: f64) -> Result<(), GatewayError>;

    async fn close_position(&self, ticket: Ticket, side: Side, volume: f64, comment: &str) -> Result<(), GatewayError>;

    /// Exit deal of a closed position.
    async fn closing_deal(&self, ticket: Ticket) -> Result<DealInfo, GatewayError>;

    /// Deals in `[from, to]`, unix seconds in server time.
    async fn deals_between(&self, from: i64, to: i64) -> Result<Vec<DealInfo>, GatewayError>;

    async fn account_state(&self) -> Result<AccountState, GatewayError>;

    async fn instrument_constraints(&self) -> Result<InstrumentConstraints, GatewayError>;

    /// Bid/ask for any symbol the terminal knows, used for FX conversion.
    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError>;
}

/// Something worth telling the operator about.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Started { symbol: String, timeframe: String, mode: TradingMode },
    TradeOpened {
        ticket: Ticket,
        side: Side,
        volume: f64,
        price: f64,
        stop_loss: f64,
        take_profit: f64,
        confidence: f64,
        conditions: Vec<String>,
        mode: TradingMode,
    },
    TradeClosed(ClosureEvent),
    BreakEven { ticket: Ticket, new_stop: f64 },
    TrailingStop { ticket: Ticket, new_stop: f64, price: f64 },
    ScalpExit { ticket: Ticket, profit: f64 },
    DailyTarget { net: f64, target: f64 },
    DailyLoss { net: f64, cap: f64, currency: String },
    NewsAvoidance(NewsEvent),
    WeeklyNews(Vec<NewsEvent>),
    ModeSwitch { from: TradingMode, to: TradingMode, atr: f64 },
    Shutdown { reason: String },
    Error(String),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Started { .. } => "started",
            Event::TradeOpened { .. } => "trade_opened",
            Event::TradeClosed(_) => "trade_closed",
            Event::BreakEven { .. } => "breakeven",
            Event::TrailingStop { .. } => "trailing_stop",
            Event::ScalpExit { .. } => "scalp_exit",
            Event::DailyTarget { .. } => "daily_target",
            Event::DailyLoss { .. } => "daily_loss",
            Event::NewsAvoidance(_) => "news_avoidance",
            Event::WeeklyNews(_) => "weekly_news",
            Event::ModeSwitch { .. } => "mode_switch",
            Event::Shutdown { .. } => "shutdown",
            Event::Error(_) => "error",
        }
    }
}

/// Fire-and-forget sink. The caller logs a failure once and moves on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &Event) -> Result<(), NotifyError>;
}

/// Used when notifications are disabled.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: &Event) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Queues events for a background task that delivers them in order, so a
/// slow or stalled sink never holds up the caller. The task starts on the
/// first event.
pub struct Outbox {
    notifier: Arc<dyn Notifier>,
    tx: Option<mpsc::UnboundedSender<Event>>,
    worker: Option<JoinHandle<()>>,
}

impl Outbox {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Outbox { notifier, tx: None, worker: None }
    }

    pub fn send(&mut self, event: Event) {
        if self.tx.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            self.worker = Some(tokio::spawn(deliver(Arc::clone(&self.notifier), rx)));
            self.tx = Some(tx);
        }
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(event) {
                log::warn!("[notify] {} dropped, delivery task gone", e.0.kind());
            }
        }
    }

    /// Stops accepting events and waits up to `grace` for the queue to drain.
    pub async fn close(&mut self, grace: Duration) {
        self.tx = None;
        let Some(worker) = self.worker.take() else { return };
        if tokio::time::timeout(grace, worker).await.is_err() {
            log::warn!("[notify] undelivered events dropped after {}s", grace.as_secs());
        }
    }
}

async fn deliver(notifier: Arc<dyn Notifier>, mut rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = notifier.notify(&event).await {
            log::warn!("[notify] {} not delivered: {}", event.kind(), e);
        }
    }
}

/// Economic calendar with its own cache and refresh cadence.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Refreshes when the source's own interval has elapsed. Never fails the caller.
    async fn refresh(&mut self, now: NaiveDateTime);

    /// The event currently inside its avoidance buffer, if any.
    fn should_avoid_trading(&self, now: NaiveDateTime) -> Option<NewsEvent>;

    fn upcoming_events(&self, now: NaiveDateTime, horizon: chrono::Duration) -> Vec<NewsEvent>;
}

/// Trade journal. Nothing it returns feeds back into decisions.
pub trait StatsSink: Send {
    fn record_trade_opened(&mut self, receipt: &OrderReceipt, order: &OrderRequest, mode: TradingMode, time: i64);

    fn record_trade_closed(&mut self, closure: &ClosureEvent);

    fn flush(&mut self) -> Result<(), StatsError>;
}
