//! The control loop. One `tick` per iteration, strictly sequential: hours,
//! news, daily pause, swap window, volatility, reconciliation, management,
//! then at most one entry.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::config::EngineConfig;
use crate::daily_risk::{DailyCheck, DailyRiskControl, PauseReason};
use crate::error::ConfigError;
use crate::gateway::{Event, Gateway, NewsSource, Notifier, Outbox, StatsSink};
use crate::indicators::atr;
use crate::lifecycle::{LifecycleConfig, ManageContext, ManagementAction, PositionTracker};
use crate::risk::{self, RiskBlock, RiskInputs, RiskManager, StopMultiples};
use crate::session::{active_swap_window, market_status, server_time, SwapWindow};
use crate::signal::{bias_from_candles, SignalEngine};
use crate::status::{StatusFile, StatusInfo};
use crate::types::{
    AccountState, Candle, CloseReason, InstrumentConstraints, OrderRequest, Side, Ticket, TradingMode,
};
use crate::volatility::{Cooldown, VolatilityMode};

/// How long shutdown waits for queued notifications.
const NOTIFY_GRACE: Duration = Duration::from_secs(5);

/// Source of wall time. Read once per tick.
pub trait Clock: Send + Sync {
    /// Local wall time; drives trading hours and the daily rollover.
    fn local(&self) -> NaiveDateTime;
    fn utc(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn local(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    fn utc(&self) -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }
}

/// Why no entry was attempted although the market is open and unpaused.
#[derive(Clone, Debug, PartialEq)]
pub enum EntryBlock {
    NewsEvent(String),
    SwapWindow(String),
    ExtremeVolatility { atr: f64 },
    Cooldown { remaining_secs: i64 },
    Risk(RiskBlock),
    LossCapUnverifiable,
}

impl fmt::Display for EntryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryBlock::NewsEvent(title) => write!(f, "news: {title}"),
            EntryBlock::SwapWindow(msg) => f.write_str(msg),
            EntryBlock::ExtremeVolatility { atr } => write!(f, "ATR {atr:.5} above trading ceiling"),
            EntryBlock::Cooldown { remaining_secs } => write!(f, "cooldown: {remaining_secs}s remaining"),
            EntryBlock::Risk(b) => write!(f, "risk: {b}"),
            EntryBlock::LossCapUnverifiable => f.write_str("daily loss cap cannot be converted to account currency"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    MarketClosed(String),
    Paused(String),
    Blocked(EntryBlock),
    NoSignal,
    Skipped(String),
    Entered { ticket: Ticket, side: Side },
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::MarketClosed(msg) => f.write_str(msg),
            Decision::Paused(reason) => write!(f, "paused: {reason}"),
            Decision::Blocked(block) => write!(f, "entries blocked: {block}"),
            Decision::NoSignal => f.write_str("no signal"),
            Decision::Skipped(reason) => write!(f, "entry skipped: {reason}"),
            Decision::Entered { ticket, side } => write!(f, "entered {side} #{ticket}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub decision: Decision,
    pub open_positions: usize,
    pub sleep: Duration,
}

/// Suppresses repeated "market closed" lines; every fifth repeat is logged
/// as a heartbeat.
#[derive(Debug, Default)]
pub struct DecisionLog {
    closed_repeats: u32,
}

impl DecisionLog {
    pub fn should_log(&mut self, decision: &Decision) -> bool {
        if !matches!(decision, Decision::MarketClosed(_)) {
            self.closed_repeats = 0;
            return true;
        }
        let log = self.closed_repeats % 5 == 0;
        self.closed_repeats += 1;
        log
    }
}

/// How `run` ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCause {
    Signal,
    StopFlag,
}

impl StopCause {
    fn as_str(self) -> &'static str {
        match self {
            StopCause::Signal => "shutdown signal received",
            StopCause::StopFlag => "manual stop flag found",
        }
    }
}

pub struct Controller {
    cfg: EngineConfig,
    gateway: Box<dyn Gateway>,
    notifications: Outbox,
    news: Option<Box<dyn NewsSource>>,
    stats: Box<dyn StatsSink>,
    clock: Box<dyn Clock>,
    status: Option<StatusFile>,

    signals: SignalEngine,
    risk: RiskManager,
    multiples: StopMultiples,
    positions: PositionTracker,
    daily: DailyRiskControl,
    volatility: VolatilityMode,
    cooldown: Cooldown,

    swap_windows: Vec<SwapWindow>,
    tf_secs: i64,
    constraints: Option<InstrumentConstraints>,
    alerted_news: HashSet<String>,
    last_weekly_summary: Option<NaiveDate>,
    started_at: NaiveDateTime,
}

impl Controller {
    pub fn new(
        cfg: EngineConfig,
        gateway: Box<dyn Gateway>,
        notifier: Box<dyn Notifier>,
        news: Option<Box<dyn NewsSource>>,
        stats: Box<dyn StatsSink>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let swap_windows = cfg.swap_windows()?;
        let tf_secs = cfg
            .trading
            .timeframe_secs()
            .ok_or_else(|| ConfigError::invalid("trading.timeframe", format!("unknown timeframe {}", cfg.trading.timeframe)))?;
        let started_at = clock.local();

        Ok(Controller {
            signals: SignalEngine::new(cfg.strategy.clone()),
            risk: RiskManager::new(&cfg.risk, &cfg.trading),
            multiples: StopMultiples::from(&cfg.trading),
            positions: PositionTracker::new(LifecycleConfig::from(&cfg.trading)),
            daily: DailyRiskControl::new(&cfg),
            volatility: VolatilityMode::new(cfg.volatility.clone()),
            cooldown: Cooldown::new(&cfg.volatility),
            swap_windows,
            tf_secs,
            constraints: None,
            alerted_news: HashSet::new(),
            last_weekly_summary: None,
            started_at,
            cfg,
            gateway,
            notifications: Outbox::new(Arc::from(notifier)),
            news,
            stats,
            clock,
            status: None,
        })
    }

    pub fn with_status_file(mut self, status: StatusFile) -> Self {
        self.status = Some(status);
        self
    }

    pub fn positions(&self) -> &PositionTracker {
        &self.positions
    }

    pub fn daily(&self) -> &DailyRiskControl {
        &self.daily
    }

    pub fn mode(&self) -> TradingMode {
        self.volatility.mode()
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }

    fn notify(&mut self, event: Event) {
        self.notifications.send(event);
    }

    fn report(&self, decision: Decision, open_positions: usize) -> TickReport {
        let s = &self.cfg.system;
        let secs = match decision {
            Decision::MarketClosed(_) => s.closed_loop_interval,
            Decision::Paused(_) => s.paused_loop_interval,
            _ => s.main_loop_interval,
        };
        TickReport { decision, open_positions, sleep: Duration::from_secs(secs) }
    }

    /// One full iteration of the loop.
    pub async fn tick(&mut self) -> TickReport {
        let now = self.clock.local();
        let utc = self.clock.utc();

        let market = market_status(now, &self.cfg.trading.trading_hours);
        if !market.open {
            return self.report(Decision::MarketClosed(market.message), self.positions.len());
        }

        if let Some(news) = self.news.as_mut() {
            news.refresh(now).await;
        }
        self.weekly_summary(now, utc).await;

        let account = match self.gateway.account_state().await {
            Ok(a) => Some(a),
            Err(e) => {
                log::warn!("[controller] account state unavailable: {}", e);
                None
            }
        };
        let daily = self.daily.evaluate(now, self.gateway.as_ref(), account.as_ref()).await;
        if daily.newly_paused {
            self.announce_pause(&daily, account.as_ref());
        }

        let server_now = server_time(now, self.cfg.broker.broker_timezone_offset);
        let swap_block = if self.cfg.trading.swap_avoidance.enabled {
            active_swap_window(&self.swap_windows, server_now).map(|(_, msg)| msg)
        } else {
            None
        };

        let candles = self.closed_candles(server_now).await;
        let stop_atr = candles.as_deref().and_then(|c| atr(c, self.cfg.trading.atr_period));
        let mode_atr = candles.as_deref().and_then(|c| atr(c, self.volatility.atr_period()));
        if let Some((from, to)) = self.volatility.update(mode_atr, now) {
            let atr = mode_atr.unwrap_or(0.0);
            self.notify(Event::ModeSwitch { from, to, atr });
        }

        let open = match self.sync_positions(now, stop_atr).await {
            Some(n) => n,
            None => return self.report(Decision::Skipped("open positions unavailable".into()), self.positions.len()),
        };

        let decision = self.entry(now, &daily, account.as_ref(), swap_block, candles, stop_atr, mode_atr, open).await;
        if let Err(e) = self.stats.flush() {
            log::warn!("[stats] flush failed: {}", e);
        }
        let open = if matches!(decision, Decision::Entered { .. }) { open + 1 } else { open };
        self.report(decision, open)
    }

    fn announce_pause(&mut self, daily: &DailyCheck, account: Option<&AccountState>) {
        let event = match &daily.paused {
            Some(PauseReason::ProfitTarget { net, target }) => Event::DailyTarget { net: *net, target: *target },
            Some(PauseReason::LossCap { net, cap }) => Event::DailyLoss { net: *net, cap: *cap, currency: self.currency(account) },
            Some(PauseReason::EquityDrawdown { drawdown, cap }) => {
                Event::DailyLoss { net: -*drawdown, cap: *cap, currency: self.currency(account) }
            }
            None => return,
        };
        self.notify(event);
    }

    fn currency(&self, account: Option<&AccountState>) -> String {
        account
            .and_then(|a| a.currency.clone())
            .or_else(|| self.cfg.broker.account_currency.clone())
            .unwrap_or_default()
    }

    /// Weekly calendar digest, at most once per UTC date.
    async fn weekly_summary(&mut self, now: NaiveDateTime, utc: NaiveDateTime) {
        let n = &self.cfg.news;
        if !n.weekly_summary_enabled {
            return;
        }
        let Some(news) = self.news.as_ref() else { return };
        if utc.weekday().num_days_from_monday() != n.weekly_summary_day
            || utc.hour() < n.weekly_summary_hour_gmt
            || self.last_weekly_summary == Some(utc.date())
        {
            return;
        }
        let events = news.upcoming_events(now, chrono::Duration::days(7));
        log::info!("[news] weekly summary: {} upcoming events", events.len());
        self.last_weekly_summary = Some(utc.date());
        self.notify(Event::WeeklyNews(events));
    }

    /// Recent bars without the one still forming.
    async fn closed_candles(&self, server_now: NaiveDateTime) -> Option<Vec<Candle>> {
        let mut count = self.cfg.trading.market_data_bars.max(self.signals.min_bars() + 1);
        let bias = &self.cfg.strategy.bias;
        if bias.enabled {
            count = count.max(bias.htf_factor * (bias.sma_period + 1) + 1);
        }
        let mut candles = match self.gateway.recent_candles(count).await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[controller] market data unavailable: {}", e);
                return None;
            }
        };
        let now_ts = server_now.and_utc().timestamp();
        if candles.last().is_some_and(|c| c.timestamp + self.tf_secs > now_ts) {
            candles.pop();
        }
        Some(candles)
    }

    /// Reconciliation, closure events, then management of every open
    /// position. Returns the open count, or None when the gateway failed.
    async fn sync_positions(&mut self, now: NaiveDateTime, stop_atr: Option<f64>) -> Option<usize> {
        let snapshots = match self.gateway.open_positions().await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[controller] open positions unavailable: {}", e);
                return None;
            }
        };

        let closed = self.positions.reconcile(&snapshots, stop_atr);
        if !closed.is_empty() {
            let pip = self.pip_size().await;
            for rec in closed {
                let event = PositionTracker::finalize_closure(self.gateway.as_ref(), &rec, pip).await;
                if event.reason == CloseReason::ScalpExit && !rec.forced_exit {
                    self.cooldown.record(now, TradingMode::Scalp);
                }
                self.stats.record_trade_closed(&event);
                self.notify(Event::TradeClosed(event));
            }
        }

        let ctx = ManageContext {
            mode: self.volatility.mode(),
            current_atr: stop_atr,
            scalp_profit_target: self.volatility.scalp_profit_target(),
        };
        let mut open = snapshots.len();
        for snap in &snapshots {
            let actions = self.positions.manage(self.gateway.as_ref(), snap, &ctx).await;
            for action in actions {
                let event = match action {
                    ManagementAction::ScalpExit { ticket, profit } => {
                        self.cooldown.record(now, TradingMode::Scalp);
                        open = open.saturating_sub(1);
                        Event::ScalpExit { ticket, profit }
                    }
                    ManagementAction::BreakEven { ticket, new_stop } => Event::BreakEven { ticket, new_stop },
                    ManagementAction::Trailing { ticket, new_stop, price } => {
                        Event::TrailingStop { ticket, new_stop, price }
                    }
                };
                self.notify(event);
            }
        }
        Some(open)
    }

    async fn instrument(&mut self) -> Option<InstrumentConstraints> {
        match self.gateway.instrument_constraints().await {
            Ok(c) => {
                self.constraints = Some(c);
                Some(c)
            }
            Err(e) => {
                log::warn!("[controller] instrument constraints unavailable: {}", e);
                self.constraints
            }
        }
    }

    async fn pip_size(&mut self) -> f64 {
        self.instrument().await.map_or(0.0, |c| c.pip_size)
    }

    #[allow(clippy::too_many_arguments)]
    async fn entry(
        &mut self,
        now: NaiveDateTime,
        daily: &DailyCheck,
        account: Option<&AccountState>,
        swap_block: Option<String>,
        candles: Option<Vec<Candle>>,
        stop_atr: Option<f64>,
        mode_atr: Option<f64>,
        open: usize,
    ) -> Decision {
        if let Some(reason) = &daily.paused {
            return Decision::Paused(reason.to_string());
        }
        if daily.cap_unverified {
            return Decision::Blocked(EntryBlock::LossCapUnverifiable);
        }
        if let Some(event) = self.news.as_ref().and_then(|n| n.should_avoid_trading(now)) {
            if self.alerted_news.insert(event.key()) {
                log::warn!("[news] avoiding trading: {} ({}) at {}", event.title, event.currency, event.time);
                self.notify(Event::NewsAvoidance(event.clone()));
            }
            return Decision::Blocked(EntryBlock::NewsEvent(event.title));
        }
        if let Some(msg) = swap_block {
            return Decision::Blocked(EntryBlock::SwapWindow(msg));
        }
        if let Some(atr) = mode_atr.filter(|a| self.volatility.is_extreme(*a)) {
            return Decision::Blocked(EntryBlock::ExtremeVolatility { atr });
        }
        let remaining = self.cooldown.remaining(now);
        if remaining > 0 {
            return Decision::Blocked(EntryBlock::Cooldown { remaining_secs: remaining });
        }
        let inputs = RiskInputs {
            open_positions: open,
            realized_today: daily.net.unwrap_or(0.0),
            daily_loss_cap: daily.loss_cap.amount(),
            account,
        };
        if let Err(block) = self.risk.can_trade(&inputs) {
            return Decision::Blocked(EntryBlock::Risk(block));
        }

        let Some(candles) = candles else {
            return Decision::Skipped("market data unavailable".into());
        };
        let bias = if self.cfg.strategy.bias.enabled {
            match bias_from_candles(&candles, &self.cfg.strategy.bias) {
                Some(b) => Some(b),
                None => return Decision::Skipped("not enough bars for bias".into()),
            }
        } else {
            None
        };
        let Some(signal) = self.signals.generate(&candles, bias) else {
            return Decision::NoSignal;
        };
        log::info!(
            "[controller] {} signal | confidence {:.2} | {}",
            signal.side,
            signal.confidence,
            signal.conditions_detail.join(", ")
        );

        let Some(atr) = stop_atr else {
            return Decision::Skipped("ATR unavailable".into());
        };
        let quote = match self.gateway.quote(&self.cfg.broker.symbol).await {
            Ok(q) => q,
            Err(e) => return Decision::Skipped(format!("no quote: {e}")),
        };
        let price = match signal.side {
            Side::Buy => quote.ask,
            Side::Sell => quote.bid,
        };
        let Some(plan) = risk::stops_for(price, atr, signal.side, &self.multiples) else {
            return Decision::Skipped("no usable stops".into());
        };
        let Some(constraints) = self.instrument().await else {
            return Decision::Skipped("instrument constraints unavailable".into());
        };
        let plan = risk::repair_for_broker_minimum(price, plan, constraints.min_stop_distance, signal.side);
        if let Err(reason) = risk::validate_trade(signal.side, price, &plan) {
            return Decision::Skipped(reason);
        }
        let Some(volume) = self.risk.lot_for(signal.confidence) else {
            return Decision::Skipped(format!("confidence {:.2} below minimum", signal.confidence));
        };

        let order = OrderRequest {
            side: signal.side,
            volume,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
            comment: self.cfg.trading.order_comment.clone(),
        };
        let receipt = match self.gateway.submit_market_order(&order).await {
            Ok(r) => r,
            Err(e) => {
                log::error!("[controller] {} order failed: {}", signal.side, e);
                self.notify(Event::Error(format!("{} order failed: {}", signal.side, e)));
                return Decision::Skipped(format!("order rejected: {e}"));
            }
        };

        let mode = self.volatility.mode();
        let fill = if receipt.price > 0.0 { receipt.price } else { price };
        let ts = server_time(now, self.cfg.broker.broker_timezone_offset).and_utc().timestamp();
        self.positions.track_entry(receipt.ticket, signal.side, volume, fill, plan, atr, ts);
        self.cooldown.record(now, mode);
        self.stats.record_trade_opened(&receipt, &order, mode, ts);
        log::info!(
            "[controller] opened {} #{} {:.2} lots @ {:.5} | SL {:.5} TP {:.5} | {}",
            signal.side, receipt.ticket, volume, fill, plan.stop_loss, plan.take_profit, mode.as_str()
        );
        self.notify(Event::TradeOpened {
            ticket: receipt.ticket,
            side: signal.side,
            volume,
            price: fill,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
            confidence: signal.confidence,
            conditions: signal.conditions_detail,
            mode,
        });

        Decision::Entered { ticket: receipt.ticket, side: signal.side }
    }

    fn write_status(&self, report: &TickReport) {
        let Some(status) = &self.status else { return };
        let info = StatusInfo {
            pid: std::process::id(),
            started_at: self.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            last_update: self.clock.local().format("%Y-%m-%d %H:%M:%S").to_string(),
            symbol: self.cfg.broker.symbol.clone(),
            magic_number: self.cfg.broker.magic_number,
            timeframe: self.cfg.trading.timeframe.clone(),
            mode: self.volatility.mode().as_str().to_string(),
            open_positions: report.open_positions,
            last_decision: report.decision.to_string(),
        };
        if let Err(e) = status.write(&info) {
            log::warn!("[status] cannot write {}: {}", status.path().display(), e);
        }
    }

    fn stop_requested(&self) -> bool {
        self.status.as_ref().is_some_and(StatusFile::stop_requested)
    }

    /// Sleeps for `period`, returning early on shutdown or the stop flag.
    async fn wait<S>(&self, period: Duration, shutdown: &mut std::pin::Pin<&mut S>) -> Option<StopCause>
    where
        S: Future<Output = ()>,
    {
        let deadline = tokio::time::sleep(period);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = shutdown.as_mut() => return Some(StopCause::Signal),
                _ = &mut deadline => return None,
                _ = poll.tick() => {
                    if self.stop_requested() {
                        return Some(StopCause::StopFlag);
                    }
                }
            }
        }
    }

    /// Runs until `shutdown` resolves or the stop flag appears, finishing
    /// the current iteration first. Open positions are left untouched.
    pub async fn run<S>(mut self, shutdown: S) -> StopCause
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut decisions = DecisionLog::default();

        log::info!(
            "[controller] started | {} {} | magic {}",
            self.cfg.broker.symbol, self.cfg.trading.timeframe, self.cfg.broker.magic_number
        );
        self.notify(Event::Started {
            symbol: self.cfg.broker.symbol.clone(),
            timeframe: self.cfg.trading.timeframe.clone(),
            mode: self.volatility.mode(),
        });

        let cause = loop {
            let report = self.tick().await;
            if decisions.should_log(&report.decision) {
                log::info!("[controller] {} | open {}", report.decision, report.open_positions);
            }
            self.write_status(&report);

            if self.stop_requested() {
                break StopCause::StopFlag;
            }
            if let Some(cause) = self.wait(report.sleep, &mut shutdown).await {
                break cause;
            }
        };

        self.shutdown(cause).await;
        cause
    }

    async fn shutdown(&mut self, cause: StopCause) {
        log::info!("[controller] stopping: {}", cause.as_str());
        if let Err(e) = self.stats.flush() {
            log::warn!("[stats] final flush failed: {}", e);
        }
        if let Some(status) = &self.status {
            status.remove();
        }
        self.notify(Event::Shutdown { reason: cause.as_str().to_string() });
        self.notifications.close(NOTIFY_GRACE).await;
        log::info!("[controller] stopped with {} tracked position(s) left open", self.positions.len());
    }
}
