use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::config::EngineConfig;
use crate::gateway::Gateway;
use crate::types::{AccountState, DealEntry, DealInfo};

/// Why trading is paused for the rest of the local day.
#[derive(Clone, Debug, PartialEq)]
pub enum PauseReason {
    ProfitTarget { net: f64, target: f64 },
    LossCap { net: f64, cap: f64 },
    EquityDrawdown { drawdown: f64, cap: f64 },
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::ProfitTarget { net, target } => {
                write!(f, "daily profit target reached: {net:.2} >= {target:.2}")
            }
            PauseReason::LossCap { net, cap } => write!(f, "daily loss cap reached: {net:.2} <= -{cap:.2}"),
            PauseReason::EquityDrawdown { drawdown, cap } => {
                write!(f, "equity drawdown today {drawdown:.2} >= cap {cap:.2}")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DailyRiskState {
    pub local_date: Option<NaiveDate>,
    pub paused: Option<PauseReason>,
    pub starting_equity_today: Option<f64>,
}

/// Realized P&L over a set of deals.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DailyPnl {
    pub profit: f64,
    pub commission: f64,
    pub swap: f64,
    pub net: f64,
    pub closed_trades: usize,
}

/// Commission counts on every deal (entry and exit legs are both charged);
/// profit and swap only on exit deals.
pub fn net_pnl(deals: &[DealInfo]) -> DailyPnl {
    let mut p = DailyPnl::default();
    for d in deals {
        p.commission += d.commission.abs();
        if d.entry == DealEntry::Out {
            p.profit += d.profit;
            p.swap += d.swap;
            p.closed_trades += 1;
        }
    }
    p.net = p.profit - p.commission + p.swap;
    p
}

/// Loss cap expressed in the account currency.
#[derive(Clone, Debug, PartialEq)]
pub enum LossCap {
    Disabled,
    Exact(f64),
    /// No quote converts the configured currency. Carries the raw number.
    Unconverted(f64),
}

impl LossCap {
    pub fn amount(&self) -> f64 {
        match self {
            LossCap::Disabled => 0.0,
            LossCap::Exact(v) | LossCap::Unconverted(v) => *v,
        }
    }
}

/// Outcome of one daily evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct DailyCheck {
    pub paused: Option<PauseReason>,
    /// The pause started on this evaluation.
    pub newly_paused: bool,
    pub net: Option<f64>,
    pub loss_cap: LossCap,
    /// Strict conversion is configured and the cap could not be converted.
    pub cap_unverified: bool,
}

pub struct DailyRiskControl {
    state: DailyRiskState,
    profit_target: f64,
    max_daily_loss: f64,
    loss_currency: Option<String>,
    account_currency: Option<String>,
    loss_limit_by_equity: bool,
    strict_conversion: bool,
    broker_offset_hours: i64,
}

impl DailyRiskControl {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            state: DailyRiskState::default(),
            profit_target: cfg.trading.daily_profit_target,
            max_daily_loss: cfg.risk.max_daily_loss,
            loss_currency: cfg.risk.max_daily_loss_currency.clone(),
            account_currency: cfg.broker.account_currency.clone(),
            loss_limit_by_equity: cfg.risk.loss_limit_by_equity,
            strict_conversion: cfg.risk.strict_loss_cap_conversion,
            broker_offset_hours: cfg.broker.broker_timezone_offset,
        }
    }

    pub fn state(&self) -> &DailyRiskState {
        &self.state
    }

    pub fn paused(&self) -> Option<&PauseReason> {
        self.state.paused.as_ref()
    }

    /// Resets the pause and starting equity when the local date changes.
    /// Returns true on a rollover.
    pub fn roll(&mut self, now: NaiveDateTime) -> bool {
        let today = now.date();
        match self.state.local_date {
            Some(d) if d == today => false,
            prev => {
                if prev.is_some() {
                    log::info!("[daily] new trading day {} - counters reset", today);
                }
                self.state = DailyRiskState { local_date: Some(today), ..DailyRiskState::default() };
                prev.is_some()
            }
        }
    }

    /// `[from, to]` in server unix seconds covering the local day so far.
    pub fn query_window(&self, now: NaiveDateTime) -> (i64, i64) {
        let offset = Duration::hours(self.broker_offset_hours);
        let start = now.date().and_time(chrono::NaiveTime::MIN) + offset;
        let end_of_day = start + Duration::days(1) - Duration::seconds(1);
        let to = (now + offset).min(end_of_day);
        (start.and_utc().timestamp(), to.and_utc().timestamp())
    }

    pub async fn evaluate(
        &mut self,
        now: NaiveDateTime,
        gateway: &dyn Gateway,
        account: Option<&AccountState>,
    ) -> DailyCheck {
        self.roll(now);

        if let Some(acc) = account {
            self.state.starting_equity_today.get_or_insert(acc.balance);
        }

        let loss_cap = self.loss_cap(gateway, account).await;
        let cap_unverified = self.strict_conversion && matches!(loss_cap, LossCap::Unconverted(_));

        if let Some(reason) = &self.state.paused {
            return DailyCheck {
                paused: Some(reason.clone()),
                newly_paused: false,
                net: None,
                loss_cap,
                cap_unverified,
            };
        }

        if self.profit_target <= 0.0 && loss_cap == LossCap::Disabled {
            return DailyCheck { paused: None, newly_paused: false, net: None, loss_cap, cap_unverified };
        }

        let (from, to) = self.query_window(now);
        let net = match gateway.deals_between(from, to).await {
            Ok(deals) => {
                let pnl = net_pnl(&deals);
                log::debug!(
                    "[daily] {} closed | profit {:.2} commission {:.2} swap {:.2} net {:.2}",
                    pnl.closed_trades, pnl.profit, pnl.commission, pnl.swap, pnl.net
                );
                Some(pnl.net)
            }
            Err(e) => {
                log::warn!("[daily] deal history unavailable: {}", e);
                None
            }
        };

        let cap = loss_cap.amount();
        let enforce_cap = cap > 0.0 && !cap_unverified;
        let mut reason = None;

        if let Some(net) = net {
            if self.profit_target > 0.0 && net >= self.profit_target {
                reason = Some(PauseReason::ProfitTarget { net, target: self.profit_target });
            } else if enforce_cap && net <= -cap {
                reason = Some(PauseReason::LossCap { net, cap });
            }
        }
        if reason.is_none() && enforce_cap && self.loss_limit_by_equity {
            if let (Some(start), Some(acc)) = (self.state.starting_equity_today, account) {
                let drawdown = start - acc.equity;
                if drawdown >= cap {
                    reason = Some(PauseReason::EquityDrawdown { drawdown, cap });
                }
            }
        }

        let newly_paused = reason.is_some();
        if let Some(r) = &reason {
            log::warn!("[daily] trading paused until tomorrow: {}", r);
            self.state.paused = Some(r.clone());
        }
        DailyCheck { paused: reason, newly_paused, net, loss_cap, cap_unverified }
    }

    /// Converts `max_daily_loss` into the account currency through the
    /// `SRCDST` mid (multiply) or the `DSTSRC` mid (divide).
    async fn loss_cap(&self, gateway: &dyn Gateway, account: Option<&AccountState>) -> LossCap {
        if self.max_daily_loss <= 0.0 {
            return LossCap::Disabled;
        }
        let Some(src) = self.loss_currency.as_deref().map(str::to_uppercase) else {
            return LossCap::Exact(self.max_daily_loss);
        };
        let dst = account
            .and_then(|a| a.currency.clone())
            .or_else(|| self.account_currency.clone())
            .map(|c| c.to_uppercase());
        let Some(dst) = dst else {
            log::warn!("[daily] account currency unknown, using loss cap {:.2} unconverted", self.max_daily_loss);
            return LossCap::Unconverted(self.max_daily_loss);
        };
        if src == dst {
            return LossCap::Exact(self.max_daily_loss);
        }

        if let Ok(q) = gateway.quote(&format!("{src}{dst}")).await {
            let mid = q.mid();
            if mid > 0.0 {
                return LossCap::Exact(self.max_daily_loss * mid);
            }
        }
        if let Ok(q) = gateway.quote(&format!("{dst}{src}")).await {
            let mid = q.mid();
            if mid > 0.0 {
                return LossCap::Exact(self.max_daily_loss / mid);
            }
        }

        if self.strict_conversion {
            log::error!("[daily] cannot convert loss cap {src}->{dst}, new entries blocked");
        } else {
            log::warn!(
                "[daily] cannot convert loss cap {src}->{dst}, using {:.2} unconverted",
                self.max_daily_loss
            );
        }
        LossCap::Unconverted(self.max_daily_loss)
    }
}
