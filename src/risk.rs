use std::fmt;

use crate::config::{ConfidenceSizing, RiskConfig, TradingConfig};
use crate::types::{AccountState, Side, StopsPlan};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StopMultiples {
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl From<&TradingConfig> for StopMultiples {
    fn from(t: &TradingConfig) -> Self {
        Self { stop_loss: t.stop_loss_atr_multiple, take_profit: t.take_profit_atr_multiple }
    }
}

/// ATR-scaled stop and target around `entry`. `None` when ATR is unusable.
pub fn stops_for(entry: f64, atr: f64, side: Side, m: &StopMultiples) -> Option<StopsPlan> {
    if atr <= 0.0 || !atr.is_finite() || entry <= 0.0 || !entry.is_finite() { return None; }
    let sign = side.sign();
    Some(StopsPlan {
        stop_loss: entry - sign * atr * m.stop_loss,
        take_profit: entry + sign * atr * m.take_profit,
    })
}

/// Pushes any leg closer than `min_distance` (or on the wrong side) out to
/// exactly `min_distance` from `price`. Legs already far enough stay put.
pub fn repair_for_broker_minimum(price: f64, plan: StopsPlan, min_distance: f64, side: Side) -> StopsPlan {
    if min_distance <= 0.0 || !min_distance.is_finite() { return plan; }
    let sign = side.sign();
    let mut out = plan;

    if sign * (price - plan.stop_loss) < min_distance {
        out.stop_loss = price - sign * min_distance;
        log::warn!(
            "[risk] {} stop {:.5} inside broker minimum {:.5}, moved to {:.5}",
            side, plan.stop_loss, min_distance, out.stop_loss
        );
    }
    if sign * (plan.take_profit - price) < min_distance {
        out.take_profit = price + sign * min_distance;
        log::warn!(
            "[risk] {} target {:.5} inside broker minimum {:.5}, moved to {:.5}",
            side, plan.take_profit, min_distance, out.take_profit
        );
    }
    out
}

/// Last gate before an order leaves the engine.
pub fn validate_trade(side: Side, price: f64, plan: &StopsPlan) -> Result<(), String> {
    if price <= 0.0 || !price.is_finite() {
        return Err(format!("Entry price {price:.5} must be positive"));
    }
    if plan.stop_loss <= 0.0 || plan.take_profit <= 0.0 || plan.stop_loss.is_nan() || plan.take_profit.is_nan() {
        return Err(format!(
            "SL {:.5} / TP {:.5} must be positive",
            plan.stop_loss, plan.take_profit
        ));
    }
    match side {
        Side::Buy => {
            if plan.stop_loss >= price {
                return Err(format!("SL {:.5} must be below entry {:.5} for Buy", plan.stop_loss, price));
            }
            if plan.take_profit <= price {
                return Err(format!("TP {:.5} must be above entry {:.5} for Buy", plan.take_profit, price));
            }
        }
        Side::Sell => {
            if plan.stop_loss <= price {
                return Err(format!("SL {:.5} must be above entry {:.5} for Sell", plan.stop_loss, price));
            }
            if plan.take_profit >= price {
                return Err(format!("TP {:.5} must be below entry {:.5} for Sell", plan.take_profit, price));
            }
        }
    }
    Ok(())
}

pub fn validate(side: Side, price: f64, plan: &StopsPlan) -> bool {
    validate_trade(side, price, plan).is_ok()
}

/// Why `can_trade` refused a new entry.
#[derive(Clone, Debug, PartialEq)]
pub enum RiskBlock {
    MaxPositions { open: usize, max: usize },
    DailyLoss { loss: f64, cap: f64 },
    Drawdown { pct: f64, max: f64 },
}

impl fmt::Display for RiskBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskBlock::MaxPositions { open, max } => write!(f, "position limit reached: {open}/{max}"),
            RiskBlock::DailyLoss { loss, cap } => write!(f, "daily loss {loss:.2} reached cap {cap:.2}"),
            RiskBlock::Drawdown { pct, max } => write!(f, "drawdown {pct:.2}% reached max {max:.2}%"),
        }
    }
}

/// Inputs for one `can_trade` decision, gathered by the caller.
#[derive(Clone, Debug)]
pub struct RiskInputs<'a> {
    pub open_positions: usize,
    /// Realized net P&L today in account currency.
    pub realized_today: f64,
    /// Loss cap in account currency, 0 disables.
    pub daily_loss_cap: f64,
    pub account: Option<&'a AccountState>,
}

pub struct RiskManager {
    max_positions: usize,
    max_drawdown_percent: f64,
    lot_size: f64,
    sizing: ConfidenceSizing,
}

impl RiskManager {
    pub fn new(risk: &RiskConfig, trading: &TradingConfig) -> Self {
        let rm = Self {
            max_positions: risk.max_positions_per_bot.min(trading.max_positions),
            max_drawdown_percent: risk.max_drawdown_percent,
            lot_size: trading.lot_size,
            sizing: risk.confidence_based_sizing.clone(),
        };
        log::info!("[risk] max positions {} | max drawdown {}%", rm.max_positions, rm.max_drawdown_percent);
        if rm.sizing.enabled {
            log::info!(
                "[risk] confidence sizing ENABLED (range {}-{})",
                rm.sizing.min_multiplier, rm.sizing.max_multiplier
            );
        }
        rm
    }

    /// Composite entry permission. Never affects management of open positions.
    pub fn can_trade(&self, inputs: &RiskInputs<'_>) -> Result<(), RiskBlock> {
        if inputs.open_positions >= self.max_positions {
            return Err(RiskBlock::MaxPositions { open: inputs.open_positions, max: self.max_positions });
        }
        if inputs.daily_loss_cap > 0.0 && inputs.realized_today < 0.0 {
            let loss = -inputs.realized_today;
            if loss >= inputs.daily_loss_cap {
                return Err(RiskBlock::DailyLoss { loss, cap: inputs.daily_loss_cap });
            }
        }
        if let Some(acc) = inputs.account.filter(|a| a.balance > 0.0) {
            let pct = (acc.balance - acc.equity) / acc.balance * 100.0;
            if pct >= self.max_drawdown_percent {
                return Err(RiskBlock::Drawdown { pct, max: self.max_drawdown_percent });
            }
        }
        Ok(())
    }

    /// Order volume for a signal. `None` means the confidence is too low to trade.
    pub fn lot_for(&self, confidence: f64) -> Option<f64> {
        let s = &self.sizing;
        if !s.enabled {
            return Some(self.lot_size);
        }
        if confidence < s.min_confidence {
            log::info!("[risk] confidence {:.2} below minimum {:.2}, skipping", confidence, s.min_confidence);
            return None;
        }

        let span = s.high_confidence_threshold - s.min_confidence;
        let t = if span > 0.0 { ((confidence - s.min_confidence) / span).clamp(0.0, 1.0) } else { 1.0 };
        let multiplier = s.min_multiplier + (s.max_multiplier - s.min_multiplier) * t;
        let raw = self.lot_size * multiplier;

        // Round DOWN to the broker's volume step
        let steps = (raw / s.volume_step + 1e-9).floor();
        let lot = round_volume(steps * s.volume_step).max(s.min_volume);
        log::debug!("[risk] confidence {:.2} → multiplier {:.2} → lot {}", confidence, multiplier, lot);
        Some(lot)
    }
}

fn round_volume(v: f64) -> f64 {
    (v * 1e8).round() / 1e8
}
