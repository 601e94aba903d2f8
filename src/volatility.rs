use chrono::NaiveDateTime;

use crate::config::VolatilityConfig;
use crate::types::TradingMode;

/// Normal/Scalp regime driven by the current ATR.
#[derive(Clone, Debug)]
pub struct VolatilityMode {
    cfg: VolatilityConfig,
    current: TradingMode,
    current_atr: Option<f64>,
    last_check: Option<NaiveDateTime>,
}

impl VolatilityMode {
    pub fn new(cfg: VolatilityConfig) -> Self {
        if cfg.enabled {
            log::info!(
                "[volatility] enabled | ATR({}) scalp threshold {} | scalp target {:.2}",
                cfg.atr_period, cfg.atr_scalp_threshold, cfg.scalp_profit_target
            );
        }
        Self { cfg, current: TradingMode::Normal, current_atr: None, last_check: None }
    }

    pub fn mode(&self) -> TradingMode {
        self.current
    }

    pub fn current_atr(&self) -> Option<f64> {
        self.current_atr
    }

    pub fn last_check(&self) -> Option<NaiveDateTime> {
        self.last_check
    }

    pub fn scalp_profit_target(&self) -> f64 {
        self.cfg.scalp_profit_target
    }

    pub fn atr_period(&self) -> usize {
        self.cfg.atr_period
    }

    /// Recomputes the mode. Returns `(from, to)` when it changed.
    ///
    /// A missing ATR keeps the previous mode.
    pub fn update(&mut self, atr: Option<f64>, now: NaiveDateTime) -> Option<(TradingMode, TradingMode)> {
        self.last_check = Some(now);
        let atr = atr?;
        self.current_atr = Some(atr);

        let next = if self.cfg.enabled && atr > self.cfg.atr_scalp_threshold {
            TradingMode::Scalp
        } else {
            TradingMode::Normal
        };
        if next == self.current {
            return None;
        }
        let from = self.current;
        self.current = next;
        log::warn!(
            "[volatility] mode {} -> {} | ATR {:.5} (threshold {})",
            from.as_str().to_uppercase(),
            next.as_str().to_uppercase(),
            atr,
            self.cfg.atr_scalp_threshold
        );
        Some((from, next))
    }

    /// ATR above the configured ceiling, when the ceiling is in force.
    pub fn is_extreme(&self, atr: f64) -> bool {
        match self.cfg.atr_max_for_trading {
            Some(max) if self.cfg.skip_trading_when_atr_extreme => atr > max,
            _ => false,
        }
    }
}

/// Minimum spacing between consecutive entries.
#[derive(Clone, Debug)]
pub struct Cooldown {
    normal_secs: i64,
    scalp_secs: i64,
    last_trade: Option<(NaiveDateTime, TradingMode)>,
}

impl Cooldown {
    pub fn new(cfg: &VolatilityConfig) -> Self {
        Self {
            normal_secs: cfg.normal_cooldown_seconds as i64,
            scalp_secs: cfg.scalp_cooldown_seconds as i64,
            last_trade: None,
        }
    }

    /// `kind` is Scalp for entries made in scalp mode and for scalp exits.
    pub fn record(&mut self, now: NaiveDateTime, kind: TradingMode) {
        self.last_trade = Some((now, kind));
    }

    pub fn last_trade(&self) -> Option<(NaiveDateTime, TradingMode)> {
        self.last_trade
    }

    /// Seconds left before another entry is allowed; 0 when clear.
    pub fn remaining(&self, now: NaiveDateTime) -> i64 {
        let Some((at, kind)) = self.last_trade else {
            return 0;
        };
        let window = match kind {
            TradingMode::Scalp => self.scalp_secs,
            TradingMode::Normal => self.normal_secs,
        };
        (window - (now - at).num_seconds()).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 3).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn enabled() -> VolatilityConfig {
        VolatilityConfig { enabled: true, ..VolatilityConfig::default() }
    }

    #[test]
    fn switches_on_threshold_and_back() {
        let mut v = VolatilityMode::new(enabled());
        assert_eq!(v.update(Some(1.5), t0()), None);
        assert_eq!(v.update(Some(2.5), t0()), Some((TradingMode::Normal, TradingMode::Scalp)));
        assert_eq!(v.update(Some(3.0), t0()), None);
        assert_eq!(v.mode(), TradingMode::Scalp);
        assert_eq!(v.update(Some(2.0), t0()), Some((TradingMode::Scalp, TradingMode::Normal)));
    }

    #[test]
    fn disabled_stays_normal_and_missing_atr_keeps_mode() {
        let mut v = VolatilityMode::new(VolatilityConfig::default());
        assert_eq!(v.update(Some(50.0), t0()), None);
        assert_eq!(v.mode(), TradingMode::Normal);

        let mut v = VolatilityMode::new(enabled());
        v.update(Some(5.0), t0());
        assert_eq!(v.update(None, t0()), None);
        assert_eq!(v.mode(), TradingMode::Scalp);
        assert_eq!(v.current_atr(), Some(5.0));
    }

    #[test]
    fn extreme_needs_flag_and_ceiling() {
        let v = VolatilityMode::new(VolatilityConfig { atr_max_for_trading: Some(8.0), ..enabled() });
        assert!(!v.is_extreme(9.0));
        let v = VolatilityMode::new(VolatilityConfig {
            skip_trading_when_atr_extreme: true,
            atr_max_for_trading: Some(8.0),
            ..enabled()
        });
        assert!(v.is_extreme(8.5));
        assert!(!v.is_extreme(8.0));
    }

    #[test]
    fn cooldown_depends_on_trade_kind() {
        let mut c = Cooldown::new(&VolatilityConfig::default());
        assert_eq!(c.remaining(t0()), 0);

        c.record(t0(), TradingMode::Normal);
        assert_eq!(c.remaining(t0() + Duration::seconds(20)), 40);
        assert_eq!(c.remaining(t0() + Duration::seconds(61)), 0);

        c.record(t0(), TradingMode::Scalp);
        assert_eq!(c.remaining(t0() + Duration::seconds(20)), 10);
        assert_eq!(c.remaining(t0() + Duration::seconds(30)), 0);
    }
}
