use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::config::{Algorithm, BiasConfig, RuleKind, StrategyConfig, TimeWindow, TrendScope, TREND_FLAGS};
use crate::indicators::{sma, IndicatorSnapshot};
use crate::structure::{StructureState, MIN_STRUCTURE_BARS};
use crate::types::{Bias, Candle, ConditionSet, Side, Signal};

/// Floor on the indicator window regardless of configured periods.
pub const MIN_SIGNAL_BARS: usize = 200;

pub struct SignalEngine {
    cfg: StrategyConfig,
    structure: StructureState,
}

impl SignalEngine {
    pub fn new(cfg: StrategyConfig) -> Self {
        let structure = StructureState::new(cfg.structure.clone());
        Self { cfg, structure }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.cfg
    }

    pub fn min_bars(&self) -> usize {
        match self.cfg.algorithm {
            Algorithm::Structure => MIN_STRUCTURE_BARS,
            _ => MIN_SIGNAL_BARS.max(self.cfg.longest_period() + 2),
        }
    }

    /// Runs the configured algorithm on closed bars. At most one signal.
    pub fn generate(&mut self, candles: &[Candle], bias: Option<Bias>) -> Option<Signal> {
        match self.cfg.algorithm {
            Algorithm::Indicators => self.evaluate(candles, bias),
            Algorithm::Structure => {
                let signal = self.structure.on_candles(candles)?;
                passes_bias(signal.side, bias).then_some(signal)
            }
            Algorithm::IndicatorsWithStructureGate => {
                self.structure.fold(candles);
                let signal = self.evaluate(candles, bias)?;
                let agrees = matches!(
                    (self.structure.bias(), signal.side),
                    (Bias::Bull, Side::Buy) | (Bias::Bear, Side::Sell)
                );
                if !agrees {
                    log::debug!(
                        "[signal] {} dropped, structure bias {:?}",
                        signal.side, self.structure.bias()
                    );
                    return None;
                }
                Some(signal)
            }
        }
    }

    /// Indicator rule catalog on the last bar of `candles`.
    pub fn evaluate(&self, candles: &[Candle], bias: Option<Bias>) -> Option<Signal> {
        if candles.len() < self.min_bars() { return None; }
        let snap = IndicatorSnapshot::compute(candles, &self.cfg)?;
        let (mut buy, mut sell) = self.score(&snap);

        match bias {
            Some(Bias::Neutral) => return None,
            Some(Bias::Bull) => sell.clear(),
            Some(Bias::Bear) => buy.clear(),
            None => {}
        }

        let total = self.cfg.rules.len();
        if self.cfg.debug_signals {
            log::info!(
                "[signal] BUY {}/{} {:?} | SELL {}/{} {:?} | price={:.2} RSI={:.1} ADX={:.1}",
                buy.met, total, buy.details, sell.met, total, sell.details,
                snap.close, snap.rsi, snap.adx
            );
        }

        let bar_time = candles.last()?.datetime();
        [buy, sell]
            .into_iter()
            .find(|set| self.allowed(set, bar_time))
            .map(|set| Signal {
                side: set.side,
                confidence: set.confidence(total),
                conditions_met: set.met,
                conditions_detail: set.details.iter().map(|t| t.to_string()).collect(),
                timestamp: snap.timestamp,
            })
    }

    /// Independent BUY and SELL scores. Both sides may hold the same tag.
    pub fn score(&self, s: &IndicatorSnapshot) -> (ConditionSet, ConditionSet) {
        let c = &self.cfg;
        let mut buy = ConditionSet::new(Side::Buy);
        let mut sell = ConditionSet::new(Side::Sell);

        for rule in &c.rules {
            match rule {
                RuleKind::EmaCross => {
                    if s.ema_fast > s.ema_slow { buy.push("EMA_CROSS"); }
                    if s.ema_fast < s.ema_slow { sell.push("EMA_CROSS"); }
                }
                RuleKind::TrendPosition => {
                    if s.close > s.ema_trend { buy.push("ABOVE_TREND"); }
                    if s.close < s.ema_trend { sell.push("BELOW_TREND"); }
                }
                RuleKind::RsiExtreme => {
                    if s.rsi < c.rsi_oversold { buy.push("RSI_OVERSOLD"); }
                    if s.rsi > c.rsi_overbought { sell.push("RSI_OVERBOUGHT"); }
                }
                RuleKind::StrongTrend => {
                    if s.adx > c.adx_threshold {
                        buy.push("STRONG_TREND");
                        sell.push("STRONG_TREND");
                    }
                }
                RuleKind::StochCross => {
                    if s.stoch_k < c.stochastic_oversold && s.stoch_k > s.stoch_d {
                        buy.push("STOCH_BULLISH");
                    }
                    if s.stoch_k > c.stochastic_overbought && s.stoch_k < s.stoch_d {
                        sell.push("STOCH_BEARISH");
                    }
                }
                RuleKind::RsiMidline => {
                    if s.prev_rsi < 50.0 && s.rsi >= 50.0 { buy.push("RSI_RECOVERY"); }
                    if s.prev_rsi > 50.0 && s.rsi <= 50.0 { sell.push("RSI_ROLLOVER"); }
                }
                RuleKind::BandReclaim => {
                    if s.prev_close < s.prev_bb_middle && s.close >= s.bb_middle {
                        buy.push("BB_MID_RECLAIM");
                    }
                    if s.prev_close > s.prev_bb_middle && s.close <= s.bb_middle {
                        sell.push("BB_MID_REJECT");
                    }
                }
                RuleKind::BandTouch => {
                    if s.recent_low <= s.bb_lower { buy.push("BB_LOWER_TOUCH"); }
                    if s.recent_high >= s.bb_upper { sell.push("BB_UPPER_TOUCH"); }
                }
            }
        }
        (buy, sell)
    }

    fn allowed(&self, set: &ConditionSet, bar_time: Option<NaiveDateTime>) -> bool {
        let tf = &self.cfg.trend_filter;
        let mut min_required = self.cfg.min_conditions_required;
        let mut require_trend_flag = false;

        let active = tf.enabled
            && match tf.scope {
                TrendScope::Always => true,
                TrendScope::Window => bar_time.is_some_and(|t| in_weekly_window(&tf.window, t)),
            };
        if active {
            min_required += match set.side {
                Side::Buy => tf.extra_conditions.buy,
                Side::Sell => tf.extra_conditions.sell,
            };
            require_trend_flag = tf.require_trend_flag;
        }

        if set.met < min_required.max(1) { return false; }
        !require_trend_flag || set.details.iter().any(|t| TREND_FLAGS.contains(t))
    }
}

fn passes_bias(side: Side, bias: Option<Bias>) -> bool {
    match bias {
        None => true,
        Some(Bias::Neutral) => false,
        Some(Bias::Bull) => side == Side::Buy,
        Some(Bias::Bear) => side == Side::Sell,
    }
}

/// True when `t` falls in the weekday/hour window. End hour is exclusive;
/// a start after the end runs past midnight into the following weekday.
pub fn in_weekly_window(w: &TimeWindow, t: NaiveDateTime) -> bool {
    let weekday = t.weekday().num_days_from_monday();
    let hour = t.hour();
    if w.start_hour < w.end_hour {
        weekday == w.weekday && hour >= w.start_hour && hour < w.end_hour
    } else {
        (weekday == w.weekday && hour >= w.start_hour)
            || (weekday == (w.weekday + 1) % 7 && hour < w.end_hour)
    }
}

/// Higher-timeframe direction from entry bars grouped `htf_factor` at a time.
/// `None` while there are fewer than `sma_period` complete groups.
pub fn bias_from_candles(candles: &[Candle], cfg: &BiasConfig) -> Option<Bias> {
    if cfg.htf_factor == 0 || cfg.sma_period == 0 { return None; }

    let mut htf_closes: Vec<f64> = candles
        .rchunks_exact(cfg.htf_factor)
        .filter_map(|chunk| chunk.last().map(|c| c.close))
        .collect();
    htf_closes.reverse();
    if htf_closes.len() < cfg.sma_period { return None; }

    let average = *sma(&htf_closes, cfg.sma_period).last()?;
    let last = *htf_closes.last()?;
    let band = average * cfg.neutral_band_pct / 100.0;
    let bias = if last > average + band {
        Bias::Bull
    } else if last < average - band {
        Bias::Bear
    } else {
        Bias::Neutral
    };
    Some(bias)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::indicators::tests::candle;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    /// Monday 2024-01-01 00:00 UTC.
    pub(crate) const MONDAY: i64 = 1_704_067_200;

    /// Long steady uptrend, a sharp five-bar pullback, then a small uptick.
    /// Leaves EMA_CROSS, ABOVE_TREND, STRONG_TREND and STOCH_BULLISH on BUY.
    pub(crate) fn pullback_in_uptrend(start: i64) -> Vec<Candle> {
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

    fn engine() -> SignalEngine {
        SignalEngine::new(StrategyConfig::default())
    }

    #[test]
    fn four_of_five_buy() {
        let candles = pullback_in_uptrend(MONDAY);
        let signal = engine().evaluate(&candles, None).unwrap();
        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.conditions_met, 4);
        assert_eq!(
            signal.conditions_detail,
            vec!["EMA_CROSS", "ABOVE_TREND", "STRONG_TREND", "STOCH_BULLISH"]
        );
        assert!((signal.confidence - 0.8).abs() < 1e-12);
        assert_eq!(signal.timestamp, candles.last().unwrap().timestamp);
    }

    #[test]
    fn short_window_gives_nothing() {
        let candles = pullback_in_uptrend(MONDAY);
        assert!(engine().evaluate(&candles[candles.len() - 199..], None).is_none());
    }

    #[test]
    fn bias_gate() {
        let candles = pullback_in_uptrend(MONDAY);
        let e = engine();
        assert!(e.evaluate(&candles, Some(Bias::Neutral)).is_none());
        assert!(e.evaluate(&candles, Some(Bias::Bear)).is_none());
        assert_eq!(e.evaluate(&candles, Some(Bias::Bull)).unwrap().side, Side::Buy);
    }

    #[test]
    fn both_sides_qualifying_resolves_to_buy() {
        let mut cfg = StrategyConfig::default();
        cfg.rules = vec![RuleKind::StrongTrend];
        cfg.min_conditions_required = 1;
        let e = SignalEngine::new(cfg);
        let candles = pullback_in_uptrend(MONDAY);
        let snap = IndicatorSnapshot::compute(&candles, e.config()).unwrap();
        let (buy, sell) = e.score(&snap);
        assert_eq!(buy.met, 1);
        assert_eq!(sell.met, 1);
        assert_eq!(e.evaluate(&candles, None).unwrap().side, Side::Buy);
    }

    #[test]
    fn trend_filter_raises_threshold() {
        let mut cfg = StrategyConfig::default();
        cfg.min_conditions_required = 4;
        cfg.trend_filter.scope = TrendScope::Always;
        cfg.trend_filter.extra_conditions.buy = 1;
        let candles = pullback_in_uptrend(MONDAY);
        assert!(SignalEngine::new(cfg.clone()).evaluate(&candles, None).is_none());

        cfg.trend_filter.enabled = false;
        assert!(SignalEngine::new(cfg).evaluate(&candles, None).is_some());
    }

    #[test]
    fn trend_filter_window_uses_bar_time() {
        // 2024-01-04 is a Thursday; the default window is Thu 00-08 with
        // SELL +1 and a trend tag required, BUY keeps its count.
        let thursday = MONDAY + 3 * 86_400;
        let candles = pullback_in_uptrend(thursday);
        let signal = engine().evaluate(&candles, None).unwrap();
        assert_eq!(signal.side, Side::Buy);

        let mut cfg = StrategyConfig::default();
        cfg.trend_filter.extra_conditions.buy = 2;
        assert!(SignalEngine::new(cfg.clone()).evaluate(&candles, None).is_none());
        assert!(SignalEngine::new(cfg).evaluate(&pullback_in_uptrend(MONDAY), None).is_some());
    }

    #[test]
    fn weekly_window_wraps_past_midnight() {
        let w = TimeWindow { weekday: 3, start_hour: 22, end_hour: 2 };
        let at = |d: u32, h: u32| NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(h, 0, 0).unwrap();
        assert!(in_weekly_window(&w, at(4, 23))); // Thu 23h
        assert!(in_weekly_window(&w, at(5, 1))); // Fri 01h
        assert!(!in_weekly_window(&w, at(5, 2)));
        assert!(!in_weekly_window(&w, at(4, 21)));
        assert!(!in_weekly_window(&w, at(3, 23))); // Wed

        let plain = TimeWindow { weekday: 3, start_hour: 0, end_hour: 8 };
        assert!(in_weekly_window(&plain, at(4, 0)));
        assert!(!in_weekly_window(&plain, at(4, 8)));
    }

    #[test]
    fn htf_bias_from_resampled_closes() {
        let cfg = BiasConfig { enabled: true, htf_factor: 4, sma_period: 5, neutral_band_pct: 0.0 };
        let rising: Vec<Candle> = (0..40).map(|i| candle(i * 60, 1.0, 1.0, 1.0, 100.0 + i as f64)).collect();
        assert_eq!(bias_from_candles(&rising, &cfg), Some(Bias::Bull));

        let falling: Vec<Candle> = (0..40).map(|i| candle(i * 60, 1.0, 1.0, 1.0, 100.0 - i as f64)).collect();
        assert_eq!(bias_from_candles(&falling, &cfg), Some(Bias::Bear));

        let flat: Vec<Candle> = (0..40).map(|i| candle(i * 60, 1.0, 1.0, 1.0, 100.0)).collect();
        assert_eq!(bias_from_candles(&flat, &cfg), Some(Bias::Neutral));

        assert_eq!(bias_from_candles(&rising[..19], &cfg), None);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let candles = pullback_in_uptrend(MONDAY);
        let e = engine();
        assert_eq!(e.evaluate(&candles, None), e.evaluate(&candles, None));
    }

    #[test]
    fn structure_gate_drops_disagreeing_signal() {
        let mut cfg = StrategyConfig::default();
        cfg.algorithm = Algorithm::IndicatorsWithStructureGate;
        let mut e = SignalEngine::new(cfg);
        // no swing level is ever broken, so structure stays neutral
        let candles = pullback_in_uptrend(MONDAY);
        assert!(e.generate(&candles, None).is_none());
    }

    proptest! {
        #[test]
        fn windows_below_minimum_never_signal(len in 0usize..200, drift in -2.0f64..2.0) {
            let candles: Vec<Candle> = (0..len)
                .map(|i| {
                    let close = 1000.0 + drift * i as f64 + ((i * 7) % 5) as f64;
                    candle(MONDAY + i as i64 * 60, close - 1.0, close + 2.0, close - 2.0, close)
                })
                .collect();
            prop_assert!(engine().evaluate(&candles, None).is_none());
        }
    }
}
