//! Indicator math over closed candles.
//!
//! Series functions return one value per input element, `NaN` while the
//! indicator is still warming up. Nothing here allocates state between calls.

use crate::config::StrategyConfig;
use crate::types::Candle;

pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period { return out; }

    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period { return out; }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = prev;
    for i in period..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

/// Wilder RSI. First value lands at index `period`.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if period == 0 || closes.len() <= period { return out; }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 { avg_gain += change } else { avg_loss -= change }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    let p = period as f64;
    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        avg_gain = (avg_gain * (p - 1.0) + change.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-change).max(0.0)) / p;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 { 50.0 } else { 100.0 }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

pub fn true_range(curr: &Candle, prev: &Candle) -> f64 {
    (curr.high - curr.low)
        .max((curr.high - prev.close).abs())
        .max((curr.low - prev.close).abs())
}

/// Mean of the last `period` true ranges. Needs `period + 1` bars.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 { return None; }

    let start = candles.len() - period;
    let sum: f64 = (start..candles.len())
        .map(|i| true_range(&candles[i], &candles[i - 1]))
        .sum();
    let value = sum / period as f64;
    (value > 0.0 && value.is_finite()).then_some(value)
}

/// Wilder ADX. First value lands at index `2 * period - 1`.
pub fn adx(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < 2 * period { return out; }

    let mut tr = vec![0.0; n];
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        tr[i] = true_range(&candles[i], &candles[i - 1]);
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let p = period as f64;
    let mut sm_tr: f64 = tr[1..=period].iter().sum();
    let mut sm_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut sm_minus: f64 = minus_dm[1..=period].iter().sum();

    let mut dx = vec![f64::NAN; n];
    dx[period] = directional_index(sm_tr, sm_plus, sm_minus);
    for i in (period + 1)..n {
        sm_tr = sm_tr - sm_tr / p + tr[i];
        sm_plus = sm_plus - sm_plus / p + plus_dm[i];
        sm_minus = sm_minus - sm_minus / p + minus_dm[i];
        dx[i] = directional_index(sm_tr, sm_plus, sm_minus);
    }

    let first = 2 * period - 1;
    let mut value = dx[period..=first].iter().sum::<f64>() / p;
    out[first] = value;
    for i in (first + 1)..n {
        value = (value * (p - 1.0) + dx[i]) / p;
        out[i] = value;
    }
    out
}

fn directional_index(sm_tr: f64, sm_plus: f64, sm_minus: f64) -> f64 {
    if sm_tr <= 0.0 { return 0.0; }
    let plus_di = 100.0 * sm_plus / sm_tr;
    let minus_di = 100.0 * sm_minus / sm_tr;
    let sum = plus_di + minus_di;
    if sum == 0.0 { 0.0 } else { 100.0 * (plus_di - minus_di).abs() / sum }
}

/// Stochastic oscillator: (%K, %D). %K is 50 when the range is flat.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> (Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut k = vec![f64::NAN; n];
    if k_period == 0 || n < k_period { return (k, vec![f64::NAN; n]); }

    for i in (k_period - 1)..n {
        let window = &candles[i + 1 - k_period..=i];
        let lowest = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let highest = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        k[i] = if highest > lowest {
            100.0 * (candles[i].close - lowest) / (highest - lowest)
        } else {
            50.0
        };
    }

    let mut d = vec![f64::NAN; n];
    if d_period == 0 { return (k, d); }
    let start = k_period - 1;
    let tail = sma(&k[start..], d_period);
    d[start..].copy_from_slice(&tail);
    (k, d)
}

pub struct Bands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Bollinger bands with population standard deviation.
pub fn bollinger(closes: &[f64], period: usize, std_mult: f64) -> Bands {
    let middle = sma(closes, period);
    let mut upper = vec![f64::NAN; closes.len()];
    let mut lower = vec![f64::NAN; closes.len()];
    if period > 0 && closes.len() >= period {
        for i in (period - 1)..closes.len() {
            let mean = middle[i];
            let var = closes[i + 1 - period..=i]
                .iter()
                .map(|x| (x - mean).powi(2))
                .sum::<f64>()
                / period as f64;
            let dev = var.sqrt() * std_mult;
            upper[i] = mean + dev;
            lower[i] = mean - dev;
        }
    }
    Bands { upper, middle, lower }
}

/// Indicator values on the last closed bar plus the previous bar where a
/// rule needs a crossing.
#[derive(Clone, Debug, PartialEq)]
pub struct IndicatorSnapshot {
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_trend: f64,
    pub rsi: f64,
    pub prev_rsi: f64,
    pub adx: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub prev_bb_middle: f64,
    pub close: f64,
    pub prev_close: f64,
    pub recent_low: f64,
    pub recent_high: f64,
    pub timestamp: i64,
}

impl IndicatorSnapshot {
    /// `None` when any indicator is still warming up on the last bar.
    pub fn compute(candles: &[Candle], cfg: &StrategyConfig) -> Option<Self> {
        let n = candles.len();
        if n < 2 { return None; }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema_fast = ema(&closes, cfg.ema_fast_period);
        let ema_slow = ema(&closes, cfg.ema_slow_period);
        let ema_trend = ema(&closes, cfg.ema_trend_period);
        let rsi_series = rsi(&closes, cfg.rsi_period);
        let adx_series = adx(candles, cfg.adx_period);
        let (stoch_k, stoch_d) = stochastic(candles, cfg.stochastic_k, cfg.stochastic_d);
        let bands = bollinger(&closes, cfg.bollinger_period, cfg.bollinger_std);

        let lookback = cfg.band_touch_lookback.clamp(1, n);
        let recent = &candles[n - lookback..];

        let last = n - 1;
        let prev = n - 2;
        let snap = IndicatorSnapshot {
            ema_fast: ema_fast[last],
            ema_slow: ema_slow[last],
            ema_trend: ema_trend[last],
            rsi: rsi_series[last],
            prev_rsi: rsi_series[prev],
            adx: adx_series[last],
            stoch_k: stoch_k[last],
            stoch_d: stoch_d[last],
            bb_upper: bands.upper[last],
            bb_middle: bands.middle[last],
            bb_lower: bands.lower[last],
            prev_bb_middle: bands.middle[prev],
            close: closes[last],
            prev_close: closes[prev],
            recent_low: recent.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
            recent_high: recent.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
            timestamp: candles[last].timestamp,
        };
        snap.is_complete().then_some(snap)
    }

    fn is_complete(&self) -> bool {
        [
            self.ema_fast, self.ema_slow, self.ema_trend,
            self.rsi, self.prev_rsi, self.adx,
            self.stoch_k, self.stoch_d,
            self.bb_upper, self.bb_middle, self.bb_lower, self.prev_bb_middle,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle { timestamp: ts, open, high, low, close, volume: 0.0 }
    }

    fn flat(n: usize, price: f64) -> Vec<Candle> {
        (0..n).map(|i| candle(i as i64 * 60, price, price + 1.0, price - 1.0, price)).collect()
    }

    #[test]
    fn sma_and_ema_warm_up() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let s = sma(&v, 3);
        assert!(s[1].is_nan());
        assert_eq!(s[2], 2.0);
        assert_eq!(s[4], 4.0);

        let e = ema(&v, 3);
        assert!(e[1].is_nan());
        assert_eq!(e[2], 2.0);
        // alpha = 0.5
        assert_eq!(e[3], 3.0);
        assert_eq!(e[4], 4.0);
    }

    #[test]
    fn ema_of_constant_is_constant() {
        let v = vec![7.5; 50];
        assert!(ema(&v, 21)[20..].iter().all(|x| (x - 7.5).abs() < 1e-12));
    }

    #[test]
    fn rsi_extremes() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&up, 14)[29], 100.0);

        let down: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert!(rsi(&down, 14)[29] < 1e-9);

        let flat = vec![100.0; 30];
        assert_eq!(rsi(&flat, 14)[29], 50.0);
        assert!(rsi(&flat, 14)[13].is_nan());
    }

    #[test]
    fn atr_is_mean_of_last_true_ranges() {
        let candles = vec![
            candle(0, 10.0, 11.0, 9.0, 10.0),
            candle(60, 10.0, 12.0, 10.0, 11.0), // tr 2
            candle(120, 11.0, 11.5, 7.0, 8.0),  // tr 4.5
            candle(180, 8.0, 9.0, 8.0, 8.5),    // tr 1
        ];
        assert_eq!(atr(&candles, 2), Some(2.75));
        assert_eq!(atr(&candles, 3), Some(2.5));
        assert_eq!(atr(&candles, 4), None);
    }

    #[test]
    fn atr_of_motionless_market_is_none() {
        let candles: Vec<Candle> = (0..20).map(|i| candle(i, 5.0, 5.0, 5.0, 5.0)).collect();
        assert_eq!(atr(&candles, 14), None);
    }

    #[test]
    fn adx_rises_in_a_clean_trend() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(i * 60, base, base + 1.5, base - 0.5, base + 1.0)
            })
            .collect();
        let series = adx(&candles, 14);
        assert!(series[26].is_nan());
        assert!(series[27].is_finite());
        assert!(series[59] > 90.0);
    }

    #[test]
    fn stochastic_flat_range_is_fifty() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i, 3.0, 3.0, 3.0, 3.0)).collect();
        let (k, d) = stochastic(&candles, 5, 3);
        assert!(k[3].is_nan());
        assert_eq!(k[9], 50.0);
        assert!(d[5].is_nan());
        assert_eq!(d[6], 50.0);
    }

    #[test]
    fn stochastic_close_at_high_is_hundred() {
        let mut candles = flat(5, 100.0);
        candles.push(candle(300, 100.0, 110.0, 100.0, 110.0));
        let (k, _) = stochastic(&candles, 5, 3);
        assert_eq!(k[5], 100.0);
    }

    #[test]
    fn bollinger_uses_population_sigma() {
        let closes = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let b = bollinger(&closes, 8, 2.0);
        assert_eq!(b.middle[7], 5.0);
        assert_eq!(b.upper[7], 9.0);
        assert_eq!(b.lower[7], 1.0);
    }

    #[test]
    fn snapshot_needs_full_warm_up() {
        let cfg = StrategyConfig::default();
        assert!(IndicatorSnapshot::compute(&flat(150, 100.0), &cfg).is_none());
        let snap = IndicatorSnapshot::compute(&flat(250, 100.0), &cfg).unwrap();
        assert_eq!(snap.close, 100.0);
        assert_eq!(snap.recent_low, 99.0);
        assert_eq!(snap.timestamp, 249 * 60);
    }
}
