use crate::config::StructureConfig;
use crate::indicators::atr;
use crate::types::{Bias, Candle, FvgZone, Side, Signal};

/// Bars required before the structure algorithm emits anything.
pub const MIN_STRUCTURE_BARS: usize = 50;

/// Market structure and open imbalance zones, carried across polls.
///
/// Bullish imbalance: `low[i] > high[i-2]` → zone = [high[i-2], low[i]]
/// Bearish imbalance: `high[i] < low[i-2]` → zone = [high[i], low[i-2]]
#[derive(Clone, Debug)]
pub struct StructureState {
    cfg: StructureConfig,
    bias: Bias,
    swing_high: Option<f64>,
    swing_low: Option<f64>,
    last_event: Option<&'static str>,
    bar_index: u64,
    last_timestamp: Option<i64>,
    zones: Vec<FvgZone>,
}

impl StructureState {
    pub fn new(cfg: StructureConfig) -> Self {
        Self {
            cfg,
            bias: Bias::Neutral,
            swing_high: None,
            swing_low: None,
            last_event: None,
            bar_index: 0,
            last_timestamp: None,
            zones: Vec::new(),
        }
    }

    pub fn bias(&self) -> Bias {
        self.bias
    }

    pub fn last_event(&self) -> Option<&'static str> {
        self.last_event
    }

    pub fn zones(&self) -> &[FvgZone] {
        &self.zones
    }

    /// Folds new bars into the state, then checks the latest bar for a zone
    /// rejection. Returns `None` when no new bar arrived since the last call.
    pub fn on_candles(&mut self, candles: &[Candle]) -> Option<Signal> {
        let folded = self.fold(candles);
        if folded == 0 || candles.len() < MIN_STRUCTURE_BARS { return None; }
        self.trigger(candles.last()?)
    }

    /// Processes every bar newer than the last one seen. Returns the count.
    pub fn fold(&mut self, candles: &[Candle]) -> usize {
        let start = match self.last_timestamp {
            Some(ts) => candles.partition_point(|c| c.timestamp <= ts),
            None => 0,
        };
        for i in start..candles.len() {
            self.bar_index += 1;
            self.confirm_swings(candles, i);
            self.check_break(&candles[i]);
            self.detect_zone(candles, i);
            self.expire_zones();
            self.last_timestamp = Some(candles[i].timestamp);
        }
        candles.len() - start
    }

    fn confirm_swings(&mut self, candles: &[Candle], i: usize) {
        let n = self.cfg.fractal_bars;
        if i < 2 * n { return; }
        let j = i - n;
        let pivot = &candles[j];
        let neighbours = candles[j - n..j].iter().chain(&candles[j + 1..=i]);

        let (mut is_high, mut is_low) = (true, true);
        for c in neighbours {
            is_high &= pivot.high > c.high;
            is_low &= pivot.low < c.low;
        }
        if is_high { self.swing_high = Some(pivot.high); }
        if is_low { self.swing_low = Some(pivot.low); }
    }

    fn check_break(&mut self, bar: &Candle) {
        if let Some(level) = self.swing_high {
            if bar.close > level {
                self.last_event = Some(if self.bias == Bias::Bear { "CHOCH_BULL" } else { "BOS_BULL" });
                self.bias = Bias::Bull;
                self.swing_high = None;
                log::debug!("[structure] {} through {:.5}", self.last_event.unwrap_or_default(), level);
            }
        }
        if let Some(level) = self.swing_low {
            if bar.close < level {
                self.last_event = Some(if self.bias == Bias::Bull { "CHOCH_BEAR" } else { "BOS_BEAR" });
                self.bias = Bias::Bear;
                self.swing_low = None;
                log::debug!("[structure] {} through {:.5}", self.last_event.unwrap_or_default(), level);
            }
        }
    }

    fn detect_zone(&mut self, candles: &[Candle], i: usize) {
        if i < 2 { return; }
        let c1 = &candles[i - 2];
        let c3 = &candles[i];

        let (direction, low, high) = if c3.low > c1.high {
            (Side::Buy, c1.high, c3.low)
        } else if c3.high < c1.low {
            (Side::Sell, c3.high, c1.low)
        } else {
            return;
        };

        let Some(current_atr) = atr(&candles[..=i], self.cfg.atr_period) else { return };
        if high - low < self.cfg.min_zone_atr * current_atr { return; }

        self.zones.push(FvgZone {
            direction,
            low,
            high,
            created_time: c3.timestamp,
            created_index: self.bar_index,
            used: false,
        });
    }

    fn expire_zones(&mut self) {
        let now = self.bar_index;
        let max_age = self.cfg.max_zone_age_bars;
        self.zones.retain(|z| !z.used && now - z.created_index <= max_age);
    }

    fn trigger(&mut self, bar: &Candle) -> Option<Signal> {
        let side = match self.bias {
            Bias::Bull => Side::Buy,
            Bias::Bear => Side::Sell,
            Bias::Neutral => return None,
        };
        let ratio = self.cfg.wick_body_ratio;
        let now = self.bar_index;

        let zone = self.zones.iter_mut().rev().find(|z| {
            z.direction == side
                && !z.used
                && z.created_index < now
                && match side {
                    Side::Buy => {
                        bar.low <= z.high && bar.close > z.high && bar.lower_wick() >= ratio * bar.body()
                    }
                    Side::Sell => {
                        bar.high >= z.low && bar.close < z.low && bar.upper_wick() >= ratio * bar.body()
                    }
                }
        })?;
        zone.used = true;
        log::info!(
            "[structure] {} rejection of zone {:.5}-{:.5} (close {:.5})",
            side, zone.low, zone.high, bar.close
        );
        self.zones.retain(|z| !z.used);

        let zone_tag = match side {
            Side::Buy => "FVG_BULL",
            Side::Sell => "FVG_BEAR",
        };
        let structure_tag = self.last_event.unwrap_or(match side {
            Side::Buy => "STRUCTURE_BULL",
            Side::Sell => "STRUCTURE_BEAR",
        });
        Some(Signal {
            side,
            confidence: 1.0,
            conditions_met: 2,
            conditions_detail: vec![zone_tag.to_string(), structure_tag.to_string()],
            timestamp: bar.timestamp,
        })
    }
}
