use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::session::SwapWindow;

// ─── Environment ──────────────────────────────────────────────────────────────
// BRIDGE_API_KEY, BRIDGE_API_SECRET, TELEGRAM_TOKEN, TELEGRAM_CHAT_ID
// are read from environment variables at runtime, never from the config file.

pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8765";
pub const DEFAULT_NEWS_URL: &str = "https://nfs.faireconomy.media/ff_calendar_thisweek.json";

/// Comment attached to market closes issued by the scalp exit.
pub const SCALP_EXIT_COMMENT: &str = "scalp_quick_profit";

/// Tags that count as "trend aligned" for the trend filter.
pub const TREND_FLAGS: &[&str] = &["ABOVE_TREND", "BELOW_TREND", "STRONG_TREND"];

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub strategy: StrategyConfig,
    pub volatility: VolatilityConfig,
    pub news: NewsConfig,
    pub telegram: TelegramConfig,
    pub system: SystemConfig,
}

// ─── Broker ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub symbol: String,                  // required
    pub magic_number: u64,               // required, tags this engine's orders
    pub broker_timezone_offset: i64,     // hours, server = local + offset
    pub account_currency: Option<String>, // used when the account does not report one
    pub bridge_url: String,
    pub request_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            magic_number: 0,
            broker_timezone_offset: 0,
            account_currency: None,
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            request_timeout_secs: 10,
        }
    }
}

// ─── Trading ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingStopType {
    Chandelier,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub timeframe: String, // required: M1, M5, M15, M30, H1, H4, D1
    pub lot_size: f64,     // required
    pub max_positions: usize,
    pub use_atr_based_stops: bool,
    pub atr_period: usize,
    pub stop_loss_atr_multiple: f64,
    pub take_profit_atr_multiple: f64,
    pub use_smart_breakeven: bool,
    pub breakeven_profit_multiple: f64,      // trigger, × entry ATR
    pub breakeven_lock_profit_multiple: f64, // new stop offset from entry, × entry ATR
    pub use_trailing_stop: bool,
    pub trailing_stop_type: TrailingStopType,
    pub trailing_stop_atr_multiple: f64,
    pub min_profit_for_trail_activation: f64, // × entry ATR
    pub daily_profit_target: f64,             // account currency, 0 disables
    pub market_data_bars: usize,
    pub order_comment: String,
    pub trading_hours: TradingHoursConfig,
    pub swap_avoidance: SwapAvoidanceConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            timeframe: String::new(),
            lot_size: 0.0,
            max_positions: 1,
            use_atr_based_stops: true,
            atr_period: 14,
            stop_loss_atr_multiple: 1.0,
            take_profit_atr_multiple: 2.0,
            use_smart_breakeven: true,
            breakeven_profit_multiple: 1.2,
            breakeven_lock_profit_multiple: 0.3,
            use_trailing_stop: true,
            trailing_stop_type: TrailingStopType::Chandelier,
            trailing_stop_atr_multiple: 2.0,
            min_profit_for_trail_activation: 1.5,
            daily_profit_target: 0.0,
            market_data_bars: 300,
            order_comment: "sniper_engine_v4".to_string(),
            trading_hours: TradingHoursConfig::default(),
            swap_avoidance: SwapAvoidanceConfig::default(),
        }
    }
}

impl TradingConfig {
    /// Bar length in seconds for the configured timeframe.
    pub fn timeframe_secs(&self) -> Option<i64> {
        let secs = match self.timeframe.to_ascii_uppercase().as_str() {
            "M1" => 60,
            "M5" => 300,
            "M15" => 900,
            "M30" => 1_800,
            "H1" => 3_600,
            "H4" => 14_400,
            "D1" => 86_400,
            _ => return None,
        };
        Some(secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingHoursConfig {
    pub saturday_closed: bool,
    pub sunday_closed: bool,
    pub monday_open_hour: u32,
    pub sunday_open_hour: u32,
    pub friday_close_hour: u32,
}

impl Default for TradingHoursConfig {
    fn default() -> Self {
        Self {
            saturday_closed: true,
            sunday_closed: false,
            monday_open_hour: 0,
            sunday_open_hour: 22,
            friday_close_hour: 22,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapAvoidanceConfig {
    pub enabled: bool,
    pub server_time_windows: Vec<WindowSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WindowSpec {
    pub start: String, // "HH:MM" server time
    pub end: String,
}

// ─── Risk ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_daily_loss: f64,                  // 0 disables the daily loss cap
    pub max_daily_loss_currency: Option<String>, // None = already in account currency
    pub max_drawdown_percent: f64,
    pub max_positions_per_bot: usize,
    pub loss_limit_by_equity: bool,
    /// Block entries instead of using the raw cap when no FX quote converts it.
    pub strict_loss_cap_conversion: bool,
    pub confidence_based_sizing: ConfidenceSizing,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: 0.0,
            max_daily_loss_currency: None,
            max_drawdown_percent: 10.0,
            max_positions_per_bot: 1,
            loss_limit_by_equity: true,
            strict_loss_cap_conversion: false,
            confidence_based_sizing: ConfidenceSizing::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceSizing {
    pub enabled: bool,
    pub min_confidence: f64,
    pub high_confidence_threshold: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub volume_step: f64,
    pub min_volume: f64,
}

impl Default for ConfidenceSizing {
    fn default() -> Self {
        Self {
            enabled: false,
            min_confidence: 0.6,
            high_confidence_threshold: 0.8,
            min_multiplier: 0.5,
            max_multiplier: 1.0,
            volume_step: 0.01,
            min_volume: 0.01,
        }
    }
}

// ─── Strategy ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Indicators,
    Structure,
    IndicatorsWithStructureGate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    EmaCross,
    TrendPosition,
    RsiExtreme,
    StrongTrend,
    StochCross,
    RsiMidline,
    BandReclaim,
    BandTouch,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub algorithm: Algorithm,
    pub rules: Vec<RuleKind>,
    pub min_conditions_required: usize,
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub ema_trend_period: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub adx_period: usize,
    pub adx_threshold: f64,
    pub stochastic_k: usize,
    pub stochastic_d: usize,
    pub stochastic_oversold: f64,
    pub stochastic_overbought: f64,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
    pub band_touch_lookback: usize,
    pub trend_filter: TrendFilterConfig,
    pub bias: BiasConfig,
    pub structure: StructureConfig,
    pub debug_signals: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Indicators,
            rules: vec![
                RuleKind::EmaCross,
                RuleKind::TrendPosition,
                RuleKind::RsiExtreme,
                RuleKind::StrongTrend,
                RuleKind::StochCross,
            ],
            min_conditions_required: 3,
            ema_fast_period: 21,
            ema_slow_period: 50,
            ema_trend_period: 200,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            adx_period: 14,
            adx_threshold: 25.0,
            stochastic_k: 14,
            stochastic_d: 3,
            stochastic_oversold: 20.0,
            stochastic_overbought: 80.0,
            bollinger_period: 20,
            bollinger_std: 2.0,
            band_touch_lookback: 3,
            trend_filter: TrendFilterConfig::default(),
            bias: BiasConfig::default(),
            structure: StructureConfig::default(),
            debug_signals: false,
        }
    }
}

impl StrategyConfig {
    pub fn longest_period(&self) -> usize {
        [
            self.ema_fast_period,
            self.ema_slow_period,
            self.ema_trend_period,
            self.rsi_period + 1,
            self.adx_period * 2,
            self.stochastic_k + self.stochastic_d,
            self.bollinger_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendScope {
    Always,
    Window,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendFilterConfig {
    pub enabled: bool,
    pub scope: TrendScope,
    pub window: TimeWindow,
    pub require_trend_flag: bool,
    pub extra_conditions: SideDelta,
}

impl Default for TrendFilterConfig {
    // Thursday Asia session: SELL needs one extra rule, both sides need a trend tag.
    fn default() -> Self {
        Self {
            enabled: true,
            scope: TrendScope::Window,
            window: TimeWindow { weekday: 3, start_hour: 0, end_hour: 8 },
            require_trend_flag: true,
            extra_conditions: SideDelta { buy: 0, sell: 1 },
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TimeWindow {
    pub weekday: u32, // 0 = Monday
    pub start_hour: u32,
    pub end_hour: u32, // exclusive; start > end wraps into the next day
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SideDelta {
    pub buy: usize,
    pub sell: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasConfig {
    pub enabled: bool,
    pub htf_factor: usize, // entry bars per higher-timeframe bar
    pub sma_period: usize,
    pub neutral_band_pct: f64,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self { enabled: false, htf_factor: 4, sma_period: 20, neutral_band_pct: 0.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    pub fractal_bars: usize,
    pub atr_period: usize,
    pub min_zone_atr: f64,
    pub max_zone_age_bars: u64,
    pub wick_body_ratio: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            fractal_bars: 2,
            atr_period: 14,
            min_zone_atr: 0.25,
            max_zone_age_bars: 30,
            wick_body_ratio: 0.5,
        }
    }
}

// ─── Volatility ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityConfig {
    pub enabled: bool,
    pub atr_period: usize,
    pub atr_scalp_threshold: f64,
    pub scalp_profit_target: f64, // account currency
    pub scalp_cooldown_seconds: u64,
    pub normal_cooldown_seconds: u64,
    pub skip_trading_when_atr_extreme: bool,
    pub atr_max_for_trading: Option<f64>,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            atr_period: 14,
            atr_scalp_threshold: 2.0,
            scalp_profit_target: 26.82,
            scalp_cooldown_seconds: 30,
            normal_cooldown_seconds: 60,
            skip_trading_when_atr_extreme: false,
            atr_max_for_trading: None,
        }
    }
}

// ─── News ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub enabled: bool,
    pub api_url: String,
    pub buffer_before_minutes: i64,
    pub buffer_after_minutes: i64,
    pub holiday_buffer_hours: i64,
    pub check_interval_seconds: i64,
    pub impact_levels: Vec<String>,
    pub monitored_currencies: Vec<String>,
    pub cache_directory: String,
    pub cache_max_age_minutes: i64,
    pub api_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub weekly_summary_enabled: bool,
    pub weekly_summary_day: u32, // 0 = Monday
    pub weekly_summary_hour_gmt: u32,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: DEFAULT_NEWS_URL.to_string(),
            buffer_before_minutes: 30,
            buffer_after_minutes: 30,
            holiday_buffer_hours: 12,
            check_interval_seconds: 300,
            impact_levels: vec!["High".to_string()],
            monitored_currencies: vec!["USD".to_string()],
            cache_directory: "cache".to_string(),
            cache_max_age_minutes: 10,
            api_timeout_seconds: 10,
            max_retries: 3,
            retry_delay_seconds: 2,
            weekly_summary_enabled: true,
            weekly_summary_day: 6,
            weekly_summary_hour_gmt: 22,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub request_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self { enabled: false, request_timeout_secs: 10 }
    }
}

// ─── System ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub main_loop_interval: u64,   // seconds, while trading
    pub paused_loop_interval: u64, // seconds, while paused for the day
    pub closed_loop_interval: u64, // seconds, outside trading hours
    pub status_file: String,
    pub stop_flag_file: String,
    pub stats_file: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            main_loop_interval: 10,
            paused_loop_interval: 30,
            closed_loop_interval: 60,
            status_file: "logs/bot_status.json".to_string(),
            stop_flag_file: "logs/manual_stop.flag".to_string(),
            stats_file: "logs/trade_stats.json".to_string(),
        }
    }
}

// ─── Loading & validation ─────────────────────────────────────────────────────

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fails fast on missing required fields and contradictory settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.broker;
        if b.symbol.trim().is_empty() {
            return Err(ConfigError::Missing("broker.symbol"));
        }
        if b.magic_number == 0 {
            return Err(ConfigError::Missing("broker.magic_number"));
        }
        if b.broker_timezone_offset.abs() > 14 {
            return Err(ConfigError::invalid("broker.broker_timezone_offset", "must be within ±14 hours"));
        }

        let t = &self.trading;
        if t.timeframe.trim().is_empty() {
            return Err(ConfigError::Missing("trading.timeframe"));
        }
        if t.timeframe_secs().is_none() {
            return Err(ConfigError::invalid("trading.timeframe", format!("unknown timeframe {}", t.timeframe)));
        }
        if t.lot_size <= 0.0 {
            return Err(ConfigError::Missing("trading.lot_size"));
        }
        if !t.use_atr_based_stops {
            return Err(ConfigError::invalid(
                "trading.use_atr_based_stops",
                "fixed pip stops are not supported; enable ATR-based stops",
            ));
        }
        positive("trading.stop_loss_atr_multiple", t.stop_loss_atr_multiple)?;
        positive("trading.take_profit_atr_multiple", t.take_profit_atr_multiple)?;
        if t.atr_period == 0 {
            return Err(ConfigError::invalid("trading.atr_period", "must be > 0"));
        }
        if t.max_positions == 0 {
            return Err(ConfigError::invalid("trading.max_positions", "must be > 0"));
        }
        if t.use_smart_breakeven {
            positive("trading.breakeven_profit_multiple", t.breakeven_profit_multiple)?;
            if t.breakeven_lock_profit_multiple < 0.0
                || t.breakeven_lock_profit_multiple >= t.breakeven_profit_multiple
            {
                return Err(ConfigError::invalid(
                    "trading.breakeven_lock_profit_multiple",
                    "must be >= 0 and below breakeven_profit_multiple",
                ));
            }
        }
        if t.use_trailing_stop {
            positive("trading.trailing_stop_atr_multiple", t.trailing_stop_atr_multiple)?;
            positive("trading.min_profit_for_trail_activation", t.min_profit_for_trail_activation)?;
        }
        let h = &t.trading_hours;
        for (field, hour) in [
            ("trading.trading_hours.monday_open_hour", h.monday_open_hour),
            ("trading.trading_hours.sunday_open_hour", h.sunday_open_hour),
            ("trading.trading_hours.friday_close_hour", h.friday_close_hour),
        ] {
            if hour > 23 {
                return Err(ConfigError::invalid(field, "hour must be 0-23"));
            }
        }
        self.swap_windows()?;

        let r = &self.risk;
        if r.max_daily_loss < 0.0 {
            return Err(ConfigError::invalid("risk.max_daily_loss", "must be >= 0"));
        }
        positive("risk.max_drawdown_percent", r.max_drawdown_percent)?;
        if r.max_positions_per_bot == 0 {
            return Err(ConfigError::invalid("risk.max_positions_per_bot", "must be > 0"));
        }
        let cs = &r.confidence_based_sizing;
        if cs.enabled {
            if cs.min_multiplier <= 0.0 || cs.max_multiplier < cs.min_multiplier {
                return Err(ConfigError::invalid(
                    "risk.confidence_based_sizing",
                    "multipliers must satisfy 0 < min_multiplier <= max_multiplier",
                ));
            }
            if cs.high_confidence_threshold < cs.min_confidence {
                return Err(ConfigError::invalid(
                    "risk.confidence_based_sizing",
                    "high_confidence_threshold below min_confidence",
                ));
            }
            positive("risk.confidence_based_sizing.volume_step", cs.volume_step)?;
        }

        let s = &self.strategy;
        if s.algorithm != Algorithm::Structure {
            if s.rules.is_empty() {
                return Err(ConfigError::invalid("strategy.rules", "at least one rule must be enabled"));
            }
            if s.min_conditions_required == 0 || s.min_conditions_required > s.rules.len() {
                return Err(ConfigError::invalid(
                    "strategy.min_conditions_required",
                    format!("must be between 1 and {} enabled rules", s.rules.len()),
                ));
            }
        }
        for (field, period) in [
            ("strategy.ema_fast_period", s.ema_fast_period),
            ("strategy.ema_slow_period", s.ema_slow_period),
            ("strategy.ema_trend_period", s.ema_trend_period),
            ("strategy.rsi_period", s.rsi_period),
            ("strategy.adx_period", s.adx_period),
            ("strategy.stochastic_k", s.stochastic_k),
            ("strategy.stochastic_d", s.stochastic_d),
            ("strategy.bollinger_period", s.bollinger_period),
        ] {
            if period == 0 {
                return Err(ConfigError::invalid(field, "period must be > 0"));
            }
        }
        if s.ema_fast_period >= s.ema_slow_period {
            return Err(ConfigError::invalid("strategy.ema_fast_period", "must be shorter than ema_slow_period"));
        }
        let w = &s.trend_filter.window;
        if w.weekday > 6 || w.start_hour > 23 || w.end_hour > 24 || w.start_hour == w.end_hour {
            return Err(ConfigError::invalid("strategy.trend_filter.window", "weekday 0-6, distinct hours 0-24"));
        }
        if s.bias.enabled && (s.bias.htf_factor == 0 || s.bias.sma_period == 0) {
            return Err(ConfigError::invalid("strategy.bias", "htf_factor and sma_period must be > 0"));
        }
        if s.structure.fractal_bars == 0 || s.structure.atr_period == 0 {
            return Err(ConfigError::invalid("strategy.structure", "fractal_bars and atr_period must be > 0"));
        }

        let v = &self.volatility;
        if v.enabled && v.atr_period == 0 {
            return Err(ConfigError::invalid("volatility.atr_period", "must be > 0"));
        }
        if v.skip_trading_when_atr_extreme && v.atr_max_for_trading.is_none() {
            return Err(ConfigError::invalid(
                "volatility.atr_max_for_trading",
                "required when skip_trading_when_atr_extreme is set",
            ));
        }

        let n = &self.news;
        if n.enabled && n.weekly_summary_enabled && (n.weekly_summary_day > 6 || n.weekly_summary_hour_gmt > 23) {
            return Err(ConfigError::invalid("news.weekly_summary_day", "day 0-6, hour 0-23"));
        }

        let sys = &self.system;
        if sys.main_loop_interval == 0 || sys.paused_loop_interval == 0 || sys.closed_loop_interval == 0 {
            return Err(ConfigError::invalid("system", "loop intervals must be > 0"));
        }
        if self.telegram.enabled && self.telegram.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("telegram.request_timeout_secs", "must be > 0"));
        }
        Ok(())
    }

    pub fn swap_windows(&self) -> Result<Vec<SwapWindow>, ConfigError> {
        self.trading
            .swap_avoidance
            .server_time_windows
            .iter()
            .map(|w| {
                SwapWindow::parse(&w.start, &w.end).ok_or_else(|| {
                    ConfigError::invalid(
                        "trading.swap_avoidance.server_time_windows",
                        format!("malformed window {}-{}", w.start, w.end),
                    )
                })
            })
            .collect()
    }

    /// Logs every effective option once at startup.
    pub fn log_summary(&self) {
        let b = &self.broker;
        let t = &self.trading;
        let r = &self.risk;
        let s = &self.strategy;
        let v = &self.volatility;
        log::info!("============================================================");
        log::info!("Sniper engine v{}", env!("CARGO_PKG_VERSION"));
        log::info!("Symbol: {} | Magic: {} | Timeframe: {}", b.symbol, b.magic_number, t.timeframe);
        log::info!("Broker offset: GMT{:+} | Bridge: {}", b.broker_timezone_offset, b.bridge_url);
        log::info!("============================================================");
        log::info!("Lot size: {} | Max concurrent positions: {}", t.lot_size, t.max_positions);
        log::info!(
            "Stops: ATR({}) SL {}x / TP {}x",
            t.atr_period, t.stop_loss_atr_multiple, t.take_profit_atr_multiple
        );
        if t.use_smart_breakeven {
            log::info!(
                "Break-even: trigger {}x ATR, lock {}x ATR",
                t.breakeven_profit_multiple, t.breakeven_lock_profit_multiple
            );
        } else {
            log::info!("Break-even: disabled");
        }
        if t.use_trailing_stop {
            log::info!(
                "Trailing: {:?} {}x ATR, activation {}x ATR",
                t.trailing_stop_type, t.trailing_stop_atr_multiple, t.min_profit_for_trail_activation
            );
        } else {
            log::info!("Trailing: disabled");
        }
        if t.daily_profit_target > 0.0 {
            log::info!("Daily profit target: {:.2} (pause mode)", t.daily_profit_target);
        }
        if r.max_daily_loss > 0.0 {
            log::info!(
                "Daily loss cap: {:.2} {} (equity check: {}, strict conversion: {})",
                r.max_daily_loss,
                r.max_daily_loss_currency.as_deref().unwrap_or("account ccy"),
                r.loss_limit_by_equity,
                r.strict_loss_cap_conversion
            );
        }
        log::info!("Max drawdown: {}% | Positions per bot: {}", r.max_drawdown_percent, r.max_positions_per_bot);
        if r.confidence_based_sizing.enabled {
            let cs = &r.confidence_based_sizing;
            log::info!(
                "Confidence sizing: {}-{}x from confidence {} to {}",
                cs.min_multiplier, cs.max_multiplier, cs.min_confidence, cs.high_confidence_threshold
            );
        }
        log::info!(
            "Strategy: {:?} | rules {:?} | min {} conditions",
            s.algorithm, s.rules, s.min_conditions_required
        );
        log::info!(
            "EMA {}/{}/{} RSI {} ({}/{}) ADX {} (>{}) Stoch {}/{} ({}/{}) BB {}x{}",
            s.ema_fast_period, s.ema_slow_period, s.ema_trend_period,
            s.rsi_period, s.rsi_oversold, s.rsi_overbought,
            s.adx_period, s.adx_threshold,
            s.stochastic_k, s.stochastic_d, s.stochastic_oversold, s.stochastic_overbought,
            s.bollinger_period, s.bollinger_std
        );
        if s.trend_filter.enabled {
            let tf = &s.trend_filter;
            log::info!(
                "Trend filter: {:?} weekday {} {:02}-{:02}h, +{} BUY / +{} SELL, trend flag {}",
                tf.scope, tf.window.weekday, tf.window.start_hour, tf.window.end_hour,
                tf.extra_conditions.buy, tf.extra_conditions.sell, tf.require_trend_flag
            );
        }
        if s.bias.enabled {
            log::info!("Bias gate: SMA({}) on {}x resampled bars", s.bias.sma_period, s.bias.htf_factor);
        }
        if v.enabled {
            log::info!(
                "Auto-volatility: scalp above ATR {} | scalp target {:.2} | cooldown {}s/{}s",
                v.atr_scalp_threshold, v.scalp_profit_target, v.scalp_cooldown_seconds, v.normal_cooldown_seconds
            );
        }
        if let Some(max) = v.atr_max_for_trading.filter(|_| v.skip_trading_when_atr_extreme) {
            log::info!("Extreme ATR ceiling: {}", max);
        }
        if t.swap_avoidance.enabled {
            for w in &t.swap_avoidance.server_time_windows {
                log::info!("Swap avoidance window: {}-{} (server time)", w.start, w.end);
            }
        }
        log::info!(
            "News filter: {} | impacts {:?} | currencies {:?} | buffer -{}m/+{}m",
            if self.news.enabled { "enabled" } else { "disabled" },
            self.news.impact_levels,
            self.news.monitored_currencies,
            self.news.buffer_before_minutes,
            self.news.buffer_after_minutes
        );
        log::info!(
            "Loop: {}s trading / {}s paused / {}s closed",
            self.system.main_loop_interval, self.system.paused_loop_interval, self.system.closed_loop_interval
        );
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be > 0 (got {value})")))
    }
}
