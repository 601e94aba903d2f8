use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Opaque position handle issued by the gateway.
pub type Ticket = u64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64, // Unix seconds, bar open time
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn datetime(&self) -> Option<NaiveDateTime> {
        chrono::DateTime::from_timestamp(self.timestamp, 0).map(|dt| dt.naive_utc())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for Buy, -1 for Sell. Multiplies a distance into a price offset.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Neutral,
    Bull,
    Bear,
}

/// Satisfied rules for one side of the book on one bar.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionSet {
    pub side: Side,
    pub met: usize,
    pub details: Vec<&'static str>,
}

impl ConditionSet {
    pub fn new(side: Side) -> Self {
        ConditionSet { side, met: 0, details: Vec::new() }
    }

    pub fn push(&mut self, tag: &'static str) {
        self.met += 1;
        self.details.push(tag);
    }

    pub fn clear(&mut self) {
        self.met = 0;
        self.details.clear();
    }

    pub fn confidence(&self, total_rules: usize) -> f64 {
        if total_rules == 0 {
            return 0.0;
        }
        (self.met as f64 / total_rules as f64).min(1.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub side: Side,
    pub confidence: f64,
    pub conditions_met: usize,
    pub conditions_detail: Vec<String>,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StopsPlan {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Open position as reported by the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub ticket: Ticket,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,   // 0 = none
    pub take_profit: f64, // 0 = none
    pub current_price: f64,
    pub profit: f64,
    pub open_time: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PositionRecord {
    pub ticket: Ticket,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub side: Side,
    pub volume: f64,
    pub open_time: i64,
    pub entry_atr: f64,
    pub breakeven_applied: bool,
    pub forced_exit: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealEntry {
    In,
    Out,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DealInfo {
    pub ticket: Ticket,
    pub position_ticket: Ticket,
    pub entry: DealEntry,
    pub price: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub swap: f64,
    #[serde(default)]
    pub comment: String,
    pub time: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConstraints {
    pub min_stop_distance: f64,
    pub pip_size: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub ticket: Ticket,
    pub price: f64,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Normal,
    Scalp,
}

impl TradingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TradingMode::Normal => "normal",
            TradingMode::Scalp => "scalp",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLossHit,
    TakeProfitHit,
    TrailingStop,
    ScalpExit,
    ManualClose,
}

impl CloseReason {
    pub fn label(self) -> &'static str {
        match self {
            CloseReason::StopLossHit => "Stop Loss hit",
            CloseReason::TakeProfitHit => "Take Profit hit",
            CloseReason::TrailingStop => "Trailing Stop",
            CloseReason::ScalpExit => "Quick scalp profit",
            CloseReason::ManualClose => "Manual close",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FvgZone {
    pub direction: Side,
    pub low: f64,
    pub high: f64,
    pub created_time: i64,
    pub created_index: u64,
    pub used: bool,
}

impl FvgZone {
    pub fn size(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewsEvent {
    pub title: String,
    pub currency: String,
    pub time: NaiveDateTime, // local wall time
    pub impact: String,
    #[serde(default)]
    pub url: String,
}

impl NewsEvent {
    /// Identity used to alert once per event.
    pub fn key(&self) -> String {
        format!("{}|{}", self.title, self.time)
    }
}
