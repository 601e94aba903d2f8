use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::StatsError;
use crate::gateway::StatsSink;
use crate::lifecycle::ClosureEvent;
use crate::types::{OrderReceipt, OrderRequest, Side, Ticket, TradingMode};

const MAX_HISTORY: usize = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub ticket: Ticket,
    pub side: Side,
    pub entry_price: f64,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub mode: TradingMode,
    pub entry_time: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ticket: Ticket,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub volume: f64,
    pub profit: Option<f64>,
    pub pips: Option<f64>,
    pub reason: String,
    pub mode: Option<TradingMode>,
    pub entry_time: Option<i64>,
    pub exit_time: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsData {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_profit: f64,
    pub total_loss: f64,
    pub total_pips: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub exit_reasons: BTreeMap<String, u32>,
    pub open_trades: Vec<OpenTrade>,
    pub trade_history: Vec<TradeRecord>,
}

impl StatsData {
    pub fn net_profit(&self) -> f64 {
        self.total_profit - self.total_loss
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64 * 100.0
    }

    pub fn profit_factor(&self) -> f64 {
        if self.total_loss > 0.0 {
            self.total_profit / self.total_loss
        } else {
            0.0
        }
    }
}

/// JSON trade journal persisted at `system.stats_file`.
pub struct TradeStatistics {
    path: PathBuf,
    data: StatsData,
    dirty: bool,
}

impl TradeStatistics {
    /// Loads an existing journal. A corrupt file is replaced on the next flush.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StatsError> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("[stats] {} unreadable ({}), starting fresh", path.display(), e);
                StatsData::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatsData::default(),
            Err(e) => return Err(e.into()),
        };
        log::info!("[stats] {} trades on record ({})", data.total_trades, path.display());
        Ok(TradeStatistics { path, data, dirty: false })
    }

    pub fn data(&self) -> &StatsData {
        &self.data
    }

    pub fn summary(&self) -> String {
        let d = &self.data;
        format!(
            "trades {} | W {} L {} | win rate {:.1}% | net {:+.2} | pips {:+.1} | PF {:.2}",
            d.total_trades,
            d.winning_trades,
            d.losing_trades,
            d.win_rate(),
            d.net_profit(),
            d.total_pips,
            d.profit_factor()
        )
    }
}

impl StatsSink for TradeStatistics {
    fn record_trade_opened(&mut self, receipt: &OrderReceipt, order: &OrderRequest, mode: TradingMode, time: i64) {
        self.data.open_trades.retain(|t| t.ticket != receipt.ticket);
        self.data.open_trades.push(OpenTrade {
            ticket: receipt.ticket,
            side: order.side,
            entry_price: receipt.price,
            volume: order.volume,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            mode,
            entry_time: time,
        });
        self.dirty = true;
        log::debug!("[stats] tracking #{}", receipt.ticket);
    }

    fn record_trade_closed(&mut self, c: &ClosureEvent) {
        let opened = self
            .data
            .open_trades
            .iter()
            .position(|t| t.ticket == c.ticket)
            .map(|i| self.data.open_trades.remove(i));

        let d = &mut self.data;
        d.total_trades += 1;
        if let Some(p) = c.profit {
            if p > 0.0 {
                d.winning_trades += 1;
                d.total_profit += p;
            } else if p < 0.0 {
                d.losing_trades += 1;
                d.total_loss += -p;
            }
            if d.total_trades == 1 || p > d.best_trade {
                d.best_trade = p;
            }
            if d.total_trades == 1 || p < d.worst_trade {
                d.worst_trade = p;
            }
        }
        d.total_pips += c.pips.unwrap_or(0.0);
        *d.exit_reasons.entry(c.reason.label().to_string()).or_insert(0) += 1;

        d.trade_history.push(TradeRecord {
            ticket: c.ticket,
            side: c.side,
            entry_price: c.entry_price,
            exit_price: c.exit_price,
            volume: c.volume,
            profit: c.profit,
            pips: c.pips,
            reason: c.reason.label().to_string(),
            mode: opened.as_ref().map(|t| t.mode),
            entry_time: opened.as_ref().map(|t| t.entry_time),
            exit_time: c.close_time,
        });
        if d.trade_history.len() > MAX_HISTORY {
            let excess = d.trade_history.len() - MAX_HISTORY;
            d.trade_history.drain(..excess);
        }
        self.dirty = true;

        let when = c
            .close_time
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        log::info!("[stats] closed #{} {} {} | {}", c.ticket, c.reason.label(), when, self.summary());
    }

    fn flush(&mut self) -> Result<(), StatsError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.data)?)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CloseReason;

    fn closure(ticket: Ticket, profit: Option<f64>, reason: CloseReason) -> ClosureEvent {
        ClosureEvent {
            ticket,
            side: Side::Buy,
            volume: 0.1,
            entry_price: 2000.0,
            exit_price: profit.map(|p| 2000.0 + p / 10.0),
            profit,
            pips: profit.map(|p| p / 10.0),
            reason,
            close_time: Some(1_704_070_000),
            last_stop: 1995.0,
            last_target: 2010.0,
        }
    }

    fn open(stats: &mut TradeStatistics, ticket: Ticket) {
        let order = OrderRequest {
            side: Side::Buy,
            volume: 0.1,
            stop_loss: 1995.0,
            take_profit: 2010.0,
            comment: "test".into(),
        };
        let receipt = OrderReceipt { ticket, price: 2000.0, status: "done".into() };
        stats.record_trade_opened(&receipt, &order, TradingMode::Scalp, 1_704_067_200);
    }

    #[test]
    fn totals_and_history_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("trade_stats.json");

        let mut stats = TradeStatistics::load(&path).unwrap();
        open(&mut stats, 1);
        stats.record_trade_closed(&closure(1, Some(100.0), CloseReason::TakeProfitHit));
        open(&mut stats, 2);
        stats.record_trade_closed(&closure(2, Some(-50.0), CloseReason::StopLossHit));
        stats.record_trade_closed(&closure(3, None, CloseReason::ManualClose));
        stats.flush().unwrap();

        let reloaded = TradeStatistics::load(&path).unwrap();
        let d = reloaded.data();
        assert_eq!(d.total_trades, 3);
        assert_eq!((d.winning_trades, d.losing_trades), (1, 1));
        assert!((d.net_profit() - 50.0).abs() < 1e-9);
        assert!((d.profit_factor() - 2.0).abs() < 1e-9);
        assert_eq!(d.best_trade, 100.0);
        assert_eq!(d.worst_trade, -50.0);
        assert_eq!(d.exit_reasons.get("Stop Loss hit"), Some(&1));
        assert!(d.open_trades.is_empty());
        assert_eq!(d.trade_history[0].mode, Some(TradingMode::Scalp));
        assert_eq!(d.trade_history[2].mode, None);
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_stats.json");
        std::fs::write(&path, "{not json").unwrap();
        let stats = TradeStatistics::load(&path).unwrap();
        assert_eq!(stats.data().total_trades, 0);
    }

    #[test]
    fn history_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = TradeStatistics::load(dir.path().join("s.json")).unwrap();
        for t in 0..(MAX_HISTORY as u64 + 5) {
            stats.record_trade_closed(&closure(t, Some(1.0), CloseReason::TakeProfitHit));
        }
        assert_eq!(stats.data().trade_history.len(), MAX_HISTORY);
        assert_eq!(stats.data().trade_history[0].ticket, 5);
    }
}
