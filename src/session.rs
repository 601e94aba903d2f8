use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};

use crate::config::TradingHoursConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct MarketStatus {
    pub open: bool,
    pub message: String,
}

/// Weekly schedule on local wall time: weekend closure, Sunday open and
/// Friday close.
pub fn market_status(now: NaiveDateTime, h: &TradingHoursConfig) -> MarketStatus {
    let day = weekday_name(now.weekday());
    let hour = now.hour();

    let closed = |open_day: &str, open_hour: u32, days_ahead: i64, prefix: String| {
        let opens_at = now.date().and_hms_opt(open_hour, 0, 0).unwrap_or(now) + Duration::days(days_ahead);
        let hours = (opens_at - now).num_seconds() as f64 / 3600.0;
        MarketStatus {
            open: false,
            message: format!("Market CLOSED - {prefix} | Opens {open_day} {open_hour:02}:00 (in {hours:.1} hours)"),
        }
    };

    match now.weekday() {
        Weekday::Sat if h.saturday_closed => {
            if h.sunday_closed {
                return closed("Monday", h.monday_open_hour, 2, day.to_string());
            }
            return closed("Sunday", h.sunday_open_hour, 1, day.to_string());
        }
        Weekday::Sun => {
            let prefix = format!("{} {}", day, now.format("%H:%M"));
            if h.sunday_closed {
                return closed("Monday", h.monday_open_hour, 1, prefix);
            }
            if hour < h.sunday_open_hour {
                return closed("today at", h.sunday_open_hour, 0, prefix);
            }
        }
        Weekday::Mon if h.sunday_closed && hour < h.monday_open_hour => {
            let prefix = format!("{} {}", day, now.format("%H:%M"));
            return closed("today at", h.monday_open_hour, 0, prefix);
        }
        Weekday::Fri if hour >= h.friday_close_hour => {
            let prefix = format!("{} after {:02}:00", day, h.friday_close_hour);
            if h.sunday_closed {
                return closed("Monday", h.monday_open_hour, 3, prefix);
            }
            return closed("Sunday", h.sunday_open_hour, 2, prefix);
        }
        _ => {}
    }

    MarketStatus { open: true, message: format!("Market OPEN - {} {}", day, now.format("%H:%M")) }
}

fn weekday_name(w: Weekday) -> &'static str {
    match w {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Server-time `HH:MM-HH:MM` window, both ends inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SwapWindow {
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self { start: parse_hhmm(start)?, end: parse_hhmm(end)? })
    }

    /// A start after the end wraps past midnight, e.g. 23:30 → 00:20.
    pub fn contains(&self, t: NaiveTime) -> bool {
        let t = NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t);
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.trim().split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

/// Local wall time shifted into broker server time.
pub fn server_time(local: NaiveDateTime, broker_offset_hours: i64) -> NaiveDateTime {
    local + Duration::hours(broker_offset_hours)
}

/// First window containing the server time, with a status message.
pub fn active_swap_window(windows: &[SwapWindow], server_now: NaiveDateTime) -> Option<(SwapWindow, String)> {
    windows.iter().find(|w| w.contains(server_now.time())).map(|w| {
        let msg = format!(
            "Swap avoidance window {} (server time). Server now {}",
            w.label(),
            server_now.format("%Y-%m-%d %H:%M")
        );
        (*w, msg)
    })
}
