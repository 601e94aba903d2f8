use async_trait::async_trait;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{ConfigError, NotifyError};
use crate::gateway::{Event, Notifier, NullNotifier};
use crate::types::{NewsEvent, Side};

const BASE_URL: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    url: String,
    chat_id: String,
    symbol: String,
}

impl TelegramNotifier {
    /// Token and chat id come from TELEGRAM_TOKEN / TELEGRAM_CHAT_ID.
    pub fn from_env(symbol: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let token = std::env::var("TELEGRAM_TOKEN").map_err(|_| ConfigError::Env("TELEGRAM_TOKEN"))?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").map_err(|_| ConfigError::Env("TELEGRAM_CHAT_ID"))?;
        Self::new(BASE_URL, &token, chat_id, symbol, timeout)
    }

    /// Every send is bounded by `timeout`; a stalled endpoint fails the send.
    pub fn new(base_url: &str, token: &str, chat_id: String, symbol: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| ConfigError::invalid("telegram.request_timeout_secs", e.to_string()))?;
        Ok(TelegramNotifier {
            client,
            url: format!("{}/bot{}/sendMessage", base_url.trim_end_matches('/'), token),
            chat_id,
            symbol: symbol.to_string(),
        })
    }

    pub async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML"
        });

        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        let preview: String = text.chars().take(80).collect();
        log::info!("[telegram] sent: {}", preview.replace('\n', " "));
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        self.send(&render(&self.symbol, event)).await
    }
}

/// Telegram when enabled, otherwise a no-op sink.
pub fn notifier_from_config(cfg: &EngineConfig) -> Result<Box<dyn Notifier>, ConfigError> {
    if !cfg.telegram.enabled {
        log::info!("[telegram] disabled");
        return Ok(Box::new(NullNotifier));
    }
    let timeout = Duration::from_secs(cfg.telegram.request_timeout_secs);
    Ok(Box::new(TelegramNotifier::from_env(&cfg.broker.symbol, timeout)?))
}

fn side_emoji(side: Side) -> &'static str {
    match side {
        Side::Buy => "🟢",
        Side::Sell => "🔴",
    }
}

fn news_line(e: &NewsEvent) -> String {
    format!("• <code>{}</code> {} {} ({})", e.time.format("%a %d %b %H:%M"), e.currency, escape(&e.title), e.impact)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// HTML body for one event.
pub fn render(symbol: &str, event: &Event) -> String {
    match event {
        Event::Started { symbol, timeframe, mode } => format!(
            "🤖 <b>Engine started</b>\nSymbol: <code>{symbol}</code> | TF: <code>{timeframe}</code> | Mode: <code>{}</code>",
            mode.as_str().to_uppercase()
        ),
        Event::TradeOpened { ticket, side, volume, price, stop_loss, take_profit, confidence, conditions, mode } => {
            format!(
                "{} <b>Trade Opened - {side} {symbol}</b>\n\
                 Ticket: <code>#{ticket}</code>\n\
                 Volume: <code>{volume:.2}</code>\n\
                 Entry:  <code>{price:.2}</code>\n\
                 SL:     <code>{stop_loss:.2}</code>\n\
                 TP:     <code>{take_profit:.2}</code>\n\
                 Confidence: <code>{:.0}%</code> | Mode: <code>{}</code>\n\
                 Conditions: {}",
                side_emoji(*side),
                confidence * 100.0,
                mode.as_str().to_uppercase(),
                conditions.join(", ")
            )
        }
        Event::TradeClosed(c) => {
            let pnl = c.profit.unwrap_or(0.0);
            let emoji = if pnl >= 0.0 { "✅" } else { "❌" };
            let exit = c.exit_price.map_or_else(|| "n/a".to_string(), |p| format!("{p:.2}"));
            let pips = c.pips.map_or_else(|| "n/a".to_string(), |p| format!("{p:+.1}"));
            format!(
                "{emoji} <b>Trade Closed - {} {symbol}</b>\n\
                 Ticket: <code>#{}</code>\n\
                 Entry: <code>{:.2}</code>  Exit: <code>{exit}</code>\n\
                 PnL:   <code>{pnl:+.2}</code> | Pips: <code>{pips}</code>\n\
                 Reason: {}",
                c.side,
                c.ticket,
                c.entry_price,
                c.reason.label()
            )
        }
        Event::BreakEven { ticket, new_stop } => {
            format!("🛡 <b>Break-even</b> #{ticket}\nSL moved to <code>{new_stop:.2}</code>")
        }
        Event::TrailingStop { ticket, new_stop, price } => format!(
            "📈 <b>Trailing stop</b> #{ticket}\nSL <code>{new_stop:.2}</code> | Price <code>{price:.2}</code>"
        ),
        Event::ScalpExit { ticket, profit } => {
            format!("⚡ <b>Scalp exit</b> #{ticket}\nProfit <code>{profit:+.2}</code>")
        }
        Event::DailyTarget { net, target } => format!(
            "🎯 <b>Daily target reached</b>\nNet: <code>{net:+.2}</code> / target <code>{target:.2}</code>\nTrading paused until tomorrow"
        ),
        Event::DailyLoss { net, cap, currency } => format!(
            "⚠️ <b>Daily loss limit</b>\nNet: <code>{net:+.2}</code> / cap <code>{cap:.2} {currency}</code>\nTrading paused until tomorrow"
        ),
        Event::NewsAvoidance(e) => format!(
            "📰 <b>News avoidance</b>\n{}\nNo new entries during the buffer",
            news_line(e)
        ),
        Event::WeeklyNews(events) => {
            if events.is_empty() {
                "📅 <b>Week ahead</b>\nNo high-impact events".to_string()
            } else {
                let lines: Vec<String> = events.iter().map(news_line).collect();
                format!("📅 <b>Week ahead</b> ({} events)\n{}", events.len(), lines.join("\n"))
            }
        }
        Event::ModeSwitch { from, to, atr } => format!(
            "🔄 <b>Mode switch</b> {} → {}\nATR <code>{atr:.5}</code>",
            from.as_str().to_uppercase(),
            to.as_str().to_uppercase()
        ),
        Event::Shutdown { reason } => format!("🛑 <b>Engine stopped</b>\n{}", escape(reason)),
        Event::Error(msg) => format!("❗ <b>Error</b>\n<code>{}</code>", escape(msg)),
    }
}
