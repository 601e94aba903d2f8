use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use sha2::Sha256;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::BrokerConfig;
use crate::error::{ConfigError, GatewayError};
use crate::gateway::Gateway;
use crate::types::{
    AccountState, Candle, DealEntry, DealInfo, InstrumentConstraints, OrderReceipt, OrderRequest, PositionSnapshot,
    Quote, Side, Ticket,
};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: &str = "5000";
const DEVIATION_POINTS: u32 = 20;

// ── Error classification ──────────────────────────────────────────────────────

/// Map a bridge retCode + HTTP status onto a GatewayError.
fn classify_error(ret_code: i64, http_status: u16, msg: &str) -> GatewayError {
    match (ret_code, http_status) {
        (10006, _) | (_, 429) => GatewayError::RateLimit { retry_after: 10 },
        (10016, _) | (_, 500..=599) => GatewayError::Transient(msg.to_string()),
        (10404, _) | (_, 404) => GatewayError::Unavailable(msg.to_string()),
        _ => GatewayError::Permanent(format!("retCode={} msg={}", ret_code, msg)),
    }
}

/// Which failures a request may be sent again after.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resend {
    /// Reads and absolute modifications: any transient failure.
    Transient,
    /// Orders and closes: only an explicit rate-limit rejection. A timeout or
    /// an unreadable reply says nothing about whether the terminal executed it.
    RejectedOnly,
}

/// Retry transient failures with exponential backoff capped at 60s.
async fn with_retry<F, Fut, T>(operation: F, max_retries: u32) -> Result<T, GatewayError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    with_retry_policy(operation, max_retries, Resend::Transient).await
}

async fn with_retry_policy<F, Fut, T>(operation: F, max_retries: u32, policy: Resend) -> Result<T, GatewayError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut retries = 0;
    let mut delay: u64 = 1;
    loop {
        match operation().await {
            Ok(r) => return Ok(r),
            Err(GatewayError::RateLimit { retry_after }) => {
                if retries >= max_retries {
                    return Err(GatewayError::RateLimit { retry_after });
                }
                log::warn!("[bridge] rate limited, sleeping {}s (attempt {}/{})", retry_after, retries + 1, max_retries);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                retries += 1;
            }
            Err(GatewayError::Transient(msg)) => {
                if policy == Resend::RejectedOnly || retries >= max_retries {
                    return Err(GatewayError::Transient(msg));
                }
                log::warn!("[bridge] transient error: {} - retry in {}s ({}/{})", msg, delay, retries + 1, max_retries);
                tokio::time::sleep(Duration::from_secs(delay)).await;
                delay = (delay * 2).min(60);
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Pip used for statistics and close classification.
pub fn pip_size_for(symbol: &str, point: f64) -> f64 {
    if symbol.starts_with("XAU") {
        0.1
    } else if symbol.contains("BTC") {
        1.0
    } else if point > 0.0 {
        point * 10.0
    } else {
        0.0001
    }
}

// ── Wire parsing ──────────────────────────────────────────────────────────────

fn num(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str()?.parse().ok())
}

fn int(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str()?.parse().ok())
}

fn side_of(v: &Value) -> Option<Side> {
    match v {
        Value::Number(n) => match n.as_i64()? {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        },
        _ => None,
    }
}

fn parse_candle(row: &Value) -> Option<Candle> {
    Some(Candle {
        timestamp: int(&row["time"])?,
        open: num(&row["open"])?,
        high: num(&row["high"])?,
        low: num(&row["low"])?,
        close: num(&row["close"])?,
        volume: num(&row["tick_volume"]).unwrap_or(0.0),
    })
}

fn parse_position(row: &Value) -> Option<PositionSnapshot> {
    Some(PositionSnapshot {
        ticket: int(&row["ticket"])? as Ticket,
        side: side_of(&row["type"])?,
        volume: num(&row["volume"])?,
        entry_price: num(&row["price_open"])?,
        stop_loss: num(&row["sl"]).unwrap_or(0.0),
        take_profit: num(&row["tp"]).unwrap_or(0.0),
        current_price: num(&row["price_current"]).unwrap_or(0.0),
        profit: num(&row["profit"]).unwrap_or(0.0),
        open_time: int(&row["time"]).unwrap_or(0),
    })
}

fn parse_deal(row: &Value) -> Option<DealInfo> {
    let entry = match int(&row["entry"])? {
        0 => DealEntry::In,
        1 | 2 | 3 => DealEntry::Out, // out, in/out (reversal), out by opposite
        _ => return None,
    };
    Some(DealInfo {
        ticket: int(&row["ticket"])? as Ticket,
        position_ticket: int(&row["position_id"])? as Ticket,
        entry,
        price: num(&row["price"])?,
        volume: num(&row["volume"]).unwrap_or(0.0),
        profit: num(&row["profit"]).unwrap_or(0.0),
        commission: num(&row["commission"]).unwrap_or(0.0),
        swap: num(&row["swap"]).unwrap_or(0.0),
        comment: row["comment"].as_str().unwrap_or_default().to_string(),
        time: int(&row["time"]).unwrap_or(0),
    })
}

fn rows(result: &Value) -> &[Value] {
    result["list"].as_array().map(Vec::as_slice).unwrap_or(&[])
}

// ── Client ────────────────────────────────────────────────────────────────────

/// REST client for the terminal bridge. Requests are HMAC-SHA256 signed.
#[derive(Clone)]
pub struct BridgeGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    symbol: String,
    magic: u64,
    timeframe: String,
}

impl BridgeGateway {
    /// Credentials come from BRIDGE_API_KEY / BRIDGE_API_SECRET.
    pub fn from_env(broker: &BrokerConfig, timeframe: &str) -> Result<Self, ConfigError> {
        let api_key = std::env::var("BRIDGE_API_KEY").map_err(|_| ConfigError::Env("BRIDGE_API_KEY"))?;
        let api_secret = std::env::var("BRIDGE_API_SECRET").map_err(|_| ConfigError::Env("BRIDGE_API_SECRET"))?;
        Self::new(broker, timeframe, api_key, api_secret)
    }

    pub fn new(broker: &BrokerConfig, timeframe: &str, api_key: String, api_secret: String) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(broker.request_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ConfigError::invalid("broker.bridge_url", e.to_string()))?;

        Ok(BridgeGateway {
            client,
            base_url: broker.bridge_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            symbol: broker.symbol.clone(),
            magic: broker.magic_number,
            timeframe: timeframe.to_string(),
        })
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }

    fn sign(&self, payload: &str) -> Result<String, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| GatewayError::Permanent(format!("HMAC init failed: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signature covers timestamp + key + recv window + (body or query).
    fn signed_headers(&self, signed_part: &str) -> Result<HeaderMap, GatewayError> {
        let ts = Self::timestamp_ms().to_string();
        let payload = format!("{}{}{}{}", ts, self.api_key, RECV_WINDOW, signed_part);
        let signature = self.sign(&payload)?;

        let value = |s: &str| {
            HeaderValue::from_str(s).map_err(|e| GatewayError::Permanent(format!("bad header value: {}", e)))
        };
        let mut headers = HeaderMap::new();
        headers.insert("X-BRIDGE-API-KEY", value(&self.api_key)?);
        headers.insert("X-BRIDGE-TIMESTAMP", value(&ts)?);
        headers.insert("X-BRIDGE-SIGN", value(&signature)?);
        headers.insert("X-BRIDGE-RECV-WINDOW", HeaderValue::from_static(RECV_WINDOW));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Unwraps the `{retCode, retMsg, result}` envelope.
    async fn envelope(resp: reqwest::Response) -> Result<Value, GatewayError> {
        let http_status = resp.status().as_u16();
        let mut json: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("Parse error: {}", e)))?;

        let ret_code = json["retCode"].as_i64().unwrap_or(-1);
        if ret_code == 0 {
            Ok(json["result"].take())
        } else {
            let msg = json["retMsg"].as_str().unwrap_or("unknown");
            Err(classify_error(ret_code, http_status, msg))
        }
    }

    // ── Internal raw methods (no retry) ──────────────────────────────────────

    async fn get_raw(&self, path: &str, query: &str) -> Result<Value, GatewayError> {
        let headers = self.signed_headers(query)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let resp = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("HTTP error: {}", e)))?;
        Self::envelope(resp).await
    }

    async fn post_raw(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        let body = body.to_string();
        let headers = self.signed_headers(&body)?;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("HTTP error: {}", e)))?;
        Self::envelope(resp).await
    }

    // ── Retrying wrappers ─────────────────────────────────────────────────────

    async fn get(&self, path: &str, query: String, max_retries: u32) -> Result<Value, GatewayError> {
        with_retry(|| self.get_raw(path, &query), max_retries).await
    }

    async fn post(&self, path: &str, body: Value, max_retries: u32) -> Result<Value, GatewayError> {
        with_retry(|| self.post_raw(path, &body), max_retries).await
    }

    /// Non-idempotent requests: sent once unless the bridge refused them.
    async fn post_once(&self, path: &str, body: Value, max_retries: u32) -> Result<Value, GatewayError> {
        with_retry_policy(|| self.post_raw(path, &body), max_retries, Resend::RejectedOnly).await
    }

    fn is_ours(&self, row: &Value) -> bool {
        int(&row["magic"]).map_or(true, |m| m as u64 == self.magic)
    }

    fn is_our_symbol(&self, row: &Value) -> bool {
        row["symbol"].as_str().map_or(true, |s| s == self.symbol)
    }
}

#[async_trait]
impl Gateway for BridgeGateway {
    async fn recent_candles(&self, count: usize) -> Result<Vec<Candle>, GatewayError> {
        let query = format!("symbol={}&timeframe={}&count={}", self.symbol, self.timeframe, count);
        let result = self.get("/v1/candles", query, 3).await?;
        let mut candles: Vec<Candle> = rows(&result).iter().filter_map(parse_candle).collect();
        if candles.is_empty() {
            return Err(GatewayError::Unavailable(format!("no candles for {}", self.symbol)));
        }
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    async fn open_positions(&self) -> Result<Vec<PositionSnapshot>, GatewayError> {
        let query = format!("symbol={}&magic={}", self.symbol, self.magic);
        let result = self.get("/v1/positions", query, 5).await?;
        Ok(rows(&result)
            .iter()
            .filter(|r| self.is_ours(r) && self.is_our_symbol(r))
            .filter_map(parse_position)
            .collect())
    }

    async fn submit_market_order(&self, order: &OrderRequest) -> Result<OrderReceipt, GatewayError> {
        let body = serde_json::json!({
            "symbol":    self.symbol,
            "type":      order.side.as_str(),
            "volume":    order.volume,
            "sl":        order.stop_loss,
            "tp":        order.take_profit,
            "magic":     self.magic,
            "comment":   order.comment,
            "deviation": DEVIATION_POINTS,
        });
        let result = self.post_once("/v1/order", body, 3).await?;
        let ticket = int(&result["order"])
            .ok_or_else(|| GatewayError::Permanent("order response without ticket".into()))?;
        let receipt = OrderReceipt {
            ticket: ticket as Ticket,
            price: num(&result["price"]).unwrap_or(0.0),
            status: result["retcode_description"].as_str().unwrap_or("done").to_string(),
        };
        log::info!("[bridge] order placed: {} {} {:.2} lots ticket={}", order.side, self.symbol, order.volume, receipt.ticket);
        Ok(receipt)
    }

    async fn modify_stop_target(&self, ticket: Ticket, stop_loss: f64, take_profit: f64) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "ticket": ticket,
            "symbol": self.symbol,
            "sl":     stop_loss,
            "tp":     take_profit,
        });
        self.post("/v1/position/modify", body, 3).await.map(|_| ())
    }

    async fn close_position(&self, ticket: Ticket, side: Side, volume: f64, comment: &str) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "ticket":    ticket,
            "symbol":    self.symbol,
            "type":      side.opposite().as_str(),
            "volume":    volume,
            "magic":     self.magic,
            "comment":   comment,
            "deviation": DEVIATION_POINTS,
        });
        self.post_once("/v1/position/close", body, 3).await?;
        log::info!("[bridge] position closed: {} ticket={} ({})", self.symbol, ticket, comment);
        Ok(())
    }

    async fn closing_deal(&self, ticket: Ticket) -> Result<DealInfo, GatewayError> {
        let result = self.get("/v1/history/deals", format!("position={}", ticket), 3).await?;
        rows(&result)
            .iter()
            .filter_map(parse_deal)
            .filter(|d| d.entry == DealEntry::Out)
            .max_by_key(|d| d.time)
            .ok_or_else(|| GatewayError::Unavailable(format!("no closing deal for #{}", ticket)))
    }

    async fn deals_between(&self, from: i64, to: i64) -> Result<Vec<DealInfo>, GatewayError> {
        let result = self.get("/v1/history/deals", format!("from={}&to={}", from, to), 3).await?;
        Ok(rows(&result).iter().filter(|r| self.is_ours(r)).filter_map(parse_deal).collect())
    }

    async fn account_state(&self) -> Result<AccountState, GatewayError> {
        let r = self.get("/v1/account", String::new(), 3).await?;
        Ok(AccountState {
            balance: num(&r["balance"]).ok_or_else(|| GatewayError::Unavailable("account without balance".into()))?,
            equity: num(&r["equity"]).unwrap_or(0.0),
            margin: num(&r["margin"]).unwrap_or(0.0),
            currency: r["currency"].as_str().map(str::to_string),
        })
    }

    async fn instrument_constraints(&self) -> Result<InstrumentConstraints, GatewayError> {
        let r = self.get("/v1/symbol", format!("symbol={}", self.symbol), 3).await?;
        let point = num(&r["point"]).unwrap_or(0.0);
        let stops_level = num(&r["trade_stops_level"]).unwrap_or(0.0);
        Ok(InstrumentConstraints { min_stop_distance: stops_level * point, pip_size: pip_size_for(&self.symbol, point) })
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        let r = self.get("/v1/symbol", format!("symbol={}", symbol), 1).await?;
        match (num(&r["bid"]), num(&r["ask"])) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => Ok(Quote { bid, ask }),
            _ => Err(GatewayError::Unavailable(format!("no quote for {}", symbol))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn gateway() -> BridgeGateway {
        let broker = BrokerConfig { symbol: "XAUUSD".into(), magic_number: 7901, ..BrokerConfig::default() };
        BridgeGateway::new(&broker, "M15", "key".into(), "key".into()).unwrap()
    }

    #[test]
    fn classify_maps_codes() {
        assert_eq!(classify_error(10006, 200, "slow down"), GatewayError::RateLimit { retry_after: 10 });
        assert_eq!(classify_error(0, 429, ""), GatewayError::RateLimit { retry_after: 10 });
        assert!(matches!(classify_error(10016, 200, "busy"), GatewayError::Transient(_)));
        assert!(matches!(classify_error(1, 503, "down"), GatewayError::Transient(_)));
        assert!(matches!(classify_error(10404, 200, "none"), GatewayError::Unavailable(_)));
        assert!(matches!(classify_error(10001, 400, "bad volume"), GatewayError::Permanent(_)));
    }

    #[test]
    fn sign_is_hmac_sha256_hex() {
        let sig = gateway().sign("The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(sig, "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8");
    }

    #[test]
    fn pip_size_rules() {
        assert_eq!(pip_size_for("XAUUSD", 0.01), 0.1);
        assert_eq!(pip_size_for("BTCUSD", 0.01), 1.0);
        assert!((pip_size_for("EURUSD", 0.00001) - 0.0001).abs() < 1e-12);
        assert_eq!(pip_size_for("EURUSD", 0.0), 0.0001);
    }

    #[test]
    fn parses_terminal_rows() {
        let p = parse_position(&json!({
            "ticket": 42, "type": 1, "volume": 0.1, "price_open": 2000.5,
            "sl": 2005.0, "tp": 0, "price_current": 1999.0, "profit": 15.0, "time": 1_704_067_200
        }))
        .unwrap();
        assert_eq!(p.side, Side::Sell);
        assert_eq!(p.take_profit, 0.0);

        let d = parse_deal(&json!({
            "ticket": 9, "position_id": 42, "entry": 1, "price": "1995.0", "profit": 55.0,
            "commission": -3.5, "swap": 0, "comment": "sl 1995.00", "time": 1_704_070_000
        }))
        .unwrap();
        assert_eq!(d.entry, DealEntry::Out);
        assert_eq!(d.price, 1995.0);

        assert!(parse_candle(&json!({"time": 1, "open": 1.0, "high": 2.0, "low": 0.5})).is_none());
    }

    #[test]
    fn foreign_magic_is_filtered() {
        let gw = gateway();
        assert!(gw.is_ours(&json!({"magic": 7901})));
        assert!(!gw.is_ours(&json!({"magic": 1})));
        assert!(gw.is_ours(&json!({})));
        assert!(!gw.is_our_symbol(&json!({"symbol": "EURUSD"})));
    }

    #[tokio::test]
    async fn retry_stops_on_permanent_and_unavailable() {
        let calls = AtomicU32::new(0);
        let r: Result<(), _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Permanent("rejected".into()))
            },
            3,
        )
        .await;
        assert!(matches!(r, Err(GatewayError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_from_one_transient() {
        let calls = AtomicU32::new(0);
        let r = with_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(GatewayError::Transient("timeout".into()))
                } else {
                    Ok(7)
                }
            },
            1,
        )
        .await;
        assert_eq!(r, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_only_keeps_transient_final() {
        let calls = AtomicU32::new(0);
        let r: Result<(), _> = with_retry_policy(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Transient("timed out".into()))
            },
            3,
            Resend::RejectedOnly,
        )
        .await;
        assert!(matches!(r, Err(GatewayError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Accepts connections, counts requests and never answers.
    pub(crate) async fn silent_server() -> (String, Arc<AtomicU32>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&requests);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                if matches!(sock.read(&mut buf).await, Ok(n) if n > 0) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                held.push(sock);
            }
        });
        (url, requests)
    }

    fn silent_gateway(url: String) -> BridgeGateway {
        let broker = BrokerConfig {
            symbol: "XAUUSD".into(),
            magic_number: 7901,
            bridge_url: url,
            request_timeout_secs: 1,
            ..BrokerConfig::default()
        };
        BridgeGateway::new(&broker, "M15", "key".into(), "key".into()).unwrap()
    }

    #[tokio::test]
    async fn order_with_lost_reply_is_sent_once() {
        let (url, requests) = silent_server().await;
        let gw = silent_gateway(url);
        let order = OrderRequest {
            side: Side::Buy,
            volume: 0.1,
            stop_loss: 1995.0,
            take_profit: 2010.0,
            comment: "test".into(),
        };

        let r = gw.submit_market_order(&order).await;
        assert!(matches!(r, Err(GatewayError::Transient(_))), "{r:?}");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_with_lost_reply_is_sent_once() {
        let (url, requests) = silent_server().await;
        let gw = silent_gateway(url);

        let r = gw.close_position(42, Side::Sell, 0.1, "scalp").await;
        assert!(matches!(r, Err(GatewayError::Transient(_))), "{r:?}");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }
}
