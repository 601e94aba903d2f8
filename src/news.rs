use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::config::NewsConfig;
use crate::error::NewsError;
use crate::gateway::NewsSource;
use crate::types::NewsEvent;

const CACHE_FILE: &str = "news_events.json";
const HOLIDAY: &str = "Holiday";

/// One row of the weekly calendar feed.
#[derive(Debug, Deserialize)]
struct FeedRow {
    #[serde(default)]
    title: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    date: String, // RFC 3339 with the publisher's offset
    #[serde(default)]
    impact: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    fetched_at: NaiveDateTime,
    events: Vec<NewsEvent>,
}

/// Economic calendar filter with an on-disk cache.
pub struct NewsFilter {
    cfg: NewsConfig,
    client: reqwest::Client,
    events: Vec<NewsEvent>,
    last_fetch: Option<NaiveDateTime>,
    cache_path: PathBuf,
}

impl NewsFilter {
    pub fn new(cfg: NewsConfig) -> Result<Self, NewsError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.api_timeout_seconds))
            .build()?;
        if let Err(e) = std::fs::create_dir_all(&cfg.cache_directory) {
            log::warn!("[news] cannot create cache dir {}: {}", cfg.cache_directory, e);
        }
        log::info!(
            "[news] impact {:?} | currencies {:?} | buffer {}min before, {}min after",
            cfg.impact_levels, cfg.monitored_currencies, cfg.buffer_before_minutes, cfg.buffer_after_minutes
        );
        let cache_path = PathBuf::from(&cfg.cache_directory).join(CACHE_FILE);
        Ok(NewsFilter { cfg, client, events: Vec::new(), last_fetch: None, cache_path })
    }

    pub fn events(&self) -> &[NewsEvent] {
        &self.events
    }

    pub fn set_events(&mut self, events: Vec<NewsEvent>, fetched_at: NaiveDateTime) {
        self.events = events;
        self.last_fetch = Some(fetched_at);
    }

    /// Keeps monitored currencies and impact levels. Times become local wall
    /// time; holidays are pinned to noon so the buffer spans the day.
    fn parse_feed(&self, body: &str) -> Result<Vec<NewsEvent>, NewsError> {
        let rows: Vec<FeedRow> = serde_json::from_str(body)?;
        let mut events = Vec::new();
        for row in rows {
            if !self.cfg.monitored_currencies.contains(&row.country) || !self.cfg.impact_levels.contains(&row.impact) {
                continue;
            }
            let Ok(at) = DateTime::parse_from_rfc3339(&row.date) else {
                log::debug!("[news] skipping '{}' with unparseable date '{}'", row.title, row.date);
                continue;
            };
            let mut time = at.with_timezone(&Local).naive_local();
            if row.impact == HOLIDAY {
                time = time.date().and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN));
            }
            events.push(NewsEvent { title: row.title, currency: row.country, time, impact: row.impact, url: row.url });
        }
        events.sort_by_key(|e| e.time);
        Ok(events)
    }

    async fn fetch_once(&self) -> Result<Vec<NewsEvent>, NewsError> {
        let resp = self.client.get(&self.cfg.api_url).send().await?;
        if !resp.status().is_success() {
            return Err(NewsError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        self.parse_feed(&body)
    }

    /// Fetch with retries. Keeps the previous events on failure.
    async fn fetch(&mut self, now: NaiveDateTime) -> bool {
        let attempts = self.cfg.max_retries.max(1);
        for attempt in 1..=attempts {
            log::info!("[news] fetching calendar (attempt {}/{})", attempt, attempts);
            match self.fetch_once().await {
                Ok(events) => {
                    log::info!("[news] fetched {} relevant events", events.len());
                    self.set_events(events, now);
                    if let Err(e) = self.store_cache(now) {
                        log::warn!("[news] cache write failed: {}", e);
                    }
                    return true;
                }
                Err(e) => {
                    log::warn!("[news] fetch failed: {}", e);
                    if attempt < attempts {
                        tokio::time::sleep(std::time::Duration::from_secs(self.cfg.retry_delay_seconds)).await;
                    }
                }
            }
        }
        log::error!("[news] failed to fetch calendar after {} attempts", attempts);
        // don't hammer the feed every cycle
        self.last_fetch = Some(now);
        false
    }

    fn store_cache(&self, now: NaiveDateTime) -> Result<(), NewsError> {
        let data = CacheFile { fetched_at: now, events: self.events.clone() };
        std::fs::write(&self.cache_path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }

    /// Loads the cache when it is younger than `cache_max_age_minutes`.
    fn load_cache(&mut self) -> Result<bool, NewsError> {
        let meta = match std::fs::metadata(&self.cache_path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let age = SystemTime::now().duration_since(meta.modified()?).unwrap_or_default();
        if age.as_secs() as i64 > self.cfg.cache_max_age_minutes * 60 {
            log::debug!("[news] cache expired");
            return Ok(false);
        }
        let data: CacheFile = serde_json::from_str(&std::fs::read_to_string(&self.cache_path)?)?;
        log::info!("[news] loaded {} events from cache", data.events.len());
        self.set_events(data.events, data.fetched_at);
        Ok(true)
    }

    fn window(&self, e: &NewsEvent) -> (NaiveDateTime, NaiveDateTime) {
        if e.impact == HOLIDAY {
            let h = Duration::hours(self.cfg.holiday_buffer_hours);
            (e.time - h, e.time + h)
        } else {
            (
                e.time - Duration::minutes(self.cfg.buffer_before_minutes),
                e.time + Duration::minutes(self.cfg.buffer_after_minutes),
            )
        }
    }
}

#[async_trait]
impl NewsSource for NewsFilter {
    async fn refresh(&mut self, now: NaiveDateTime) {
        if !self.cfg.enabled {
            return;
        }
        match self.last_fetch {
            None => {
                let cached = self.load_cache().unwrap_or_else(|e| {
                    log::warn!("[news] cache read failed: {}", e);
                    false
                });
                if !cached {
                    self.fetch(now).await;
                }
            }
            Some(last) if (now - last).num_seconds() > self.cfg.check_interval_seconds => {
                self.fetch(now).await;
            }
            Some(_) => {}
        }
    }

    fn should_avoid_trading(&self, now: NaiveDateTime) -> Option<NewsEvent> {
        if !self.cfg.enabled {
            return None;
        }
        self.events
            .iter()
            .find(|e| {
                let (start, end) = self.window(e);
                start <= now && now <= end
            })
            .cloned()
    }

    fn upcoming_events(&self, now: NaiveDateTime, horizon: Duration) -> Vec<NewsEvent> {
        if !self.cfg.enabled {
            return Vec::new();
        }
        let cutoff = now + horizon;
        self.events.iter().filter(|e| now <= e.time && e.time <= cutoff).cloned().collect()
    }
}

/// The calendar filter when news filtering is enabled.
pub fn news_from_config(cfg: &NewsConfig) -> Result<Option<Box<dyn NewsSource>>, NewsError> {
    if !cfg.enabled {
        log::info!("[news] filter disabled");
        return Ok(None);
    }
    Ok(Some(Box::new(NewsFilter::new(cfg.clone())?)))
}
