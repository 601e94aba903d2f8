use thiserror::Error;

/// Failure of a gateway call. `Unavailable` is the "nothing returned" case.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Rate limited (retCode=10006 or HTTP 429). retry_after in seconds.
    #[error("rate limited (retry after {retry_after}s)")]
    RateLimit { retry_after: u64 },
    /// Network, timeout, HTTP 5xx, terminal busy.
    #[error("transient error: {0}")]
    Transient(String),
    /// Invalid request, rejected order, HTTP 4xx.
    #[error("permanent error: {0}")]
    Permanent(String),
    /// The terminal answered but had no data for the request.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::RateLimit { .. } | GatewayError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing required field: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("environment variable {0} not set")]
    Env(&'static str),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field, reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification rejected with status {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("news http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("news feed returned status {0}")]
    Status(u16),
    #[error("news cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("news payload: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats io: {0}")]
    Io(#[from] std::io::Error),
    #[error("stats encoding: {0}")]
    Json(#[from] serde_json::Error),
}
