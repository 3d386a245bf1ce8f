use crate::error::{AppError, Result};

pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws/btcusdt@aggTrade";
pub const BINANCE_REST_URL: &str = "https://api.binance.com";

/// Sliding retention window for in-memory price history (10 minutes).
pub const PRICE_RETENTION_MS: i64 = 10 * 60 * 1000;

/// Resolution worker polling granularity — also the resolution timing error
/// bound for a due guess.
pub const RESOLUTION_POLL_MS: u64 = 1000;

/// Submissions whose client timestamp is older than this are rejected as
/// stale (replayed or clock-skewed requests).
pub const STALE_GUESS_MS: i64 = 2000;

/// Reconnect backoff values in milliseconds for the upstream price feed.
pub const RECONNECT_BACKOFF_MS: &[u64] = &[500, 1000, 2000, 5000, 10_000];

/// Heartbeat ping interval for the feed connection (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Capacity of each broadcast channel (price ticks and game events).
/// Slow subscribers past this lag are dropped, not blocked on.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_ws_url: String,
    pub feed_rest_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Price history retention window in ms (PRICE_RETENTION_MS).
    pub price_retention_ms: i64,
    /// Freshness tolerance for guess submissions in ms (STALE_GUESS_MS).
    pub stale_guess_ms: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            feed_ws_url: std::env::var("FEED_WS_URL").unwrap_or_else(|_| BINANCE_WS_URL.to_string()),
            feed_rest_url: std::env::var("FEED_REST_URL")
                .unwrap_or_else(|_| BINANCE_REST_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "updown.db".to_string()),
            api_port: numeric_override("API_PORT", std::env::var("API_PORT").ok(), 3000)?,
            price_retention_ms: numeric_override(
                "PRICE_RETENTION_MS",
                std::env::var("PRICE_RETENTION_MS").ok(),
                PRICE_RETENTION_MS,
            )?,
            stale_guess_ms: numeric_override(
                "STALE_GUESS_MS",
                std::env::var("STALE_GUESS_MS").ok(),
                STALE_GUESS_MS,
            )?,
        })
    }
}

/// An unset variable means the default; a set but unparseable one is a hard
/// config error, never silently ignored.
fn numeric_override<T: std::str::FromStr>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} must be a number, got '{v}'"))),
    }
}
