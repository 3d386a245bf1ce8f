use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::{RECONNECT_BACKOFF_MS, WS_PING_INTERVAL_SECS};
use crate::error::Result;
use crate::store::PriceStore;
use crate::types::now_ms;

/// Binance aggTrade frame. Price arrives as a string; `T` is the trade time
/// in epoch ms.
#[derive(Debug, Deserialize)]
struct AggTradeMsg {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

#[derive(Debug, Deserialize)]
struct TickerPriceResponse {
    price: String,
}

/// Maintains the single persistent connection to the upstream trade stream
/// and normalizes raw frames into price-store samples. Constructed once at
/// process start and owned by its spawned task.
pub struct PriceFeed {
    ws_url: String,
    rest_url: String,
    store: Arc<PriceStore>,
    client: reqwest::Client,
    frames_received: AtomicU64,
    parse_failures: AtomicU64,
}

impl PriceFeed {
    pub fn new(ws_url: String, rest_url: String, store: Arc<PriceStore>) -> Self {
        Self {
            ws_url,
            rest_url,
            store,
            client: reqwest::Client::new(),
            frames_received: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
        }
    }

    pub async fn run(mut self) {
        // One-shot REST seed so current() is available before the stream
        // hydrates. Failure is harmless — the stream fills the store anyway.
        match self.bootstrap_price().await {
            Ok(price) => info!(price, "price store seeded from REST ticker"),
            Err(e) => warn!("REST price bootstrap failed: {e}"),
        }

        let mut backoff_idx = 0usize;
        loop {
            info!("feed connecting to {}", self.ws_url);
            match self.connect_once().await {
                Ok(()) => {
                    info!("feed connection closed cleanly");
                    backoff_idx = 0;
                }
                Err(e) => {
                    error!("feed connection error: {e}");
                }
            }

            let delay_ms = RECONNECT_BACKOFF_MS
                .get(backoff_idx)
                .copied()
                .unwrap_or(*RECONNECT_BACKOFF_MS.last().unwrap());
            backoff_idx = (backoff_idx + 1).min(RECONNECT_BACKOFF_MS.len() - 1);

            warn!("feed reconnecting in {delay_ms}ms");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    async fn bootstrap_price(&self) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price?symbol=BTCUSDT", self.rest_url);
        let resp: TickerPriceResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let price = resp
            .price
            .parse::<f64>()
            .map_err(|_| crate::error::AppError::Decode(format!("ticker price '{}'", resp.price)))?;
        self.store.ingest(price, now_ms());
        Ok(price)
    }

    async fn connect_once(&mut self) -> Result<()> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();
        info!("feed connected");

        let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("feed ping");
                    write.send(Message::Ping(vec![].into())).await?;
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let total = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 1000 == 0 {
            let failures = self.parse_failures.load(Ordering::Relaxed);
            info!(frames = total, parse_failures = failures, "[FEED] {total} frames received");
        }

        match serde_json::from_str::<AggTradeMsg>(text) {
            Ok(msg) => match msg.price.parse::<f64>() {
                Ok(price) if price.is_finite() && price > 0.0 => {
                    self.store.ingest(price, msg.trade_time);
                }
                _ => {
                    self.parse_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(price = %msg.price, "unparseable price field, frame dropped");
                }
            },
            Err(e) => {
                let failures = self.parse_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures % 100 == 1 {
                    warn!("feed frame parse failure #{failures}: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agg_trade_frame_parses_price_and_time() {
        let raw = r#"{"e":"aggTrade","E":1672515782140,"s":"BTCUSDT","a":12345,
                      "p":"16541.23","q":"0.5","f":100,"l":105,"T":1672515782136,"m":true,"M":true}"#;
        let msg: AggTradeMsg = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.trade_time, 1672515782136);
        assert_eq!(msg.price.parse::<f64>().unwrap(), 16541.23);
    }

    #[test]
    fn malformed_frames_are_counted_not_fatal() {
        let store = PriceStore::new(60_000);
        let feed = PriceFeed::new(String::new(), String::new(), Arc::clone(&store));

        feed.handle_frame("not json");
        feed.handle_frame(r#"{"e":"aggTrade","p":"garbage","T":123}"#);
        feed.handle_frame(r#"{"e":"aggTrade","p":"-5.0","T":123}"#);

        assert_eq!(feed.parse_failures.load(Ordering::Relaxed), 3);
        assert!(store.current().is_none());
    }

    #[test]
    fn valid_frame_reaches_the_store() {
        let store = PriceStore::new(60_000);
        let feed = PriceFeed::new(String::new(), String::new(), Arc::clone(&store));
        let now = now_ms();

        feed.handle_frame(&format!(r#"{{"e":"aggTrade","p":"42000.5","T":{now}}}"#));

        let current = store.current().unwrap();
        assert_eq!(current.price, 42000.5);
        assert_eq!(current.time, now);
    }
}
