use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::types::{now_ms, PricePoint};

/// Single source of truth for "what is the current price" and "what has the
/// price done recently", decoupled from the feed's transport.
///
/// Points are kept in arrival order inside a sliding retention window.
/// Writers prune on ingest; readers additionally filter against the window
/// cutoff at call time, so reads stay on the read lock and still never
/// observe expired points.
pub struct PriceStore {
    retention_ms: i64,
    points: RwLock<VecDeque<PricePoint>>,
    tick_tx: broadcast::Sender<PricePoint>,
}

impl PriceStore {
    pub fn new(retention_ms: i64) -> Arc<Self> {
        let (tick_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            retention_ms,
            points: RwLock::new(VecDeque::new()),
            tick_tx,
        })
    }

    /// Append a sample, prune expired points, and publish the sample to all
    /// live subscribers.
    pub fn ingest(&self, price: f64, time: i64) {
        let point = PricePoint { time, price };
        let cutoff = now_ms() - self.retention_ms;
        {
            let mut points = self.points.write().unwrap_or_else(|e| e.into_inner());
            points.push_back(point);
            while points.front().is_some_and(|p| p.time < cutoff) {
                points.pop_front();
            }
        }

        // Best-effort: send fails only when nobody is subscribed.
        if self.tick_tx.send(point).is_err() {
            debug!(time, price, "price tick with no subscribers");
        }
    }

    /// All retained points within the window, oldest first, as of call time.
    pub fn history(&self) -> Vec<PricePoint> {
        let cutoff = now_ms() - self.retention_ms;
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        points.iter().filter(|p| p.time >= cutoff).copied().collect()
    }

    /// The most recent retained point, or None when the store is empty or
    /// everything has aged out (e.g. cold start, long feed outage).
    pub fn current(&self) -> Option<PricePoint> {
        let cutoff = now_ms() - self.retention_ms;
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        points.back().copied().filter(|p| p.time >= cutoff)
    }

    /// Register for every future ingested sample. Dropping the receiver
    /// unsubscribes without affecting other subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<PricePoint> {
        self.tick_tx.subscribe()
    }
}
