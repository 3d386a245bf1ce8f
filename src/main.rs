mod api;
mod config;
mod db;
mod error;
mod events;
mod feed;
mod game;
mod score;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::config::{Config, RESOLUTION_POLL_MS};
use crate::db::GameStore;
use crate::error::Result;
use crate::events::EventBus;
use crate::feed::PriceFeed;
use crate::game::{GuessService, ResolutionScheduler, ResolutionWorker};
use crate::store::PriceStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let connect_opts = SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared components ---
    let prices = PriceStore::new(cfg.price_retention_ms);
    let events = EventBus::new();
    let store = GameStore::new(pool.clone());
    let scheduler = ResolutionScheduler::new(pool.clone());
    let guesses = Arc::new(GuessService::new(
        store.clone(),
        Arc::clone(&events),
        cfg.stale_guess_ms,
    ));

    let carried = scheduler.pending_count().await?;
    if carried > 0 {
        info!(carried, "pending resolutions carried over from previous run");
    }

    // --- Spawn tasks ---

    // Upstream price feed (REST bootstrap, then the persistent stream)
    let feed = PriceFeed::new(
        cfg.feed_ws_url.clone(),
        cfg.feed_rest_url.clone(),
        Arc::clone(&prices),
    );
    tokio::spawn(async move { feed.run().await });

    // Resolution worker (polls for due guesses every second)
    let worker = ResolutionWorker::new(
        store.clone(),
        scheduler.clone(),
        Arc::clone(&prices),
        Arc::clone(&events),
        Duration::from_millis(RESOLUTION_POLL_MS),
    );
    tokio::spawn(async move { worker.run().await });

    // --- HTTP API server ---
    let api_state = ApiState {
        store,
        prices,
        events,
        guesses,
        scheduler,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
