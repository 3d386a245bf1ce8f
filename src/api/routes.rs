use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::GameStore;
use crate::error::AppError;
use crate::events::EventBus;
use crate::game::{GuessService, ResolutionScheduler};
use crate::store::PriceStore;
use crate::types::{Direction, EventEnvelope, Guess, PricePoint};

/// The price channel clients subscribe to for history replay + live ticks.
const PRICE_CHANNEL: &str = "price:btc";

#[derive(Clone)]
pub struct ApiState {
    pub store: GameStore,
    pub prices: Arc<PriceStore>,
    pub events: Arc<EventBus>,
    pub guesses: Arc<GuessService>,
    pub scheduler: ResolutionScheduler,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/games/:id/guess", post(submit_guess))
        .route("/games/:id/history", get(get_game_history))
        .route("/prices/current", get(get_current_price))
        .route("/prices/history", get(get_price_history))
        .route("/stream", get(stream_events))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct GuessRequest {
    #[serde(rename = "type")]
    pub direction: Direction,
    pub price: f64,
    /// Client submission time, epoch ms. Checked for freshness.
    pub timestamp: i64,
}

#[derive(Deserialize)]
pub struct StreamQuery {
    /// Comma-separated channel names, e.g. "price:btc,game:<gameId>:<userId>".
    pub channels: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub price_available: bool,
    pub pending_resolutions: i64,
    pub live_channels: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Session issuance is external; the transport hands us the caller's
/// identity in a header.
fn require_user(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

async fn submit_guess(
    State(state): State<ApiState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<GuessRequest>,
) -> Result<Json<Guess>, AppError> {
    let user_id = require_user(&headers)?;
    let guess = state
        .guesses
        .submit(&game_id, &user_id, req.direction, req.price, req.timestamp)
        .await?;
    Ok(Json(guess))
}

async fn get_game_history(
    State(state): State<ApiState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Guess>>, AppError> {
    require_user(&headers)?;
    if state.store.find_game(&game_id).await?.is_none() {
        return Err(AppError::NotFound("game"));
    }
    Ok(Json(state.store.guess_history(&game_id).await?))
}

async fn get_current_price(
    State(state): State<ApiState>,
) -> Result<Json<PricePoint>, AppError> {
    state
        .prices
        .current()
        .map(Json)
        .ok_or(AppError::NotFound("current price"))
}

async fn get_price_history(State(state): State<ApiState>) -> Json<Vec<PricePoint>> {
    Json(state.prices.history())
}

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        price_available: state.prices.current().is_some(),
        pending_resolutions: state.scheduler.pending_count().await?,
        live_channels: state.events.channel_count(),
    }))
}

// ---------------------------------------------------------------------------
// SSE stream
// ---------------------------------------------------------------------------

type SseStream = BoxStream<'static, Result<Event, Infallible>>;

/// One SSE connection serving a set of channels. `price:btc` replays the
/// current window once, then live ticks; `game:*` channels are live-only.
/// Closing the connection drops every receiver, which unsubscribes cleanly.
async fn stream_events(
    State(state): State<ApiState>,
    Query(params): Query<StreamQuery>,
) -> Sse<SseStream> {
    let mut streams: Vec<SseStream> = Vec::new();

    for channel in params
        .channels
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        if channel == PRICE_CHANNEL {
            let replay = stream::iter(
                state
                    .prices
                    .history()
                    .into_iter()
                    .map(|p| Ok(price_event(&p))),
            );
            let live = price_tick_stream(state.prices.subscribe());
            streams.push(replay.chain(live).boxed());
        } else if is_game_channel(channel) {
            streams.push(game_event_stream(state.events.subscribe(channel)).boxed());
        }
        // Unknown channel names are silently ignored.
    }

    Sse::new(stream::select_all(streams).boxed()).keep_alive(KeepAlive::default())
}

fn is_game_channel(channel: &str) -> bool {
    let mut parts = channel.split(':');
    parts.next() == Some("game")
        && parts.next().is_some_and(|g| !g.is_empty())
        && parts.next().is_some_and(|u| !u.is_empty())
        && parts.next().is_none()
}

fn price_event(point: &PricePoint) -> Event {
    let payload = serde_json::json!({
        "channel": PRICE_CHANNEL,
        "time": point.time,
        "price": point.price,
    });
    Event::default().data(payload.to_string())
}

fn envelope_event(envelope: &EventEnvelope) -> Event {
    match serde_json::to_string(envelope) {
        Ok(data) => Event::default().data(data),
        Err(_) => Event::default(),
    }
}

fn price_tick_stream(
    rx: broadcast::Receiver<PricePoint>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(point) => return Some((Ok(price_event(&point)), rx)),
                // Lagged means we dropped ticks; keep serving from the newest.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

fn game_event_stream(
    rx: broadcast::Receiver<EventEnvelope>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => return Some((Ok(envelope_event(&envelope)), rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}
