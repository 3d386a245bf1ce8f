use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Price samples
// ---------------------------------------------------------------------------

/// One normalized sample from the trade feed. Ephemeral — retained only
/// inside the price store's sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Epoch ms.
    pub time: i64,
    pub price: f64,
}

// ---------------------------------------------------------------------------
// Guesses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's directional prediction against the price feed.
/// `outcome == None` means pending; the resolution worker sets it exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub id: String,
    pub user_id: String,
    pub game_id: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    /// Price at submission time.
    pub price: f64,
    /// Submission timestamp, epoch ms.
    pub timestamp: i64,
    /// Waiting period in ms, copied from the game config at submission time.
    pub period: i64,
    pub outcome: Option<bool>,
}

// ---------------------------------------------------------------------------
// Per-player game state
// ---------------------------------------------------------------------------

/// One row per (user, game). Mutated only by the resolution worker, inside
/// the per-guess resolution transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub user_id: String,
    pub game_id: String,
    pub score: i64,
    /// Consecutive-win counter; resets to zero on any loss.
    pub streak: i64,
    pub joined_at: i64,
}

// ---------------------------------------------------------------------------
// Game metadata (read-only for the engine)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub config_id: String,
    pub private: bool,
    pub passcode: String,
}

impl Game {
    /// A game with no privacy gate is open to anyone.
    pub fn is_open(&self) -> bool {
        !self.private && self.passcode.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub id: String,
    pub name: String,
    pub guessing_period: i64,
    pub score_streaks_enabled: bool,
    pub score_streak_thresholds: String,
}

// ---------------------------------------------------------------------------
// Scheduled resolutions
// ---------------------------------------------------------------------------

/// Disposable projection of a pending guess, used purely for timing.
/// Owned by the scheduler; consumed exactly once by the resolution worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledResolution {
    pub guess_id: String,
    pub game_id: String,
    /// Instant the guess becomes eligible for resolution, epoch ms.
    pub due_time: i64,
    pub direction: Direction,
    /// Price at submission time.
    pub price: f64,
}

// ---------------------------------------------------------------------------
// Fan-out events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum GameEvent {
    Guess(Guess),
    State(UserState),
}

/// What subscribers actually receive: the event plus its channel and
/// publish time.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub channel: String,
    pub time: i64,
    #[serde(flatten)]
    pub event: GameEvent,
}

/// Channel key for per-game-per-user event delivery.
pub fn game_channel(game_id: &str, user_id: &str) -> String {
    format!("game:{game_id}:{user_id}")
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
