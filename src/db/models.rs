//! Raw row types for runtime-checked sqlx queries. Converted into the
//! domain types in `crate::types` at the store boundary.

use crate::error::AppError;
use crate::types::{Direction, Game, GameConfig, Guess, ScheduledResolution, UserState};

#[derive(Debug, sqlx::FromRow)]
pub struct GameRow {
    pub id: String,
    pub name: String,
    pub config_id: String,
    pub private: bool,
    pub passcode: String,
}

impl From<GameRow> for Game {
    fn from(r: GameRow) -> Self {
        Game {
            id: r.id,
            name: r.name,
            config_id: r.config_id,
            private: r.private,
            passcode: r.passcode,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct GameConfigRow {
    pub id: String,
    pub name: String,
    pub guessing_period: i64,
    pub score_streaks_enabled: bool,
    pub score_streak_thresholds: String,
}

impl From<GameConfigRow> for GameConfig {
    fn from(r: GameConfigRow) -> Self {
        GameConfig {
            id: r.id,
            name: r.name,
            guessing_period: r.guessing_period,
            score_streaks_enabled: r.score_streaks_enabled,
            score_streak_thresholds: r.score_streak_thresholds,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct GuessRow {
    pub id: String,
    pub user_id: String,
    pub game_id: String,
    pub direction: String,
    pub price: f64,
    pub timestamp: i64,
    pub period: i64,
    pub outcome: Option<bool>,
}

impl TryFrom<GuessRow> for Guess {
    type Error = AppError;

    fn try_from(r: GuessRow) -> Result<Self, AppError> {
        let direction = Direction::parse(&r.direction)
            .ok_or_else(|| AppError::Decode(format!("guess direction '{}'", r.direction)))?;
        Ok(Guess {
            id: r.id,
            user_id: r.user_id,
            game_id: r.game_id,
            direction,
            price: r.price,
            timestamp: r.timestamp,
            period: r.period,
            outcome: r.outcome,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct UserStateRow {
    pub user_id: String,
    pub game_id: String,
    pub score: i64,
    pub streak: i64,
    pub joined_at: i64,
}

impl From<UserStateRow> for UserState {
    fn from(r: UserStateRow) -> Self {
        UserState {
            user_id: r.user_id,
            game_id: r.game_id,
            score: r.score,
            streak: r.streak,
            joined_at: r.joined_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ScheduledResolutionRow {
    pub guess_id: String,
    pub game_id: String,
    pub due_time: i64,
    pub direction: String,
    pub price: f64,
}

impl TryFrom<ScheduledResolutionRow> for ScheduledResolution {
    type Error = AppError;

    fn try_from(r: ScheduledResolutionRow) -> Result<Self, AppError> {
        let direction = Direction::parse(&r.direction)
            .ok_or_else(|| AppError::Decode(format!("task direction '{}'", r.direction)))?;
        Ok(ScheduledResolution {
            guess_id: r.guess_id,
            game_id: r.game_id,
            due_time: r.due_time,
            direction,
            price: r.price,
        })
    }
}
