use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::db::GameStore;
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::types::{game_channel, now_ms, Direction, GameEvent, Guess};

/// Admits new guesses and registers their future resolutions.
pub struct GuessService {
    store: GameStore,
    events: Arc<EventBus>,
    stale_after_ms: i64,
}

impl GuessService {
    pub fn new(store: GameStore, events: Arc<EventBus>, stale_after_ms: i64) -> Self {
        Self {
            store,
            events,
            stale_after_ms,
        }
    }

    /// Validate and admit a guess: freshness check, game existence,
    /// participation-or-public check, one-pending-guess rule, then persist
    /// the guess together with its resolution (due at `timestamp + period`)
    /// in one transaction, and announce the new guess on the (game, user)
    /// channel. A store failure commits nothing, so the submission is
    /// safely retryable.
    pub async fn submit(
        &self,
        game_id: &str,
        user_id: &str,
        direction: Direction,
        price: f64,
        timestamp: i64,
    ) -> Result<Guess> {
        let age = now_ms() - timestamp;
        if age > self.stale_after_ms {
            return Err(AppError::StaleTimestamp(age));
        }

        let game = self
            .store
            .find_game(game_id)
            .await?
            .ok_or(AppError::NotFound("game"))?;

        let is_participant = self.store.is_participant(user_id, game_id).await?;
        if !is_participant && !game.is_open() {
            return Err(AppError::Forbidden);
        }

        let config = self
            .store
            .find_game_config(&game.config_id)
            .await?
            .ok_or(AppError::NotFound("game config"))?;

        let guess = Guess {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            game_id: game_id.to_string(),
            direction,
            price,
            timestamp,
            period: config.guessing_period,
            outcome: None,
        };

        if !self.store.create_guess_if_none_pending(&guess).await? {
            return Err(AppError::PendingGuess);
        }

        info!(
            guess_id = %guess.id,
            game_id,
            user_id,
            direction = %direction,
            due_in_ms = guess.period,
            "guess admitted"
        );
        self.events.publish(
            &game_channel(game_id, user_id),
            GameEvent::Guess(guess.clone()),
        );

        Ok(guess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::game::ResolutionScheduler;

    async fn service_with_game(
        private: bool,
        passcode: &str,
    ) -> (GuessService, Arc<EventBus>, sqlx::SqlitePool) {
        let pool = test_pool().await;
        let store = GameStore::new(pool.clone());
        let events = EventBus::new();

        sqlx::query(
            r#"
            INSERT INTO game_configs (id, name, guessing_period, score_streaks_enabled, score_streak_thresholds)
            VALUES ('c1', 'cfg', 30000, 0, '')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO games (id, name, config_id, private, passcode) VALUES ('g1', 'game', 'c1', ?1, ?2)")
            .bind(private)
            .bind(passcode)
            .execute(&pool)
            .await
            .unwrap();

        let service = GuessService::new(store, Arc::clone(&events), 2000);
        (service, events, pool)
    }

    #[tokio::test]
    async fn admits_a_fresh_guess_into_an_open_game() {
        let (service, events, _pool) = service_with_game(false, "").await;
        let mut rx = events.subscribe(&game_channel("g1", "u1"));

        let ts = now_ms();
        let guess = service
            .submit("g1", "u1", Direction::Up, 100.0, ts)
            .await
            .unwrap();

        assert_eq!(guess.outcome, None);
        assert_eq!(guess.period, 30000);
        assert_eq!(guess.timestamp, ts);

        // A "guess created" event went out on the (game, user) channel.
        let env = rx.recv().await.unwrap();
        match env.event {
            GameEvent::Guess(g) => assert_eq!(g.id, guess.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn submission_schedules_the_resolution() {
        let (service, _, pool) = service_with_game(false, "").await;

        let ts = now_ms();
        let guess = service
            .submit("g1", "u1", Direction::Down, 250.0, ts)
            .await
            .unwrap();

        let due = ts + guess.period;
        let scheduler = ResolutionScheduler::new(pool);
        let tasks = scheduler.drain_due(due).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].guess_id, guess.id);
        assert_eq!(tasks[0].due_time, due);
        assert_eq!(tasks[0].direction, Direction::Down);
        assert_eq!(tasks[0].price, 250.0);
    }

    #[tokio::test]
    async fn failed_admission_commits_nothing() {
        let (service, _, pool) = service_with_game(false, "").await;

        // Make the queue write fail mid-transaction.
        sqlx::query("ALTER TABLE scheduled_resolutions RENAME TO scheduled_resolutions_gone")
            .execute(&pool)
            .await
            .unwrap();

        let err = service
            .submit("g1", "u1", Direction::Up, 100.0, now_ms())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        // The guess insert rolled back with the queue insert, so nothing is
        // pending and the slot is not blocked.
        assert!(service.store.guess_history("g1").await.unwrap().is_empty());

        // Once the store recovers, the retry goes through.
        sqlx::query("ALTER TABLE scheduled_resolutions_gone RENAME TO scheduled_resolutions")
            .execute(&pool)
            .await
            .unwrap();
        let guess = service
            .submit("g1", "u1", Direction::Up, 100.0, now_ms())
            .await
            .unwrap();

        let scheduler = ResolutionScheduler::new(pool);
        assert_eq!(scheduler.pending_count().await.unwrap(), 1);
        let tasks = scheduler.drain_due(now_ms() + guess.period).await.unwrap();
        assert_eq!(tasks[0].guess_id, guess.id);
    }

    #[tokio::test]
    async fn rejects_stale_timestamps() {
        let (service, _, _pool) = service_with_game(false, "").await;

        let err = service
            .submit("g1", "u1", Direction::Up, 100.0, now_ms() - 5000)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StaleTimestamp(_)));
    }

    #[tokio::test]
    async fn rejects_non_participants_of_gated_games() {
        let (service, _, _pool) = service_with_game(true, "secret").await;

        let err = service
            .submit("g1", "stranger", Direction::Up, 100.0, now_ms())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn participants_may_guess_in_gated_games() {
        let (service, _, _pool) = service_with_game(true, "secret").await;
        service.store.upsert_user_state("member", "g1").await.unwrap();

        let guess = service
            .submit("g1", "member", Direction::Up, 100.0, now_ms())
            .await
            .unwrap();
        assert_eq!(guess.user_id, "member");
    }

    #[tokio::test]
    async fn rejects_unknown_games() {
        let (service, _, _pool) = service_with_game(false, "").await;

        let err = service
            .submit("missing", "u1", Direction::Up, 100.0, now_ms())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("game")));
    }

    #[tokio::test]
    async fn rejects_a_second_pending_guess() {
        let (service, _, _pool) = service_with_game(false, "").await;

        service
            .submit("g1", "u1", Direction::Up, 100.0, now_ms())
            .await
            .unwrap();
        let err = service
            .submit("g1", "u1", Direction::Down, 101.0, now_ms())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PendingGuess));
    }
}
