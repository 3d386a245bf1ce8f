use sqlx::SqlitePool;
use tracing::warn;

use crate::db::models::{GameConfigRow, GameRow, GuessRow, UserStateRow};
use crate::error::Result;
use crate::score;
use crate::types::{now_ms, Game, GameConfig, Guess, UserState};

/// Persistent-store facade over SQLite. Guess admission and the per-guess
/// resolution transition are the only write paths; everything else is reads.
#[derive(Clone)]
pub struct GameStore {
    pool: SqlitePool,
}

impl GameStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_game(&self, game_id: &str) -> Result<Option<Game>> {
        let row = sqlx::query_as::<_, GameRow>(
            "SELECT id, name, config_id, private, passcode FROM games WHERE id = ?1",
        )
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Game::from))
    }

    pub async fn find_game_config(&self, config_id: &str) -> Result<Option<GameConfig>> {
        let row = sqlx::query_as::<_, GameConfigRow>(
            r#"
            SELECT id, name, guessing_period, score_streaks_enabled, score_streak_thresholds
            FROM game_configs WHERE id = ?1
            "#,
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GameConfig::from))
    }

    pub async fn is_participant(&self, user_id: &str, game_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_states WHERE user_id = ?1 AND game_id = ?2",
        )
        .bind(user_id)
        .bind(game_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Insert a new pending guess, enforcing the one-pending-guess rule in
    /// the same transaction as the insert. The guess row and its entry in
    /// the resolution queue are committed together — a failure on either
    /// write rolls back both, so a pending guess can never exist without a
    /// scheduled resolution. Returns false when a pending guess already
    /// exists for this (user, game).
    pub async fn create_guess_if_none_pending(&self, guess: &Guess) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let pending: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM guesses
            WHERE user_id = ?1 AND game_id = ?2 AND outcome IS NULL
            "#,
        )
        .bind(&guess.user_id)
        .bind(&guess.game_id)
        .fetch_one(&mut *tx)
        .await?;
        if pending > 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO guesses (id, user_id, game_id, direction, price, timestamp, period, outcome)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
            "#,
        )
        .bind(&guess.id)
        .bind(&guess.user_id)
        .bind(&guess.game_id)
        .bind(guess.direction.as_str())
        .bind(guess.price)
        .bind(guess.timestamp)
        .bind(guess.period)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_resolutions (guess_id, game_id, due_time, direction, price)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&guess.id)
        .bind(&guess.game_id)
        .bind(guess.timestamp + guess.period)
        .bind(guess.direction.as_str())
        .bind(guess.price)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// All guesses for a game, oldest first.
    pub async fn guess_history(&self, game_id: &str) -> Result<Vec<Guess>> {
        let rows = sqlx::query_as::<_, GuessRow>(
            r#"
            SELECT id, user_id, game_id, direction, price, timestamp, period, outcome
            FROM guesses WHERE game_id = ?1 ORDER BY timestamp ASC
            "#,
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Guess::try_from).collect()
    }

    pub async fn find_user_state(&self, user_id: &str, game_id: &str) -> Result<Option<UserState>> {
        let row = sqlx::query_as::<_, UserStateRow>(
            r#"
            SELECT user_id, game_id, score, streak, joined_at
            FROM user_states WHERE user_id = ?1 AND game_id = ?2
            "#,
        )
        .bind(user_id)
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserState::from))
    }

    pub async fn upsert_user_state(&self, user_id: &str, game_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_states (user_id, game_id, score, streak, joined_at)
            VALUES (?1, ?2, 0, 0, ?3)
            ON CONFLICT (user_id, game_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(game_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The atomic resolution transition: set the guess outcome (guarded by
    /// `outcome IS NULL` so a re-delivered task is a no-op), then apply the
    /// score/streak delta to the (user, game) state — all in one
    /// transaction.
    ///
    /// Win: streak += 1, delta from the scoring function set when streak
    /// scoring is enabled (+1 fallback on expression errors), else +1.
    /// Loss: streak = 0, delta −1.
    ///
    /// Returns None when the guess was missing or already resolved.
    pub async fn apply_resolution(
        &self,
        guess_id: &str,
        outcome: bool,
    ) -> Result<Option<(Guess, UserState)>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, GuessRow>(
            r#"
            UPDATE guesses SET outcome = ?1
            WHERE id = ?2 AND outcome IS NULL
            RETURNING id, user_id, game_id, direction, price, timestamp, period, outcome
            "#,
        )
        .bind(outcome)
        .bind(guess_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };
        let guess = Guess::try_from(row)?;

        let config = sqlx::query_as::<_, GameConfigRow>(
            r#"
            SELECT gc.id, gc.name, gc.guessing_period, gc.score_streaks_enabled,
                   gc.score_streak_thresholds
            FROM games g JOIN game_configs gc ON g.config_id = gc.id
            WHERE g.id = ?1
            "#,
        )
        .bind(&guess.game_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(GameConfig::from);

        // Create the state row on first use so a guess from an open game
        // resolves even if the user never formally joined.
        sqlx::query(
            r#"
            INSERT INTO user_states (user_id, game_id, score, streak, joined_at)
            VALUES (?1, ?2, 0, 0, ?3)
            ON CONFLICT (user_id, game_id) DO NOTHING
            "#,
        )
        .bind(&guess.user_id)
        .bind(&guess.game_id)
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;

        let state_row = sqlx::query_as::<_, UserStateRow>(
            r#"
            SELECT user_id, game_id, score, streak, joined_at
            FROM user_states WHERE user_id = ?1 AND game_id = ?2
            "#,
        )
        .bind(&guess.user_id)
        .bind(&guess.game_id)
        .fetch_one(&mut *tx)
        .await?;
        let mut state = UserState::from(state_row);

        let delta = if outcome {
            state.streak += 1;
            streak_delta(config.as_ref(), state.streak)
        } else {
            state.streak = 0;
            -1
        };
        state.score += delta;

        sqlx::query(
            "UPDATE user_states SET score = ?1, streak = ?2 WHERE user_id = ?3 AND game_id = ?4",
        )
        .bind(state.score)
        .bind(state.streak)
        .bind(&state.user_id)
        .bind(&state.game_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((guess, state)))
    }
}

/// Score delta for a win at the given (already incremented) streak length.
/// Expression failures never poison the resolution loop — they fall back to
/// the flat +1 reward.
fn streak_delta(config: Option<&GameConfig>, streak: i64) -> i64 {
    let Some(config) = config else {
        return 1;
    };
    if !config.score_streaks_enabled {
        return 1;
    }
    match score::evaluate(&config.score_streak_thresholds, streak) {
        Ok(delta) => delta,
        Err(e) => {
            warn!(
                config_id = %config.id,
                streak,
                "score expression failed, falling back to +1: {e}"
            );
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::Direction;

    async fn seed_game(store: &GameStore, game_id: &str, thresholds: &str, streaks: bool) {
        sqlx::query(
            r#"
            INSERT INTO game_configs (id, name, guessing_period, score_streaks_enabled, score_streak_thresholds)
            VALUES (?1, ?2, 30000, ?3, ?4)
            "#,
        )
        .bind(format!("{game_id}-config"))
        .bind("test config")
        .bind(streaks)
        .bind(thresholds)
        .execute(store.pool())
        .await
        .unwrap();

        sqlx::query("INSERT INTO games (id, name, config_id, private, passcode) VALUES (?1, ?2, ?3, 0, '')")
            .bind(game_id)
            .bind("test game")
            .bind(format!("{game_id}-config"))
            .execute(store.pool())
            .await
            .unwrap();
    }

    fn pending_guess(id: &str, user: &str, game: &str, direction: Direction) -> Guess {
        Guess {
            id: id.to_string(),
            user_id: user.to_string(),
            game_id: game.to_string(),
            direction,
            price: 100.0,
            timestamp: now_ms(),
            period: 30000,
            outcome: None,
        }
    }

    #[tokio::test]
    async fn admission_enforces_one_pending_guess() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "", false).await;

        let first = pending_guess("guess1", "u1", "g1", Direction::Up);
        assert!(store.create_guess_if_none_pending(&first).await.unwrap());

        let second = pending_guess("guess2", "u1", "g1", Direction::Down);
        assert!(!store.create_guess_if_none_pending(&second).await.unwrap());

        // A different user is unaffected.
        let other = pending_guess("guess3", "u2", "g1", Direction::Up);
        assert!(store.create_guess_if_none_pending(&other).await.unwrap());
    }

    #[tokio::test]
    async fn resolving_clears_the_pending_slot() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "", false).await;

        let guess = pending_guess("guess1", "u1", "g1", Direction::Up);
        assert!(store.create_guess_if_none_pending(&guess).await.unwrap());
        store.apply_resolution("guess1", true).await.unwrap();

        let next = pending_guess("guess2", "u1", "g1", Direction::Up);
        assert!(store.create_guess_if_none_pending(&next).await.unwrap());
    }

    #[tokio::test]
    async fn win_increments_streak_and_score_without_streak_scoring() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "", false).await;

        for i in 0..3i64 {
            let guess = pending_guess(&format!("guess{i}"), "u1", "g1", Direction::Up);
            store.create_guess_if_none_pending(&guess).await.unwrap();
            let (resolved, state) = store
                .apply_resolution(&guess.id, true)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(resolved.outcome, Some(true));
            assert_eq!(state.streak, i + 1);
            // delta is exactly +1 per win when streak scoring is disabled
            assert_eq!(state.score, i + 1);
        }
    }

    #[tokio::test]
    async fn loss_resets_streak_and_decrements_score() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "", false).await;

        let win = pending_guess("guess1", "u1", "g1", Direction::Up);
        store.create_guess_if_none_pending(&win).await.unwrap();
        store.apply_resolution("guess1", true).await.unwrap();

        let loss = pending_guess("guess2", "u1", "g1", Direction::Up);
        store.create_guess_if_none_pending(&loss).await.unwrap();
        let (resolved, state) = store
            .apply_resolution("guess2", false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.outcome, Some(false));
        assert_eq!(state.streak, 0);
        assert_eq!(state.score, 0); // +1 then -1
    }

    #[tokio::test]
    async fn streak_scoring_uses_the_function_set() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "f(n:n+2:n<5);f(n:n*2)", true).await;

        // Three consecutive wins: streaks 1,2,3 all match n<5 → deltas 3,4,5.
        let mut expected_score = 0i64;
        for (i, delta) in [(0, 3i64), (1, 4), (2, 5)] {
            let guess = pending_guess(&format!("guess{i}"), "u1", "g1", Direction::Up);
            store.create_guess_if_none_pending(&guess).await.unwrap();
            let (_, state) = store
                .apply_resolution(&guess.id, true)
                .await
                .unwrap()
                .unwrap();
            expected_score += delta;
            assert_eq!(state.score, expected_score);
        }
    }

    #[tokio::test]
    async fn broken_expression_falls_back_to_plus_one() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "f(n:n+", true).await;

        let guess = pending_guess("guess1", "u1", "g1", Direction::Up);
        store.create_guess_if_none_pending(&guess).await.unwrap();
        let (_, state) = store
            .apply_resolution("guess1", true)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.score, 1);
        assert_eq!(state.streak, 1);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "", false).await;

        let guess = pending_guess("guess1", "u1", "g1", Direction::Up);
        store.create_guess_if_none_pending(&guess).await.unwrap();

        let first = store.apply_resolution("guess1", true).await.unwrap();
        assert!(first.is_some());

        // Simulated re-delivery: the delta must not be applied twice.
        let second = store.apply_resolution("guess1", true).await.unwrap();
        assert!(second.is_none());

        let state = store.find_user_state("u1", "g1").await.unwrap().unwrap();
        assert_eq!(state.score, 1);
        assert_eq!(state.streak, 1);
    }

    #[tokio::test]
    async fn user_state_is_created_on_first_resolution() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "", false).await;

        assert!(store.find_user_state("u1", "g1").await.unwrap().is_none());

        let guess = pending_guess("guess1", "u1", "g1", Direction::Down);
        store.create_guess_if_none_pending(&guess).await.unwrap();
        let (_, state) = store
            .apply_resolution("guess1", false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.score, -1);
        assert_eq!(state.streak, 0);
        assert!(store.find_user_state("u1", "g1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn history_is_ordered_by_submission_time() {
        let store = GameStore::new(test_pool().await);
        seed_game(&store, "g1", "", false).await;

        let mut early = pending_guess("guess1", "u1", "g1", Direction::Up);
        early.timestamp = 1000;
        let mut late = pending_guess("guess2", "u2", "g1", Direction::Down);
        late.timestamp = 2000;

        store.create_guess_if_none_pending(&late).await.unwrap();
        store.create_guess_if_none_pending(&early).await.unwrap();

        let history = store.guess_history("g1").await.unwrap();
        let ids: Vec<&str> = history.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["guess1", "guess2"]);
    }
}
