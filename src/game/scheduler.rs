use sqlx::SqlitePool;

use crate::db::models::ScheduledResolutionRow;
use crate::error::Result;
use crate::types::ScheduledResolution;

/// Durable, time-ordered queue of pending resolutions. Tasks are enqueued by
/// guess admission (in the same transaction as the guess insert, see
/// `GameStore::create_guess_if_none_pending`) and drained here. Backed by
/// the `scheduled_resolutions` table so the queue survives a process
/// restart; combined with the worker's `outcome IS NULL` guard this turns
/// the at-least-once dequeue into an effectively-exactly-once state
/// transition.
#[derive(Clone)]
pub struct ResolutionScheduler {
    pool: SqlitePool,
}

impl ResolutionScheduler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically remove and return every task with `due_time <= now`,
    /// ordered by ascending due time (ties broken by guess id). The single
    /// `DELETE ... RETURNING` statement guarantees no task is ever handed to
    /// two concurrent callers.
    pub async fn drain_due(&self, now: i64) -> Result<Vec<ScheduledResolution>> {
        let rows = sqlx::query_as::<_, ScheduledResolutionRow>(
            r#"
            DELETE FROM scheduled_resolutions
            WHERE due_time <= ?1
            RETURNING guess_id, game_id, due_time, direction, price
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = rows
            .into_iter()
            .map(ScheduledResolution::try_from)
            .collect::<Result<Vec<_>>>()?;
        tasks.sort_by(|a, b| {
            a.due_time
                .cmp(&b.due_time)
                .then_with(|| a.guess_id.cmp(&b.guess_id))
        });
        Ok(tasks)
    }

    /// Number of tasks still waiting — surfaced by the health endpoint.
    pub async fn pending_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_resolutions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::Direction;

    async fn enqueue(pool: &SqlitePool, guess_id: &str, due_time: i64) {
        sqlx::query(
            r#"
            INSERT INTO scheduled_resolutions (guess_id, game_id, due_time, direction, price)
            VALUES (?1, 'g1', ?2, 'up', 100.0)
            "#,
        )
        .bind(guess_id)
        .bind(due_time)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn drains_in_ascending_due_time_order() {
        let pool = test_pool().await;
        let scheduler = ResolutionScheduler::new(pool.clone());
        enqueue(&pool, "late", 3000).await;
        enqueue(&pool, "early", 1000).await;
        enqueue(&pool, "middle", 2000).await;

        let drained = scheduler.drain_due(5000).await.unwrap();
        let ids: Vec<&str> = drained.iter().map(|t| t.guess_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "middle", "late"]);
        assert_eq!(drained[0].direction, Direction::Up);
    }

    #[tokio::test]
    async fn never_drains_tasks_due_in_the_future() {
        let pool = test_pool().await;
        let scheduler = ResolutionScheduler::new(pool.clone());
        enqueue(&pool, "due", 1000).await;
        enqueue(&pool, "future", 9000).await;

        let drained = scheduler.drain_due(1000).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].guess_id, "due");
        assert_eq!(scheduler.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn drain_is_exactly_once() {
        let pool = test_pool().await;
        let scheduler = ResolutionScheduler::new(pool.clone());
        enqueue(&pool, "only", 1000).await;

        let first = scheduler.drain_due(2000).await.unwrap();
        let second = scheduler.drain_due(2000).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn ties_break_stably_by_guess_id() {
        let pool = test_pool().await;
        let scheduler = ResolutionScheduler::new(pool.clone());
        enqueue(&pool, "b", 1000).await;
        enqueue(&pool, "a", 1000).await;

        let drained = scheduler.drain_due(1000).await.unwrap();
        let ids: Vec<&str> = drained.iter().map(|t| t.guess_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
