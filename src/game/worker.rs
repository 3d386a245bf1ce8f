use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::db::GameStore;
use crate::error::Result;
use crate::events::EventBus;
use crate::game::scheduler::ResolutionScheduler;
use crate::store::PriceStore;
use crate::types::{game_channel, now_ms, Direction, GameEvent, ScheduledResolution};

/// Periodic resolution loop: every poll interval, claim all due tasks and
/// resolve each one against the current price. The drain and the batch are
/// awaited inline, so a slow batch delays the next tick instead of
/// overlapping it.
pub struct ResolutionWorker {
    store: GameStore,
    scheduler: ResolutionScheduler,
    prices: Arc<PriceStore>,
    events: Arc<EventBus>,
    poll_interval: Duration,
}

impl ResolutionWorker {
    pub fn new(
        store: GameStore,
        scheduler: ResolutionScheduler,
        prices: Arc<PriceStore>,
        events: Arc<EventBus>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            prices,
            events,
            poll_interval,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            if let Err(e) = self.process_due(now_ms()).await {
                error!("resolution tick failed: {e}");
            }
        }
    }

    /// Drain everything due at `now` and resolve each task independently —
    /// one failing task never aborts the rest of the batch.
    pub async fn process_due(&self, now: i64) -> Result<()> {
        let tasks = self.scheduler.drain_due(now).await?;
        if tasks.is_empty() {
            return Ok(());
        }
        debug!(count = tasks.len(), "draining due resolutions");

        for task in tasks {
            if let Err(e) = self.resolve(&task).await {
                error!(guess_id = %task.guess_id, "failed to resolve guess: {e}");
            }
        }
        Ok(())
    }

    async fn resolve(&self, task: &ScheduledResolution) -> Result<()> {
        // No current price means the feed never recovered — resolve as a
        // loss rather than letting the guess hang forever.
        let outcome = match self.prices.current() {
            Some(current) => match task.direction {
                Direction::Up => current.price > task.price,
                Direction::Down => current.price < task.price,
            },
            None => false,
        };

        let Some((guess, state)) = self.store.apply_resolution(&task.guess_id, outcome).await?
        else {
            // Already resolved — re-delivered task, nothing to apply.
            debug!(guess_id = %task.guess_id, "guess already resolved, skipping");
            return Ok(());
        };

        info!(
            guess_id = %guess.id,
            game_id = %guess.game_id,
            user_id = %guess.user_id,
            outcome,
            score = state.score,
            streak = state.streak,
            "guess resolved"
        );

        let channel = game_channel(&guess.game_id, &guess.user_id);
        self.events.publish(&channel, GameEvent::Guess(guess));
        self.events.publish(&channel, GameEvent::State(state));
        Ok(())
    }
}
