//! Per-bot event batching (spec §4.7): a bot's reported events are buffered
//! in memory and flushed to `events` in a single INSERT batch once 50
//! events accumulate or 100ms elapses, whichever comes first.

use crate::errors::CoordinatorError;
use crate::models::{Event, EventType};
use crate::observability::{metrics, MetricsCollector};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

const FLUSH_AT_COUNT: usize = 50;
const FLUSH_AFTER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_type: EventType,
    pub event_time: chrono::DateTime<chrono::Utc>,
    pub payload: Option<serde_json::Value>,
}

struct BotQueue {
    pending: Vec<PendingEvent>,
    flush_armed: bool,
}

/// Owns one buffer per bot id. `flush_armed` tracks whether a 100ms timer
/// is already scheduled for that bot, so concurrent `push`es don't spawn
/// redundant timers.
#[derive(Clone)]
pub struct EventQueueRegistry {
    db: PgPool,
    metrics: MetricsCollector,
    queues: Arc<Mutex<HashMap<i64, BotQueue>>>,
}

impl EventQueueRegistry {
    pub fn new(db: PgPool, metrics: MetricsCollector) -> Self {
        Self { db, metrics, queues: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Buffers one event, flushing immediately at the 50-event high-water
    /// mark or arming a 100ms timer if this is the first event since the
    /// last flush.
    pub async fn push(&self, bot_id: i64, event: PendingEvent) -> Result<(), CoordinatorError> {
        let should_spawn_timer;
        let should_flush_now;
        {
            let mut queues = self.queues.lock().await;
            let queue = queues.entry(bot_id).or_insert_with(|| BotQueue { pending: Vec::new(), flush_armed: false });
            queue.pending.push(event);

            should_flush_now = queue.pending.len() >= FLUSH_AT_COUNT;
            should_spawn_timer = !should_flush_now && !queue.flush_armed;
            if should_spawn_timer {
                queue.flush_armed = true;
            }
        }

        if should_flush_now {
            self.flush(bot_id).await?;
        } else if should_spawn_timer {
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(FLUSH_AFTER).await;
                if let Err(e) = this.flush(bot_id).await {
                    error!(bot_id, error = %e, "timed event flush failed");
                }
            });
        }

        Ok(())
    }

    /// Drains the buffer and writes it in one multi-row insert. A no-op if
    /// another caller already flushed first.
    pub async fn flush(&self, bot_id: i64) -> Result<(), CoordinatorError> {
        let batch = {
            let mut queues = self.queues.lock().await;
            match queues.get_mut(&bot_id) {
                Some(queue) => {
                    queue.flush_armed = false;
                    std::mem::take(&mut queue.pending)
                }
                None => return Ok(()),
            }
        };

        if batch.is_empty() {
            return Ok(());
        }

        let result = self.write_batch(bot_id, &batch).await;
        match &result {
            Ok(()) => self.metrics.increment(metrics::EVENTS_INGESTED, batch.len() as u64).await,
            Err(e) => {
                error!(bot_id, error = %e, dropped = batch.len(), "event batch flush failed, dropping batch");
                self.metrics.increment(metrics::EVENTS_DROPPED, batch.len() as u64).await;
            }
        }
        result
    }

    async fn write_batch(&self, bot_id: i64, batch: &[PendingEvent]) -> Result<(), CoordinatorError> {
        let mut tx = self.db.begin().await?;
        for event in batch {
            sqlx::query(
                "INSERT INTO events (bot_id, event_type, event_time, payload) VALUES ($1, $2, $3, $4)",
            )
            .bind(bot_id)
            .bind(event.event_type)
            .bind(event.event_time)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Forces a flush for every bot with a pending buffer; used on shutdown.
    pub async fn flush_all(&self) {
        let bot_ids: Vec<i64> = self.queues.lock().await.keys().copied().collect();
        for bot_id in bot_ids {
            if let Err(e) = self.flush(bot_id).await {
                warn!(bot_id, error = %e, "flush_all: failed to flush bot's event queue");
            }
        }
    }
}

pub async fn recent_events(db: &PgPool, bot_id: i64, limit: i64) -> Result<Vec<Event>, CoordinatorError> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM events WHERE bot_id = $1 ORDER BY event_time DESC LIMIT $2",
    )
    .bind(bot_id)
    .bind(limit)
    .fetch_all(db)
    .await?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_thresholds_match_spec() {
        assert_eq!(FLUSH_AT_COUNT, 50);
        assert_eq!(FLUSH_AFTER, Duration::from_millis(100));
    }
}
