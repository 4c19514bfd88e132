//! Pool slot manager (spec §4.2, C2).
//!
//! Owns the `pool_slots` and `pool_queue` tables for a single deployment
//! platform's fixed-size container pool (the Coolify/PaaS backend).
//! Acquisition races are resolved in Postgres via `FOR UPDATE SKIP LOCKED`
//! for existing idle slots and a transaction-scoped advisory lock for
//! slot-name allocation when the pool needs to grow.

use crate::concurrency::{DeploymentGate, ImagePullLockRegistry};
use crate::errors::CoordinatorError;
use crate::models::{DeploymentPlatform, PoolSlot, SlotStatus};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_POOL_SIZE: i64 = 100;
const LOCAL_QUEUE_TIMEOUT_CLAMP_MS: i64 = 10 * 60 * 1000;
const LOCAL_QUEUE_DEFAULT_TIMEOUT_MS: i64 = 5 * 60 * 1000;
const START_DEBOUNCE_SECS: i64 = 30;

pub enum AcquireOutcome {
    Acquired(PoolSlot),
    Queued { position: i64, estimated_wait_secs: i64 },
}

#[derive(Clone)]
pub struct PoolManager {
    db: PgPool,
    platform: DeploymentPlatform,
    deploy_gate: DeploymentGate,
    pull_locks: ImagePullLockRegistry,
}

impl PoolManager {
    pub fn new(
        db: PgPool,
        platform: DeploymentPlatform,
        deploy_gate: DeploymentGate,
        pull_locks: ImagePullLockRegistry,
    ) -> Self {
        Self {
            db,
            platform,
            deploy_gate,
            pull_locks,
        }
    }

    /// Atomic idle-slot acquisition; falls back to overflow creation, then
    /// to the local queue if the pool is already at `MAX_POOL_SIZE`.
    pub async fn acquire_or_create(
        &self,
        bot_id: i64,
        queue_timeout_ms: Option<i64>,
    ) -> Result<AcquireOutcome, CoordinatorError> {
        if let Some(slot) = self.try_acquire_idle(bot_id).await? {
            return Ok(AcquireOutcome::Acquired(slot));
        }

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pool_slots WHERE platform = $1",
        )
        .bind(self.platform)
        .fetch_one(&self.db)
        .await?;

        if total < MAX_POOL_SIZE {
            let slot = self.create_overflow_slot(bot_id).await?;
            return Ok(AcquireOutcome::Acquired(slot));
        }

        let timeout_ms = queue_timeout_ms
            .unwrap_or(LOCAL_QUEUE_DEFAULT_TIMEOUT_MS)
            .min(LOCAL_QUEUE_TIMEOUT_CLAMP_MS)
            .max(0);
        let position = self.enqueue(bot_id, timeout_ms).await?;
        Ok(AcquireOutcome::Queued {
            position,
            estimated_wait_secs: position * 30,
        })
    }

    async fn try_acquire_idle(&self, bot_id: i64) -> Result<Option<PoolSlot>, CoordinatorError> {
        let slot = sqlx::query_as::<_, PoolSlot>(
            r#"
            UPDATE pool_slots
            SET status = 'deploying', assigned_bot_id = $1, last_used_at = NOW()
            WHERE id = (
                SELECT id FROM pool_slots
                WHERE platform = $2 AND status = 'idle'
                ORDER BY last_used_at ASC NULLS FIRST
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(bot_id)
        .bind(self.platform)
        .fetch_optional(&self.db)
        .await?;
        Ok(slot)
    }

    /// Advisory-lock-serialized slot-name gap-finding, transaction-scoped so
    /// the lock releases before the slow backend create call runs.
    async fn create_overflow_slot(&self, bot_id: i64) -> Result<PoolSlot, CoordinatorError> {
        let lock_key = advisory_lock_key(self.platform);
        let mut tx = self.db.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(lock_key)
            .execute(&mut *tx)
            .await?;

        let prefix = format!("pool-{}-", self.platform.as_str());
        let existing: Vec<String> = sqlx::query_scalar(
            "SELECT slot_name FROM pool_slots WHERE platform = $1 ORDER BY slot_name",
        )
        .bind(self.platform)
        .fetch_all(&mut *tx)
        .await?;
        let next = smallest_gap(&existing, &prefix);
        let slot_name = format!("{}{:03}", prefix, next);
        let placeholder_uuid = format!("pending-{}", uuid_suffix());

        let slot = sqlx::query_as::<_, PoolSlot>(
            r#"
            INSERT INTO pool_slots (slot_name, platform, status, assigned_bot_id, application_uuid, recovery_attempts)
            VALUES ($1, $2, 'deploying', $3, $4, 0)
            RETURNING *
            "#,
        )
        .bind(&slot_name)
        .bind(self.platform)
        .bind(bot_id)
        .bind(&placeholder_uuid)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(slot)
    }

    /// Replaces a reservation's placeholder uuid with the real one once the
    /// backend app has been created, or deletes the reservation on failure.
    pub async fn finalize_overflow_slot(
        &self,
        slot_id: i64,
        real_uuid: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        match real_uuid {
            Some(uuid) => {
                sqlx::query("UPDATE pool_slots SET application_uuid = $1 WHERE id = $2")
                    .bind(uuid)
                    .bind(slot_id)
                    .execute(&self.db)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM pool_slots WHERE id = $1")
                    .bind(slot_id)
                    .execute(&self.db)
                    .await?;
            }
        }
        Ok(())
    }

    /// Marks the slot HEALTHY (success) or ERROR (failure). Called by the
    /// background task spawned after `startApplication` once the container
    /// is observed running or is given up on.
    pub async fn observe_start_outcome(&self, slot_id: i64, healthy: bool) -> Result<(), CoordinatorError> {
        let status = if healthy { SlotStatus::Healthy } else { SlotStatus::Error };
        sqlx::query("UPDATE pool_slots SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(slot_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Whether a start call within the last 30s makes this one redundant.
    pub async fn recently_started(&self, slot_id: i64) -> Result<bool, CoordinatorError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(START_DEBOUNCE_SECS);
        let row = sqlx::query(
            "SELECT last_used_at FROM pool_slots WHERE id = $1",
        )
        .bind(slot_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row
            .and_then(|r| r.try_get::<Option<chrono::DateTime<Utc>>, _>("last_used_at").ok().flatten())
            .map(|last| last > cutoff)
            .unwrap_or(false))
    }

    /// Stops the container and returns the slot to IDLE. On stop failure the
    /// caller should instead call `mark_error` to schedule recovery.
    pub async fn release(&self, bot_id: i64) -> Result<(), CoordinatorError> {
        sqlx::query(
            r#"
            UPDATE pool_slots
            SET status = 'idle', assigned_bot_id = NULL, recovery_attempts = 0, last_used_at = NOW()
            WHERE platform = $1 AND assigned_bot_id = $2
            "#,
        )
        .bind(self.platform)
        .bind(bot_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn mark_error(&self, bot_id: i64, message: &str) -> Result<(), CoordinatorError> {
        sqlx::query(
            "UPDATE pool_slots SET status = 'error', error_message = $1 WHERE platform = $2 AND assigned_bot_id = $3",
        )
        .bind(message)
        .bind(self.platform)
        .bind(bot_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn enqueue(&self, bot_id: i64, timeout_ms: i64) -> Result<i64, CoordinatorError> {
        sqlx::query(
            r#"
            INSERT INTO pool_queue (bot_id, platform, priority, queued_at, timeout_at)
            VALUES ($1, $2, 0, NOW(), NOW() + ($3 || ' milliseconds')::interval)
            "#,
        )
        .bind(bot_id)
        .bind(self.platform)
        .bind(timeout_ms)
        .execute(&self.db)
        .await?;

        let position: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pool_queue WHERE platform = $1 AND queued_at <= (SELECT queued_at FROM pool_queue WHERE bot_id = $2 AND platform = $1)",
        )
        .bind(self.platform)
        .bind(bot_id)
        .fetch_one(&self.db)
        .await?;
        Ok(position)
    }

    /// Cleans expired queue entries and, if a slot is now free, claims it
    /// for the queue head. Returns the claimed slot and bot id so the caller
    /// (`PoolAdapter`) can run the same configure-and-start sequence a
    /// direct deploy uses - claiming the slot here only flips it to
    /// DEPLOYING in the database, it does not start anything. Called after
    /// every successful `release`.
    pub async fn try_promote_queue_head(&self) -> Result<Option<(PoolSlot, i64)>, CoordinatorError> {
        let expired: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM pool_queue WHERE platform = $1 AND timeout_at <= NOW() RETURNING bot_id",
        )
        .bind(self.platform)
        .fetch_all(&self.db)
        .await?;
        for bot_id in expired {
            warn!(bot_id, platform = ?self.platform, "pool queue entry expired before a slot became free");
        }

        let head: Option<i64> = sqlx::query_scalar(
            "SELECT bot_id FROM pool_queue WHERE platform = $1 ORDER BY queued_at ASC LIMIT 1",
        )
        .bind(self.platform)
        .fetch_optional(&self.db)
        .await?;

        let Some(bot_id) = head else {
            return Ok(None);
        };

        let Some(slot) = self.try_acquire_idle(bot_id).await? else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM pool_queue WHERE bot_id = $1 AND platform = $2")
            .bind(bot_id)
            .bind(self.platform)
            .execute(&self.db)
            .await?;
        info!(bot_id, slot_id = slot.id, "claimed released slot for queued bot");
        Ok(Some((slot, bot_id)))
    }

    pub async fn pool_stats(&self) -> Result<crate::models::PoolStats, CoordinatorError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'idle') AS idle,
                COUNT(*) FILTER (WHERE status = 'deploying') AS deploying,
                COUNT(*) FILTER (WHERE status = 'healthy') AS healthy,
                COUNT(*) FILTER (WHERE status = 'error') AS error,
                COUNT(*) AS total
            FROM pool_slots WHERE platform = $1
            "#,
        )
        .bind(self.platform)
        .fetch_one(&self.db)
        .await?;

        Ok(crate::models::PoolStats {
            platform: self.platform,
            idle: row.try_get("idle")?,
            deploying: row.try_get("deploying")?,
            healthy: row.try_get("healthy")?,
            error: row.try_get("error")?,
            total: row.try_get("total")?,
            max_size: MAX_POOL_SIZE,
        })
    }

    pub async fn queue_stats(&self) -> Result<crate::models::QueueStats, CoordinatorError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS length,
                MIN(queued_at) AS oldest_queued_at,
                AVG(EXTRACT(EPOCH FROM (NOW() - queued_at)) * 1000) AS mean_wait_ms
            FROM pool_queue WHERE platform = $1
            "#,
        )
        .bind(self.platform)
        .fetch_one(&self.db)
        .await?;

        Ok(crate::models::QueueStats {
            platform: self.platform,
            length: row.try_get("length")?,
            oldest_queued_at: row.try_get("oldest_queued_at")?,
            mean_wait_ms: row.try_get("mean_wait_ms")?,
        })
    }

    pub async fn find_by_application_uuid(&self, application_uuid: &str) -> Result<Option<PoolSlot>, CoordinatorError> {
        let slot = sqlx::query_as::<_, PoolSlot>("SELECT * FROM pool_slots WHERE application_uuid = $1")
            .bind(application_uuid)
            .fetch_optional(&self.db)
            .await?;
        Ok(slot)
    }

    pub fn deploy_gate(&self) -> &DeploymentGate {
        &self.deploy_gate
    }

    pub fn pull_locks(&self) -> &ImagePullLockRegistry {
        &self.pull_locks
    }

    pub fn db_pool(&self) -> &PgPool {
        &self.db
    }
}

/// Deterministic per-platform key for `pg_advisory_xact_lock`, keeping slot
/// name allocation serialized per platform without a dedicated lock table.
fn advisory_lock_key(platform: DeploymentPlatform) -> i64 {
    0x706f6f6c_0000 | platform as i64
}

fn smallest_gap(existing_names: &[String], prefix: &str) -> u32 {
    let mut used: Vec<u32> = existing_names
        .iter()
        .filter_map(|name| name.strip_prefix(prefix))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .collect();
    used.sort_unstable();
    let mut candidate = 1;
    for n in used.drain(..) {
        if n == candidate {
            candidate += 1;
        } else if n > candidate {
            break;
        }
    }
    candidate
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_gap_finds_first_hole() {
        let names = vec![
            "pool-coolify-001".to_string(),
            "pool-coolify-002".to_string(),
            "pool-coolify-004".to_string(),
        ];
        assert_eq!(smallest_gap(&names, "pool-coolify-"), 3);
    }

    #[test]
    fn smallest_gap_on_empty_pool_is_one() {
        let names: Vec<String> = vec![];
        assert_eq!(smallest_gap(&names, "pool-coolify-"), 1);
    }
}
