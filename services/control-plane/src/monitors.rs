//! Lifecycle monitors (spec §4.8, C6): three independent background loops
//! that keep the persisted world consistent with the external runtimes -
//! heartbeat timeouts, pool-slot recovery, and orphan reconciliation.

use crate::adapters::PlatformAdapter;
use crate::errors::CoordinatorError;
use crate::models::DeploymentPlatform;
use crate::router::Router;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const MONITOR_INTERVAL: Duration = Duration::from_secs(5 * 60);
const HEARTBEAT_STALE_MINUTES: i64 = 10;
const DEPLOYING_STALE_HEARTBEAT_MINUTES: i64 = 10;
const DEPLOYING_NO_HEARTBEAT_MINUTES: i64 = 30;
const SLOT_STALE_DEPLOYING_MINUTES: i64 = 15;
const SLOT_FRESH_HEARTBEAT_MINUTES: i64 = 5;
const CONSECUTIVE_SKIPS_BEFORE_FORCE_HEALTHY: u32 = 3;
const RECOVERY_ATTEMPTS_BEFORE_DELETE: i32 = 3;

#[derive(Clone)]
pub struct Monitors {
    db: PgPool,
    adapters: HashMap<DeploymentPlatform, Arc<dyn PlatformAdapter>>,
    router: Arc<Router>,
    /// Consecutive "fresh heartbeat, slot still deploying" skips per slot id,
    /// reset to 0 once the slot is corrected or actually recovered.
    skip_counts: Arc<Mutex<HashMap<i64, u32>>>,
}

impl Monitors {
    pub fn new(
        db: PgPool,
        adapters: HashMap<DeploymentPlatform, Arc<dyn PlatformAdapter>>,
        router: Arc<Router>,
    ) -> Self {
        Self { db, adapters, router, skip_counts: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Spawns all three loops on the current tokio runtime. Intended to be
    /// called once, from `main`, after the app's adapters are constructed.
    pub fn spawn_all(self: Arc<Self>) {
        let hb = self.clone();
        tokio::spawn(async move { hb.run_heartbeat_loop().await });
        let sr = self.clone();
        tokio::spawn(async move { sr.run_slot_recovery_loop().await });
        let orphan = self;
        tokio::spawn(async move { orphan.run_orphan_reconciler_loop().await });
    }

    async fn run_heartbeat_loop(&self) {
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = self.heartbeat_timeout_tick().await {
                error!(error = %e, "heartbeat-timeout monitor tick failed");
            }
        }
    }

    async fn run_slot_recovery_loop(&self) {
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = self.slot_recovery_tick().await {
                error!(error = %e, "slot-recovery monitor tick failed");
            }
        }
    }

    async fn run_orphan_reconciler_loop(&self) {
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = self.orphan_reconciler_tick().await {
                error!(error = %e, "orphan reconciler tick failed");
            }
        }
    }

    /// Spec §4.8 "Heartbeat-timeout monitor": three independent conditions,
    /// each with its own reason string, each resolved via adapter-release.
    pub async fn heartbeat_timeout_tick(&self) -> Result<(), CoordinatorError> {
        let in_progress: Vec<(i64, Option<DeploymentPlatform>)> = sqlx::query_as(
            r#"
            SELECT id, deployment_platform FROM bots
            WHERE status IN ('joining_call', 'in_waiting_room', 'in_call', 'leaving')
              AND (last_heartbeat_at < NOW() - ($1 || ' minutes')::interval OR last_heartbeat_at IS NULL)
            "#,
        )
        .bind(HEARTBEAT_STALE_MINUTES)
        .fetch_all(&self.db)
        .await?;
        for (bot_id, platform) in in_progress {
            self.fail_bot(
                bot_id,
                platform,
                "Bot crashed or stopped responding (no heartbeat for 5+ minutes)",
            )
            .await?;
        }

        let stalled_deploy: Vec<(i64, Option<DeploymentPlatform>)> = sqlx::query_as(
            r#"
            SELECT id, deployment_platform FROM bots
            WHERE status = 'deploying' AND last_heartbeat_at < NOW() - ($1 || ' minutes')::interval
            "#,
        )
        .bind(DEPLOYING_STALE_HEARTBEAT_MINUTES)
        .fetch_all(&self.db)
        .await?;
        for (bot_id, platform) in stalled_deploy {
            self.fail_bot(bot_id, platform, "Deployment stalled: no heartbeat for 10+ minutes").await?;
        }

        let never_started: Vec<(i64, Option<DeploymentPlatform>)> = sqlx::query_as(
            r#"
            SELECT id, deployment_platform FROM bots
            WHERE status = 'deploying' AND last_heartbeat_at IS NULL
              AND created_at < NOW() - ($1 || ' minutes')::interval
            "#,
        )
        .bind(DEPLOYING_NO_HEARTBEAT_MINUTES)
        .fetch_all(&self.db)
        .await?;
        for (bot_id, platform) in never_started {
            self.fail_bot(bot_id, platform, "Deployment stalled: no heartbeat since creation 30+ minutes ago").await?;
        }

        Ok(())
    }

    async fn fail_bot(
        &self,
        bot_id: i64,
        platform: Option<DeploymentPlatform>,
        reason: &str,
    ) -> Result<(), CoordinatorError> {
        sqlx::query("UPDATE bots SET status = 'fatal', deployment_error = $1 WHERE id = $2")
            .bind(reason)
            .bind(bot_id)
            .execute(&self.db)
            .await?;
        warn!(bot_id, reason, "heartbeat monitor marked bot fatal");

        if let Some(platform) = platform {
            if let Some(adapter) = self.adapters.get(&platform) {
                if let Err(e) = adapter.release(bot_id).await {
                    warn!(bot_id, error = %e, "adapter release failed during heartbeat-timeout cleanup");
                }
            }
        }
        self.router.process_queue().await
    }

    /// Spec §4.8 "Slot recovery": ERROR slots, or DEPLOYING slots stale for
    /// 15+ minutes, get a fresh-heartbeat grace period before being reset.
    pub async fn slot_recovery_tick(&self) -> Result<(), CoordinatorError> {
        let candidates: Vec<SlotCandidate> = sqlx::query_as::<_, SlotCandidate>(
            r#"
            SELECT id, platform, status, assigned_bot_id, recovery_attempts, application_uuid
            FROM pool_slots
            WHERE status = 'error'
               OR (status = 'deploying' AND last_used_at < NOW() - ($1 || ' minutes')::interval)
            "#,
        )
        .bind(SLOT_STALE_DEPLOYING_MINUTES)
        .fetch_all(&self.db)
        .await?;

        for slot in candidates {
            self.recover_slot(slot).await?;
        }
        Ok(())
    }

    async fn recover_slot(&self, slot: SlotCandidate) -> Result<(), CoordinatorError> {
        use crate::models::SlotStatus;

        if slot.status == SlotStatus::Deploying {
            if let Some(bot_id) = slot.assigned_bot_id {
                let last_heartbeat: Option<DateTime<Utc>> =
                    sqlx::query_scalar("SELECT last_heartbeat_at FROM bots WHERE id = $1")
                        .bind(bot_id)
                        .fetch_optional(&self.db)
                        .await?
                        .flatten();

                let is_fresh = last_heartbeat
                    .map(|t| Utc::now() - t < chrono::Duration::minutes(SLOT_FRESH_HEARTBEAT_MINUTES))
                    .unwrap_or(false);

                if is_fresh {
                    let mut skips = self.skip_counts.lock().await;
                    let count = skips.entry(slot.id).or_insert(0);
                    *count += 1;
                    if *count >= CONSECUTIVE_SKIPS_BEFORE_FORCE_HEALTHY {
                        info!(slot_id = slot.id, "forcing stale-but-heartbeating slot to healthy");
                        sqlx::query("UPDATE pool_slots SET status = 'healthy' WHERE id = $1")
                            .bind(slot.id)
                            .execute(&self.db)
                            .await?;
                        *count = 0;
                    }
                    return Ok(());
                }
            }
        }

        self.skip_counts.lock().await.remove(&slot.id);

        if slot.recovery_attempts >= RECOVERY_ATTEMPTS_BEFORE_DELETE {
            if let Some(bot_id) = slot.assigned_bot_id {
                sqlx::query("UPDATE bots SET status = 'fatal', deployment_error = 'pool slot exhausted recovery attempts' WHERE id = $1")
                    .bind(bot_id)
                    .execute(&self.db)
                    .await?;
            }
            if let Some(adapter) = self.adapters.get(&slot.platform) {
                if let Err(e) = adapter.stop(&slot.application_uuid).await {
                    warn!(slot_id = slot.id, error = %e, "stop during recovery-exhausted deletion failed, deleting row anyway");
                }
            }
            sqlx::query("DELETE FROM pool_slots WHERE id = $1").bind(slot.id).execute(&self.db).await?;
            warn!(slot_id = slot.id, "deleted pool slot after exhausting recovery attempts");
            return Ok(());
        }

        if let Some(bot_id) = slot.assigned_bot_id {
            sqlx::query("UPDATE bots SET status = 'fatal', deployment_error = 'pool slot recovery' WHERE id = $1")
                .bind(bot_id)
                .execute(&self.db)
                .await?;
        }

        let stop_result = match self.adapters.get(&slot.platform) {
            Some(adapter) => adapter.stop(&slot.application_uuid).await,
            None => Ok(()),
        };

        match stop_result {
            Ok(()) => {
                sqlx::query(
                    "UPDATE pool_slots SET status = 'idle', assigned_bot_id = NULL, recovery_attempts = 0 WHERE id = $1",
                )
                .bind(slot.id)
                .execute(&self.db)
                .await?;
                if let Some(adapter) = self.adapters.get(&slot.platform) {
                    if let Err(e) = adapter.process_queue().await {
                        warn!(slot_id = slot.id, error = %e, "process_queue after slot recovery failed");
                    }
                }
            }
            Err(e) => {
                warn!(slot_id = slot.id, error = %e, "stop failed during slot recovery, incrementing recovery_attempts");
                sqlx::query("UPDATE pool_slots SET status = 'error', recovery_attempts = recovery_attempts + 1 WHERE id = $1")
                    .bind(slot.id)
                    .execute(&self.db)
                    .await?;
            }
        }
        Ok(())
    }

    /// Spec §4.8 "Orphan reconciler". The pool backend's attested API has no
    /// list-applications call, so this only reconciles in the direction the
    /// database can see on its own: overflow-slot reservations whose
    /// placeholder application-uuid never got replaced (the create call
    /// crashed the process between insert and finalize).
    pub async fn orphan_reconciler_tick(&self) -> Result<(), CoordinatorError> {
        let stuck: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM pool_slots
            WHERE application_uuid LIKE 'pending-%'
              AND last_used_at < NOW() - ($1 || ' minutes')::interval
            "#,
        )
        .bind(SLOT_STALE_DEPLOYING_MINUTES)
        .fetch_all(&self.db)
        .await?;

        for slot_id in stuck {
            warn!(slot_id, "deleting pool slot stuck at placeholder application-uuid");
            sqlx::query("DELETE FROM pool_slots WHERE id = $1").bind(slot_id).execute(&self.db).await?;
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SlotCandidate {
    id: i64,
    platform: DeploymentPlatform,
    status: crate::models::SlotStatus,
    assigned_bot_id: Option<i64>,
    recovery_attempts: i32,
    application_uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_match_spec() {
        assert_eq!(HEARTBEAT_STALE_MINUTES, 10);
        assert_eq!(DEPLOYING_STALE_HEARTBEAT_MINUTES, 10);
        assert_eq!(DEPLOYING_NO_HEARTBEAT_MINUTES, 30);
        assert_eq!(SLOT_STALE_DEPLOYING_MINUTES, 15);
        assert_eq!(SLOT_FRESH_HEARTBEAT_MINUTES, 5);
        assert_eq!(CONSECUTIVE_SKIPS_BEFORE_FORCE_HEALTHY, 3);
        assert_eq!(RECOVERY_ATTEMPTS_BEFORE_DELETE, 3);
    }
}
