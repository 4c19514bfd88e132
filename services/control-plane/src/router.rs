//! Hybrid router (spec §4.4, C4): walks the configured platform priority
//! list and falls back to a global wait queue when every platform refuses.

use crate::adapters::{BotConfig, DeployResult, PlatformAdapter};
use crate::config::PlatformConfigState;
use crate::errors::CoordinatorError;
use crate::models::{BotStatus, DeploymentPlatform};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub enum PlacementOutcome {
    Placed {
        platform: DeploymentPlatform,
        identifier: String,
        slot_name: Option<String>,
    },
    Queued {
        position: i64,
        estimated_wait_secs: i64,
    },
}

pub struct Router {
    db: PgPool,
    config: PlatformConfigState,
    adapters: HashMap<DeploymentPlatform, Arc<dyn PlatformAdapter>>,
}

impl Router {
    pub fn new(
        db: PgPool,
        config: PlatformConfigState,
        adapters: HashMap<DeploymentPlatform, Arc<dyn PlatformAdapter>>,
    ) -> Self {
        Self { db, config, adapters }
    }

    async fn active_count(&self, platform: DeploymentPlatform) -> Result<i64, CoordinatorError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM bots
            WHERE deployment_platform = $1
              AND status IN ('deploying', 'joining_call', 'in_waiting_room', 'in_call', 'leaving')
            "#,
        )
        .bind(platform)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// Walks platforms in priority order; returns `Queued` if every
    /// platform is at capacity or refuses.
    pub async fn place(&self, bot_id: i64, config: BotConfig) -> Result<PlacementOutcome, CoordinatorError> {
        for platform in &self.config.enabled_platforms {
            let Some(limit) = self.config.limit_for(*platform) else {
                continue;
            };
            let active = self.active_count(*platform).await?;
            if active >= limit as i64 {
                continue;
            }

            let Some(adapter) = self.adapters.get(platform) else {
                warn!(?platform, "platform enabled but no adapter registered, skipping");
                continue;
            };

            match adapter.deploy(config.clone()).await {
                Ok(DeployResult::Placed { identifier, slot_name }) if !identifier.is_empty() => {
                    self.persist_placement(bot_id, *platform, &identifier).await?;
                    return Ok(PlacementOutcome::Placed {
                        platform: *platform,
                        identifier,
                        slot_name,
                    });
                }
                Ok(DeployResult::Placed { .. }) => {
                    error!(bot_id, ?platform, "adapter reported success with empty identifier");
                    continue;
                }
                Ok(DeployResult::Queued { position, estimated_wait_secs }) => {
                    // The pool adapter's own local queue already holds this
                    // bot; don't double-queue it globally (spec §9 Open Question).
                    self.persist_queued_local(bot_id, *platform).await?;
                    return Ok(PlacementOutcome::Queued { position, estimated_wait_secs });
                }
                Ok(DeployResult::Refused(reason)) => {
                    info!(bot_id, ?platform, reason = %reason, "platform refused placement");
                    continue;
                }
                Err(CoordinatorError::PlacementRefused(reason)) => {
                    info!(bot_id, ?platform, reason = %reason, "placement refused");
                    continue;
                }
                Err(e) => {
                    warn!(bot_id, ?platform, error = %e, "adapter errored during deploy, continuing to next platform");
                    continue;
                }
            }
        }

        let position = self.add_to_global_queue(bot_id).await?;
        Ok(PlacementOutcome::Queued {
            position,
            estimated_wait_secs: position * 30,
        })
    }

    async fn persist_placement(
        &self,
        bot_id: i64,
        platform: DeploymentPlatform,
        identifier: &str,
    ) -> Result<(), CoordinatorError> {
        sqlx::query(
            "UPDATE bots SET deployment_platform = $1, platform_identifier = $2, status = 'deploying' WHERE id = $3",
        )
        .bind(platform)
        .bind(identifier)
        .bind(bot_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn persist_queued_local(&self, bot_id: i64, platform: DeploymentPlatform) -> Result<(), CoordinatorError> {
        sqlx::query("UPDATE bots SET deployment_platform = $1, status = 'queued' WHERE id = $2")
            .bind(platform)
            .bind(bot_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Idempotent on bot-id: a re-insertion returns the existing position.
    async fn add_to_global_queue(&self, bot_id: i64) -> Result<i64, CoordinatorError> {
        let timeout_ms = self.config.global_queue_timeout.as_millis() as i64;
        sqlx::query(
            r#"
            INSERT INTO global_queue (bot_id, priority, queued_at, timeout_at, status)
            VALUES ($1, 0, NOW(), NOW() + ($2 || ' milliseconds')::interval, 'waiting')
            ON CONFLICT (bot_id) DO NOTHING
            "#,
        )
        .bind(bot_id)
        .bind(timeout_ms)
        .execute(&self.db)
        .await?;

        sqlx::query("UPDATE bots SET status = 'queued' WHERE id = $1")
            .bind(bot_id)
            .execute(&self.db)
            .await?;

        let position: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM global_queue
            WHERE status = 'waiting'
              AND (priority, queued_at) <= (
                  SELECT priority, queued_at FROM global_queue WHERE bot_id = $1
              )
            "#,
        )
        .bind(bot_id)
        .fetch_one(&self.db)
        .await?;
        Ok(position)
    }

    /// Marks entries past their deadline EXPIRED, then attempts to place the
    /// single WAITING head. Called after every release (spec §4.4).
    pub async fn process_queue(&self) -> Result<(), CoordinatorError> {
        sqlx::query("UPDATE global_queue SET status = 'expired' WHERE status = 'waiting' AND timeout_at <= NOW()")
            .execute(&self.db)
            .await?;

        let mut tx = self.db.begin().await?;
        let head = sqlx::query_as::<_, (i64, i64)>(
            r#"
            UPDATE global_queue SET status = 'processing'
            WHERE id = (
                SELECT id FROM global_queue WHERE status = 'waiting'
                ORDER BY priority ASC, queued_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED
            )
            RETURNING id, bot_id
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        let Some((queue_id, bot_id)) = head else {
            return Ok(());
        };

        let bot = sqlx::query_as::<_, crate::models::Bot>("SELECT * FROM bots WHERE id = $1")
            .bind(bot_id)
            .fetch_optional(&self.db)
            .await?;

        let Some(bot) = bot else {
            sqlx::query("DELETE FROM global_queue WHERE id = $1").bind(queue_id).execute(&self.db).await?;
            return Ok(());
        };

        if bot.status != BotStatus::Queued {
            sqlx::query("DELETE FROM global_queue WHERE id = $1").bind(queue_id).execute(&self.db).await?;
            return Ok(());
        }

        let config = BotConfig::from_bot(&bot);
        match self.place(bot_id, config).await {
            Ok(PlacementOutcome::Placed { .. }) => {
                sqlx::query("DELETE FROM global_queue WHERE id = $1").bind(queue_id).execute(&self.db).await?;
            }
            _ => {
                sqlx::query("UPDATE global_queue SET status = 'waiting' WHERE id = $1")
                    .bind(queue_id)
                    .execute(&self.db)
                    .await?;
            }
        }
        Ok(())
    }
}
