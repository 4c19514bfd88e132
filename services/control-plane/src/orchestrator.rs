//! Deployment orchestrator (spec §4.6, C5): owns `createBot`/`deploy`/`release`.

use crate::adapters::{BotConfig, PlatformAdapter};
use crate::errors::CoordinatorError;
use crate::models::{Bot, BotStatus, CreateBotRequest, DeploymentPlatform};
use crate::router::{PlacementOutcome, Router};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

const WAITING_ROOM_MIN_MS: i32 = 5 * 60 * 1000;
const NO_ONE_JOINED_MIN_MS: i32 = 60 * 1000;
const EVERYONE_LEFT_MIN_MS: i32 = 60 * 1000;
const INACTIVITY_MIN_MS: i32 = 5 * 60 * 1000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: i32 = 10_000;
const DEFAULT_DISPLAY_NAME: &str = "Meeboter";
const DEFAULT_QUEUE_TIMEOUT_MS: i64 = 5 * 60 * 1000;
const IMMEDIATE_DEPLOY_WINDOW: ChronoDuration = ChronoDuration::minutes(5);

pub struct DeployOutcome {
    pub bot: Bot,
    pub placement: Option<PlacementOutcome>,
}

pub struct Orchestrator {
    db: PgPool,
    router: Router,
    adapters: HashMap<DeploymentPlatform, Arc<dyn PlatformAdapter>>,
}

impl Orchestrator {
    pub fn new(db: PgPool, router: Router, adapters: HashMap<DeploymentPlatform, Arc<dyn PlatformAdapter>>) -> Self {
        Self { db, router, adapters }
    }

    /// Checking quota is an external collaborator's job (spec §1); this is a
    /// seam for a future quota service, always-allow until one exists.
    async fn check_quota(&self, _owner_user_id: &str) -> Result<(), CoordinatorError> {
        Ok(())
    }

    pub async fn create_bot(&self, owner_user_id: &str, req: CreateBotRequest) -> Result<DeployOutcome, CoordinatorError> {
        self.check_quota(owner_user_id).await?;

        let waiting_room_timeout_ms = req.waiting_room_timeout_ms.unwrap_or(WAITING_ROOM_MIN_MS).max(WAITING_ROOM_MIN_MS);
        let no_one_joined_timeout_ms = req.no_one_joined_timeout_ms.unwrap_or(NO_ONE_JOINED_MIN_MS).max(NO_ONE_JOINED_MIN_MS);
        let everyone_left_timeout_ms = req.everyone_left_timeout_ms.unwrap_or(EVERYONE_LEFT_MIN_MS).max(EVERYONE_LEFT_MIN_MS);
        let inactivity_timeout_ms = req.inactivity_timeout_ms.unwrap_or(INACTIVITY_MIN_MS).max(INACTIVITY_MIN_MS);
        let heartbeat_interval_ms = req.heartbeat_interval_ms.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        let chat_enabled = req.chat_enabled.unwrap_or(true);
        let recording_enabled = req.recording_enabled.unwrap_or(false);
        let display_name = req.display_name.unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        let bot = sqlx::query_as::<_, Bot>(
            r#"
            INSERT INTO bots (
                owner_user_id, meeting_platform, join_url, join_id, join_password,
                tenant_id, organizer_id, display_name, avatar_url,
                recording_enabled, chat_enabled, start_time, end_time, timezone,
                heartbeat_interval_ms, waiting_room_timeout_ms, no_one_joined_timeout_ms,
                everyone_left_timeout_ms, inactivity_timeout_ms, webhook_url,
                status, log_level
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, 'ready_to_deploy', 'info'
            )
            RETURNING *
            "#,
        )
        .bind(owner_user_id)
        .bind(req.meeting_platform)
        .bind(&req.join_url)
        .bind(&req.join_id)
        .bind(&req.join_password)
        .bind(&req.tenant_id)
        .bind(&req.organizer_id)
        .bind(&display_name)
        .bind(&req.avatar_url)
        .bind(recording_enabled)
        .bind(chat_enabled)
        .bind(req.start_time)
        .bind(req.end_time)
        .bind(&req.timezone)
        .bind(heartbeat_interval_ms)
        .bind(waiting_room_timeout_ms)
        .bind(no_one_joined_timeout_ms)
        .bind(everyone_left_timeout_ms)
        .bind(inactivity_timeout_ms)
        .bind(&req.webhook_url)
        .fetch_one(&self.db)
        .await?;

        if Self::should_deploy_immediately(bot.start_time) {
            let outcome = self.deploy(bot.id, None).await?;
            Ok(outcome)
        } else {
            Ok(DeployOutcome { bot, placement: None })
        }
    }

    pub fn should_deploy_immediately(start_time: Option<chrono::DateTime<Utc>>) -> bool {
        match start_time {
            None => true,
            Some(t) => t - Utc::now() <= IMMEDIATE_DEPLOY_WINDOW,
        }
    }

    pub async fn deploy(&self, bot_id: i64, queue_timeout_ms: Option<i64>) -> Result<DeployOutcome, CoordinatorError> {
        let bot = sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = $1")
            .bind(bot_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(CoordinatorError::Authorization)?;

        sqlx::query("UPDATE bots SET status = 'deploying' WHERE id = $1")
            .bind(bot_id)
            .execute(&self.db)
            .await?;

        let mut config = BotConfig::from_bot(&bot);
        config.queue_timeout_ms = Some(queue_timeout_ms.unwrap_or(DEFAULT_QUEUE_TIMEOUT_MS));
        match self.router.place(bot_id, config).await {
            Ok(placement @ PlacementOutcome::Placed { .. }) => {
                let bot = self.reload(bot_id).await?;
                Ok(DeployOutcome { bot, placement: Some(placement) })
            }
            Ok(placement @ PlacementOutcome::Queued { .. }) => {
                let bot = self.reload(bot_id).await?;
                Ok(DeployOutcome { bot, placement: Some(placement) })
            }
            Err(e) => {
                error!(bot_id, error = %e, "deploy failed, marking bot fatal");
                sqlx::query("UPDATE bots SET status = 'fatal', deployment_error = $1 WHERE id = $2")
                    .bind(e.to_string())
                    .bind(bot_id)
                    .execute(&self.db)
                    .await?;
                Err(e)
            }
        }
    }

    pub async fn release(&self, bot_id: i64) -> Result<(), CoordinatorError> {
        let bot = sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = $1")
            .bind(bot_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(CoordinatorError::Authorization)?;

        if let Some(platform) = bot.deployment_platform {
            if let Some(adapter) = self.adapters.get(&platform) {
                adapter.release(bot_id).await?;
            }
        }
        self.router.process_queue().await?;
        info!(bot_id, "released and pumped global queue");
        Ok(())
    }

    async fn reload(&self, bot_id: i64) -> Result<Bot, CoordinatorError> {
        sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = $1")
            .bind(bot_id)
            .fetch_one(&self.db)
            .await
            .map_err(CoordinatorError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_deploy_when_start_time_absent() {
        assert!(Orchestrator::should_deploy_immediately(None));
    }

    #[test]
    fn immediate_deploy_within_five_minutes() {
        let t = Utc::now() + ChronoDuration::minutes(3);
        assert!(Orchestrator::should_deploy_immediately(Some(t)));
    }

    #[test]
    fn deferred_deploy_beyond_five_minutes() {
        let t = Utc::now() + ChronoDuration::minutes(10);
        assert!(!Orchestrator::should_deploy_immediately(Some(t)));
    }
}
