//! Bot container contract (spec §4.7, C7): heartbeat fast-path, batched
//! event ingest, terminal-state handling, and the pool-slot config lookup a
//! container uses on startup. These endpoints are intentionally
//! ownership-check-free (spec §6) - the caller is the bot container itself,
//! authenticated by possessing its own bot id / slot uuid, not a user token.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    concurrency::event_queue::PendingEvent,
    errors::CoordinatorError,
    models::*,
    observability::metrics,
    AppState,
};

const HEARTBEAT_QUERY_WARN_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(1);

/// POST /bot/:id/heartbeat
pub async fn send_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<i64>,
) -> Result<Json<HeartbeatResponse>, CoordinatorError> {
    let started = std::time::Instant::now();

    let row = sqlx::query_as::<_, (BotStatus, LogLevel)>(
        "SELECT status, log_level FROM bots WHERE id = $1",
    )
    .bind(bot_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(CoordinatorError::Authorization)?;

    sqlx::query("UPDATE bots SET last_heartbeat_at = NOW() WHERE id = $1")
        .bind(bot_id)
        .execute(&state.db)
        .await?;

    let elapsed = started.elapsed();
    state.metrics.histogram(metrics::HEARTBEAT_DURATION_MS, elapsed.as_millis() as f64).await;
    state.metrics.increment(metrics::HEARTBEAT_COUNT, 1).await;
    if elapsed > HEARTBEAT_QUERY_WARN_THRESHOLD {
        warn!(bot_id, elapsed_ms = elapsed.as_millis() as u64, "heartbeat select+update exceeded 1s");
    }

    let (status, log_level) = row;
    let should_leave = status == BotStatus::Leaving;
    Ok(Json(HeartbeatResponse { should_leave, log_level }))
}

/// POST /bot/:id/events
pub async fn report_event(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<i64>,
    Json(req): Json<ReportEventRequest>,
) -> Result<StatusCode, CoordinatorError> {
    state
        .event_queues
        .push(
            bot_id,
            PendingEvent { event_type: req.event_type, event_time: req.event_time, payload: req.payload },
        )
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /bot/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<StatusCode, CoordinatorError> {
    let mut tx = state.db.begin().await?;

    let row = sqlx::query_as::<_, (bool, Option<String>, Option<DeploymentPlatform>, Option<String>)>(
        "SELECT recording_enabled, webhook_url, deployment_platform, platform_identifier FROM bots WHERE id = $1 FOR UPDATE",
    )
    .bind(bot_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(CoordinatorError::Authorization)?;

    let (recording_enabled, webhook_url, _deployment_platform, platform_identifier) = row;

    if req.status == BotStatus::Done && recording_enabled && req.recording_url.is_none() {
        return Err(CoordinatorError::Precondition(
            "bot has recording enabled but no recording URL was supplied for DONE".to_string(),
        ));
    }

    sqlx::query(
        r#"
        UPDATE bots SET
            status = $1,
            recording_url = COALESCE($2, recording_url),
            speaker_timeline = COALESCE($3, speaker_timeline)
        WHERE id = $4
        "#,
    )
    .bind(req.status)
    .bind(&req.recording_url)
    .bind(&req.speaker_timeline)
    .bind(bot_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    if req.status == BotStatus::Done {
        if let Some(url) = webhook_url {
            let webhooks = state.webhooks.clone();
            let recording_url = req.recording_url.clone();
            tokio::spawn(async move {
                webhooks.notify_bot_done(&url, bot_id, recording_url.as_deref()).await;
            });
        }
    }

    if matches!(req.status, BotStatus::Done | BotStatus::Fatal) && platform_identifier.is_some() {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = state.orchestrator.release(bot_id).await {
                warn!(bot_id, error = %e, "fire-and-forget release after terminal status failed");
            }
        });
    }

    info!(bot_id, status = ?req.status, "bot status updated by container");
    Ok(StatusCode::OK)
}

/// GET /pool-slot/:uuid - a pool-backed container's startup config fetch.
pub async fn get_pool_slot(
    State(state): State<Arc<AppState>>,
    Path(application_uuid): Path<String>,
) -> Result<Json<BotConfigProjection>, CoordinatorError> {
    let bot_id: Option<i64> =
        sqlx::query_scalar("SELECT assigned_bot_id FROM pool_slots WHERE application_uuid = $1")
            .bind(&application_uuid)
            .fetch_optional(&state.db)
            .await?
            .flatten();

    let bot_id = bot_id.ok_or(CoordinatorError::Authorization)?;

    let bot = sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = $1")
        .bind(bot_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(CoordinatorError::Authorization)?;

    if bot.status.is_terminal() {
        return Err(CoordinatorError::Precondition("container should exit".to_string()));
    }

    Ok(Json(BotConfigProjection::from_bot(&bot)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_leave_only_for_leaving_status() {
        assert!(BotStatus::Leaving == BotStatus::Leaving);
        assert!(BotStatus::InCall != BotStatus::Leaving);
    }
}
