//! Bot RPC surface (spec §6): CRUD plus deploy/cancel/remove-from-call,
//! each gated by an ownership check against the authenticated caller.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::{errors::CoordinatorError, middleware::AuthContext, models::*, AppState};

async fn get_owned_bot(state: &AppState, auth: &AuthContext, bot_id: i64) -> Result<Bot, CoordinatorError> {
    let bot = sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = $1")
        .bind(bot_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(CoordinatorError::Authorization)?;

    if bot.owner_user_id != auth.user_id {
        return Err(CoordinatorError::Authorization);
    }
    Ok(bot)
}

/// POST /bots
pub async fn create_bot(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateBotRequest>,
) -> Result<Json<Bot>, CoordinatorError> {
    req.validate().map_err(|e| CoordinatorError::Validation(e.to_string()))?;

    let outcome = state.orchestrator.create_bot(&auth.user_id, req).await?;
    info!(bot_id = outcome.bot.id, owner = %auth.user_id, "bot created");
    Ok(Json(outcome.bot))
}

/// GET /bots
pub async fn list_bots(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ListBotsResponse>, CoordinatorError> {
    let bots: Vec<Bot> = sqlx::query_as("SELECT * FROM bots WHERE owner_user_id = $1 ORDER BY created_at DESC")
        .bind(&auth.user_id)
        .fetch_all(&state.db)
        .await?;
    let total = bots.len() as i64;
    Ok(Json(ListBotsResponse { bots, total }))
}

/// GET /bots/:id
pub async fn get_bot(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(bot_id): Path<i64>,
) -> Result<Json<Bot>, CoordinatorError> {
    let bot = get_owned_bot(&state, &auth, bot_id).await?;
    Ok(Json(bot))
}

/// PATCH /bots/:id
pub async fn update_bot(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(bot_id): Path<i64>,
    Json(req): Json<UpdateBotRequest>,
) -> Result<Json<Bot>, CoordinatorError> {
    get_owned_bot(&state, &auth, bot_id).await?;

    let bot = sqlx::query_as::<_, Bot>(
        r#"
        UPDATE bots SET
            display_name = COALESCE($1, display_name),
            recording_enabled = COALESCE($2, recording_enabled),
            chat_enabled = COALESCE($3, chat_enabled),
            webhook_url = COALESCE($4, webhook_url)
        WHERE id = $5
        RETURNING *
        "#,
    )
    .bind(&req.display_name)
    .bind(req.recording_enabled)
    .bind(req.chat_enabled)
    .bind(&req.webhook_url)
    .bind(bot_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(bot))
}

/// POST /bots/:id/deploy
pub async fn deploy_bot(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(bot_id): Path<i64>,
    Json(req): Json<DeployBotRequest>,
) -> Result<Json<Bot>, CoordinatorError> {
    get_owned_bot(&state, &auth, bot_id).await?;
    let outcome = state.orchestrator.deploy(bot_id, req.queue_timeout_ms).await?;
    Ok(Json(outcome.bot))
}

/// POST /bots/:id/cancel - withdraw a bot still waiting on a queue.
pub async fn cancel_deployment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(bot_id): Path<i64>,
) -> Result<Json<Bot>, CoordinatorError> {
    let bot = get_owned_bot(&state, &auth, bot_id).await?;
    if !matches!(bot.status, BotStatus::Queued | BotStatus::Deploying) {
        return Err(CoordinatorError::Precondition("bot is not queued or deploying".to_string()));
    }

    sqlx::query("DELETE FROM global_queue WHERE bot_id = $1").bind(bot_id).execute(&state.db).await?;
    sqlx::query("DELETE FROM pool_queue WHERE bot_id = $1").bind(bot_id).execute(&state.db).await?;

    let bot = sqlx::query_as::<_, Bot>(
        "UPDATE bots SET status = 'fatal', deployment_error = 'cancelled by owner' WHERE id = $1 RETURNING *",
    )
    .bind(bot_id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(bot))
}

/// POST /bots/:id/remove-from-call - operator-triggered transition into LEAVING.
pub async fn remove_from_call(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(bot_id): Path<i64>,
) -> Result<Json<Bot>, CoordinatorError> {
    let bot = get_owned_bot(&state, &auth, bot_id).await?;
    if bot.status != BotStatus::InCall {
        return Err(CoordinatorError::Precondition("bot is not in a call".to_string()));
    }
    let bot = sqlx::query_as::<_, Bot>("UPDATE bots SET status = 'leaving' WHERE id = $1 RETURNING *")
        .bind(bot_id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(bot))
}

/// DELETE /bots/:id
pub async fn delete_bot(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(bot_id): Path<i64>,
) -> Result<StatusCode, CoordinatorError> {
    let bot = get_owned_bot(&state, &auth, bot_id).await?;
    if !bot.status.is_terminal() {
        if let Err(e) = state.orchestrator.release(bot_id).await {
            tracing::warn!(bot_id, error = %e, "release failed during delete, removing row anyway");
        }
    }
    sqlx::query("DELETE FROM bots WHERE id = $1").bind(bot_id).execute(&state.db).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(serde::Serialize)]
pub struct ActiveBotCountResponse {
    pub count: i64,
}

/// GET /bots/active-count
pub async fn get_active_bot_count(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ActiveBotCountResponse>, CoordinatorError> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM bots
        WHERE owner_user_id = $1
          AND status IN ('deploying', 'joining_call', 'in_waiting_room', 'in_call', 'leaving')
        "#,
    )
    .bind(&auth.user_id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(ActiveBotCountResponse { count }))
}

const MAX_SCREENSHOTS: usize = 50;

/// POST /bots/:id/screenshots - append a screenshot, evicting the oldest
/// once the stored set reaches 50 (spec §8 testable property).
pub async fn add_screenshot(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(bot_id): Path<i64>,
    Json(req): Json<AddScreenshotRequest>,
) -> Result<StatusCode, CoordinatorError> {
    get_owned_bot(&state, &auth, bot_id).await?;

    let existing: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT screenshots FROM bots WHERE id = $1").bind(bot_id).fetch_one(&state.db).await?;

    let mut shots: Vec<ScreenshotMeta> =
        existing.and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default();

    shots.push(ScreenshotMeta {
        captured_at: chrono::Utc::now(),
        url: req.url,
        width: req.width,
        height: req.height,
    });
    if shots.len() > MAX_SCREENSHOTS {
        let overflow = shots.len() - MAX_SCREENSHOTS;
        shots.drain(0..overflow);
    }

    sqlx::query("UPDATE bots SET screenshots = $1 WHERE id = $2")
        .bind(serde_json::to_value(&shots).map_err(|e| CoordinatorError::Other(e.into()))?)
        .bind(bot_id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /bots/:id/log-level
pub async fn update_log_level(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(bot_id): Path<i64>,
    Json(req): Json<UpdateLogLevelRequest>,
) -> Result<StatusCode, CoordinatorError> {
    get_owned_bot(&state, &auth, bot_id).await?;
    sqlx::query("UPDATE bots SET log_level = $1 WHERE id = $2")
        .bind(req.log_level)
        .bind(bot_id)
        .execute(&state.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screenshot_cap_matches_spec() {
        assert_eq!(MAX_SCREENSHOTS, 50);
    }
}
