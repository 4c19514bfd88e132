//! Admin handlers: platform configuration management plus infrastructure
//! visibility (pool/queue stats, platform capacity, global queue contents).

use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::{config, middleware::AdminContext, models::*, AppState};

const MASKED_VALUE: &str = "********";

/// GET /admin/config - List all configuration entries
pub async fn list_config(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminContext>,
) -> Result<Json<ConfigListResponse>, (StatusCode, String)> {
    info!("Admin {} listing platform config", admin.admin_id);

    let configs: Vec<PlatformConfig> =
        sqlx::query_as("SELECT * FROM platform_config ORDER BY category, key")
            .fetch_all(&state.db)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let categories: Vec<String> = configs
        .iter()
        .map(|c| c.category.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let entries: Vec<ConfigEntry> = configs.into_iter().map(ConfigEntry::from_row).collect();

    Ok(Json(ConfigListResponse { configs: entries, categories }))
}

/// GET /admin/config/:key - Get a single config value
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminContext>,
    Path(key): Path<String>,
) -> Result<Json<ConfigEntry>, (StatusCode, String)> {
    info!("Admin {} getting config key: {}", admin.admin_id, key);

    let config: PlatformConfig = sqlx::query_as("SELECT * FROM platform_config WHERE key = $1")
        .bind(&key)
        .fetch_one(&state.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => (StatusCode::NOT_FOUND, format!("config key '{}' not found", key)),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;

    Ok(Json(ConfigEntry::from_row(config)))
}

/// PATCH /admin/config - Update configuration values
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<UpdateConfigRequest>,
) -> Result<Json<UpdateConfigResponse>, (StatusCode, String)> {
    info!("Admin {} updating {} config entries", admin.admin_id, request.updates.len());

    let mut updated = Vec::new();
    let mut failed = Vec::new();

    for update in request.updates {
        let current: Result<PlatformConfig, _> =
            sqlx::query_as("SELECT * FROM platform_config WHERE key = $1")
                .bind(&update.key)
                .fetch_one(&state.db)
                .await;

        let config = match current {
            Ok(c) => c,
            Err(sqlx::Error::RowNotFound) => {
                failed.push(ConfigUpdateError { key: update.key, error: "config key not found".to_string() });
                continue;
            }
            Err(e) => {
                failed.push(ConfigUpdateError { key: update.key, error: e.to_string() });
                continue;
            }
        };

        let new_value = if config.encrypted && !update.value.is_empty() {
            match state.secrets.encrypt(&update.value) {
                Ok(encrypted) => encrypted,
                Err(e) => {
                    failed.push(ConfigUpdateError { key: update.key, error: format!("encryption failed: {}", e) });
                    continue;
                }
            }
        } else {
            update.value.clone()
        };

        let result = sqlx::query(
            "UPDATE platform_config SET value = $1, updated_at = NOW(), updated_by = $2 WHERE key = $3",
        )
        .bind(&new_value)
        .bind(&admin.admin_id)
        .bind(&update.key)
        .execute(&state.db)
        .await;

        if let Err(e) = result {
            failed.push(ConfigUpdateError { key: update.key, error: e.to_string() });
            continue;
        }

        let old_value_for_log = if config.encrypted { Some(MASKED_VALUE.to_string()) } else { Some(config.value.clone()) };
        let new_value_for_log = if config.encrypted { Some(MASKED_VALUE.to_string()) } else { Some(update.value.clone()) };

        let _ = sqlx::query(
            "INSERT INTO config_audit_log (config_key, old_value, new_value, changed_by, ip_address) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&update.key)
        .bind(&old_value_for_log)
        .bind(&new_value_for_log)
        .bind(&admin.admin_id)
        .bind(addr.ip().to_string())
        .execute(&state.db)
        .await;

        info!("config '{}' updated by admin {}", update.key, admin.admin_id);
        updated.push(update.key);
    }

    Ok(Json(UpdateConfigResponse { updated, failed }))
}

/// GET /admin/config/audit - Get config change audit log
pub async fn get_audit_log(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminContext>,
) -> Result<Json<Vec<ConfigAuditLog>>, (StatusCode, String)> {
    info!("Admin {} viewing audit log", admin.admin_id);

    let logs: Vec<ConfigAuditLog> =
        sqlx::query_as("SELECT * FROM config_audit_log ORDER BY changed_at DESC LIMIT 100")
            .fetch_all(&state.db)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(logs))
}

/// POST /admin/config/test-webhook - Test webhook connectivity
pub async fn test_webhook(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminContext>,
    Json(request): Json<TestWebhookRequest>,
) -> Result<Json<TestWebhookResponse>, (StatusCode, String)> {
    info!("Admin {} testing {} webhook", admin.admin_id, request.webhook_type);

    let webhook_key = match request.webhook_type.as_str() {
        "discord" => "discord_webhook_url",
        "email" => "email_webhook_url",
        _ => {
            return Ok(Json(TestWebhookResponse {
                success: false,
                message: format!("unknown webhook type: {}", request.webhook_type),
            }));
        }
    };

    let config: Result<PlatformConfig, _> = sqlx::query_as("SELECT * FROM platform_config WHERE key = $1")
        .bind(webhook_key)
        .fetch_one(&state.db)
        .await;

    let config = match config {
        Ok(c) => c,
        Err(_) => {
            return Ok(Json(TestWebhookResponse { success: false, message: "webhook not configured".to_string() }));
        }
    };

    if config.value.is_empty() {
        return Ok(Json(TestWebhookResponse { success: false, message: "webhook URL is empty".to_string() }));
    }

    match state.webhooks.test_connection().await {
        Ok(_) => Ok(Json(TestWebhookResponse {
            success: true,
            message: format!("{} webhook test successful", request.webhook_type),
        })),
        Err(e) => Ok(Json(TestWebhookResponse { success: false, message: format!("webhook test failed: {}", e) })),
    }
}

/// POST /admin/config/sync-env - Sync environment variables into the DB,
/// only filling currently-empty values so a redeploy can't clobber an
/// admin-set override.
pub async fn sync_env_to_db(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminContext>,
) -> Result<Json<UpdateConfigResponse>, (StatusCode, String)> {
    info!("Admin {} syncing env vars to database", admin.admin_id);

    let env_mappings = [
        (config::keys::COOLIFY_API_TOKEN, config::keys::COOLIFY_API_TOKEN, true),
        (config::keys::DISCORD_WEBHOOK_URL, "DISCORD_ALERT_WEBHOOK", true),
        (config::keys::EMAIL_WEBHOOK_URL, "EMAIL_ALERT_WEBHOOK", true),
        (config::keys::ALERT_EMAIL_TO, "ALERT_EMAIL_TO", false),
    ];

    let mut updated = Vec::new();
    let mut failed = Vec::new();

    for (db_key, env_key, encrypted) in env_mappings {
        if let Ok(env_value) = std::env::var(env_key) {
            if env_value.is_empty() {
                continue;
            }

            let value_to_store = if encrypted {
                match state.secrets.encrypt(&env_value) {
                    Ok(v) => v,
                    Err(e) => {
                        failed.push(ConfigUpdateError { key: db_key.to_string(), error: format!("encryption failed: {}", e) });
                        continue;
                    }
                }
            } else {
                env_value
            };

            let result = sqlx::query(
                "UPDATE platform_config SET value = $1, updated_at = NOW(), updated_by = $2 WHERE key = $3 AND (value = '' OR value IS NULL)",
            )
            .bind(&value_to_store)
            .bind(&admin.admin_id)
            .bind(db_key)
            .execute(&state.db)
            .await;

            match result {
                Ok(r) if r.rows_affected() > 0 => {
                    info!("synced {} from env", db_key);
                    updated.push(db_key.to_string());
                }
                Ok(_) => {}
                Err(e) => failed.push(ConfigUpdateError { key: db_key.to_string(), error: e.to_string() }),
            }
        }
    }

    Ok(Json(UpdateConfigResponse { updated, failed }))
}

/// GET /admin/infra/pool-stats/:platform
pub async fn pool_stats(
    State(state): State<Arc<AppState>>,
    Extension(_admin): Extension<AdminContext>,
    Path(platform): Path<String>,
) -> Result<Json<PoolStats>, (StatusCode, String)> {
    let platform = DeploymentPlatform::parse(&platform)
        .ok_or((StatusCode::BAD_REQUEST, "unknown platform".to_string()))?;
    let manager = state
        .pool_managers
        .get(&platform)
        .ok_or((StatusCode::NOT_FOUND, "platform has no pool manager".to_string()))?;
    let stats = manager.pool_stats().await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(stats))
}

/// GET /admin/infra/queue-stats/:platform
pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
    Extension(_admin): Extension<AdminContext>,
    Path(platform): Path<String>,
) -> Result<Json<QueueStats>, (StatusCode, String)> {
    let platform = DeploymentPlatform::parse(&platform)
        .ok_or((StatusCode::BAD_REQUEST, "unknown platform".to_string()))?;
    let manager = state
        .pool_managers
        .get(&platform)
        .ok_or((StatusCode::NOT_FOUND, "platform has no pool manager".to_string()))?;
    let stats = manager.queue_stats().await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(stats))
}

/// GET /admin/infra/capacity - Active-count vs configured limit per
/// enabled platform.
pub async fn platform_capacity(
    State(state): State<Arc<AppState>>,
    Extension(_admin): Extension<AdminContext>,
) -> Result<Json<Vec<PlatformCapacity>>, (StatusCode, String)> {
    let mut out = Vec::new();
    for platform in &state.platform_config.enabled_platforms {
        let limit = state.platform_config.limit_for(*platform).unwrap_or(0);
        let active_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bots WHERE deployment_platform = $1 AND status IN ('deploying','joining_call','in_waiting_room','in_call','leaving')",
        )
        .bind(platform)
        .fetch_one(&state.db)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        out.push(PlatformCapacity { platform: *platform, limit, active_count });
    }
    Ok(Json(out))
}

/// GET /admin/infra/global-queue - Contents of the cross-platform wait queue.
pub async fn global_queue(
    State(state): State<Arc<AppState>>,
    Extension(_admin): Extension<AdminContext>,
) -> Result<Json<Vec<GlobalQueueEntry>>, (StatusCode, String)> {
    let entries: Vec<GlobalQueueEntry> = sqlx::query_as(
        "SELECT * FROM global_queue WHERE status = 'waiting' ORDER BY priority ASC, queued_at ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(entries))
}
