//! Platform configuration: process-wide static config (env, read once at
//! startup and frozen) plus the `platform_config` DB-backed key/value store
//! used for values an admin may want to change without a redeploy.

use crate::models::DeploymentPlatform;
use crate::secrets::SecretsManager;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;

/// Get a configuration value from platform_config table.
///
/// Returns None if key doesn't exist or value is empty.
pub async fn get_config(pool: &PgPool, key: &str) -> Option<String> {
    let result: Option<(String, bool)> =
        sqlx::query_as("SELECT value, encrypted FROM platform_config WHERE key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await
            .ok()?;

    match result {
        Some((value, _encrypted)) if !value.is_empty() => Some(value),
        _ => None,
    }
}

/// Get a configuration value, decrypting if necessary.
pub async fn get_config_decrypted(
    pool: &PgPool,
    secrets: &SecretsManager,
    key: &str,
) -> Option<String> {
    let result: Option<(String, bool)> =
        sqlx::query_as("SELECT value, encrypted FROM platform_config WHERE key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await
            .ok()?;

    match result {
        Some((value, encrypted)) if !value.is_empty() => {
            if encrypted {
                secrets.decrypt(&value).ok()
            } else {
                Some(value)
            }
        }
        _ => None,
    }
}

pub async fn get_config_or(pool: &PgPool, key: &str, default: &str) -> String {
    get_config(pool, key)
        .await
        .unwrap_or_else(|| default.to_string())
}

pub async fn get_config_decrypted_or(
    pool: &PgPool,
    secrets: &SecretsManager,
    key: &str,
    default: &str,
) -> String {
    get_config_decrypted(pool, secrets, key)
        .await
        .unwrap_or_else(|| default.to_string())
}

/// Configuration keys, mirroring spec §6's "Environment configuration keys".
pub mod keys {
    pub const PLATFORM_PRIORITY: &str = "PLATFORM_PRIORITY";
    pub const GLOBAL_QUEUE_TIMEOUT_MS: &str = "GLOBAL_QUEUE_TIMEOUT_MS";
    pub const DEPLOYMENT_CONCURRENCY_MAX: &str = "DEPLOYMENT_CONCURRENCY_MAX";
    pub const MAX_POOL_SIZE: &str = "MAX_POOL_SIZE";
    pub const HEARTBEAT_TIMEOUT_MINUTES: &str = "HEARTBEAT_TIMEOUT_MINUTES";
    pub const DEPLOYING_TIMEOUT_MINUTES: &str = "DEPLOYING_TIMEOUT_MINUTES";

    // Pool/PaaS backend (coolify)
    pub const COOLIFY_BOT_LIMIT: &str = "COOLIFY_BOT_LIMIT";
    pub const COOLIFY_QUEUE_TIMEOUT_MS: &str = "COOLIFY_QUEUE_TIMEOUT_MS";
    pub const COOLIFY_API_TOKEN: &str = "coolify_api_token";

    // Cluster (k8s-like) batch backend
    pub const K8S_BOT_LIMIT: &str = "K8S_BOT_LIMIT";
    pub const K8S_QUEUE_TIMEOUT_MS: &str = "K8S_QUEUE_TIMEOUT_MS";
    pub const K8S_NAMESPACE: &str = "K8S_NAMESPACE";
    pub const K8S_IMAGE_REGISTRY: &str = "K8S_IMAGE_REGISTRY";
    pub const K8S_IMAGE_TAG: &str = "K8S_IMAGE_TAG";
    pub const K8S_CPU_REQUEST: &str = "K8S_CPU_REQUEST";
    pub const K8S_CPU_LIMIT: &str = "K8S_CPU_LIMIT";
    pub const K8S_MEMORY_REQUEST: &str = "K8S_MEMORY_REQUEST";
    pub const K8S_MEMORY_LIMIT: &str = "K8S_MEMORY_LIMIT";

    // Cloud-task (ECS-like) batch backend
    pub const AWS_BOT_LIMIT: &str = "AWS_BOT_LIMIT";
    pub const AWS_QUEUE_TIMEOUT_MS: &str = "AWS_QUEUE_TIMEOUT_MS";
    pub const AWS_ECS_CLUSTER: &str = "AWS_ECS_CLUSTER";
    pub const AWS_ECS_SUBNETS: &str = "AWS_ECS_SUBNETS";
    pub const AWS_ECS_SECURITY_GROUPS: &str = "AWS_ECS_SECURITY_GROUPS";
    pub const AWS_ECS_TASK_DEFINITION: &str = "AWS_ECS_TASK_DEFINITION";

    // Local (dev/test) backend
    pub const LOCAL_BOT_LIMIT: &str = "LOCAL_BOT_LIMIT";
    pub const LOCAL_QUEUE_TIMEOUT_MS: &str = "LOCAL_QUEUE_TIMEOUT_MS";

    // Alerting / webhooks (ambient)
    pub const DISCORD_WEBHOOK_URL: &str = "discord_webhook_url";
    pub const EMAIL_WEBHOOK_URL: &str = "email_webhook_url";
    pub const ALERT_EMAIL_TO: &str = "alert_email_to";
}

/// Per-platform static parameters (spec §3 "Platform Configuration").
#[derive(Debug, Clone)]
pub struct PlatformEntry {
    pub limit: i32,
    pub queue_timeout_ms: i64,
}

/// Process-wide router configuration, read once at startup and frozen for
/// the process lifetime (spec §3, §4.4 init).
#[derive(Debug, Clone)]
pub struct PlatformConfigState {
    pub enabled_platforms: Vec<DeploymentPlatform>,
    pub entries: HashMap<DeploymentPlatform, PlatformEntry>,
    pub global_queue_timeout: Duration,
    pub deployment_concurrency_max: usize,
    pub max_pool_size: i64,
}

impl PlatformConfigState {
    /// Build from environment variables. Platforms named in
    /// `PLATFORM_PRIORITY` that are missing a limit/timeout pair are skipped
    /// with a warning (spec §4.4); if the resulting list is empty this is an
    /// init-time error.
    pub fn from_env() -> anyhow::Result<Self> {
        let priority_raw = std::env::var(keys::PLATFORM_PRIORITY)
            .unwrap_or_else(|_| "k8s,aws,coolify,local".to_string());

        let mut enabled_platforms = Vec::new();
        let mut entries = HashMap::new();

        for name in priority_raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Some(platform) = DeploymentPlatform::parse(name) else {
                tracing::warn!(platform = name, "unknown platform in PLATFORM_PRIORITY, skipping");
                continue;
            };

            let (limit_key, timeout_key) = match platform {
                DeploymentPlatform::K8s => (keys::K8S_BOT_LIMIT, keys::K8S_QUEUE_TIMEOUT_MS),
                DeploymentPlatform::Aws => (keys::AWS_BOT_LIMIT, keys::AWS_QUEUE_TIMEOUT_MS),
                DeploymentPlatform::Coolify => (keys::COOLIFY_BOT_LIMIT, keys::COOLIFY_QUEUE_TIMEOUT_MS),
                DeploymentPlatform::Local => (keys::LOCAL_BOT_LIMIT, keys::LOCAL_QUEUE_TIMEOUT_MS),
            };

            let limit = match std::env::var(limit_key).ok().and_then(|v| v.parse::<i32>().ok()) {
                Some(l) => l,
                None => {
                    tracing::warn!(platform = name, "missing {} - skipping platform", limit_key);
                    continue;
                }
            };
            let queue_timeout_ms = std::env::var(timeout_key)
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(300_000);

            entries.insert(platform, PlatformEntry { limit, queue_timeout_ms });
            enabled_platforms.push(platform);
        }

        if enabled_platforms.is_empty() {
            anyhow::bail!("no enabled platforms configured - PLATFORM_PRIORITY resolved to an empty list");
        }

        let global_queue_timeout_ms: u64 = std::env::var(keys::GLOBAL_QUEUE_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600_000);

        let deployment_concurrency_max: usize = std::env::var(keys::DEPLOYMENT_CONCURRENCY_MAX)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        let max_pool_size: i64 = std::env::var(keys::MAX_POOL_SIZE)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        Ok(Self {
            enabled_platforms,
            entries,
            global_queue_timeout: Duration::from_millis(global_queue_timeout_ms),
            deployment_concurrency_max,
            max_pool_size,
        })
    }

    pub fn limit_for(&self, platform: DeploymentPlatform) -> Option<i32> {
        self.entries.get(&platform).map(|e| e.limit)
    }
}
