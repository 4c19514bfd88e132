use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Video conferencing platform a bot joins a meeting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "meeting_platform", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MeetingPlatform {
    Zoom,
    Teams,
    Meet,
}

/// Deployment (execution) backend a bot's container runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "deployment_platform", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPlatform {
    K8s,
    Aws,
    Coolify,
    Local,
}

impl DeploymentPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentPlatform::K8s => "k8s",
            DeploymentPlatform::Aws => "aws",
            DeploymentPlatform::Coolify => "coolify",
            DeploymentPlatform::Local => "local",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "k8s" => Some(DeploymentPlatform::K8s),
            "aws" => Some(DeploymentPlatform::Aws),
            "coolify" => Some(DeploymentPlatform::Coolify),
            "local" => Some(DeploymentPlatform::Local),
            _ => None,
        }
    }
}

/// Authoritative bot lifecycle status (spec §4.5). QUEUED is observed-only,
/// set while a bot sits in the pool adapter's local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "bot_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    ReadyToDeploy,
    Deploying,
    Queued,
    JoiningCall,
    InWaitingRoom,
    InCall,
    Leaving,
    Done,
    Fatal,
}

impl BotStatus {
    /// Statuses counted against a deployment platform's concurrency limit (spec §4.4).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BotStatus::Deploying
                | BotStatus::JoiningCall
                | BotStatus::InWaitingRoom
                | BotStatus::InCall
                | BotStatus::Leaving
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BotStatus::Done | BotStatus::Fatal)
    }
}

/// Pool slot state machine (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "slot_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Idle,
    Deploying,
    Healthy,
    Error,
}

/// Global queue entry status (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "global_queue_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GlobalQueueStatus {
    Waiting,
    Processing,
    Expired,
}

/// Event kinds reported by a running bot (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ParticipantJoin,
    ParticipantLeave,
    StatusCode,
    Log,
}

/// Bot container log verbosity (spec §6 `updateLogLevel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "log_level", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// A screenshot captured by the bot runtime during a meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub captured_at: DateTime<Utc>,
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// A single speaker-timeline entry (who was talking, for how long).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerTimeframe {
    pub participant: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// Bot entity (spec §3). Flattened rather than nested to match the
/// row-per-table storage shape queried throughout the handlers.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Bot {
    pub id: i64,
    pub owner_user_id: String,

    // Meeting descriptor
    pub meeting_platform: MeetingPlatform,
    pub join_url: String,
    pub join_id: Option<String>,
    pub join_password: Option<String>,
    pub tenant_id: Option<String>,
    pub organizer_id: Option<String>,

    // Presentation
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub recording_enabled: bool,
    pub chat_enabled: bool,

    // Schedule
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,

    // Behavior
    pub heartbeat_interval_ms: i32,
    pub waiting_room_timeout_ms: i32,
    pub no_one_joined_timeout_ms: i32,
    pub everyone_left_timeout_ms: i32,
    pub inactivity_timeout_ms: i32,
    pub webhook_url: Option<String>,

    // Runtime
    pub status: BotStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub log_level: LogLevel,
    pub deployment_platform: Option<DeploymentPlatform>,
    pub platform_identifier: Option<String>,
    pub deployment_error: Option<String>,
    pub recording_url: Option<String>,
    pub speaker_timeline: Option<serde_json::Value>,
    pub screenshots: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Pool slot entity (spec §3).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PoolSlot {
    pub id: i64,
    pub slot_name: String,
    pub platform: DeploymentPlatform,
    pub status: SlotStatus,
    pub assigned_bot_id: Option<i64>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub recovery_attempts: i32,
    pub application_uuid: String,
}

/// Pool-local queue entry (spec §3, §4.2).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PoolQueueEntry {
    pub id: i64,
    pub bot_id: i64,
    pub platform: DeploymentPlatform,
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
}

/// Global wait queue entry (spec §3, §4.4).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GlobalQueueEntry {
    pub id: i64,
    pub bot_id: i64,
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub status: GlobalQueueStatus,
}

/// Event entity (spec §3).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Event {
    pub id: i64,
    pub bot_id: i64,
    pub event_type: EventType,
    pub event_time: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
}

/// Platform configuration row (process-wide, spec §3 "Platform Configuration").
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PlatformConfig {
    pub key: String,
    pub value: String,
    pub encrypted: bool,
    pub category: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConfigAuditLog {
    pub id: i64,
    pub config_key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: String,
    pub ip_address: Option<String>,
    pub changed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Request / response DTOs for the Bot RPC surface (spec §6)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateBotRequest {
    pub meeting_platform: MeetingPlatform,
    #[validate(length(min = 1))]
    pub join_url: String,
    pub join_id: Option<String>,
    pub join_password: Option<String>,
    pub tenant_id: Option<String>,
    pub organizer_id: Option<String>,

    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub recording_enabled: Option<bool>,
    pub chat_enabled: Option<bool>,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,

    pub heartbeat_interval_ms: Option<i32>,
    pub waiting_room_timeout_ms: Option<i32>,
    pub no_one_joined_timeout_ms: Option<i32>,
    pub everyone_left_timeout_ms: Option<i32>,
    pub inactivity_timeout_ms: Option<i32>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBotRequest {
    pub display_name: Option<String>,
    pub recording_enabled: Option<bool>,
    pub chat_enabled: Option<bool>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: BotStatus,
    pub recording_url: Option<String>,
    pub speaker_timeline: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub should_leave: bool,
    pub log_level: LogLevel,
}

#[derive(Debug, Deserialize)]
pub struct ReportEventRequest {
    pub event_type: EventType,
    pub event_time: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct DeployBotRequest {
    pub queue_timeout_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeployOutcome {
    Placed {
        deployment_platform: DeploymentPlatform,
        platform_identifier: String,
    },
    Queued {
        position: i64,
        estimated_wait_secs: i64,
    },
}

#[derive(Debug, Deserialize)]
pub struct AddScreenshotRequest {
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLogLevelRequest {
    pub log_level: LogLevel,
}

#[derive(Debug, Serialize)]
pub struct ListBotsResponse {
    pub bots: Vec<Bot>,
    pub total: i64,
}

// ---------------------------------------------------------------------
// Infrastructure RPC surface (spec §6)
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PoolStats {
    pub platform: DeploymentPlatform,
    pub idle: i64,
    pub deploying: i64,
    pub healthy: i64,
    pub error: i64,
    pub total: i64,
    pub max_size: i64,
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub platform: DeploymentPlatform,
    pub length: i64,
    pub oldest_queued_at: Option<DateTime<Utc>>,
    pub mean_wait_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PlatformCapacity {
    pub platform: DeploymentPlatform,
    pub limit: i32,
    pub active_count: i64,
}

// ---------------------------------------------------------------------
// Admin config surface (ambient, spec.md §4's supplemental ledger)
// ---------------------------------------------------------------------

const MASKED_VALUE: &str = "********";

#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub encrypted: bool,
    pub category: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn from_row(c: PlatformConfig) -> Self {
        Self {
            key: c.key,
            value: if c.encrypted && !c.value.is_empty() {
                MASKED_VALUE.to_string()
            } else {
                c.value
            },
            encrypted: c.encrypted,
            category: c.category,
            description: c.description,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigListResponse {
    pub configs: Vec<ConfigEntry>,
    pub categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub updates: Vec<ConfigUpdate>,
}

#[derive(Debug, Serialize)]
pub struct ConfigUpdateError {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateConfigResponse {
    pub updated: Vec<String>,
    pub failed: Vec<ConfigUpdateError>,
}

// ---------------------------------------------------------------------
// Bot container contract (spec §4.7, C7)
// ---------------------------------------------------------------------

/// Config projection served to a bot container on startup (spec §4.7
/// "Pool-slot-config endpoint" / `getBot` for batch adapters).
#[derive(Debug, Serialize)]
pub struct BotConfigProjection {
    pub bot_id: i64,
    pub meeting_platform: MeetingPlatform,
    pub join_url: String,
    pub join_id: Option<String>,
    pub join_password: Option<String>,
    pub recording_enabled: bool,
    pub chat_enabled: bool,
    pub display_name: String,
    pub heartbeat_interval_ms: i32,
    pub log_level: LogLevel,
}

impl BotConfigProjection {
    pub fn from_bot(bot: &Bot) -> Self {
        Self {
            bot_id: bot.id,
            meeting_platform: bot.meeting_platform,
            join_url: bot.join_url.clone(),
            join_id: bot.join_id.clone(),
            join_password: bot.join_password.clone(),
            recording_enabled: bot.recording_enabled,
            chat_enabled: bot.chat_enabled,
            display_name: bot.display_name.clone(),
            heartbeat_interval_ms: bot.heartbeat_interval_ms,
            log_level: bot.log_level,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TestWebhookRequest {
    pub webhook_type: String,
}

#[derive(Debug, Serialize)]
pub struct TestWebhookResponse {
    pub success: bool,
    pub message: String,
}
