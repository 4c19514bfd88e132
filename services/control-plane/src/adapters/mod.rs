//! Platform adapter contract (spec §4.1) and the three concrete backends.
//!
//! Each adapter wraps a different execution backend behind one shared
//! capability trait so the hybrid router (`crate::router`) can walk the
//! configured priority list without knowing which backend it's talking to
//! (spec §9's "sum type with shared capability trait" redesign note).

pub mod cloud_task;
pub mod cluster;
pub mod local;
pub mod mappers;
pub mod pool;

use crate::errors::CoordinatorError;
use crate::models::{Bot, DeploymentPlatform, MeetingPlatform};
use async_trait::async_trait;

/// The subset of a bot's configuration an adapter needs to deploy it.
/// Deliberately narrower than the full `Bot` row so adapters can't reach
/// into unrelated fields.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_id: i64,
    pub meeting_platform: MeetingPlatform,
    pub join_url: String,
    pub join_id: Option<String>,
    pub join_password: Option<String>,
    pub recording_enabled: bool,
    pub chat_enabled: bool,
    pub display_name: String,
    pub heartbeat_interval_ms: i32,
    /// Caller-supplied override for how long this bot may sit in a
    /// pool-local queue before giving up (spec §4.4/§4.5). `None` means the
    /// platform default applies.
    pub queue_timeout_ms: Option<i64>,
}

impl BotConfig {
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
            queue_timeout_ms: None,
        }
    }
}

/// Outcome of a `deploy` call (spec §4.1).
#[derive(Debug, Clone)]
pub enum DeployResult {
    Placed {
        identifier: String,
        slot_name: Option<String>,
    },
    Queued {
        position: i64,
        estimated_wait_secs: i64,
    },
    Refused(String),
}

/// Adapter-agnostic bot container status, after each adapter's own
/// status mapper (spec §4.1.4) has translated the raw backend enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Pending,
    Active,
    Stopped,
    Succeeded,
    Failed,
}

/// Shared capability contract every execution backend implements.
///
/// `deploy` must not block synchronously for image pull/container start to
/// complete - long-running provisioning happens in a background task the
/// adapter spawns itself.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform_name(&self) -> DeploymentPlatform;

    async fn deploy(&self, config: BotConfig) -> Result<DeployResult, CoordinatorError>;

    /// Idempotent: stopping an already-stopped or unknown identifier is success.
    async fn stop(&self, identifier: &str) -> Result<(), CoordinatorError>;

    async fn status(&self, identifier: &str) -> Result<AdapterStatus, CoordinatorError>;

    /// Release resources tied to a bot once it reaches a terminal status.
    /// Pool adapters return the slot to IDLE; batch adapters no-op (the Job
    /// or Task is already finished/finishing on its own).
    async fn release(&self, bot_id: i64) -> Result<(), CoordinatorError>;

    /// Pump any adapter-local queue (pool-local queue for the pool adapter;
    /// no-op for batch adapters).
    async fn process_queue(&self) -> Result<(), CoordinatorError>;
}
