//! Pool/PaaS adapter (spec §4.1.1): wraps the pool slot manager (C2) behind
//! the shared `PlatformAdapter` contract.

use super::{AdapterStatus, BotConfig, DeployResult, PlatformAdapter};
use crate::errors::CoordinatorError;
use crate::models::DeploymentPlatform;
use crate::pool_manager::{AcquireOutcome, PoolManager};
use async_trait::async_trait;
use claw_spawn::domain::DropletCreateRequest;
use claw_spawn::infrastructure::{DigitalOceanClient, DigitalOceanError};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Pool adapter backed by DigitalOcean droplets via claw-spawn. A droplet
/// create call is itself the "start", so unlike the cluster/cloud-task
/// adapters there is no separate running-phase poll: the slot goes straight
/// to HEALTHY once the droplet is created and the bot's own heartbeats are
/// what subsequently confirm it is actually alive (spec §4.6's heartbeat
/// timeout monitor covers a droplet that never calls home).
#[derive(Clone)]
pub struct PoolAdapter {
    manager: PoolManager,
    client: Arc<DigitalOceanClient>,
    image: String,
    region: String,
    size: String,
}

impl PoolAdapter {
    pub fn new(manager: PoolManager, client: Arc<DigitalOceanClient>, image: String, region: String, size: String) -> Self {
        Self { manager, client, image, region, size }
    }

    /// Configure-and-start sequence (spec §4.2): acquire both in-process
    /// gates, skip a redundant create within the debounce window, issue the
    /// droplet create call, then observe the result in a background task so
    /// `deploy` can return immediately.
    async fn configure_and_start(&self, slot_id: i64, slot_name: String, config: BotConfig) {
        if self.manager.recently_started(slot_id).await.unwrap_or(false) {
            info!(slot_id, "skipping redundant create, deployed within debounce window");
            return;
        }

        let permit = match self.manager.deploy_gate().acquire(config.bot_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(bot_id = config.bot_id, error = %e, "failed to acquire deployment permit");
                let _ = self.manager.observe_start_outcome(slot_id, false).await;
                return;
            }
        };

        let pull_permit = match self
            .manager
            .pull_locks()
            .acquire(DeploymentPlatform::Coolify, &self.image)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                warn!(bot_id = config.bot_id, error = %e, "image pull lock denied due to prior failure");
                let _ = self.manager.observe_start_outcome(slot_id, false).await;
                drop(permit);
                return;
            }
        };

        let is_first_deployer = pull_permit.is_first_deployer;
        let request = DropletCreateRequest {
            name: slot_name,
            region: self.region.clone(),
            size: self.size.clone(),
            image: self.image.clone(),
            user_data: String::new(),
            tags: vec!["meetbot".to_string(), format!("bot-{}", config.bot_id)],
        };

        match self.client.create_droplet(request).await {
            Ok(droplet) => {
                let _ = self
                    .manager
                    .finalize_overflow_slot(slot_id, Some(&droplet.id.to_string()))
                    .await;
                let _ = self.manager.observe_start_outcome(slot_id, true).await;
                if is_first_deployer {
                    pull_permit.resolve(Ok(())).await;
                }
            }
            Err(e) => {
                error!(slot_id, error = %e, "droplet creation failed");
                let _ = self.manager.observe_start_outcome(slot_id, false).await;
                if is_first_deployer {
                    pull_permit.resolve(Err(e.to_string())).await;
                }
            }
        }
        drop(permit);
    }
}

#[async_trait]
impl PlatformAdapter for PoolAdapter {
    fn platform_name(&self) -> DeploymentPlatform {
        DeploymentPlatform::Coolify
    }

    async fn deploy(&self, config: BotConfig) -> Result<DeployResult, CoordinatorError> {
        match self.manager.acquire_or_create(config.bot_id, config.queue_timeout_ms).await? {
            AcquireOutcome::Acquired(slot) => {
                let slot_id = slot.id;
                let application_uuid = slot.application_uuid.clone();
                let slot_name = slot.slot_name.clone();
                let adapter = self.clone();
                tokio::spawn(async move {
                    adapter.configure_and_start(slot_id, slot_name, config).await;
                });
                Ok(DeployResult::Placed {
                    identifier: application_uuid,
                    slot_name: None,
                })
            }
            AcquireOutcome::Queued { position, estimated_wait_secs } => {
                Ok(DeployResult::Queued { position, estimated_wait_secs })
            }
        }
    }

    async fn stop(&self, identifier: &str) -> Result<(), CoordinatorError> {
        let droplet_id: i64 = identifier
            .parse()
            .map_err(|_| CoordinatorError::BackendTransient(format!("not a droplet id: {}", identifier)))?;
        match self.client.destroy_droplet(droplet_id).await {
            Ok(_) => Ok(()),
            Err(DigitalOceanError::NotFound(_)) => Ok(()),
            Err(e) => Err(CoordinatorError::BackendTransient(e.to_string())),
        }
    }

    /// The slot's own `status` column is authoritative here - the create
    /// call already folded the only observation DigitalOcean offers
    /// (success/failure) into it, so there's nothing further to poll.
    async fn status(&self, identifier: &str) -> Result<AdapterStatus, CoordinatorError> {
        let slot = self.manager.find_by_application_uuid(identifier).await?;
        Ok(match slot.map(|s| s.status) {
            Some(crate::models::SlotStatus::Healthy) => AdapterStatus::Active,
            Some(crate::models::SlotStatus::Deploying) => AdapterStatus::Pending,
            Some(crate::models::SlotStatus::Error) => AdapterStatus::Failed,
            Some(crate::models::SlotStatus::Idle) | None => AdapterStatus::Stopped,
        })
    }

    async fn release(&self, bot_id: i64) -> Result<(), CoordinatorError> {
        if let Err(e) = self.manager.release(bot_id).await {
            warn!(bot_id, error = %e, "release failed, marking slot for recovery");
            self.manager.mark_error(bot_id, &e.to_string()).await?;
            return Err(e);
        }
        self.process_queue().await
    }

    /// Claims a released slot for the queue head, then runs the same
    /// configure-and-start sequence a direct `deploy` uses - `try_promote_queue_head`
    /// only flips the slot to DEPLOYING in the database, it doesn't start anything.
    async fn process_queue(&self) -> Result<(), CoordinatorError> {
        let Some((slot, bot_id)) = self.manager.try_promote_queue_head().await? else {
            return Ok(());
        };

        let bot = sqlx::query_as::<_, crate::models::Bot>("SELECT * FROM bots WHERE id = $1")
            .bind(bot_id)
            .fetch_optional(self.manager.db_pool())
            .await?;

        let Some(bot) = bot else {
            warn!(bot_id, slot_id = slot.id, "queued bot vanished before promotion could start it");
            return Ok(());
        };

        let config = BotConfig::from_bot(&bot);
        let slot_id = slot.id;
        let slot_name = slot.slot_name.clone();
        let adapter = self.clone();
        tokio::spawn(async move {
            adapter.configure_and_start(slot_id, slot_name, config).await;
        });
        Ok(())
    }
}
