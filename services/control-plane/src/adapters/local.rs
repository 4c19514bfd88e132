//! Local (dev/test) adapter: an in-memory stand-in for a real backend, used
//! when `PLATFORM_PRIORITY` names `local` (no container runtime involved).
//! Deploys "succeed" instantly; status is tracked in a map rather than
//! observed from any external system.

use super::{AdapterStatus, BotConfig, DeployResult, PlatformAdapter};
use crate::errors::CoordinatorError;
use crate::models::DeploymentPlatform;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct LocalAdapter {
    tasks: Arc<Mutex<HashMap<String, AdapterStatus>>>,
}

impl LocalAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlatformAdapter for LocalAdapter {
    fn platform_name(&self) -> DeploymentPlatform {
        DeploymentPlatform::Local
    }

    async fn deploy(&self, config: BotConfig) -> Result<DeployResult, CoordinatorError> {
        let identifier = format!("local-{}", config.bot_id);
        self.tasks.lock().await.insert(identifier.clone(), AdapterStatus::Active);
        Ok(DeployResult::Placed { identifier, slot_name: None })
    }

    async fn stop(&self, identifier: &str) -> Result<(), CoordinatorError> {
        self.tasks.lock().await.remove(identifier);
        Ok(())
    }

    async fn status(&self, identifier: &str) -> Result<AdapterStatus, CoordinatorError> {
        Ok(self
            .tasks
            .lock()
            .await
            .get(identifier)
            .copied()
            .unwrap_or(AdapterStatus::Stopped))
    }

    async fn release(&self, _bot_id: i64) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn process_queue(&self) -> Result<(), CoordinatorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeetingPlatform;

    fn sample_config(bot_id: i64) -> BotConfig {
        BotConfig {
            bot_id,
            meeting_platform: MeetingPlatform::Meet,
            join_url: "https://meet.example/x".to_string(),
            join_id: None,
            join_password: None,
            recording_enabled: false,
            chat_enabled: false,
            display_name: "Bot".to_string(),
            heartbeat_interval_ms: 5000,
            queue_timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn deploy_then_status_then_stop() {
        let adapter = LocalAdapter::new();
        let result = adapter.deploy(sample_config(1)).await.unwrap();
        let identifier = match result {
            DeployResult::Placed { identifier, .. } => identifier,
            other => panic!("expected Placed, got {:?}", other),
        };
        assert_eq!(adapter.status(&identifier).await.unwrap(), AdapterStatus::Active);
        adapter.stop(&identifier).await.unwrap();
        assert_eq!(adapter.status(&identifier).await.unwrap(), AdapterStatus::Stopped);
    }
}
