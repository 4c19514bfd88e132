//! Cloud-task (ECS-like) batch adapter (spec §4.1.3): one spot task per bot.

use super::{AdapterStatus, BotConfig, DeployResult, PlatformAdapter};
use crate::concurrency::{DeploymentGate, ImagePullLockRegistry};
use crate::errors::CoordinatorError;
use crate::models::DeploymentPlatform;
use crate::retry::{with_retry, RetryConfig};
use async_trait::async_trait;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, ContainerOverride, KeyValuePair, LaunchType,
    NetworkConfiguration, TaskOverride,
};
use aws_sdk_ecs::Client as EcsClient;
use tracing::{error, info};

pub struct CloudTaskConfig {
    pub cluster: String,
    pub task_definition: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub container_name: String,
    pub control_plane_callback_url: String,
}

pub struct CloudTaskAdapter {
    client: EcsClient,
    config: CloudTaskConfig,
    deploy_gate: DeploymentGate,
    pull_locks: ImagePullLockRegistry,
}

impl CloudTaskAdapter {
    pub fn new(
        client: EcsClient,
        config: CloudTaskConfig,
        deploy_gate: DeploymentGate,
        pull_locks: ImagePullLockRegistry,
    ) -> Self {
        Self { client, config, deploy_gate, pull_locks }
    }
}

#[async_trait]
impl PlatformAdapter for CloudTaskAdapter {
    fn platform_name(&self) -> DeploymentPlatform {
        DeploymentPlatform::Aws
    }

    async fn deploy(&self, config: BotConfig) -> Result<DeployResult, CoordinatorError> {
        let network_config = NetworkConfiguration::builder()
            .awsvpc_configuration(
                AwsVpcConfiguration::builder()
                    .set_subnets(Some(self.config.subnets.clone()))
                    .set_security_groups(Some(self.config.security_groups.clone()))
                    .assign_public_ip(AssignPublicIp::Enabled)
                    .build()
                    .map_err(|e| CoordinatorError::Other(e.into()))?,
            )
            .build();

        let env = vec![
            KeyValuePair::builder().name("BOT_ID").value(config.bot_id.to_string()).build(),
            KeyValuePair::builder().name("JOIN_URL").value(&config.join_url).build(),
            KeyValuePair::builder().name("DISPLAY_NAME").value(&config.display_name).build(),
            KeyValuePair::builder()
                .name("CONTROL_PLANE_CALLBACK_URL")
                .value(&self.config.control_plane_callback_url)
                .build(),
        ];

        let overrides = TaskOverride::builder()
            .container_overrides(
                ContainerOverride::builder()
                    .name(&self.config.container_name)
                    .set_environment(Some(env))
                    .build(),
            )
            .build();

        let permit = self.deploy_gate.acquire(config.bot_id).await?;
        let pull_permit = self
            .pull_locks
            .acquire(DeploymentPlatform::Aws, &self.config.task_definition)
            .await?;
        let is_first_deployer = pull_permit.is_first_deployer;

        // ECS run_task hits transient capacity/throttling errors under load;
        // retry before surfacing BackendTransient to the router's own retry loop.
        let result = with_retry(
            || {
                self.client
                    .run_task()
                    .cluster(&self.config.cluster)
                    .task_definition(&self.config.task_definition)
                    .launch_type(LaunchType::Fargate)
                    .capacity_provider_strategy(
                        aws_sdk_ecs::types::CapacityProviderStrategyItem::builder()
                            .capacity_provider("FARGATE_SPOT")
                            .weight(1)
                            .build(),
                    )
                    .network_configuration(network_config.clone())
                    .overrides(overrides.clone())
                    .send()
            },
            RetryConfig::default(),
        )
        .await;

        let outcome = result
            .map_err(|e| e.to_string())
            .and_then(|result| {
                result
                    .tasks()
                    .first()
                    .and_then(|t| t.task_arn())
                    .map(|arn| arn.to_string())
                    .ok_or_else(|| "ECS run_task returned no task arn".to_string())
            });

        if is_first_deployer {
            pull_permit.resolve(outcome.clone().map(|_| ())).await;
        }
        drop(permit);

        let task_arn = outcome.map_err(CoordinatorError::BackendTransient)?;
        info!(bot_id = config.bot_id, task_arn = %task_arn, "started ecs task");
        Ok(DeployResult::Placed { identifier: task_arn, slot_name: None })
    }

    /// Idempotent: ECS returns success (with a failure entry) for an
    /// already-stopped or unknown task, which this maps to Ok.
    async fn stop(&self, identifier: &str) -> Result<(), CoordinatorError> {
        match self
            .client
            .stop_task()
            .cluster(&self.config.cluster)
            .task(identifier)
            .reason("released by control plane")
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("not found") || msg.contains("TaskNotFound") {
                    Ok(())
                } else {
                    error!(task_arn = identifier, error = %msg, "failed to stop ecs task");
                    Err(CoordinatorError::BackendTransient(msg))
                }
            }
        }
    }

    async fn status(&self, identifier: &str) -> Result<AdapterStatus, CoordinatorError> {
        let result = self
            .client
            .describe_tasks()
            .cluster(&self.config.cluster)
            .tasks(identifier)
            .send()
            .await
            .map_err(|e| CoordinatorError::BackendTransient(e.to_string()))?;

        let last_status = result.tasks().first().and_then(|t| t.last_status());
        Ok(super::mappers::map_cloud_task_status(last_status))
    }

    async fn release(&self, _bot_id: i64) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn process_queue(&self) -> Result<(), CoordinatorError> {
        Ok(())
    }
}
