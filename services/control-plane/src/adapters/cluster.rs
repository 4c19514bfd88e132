//! Cluster (K8s-like) batch adapter (spec §4.1.2): one Job per bot.

use super::{AdapterStatus, BotConfig, DeployResult, PlatformAdapter};
use crate::concurrency::{DeploymentGate, ImagePullLockRegistry};
use crate::errors::CoordinatorError;
use crate::models::DeploymentPlatform;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, PostParams};
use tracing::{error, info};

pub struct ClusterConfig {
    pub namespace: String,
    pub image_registry: String,
    pub image_tag: String,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub image_pull_secret: Option<String>,
}

pub struct ClusterAdapter {
    client: kube::Client,
    config: ClusterConfig,
    deploy_gate: DeploymentGate,
    pull_locks: ImagePullLockRegistry,
}

impl ClusterAdapter {
    pub fn new(
        client: kube::Client,
        config: ClusterConfig,
        deploy_gate: DeploymentGate,
        pull_locks: ImagePullLockRegistry,
    ) -> Self {
        Self { client, config, deploy_gate, pull_locks }
    }

    fn jobs_api(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn image_for(&self, config: &BotConfig) -> String {
        format!(
            "{}/meetbot-runner-{}:{}",
            self.config.image_registry,
            config.meeting_platform.as_str().to_lowercase(),
            self.config.image_tag
        )
    }

    fn job_name(bot_id: i64) -> String {
        format!("meetbot-{}", bot_id)
    }

    fn build_job(&self, config: &BotConfig) -> Result<Job, CoordinatorError> {
        let name = Self::job_name(config.bot_id);
        let image = self.image_for(config);

        let mut image_pull_secrets = serde_json::Value::Null;
        if let Some(secret) = &self.config.image_pull_secret {
            image_pull_secrets = serde_json::json!([{ "name": secret }]);
        }

        let job: Job = serde_json::from_value(serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "namespace": self.config.namespace,
                "labels": {
                    "app": "meetbot",
                    "platform": "k8s",
                    "bot-id": config.bot_id.to_string(),
                }
            },
            "spec": {
                "backoffLimit": 0,
                "ttlSecondsAfterFinished": 300,
                "template": {
                    "metadata": {
                        "labels": {
                            "app": "meetbot",
                            "platform": "k8s",
                            "bot-id": config.bot_id.to_string(),
                        }
                    },
                    "spec": {
                        "restartPolicy": "Never",
                        "imagePullSecrets": image_pull_secrets,
                        "volumes": [{
                            "name": "shm",
                            "emptyDir": { "medium": "Memory", "sizeLimit": "512Mi" }
                        }],
                        "containers": [{
                            "name": "bot-runner",
                            "image": image,
                            "resources": {
                                "requests": {
                                    "cpu": self.config.cpu_request,
                                    "memory": self.config.memory_request,
                                },
                                "limits": {
                                    "cpu": self.config.cpu_limit,
                                    "memory": self.config.memory_limit,
                                }
                            },
                            "volumeMounts": [{ "name": "shm", "mountPath": "/dev/shm" }],
                            "env": [
                                { "name": "BOT_ID", "value": config.bot_id.to_string() },
                                { "name": "JOIN_URL", "value": config.join_url },
                                { "name": "DISPLAY_NAME", "value": config.display_name },
                                { "name": "RECORDING_ENABLED", "value": config.recording_enabled.to_string() },
                                { "name": "CHAT_ENABLED", "value": config.chat_enabled.to_string() },
                                { "name": "HEARTBEAT_INTERVAL_MS", "value": config.heartbeat_interval_ms.to_string() },
                            ],
                        }]
                    }
                }
            }
        }))
        .map_err(|e| CoordinatorError::Other(e.into()))?;

        Ok(job)
    }

}

#[async_trait]
impl PlatformAdapter for ClusterAdapter {
    fn platform_name(&self) -> DeploymentPlatform {
        DeploymentPlatform::K8s
    }

    /// The job name is deterministic (`meetbot-{bot_id}`), so `deploy` can
    /// return it immediately and do everything else - gate/lock acquisition,
    /// job creation, and the running-phase poll - in a background task, the
    /// same split `adapters/pool.rs` uses. A job-creation failure in the
    /// background leaves the bot DEPLOYING; the heartbeat-timeout monitor is
    /// the backstop that eventually marks it FATAL, same as a pool slot that
    /// never calls home.
    async fn deploy(&self, config: BotConfig) -> Result<DeployResult, CoordinatorError> {
        let image = self.image_for(&config);
        let job = self.build_job(&config)?;
        let name = Self::job_name(config.bot_id);
        let bot_id = config.bot_id;

        let deploy_gate = self.deploy_gate.clone();
        let pull_locks = self.pull_locks.clone();
        let jobs = self.jobs_api();
        let wait_name = name.clone();

        tokio::spawn(async move {
            let permit = match deploy_gate.acquire(bot_id).await {
                Ok(p) => p,
                Err(e) => {
                    error!(bot_id, error = %e, "failed to acquire deployment permit for k8s job");
                    return;
                }
            };
            let pull_permit = match pull_locks.acquire(DeploymentPlatform::K8s, &image).await {
                Ok(p) => p,
                Err(e) => {
                    error!(bot_id, error = %e, "image pull lock denied due to prior failure");
                    drop(permit);
                    return;
                }
            };
            let is_first_deployer = pull_permit.is_first_deployer;

            match jobs.create(&PostParams::default(), &job).await {
                Ok(_) => {
                    info!(bot_id, job = %wait_name, "created k8s job");
                    for _ in 0..60 {
                        match jobs.get_status(&wait_name).await {
                            Ok(j) => {
                                let s = j.status.unwrap_or_default();
                                if s.active.unwrap_or(0) > 0 || s.failed.unwrap_or(0) > 0 {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    }
                    if is_first_deployer {
                        pull_permit.resolve(Ok(())).await;
                    }
                }
                Err(e) => {
                    error!(bot_id, error = %e, "failed to create k8s job");
                    if is_first_deployer {
                        pull_permit.resolve(Err(e.to_string())).await;
                    }
                }
            }
            drop(permit);
        });

        Ok(DeployResult::Placed { identifier: name, slot_name: None })
    }

    async fn stop(&self, identifier: &str) -> Result<(), CoordinatorError> {
        let jobs = self.jobs_api();
        match jobs.delete(identifier, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(CoordinatorError::BackendTransient(e.to_string())),
        }
    }

    async fn status(&self, identifier: &str) -> Result<AdapterStatus, CoordinatorError> {
        let jobs = self.jobs_api();
        let job = jobs
            .get_status(identifier)
            .await
            .map_err(|e| CoordinatorError::BackendTransient(e.to_string()))?;
        let status = job.status.unwrap_or_default();
        Ok(super::mappers::map_cluster_job_status(
            status.active.unwrap_or(0),
            status.succeeded.unwrap_or(0),
            status.failed.unwrap_or(0),
        ))
    }

    async fn release(&self, _bot_id: i64) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn process_queue(&self) -> Result<(), CoordinatorError> {
        Ok(())
    }
}
