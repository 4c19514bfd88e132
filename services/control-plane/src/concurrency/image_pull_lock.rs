//! Per-(platform, image tag) first-deployer lock (spec §4.3).
//!
//! The first caller for a given image becomes the "first deployer" and
//! holds the lock until it has observed the container actually running -
//! proof the image pulled (or was already cached). Later callers for the
//! same image acquire and release quickly once they see that proof, and if
//! the first deployer instead fails, that failure is broadcast so waiters
//! don't inherit a broken pull.

use crate::errors::CoordinatorError;
use crate::models::DeploymentPlatform;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

type PullKey = (DeploymentPlatform, String);

struct PullState {
    notify: Notify,
    /// None while the first deployer is still pulling/starting.
    result: Mutex<Option<Result<(), String>>>,
}

#[derive(Clone)]
pub struct ImagePullLockRegistry {
    inner: Arc<Mutex<HashMap<PullKey, Arc<PullState>>>>,
}

impl ImagePullLockRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire the lock for (platform, image_tag). Returns a permit whose
    /// `is_first_deployer` tells the adapter whether it must itself wait
    /// for the container to reach Running and call `resolve`, or whether
    /// it can proceed immediately because some other in-flight deploy
    /// already proved the pull succeeds (or is about to).
    pub async fn acquire(
        &self,
        platform: DeploymentPlatform,
        image_tag: &str,
    ) -> Result<ImagePullPermit, CoordinatorError> {
        let key = (platform, image_tag.to_string());

        let (state, is_first_deployer) = {
            let mut map = self.inner.lock().await;
            match map.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let state = Arc::new(PullState {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    map.insert(key.clone(), state.clone());
                    (state, true)
                }
            }
        };

        if !is_first_deployer {
            loop {
                {
                    let result = state.result.lock().await;
                    if let Some(r) = result.as_ref() {
                        if let Err(reason) = r {
                            return Err(CoordinatorError::BackendTransient(format!(
                                "image pull for {:?}/{} previously failed: {}",
                                key.0, key.1, reason
                            )));
                        }
                        break;
                    }
                }
                state.notify.notified().await;
            }
        }

        Ok(ImagePullPermit {
            key,
            state,
            is_first_deployer,
            registry: self.clone(),
        })
    }
}

impl Default for ImagePullLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ImagePullPermit {
    key: PullKey,
    state: Arc<PullState>,
    pub is_first_deployer: bool,
    registry: ImagePullLockRegistry,
}

impl ImagePullPermit {
    /// Called by the first deployer once it has observed the container
    /// running (success) or has given up (failure). Wakes every waiter and
    /// removes the entry so a later deploy of the same image starts fresh.
    pub async fn resolve(self, outcome: Result<(), String>) {
        if !self.is_first_deployer {
            return;
        }
        {
            let mut result = self.state.result.lock().await;
            *result = Some(outcome);
        }
        self.state.notify.notify_waiters();
        self.registry.inner.lock().await.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_deployer_waits_for_first() {
        let registry = ImagePullLockRegistry::new();
        let p1 = registry
            .acquire(DeploymentPlatform::K8s, "meetbot:latest")
            .await
            .unwrap();
        assert!(p1.is_first_deployer);

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move {
            registry2
                .acquire(DeploymentPlatform::K8s, "meetbot:latest")
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        p1.resolve(Ok(())).await;

        let p2 = waiter.await.unwrap().unwrap();
        assert!(!p2.is_first_deployer);
    }

    #[tokio::test]
    async fn failure_is_broadcast_to_waiters() {
        let registry = ImagePullLockRegistry::new();
        let p1 = registry
            .acquire(DeploymentPlatform::Aws, "meetbot:broken")
            .await
            .unwrap();

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move {
            registry2.acquire(DeploymentPlatform::Aws, "meetbot:broken").await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        p1.resolve(Err("pull failed".to_string())).await;

        assert!(waiter.await.unwrap().is_err());
    }
}
