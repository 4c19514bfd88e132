//! Deployment-concurrency semaphore (spec §4.3).
//!
//! Bounds the number of deploys in flight at once. `tokio::sync::Semaphore`
//! wakes waiters in FIFO order, which satisfies spec §5's queue-ordering
//! guarantee without extra bookkeeping.

use crate::errors::CoordinatorError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
pub struct DeploymentGate {
    semaphore: Arc<Semaphore>,
}

impl DeploymentGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Admits immediately if a permit is free, otherwise queues FIFO with a
    /// 30-minute timeout. The returned permit must be held for the duration
    /// of the deploy and dropped (releasing it) on every exit path,
    /// including error paths - `SemaphorePermit`'s `Drop` impl guarantees
    /// this even if the caller returns early via `?`.
    pub async fn acquire(&self, bot_id: i64) -> Result<SemaphorePermit<'_>, CoordinatorError> {
        match tokio::time::timeout(ACQUIRE_TIMEOUT, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CoordinatorError::Inconsistency(
                "deployment semaphore closed".to_string(),
            )),
            Err(_) => Err(CoordinatorError::QueueTimeout(format!(
                "bot {} timed out waiting for a deployment slot after 30 minutes",
                bot_id
            ))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_configured_concurrency() {
        let gate = DeploymentGate::new(2);
        let p1 = gate.acquire(1).await.unwrap();
        let p2 = gate.acquire(2).await.unwrap();
        assert_eq!(gate.available_permits(), 0);
        drop(p1);
        assert_eq!(gate.available_permits(), 1);
        drop(p2);
    }
}
