//! Retry-with-backoff for backend adapter calls (spec §7 `BackendTransient`).

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 8000,
            jitter: true,
        }
    }
}

fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let delay = config.base_delay_ms * (1_u64 << attempt.min(3));
    let delay = delay.min(config.max_delay_ms);

    let jittered = if config.jitter {
        let jitter_range = delay / 4;
        let jitter = rand::random::<u64>() % (jitter_range * 2 + 1);
        delay.saturating_sub(jitter_range) + jitter
    } else {
        delay
    };

    Duration::from_millis(jittered)
}

/// Run a fallible async operation with exponential backoff + jitter.
pub async fn with_retry<F, Fut, T, E>(operation: F, config: RetryConfig) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!("operation failed (attempt {}/{}): {}", attempt + 1, config.max_attempts, e);
                last_error = Some(e);

                if attempt < config.max_attempts - 1 {
                    let delay = backoff_delay(attempt, &config);
                    debug!("retrying after {:?}", delay);
                    sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.expect("last_error should be set"))
}
