//! Observability: metrics collection and structured logging

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Metrics collector for tracking system health
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
}

struct MetricsInner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    histograms: HashMap<String, Vec<f64>>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner {
                counters: HashMap::new(),
                gauges: HashMap::new(),
                histograms: HashMap::new(),
                start_time: Instant::now(),
            })),
        }
    }

    /// Increment a counter
    pub async fn increment(&self, name: &str, value: u64) {
        let mut inner = self.inner.write().await;
        let counter = inner.counters.entry(name.to_string()).or_insert(0);
        *counter += value;
    }

    /// Set a gauge value
    pub async fn gauge(&self, name: &str, value: f64) {
        let mut inner = self.inner.write().await;
        inner.gauges.insert(name.to_string(), value);
    }

    /// Record a histogram value
    pub async fn histogram(&self, name: &str, value: f64) {
        let mut inner = self.inner.write().await;
        inner
            .histograms
            .entry(name.to_string())
            .or_insert_with(Vec::new)
            .push(value);
    }

    /// Get all metrics as JSON-serializable format
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().await;
        MetricsSnapshot {
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            uptime_secs: inner.start_time.elapsed().as_secs(),
        }
    }

    /// Get specific counter
    pub async fn get_counter(&self, name: &str) -> u64 {
        let inner = self.inner.read().await;
        inner.counters.get(name).copied().unwrap_or(0)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub uptime_secs: u64,
}

/// Structured logger for consistent log formatting
pub struct Logger;

impl Logger {
    /// Log a structured event
    pub fn event(level: tracing::Level, component: &str, event: &str, attributes: &[(&str, &str)]) {
        let attrs = attributes
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");

        match level {
            tracing::Level::ERROR => tracing::error!(component, event, %attrs),
            tracing::Level::WARN => tracing::warn!(component, event, %attrs),
            tracing::Level::INFO => tracing::info!(component, event, %attrs),
            tracing::Level::DEBUG => tracing::debug!(component, event, %attrs),
            _ => tracing::trace!(component, event, %attrs),
        }
    }

    /// Log bot event
    pub fn bot_event(bot_id: &str, event_type: &str, details: &str) {
        tracing::info!(
            bot_id = %bot_id,
            event_type = %event_type,
            details = %details,
            "bot_event"
        );
    }

    /// Log provision event
    pub fn provision_event(bot_id: &str, action: &str, status: &str) {
        tracing::info!(
            bot_id = %bot_id,
            action = %action,
            status = %status,
            "provision_event"
        );
    }
}

/// Predefined metric names
pub mod metrics {
    // Bot lifecycle
    pub const BOT_CREATED: &str = "bot_created_total";
    pub const BOT_DEPLOYED: &str = "bot_deployed_total";
    pub const BOT_FATAL: &str = "bot_fatal_total";
    pub const BOT_DONE: &str = "bot_done_total";

    // Placement / routing
    pub const PLACEMENT_SUCCESS: &str = "placement_success_total";
    pub const PLACEMENT_REFUSED: &str = "placement_refused_total";
    pub const PLACEMENT_FAILED: &str = "placement_failed_total";

    // API
    pub const API_REQUESTS: &str = "api_requests_total";
    pub const API_ERRORS: &str = "api_errors_total";
    pub const RATE_LIMITED: &str = "rate_limited_total";

    // Pool
    pub const POOL_SLOT_CREATED: &str = "pool_slot_created_total";
    pub const POOL_SLOT_RECOVERED: &str = "pool_slot_recovered_total";
    pub const POOL_SLOT_DELETED: &str = "pool_slot_deleted_total";
    pub const POOL_LOCAL_QUEUE_DEPTH: &str = "pool_local_queue_depth";

    // Global queue
    pub const GLOBAL_QUEUE_DEPTH: &str = "global_queue_depth";
    pub const GLOBAL_QUEUE_TIMEOUT: &str = "global_queue_timeout_total";

    // Concurrency gates
    pub const DEPLOYMENT_SEMAPHORE_WAIT_MS: &str = "deployment_semaphore_wait_ms";
    pub const IMAGE_PULL_LOCK_WAIT_MS: &str = "image_pull_lock_wait_ms";

    // Heartbeat
    pub const HEARTBEAT_COUNT: &str = "heartbeat_total";
    pub const HEARTBEAT_DURATION_MS: &str = "heartbeat_duration_ms";
    pub const HEARTBEAT_TIMEOUT: &str = "heartbeat_timeout_total";

    // Events
    pub const EVENTS_INGESTED: &str = "events_ingested_total";
    pub const EVENTS_DROPPED: &str = "events_dropped_total";

    // Monitors
    pub const ORPHAN_RECONCILED: &str = "orphan_reconciled_total";
}
