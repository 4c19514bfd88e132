//! Fleet-health alerting: threshold-based notifications for operators.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Alert type categories for the fleet control plane.
#[derive(Debug, Clone)]
pub enum AlertType {
    /// A deploy attempt failed repeatedly for one bot.
    ProvisionFailure { bot_id: i64, attempt: u32 },
    /// A pool slot or backend app exists with no matching counterpart.
    OrphanedBot {
        bot_id: i64,
        status: String,
        duration_secs: u64,
    },
    /// Elevated placement-refusal rate across a window.
    HighErrorRate {
        component: String,
        error_rate: f64,
        threshold: f64,
    },
    /// A bot has gone quiet past the heartbeat timeout.
    BotOffline {
        bot_id: i64,
        last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// A bot sat in the global queue past its deadline and was marked FATAL.
    QueueTimeout { bot_id: i64, queued_secs: i64 },
}

/// Alert configuration thresholds.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub provision_failure_threshold: u32,
    pub error_rate_threshold_pct: f64,
    pub offline_threshold_secs: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            provision_failure_threshold: 3,
            error_rate_threshold_pct: 5.0,
            offline_threshold_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
struct AlertState {
    last_fired: chrono::DateTime<chrono::Utc>,
    count: u32,
    acknowledged: bool,
}

/// Cooldown-gated alert manager. Tracks last-fired time per alert key so
/// the same condition doesn't spam notifications on every monitor tick.
#[derive(Clone)]
pub struct AlertManager {
    config: AlertConfig,
    alert_state: Arc<RwLock<HashMap<String, AlertState>>>,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            alert_state: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn should_fire(&self, alert_key: &str, cooldown_secs: i64) -> bool {
        let state = self.alert_state.read().await;
        if let Some(last) = state.get(alert_key) {
            let elapsed = chrono::Utc::now().signed_duration_since(last.last_fired);
            if elapsed.num_seconds() < cooldown_secs {
                return false;
            }
            if last.acknowledged {
                return false;
            }
        }
        true
    }

    async fn record_fired(&self, alert_key: String) {
        let mut state = self.alert_state.write().await;
        let entry = state.entry(alert_key).or_insert(AlertState {
            last_fired: chrono::Utc::now(),
            count: 0,
            acknowledged: false,
        });
        entry.last_fired = chrono::Utc::now();
        entry.count += 1;
    }

    pub async fn check_provision_failure(&self, bot_id: i64, attempt: u32) -> Option<AlertType> {
        if attempt >= self.config.provision_failure_threshold {
            let key = format!("provision_fail:{}", bot_id);
            if self.should_fire(&key, 300).await {
                self.record_fired(key).await;
                return Some(AlertType::ProvisionFailure { bot_id, attempt });
            }
        }
        None
    }

    pub async fn check_bot_offline(
        &self,
        bot_id: i64,
        last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Option<AlertType> {
        if let Some(last) = last_heartbeat {
            let elapsed = chrono::Utc::now().signed_duration_since(last);
            if elapsed.num_seconds() > self.config.offline_threshold_secs {
                let key = format!("offline:{}", bot_id);
                if self.should_fire(&key, 900).await {
                    self.record_fired(key).await;
                    return Some(AlertType::BotOffline {
                        bot_id,
                        last_heartbeat: Some(last),
                    });
                }
            }
        }
        None
    }

    pub async fn check_orphaned(
        &self,
        bot_id: i64,
        status: &str,
        duration_secs: u64,
    ) -> Option<AlertType> {
        let key = format!("orphan:{}", bot_id);
        if self.should_fire(&key, 1800).await {
            self.record_fired(key).await;
            return Some(AlertType::OrphanedBot {
                bot_id,
                status: status.to_string(),
                duration_secs,
            });
        }
        None
    }

    pub async fn check_error_rate(
        &self,
        component: &str,
        error_rate: f64,
        threshold: f64,
    ) -> Option<AlertType> {
        if error_rate >= threshold {
            let key = format!("error_rate:{}", component);
            if self.should_fire(&key, 600).await {
                self.record_fired(key).await;
                return Some(AlertType::HighErrorRate {
                    component: component.to_string(),
                    error_rate,
                    threshold,
                });
            }
        }
        None
    }

    pub async fn fire_alert(&self, alert: &AlertType, severity: AlertSeverity) {
        let (title, message) = match alert {
            AlertType::ProvisionFailure { bot_id, attempt } => (
                format!("Provision Failure [{}]", bot_id),
                format!("Failed {} times", attempt),
            ),
            AlertType::OrphanedBot {
                bot_id,
                status,
                duration_secs,
            } => (
                format!("Orphaned Bot [{}]", bot_id),
                format!("Status: {}, Duration: {}s", status, duration_secs),
            ),
            AlertType::HighErrorRate {
                component,
                error_rate,
                threshold,
            } => (
                format!("High Error Rate [{}]", component),
                format!("Current: {}%, Threshold: {}%", error_rate, threshold),
            ),
            AlertType::BotOffline {
                bot_id,
                last_heartbeat,
            } => {
                let last = last_heartbeat
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                (
                    format!("Bot Offline [{}]", bot_id),
                    format!("Last heartbeat: {}", last),
                )
            }
            AlertType::QueueTimeout { bot_id, queued_secs } => (
                format!("Global Queue Timeout [{}]", bot_id),
                format!("Queued for {}s before expiring", queued_secs),
            ),
        };

        match severity {
            AlertSeverity::Info => info!(alert_type = ?alert, title = %title, message = %message, "ALERT"),
            AlertSeverity::Warning => warn!(alert_type = ?alert, title = %title, message = %message, "ALERT"),
            AlertSeverity::Critical => error!(alert_type = ?alert, title = %title, message = %message, "ALERT"),
        }
    }

    pub async fn acknowledge(&self, alert_key: &str) {
        let mut state = self.alert_state.write().await;
        if let Some(entry) = state.get_mut(alert_key) {
            entry.acknowledged = true;
        }
    }
}
