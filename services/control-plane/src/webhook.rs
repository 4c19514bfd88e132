//! Webhook notifications: operator alerts (Discord/email) and the per-bot
//! callback POST fired when a bot reaches a terminal status (spec §4.7).

use crate::alerting::{AlertSeverity, AlertType};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub discord_webhook_url: Option<String>,
    pub email_webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: std::env::var("DISCORD_ALERT_WEBHOOK").ok(),
            email_webhook_url: std::env::var("EMAIL_ALERT_WEBHOOK").ok(),
            timeout_secs: 10,
        }
    }
}

#[derive(Clone)]
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build HTTP client");

        Self { config, client }
    }

    /// Send an operator alert to all configured webhooks.
    pub async fn send_alert(&self, alert: &AlertType, severity: AlertSeverity) {
        if let Some(ref discord_url) = self.config.discord_webhook_url {
            if let Err(e) = self.send_discord_alert(discord_url, alert, severity).await {
                error!("failed to send Discord alert: {}", e);
            }
        }

        if let Some(ref email_url) = self.config.email_webhook_url {
            if let Err(e) = self.send_email_webhook(email_url, alert, severity).await {
                error!("failed to send email webhook: {}", e);
            }
        }
    }

    /// Fire-and-forget POST to a bot's configured webhook URL when it
    /// reaches DONE (spec §4.7's "outside tx, fire-and-forget POST for
    /// DONE"). Failures are logged only; the caller never awaits success.
    pub async fn notify_bot_done(&self, webhook_url: &str, bot_id: i64, recording_url: Option<&str>) {
        let payload = json!({
            "bot_id": bot_id,
            "status": "done",
            "recording_url": recording_url,
        });

        match self.client.post(webhook_url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(bot_id, "bot callback delivered");
            }
            Ok(resp) => {
                warn!(bot_id, status = %resp.status(), "bot callback returned non-success");
            }
            Err(e) => {
                warn!(bot_id, error = %e, "bot callback delivery failed");
            }
        }
    }

    async fn send_discord_alert(
        &self,
        webhook_url: &str,
        alert: &AlertType,
        severity: AlertSeverity,
    ) -> anyhow::Result<()> {
        let (title, description, color) = self.format_discord_embed(alert, severity);

        let payload = json!({
            "embeds": [{
                "title": title,
                "description": description,
                "color": color,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "footer": { "text": "Meeting Bot Fleet Alert" }
            }]
        });

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Discord webhook failed: {} - {}", status, body));
        }

        debug!("Discord alert sent successfully");
        Ok(())
    }

    async fn send_email_webhook(
        &self,
        webhook_url: &str,
        alert: &AlertType,
        severity: AlertSeverity,
    ) -> anyhow::Result<()> {
        let (subject, body) = self.format_email_content(alert, severity);

        let email_to =
            std::env::var("ALERT_EMAIL_TO").unwrap_or_else(|_| "alerts@example.com".to_string());

        let payload = json!({
            "to": email_to,
            "subject": subject,
            "body": body,
            "severity": severity.as_str(),
        });

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("email webhook failed: {}", response.status()));
        }

        debug!("email webhook sent successfully");
        Ok(())
    }

    fn format_discord_embed(&self, alert: &AlertType, severity: AlertSeverity) -> (String, String, u32) {
        let color = match severity {
            AlertSeverity::Info => 0x3498db,
            AlertSeverity::Warning => 0xf39c12,
            AlertSeverity::Critical => 0xe74c3c,
        };

        let (title, description) = match alert {
            AlertType::ProvisionFailure { bot_id, attempt } => (
                format!("Provision Failure [{}]", bot_id),
                format!("Failed **{}** times. Check adapter/backend status.", attempt),
            ),
            AlertType::OrphanedBot { bot_id, status, duration_secs } => {
                let mins = duration_secs / 60;
                (
                    format!("Orphaned Bot [{}]", bot_id),
                    format!("Status: `{}` for **{}m**", status, mins),
                )
            }
            AlertType::HighErrorRate { component, error_rate, threshold } => (
                format!("High Error Rate [{}]", component),
                format!("**{}%** errors (threshold: {}%)", error_rate, threshold),
            ),
            AlertType::BotOffline { bot_id, last_heartbeat } => {
                let last = last_heartbeat
                    .map(|h| format!("{}", h.format("%H:%M UTC")))
                    .unwrap_or_else(|| "unknown".to_string());
                (format!("Bot Offline [{}]", bot_id), format!("Last heartbeat: **{}**", last))
            }
            AlertType::QueueTimeout { bot_id, queued_secs } => (
                format!("Global Queue Timeout [{}]", bot_id),
                format!("Expired after **{}s** waiting", queued_secs),
            ),
        };

        (title, description, color)
    }

    fn format_email_content(&self, alert: &AlertType, severity: AlertSeverity) -> (String, String) {
        let subject = match alert {
            AlertType::ProvisionFailure { bot_id, .. } => format!("[FLEET] Provision failure - {}", bot_id),
            AlertType::OrphanedBot { bot_id, .. } => format!("[FLEET] Orphaned bot - {}", bot_id),
            AlertType::HighErrorRate { component, .. } => format!("[FLEET] High error rate - {}", component),
            AlertType::BotOffline { bot_id, .. } => format!("[FLEET] Bot offline - {}", bot_id),
            AlertType::QueueTimeout { bot_id, .. } => format!("[FLEET] Queue timeout - {}", bot_id),
        };

        let body = format!(
            "Severity: {}\n\nAlert: {:?}\n\nTime: {}\n\n---\nMeeting Bot Fleet Alert System",
            severity.as_str(),
            alert,
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );

        (subject, body)
    }

    pub async fn test_connection(&self) -> anyhow::Result<()> {
        let mut errors = vec![];

        if let Some(ref discord_url) = self.config.discord_webhook_url {
            match self.send_discord_test(discord_url).await {
                Ok(_) => info!("Discord webhook: OK"),
                Err(e) => {
                    error!("Discord webhook failed: {}", e);
                    errors.push(format!("Discord: {}", e));
                }
            }
        } else {
            warn!("Discord webhook not configured");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("webhook tests failed: {:?}", errors))
        }
    }

    async fn send_discord_test(&self, webhook_url: &str) -> anyhow::Result<()> {
        let payload = json!({ "content": "meeting bot fleet alert system test" });
        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("HTTP {}", response.status()));
        }

        Ok(())
    }
}

pub async fn fire_alert_with_webhook(
    alert_manager: &crate::alerting::AlertManager,
    webhook_notifier: &WebhookNotifier,
    alert: &AlertType,
    severity: AlertSeverity,
) {
    alert_manager.fire_alert(alert, severity).await;
    webhook_notifier.send_alert(alert, severity).await;
}
