use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{AlertConfig, MonitoringEvent};
use crate::audit::Severity;

/// Events at or above this severity are pushed to webhooks.
pub const NOTIFY_THRESHOLD: Severity = Severity::Medium;

const FOOTER: &str = "Contract Sentinel";

/// Posts monitor alerts to Slack and Discord webhooks.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build webhook HTTP client: {}", e))?;
        Ok(Self { client })
    }

    /// Deliver `event` to every configured channel. Returns how many
    /// deliveries succeeded; failures are logged only.
    pub async fn notify(&self, contract_name: &str, event: &MonitoringEvent, alerts: &AlertConfig) -> usize {
        if !event.severity.at_least(NOTIFY_THRESHOLD) {
            return 0;
        }

        let mut delivered = 0;

        if let Some(url) = alerts.slack_webhook.as_deref().filter(|u| !u.is_empty()) {
            match self.post(url, slack_payload(contract_name, event)).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Slack notification failed: {}", e),
            }
        }

        if let Some(url) = alerts.discord_webhook.as_deref().filter(|u| !u.is_empty()) {
            match self.post(url, discord_payload(contract_name, event)).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Discord notification failed: {}", e),
            }
        }

        if let Some(email) = alerts.email.as_deref().filter(|e| !e.is_empty()) {
            debug!("Email delivery to {} is not supported, skipping", email);
        }

        if delivered > 0 {
            info!("Alert '{}' delivered to {} channel(s)", event.message, delivered);
        }
        delivered
    }

    async fn post(&self, url: &str, payload: Value) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("webhook returned status {}", response.status()));
        }
        Ok(())
    }
}

fn slack_payload(contract_name: &str, event: &MonitoringEvent) -> Value {
    let color = match event.severity {
        Severity::High => "#FF8C00",
        Severity::Medium => "#FFD700",
        Severity::Low => "#32CD32",
        Severity::Info => "#808080",
    };

    json!({
        "attachments": [{
            "color": color,
            "title": format!("{}: {:?}", contract_name, event.event_type),
            "text": event.message,
            "fields": [
                {"title": "Severity", "value": event.severity.to_string(), "short": true},
                {"title": "Transaction", "value": event.hash.as_deref().unwrap_or("N/A"), "short": false}
            ],
            "footer": FOOTER,
            "ts": event.timestamp.timestamp()
        }]
    })
}

fn discord_payload(contract_name: &str, event: &MonitoringEvent) -> Value {
    let color = match event.severity {
        Severity::High => 16753920,
        Severity::Medium => 16776960,
        Severity::Low => 3329330,
        Severity::Info => 8421504,
    };

    json!({
        "embeds": [{
            "title": format!("{}: {:?}", contract_name, event.event_type),
            "description": event.message,
            "color": color,
            "fields": [
                {"name": "Severity", "value": event.severity.to_string(), "inline": true},
                {"name": "Transaction", "value": event.hash.as_deref().unwrap_or("N/A"), "inline": false}
            ],
            "footer": {"text": FOOTER},
            "timestamp": event.timestamp.to_rfc3339()
        }]
    })
}
