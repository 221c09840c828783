use crate::config::{WebhookEndpoint, WebhookSettings};
use serde_json::Value;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Webhook event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    /// A patient reminder is due for delivery
    ReminderDue,
    StudyStatusChanged,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::ReminderDue => "ReminderDue",
            WebhookEvent::StudyStatusChanged => "StudyStatusChanged",
        }
    }
}

/// Webhook manager
pub struct WebhookManager {
    settings: WebhookSettings,
    client: reqwest::Client,
}

impl WebhookManager {
    pub fn new(settings: WebhookSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default webhook client");
                reqwest::Client::new()
            });
        Self { settings, client }
    }

    /// Endpoints subscribed to an event (none while webhooks are disabled)
    pub fn subscribers(&self, event: WebhookEvent) -> Vec<WebhookEndpoint> {
        if !self.settings.enabled {
            return Vec::new();
        }
        self.settings
            .endpoints
            .iter()
            .filter(|ep| ep.events.iter().any(|e| e == event.as_str()))
            .cloned()
            .collect()
    }

    /// Trigger webhook for an event without waiting for delivery
    pub fn trigger(&self, event: WebhookEvent, payload: Value) {
        let endpoints = self.subscribers(event);
        if endpoints.is_empty() {
            return;
        }

        // Spawn async task to send webhooks (non-blocking)
        let client = self.client.clone();
        tokio::spawn(async move {
            for endpoint in endpoints {
                let _ = send(&client, &endpoint, event, &payload).await;
            }
        });
    }

    /// Send an event to every subscribed endpoint and wait for the outcome.
    ///
    /// Returns the number of endpoints reached; the first failure aborts
    /// with its message.
    pub async fn deliver(&self, event: WebhookEvent, payload: &Value) -> Result<usize, String> {
        let endpoints = self.subscribers(event);
        for endpoint in &endpoints {
            send(&self.client, endpoint, event, payload).await?;
        }
        Ok(endpoints.len())
    }
}

async fn send(
    client: &reqwest::Client,
    endpoint: &WebhookEndpoint,
    event: WebhookEvent,
    payload: &Value,
) -> Result<(), String> {
    let mut request = client
        .post(&endpoint.url)
        .header("X-Harbor-Event", event.as_str())
        .json(payload);

    // Add custom headers
    for (key, value) in &endpoint.headers {
        request = request.header(key, value);
    }

    match request.send().await {
        Ok(response) => {
            if response.status().is_success() {
                tracing::info!(
                    url = %endpoint.url,
                    event = event.as_str(),
                    status = %response.status(),
                    "Webhook sent successfully"
                );
                Ok(())
            } else {
                tracing::warn!(
                    url = %endpoint.url,
                    event = event.as_str(),
                    status = %response.status(),
                    "Webhook failed with non-success status"
                );
                Err(format!("{} returned {}", endpoint.url, response.status()))
            }
        }
        Err(e) => {
            tracing::error!(
                url = %endpoint.url,
                event = event.as_str(),
                error = %e,
                "Failed to send webhook"
            );
            Err(format!("{}: {}", endpoint.url, e))
        }
    }
}
