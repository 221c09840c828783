//! Relay to the configured clinical-assistant chat endpoint
//!
//! The relay knows nothing about the provider behind the endpoint: it
//! posts `{model, system, messages}` and reads back either a `reply`
//! string or a list of text content blocks.

use crate::config::AssistantSettings;
use harbor_core::assistant::{extract_reply, ChatMessage};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Clinical assistant is not configured")]
    NotConfigured,

    #[error("Assistant endpoint failed: {0}")]
    Upstream(String),
}

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: &'a [ChatMessage],
}

pub struct AssistantClient {
    settings: AssistantSettings,
    client: reqwest::Client,
}

impl AssistantClient {
    pub fn new(settings: AssistantSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default assistant client");
                reqwest::Client::new()
            });
        Self { settings, client }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint().is_some()
    }

    fn endpoint(&self) -> Option<&str> {
        self.settings
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Forward a conversation and return the assistant's reply text.
    ///
    /// `context` is appended to the configured system prompt.
    pub async fn relay(
        &self,
        messages: &[ChatMessage],
        context: Option<&str>,
    ) -> Result<String, RelayError> {
        let endpoint = self.endpoint().ok_or(RelayError::NotConfigured)?;

        let system = match context {
            Some(ctx) => format!("{}\n\n{}", self.settings.system_prompt, ctx),
            None => self.settings.system_prompt.clone(),
        };
        let body = UpstreamRequest {
            model: &self.settings.model,
            system: &system,
            messages,
        };

        let mut request = self.client.post(endpoint).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.header(self.settings.api_key_header.as_str(), key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Upstream(format!("endpoint returned {}", status)));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RelayError::Upstream(format!("unreadable reply: {}", e)))?;

        extract_reply(&payload)
            .ok_or_else(|| RelayError::Upstream("reply contained no text".to_string()))
    }
}
