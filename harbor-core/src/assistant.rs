//! Request and reply shapes for the clinical-assistant chat relay

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HarborError, Result};

pub const MAX_MESSAGES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub patient_id: Option<String>,
}

impl ChatRequest {
    /// Conversation must be non-empty, bounded, and end on a user turn.
    pub fn validate(&self) -> Result<()> {
        let Some(last) = self.messages.last() else {
            return Err(HarborError::validation("messages", "is required"));
        };
        if self.messages.len() > MAX_MESSAGES {
            return Err(HarborError::validation(
                "messages",
                format!("at most {} messages per request", MAX_MESSAGES),
            ));
        }
        if let Some(idx) = self.messages.iter().position(|m| m.content.trim().is_empty()) {
            return Err(HarborError::validation(
                "messages",
                format!("message {} is empty", idx),
            ));
        }
        if last.role != Role::User {
            return Err(HarborError::validation(
                "messages",
                "the last message must come from the user",
            ));
        }
        Ok(())
    }
}

/// Pull reply text out of an upstream response.
///
/// Accepts `{"reply": "..."}` or a list of content blocks
/// `{"content": [{"type": "text", "text": "..."}]}` (text blocks joined).
pub fn extract_reply(body: &Value) -> Option<String> {
    if let Some(reply) = body.get("reply").and_then(Value::as_str) {
        return Some(reply.to_string());
    }
    let text: Vec<&str> = body
        .get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then(|| text.join(""))
}
