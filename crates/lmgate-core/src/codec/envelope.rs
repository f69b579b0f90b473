//! Reply envelope encoding.
//!
//! Assistant replies are wrapped in an OpenAI-style chat-completion
//! envelope so existing client libraries can parse them unchanged. Token
//! accounting is not available from the engine, so `usage` is zero-filled.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Model name reported when the request did not echo one.
pub const DEFAULT_MODEL_NAME: &str = "litertlm-model";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Build the completion envelope for a finished reply.
#[must_use]
pub fn completion_envelope(reply: &str, model: Option<&str>) -> ChatCompletion {
    ChatCompletion {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.unwrap_or(DEFAULT_MODEL_NAME).to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: reply.to_string(),
            },
            finish_reason: "stop".to_string(),
        }],
        usage: Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        },
    }
}

/// Serialize the completion envelope to its wire JSON.
#[must_use]
pub fn completion_json(reply: &str, model: Option<&str>) -> String {
    serde_json::to_string(&completion_envelope(reply, model))
        .unwrap_or_else(|_| error_json("failed to encode reply"))
}

/// `{"error": "<message>"}`
#[must_use]
pub fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// `{"success": true}`
#[must_use]
pub fn success_json() -> String {
    serde_json::json!({ "success": true }).to_string()
}
