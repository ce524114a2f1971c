//! Schema translation between the Gemini chat shape and the flat
//! `messages` shape used by Workers AI.
//!
//! Inbound:
//!
//! ```text
//! {systemInstruction:{parts:[{text}]}, contents:[{role, parts:[{text}]}]}
//!   -> {messages:[{role:"system"|"user"|"assistant", content}], max_tokens}
//! ```
//!
//! Outbound: the completion text is wrapped as
//! `{candidates:[{content:{parts:[{text}], role:"model"}}]}`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result};

/// Text returned to the client when the model produced no completion.
pub const FALLBACK_COMPLETION: &str = "Sorry, the AI service returned no response.";

/// One message in the flat chat shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

/// Flat chat request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation, system prompt first
    pub messages: Vec<ChatMessage>,
    /// Completion length cap
    pub max_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(default)]
    system_instruction: Option<GeminiContent>,
    #[serde(default)]
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiContent {
    fn first_text(&self) -> Option<&str> {
        self.parts.first().and_then(|part| part.text.as_deref())
    }
}

/// Map a Gemini-style request body to the flat chat shape.
///
/// Fails with [`Error::InvalidRequest`] when the body is not an object of the
/// expected shape or a turn has no text part.
pub fn to_chat_request(body: &Value, max_tokens: u32) -> Result<ChatRequest> {
    let request = GeminiRequest::deserialize(body)
        .map_err(|e| Error::InvalidRequest(format!("unexpected request shape: {e}")))?;

    let mut messages = Vec::with_capacity(request.contents.len() + 1);

    if let Some(text) = request
        .system_instruction
        .as_ref()
        .and_then(GeminiContent::first_text)
        .filter(|text| !text.is_empty())
    {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: text.to_string(),
        });
    }

    for (index, turn) in request.contents.iter().enumerate() {
        let content = turn
            .first_text()
            .ok_or_else(|| Error::InvalidRequest(format!("contents[{index}] has no text part")))?;
        let role = match turn.role.as_deref() {
            Some("model") => "assistant",
            _ => "user",
        };
        messages.push(ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        });
    }

    Ok(ChatRequest {
        messages,
        max_tokens,
    })
}

/// Extract the completion text from a Workers AI response.
///
/// The REST API nests it under `result.response`; the bound runtime returns
/// a top-level `response`.
#[must_use]
pub fn completion_text(response: &Value) -> Option<&str> {
    response
        .pointer("/result/response")
        .or_else(|| response.get("response"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

/// Wrap completion text in the Gemini `candidates` envelope.
#[must_use]
pub fn to_candidates(text: Option<&str>) -> Value {
    json!({
        "candidates": [
            {
                "content": {
                    "parts": [{ "text": text.unwrap_or(FALLBACK_COMPLETION) }],
                    "role": "model"
                }
            }
        ]
    })
}
