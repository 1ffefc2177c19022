//! Wire types for the Ollama chat API.

use serde::{Deserialize, Serialize};

/// One message in the outbound conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// `user`, `assistant`, or `system`.
    pub role: String,
    /// Message body.
    pub content: String,
}

impl ChatTurn {
    /// Build a turn.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Serialize)]
pub(crate) struct ChatStreamRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatTurn],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,
}

/// Sampling options forwarded to the backend.
#[derive(Debug, Serialize)]
pub(crate) struct ChatOptions {
    pub temperature: f32,
}

/// One decoded chunk of a streaming chat response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatChunk {
    /// Model that produced the chunk, when reported.
    pub model: Option<String>,
    /// Content delta, possibly empty.
    pub content: String,
    /// Reasoning delta, for models that emit it.
    pub thinking: Option<String>,
    /// Whether this is the final chunk.
    pub done: bool,
}

/// Raw NDJSON line from the backend.
#[derive(Debug, Deserialize)]
pub(crate) struct RawChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thinking: Option<String>,
}

impl From<RawChunk> for ChatChunk {
    fn from(raw: RawChunk) -> Self {
        let message = raw.message.unwrap_or_default();
        Self {
            model: raw.model,
            content: message.content,
            thinking: message.thinking,
            done: raw.done,
        }
    }
}

/// One installed model, from `GET /api/tags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name, e.g. `llama3:8b`.
    pub name: String,
    /// Model size in bytes, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Last-modified timestamp, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelList {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}
