//! Streaming chat: SSE framing and the persistence coordinator.

pub mod coordinator;
pub mod sse;

use serde::Deserialize;

use nimbus_core::ConversationId;

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The conversation context, oldest first.
    pub messages: Vec<ChatRequestMessage>,
    /// Model override; the configured default applies otherwise.
    #[serde(default)]
    pub model: Option<String>,
    /// Conversation to persist into. Without it the stream is stateless.
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// System prompt prepended to the context.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// One message in the request context.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequestMessage {
    /// `user`, `assistant`, or `system`.
    pub role: String,
    /// Message body.
    pub content: String,
}
