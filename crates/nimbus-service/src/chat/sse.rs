//! SSE frame builders for the chat stream.
//!
//! Content chunks use an OpenAI-compatible envelope so off-the-shelf clients
//! parse them; `thinking` and the saved message ids travel as SSE comment
//! lines, invisible to standard SSE parsers but readable by ours.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use nimbus_core::MessageId;

/// Terminal sentinel frame.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Per-stream frame builder carrying the stream id, creation time, and
/// model shared by every chunk.
pub struct SseFrames {
    stream_id: String,
    created: i64,
    model: String,
}

impl SseFrames {
    /// Start a new stream's framing.
    #[must_use]
    pub fn new(model: String) -> Self {
        Self {
            stream_id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            created: Utc::now().timestamp(),
            model,
        }
    }

    /// The stream id (`chatcmpl-…`).
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// A content delta chunk with `finish_reason: null`.
    #[must_use]
    pub fn content_chunk(&self, content: &str) -> String {
        let payload = json!({
            "id": self.stream_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": { "content": content },
                "finish_reason": null,
            }],
        });
        format!("data: {payload}\n\n")
    }

    /// The final chunk carrying `finish_reason: "stop"`.
    #[must_use]
    pub fn stop_chunk(&self) -> String {
        let payload = json!({
            "id": self.stream_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": "stop",
            }],
        });
        format!("data: {payload}\n\n")
    }

    /// A `:thinking` comment line.
    #[must_use]
    pub fn thinking_comment(&self, thinking: &str) -> String {
        let payload = json!({
            "thinking": thinking,
            "messageId": self.stream_id,
        });
        format!(":thinking {payload}\n")
    }

    /// An in-band error frame followed by nothing; callers still terminate
    /// with [`DONE_FRAME`].
    #[must_use]
    pub fn error_frame(detail: &str) -> String {
        let payload = json!({ "error": { "detail": detail } });
        format!("data: {payload}\n\n")
    }

    /// The `:message_ids` trailer carrying the saved row ids. Absent ids are
    /// omitted.
    #[must_use]
    pub fn message_ids_comment(
        user_message_id: Option<&MessageId>,
        assistant_message_id: Option<&MessageId>,
    ) -> String {
        let mut payload = serde_json::Map::new();
        if let Some(id) = user_message_id {
            payload.insert("user_message_id".into(), json!(id.to_string()));
        }
        if let Some(id) = assistant_message_id {
            payload.insert("assistant_message_id".into(), json!(id.to_string()));
        }
        format!(
            ":message_ids {}\n",
            serde_json::Value::Object(payload)
        )
    }
}
