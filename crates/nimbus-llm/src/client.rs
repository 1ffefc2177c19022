//! LLM backend client implementation.

use std::pin::Pin;
use std::time::Duration;

use futures::stream::{BoxStream, Stream};
use futures::StreamExt;
use reqwest::Client;

use crate::error::LlmError;
use crate::types::{ChatChunk, ChatOptions, ChatStreamRequest, ChatTurn, ModelInfo, ModelList, RawChunk};

/// Connection timeout for backend requests. There is deliberately no total
/// request timeout: chat streams may be long-lived.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

/// Client for the Ollama-compatible LLM backend.
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    default_model: String,
}

impl LlmClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Configuration`] when the HTTP client cannot be
    /// built.
    pub fn new(
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        })
    }

    /// The configured default model.
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Sanitize a requested model name: trim whitespace, fall back to the
    /// default when empty or absent.
    #[must_use]
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.default_model.clone(),
        }
    }

    /// List models installed on the backend.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] / [`LlmError::Api`] on failure.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let list: ModelList = response.json().await?;
        Ok(list.models)
    }

    /// Open a streaming chat completion.
    ///
    /// Returns an owned stream of [`ChatChunk`]s, detached from this
    /// client's lifetime so callers can drive it from a spawned task.
    /// Malformed NDJSON lines are logged and skipped; only transport
    /// failures surface as stream errors.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] when the request cannot be sent and
    /// [`LlmError::Api`] when the backend rejects it.
    pub async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatTurn],
        temperature: Option<f32>,
    ) -> Result<BoxStream<'static, Result<ChatChunk, LlmError>>, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatStreamRequest {
            model,
            messages,
            stream: true,
            options: temperature.map(|temperature| ChatOptions { temperature }),
        };

        tracing::debug!(model = %model, messages = messages.len(), "Opening chat stream");
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, message = %message, "Chat stream rejected");
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let bytes: ByteStream = Box::pin(response.bytes_stream());
        Ok(ndjson_chunks(bytes).boxed())
    }
}

struct StreamState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    exhausted: bool,
}

/// Decode an NDJSON byte stream into chat chunks, skipping malformed lines.
fn ndjson_chunks(bytes: ByteStream) -> impl Stream<Item = Result<ChatChunk, LlmError>> + Send {
    let state = StreamState {
        bytes,
        buffer: Vec::new(),
        exhausted: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            // Emit any complete line already buffered.
            if let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                if let Some(chunk) = parse_line(&line) {
                    return Some((Ok(chunk), state));
                }
                continue;
            }
            if state.exhausted {
                // Flush a final unterminated line, if any.
                let line = std::mem::take(&mut state.buffer);
                return parse_line(&line).map(|chunk| (Ok(chunk), state));
            }
            match state.bytes.next().await {
                Some(Ok(data)) => state.buffer.extend_from_slice(&data),
                Some(Err(e)) => return Some((Err(LlmError::Http(e)), state)),
                None => state.exhausted = true,
            }
        }
    })
}

fn parse_line(line: &[u8]) -> Option<ChatChunk> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<RawChunk>(text) {
        Ok(raw) => Some(ChatChunk::from(raw)),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed stream chunk");
            None
        }
    }
}
