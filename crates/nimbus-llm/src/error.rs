//! Error type for LLM backend operations.

/// Errors surfaced by [`crate::LlmClient`].
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend returned an error status.
    #[error("LLM API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error body, when one was readable.
        message: String,
    },

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),
}
