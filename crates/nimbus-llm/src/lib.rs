//! Streaming chat client for the LLM backend.
//!
//! Talks the Ollama HTTP API: `POST /api/chat` with `stream: true` returns
//! newline-delimited JSON chunks, `GET /api/tags` lists installed models.
//! The client surfaces the stream as typed [`ChatChunk`]s; malformed lines
//! are logged and skipped so a glitchy upstream never aborts a response
//! mid-flight.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod types;

pub use client::LlmClient;
pub use error::LlmError;
pub use types::{ChatChunk, ChatTurn, ModelInfo};
