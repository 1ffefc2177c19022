//! Core types for the nimbus backend.
//!
//! This crate provides the foundational types shared by the scheduler, the
//! storage layer, and the HTTP service:
//!
//! - **Identifiers**: `JobId`, `ConversationId`, `MessageId`, `HistoryId`
//! - **Auth**: `Principal`, `AuthSource`, `ApiKeyData`
//! - **Scheduling**: `Trigger`, `TriggerKind`, `JobSpec`
//! - **History**: `JobStatus`, `JobHistoryRecord`
//! - **Chat**: `Conversation`, `ChatMessage`, `Role`, title derivation
//!
//! Everything here is plain data plus small pure functions; I/O lives in the
//! `nimbus-store`, `nimbus-scheduler`, and `nimbus-service` crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod chat;
pub mod error;
pub mod history;
pub mod ids;
pub mod job;
pub mod principal;
pub mod trigger;

pub use chat::{
    derive_title, validate_title, ChatMessage, Conversation, Role, DEFAULT_TITLE, TITLE_MAX_CHARS,
};
pub use error::{CoreError, Result};
pub use history::{JobHistoryRecord, JobStatus};
pub use ids::{ConversationId, HistoryId, IdError, JobId, MessageId};
pub use job::{JobSpec, DEFAULT_MAX_INSTANCES, DEFAULT_MISFIRE_GRACE_SECONDS};
pub use principal::{ApiKeyData, AuthSource, Principal};
pub use trigger::{IntervalSpec, Trigger, TriggerKind};
