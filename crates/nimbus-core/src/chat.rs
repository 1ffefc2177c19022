//! Conversation and message types, plus title derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::ids::{ConversationId, MessageId};

/// Title given to conversations until the first assistant reply lands.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Hard cap on conversation titles, matching the database column.
pub const TITLE_MAX_CHARS: usize = 255;

/// Derived titles are cut to this many characters.
const TITLE_TRUNCATE_AT: usize = 50;

/// A message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// System prompt.
    System,
}

impl Role {
    /// Stable string form used in the database column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A chat conversation owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Owning user.
    pub user_id: String,
    /// Display title, 1..=255 characters.
    pub title: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp; bumped on every message mutation.
    pub updated_at: DateTime<Utc>,
}

/// A message within a conversation.
///
/// Messages are totally ordered by `created_at` within their conversation,
/// with the id as tie-breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier.
    pub id: MessageId,
    /// Parent conversation.
    pub conversation_id: ConversationId,
    /// Author role.
    pub role: Role,
    /// Message body.
    pub content: String,
    /// Model that produced the message, for assistant messages.
    pub model: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Derive a conversation title from the first user message.
///
/// Trims whitespace, cuts to 50 characters (47 plus an ellipsis), falls back
/// to [`DEFAULT_TITLE`] when empty, and enforces the 255-character cap. The
/// derivation is idempotent: applying it to its own output changes nothing.
#[must_use]
pub fn derive_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    let mut title: String = if trimmed.chars().count() > TITLE_TRUNCATE_AT {
        let mut cut: String = trimmed.chars().take(TITLE_TRUNCATE_AT - 3).collect();
        cut.push_str("...");
        cut
    } else {
        trimmed.to_string()
    };
    if title.is_empty() {
        title = DEFAULT_TITLE.to_string();
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        title = title.chars().take(TITLE_MAX_CHARS - 3).collect();
        title.push_str("...");
    }
    title
}

/// Validate a client-supplied conversation title: trimmed, 1..=255
/// characters.
///
/// # Errors
///
/// Returns [`CoreError::InvalidTitle`] when the title is empty after
/// trimming or exceeds [`TITLE_MAX_CHARS`].
pub fn validate_title(title: &str) -> Result<String, CoreError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > TITLE_MAX_CHARS {
        return Err(CoreError::InvalidTitle);
    }
    Ok(title.to_string())
}
