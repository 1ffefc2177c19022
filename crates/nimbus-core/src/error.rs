//! Error types for nimbus core operations.

use crate::ids::IdError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by core domain validation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A cron expression failed to parse.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCronExpression {
        /// The offending expression.
        expr: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// An interval trigger had a zero-length period.
    #[error("interval trigger must have a positive period")]
    ZeroInterval,

    /// An interval trigger ends before it starts.
    #[error("interval end date precedes start date")]
    IntervalEndBeforeStart,

    /// An invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// A conversation title violated the length bounds.
    #[error("title must be between 1 and {max} characters", max = crate::chat::TITLE_MAX_CHARS)]
    InvalidTitle,
}
