//! Storage error types.

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the storage layer.
///
/// An ownership mismatch surfaces as [`StoreError::NotFound`]; callers must
/// not be able to distinguish "absent" from "not yours".
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity not found (or not owned by the caller).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"conversation"`.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Unique constraint violation.
    #[error("{entity} already exists: {id}")]
    Conflict {
        /// Entity kind.
        entity: &'static str,
        /// The conflicting identifier.
        id: String,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Payload (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl StoreError {
    /// Map an insert error, turning unique violations into [`Self::Conflict`].
    pub(crate) fn on_insert(err: sqlx::Error, entity: &'static str, id: &str) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::Conflict {
                    entity,
                    id: id.to_string(),
                };
            }
        }
        Self::from(err)
    }
}
