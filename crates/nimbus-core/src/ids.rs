//! Identifier types for nimbus.
//!
//! UUID-backed identifiers are generated through the `uuid_id_type!` macro so
//! every id carries the same trait surface (serde as string, `FromStr`,
//! `Display`, conversions). Job identifiers are chosen by the caller and are
//! therefore a validated string newtype rather than a UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of a job identifier.
pub const JOB_ID_MAX_LEN: usize = 255;

/// Errors produced when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The value was not a valid UUID.
    #[error("invalid uuid")]
    InvalidUuid,

    /// A job id was empty.
    #[error("job id must not be empty")]
    EmptyJobId,

    /// A job id exceeded [`JOB_ID_MAX_LEN`].
    #[error("job id exceeds {JOB_ID_MAX_LEN} characters")]
    JobIdTooLong,
}

/// Macro to define a UUID-based identifier type with standard trait
/// implementations: serde (as string), `FromStr`, `Display`, `Debug`,
/// `TryFrom<String>`, `Into<String>`.
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id_type!(
    ConversationId,
    "A chat conversation identifier (UUID, server-generated)."
);
uuid_id_type!(
    MessageId,
    "A chat message identifier (UUID, server-generated)."
);
uuid_id_type!(
    HistoryId,
    "A job history record identifier (UUID, server-generated)."
);

/// A job identifier.
///
/// Job ids are chosen by the client when the job is created and must be
/// unique across the job store. They are plain strings bounded to
/// [`JOB_ID_MAX_LEN`] characters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Create a job id, validating that it is non-empty and within bounds.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::EmptyJobId`] or [`IdError::JobIdTooLong`].
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::EmptyJobId);
        }
        if id.chars().count() > JOB_ID_MAX_LEN {
            return Err(IdError::JobIdTooLong);
        }
        Ok(Self(id))
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for JobId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
