//! Error types.
//!
//! This layer performs no retries: every error is surfaced to the caller and
//! the replication layer or client owns retry policy. Precondition failures
//! (compare-and-set mismatch) and misses are not errors at all; they are
//! ordinary `false` / absent responses.

use thiserror::Error;

/// Common error conditions raised while applying operations.
#[derive(Debug, Error)]
pub enum AtollError {
    /// Publish attempted on a session that was closed or expired.
    #[error("session {session} is closed")]
    ClosedSession { session: u64 },

    /// Codec failure at the byte-string boundary.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// No handler is registered under this name.
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },

    /// A command was submitted as a query or vice versa.
    #[error("operation {name} is a {actual}, not a {expected}")]
    OperationKindMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// The entry references a session the lane does not know.
    #[error("unknown session {session}")]
    UnknownSession { session: u64 },

    /// A session was opened twice.
    #[error("session {session} is already open")]
    DuplicateSession { session: u64 },

    /// Log entries must arrive with strictly increasing indexes.
    #[error("log index {index} is not after last applied index {last_applied}")]
    OutOfOrder { index: u64, last_applied: u64 },

    /// Counter registers hold exactly eight big-endian bytes.
    #[error("invalid counter value: expected 8 bytes, got {len}")]
    InvalidCounterValue { len: usize },

    /// Snapshot could not be produced or installed.
    #[error("snapshot error: {message}")]
    Snapshot { message: String },

    /// The resource was destroyed and accepts no further operations.
    #[error("resource destroyed")]
    ResourceDestroyed,

    /// No operation is mapped to the gateway verb and path.
    #[error("no route for {method} {path}")]
    NoRoute { method: String, path: String },
}

/// Coarse classification of an [`AtollError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Publish after session teardown.
    ClosedSession,
    /// Codec failure at the boundary.
    Serialization,
    /// The request itself was invalid for the current state or lane.
    Precondition,
    /// Internal failure (snapshot handling, destroyed resource).
    Internal,
}

impl AtollError {
    /// Create a ClosedSession error.
    pub fn closed_session(session: u64) -> Self {
        Self::ClosedSession { session }
    }

    /// Create a Serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a Snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ClosedSession { .. } => ErrorKind::ClosedSession,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::UnknownOperation { .. }
            | Self::OperationKindMismatch { .. }
            | Self::UnknownSession { .. }
            | Self::DuplicateSession { .. }
            | Self::OutOfOrder { .. }
            | Self::InvalidCounterValue { .. }
            | Self::NoRoute { .. } => ErrorKind::Precondition,
            Self::Snapshot { .. } | Self::ResourceDestroyed => ErrorKind::Internal,
        }
    }

    /// This layer never retries, so no error is retriable here.
    pub fn is_retriable(&self) -> bool {
        false
    }
}

impl From<serde_json::Error> for AtollError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

impl From<bincode::Error> for AtollError {
    fn from(error: bincode::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

/// Result type using AtollError.
pub type AtollResult<T> = Result<T, AtollError>;
