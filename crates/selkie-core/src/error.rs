//! Error types for Selkie
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for Selkie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Selkie engine error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Dispatch Errors
    // =========================================================================
    #[error("Handler not found: {name}")]
    HandlerNotFound { name: String },

    #[error("Unknown continuation for call {call_id}")]
    UnknownContinuation { call_id: String },

    #[error("Double resolution of call {call_id}")]
    DoubleResolution { call_id: String },

    #[error("Mailbox full: depth {depth}, max {max}")]
    MailboxFull { depth: usize, max: usize },

    #[error("Handler failed: {code}: {message}")]
    HandlerFailed { code: String, message: String },

    // =========================================================================
    // Scheduler Errors
    // =========================================================================
    #[error("Resource locked: {tag}, held by message {holder}")]
    ResourceLocked { tag: String, holder: u64 },

    #[error("Too many suspended continuations: {count} exceeds limit of {limit}")]
    TooManySuspended { count: usize, limit: usize },

    #[error("Too many pending calls: {count} exceeds limit of {limit}")]
    TooManyPendingCalls { count: usize, limit: usize },

    // =========================================================================
    // Memory Errors
    // =========================================================================
    #[error("Out of memory: requested {requested} bytes, used {used}, ceiling {ceiling}")]
    OutOfMemory {
        requested: usize,
        used: usize,
        ceiling: usize,
    },

    #[error("Stable write failed: {key}, reason: {reason}")]
    StableWriteFailure { key: String, reason: String },

    #[error("Invalid key: {key}, reason: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Storage I/O failed: {reason}")]
    StorageIo { reason: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid actor ID: {id}, reason: {reason}")]
    InvalidActorId { id: String, reason: String },

    #[error("PRNG used before seeding")]
    PrngUnseeded,

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a handler not found error
    pub fn handler_not_found(name: impl Into<String>) -> Self {
        Self::HandlerNotFound { name: name.into() }
    }

    /// Create an unknown continuation error
    pub fn unknown_continuation(call_id: impl fmt::Display) -> Self {
        Self::UnknownContinuation {
            call_id: call_id.to_string(),
        }
    }

    /// Create a double resolution error
    pub fn double_resolution(call_id: impl fmt::Display) -> Self {
        Self::DoubleResolution {
            call_id: call_id.to_string(),
        }
    }

    /// Create a stable write failure error
    pub fn stable_write_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StableWriteFailure {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage I/O error
    pub fn storage_io(reason: impl Into<String>) -> Self {
        Self::StorageIo {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Short, stable name of the variant, used for metric labels and error codes
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HandlerNotFound { .. } => "handler_not_found",
            Self::UnknownContinuation { .. } => "unknown_continuation",
            Self::DoubleResolution { .. } => "double_resolution",
            Self::MailboxFull { .. } => "mailbox_full",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::ResourceLocked { .. } => "resource_locked",
            Self::TooManySuspended { .. } => "too_many_suspended",
            Self::TooManyPendingCalls { .. } => "too_many_pending_calls",
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::StableWriteFailure { .. } => "stable_write_failure",
            Self::InvalidKey { .. } => "invalid_key",
            Self::StorageIo { .. } => "storage_io",
            Self::InvalidActorId { .. } => "invalid_actor_id",
            Self::PrngUnseeded => "prng_unseeded",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::InvalidConfiguration { .. } => "invalid_configuration",
            Self::Internal { .. } => "internal",
            Self::SerializationFailed { .. } => "serialization_failed",
            Self::DeserializationFailed { .. } => "deserialization_failed",
            Self::Other(_) => "other",
        }
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::StableWriteFailure { .. }
                | Self::MailboxFull { .. }
                | Self::ResourceLocked { .. }
        )
    }
}

// =============================================================================
// HandlerError
// =============================================================================

/// Business-level failure raised by a handler segment
///
/// Returning a `HandlerError` rolls back the current segment only. Segments
/// committed before the last suspension stay committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerError {
    /// Machine-readable code (e.g. "insufficient_funds", "out_of_memory")
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl HandlerError {
    /// Create a new handler error
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<Error> for HandlerError {
    fn from(err: Error) -> Self {
        match err {
            Error::HandlerFailed { code, message } => Self { code, message },
            other => Self {
                code: other.kind().to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<HandlerError> for Error {
    fn from(err: HandlerError) -> Self {
        Self::HandlerFailed {
            code: err.code,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::handler_not_found("deposit");
        assert!(err.to_string().contains("deposit"));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::stable_write_failed("k", "full").is_retriable());
        assert!(Error::ResourceLocked {
            tag: "account".into(),
            holder: 3
        }
        .is_retriable());
        assert!(!Error::PrngUnseeded.is_retriable());
        assert!(!Error::double_resolution("0:1").is_retriable());
    }

    #[test]
    fn test_handler_error_from_engine_error() {
        let err: HandlerError = Error::OutOfMemory {
            requested: 10,
            used: 95,
            ceiling: 100,
        }
        .into();
        assert_eq!(err.code, "out_of_memory");
        assert!(err.message.contains("ceiling 100"));
    }

    #[test]
    fn test_handler_error_survives_round_trip_through_engine_error() {
        let original = HandlerError::new("insufficient_funds", "balance 10 < 50");
        let engine: Error = original.clone().into();
        assert_eq!(engine.kind(), "handler_failed");
        assert_eq!(HandlerError::from(engine), original);
    }
}
