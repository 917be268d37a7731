//! Unified error types for the Chime core.
//!
//! Dispatch-level errors (chain faults, robot errors) live in `chime-framework`.

use thiserror::Error;

// =============================================================================
// Adapter Errors
// =============================================================================

/// Errors raised by a transport adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The adapter is not connected to its chat platform.
    #[error("adapter is not connected")]
    NotConnected,

    /// An outbound action could not be delivered.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The adapter does not implement the requested action.
    #[error("adapter does not support '{action}'")]
    Unsupported {
        /// The action that was requested (e.g. `"play"`).
        action: &'static str,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal adapter error.
    #[error("adapter error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Creates an internal adapter error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a send failure.
    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors raised by datastore operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A store operation was attempted before a backing store was attached.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    /// The backing store failed.
    #[error("datastore backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type for datastore operations.
pub type StoreResult<T> = Result<T, StoreError>;
