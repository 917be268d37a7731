//! Error types for the Chime framework.

use chime_core::AdapterError;
use thiserror::Error;

/// A fault raised inside a middleware stage or a listener.
///
/// Faults never propagate out of a chain or a listener call: they are
/// reported through the robot's `Error` event and the dispatch carries on.
#[derive(Debug, Clone, Error)]
pub enum ChainFault {
    /// A middleware stage returned `Flow::Faulted`.
    #[error("middleware stage failed: {0}")]
    Stage(String),

    /// A listener callback returned an error.
    #[error("listener failed: {0}")]
    Listener(String),

    /// A stage, matcher or callback panicked.
    #[error("{origin} panicked: {message}")]
    Panicked {
        /// What panicked (e.g. `"listener callback"`).
        origin: &'static str,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// An outbound adapter call failed inside a callback.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl ChainFault {
    /// Creates a stage fault.
    pub fn stage(msg: impl Into<String>) -> Self {
        Self::Stage(msg.into())
    }

    /// Creates a listener fault.
    pub fn listener(msg: impl Into<String>) -> Self {
        Self::Listener(msg.into())
    }

    /// Builds a fault from a caught panic payload.
    pub fn from_panic(origin: &'static str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { origin, message }
    }
}

/// Errors returned by robot setup and lifecycle operations.
#[derive(Debug, Error)]
pub enum RobotError {
    /// A named middleware stage could not be resolved.
    #[error("invalid middleware stage '{name}': no stage registered under this name")]
    InvalidStage {
        /// The stage name that failed to resolve.
        name: String,
    },

    /// A listener pattern failed to compile.
    #[error("invalid listener pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The adapter failed to start or stopped with an error.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Result type for robot operations.
pub type RobotResult<T> = Result<T, RobotError>;
