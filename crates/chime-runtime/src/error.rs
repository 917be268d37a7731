//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No adapter factory is registered under the configured name.
    #[error("Adapter not found: {name} (registered: {})", available.join(", "))]
    AdapterNotFound { name: String, available: Vec<String> },

    /// Robot construction or lifecycle error.
    #[error("Robot error: {0}")]
    Robot(#[from] chime_framework::RobotError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<chime_core::AdapterError> for RuntimeError {
    fn from(err: chime_core::AdapterError) -> Self {
        Self::Robot(err.into())
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
