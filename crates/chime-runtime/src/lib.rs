//! Chime Runtime - orchestration layer for the Chime chat-bot framework.
//!
//! This crate provides:
//! - Layered configuration (`ChimeConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`, `init_from_config`)
//! - Adapter factories and named middleware catalogs selected by configuration
//! - The `ChimeRuntime` lifecycle with Ctrl+C/SIGTERM handling
//!
//! ```toml
//! # chime.toml
//! [robot]
//! name = "hal"
//! alias = "/"
//! adapter = "shell"
//!
//! [brain]
//! autosave_interval_secs = 30
//!
//! [middleware]
//! response = ["shout"]
//!
//! [logging]
//! level = "debug"
//! filters = { chime_framework = "trace" }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{
    ChimeConfig, ConfigError, ConfigLoader, ConfigResult, LogFormat, LogLevel, LogOutput,
    LoggingConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};
pub use runtime::{AdapterFactory, ChimeRuntime, RuntimeBuilder};

// Re-export tracing for use by applications
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for applications built on the runtime.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
