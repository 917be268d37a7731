//! Layered configuration for the Chime runtime.
//!
//! Files (TOML, or YAML behind `yaml-config`), `CHIME_*` environment
//! variables and programmatic overrides merged through figment, then checked
//! by [`validate_config`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BrainConfig, ChimeConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, MiddlewareConfig,
    RobotConfig, SpanEventConfig,
};
pub use validation::validate_config;
