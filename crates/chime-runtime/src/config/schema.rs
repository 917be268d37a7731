//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChimeConfig {
    /// Robot identity and adapter selection.
    #[serde(default)]
    pub robot: RobotConfig,

    /// Brain persistence settings.
    #[serde(default)]
    pub brain: BrainConfig,

    /// Named middleware stages to install, per chain.
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Robot identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Name the robot answers to in `respond` listeners.
    #[serde(default = "default_robot_name")]
    pub name: String,

    /// Optional second name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Name of the adapter factory to run the robot on.
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            name: default_robot_name(),
            alias: None,
            adapter: default_adapter(),
        }
    }
}

fn default_robot_name() -> String {
    chime_framework::DEFAULT_NAME.to_string()
}

fn default_adapter() -> String {
    "shell".to_string()
}

/// Brain persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Whether the brain periodically emits `Persist` once running.
    #[serde(default = "default_autosave")]
    pub autosave: bool,

    /// Seconds between autosaves.
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,
}

impl BrainConfig {
    /// Returns the autosave interval as a `Duration`.
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            autosave: default_autosave(),
            autosave_interval_secs: default_autosave_interval(),
        }
    }
}

fn default_autosave() -> bool {
    true
}

fn default_autosave_interval() -> u64 {
    chime_framework::DEFAULT_SAVE_INTERVAL.as_secs()
}

/// Stage names per chain, resolved against the catalogs registered on the
/// runtime builder. Order is installation order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub receive: Vec<String>,

    #[serde(default)]
    pub listener: Vec<String>,

    #[serde(default)]
    pub response: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output` is `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module level overrides, e.g. `chime_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_max_files")]
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
        }
    }
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> u32 {
    5
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format. `json` requires the `json-log` feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}
