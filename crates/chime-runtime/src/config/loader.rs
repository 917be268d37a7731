//! Configuration loader using figment.
//!
//! Sources are layered, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`chime.{profile}.toml` / `chime.{profile}.yaml`)
//! 3. Main config file (`chime.toml` / `config.toml`, or the YAML equivalents)
//! 4. Environment variables (`CHIME_*`)
//! 5. Programmatic overrides passed to [`ConfigLoader::merge`]
//!
//! File formats are gated by the `toml-config` (default) and `yaml-config` features.
//!
//! # Environment Variable Mapping
//!
//! Nested keys are separated by `__`:
//!
//! - `CHIME_ROBOT__NAME=hal` → `robot.name = "hal"`
//! - `CHIME_BRAIN__AUTOSAVE_INTERVAL_SECS=30` → `brain.autosave_interval_secs = 30`
//! - `CHIME_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//!
//! The profile is read from `CHIME_PROFILE` unless set explicitly.
//!
//! # Example
//!
//! ```rust,ignore
//! use chime_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./deploy/chime.toml")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::ChimeConfig;

const ENV_PREFIX: &str = "CHIME_";
const PROFILE_VAR: &str = "CHIME_PROFILE";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Parses a profile name; `dev`/`prod` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `CHIME_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Overrides the search when set.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory to search for configuration files.
    ///
    /// Without any search path, the current directory and the user config
    /// directory (`~/.config/chime` on Linux) are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("chime")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a configuration on top of every other source.
    pub fn merge(mut self, config: ChimeConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<ChimeConfig> {
        let profile = self.profile.clone();
        let config: ChimeConfig = self.build_figment()?.extract()?;

        debug!(
            profile = %profile,
            robot = %config.robot.name,
            adapter = %config.robot.adapter,
            logging_level = %config.logging.level,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(ChimeConfig::default()));

        match self.config_file.take() {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, &path)?;
            }
            Some(path) => return Err(ConfigError::FileNotFound(path)),
            None => figment = self.load_config_files(figment),
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["PROFILE"]).split("__"));
        }

        // Programmatic overrides win over files and the environment.
        let overrides = std::mem::take(&mut self.figment);
        Ok(figment.merge(overrides))
    }

    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("chime"));
        }
        paths
    }

    /// Searches `search_paths × base_names`; the first directory holding a
    /// base file wins, with its profile-specific sibling layered beneath it.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for dir in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path = dir.join(format!("{stem}.{}.{ext}", self.profile));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = dir.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["chime.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["chime.yaml", "chime.yml", "config.yaml", "config.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!(paths = ?search_paths, "No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads configuration from the default locations and the environment.
pub fn load_config() -> ConfigResult<ChimeConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path`, with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<ChimeConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogLevel;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempdir().unwrap();
        let config = ConfigLoader::new()
            .without_env()
            .search_path(dir.path())
            .load()
            .unwrap();

        assert_eq!(config.robot.name, "chime");
        assert_eq!(config.robot.adapter, "shell");
        assert!(config.brain.autosave);
        assert_eq!(config.brain.autosave_interval_secs, 5);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new()
            .without_env()
            .file("/nonexistent/chime.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_merge_overrides_defaults() {
        let mut overrides = ChimeConfig::default();
        overrides.robot.name = "hal".to_string();
        overrides.robot.alias = Some("/".to_string());

        let dir = tempdir().unwrap();
        let config = ConfigLoader::new()
            .without_env()
            .search_path(dir.path())
            .merge(overrides)
            .load()
            .unwrap();

        assert_eq!(config.robot.name, "hal");
        assert_eq!(config.robot.alias.as_deref(), Some("/"));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_under_main_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("chime.toml"),
            "[robot]\nname = \"main\"\n\n[middleware]\nresponse = [\"shout\"]\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("chime.production.toml"),
            "[robot]\nname = \"prod\"\nadapter = \"irc\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .without_env()
            .profile("prod")
            .search_path(dir.path())
            .load()
            .unwrap();

        // The main file wins where both set a key.
        assert_eq!(config.robot.name, "main");
        assert_eq!(config.robot.adapter, "irc");
        assert_eq!(config.middleware.response, vec!["shout".to_string()]);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").as_str(), "staging");
    }
}
