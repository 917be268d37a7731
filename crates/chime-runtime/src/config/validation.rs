//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ChimeConfig, LogFormat, LogOutput, MiddlewareConfig, RobotConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &ChimeConfig) -> ConfigResult<()> {
    validate_robot_config(&config.robot)?;

    if config.brain.autosave_interval_secs == 0 {
        return Err(ConfigError::validation(
            "brain.autosave_interval_secs must be greater than 0",
        ));
    }

    validate_middleware_config(&config.middleware)?;

    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if config.logging.format == LogFormat::Json && !cfg!(feature = "json-log") {
        return Err(ConfigError::validation(
            "logging.format = \"json\" requires the json-log feature",
        ));
    }

    Ok(())
}

fn validate_robot_config(robot: &RobotConfig) -> ConfigResult<()> {
    if robot.name.trim().is_empty() {
        return Err(ConfigError::missing_field("robot.name"));
    }

    if robot.adapter.trim().is_empty() {
        return Err(ConfigError::missing_field("robot.adapter"));
    }

    if let Some(alias) = &robot.alias {
        if alias.trim().is_empty() {
            return Err(ConfigError::validation("robot.alias cannot be blank"));
        }
        if alias == &robot.name {
            return Err(ConfigError::validation(format!(
                "robot.alias must differ from robot.name ({alias})"
            )));
        }
    }

    Ok(())
}

fn validate_middleware_config(middleware: &MiddlewareConfig) -> ConfigResult<()> {
    let chains = [
        ("receive", &middleware.receive),
        ("listener", &middleware.listener),
        ("response", &middleware.response),
    ];
    for (chain, names) in chains {
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::validation(format!(
                "middleware.{chain} contains an empty stage name"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&ChimeConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_empty_name() {
        let mut config = ChimeConfig::default();
        config.robot.name = "  ".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_alias_equal_to_name() {
        let mut config = ChimeConfig::default();
        config.robot.alias = Some(config.robot.name.clone());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_zero_autosave_interval() {
        let mut config = ChimeConfig::default();
        config.brain.autosave_interval_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_adapter_and_stage() {
        let mut config = ChimeConfig::default();
        config.robot.adapter = String::new();
        assert!(validate_config(&config).is_err());

        let mut config = ChimeConfig::default();
        config.middleware.response = vec!["shout".to_string(), String::new()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = ChimeConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("chime.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
