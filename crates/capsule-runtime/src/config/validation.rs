//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{CapsuleConfig, LogOutput, LoggingConfig, PluginEntry};

/// Validates the entire configuration.
pub fn validate_config(config: &CapsuleConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;

    if config.framework.storage_dir.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("framework.storage_dir"));
    }

    validate_plugins(&config.plugins)
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.output is \"file\" but logging.file_path is not set",
        ));
    }
    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid logging filter module: {module:?}"
        )));
    }
    Ok(())
}

fn validate_plugins(plugins: &[PluginEntry]) -> ConfigResult<()> {
    let mut seen = HashSet::new();

    for (index, plugin) in plugins.iter().enumerate() {
        let location = plugin.location.trim();
        if location.is_empty() {
            return Err(ConfigError::missing_field(format!(
                "plugins[{index}].location"
            )));
        }
        if !seen.insert(location) {
            return Err(ConfigError::DuplicatePlugin(location.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn config_with(plugins: &[&str]) -> CapsuleConfig {
        CapsuleConfig {
            plugins: plugins.iter().map(|l| PluginEntry::new(*l)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&config_with(&["static:a", "static:b"])).is_ok());
        assert!(validate_config(&CapsuleConfig::default()).is_ok());
    }

    #[test]
    fn test_empty_location() {
        let err = validate_config(&config_with(&["static:a", "  "])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "plugins[1].location"));
    }

    #[test]
    fn test_duplicate_location() {
        let err = validate_config(&config_with(&["static:a", " static:a"])).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePlugin(l) if l == "static:a"));
    }

    #[test]
    fn test_empty_storage_dir() {
        let mut config = CapsuleConfig::default();
        config.framework.storage_dir = PathBuf::new();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = CapsuleConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        config.logging.file_path = Some(PathBuf::from("capsule.log"));
        assert!(validate_config(&config).is_ok());
    }
}
