//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config`: enables TOML configuration files (`capsule.toml`)
//! - `yaml-config`: enables YAML configuration files (`capsule.yaml`, `capsule.yml`)
//!
//! Both features can be enabled simultaneously; if so, both formats are
//! searched and loaded.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic defaults passed to [`ConfigLoader::merge`]
//! 3. Profile-specific config file (`capsule.{profile}.toml`)
//! 4. Main config file (`capsule.toml` / `capsule.yaml`)
//! 5. Environment variables (`CAPSULE_*`)
//!
//! # Environment Variable Mapping
//!
//! Variables use the `CAPSULE_` prefix with `__` as the nesting separator:
//!
//! - `CAPSULE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `CAPSULE_FRAMEWORK__STORAGE_DIR=/var/lib/app` → `framework.storage_dir`
//! - `CAPSULE_FRAMEWORK__QUEUED_DELIVERY=thread` → `framework.queued_delivery`
//!
//! # Example
//!
//! ```rust,ignore
//! use capsule_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/capsule.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace};
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use tracing::warn;

use super::error::{ConfigError, ConfigResult};
use super::schema::CapsuleConfig;

/// Environment variable selecting the profile.
const PROFILE_VAR: &str = "CAPSULE_PROFILE";
/// Prefix of environment overrides.
const ENV_PREFIX: &str = "CAPSULE_";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `prod` and `dev` are accepted as aliases.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `CAPSULE_PROFILE`, defaulting to [`Profile::Development`].
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    /// Programmatic layers merged over the built-in defaults.
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to the search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory (`~/.config/capsule` on Linux).
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("capsule"))
        } else {
            self
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a programmatic configuration over the built-in defaults.
    ///
    /// Files and environment variables still take precedence.
    pub fn merge(mut self, config: CapsuleConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Returns the active profile.
    pub fn active_profile(&self) -> &Profile {
        &self.profile
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<CapsuleConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: CapsuleConfig = figment.extract()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            plugins = config.plugins.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(CapsuleConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = self.config_file.take() {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, &path)?;
            } else {
                return Err(ConfigError::FileNotFound(path));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["PROFILE"])
                    .split("__"),
            );
        }

        Ok(figment)
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            let mut paths = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                paths.push(cwd);
            }
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("capsule"));
            }
            paths
        } else {
            self.search_paths.clone()
        }
    }

    /// Searches `search_paths × base_names`, merging the profile variant and
    /// then the base file of the first directory that has one.
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
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    figment = merge_fn(figment, &base_path);
                    return (figment, true);
                }
            }
        }
        (figment, false)
    }

    /// Searches for configuration files in every enabled format.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["capsule.toml"],
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
                &["capsule.yaml", "capsule.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }

    #[cfg(not(any(feature = "toml-config", feature = "yaml-config")))]
    fn load_config_files(&self, figment: Figment) -> Figment {
        debug!("No configuration file format enabled, using defaults");
        figment
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::config::{LogLevel, QueuedDelivery};

    #[test]
    fn test_default_config() {
        Jail::expect_with(|_| {
            let config = ConfigLoader::new().without_env().load().unwrap();
            assert_eq!(config.logging.level.as_str(), "info");
            assert!(config.plugins.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("CAPSULE_PROFILE", "prod");
            assert_eq!(Profile::from_env(), Profile::Production);
            jail.set_env("CAPSULE_PROFILE", "Staging");
            assert_eq!(Profile::from_env(), Profile::Custom("staging".into()));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("CAPSULE_LOGGING__LEVEL", "debug");
            jail.set_env("CAPSULE_FRAMEWORK__QUEUED_DELIVERY", "thread");
            jail.set_env("CAPSULE_PROFILE", "production");

            let config = ConfigLoader::new().load().unwrap();
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.framework.queued_delivery, QueuedDelivery::Thread);
            Ok(())
        });
    }

    #[test]
    fn test_merge_is_overridden_by_env() {
        Jail::expect_with(|jail| {
            jail.set_env("CAPSULE_LOGGING__LEVEL", "warn");
            let mut base = CapsuleConfig::default();
            base.logging.level = LogLevel::Trace;
            base.framework.queued_delivery = QueuedDelivery::Thread;

            let config = ConfigLoader::new().merge(base).load().unwrap();
            assert_eq!(config.logging.level, LogLevel::Warn);
            assert_eq!(config.framework.queued_delivery, QueuedDelivery::Thread);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        Jail::expect_with(|_| {
            let err = ConfigLoader::new().file("nope.toml").load().unwrap_err();
            assert!(matches!(err, ConfigError::FileNotFound(_)));
            Ok(())
        });
    }

    #[test]
    fn test_extract_error_keeps_source() {
        Jail::expect_with(|jail| {
            jail.set_env("CAPSULE_LOGGING__LEVEL", "loud");
            let err = ConfigLoader::new().load().unwrap_err();
            assert!(matches!(err, ConfigError::ParseError(_)));
            let source = std::error::Error::source(&err).unwrap();
            assert!(source.to_string().contains("loud"));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("capsule.ini", "level = debug")?;
            let err = ConfigLoader::new().file("capsule.ini").load().unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "ini"));
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_is_overridden_by_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "capsule.staging.toml",
                r#"
                [logging]
                level = "trace"
                format = "pretty"
                "#,
            )?;
            jail.create_file(
                "capsule.toml",
                r#"
                [logging]
                level = "error"

                [framework.properties]
                "app.name" = "demo"

                [[plugins]]
                location = "static:greeter"

                [[plugins]]
                location = "static:idle"
                start = false
                "#,
            )?;

            let config = ConfigLoader::new()
                .profile("staging")
                .search_path(jail.directory())
                .without_env()
                .load()
                .unwrap();
            assert_eq!(config.logging.level, LogLevel::Error);
            assert_eq!(config.logging.format, crate::config::LogFormat::Pretty);
            assert_eq!(
                config.framework.properties.get("app.name").and_then(|v| v.as_str()),
                Some("demo")
            );
            assert_eq!(config.plugins.len(), 2);
            assert!(config.plugins[0].start);
            assert!(!config.plugins[1].start);
            Ok(())
        });
    }
}
