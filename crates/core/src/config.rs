//! TOML-based settings for the user mapping provider.
//!
//! Every section is optional; an empty file yields the defaults:
//!
//! ```toml
//! [mapping]
//! # home = "/etc/guacamole"
//! home_env = "GUACAMOLE_HOME"
//! file_name = "unix-user-mapping.xml"
//!
//! [provider]
//! identifier = "pam"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Mapping home used when nothing else is configured.
pub const SYSTEM_HOME: &str = "/etc/guacamole";

/// Per-user mapping home directory name, under `$HOME`.
pub const USER_HOME_DIR: &str = ".guacamole";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level settings loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the user mapping file lives.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// How the provider presents itself to the host.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Location of the user mapping file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Directory holding the mapping file. When unset, the directory is taken
    /// from `home_env`, then `~/.guacamole`, then `/etc/guacamole`.
    #[serde(default)]
    pub home: Option<PathBuf>,

    /// Environment variable naming the mapping home directory.
    #[serde(default = "default_home_env")]
    pub home_env: String,

    /// File name of the mapping document inside the home directory.
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

fn default_home_env() -> String {
    "GUACAMOLE_HOME".into()
}
fn default_file_name() -> String {
    "unix-user-mapping.xml".into()
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            home: None,
            home_env: default_home_env(),
            file_name: default_file_name(),
        }
    }
}

impl MappingConfig {
    /// Resolve the mapping home from the process environment.
    pub fn resolve_home(&self) -> PathBuf {
        self.resolve_home_with(|name| std::env::var(name).ok(), dirs::home_dir())
    }

    /// Resolve the mapping home given an environment lookup and the user's
    /// home directory.
    pub fn resolve_home_with<F>(&self, env: F, user_home: Option<PathBuf>) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref home) = self.home {
            debug!(home = %home.display(), "using configured mapping home");
            return home.clone();
        }

        if let Some(value) = env(&self.home_env).filter(|v| !v.is_empty()) {
            debug!(env = %self.home_env, home = %value, "using mapping home from environment");
            return PathBuf::from(value);
        }

        if let Some(dir) = user_home
            .map(|home| home.join(USER_HOME_DIR))
            .filter(|dir| dir.is_dir())
        {
            debug!(home = %dir.display(), "using per-user mapping home");
            return dir;
        }

        PathBuf::from(SYSTEM_HOME)
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Identity of the authentication provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier reported to the host (default `pam`).
    #[serde(default = "default_identifier")]
    pub identifier: String,
}

fn default_identifier() -> String {
    "pam".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            identifier: default_identifier(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level or filter directive: trace, debug, info, warn,
    /// error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mapping.file_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "mapping.file_name".into(),
                detail: "mapping file name must not be empty".into(),
            });
        }
        if self.mapping.file_name.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "mapping.file_name".into(),
                detail: "mapping file name must not contain a path separator".into(),
            });
        }
        if self.mapping.home_env.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "mapping.home_env".into(),
                detail: "environment variable name must not be empty".into(),
            });
        }
        if self.provider.identifier.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "provider.identifier".into(),
                detail: "provider identifier must not be empty".into(),
            });
        }
        if self.logging.level.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: "log level must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Full path of the user mapping file.
    pub fn mapping_path(&self) -> PathBuf {
        self.mapping.resolve_home().join(&self.mapping.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[mapping]
home = "/srv/guacamole"
file_name = "mapping.xml"

[provider]
identifier = "unix"

[logging]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.mapping.home, Some(PathBuf::from("/srv/guacamole")));
        assert_eq!(config.mapping.file_name, "mapping.xml");
        assert_eq!(config.mapping.home_env, "GUACAMOLE_HOME");
        assert_eq!(config.provider.identifier, "unix");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.mapping_path(),
            PathBuf::from("/srv/guacamole/mapping.xml")
        );
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.mapping.home.is_none());
        assert_eq!(config.mapping.file_name, "unix-user-mapping.xml");
        assert_eq!(config.provider.identifier, "pam");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_and_validate(file.path()).unwrap();
        assert_eq!(config.provider.identifier, "unix");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/usermap.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[mapping\nhome = 1").unwrap();

        let result = AppConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_file_name() {
        let mut config = AppConfig::default();
        config.mapping.file_name = "conf/mapping.xml".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "mapping.file_name"
        ));

        config.mapping.file_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_identifier() {
        let mut config = AppConfig::default();
        config.provider.identifier.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "provider.identifier"
        ));
    }

    #[test]
    fn test_home_prefers_explicit_setting() {
        let mapping = MappingConfig {
            home: Some(PathBuf::from("/opt/guac")),
            ..Default::default()
        };
        let home = mapping.resolve_home_with(|_| Some("/from/env".into()), None);
        assert_eq!(home, PathBuf::from("/opt/guac"));
    }

    #[test]
    fn test_home_from_environment() {
        let mapping = MappingConfig::default();
        let home = mapping.resolve_home_with(
            |name| (name == "GUACAMOLE_HOME").then(|| "/from/env".to_string()),
            None,
        );
        assert_eq!(home, PathBuf::from("/from/env"));
    }

    #[test]
    fn test_home_falls_back_to_user_dir() {
        let user_home = tempfile::tempdir().unwrap();
        std::fs::create_dir(user_home.path().join(USER_HOME_DIR)).unwrap();

        let mapping = MappingConfig::default();
        let home =
            mapping.resolve_home_with(|_| Some(String::new()), Some(user_home.path().into()));
        assert_eq!(home, user_home.path().join(USER_HOME_DIR));
    }

    #[test]
    fn test_home_falls_back_to_system_dir() {
        let user_home = tempfile::tempdir().unwrap();

        let mapping = MappingConfig::default();
        let home = mapping.resolve_home_with(|_| None, Some(user_home.path().into()));
        assert_eq!(home, PathBuf::from(SYSTEM_HOME));
    }
}
