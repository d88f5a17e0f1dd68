//! Application configuration.
//!
//! One `Config` struct shared by all three services, loaded from YAML files
//! and environment variables. Each binary asks only for the values it needs
//! through the `require_*` accessors.

mod messaging;
mod services;

pub use messaging::MessagingConfig;
pub use services::{HistoryConfig, RecommendationsConfig, VideoConfig, DEFAULT_VIDEO_PATH};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FLIXTUBE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FLIXTUBE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FLIXTUBE_LOG";
/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV_VAR: &str = "FLIXTUBE_LOG_FORMAT";

/// Environment variable for the HTTP port.
pub const PORT_ENV_VAR: &str = "PORT";
/// Environment variable for the broker URI.
pub const RABBIT_ENV_VAR: &str = "RABBIT";
/// Environment variable for the database URI.
pub const DBHOST_ENV_VAR: &str = "DBHOST";
/// Environment variable for the database name.
pub const DBNAME_ENV_VAR: &str = "DBNAME";

const LEGACY_ENV_VARS: [&str; 4] = [PORT_ENV_VAR, RABBIT_ENV_VAR, DBHOST_ENV_VAR, DBNAME_ENV_VAR];

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Please specify the {0} environment variable")]
    Missing(&'static str),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen port.
    pub port: Option<u16>,
    /// Broker URI.
    pub rabbit: Option<String>,
    /// Database URI.
    pub dbhost: Option<String>,
    /// Database name.
    pub dbname: Option<String>,
    pub messaging: MessagingConfig,
    pub video: VideoConfig,
    pub history: HistoryConfig,
    pub recommendations: RecommendationsConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. The bare `PORT`, `RABBIT`, `DBHOST` and `DBNAME` variables
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            // Only the four bare variables; the rest of the environment is
            // not configuration.
            .add_source(
                Environment::default()
                    .source(Some(legacy_env()))
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }

    pub fn require_port(&self) -> Result<u16, ConfigError> {
        self.port.ok_or(ConfigError::Missing(PORT_ENV_VAR))
    }

    pub fn require_rabbit(&self) -> Result<&str, ConfigError> {
        require(self.rabbit.as_deref(), RABBIT_ENV_VAR)
    }

    /// Database URI and database name.
    pub fn require_store(&self) -> Result<(&str, &str), ConfigError> {
        Ok((
            require(self.dbhost.as_deref(), DBHOST_ENV_VAR)?,
            require(self.dbname.as_deref(), DBNAME_ENV_VAR)?,
        ))
    }
}

fn require<'a>(value: Option<&'a str>, var: &'static str) -> Result<&'a str, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn legacy_env() -> ::config::Map<String, String> {
    LEGACY_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|value| (var.to_string(), value)))
        .filter(|(_, value)| !value.is_empty())
        .collect()
}
