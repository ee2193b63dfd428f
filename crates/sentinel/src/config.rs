//! Service configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sentinel_lib::EngineConfig;
use serde::Deserialize;

/// Default config file looked up when no path is given (extension optional)
pub const DEFAULT_CONFIG_FILE: &str = "config/sentinel";

/// Environment prefix; nested keys use `__`, e.g. `SENTINEL_ENGINE__RETENTION__RAW_DAYS`
pub const ENV_PREFIX: &str = "SENTINEL";

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SentinelConfig {
    /// Instance name attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Address the HTTP API binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// API server port for ingestion, queries, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory for the file store; state is kept in memory when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Detection, alerting, aggregation and notification settings
    pub engine: EngineConfig,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "pond-sentinel".to_string())
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl SentinelConfig {
    /// Load configuration from an optional TOML file and the environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    /// Environment variables override file values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let config: SentinelConfig = config
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: SentinelConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .context("Invalid engine configuration")
    }

    /// Socket address for the HTTP API
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.api_port)
    }
}
