//! Governor process configuration
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. the file named by `GOVERNOR_CONFIG` (TOML, YAML or JSON by extension)
//! 3. environment variables such as `GOVERNOR__SERVER__PORT=9090` or
//!    `GOVERNOR__GOVERNOR__TOTAL_CAPACITY=64`

use anyhow::{Context, Result};
use governor_lib::GovernorConfig;
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming the optional config file
pub const CONFIG_FILE_ENV: &str = "GOVERNOR_CONFIG";

const ENV_PREFIX: &str = "GOVERNOR";
const ENV_SEPARATOR: &str = "__";

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// API server port for health, metrics and snapshots
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Full process configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub governor: GovernorConfig,
}

impl AppConfig {
    /// Load configuration from `GOVERNOR_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from(file.as_deref().map(Path::new))
    }

    /// Load configuration from an optional file layered under the environment
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let app: AppConfig = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        app.governor
            .validate()
            .context("Invalid governor configuration")?;

        Ok(app)
    }
}
