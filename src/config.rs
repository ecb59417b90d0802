//! Configuration management for Gatekeeper.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::LimiterConfig;

/// Prefix for environment overrides, e.g. `GATEKEEPER__LIMITER__LIMIT=10`.
const ENV_PREFIX: &str = "GATEKEEPER";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for Gatekeeper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Rate limiter policy
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Admission loop driven by the CLI
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Simulated request stream for the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of admission checks to perform
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Pause between checks in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Caller keys to draw from; empty means unkeyed calls
    #[serde(default)]
    pub keys: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            interval_ms: default_interval_ms(),
            keys: Vec::new(),
        }
    }
}

fn default_requests() -> u64 {
    15
}

fn default_interval_ms() -> u64 {
    200
}

impl GatekeeperConfig {
    /// Load configuration from defaults, an optional YAML file and
    /// `GATEKEEPER__*` environment variables, in increasing precedence.
    ///
    /// Defaults sit underneath both, so a single override such as
    /// `GATEKEEPER__LIMITER__LIMIT=10` keeps the default strategy.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading overrides from `env` instead of
    /// the process environment when given.
    fn load_with_env(
        path: Option<&Path>,
        env: Option<::config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&GatekeeperConfig::default())?);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            let contents = std::fs::read_to_string(path)?;
            builder = builder.add_source(::config::File::from_str(
                &contents,
                ::config::FileFormat::Yaml,
            ));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("simulation.keys")
                .source(env),
        );

        let config: GatekeeperConfig = builder.build()?.try_deserialize()?;
        config.limiter.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.limiter.validate()?;
        Ok(config)
    }
}
