//! Runtime configuration.
//!
//! Sources are merged in this order, later ones winning:
//! 1. built-in defaults
//! 2. a TOML file (explicit path, or `sysmonitor.toml` in the working directory)
//! 3. `SYSMONITOR_`-prefixed environment variables, `__` separating nested keys
//!    (e.g. `SYSMONITOR_API__ENDPOINT`)
//!
//! Command-line overrides are applied by the binary on top of the result.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_FILENAME: &str = "sysmonitor.toml";
pub const DEFAULT_ENV_PREFIX: &str = "SYSMONITOR_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitoring: MonitoringSettings,
    pub api: ApiSettings,
    pub plugins: PluginSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Seconds between successful ticks
    pub interval_seconds: u64,
    /// Echo each snapshot to stdout
    pub enable_console_output: bool,
    /// Global switch for the log sink
    pub enable_file_logging: bool,
    pub log_file_path: PathBuf,
    /// Settling delay after the discard-first CPU read
    pub cpu_sampling_interval_ms: u64,
    /// Any path on the filesystem to measure for disk usage
    pub disk_path: PathBuf,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 2,
            enable_console_output: true,
            enable_file_logging: true,
            log_file_path: PathBuf::from("system_monitor.log"),
            cpu_sampling_interval_ms: 100,
            disk_path: PathBuf::from("/"),
        }
    }
}

impl MonitoringSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn cpu_settle_delay(&self) -> Duration {
        Duration::from_millis(self.cpu_sampling_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub endpoint: String,
    pub timeout_seconds: u64,
    /// Global switch for the remote sink
    pub enable_api_integration: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_seconds: 30,
            enable_api_integration: true,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Parse the endpoint, accepting only http and https URLs.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("api.endpoint is empty".into()));
        }
        let url = Url::parse(self.endpoint.trim())
            .map_err(|e| ConfigError::Invalid(format!("api.endpoint {:?}: {e}", self.endpoint)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::Invalid(format!(
                "api.endpoint must be http or https, got {scheme}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub file_logger: FileLoggerSettings,
    pub api_poster: ApiPosterSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggerSettings {
    pub enabled: bool,
}

impl Default for FileLoggerSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiPosterSettings {
    pub enabled: bool,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for ApiPosterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_attempts: 3,
            retry_delay_seconds: 5,
        }
    }
}

impl ApiPosterSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

impl Config {
    /// Log sink is on only when both the global and the per-sink flag are set
    pub fn file_logging_enabled(&self) -> bool {
        self.monitoring.enable_file_logging && self.plugins.file_logger.enabled
    }

    /// Remote sink is on only when both the global and the per-sink flag are set
    pub fn api_enabled(&self) -> bool {
        self.api.enable_api_integration && self.plugins.api_poster.enabled
    }

    /// Reject values the collection loop cannot run with.
    ///
    /// The endpoint is not checked here: a bad endpoint disables the remote
    /// sink instead of stopping the process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitoring.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.interval_seconds must be at least 1".into(),
            ));
        }
        if self.api.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "api.timeout_seconds must be at least 1".into(),
            ));
        }
        if self.monitoring.log_file_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "monitoring.log_file_path must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Loads [`Config`] from defaults, an optional TOML file and the environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Use this file instead of looking for `sysmonitor.toml`; it must exist
    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn figment(&self) -> Result<Figment, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        match &self.config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::Invalid(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        Ok(figment.merge(Env::prefixed(DEFAULT_ENV_PREFIX).split("__")))
    }

    /// Merge all sources and extract the configuration, without validating it
    pub fn load(&self) -> Result<Config, ConfigError> {
        self.figment()?.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }
}
