/// Configuration management for fabrica

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Default address of the Fabric metadata server
pub const DEFAULT_FABRIC_HOST: &str = "127.0.0.1";
/// Default port of the Fabric MySQL-RPC endpoint
pub const DEFAULT_FABRIC_PORT: u16 = 32275;
/// Default per-attempt connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SEC: u64 = 5;
/// Default connection-attempts hint
pub const DEFAULT_CONNECTION_ATTEMPTS: u32 = 3;

/// Main fabrica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of the cache instance
    #[serde(default)]
    pub cache_name: String,
    /// Fabric connection settings
    #[serde(default)]
    pub fabric: FabricSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the Fabric metadata server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricSettings {
    /// Host the metadata server is running on
    pub host: String,
    /// Port the MySQL-RPC endpoint is listening on
    pub port: u16,
    /// User for metadata server authentication
    pub user: String,
    /// Password for metadata server authentication; empty when
    /// authentication is disabled on the server
    pub password: String,
    /// Timeout for a single connect attempt, in seconds
    pub connect_timeout_sec: u64,
    /// Hint for the number of connection attempts. The retry loop
    /// retries unconditionally and does not consult this value.
    pub connection_attempts: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for FabricSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_FABRIC_HOST.to_string(),
            port: DEFAULT_FABRIC_PORT,
            user: String::new(),
            password: String::new(),
            connect_timeout_sec: DEFAULT_CONNECT_TIMEOUT_SEC,
            connection_attempts: DEFAULT_CONNECTION_ATTEMPTS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_name: String::new(),
            fabric: FabricSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FabricSettings {
    /// Host with `localhost` normalized to the loopback address
    pub fn normalized_host(&self) -> String {
        normalize_host(&self.host)
    }

    /// Per-attempt connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }
}

/// Normalize a host name for connecting; `localhost` maps to 127.0.0.1
pub fn normalize_host(host: &str) -> String {
    if host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        host.to_string()
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fabric.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "fabric host cannot be empty".to_string(),
            ));
        }

        if self.fabric.port == 0 {
            return Err(ConfigError::ValidationError(
                "fabric port must be greater than 0".to_string(),
            ));
        }

        if self.fabric.connect_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_sec must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        Ok(())
    }
}
