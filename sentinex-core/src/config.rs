use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sentinel: SentinelConfig,
    pub transport: TransportConfig,
    pub selection: SelectionConfig,
    pub logging: LoggingConfig,
}

/// Monitor (sentinel) polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Sentinel endpoints as `host:port`
    pub endpoints: Vec<String>,
    /// Delay between the end of one discovery cycle and the start of the next
    pub refresh_interval_ms: u64,
    /// Upper bound for a single `SENTINEL MASTERS` round trip
    pub query_timeout_ms: u64,
    /// Only track masters with these names (empty = every monitored master)
    pub master_names: Vec<String>,
    /// Password sent to sentinels on connect
    pub password: Option<String>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            refresh_interval_ms: 1000,
            query_timeout_ms: 500,
            master_names: Vec::new(),
            password: None,
        }
    }
}

impl SentinelConfig {
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Options forwarded unchanged to every data-node connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub encoding: String,
    pub tcp_keep_alive: bool,
    pub tcp_no_delay: bool,
    pub connect_timeout_ms: u64,
    pub password: Option<String>,
    pub database: i64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            encoding: "UTF-8".to_string(),
            tcp_keep_alive: false,
            tcp_no_delay: true,
            connect_timeout_ms: 2000,
            password: None,
            database: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub strategy: String, // "random" or "round_robin"
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            strategy: "random".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // SENTINEX_SENTINEL__ENDPOINTS="10.0.0.1:26379,10.0.0.2:26379", etc.
        builder = builder.add_source(
            Environment::with_prefix("SENTINEX")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("sentinel.endpoints")
                .with_list_parse_key("sentinel.master_names")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for misconfigurations that must abort startup.
    ///
    /// Returns every problem found rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.sentinel.endpoints.is_empty() {
            errors.push("sentinel.endpoints must list at least one sentinel".to_string());
        }
        for endpoint in &self.sentinel.endpoints {
            if endpoint.trim().is_empty() {
                errors.push("sentinel.endpoints contains an empty entry".to_string());
            }
        }
        if self.sentinel.refresh_interval_ms == 0 {
            errors.push("sentinel.refresh_interval_ms must be greater than 0".to_string());
        }
        if self.sentinel.query_timeout_ms == 0 {
            errors.push("sentinel.query_timeout_ms must be greater than 0".to_string());
        }
        if self.transport.connect_timeout_ms == 0 {
            errors.push("transport.connect_timeout_ms must be greater than 0".to_string());
        }
        if self.transport.database < 0 {
            errors.push(format!(
                "transport.database must not be negative (got {})",
                self.transport.database
            ));
        }
        if !matches!(self.selection.strategy.as_str(), "random" | "round_robin") {
            errors.push(format!(
                "selection.strategy must be \"random\" or \"round_robin\" (got \"{}\")",
                self.selection.strategy
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            errors.push(format!(
                "logging.format must be \"pretty\" or \"json\" (got \"{}\")",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
