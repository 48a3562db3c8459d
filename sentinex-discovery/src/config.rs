//! Engine configuration

use std::time::Duration;

use crate::discovery::address::NodeAddress;
use crate::discovery::selector::SelectionStrategy;
use crate::error::{Error, Result};

/// Options forwarded unchanged to every data-node connection
pub use sentinex_core::config::TransportConfig as TransportOptions;

/// Settings for a [`crate::SentinelEngine`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between the end of one cycle and the start of the next
    pub refresh_interval: Duration,
    /// Per-sentinel query timeout
    pub query_timeout: Duration,
    pub transport: TransportOptions,
    pub strategy: SelectionStrategy,
    /// Fixed seed for the selection RNG (random when `None`)
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
            query_timeout: Duration::from_millis(500),
            transport: TransportOptions::default(),
            strategy: SelectionStrategy::Random,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    /// Build from application configuration
    pub fn from_config(config: &sentinex_core::Config) -> Result<Self> {
        let engine = Self {
            refresh_interval: config.sentinel.refresh_interval(),
            query_timeout: config.sentinel.query_timeout(),
            transport: config.transport.clone(),
            strategy: config.selection.strategy.parse()?,
            rng_seed: None,
        };
        engine.validate()?;
        Ok(engine)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            return Err(Error::Configuration("refresh interval must be greater than 0".to_string()));
        }
        if self.query_timeout.is_zero() {
            return Err(Error::Configuration("query timeout must be greater than 0".to_string()));
        }
        // Replies are decoded as UTF-8 strings
        let encoding = self.transport.encoding.to_ascii_lowercase();
        if encoding != "utf-8" && encoding != "utf8" {
            return Err(Error::Configuration(format!(
                "Unsupported encoding: {}",
                self.transport.encoding
            )));
        }
        Ok(())
    }
}

/// Parse sentinel endpoints, rejecting an empty list
pub fn parse_endpoints(endpoints: &[String]) -> Result<Vec<NodeAddress>> {
    if endpoints.is_empty() {
        return Err(Error::Configuration("At least one sentinel endpoint is required".to_string()));
    }
    endpoints.iter().map(|e| e.parse()).collect()
}
