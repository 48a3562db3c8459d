pub mod config;
pub mod discovery;
pub mod error;

#[cfg(test)]
pub mod test_helpers;

pub use config::{EngineConfig, TransportOptions};
pub use error::{Error, Result};
pub use discovery::{
    MasterConnection, NodeAddress, NodeConnector, QueryFailure, RedisNodeConnector,
    RedisSentinelQuerier, SelectionStrategy, SentinelEngine, SentinelQuerier,
};
