//! Sentinel-based master discovery and failover

pub mod address;
pub mod connector;
pub mod cycle;
pub mod engine;
pub mod lifecycle;
pub mod querier;
pub mod registry;
pub mod selector;

pub use address::NodeAddress;
pub use connector::{MasterConnection, NodeConnector, RedisNodeConnector};
pub use cycle::{Aggregate, CycleReport, DiscoveryCycle};
pub use engine::SentinelEngine;
pub use lifecycle::ShutdownReport;
pub use querier::{query_masters, QueryFailure, RedisSentinelQuerier, SentinelQuerier};
pub use registry::{MasterRegistry, RegistrySnapshot};
pub use selector::{ClientSelector, SelectionStrategy};
