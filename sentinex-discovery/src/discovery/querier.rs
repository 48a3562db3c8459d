//! Sentinel (monitor) queries
//!
//! A querier asks one sentinel which nodes it currently considers masters.
//! Failures are per-sentinel and never fatal; the discovery cycle absorbs them.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncConnectionConfig;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use super::address::NodeAddress;
use crate::error::{Error, Result};

/// Why a single sentinel contributed nothing to a round
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryFailure {
    #[error("sentinel {endpoint} did not answer within {timeout:?}")]
    Timeout {
        endpoint: NodeAddress,
        timeout: Duration,
    },

    #[error("sentinel {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: NodeAddress, reason: String },
}

impl QueryFailure {
    #[must_use]
    pub fn endpoint(&self) -> &NodeAddress {
        match self {
            Self::Timeout { endpoint, .. } | Self::Unreachable { endpoint, .. } => endpoint,
        }
    }
}

/// "List masters" capability of one sentinel
#[async_trait]
pub trait SentinelQuerier: Send + Sync {
    /// Address of the sentinel this querier talks to
    fn endpoint(&self) -> &NodeAddress;

    /// Issue one request for the current master set. Must not retry.
    async fn list_masters(&self) -> std::result::Result<Vec<NodeAddress>, QueryFailure>;

    /// Release the connection to the sentinel
    async fn close(&self) -> Result<()>;
}

/// Query a sentinel, giving up after `timeout`.
///
/// The in-flight request is dropped on timeout; a late reply is never observed.
pub async fn query_masters(
    querier: &dyn SentinelQuerier,
    timeout: Duration,
) -> std::result::Result<Vec<NodeAddress>, QueryFailure> {
    match tokio::time::timeout(timeout, querier.list_masters()).await {
        Ok(result) => result,
        Err(_) => Err(QueryFailure::Timeout {
            endpoint: querier.endpoint().clone(),
            timeout,
        }),
    }
}

/// Sentinel querier speaking `SENTINEL MASTERS` over a cached multiplexed connection
pub struct RedisSentinelQuerier {
    endpoint: NodeAddress,
    client: redis::Client,
    /// Only report masters with these names (empty = all)
    master_names: Vec<String>,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisSentinelQuerier {
    /// Create a querier. No connection is opened until the first query.
    pub fn new(
        endpoint: NodeAddress,
        password: Option<&str>,
        master_names: Vec<String>,
    ) -> Result<Self> {
        let client = redis::Client::open(endpoint.redis_url(password, None).as_str())
            .map_err(|e| Error::Configuration(format!("Invalid sentinel endpoint {endpoint}: {e}")))?;

        Ok(Self {
            endpoint,
            client,
            master_names,
            connection: Mutex::new(None),
        })
    }

    fn unreachable(&self, reason: impl ToString) -> QueryFailure {
        QueryFailure::Unreachable {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }

    async fn connection(&self) -> std::result::Result<MultiplexedConnection, QueryFailure> {
        let cached = self.connection.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        // Deadlines come from `query_masters`, not from the connection
        let config = AsyncConnectionConfig::new()
            .set_connection_timeout(None)
            .set_response_timeout(None);
        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| self.unreachable(e))?;
        tracing::debug!(sentinel = %self.endpoint, "Connected to sentinel");
        *self.connection.lock() = Some(conn.clone());
        Ok(conn)
    }
}

/// Drops the cached sentinel connection unless the query it guards completed.
///
/// A query abandoned by its timeout leaves the connection in an unknown state
/// (a late reply may still be queued), so the next round reconnects.
struct ResetOnAbandon<'a> {
    slot: &'a Mutex<Option<MultiplexedConnection>>,
    endpoint: &'a NodeAddress,
    completed: bool,
}

impl Drop for ResetOnAbandon<'_> {
    fn drop(&mut self) {
        if !self.completed && self.slot.lock().take().is_some() {
            tracing::debug!(sentinel = %self.endpoint, "Dropped sentinel connection after failed query");
        }
    }
}

#[async_trait]
impl SentinelQuerier for RedisSentinelQuerier {
    fn endpoint(&self) -> &NodeAddress {
        &self.endpoint
    }

    async fn list_masters(&self) -> std::result::Result<Vec<NodeAddress>, QueryFailure> {
        let mut guard = ResetOnAbandon {
            slot: &self.connection,
            endpoint: &self.endpoint,
            completed: false,
        };

        let mut conn = self.connection().await?;
        let entries = redis::cmd("SENTINEL")
            .arg("MASTERS")
            .query_async::<Vec<HashMap<String, String>>>(&mut conn)
            .await
            .map_err(|e| self.unreachable(e))?;

        guard.completed = true;
        Ok(parse_masters_reply(&self.endpoint, entries, &self.master_names))
    }

    async fn close(&self) -> Result<()> {
        if self.connection.lock().take().is_some() {
            tracing::debug!(sentinel = %self.endpoint, "Closed sentinel connection");
        }
        Ok(())
    }
}

/// Turn a `SENTINEL MASTERS` reply into addresses.
///
/// Each entry is a field/value map; entries without a usable `ip`/`port`
/// are skipped.
pub(crate) fn parse_masters_reply(
    sentinel: &NodeAddress,
    entries: Vec<HashMap<String, String>>,
    master_names: &[String],
) -> Vec<NodeAddress> {
    let mut masters = Vec::with_capacity(entries.len());

    for entry in entries {
        let name = entry.get("name").map_or("", String::as_str);
        if !master_names.is_empty() && !master_names.iter().any(|n| n == name) {
            continue;
        }

        let (Some(ip), Some(port)) = (entry.get("ip"), entry.get("port")) else {
            tracing::warn!(%sentinel, master = name, "Master entry without ip/port, skipping");
            continue;
        };

        match port.parse::<u16>() {
            Ok(port) if port > 0 && !ip.is_empty() => masters.push(NodeAddress::new(ip.clone(), port)),
            _ => {
                tracing::warn!(%sentinel, master = name, ip = %ip, port = %port, "Malformed master address, skipping");
            }
        }
    }

    masters
}
