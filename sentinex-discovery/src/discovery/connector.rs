//! Data-node connections
//!
//! The engine creates one connection per discovered master through a
//! [`NodeConnector`] and closes it exactly once, when the master disappears
//! or when the engine shuts down.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::io::tcp::{socket2::TcpKeepalive, TcpSettings};
use redis::{AsyncConnectionConfig, ConnectionInfo, IntoConnectionInfo};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::address::NodeAddress;
use crate::config::TransportOptions;
use crate::error::{Error, Result};

/// Timeout for the QUIT sent when closing a master connection
const CLOSE_TIMEOUT_SECS: u64 = 2;

/// "Open/close connection" capability against data nodes
#[async_trait]
pub trait NodeConnector: Send + Sync + 'static {
    /// Live connection handed out to callers. Clones share the connection.
    type Handle: Clone + Send + Sync + 'static;

    /// Open a connection to `address`. `options` are passed through untouched.
    async fn connect(&self, address: &NodeAddress, options: &TransportOptions) -> Result<Self::Handle>;

    /// Close a connection previously returned by `connect`
    async fn close(&self, handle: Self::Handle) -> Result<()>;
}

#[async_trait]
impl<T: NodeConnector> NodeConnector for Arc<T> {
    type Handle = T::Handle;

    async fn connect(&self, address: &NodeAddress, options: &TransportOptions) -> Result<Self::Handle> {
        self.as_ref().connect(address, options).await
    }

    async fn close(&self, handle: Self::Handle) -> Result<()> {
        self.as_ref().close(handle).await
    }
}

/// Connection to a master, shared by every caller that picked it
#[derive(Clone)]
pub struct MasterConnection {
    address: NodeAddress,
    connection: MultiplexedConnection,
}

impl MasterConnection {
    #[must_use]
    pub const fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Multiplexed connection for issuing commands
    #[must_use]
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

impl fmt::Debug for MasterConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterConnection")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Opens multiplexed Redis connections to masters
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisNodeConnector;

#[async_trait]
impl NodeConnector for RedisNodeConnector {
    type Handle = MasterConnection;

    async fn connect(&self, address: &NodeAddress, options: &TransportOptions) -> Result<MasterConnection> {
        let client = redis::Client::open(connection_info(address, options)?)
            .map_err(|e| Error::Connection(format!("Invalid master address {address}: {e}")))?;

        let config = AsyncConnectionConfig::new()
            .set_connection_timeout(Some(Duration::from_millis(options.connect_timeout_ms)))
            // Callers own the connection; their commands are not bounded here
            .set_response_timeout(None);

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Connecting to master {address} timed out"))
                } else {
                    Error::Connection(format!("Connecting to master {address} failed: {e}"))
                }
            })?;

        tracing::debug!(
            master = %address,
            database = options.database,
            tcp_no_delay = options.tcp_no_delay,
            tcp_keep_alive = options.tcp_keep_alive,
            "Opened master connection"
        );

        Ok(MasterConnection {
            address: address.clone(),
            connection,
        })
    }

    async fn close(&self, handle: MasterConnection) -> Result<()> {
        let MasterConnection {
            address,
            mut connection,
        } = handle;

        tokio::time::timeout(
            Duration::from_secs(CLOSE_TIMEOUT_SECS),
            redis::cmd("QUIT").query_async::<()>(&mut connection),
        )
        .await
        .map_err(|_| Error::Timeout(format!("Closing master {address} timed out")))?
        .map_err(|e| Error::Connection(format!("Closing master {address} failed: {e}")))?;

        tracing::debug!(master = %address, "Closed master connection");
        Ok(())
    }
}

/// Socket options for a master connection
pub(crate) fn tcp_settings(options: &TransportOptions) -> TcpSettings {
    let settings = TcpSettings::default().set_nodelay(options.tcp_no_delay);
    if options.tcp_keep_alive {
        // Keepalive intervals are left to the OS
        settings.set_keepalive(TcpKeepalive::new())
    } else {
        settings
    }
}

/// Address, credentials, database and socket options of a master connection
pub(crate) fn connection_info(address: &NodeAddress, options: &TransportOptions) -> Result<ConnectionInfo> {
    let info = address
        .redis_url(options.password.as_deref(), Some(options.database))
        .as_str()
        .into_connection_info()
        .map_err(|e| Error::Connection(format!("Invalid master address {address}: {e}")))?;
    Ok(info.set_tcp_settings(tcp_settings(options)))
}
