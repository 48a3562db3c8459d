//! Best-effort shutdown of sentinel and master connections

use futures::future::join_all;
use std::sync::Arc;

use super::address::NodeAddress;
use super::connector::NodeConnector;
use super::querier::SentinelQuerier;
use crate::error::{Error, Result};

/// What happened during shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub sentinels_closed: usize,
    pub masters_closed: usize,
    /// One message per failed close
    pub failures: Vec<String>,
}

impl ShutdownReport {
    /// Number of close attempts made
    #[must_use]
    pub fn total(&self) -> usize {
        self.sentinels_closed + self.masters_closed + self.failures.len()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Err(PartialShutdown)` if anything failed to close
    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(Error::PartialShutdown {
                failed: self.failures.len(),
                total: self.total(),
            })
        }
    }
}

/// Close every sentinel and master concurrently.
///
/// Waits for every attempt; a failure is recorded and never stops the others.
pub async fn shutdown<C: NodeConnector>(
    sentinels: &[Arc<dyn SentinelQuerier>],
    masters: Vec<(NodeAddress, C::Handle)>,
    connector: &C,
) -> ShutdownReport {
    let sentinel_closes = join_all(sentinels.iter().map(|sentinel| async move {
        (sentinel.endpoint().clone(), sentinel.close().await)
    }));
    let master_closes = join_all(masters.into_iter().map(|(address, handle)| async move {
        (address, connector.close(handle).await)
    }));

    let (sentinel_results, master_results) = tokio::join!(sentinel_closes, master_closes);

    let mut report = ShutdownReport::default();
    for (endpoint, result) in sentinel_results {
        match result {
            Ok(()) => report.sentinels_closed += 1,
            Err(e) => {
                tracing::error!(sentinel = %endpoint, error = %e, "Failed to close sentinel connection");
                report.failures.push(format!("sentinel {endpoint}: {e}"));
            }
        }
    }
    for (address, result) in master_results {
        match result {
            Ok(()) => report.masters_closed += 1,
            Err(e) => {
                tracing::error!(master = %address, error = %e, "Failed to close master connection");
                report.failures.push(format!("master {address}: {e}"));
            }
        }
    }

    tracing::info!(
        sentinels = report.sentinels_closed,
        masters = report.masters_closed,
        failures = report.failures.len(),
        "Connections closed"
    );

    report
}
