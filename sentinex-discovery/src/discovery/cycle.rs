//! One discovery round
//!
//! Fans out to every sentinel concurrently, unions the successful replies,
//! diffs the result against a registry snapshot and applies the diff as a
//! single batch. Per-sentinel failures are logged and absorbed here.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::address::NodeAddress;
use super::connector::NodeConnector;
use super::querier::{query_masters, QueryFailure, SentinelQuerier};
use super::registry::MasterRegistry;
use crate::config::TransportOptions;

/// Masters reported by the sentinels of one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub masters: HashSet<NodeAddress>,
    pub replied: usize,
    pub failed: usize,
}

impl Aggregate {
    /// Union the successful replies; failures contribute nothing
    #[must_use]
    pub fn from_results(results: Vec<Result<Vec<NodeAddress>, QueryFailure>>) -> Self {
        let mut aggregate = Self::default();
        for result in results {
            match result {
                Ok(masters) => {
                    aggregate.replied += 1;
                    aggregate.masters.extend(masters);
                }
                Err(failure) => {
                    aggregate.failed += 1;
                    tracing::warn!(
                        sentinel = %failure.endpoint(),
                        error = %failure,
                        "Sentinel query failed"
                    );
                }
            }
        }
        aggregate
    }
}

/// Outcome of one discovery round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Sentinels that answered
    pub replied: usize,
    /// Sentinels that timed out or were unreachable
    pub failed: usize,
    pub added: Vec<NodeAddress>,
    pub removed: Vec<NodeAddress>,
    /// New masters whose connection could not be opened (retried next round)
    pub connect_failures: Vec<NodeAddress>,
    /// Every sentinel failed, so nothing was evicted
    pub removal_skipped: bool,
    /// Shutdown interrupted the round before reconciliation
    pub aborted: bool,
}

impl CycleReport {
    pub(crate) fn aborted() -> Self {
        Self {
            aborted: true,
            ..Default::default()
        }
    }

    /// Registry left untouched
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Everything a round needs; shared by the engine's timer loop and manual refreshes
pub struct DiscoveryCycle<C: NodeConnector> {
    pub(crate) sentinels: Vec<Arc<dyn SentinelQuerier>>,
    pub(crate) connector: Arc<C>,
    pub(crate) registry: Arc<MasterRegistry<C::Handle>>,
    transport: TransportOptions,
    query_timeout: Duration,
    /// Background closes of evicted masters
    pub(crate) evictions: TaskTracker,
}

impl<C: NodeConnector> DiscoveryCycle<C> {
    pub fn new(
        sentinels: Vec<Arc<dyn SentinelQuerier>>,
        connector: Arc<C>,
        registry: Arc<MasterRegistry<C::Handle>>,
        transport: TransportOptions,
        query_timeout: Duration,
    ) -> Self {
        Self {
            sentinels,
            connector,
            registry,
            transport,
            query_timeout,
            evictions: TaskTracker::new(),
        }
    }

    /// Query every sentinel concurrently and wait for all of them to settle
    pub async fn poll_sentinels(&self) -> Vec<Result<Vec<NodeAddress>, QueryFailure>> {
        join_all(
            self.sentinels
                .iter()
                .map(|sentinel| query_masters(sentinel.as_ref(), self.query_timeout)),
        )
        .await
    }

    /// Run a full round.
    ///
    /// Cancellation is honoured only while waiting on sentinels; once
    /// reconciliation starts it runs to completion.
    pub async fn run(&self, cancel: &CancellationToken) -> CycleReport {
        let results = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Discovery round aborted by shutdown");
                return CycleReport::aborted();
            }
            results = self.poll_sentinels() => results,
        };

        self.reconcile(Aggregate::from_results(results)).await
    }

    /// Diff the aggregate against the registry and apply it
    pub async fn reconcile(&self, aggregate: Aggregate) -> CycleReport {
        let mut report = CycleReport {
            replied: aggregate.replied,
            failed: aggregate.failed,
            ..Default::default()
        };

        if aggregate.replied == 0 {
            tracing::warn!(
                sentinels = aggregate.failed,
                known_masters = self.registry.len(),
                "No sentinel answered, keeping current masters"
            );
            report.removal_skipped = true;
            return report;
        }

        let snapshot = self.registry.snapshot();
        let mut to_add: Vec<NodeAddress> = aggregate
            .masters
            .iter()
            .filter(|address| !snapshot.contains(address))
            .cloned()
            .collect();
        let mut to_remove: Vec<NodeAddress> = snapshot
            .addresses()
            .filter(|address| !aggregate.masters.contains(*address))
            .cloned()
            .collect();
        to_add.sort();
        to_remove.sort();

        let connected = join_all(to_add.into_iter().map(|address| async move {
            let result = self.connector.connect(&address, &self.transport).await;
            (address, result)
        }))
        .await;

        let mut added = Vec::with_capacity(connected.len());
        for (address, result) in connected {
            match result {
                Ok(handle) => added.push((address, handle)),
                Err(e) => {
                    tracing::warn!(master = %address, error = %e, "Failed to connect to new master");
                    report.connect_failures.push(address);
                }
            }
        }

        report.added = added.iter().map(|(address, _)| address.clone()).collect();
        let evicted = self.registry.apply_diff(added, &to_remove);
        report.removed = to_remove;

        for address in &report.added {
            tracing::info!(master = %address, "Master added");
        }
        for (address, handle) in evicted {
            if report.removed.contains(&address) {
                tracing::info!(master = %address, "Master removed");
            }
            let connector = Arc::clone(&self.connector);
            self.evictions.spawn(async move {
                if let Err(e) = connector.close(handle).await {
                    tracing::warn!(master = %address, error = %e, "Failed to close evicted master");
                }
            });
        }

        tracing::debug!(
            replied = report.replied,
            failed = report.failed,
            added = report.added.len(),
            removed = report.removed.len(),
            masters = self.registry.len(),
            "Discovery round complete"
        );

        report
    }
}
