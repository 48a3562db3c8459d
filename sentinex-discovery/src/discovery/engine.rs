//! Sentinel-driven master tracking
//!
//! The engine owns the registry, the selector and a background loop that
//! runs one discovery round, waits `refresh_interval`, and repeats. Rounds
//! never overlap: the loop and manual [`SentinelEngine::run_cycle`] calls
//! share one lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::address::NodeAddress;
use super::connector::{NodeConnector, RedisNodeConnector};
use super::cycle::{CycleReport, DiscoveryCycle};
use super::lifecycle;
use super::querier::{RedisSentinelQuerier, SentinelQuerier};
use super::registry::MasterRegistry;
use super::selector::ClientSelector;
use crate::config::{parse_endpoints, EngineConfig};
use crate::error::{Error, Result};

struct EngineInner<C: NodeConnector> {
    cycle: DiscoveryCycle<C>,
    registry: Arc<MasterRegistry<C::Handle>>,
    selector: ClientSelector,
    refresh_interval: Duration,
    /// Held for the whole of a round
    cycle_lock: tokio::sync::Mutex<()>,
    cancel_token: CancellationToken,
    closed: AtomicBool,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<C: NodeConnector> EngineInner<C> {
    async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return CycleReport::aborted();
        }
        self.cycle.run(&self.cancel_token).await
    }

    /// Timer loop. Holds only a weak reference between rounds so a dropped
    /// engine stops the loop.
    async fn run_loop(weak: Weak<Self>, cancel_token: CancellationToken) {
        loop {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let report = inner.run_cycle().await;
            let refresh_interval = inner.refresh_interval;
            drop(inner);

            if report.aborted {
                break;
            }

            // Measured from the end of the round so slow sentinels never cause overlap
            tokio::select! {
                () = cancel_token.cancelled() => break,
                () = tokio::time::sleep(refresh_interval) => {}
            }
        }
        tracing::info!("Discovery loop stopped");
    }
}

/// Tracks writable masters through sentinels and hands out connections to them
pub struct SentinelEngine<C: NodeConnector> {
    inner: Arc<EngineInner<C>>,
}

impl<C: NodeConnector> Clone for SentinelEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SentinelEngine<RedisNodeConnector> {
    /// Build an engine talking to real sentinels and masters
    pub fn from_config(config: &sentinex_core::Config) -> Result<Self> {
        let engine_config = EngineConfig::from_config(config)?;
        let sentinels = parse_endpoints(&config.sentinel.endpoints)?
            .into_iter()
            .map(|endpoint| {
                RedisSentinelQuerier::new(
                    endpoint,
                    config.sentinel.password.as_deref(),
                    config.sentinel.master_names.clone(),
                )
                .map(|querier| Arc::new(querier) as Arc<dyn SentinelQuerier>)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(engine_config, sentinels, RedisNodeConnector)
    }
}

impl<C: NodeConnector> SentinelEngine<C> {
    /// Create an engine. Nothing runs until [`Self::start`] or [`Self::run_cycle`].
    ///
    /// Fails when no sentinel is given or the configuration is invalid.
    pub fn new(config: EngineConfig, sentinels: Vec<Arc<dyn SentinelQuerier>>, connector: C) -> Result<Self> {
        if sentinels.is_empty() {
            return Err(Error::Configuration(
                "At least one sentinel endpoint is required".to_string(),
            ));
        }
        config.validate()?;

        let selector = match config.rng_seed {
            Some(seed) => ClientSelector::with_seed(config.strategy, seed),
            None => ClientSelector::new(config.strategy),
        };
        let registry = Arc::new(MasterRegistry::new());
        let cycle = DiscoveryCycle::new(
            sentinels,
            Arc::new(connector),
            Arc::clone(&registry),
            config.transport,
            config.query_timeout,
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                cycle,
                registry,
                selector,
                refresh_interval: config.refresh_interval,
                cycle_lock: tokio::sync::Mutex::new(()),
                cancel_token: CancellationToken::new(),
                closed: AtomicBool::new(false),
                task: parking_lot::Mutex::new(None),
            }),
        })
    }

    /// Start the background discovery loop. The first round runs immediately.
    ///
    /// Calling `start` again while the loop runs does nothing.
    pub fn start(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let mut task = self.inner.task.lock();
        if task.is_some() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let cancel_token = self.inner.cancel_token.clone();
        *task = Some(tokio::spawn(EngineInner::run_loop(weak, cancel_token)));

        tracing::info!(
            sentinels = self.inner.cycle.sentinels.len(),
            refresh_interval = ?self.inner.refresh_interval,
            "Discovery loop started"
        );
        Ok(())
    }

    /// Run one discovery round now, waiting for any round in progress first
    pub async fn run_cycle(&self) -> CycleReport {
        self.inner.run_cycle().await
    }

    /// Pick a connection to one of the current masters
    pub fn get_client(&self) -> Result<C::Handle> {
        self.inner.selector.pick(&self.inner.registry.snapshot())
    }

    /// Addresses of the current masters, sorted
    #[must_use]
    pub fn masters(&self) -> Vec<NodeAddress> {
        let mut masters: Vec<_> = self.inner.registry.snapshot().addresses().cloned().collect();
        masters.sort();
        masters
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Shut the engine down.
    ///
    /// Stops the timer, lets a round that is already reconciling finish,
    /// then closes every sentinel and master connection concurrently.
    /// Returns `PartialShutdown` if some closes failed; the engine is closed
    /// either way. Later calls return `Ok(())` immediately.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("Shutting down sentinel engine");

        self.inner.cancel_token.cancel();

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Discovery loop ended abnormally");
            }
        }

        // Wait out a manually triggered round
        let _guard = self.inner.cycle_lock.lock().await;

        let masters = self.inner.registry.drain();
        let report = lifecycle::shutdown(
            &self.inner.cycle.sentinels,
            masters,
            self.inner.cycle.connector.as_ref(),
        )
        .await;

        self.inner.cycle.evictions.close();
        self.inner.cycle.evictions.wait().await;

        report.into_result()
    }
}
