//! Client selection over a registry snapshot
//!
//! Picks one master connection per `get_client()` call. Selection only reads
//! the snapshot it is given; it never touches the registry itself.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::registry::RegistrySnapshot;
use crate::error::{Error, Result};

/// Selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Uniform random selection
    #[default]
    Random,
    /// Round-robin over masters in address order
    RoundRobin,
}

impl FromStr for SelectionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(Self::Random),
            "round_robin" => Ok(Self::RoundRobin),
            other => Err(Error::Configuration(format!("Unknown selection strategy: {other}"))),
        }
    }
}

/// Picks a master handle out of a snapshot
pub struct ClientSelector {
    strategy: SelectionStrategy,
    rng: Mutex<StdRng>,
    round_robin_index: AtomicUsize,
}

impl ClientSelector {
    /// Create a selector with a randomly seeded generator
    #[must_use]
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self::with_seed(strategy, rand::rng().random())
    }

    /// Create a selector with a fixed seed (reproducible picks)
    #[must_use]
    pub fn with_seed(strategy: SelectionStrategy, seed: u64) -> Self {
        Self {
            strategy,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            round_robin_index: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Select a handle from the snapshot
    pub fn pick<H: Clone>(&self, snapshot: &RegistrySnapshot<H>) -> Result<H> {
        if snapshot.is_empty() {
            return Err(Error::NoMastersAvailable);
        }

        let index = match self.strategy {
            SelectionStrategy::Random => self.rng.lock().random_range(0..snapshot.len()),
            // Snapshots are in address order, so this cycles stably
            SelectionStrategy::RoundRobin => {
                self.round_robin_index.fetch_add(1, Ordering::AcqRel) % snapshot.len()
            }
        };

        let selected = snapshot.get_index(index).map(|(_, handle)| handle);
        selected.cloned().ok_or(Error::NoMastersAvailable)
    }
}
