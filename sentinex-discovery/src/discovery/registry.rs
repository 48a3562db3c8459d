//! Registry of live master connections
//!
//! Copy-on-write table behind a lock: readers take an `Arc` snapshot, writers
//! build the next table and swap it in, so a reader never sees half of a diff.
//! Entries are kept in address order so selection can index them directly.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::address::NodeAddress;

/// Masters sorted by address, with a position index for lookups
struct Table<H> {
    entries: Vec<(NodeAddress, H)>,
    positions: HashMap<NodeAddress, usize>,
}

impl<H> Table<H> {
    fn from_map(map: HashMap<NodeAddress, H>) -> Self {
        let mut entries: Vec<_> = map.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let positions = entries
            .iter()
            .enumerate()
            .map(|(i, (address, _))| (address.clone(), i))
            .collect();
        Self { entries, positions }
    }
}

impl<H> Default for Table<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

/// Immutable view of the registry at one point in time
pub struct RegistrySnapshot<H> {
    table: Arc<Table<H>>,
}

impl<H> Clone for RegistrySnapshot<H> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<H> RegistrySnapshot<H> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.table.positions.contains_key(address)
    }

    #[must_use]
    pub fn get(&self, address: &NodeAddress) -> Option<&H> {
        self.table
            .positions
            .get(address)
            .map(|&i| &self.table.entries[i].1)
    }

    /// Entry at `index` in address order
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<(&NodeAddress, &H)> {
        self.table
            .entries
            .get(index)
            .map(|(address, handle)| (address, handle))
    }

    /// Addresses in sorted order
    pub fn addresses(&self) -> impl Iterator<Item = &NodeAddress> {
        self.table.entries.iter().map(|(address, _)| address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeAddress, &H)> {
        self.table.entries.iter().map(|(address, handle)| (address, handle))
    }
}

/// Map from master address to its connection handle
pub struct MasterRegistry<H> {
    table: RwLock<Arc<Table<H>>>,
}

impl<H: Clone> MasterRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(Table::default())),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot<H> {
        RegistrySnapshot {
            table: Arc::clone(&self.table.read()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }

    /// Apply one reconciliation pass atomically.
    ///
    /// Returns the entries taken out of the registry; the caller now owns them
    /// and must close them. If an added address is already present, the
    /// existing entry wins and the new handle is returned for closing.
    pub fn apply_diff(
        &self,
        added: Vec<(NodeAddress, H)>,
        removed: &[NodeAddress],
    ) -> Vec<(NodeAddress, H)> {
        let mut evicted = Vec::new();
        if added.is_empty() && removed.is_empty() {
            return evicted;
        }

        let mut guard = self.table.write();
        let mut next: HashMap<NodeAddress, H> = guard.entries.iter().cloned().collect();

        for address in removed {
            if let Some(handle) = next.remove(address) {
                evicted.push((address.clone(), handle));
            }
        }
        for (address, handle) in added {
            if next.contains_key(&address) {
                evicted.push((address, handle));
            } else {
                next.insert(address, handle);
            }
        }

        *guard = Arc::new(Table::from_map(next));
        evicted
    }

    /// Empty the registry, handing every entry to the caller
    pub fn drain(&self) -> Vec<(NodeAddress, H)> {
        let taken = std::mem::take(&mut *self.table.write());
        match Arc::try_unwrap(taken) {
            Ok(table) => table.entries,
            // A reader still holds the old snapshot
            Err(shared) => shared.entries.clone(),
        }
    }
}

impl<H: Clone> Default for MasterRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> NodeAddress {
        NodeAddress::new("10.0.0.1", port)
    }

    #[test]
    fn test_apply_diff_adds_and_removes() {
        let registry = MasterRegistry::new();
        assert!(registry.is_empty());

        let evicted = registry.apply_diff(vec![(addr(1), "a"), (addr(2), "b")], &[]);
        assert!(evicted.is_empty());
        assert_eq!(registry.len(), 2);

        let evicted = registry.apply_diff(vec![(addr(3), "c")], &[addr(1)]);
        assert_eq!(evicted, vec![(addr(1), "a")]);

        let snapshot = registry.snapshot();
        let mut keys: Vec<_> = snapshot.addresses().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec![addr(2), addr(3)]);
        assert_eq!(snapshot.get(&addr(3)), Some(&"c"));
    }

    #[test]
    fn test_snapshot_is_indexed_in_address_order() {
        let registry = MasterRegistry::new();
        registry.apply_diff(vec![(addr(3), "c"), (addr(1), "a"), (addr(2), "b")], &[]);
        registry.apply_diff(vec![(addr(0), "z")], &[addr(2)]);

        let snapshot = registry.snapshot();

        assert_eq!(snapshot.get_index(0), Some((&addr(0), &"z")));
        assert_eq!(snapshot.get_index(1), Some((&addr(1), &"a")));
        assert_eq!(snapshot.get_index(2), Some((&addr(3), &"c")));
        assert_eq!(snapshot.get_index(3), None);
        assert_eq!(snapshot.get(&addr(3)), Some(&"c"));
        assert_eq!(snapshot.get(&addr(2)), None);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_diffs() {
        let registry = MasterRegistry::new();
        registry.apply_diff(vec![(addr(1), 1u32)], &[]);

        let before = registry.snapshot();
        registry.apply_diff(vec![(addr(2), 2)], &[addr(1)]);

        assert!(before.contains(&addr(1)));
        assert!(!before.contains(&addr(2)));
        assert_eq!(before.len(), 1);

        let after = registry.snapshot();
        assert!(!after.contains(&addr(1)));
        assert!(after.contains(&addr(2)));
    }

    #[test]
    fn test_duplicate_add_keeps_existing_handle() {
        let registry = MasterRegistry::new();
        registry.apply_diff(vec![(addr(1), "first")], &[]);

        let evicted = registry.apply_diff(vec![(addr(1), "second")], &[]);

        assert_eq!(evicted, vec![(addr(1), "second")]);
        assert_eq!(registry.snapshot().get(&addr(1)), Some(&"first"));
    }

    #[test]
    fn test_removing_unknown_address_is_noop() {
        let registry: MasterRegistry<&str> = MasterRegistry::new();
        let before = registry.snapshot();

        let evicted = registry.apply_diff(Vec::new(), &[addr(9)]);

        assert!(evicted.is_empty());
        assert!(registry.is_empty());
        assert_eq!(before.len(), 0);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = MasterRegistry::new();
        registry.apply_diff(vec![(addr(1), "a"), (addr(2), "b")], &[]);
        let held = registry.snapshot();

        let mut drained = registry.drain();
        drained.sort();

        assert_eq!(drained, vec![(addr(1), "a"), (addr(2), "b")]);
        assert!(registry.is_empty());
        // Outstanding snapshots keep their view
        assert_eq!(held.len(), 2);
        assert!(registry.drain().is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_diffs() {
        let registry = Arc::new(MasterRegistry::new());
        registry.apply_diff(vec![(addr(1), 1u32), (addr(2), 1)], &[]);

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for generation in 2..200u32 {
                    let current: Vec<_> = registry.snapshot().addresses().cloned().collect();
                    let next = vec![
                        (addr((generation * 2 + 1) as u16), generation),
                        (addr((generation * 2 + 2) as u16), generation),
                    ];
                    registry.apply_diff(next, &current);
                }
            })
        };

        for _ in 0..2000 {
            let snapshot = registry.snapshot();
            // Every diff swaps two entries for two entries of one generation
            assert_eq!(snapshot.len(), 2);
            let generations: std::collections::HashSet<_> = snapshot.iter().map(|(_, g)| *g).collect();
            assert_eq!(generations.len(), 1);
        }

        writer.join().unwrap();
    }
}
