//! Logical-to-underlying address translation table.

use std::collections::HashMap;

use corelib::Address;
use parking_lot::Mutex;

/// Mapping logical address -> underlying address, mutated under a lock.
///
/// Extended one entry at a time when peers enroll with us, and overwritten
/// wholesale when we receive a peer's full table. Entries are never evicted.
#[derive(Debug)]
pub struct RoutingTable<A, U> {
    entries: Mutex<HashMap<A, U>>,
}

impl<A: Address, U: Clone> RoutingTable<A, U> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Add or update one mapping, returning the previous underlying address.
    pub fn insert(&self, address: A, underlying: U) -> Option<U> {
        self.entries.lock().insert(address, underlying)
    }

    /// Translate a logical address.
    pub fn resolve(&self, address: &A) -> Option<U> {
        self.entries.lock().get(address).cloned()
    }

    /// Copy of every mapping, in no particular order.
    pub fn snapshot(&self) -> Vec<(A, U)> {
        self.entries
            .lock()
            .iter()
            .map(|(a, u)| (a.clone(), u.clone()))
            .collect()
    }

    /// Overwrite the whole table with `entries`.
    pub fn replace(&self, entries: impl IntoIterator<Item = (A, U)>) {
        let fresh: HashMap<A, U> = entries.into_iter().collect();
        *self.entries.lock() = fresh;
    }

    pub fn to_map(&self) -> HashMap<A, U> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<A: Address, U: Clone> Default for RoutingTable<A, U> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::NodeId;

    #[test]
    fn test_insert_and_resolve() {
        let table = RoutingTable::new();
        assert_eq!(table.resolve(&NodeId(1)), None);

        assert_eq!(table.insert(NodeId(1), "a"), None);
        assert_eq!(table.insert(NodeId(1), "b"), Some("a"));
        assert_eq!(table.resolve(&NodeId(1)), Some("b"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_replace_overwrites_instead_of_merging() {
        let table = RoutingTable::new();
        table.insert(NodeId(1), "a");
        table.insert(NodeId(9), "local-only");

        table.replace(vec![(NodeId(1), "x"), (NodeId(2), "y")]);

        assert_eq!(table.resolve(&NodeId(9)), None);
        assert_eq!(table.resolve(&NodeId(1)), Some("x"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_snapshot_round_trips_through_replace() {
        let source = RoutingTable::new();
        source.insert(NodeId(1), 10u16);
        source.insert(NodeId(2), 20u16);

        let copy = RoutingTable::new();
        copy.replace(source.snapshot());
        assert_eq!(copy.to_map(), source.to_map());
    }
}
