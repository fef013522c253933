//! Edge Attachment Allocator.
//!
//! Assigns each directed edge a `(source, target)` slot pair and remembers
//! it in the persisted [`SlotTable`], so a given edge keeps its anchors
//! across re-renders, reconnects, and restarts even when nodes move.
//!
//! A pass walks the edges in adjacency order. Edges between the same two
//! nodes (in either direction) share a counter; the nth such edge takes the
//! geometric base direction rotated `n` steps. The counter advances for
//! every edge, including ones that already had a stored assignment, so a
//! newly added parallel edge lands on a free direction.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use meshsync_core::{Adjacency, EdgeKey, EntityId, SlotPair};

use crate::error::StoreError;
use crate::slot_table::SlotTable;
use crate::traits::KeyValueStore;

/// Screen-space position, y growing downwards.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

/// Reports where a node currently sits. Backed by whatever does layout.
pub trait PositionOracle {
    fn position(&self, id: &EntityId) -> Option<Point>;
}

impl PositionOracle for HashMap<EntityId, Point> {
    fn position(&self, id: &EntityId) -> Option<Point> {
        self.get(id).copied()
    }
}

/// Rendering hint for one edge. `slots` is `None` until both endpoints
/// have a position.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeHint {
    pub key: EdgeKey,
    pub slots: Option<SlotPair>,
}

pub struct EdgeAttachmentAllocator<S> {
    table: SlotTable<S>,
    /// Keys emitted by the previous pass, for removal detection.
    last_pass: BTreeSet<String>,
}

impl<S: KeyValueStore> EdgeAttachmentAllocator<S> {
    pub fn new(table: SlotTable<S>) -> Self {
        EdgeAttachmentAllocator {
            table,
            last_pass: BTreeSet::new(),
        }
    }

    /// Loads the persisted table from `store`.
    pub fn load(store: S) -> Result<Self, StoreError> {
        Ok(Self::new(SlotTable::load(store)?))
    }

    /// Runs one pass over every edge in `adjacency`.
    pub fn allocate(
        &mut self,
        adjacency: &Adjacency,
        oracle: &impl PositionOracle,
    ) -> Result<Vec<EdgeHint>, StoreError> {
        let edges = adjacency
            .edges()
            .map(|(source, target)| (source.clone(), target.clone()));
        self.allocate_links(edges, oracle)
    }

    /// Runs one pass over an explicit edge list, which may repeat a directed
    /// pair. Edges from the previous pass that are missing now are released.
    pub fn allocate_links(
        &mut self,
        edges: impl IntoIterator<Item = (EntityId, EntityId)>,
        oracle: &impl PositionOracle,
    ) -> Result<Vec<EdgeHint>, StoreError> {
        let mut pair_counts: HashMap<(EntityId, EntityId), usize> = HashMap::new();
        let mut occurrences: HashMap<(EntityId, EntityId), usize> = HashMap::new();
        let mut seen_keys = BTreeSet::new();
        let mut hints = Vec::new();

        for (source, target) in edges {
            let occurrence = occurrences.entry((source.clone(), target.clone())).or_insert(0);
            let key = EdgeKey::nth(source, target, *occurrence);
            *occurrence += 1;

            let (lo, hi) = key.unordered();
            let counter = pair_counts.entry((lo.clone(), hi.clone())).or_insert(0);
            let rotation = *counter;
            *counter += 1;

            let slots = match self.table.get(&key) {
                Some(stored) => Some(stored),
                None => self.assign(&key, rotation, oracle)?,
            };
            seen_keys.insert(key.to_string());
            hints.push(EdgeHint { key, slots });
        }

        for gone in self.last_pass.difference(&seen_keys) {
            if self.table.remove_raw(gone)? {
                debug!(edge = %gone, "released slots of removed edge");
            }
        }
        self.last_pass = seen_keys;

        Ok(hints)
    }

    fn assign(
        &mut self,
        key: &EdgeKey,
        rotation: usize,
        oracle: &impl PositionOracle,
    ) -> Result<Option<SlotPair>, StoreError> {
        let (Some(from), Some(to)) = (oracle.position(&key.source), oracle.position(&key.target))
        else {
            return Ok(None);
        };
        let slots = SlotPair::toward(to.x - from.x, to.y - from.y, rotation);
        self.table.insert(key, slots)?;
        debug!(edge = %key, source = %slots.source, target = %slots.target, "assigned slots");
        Ok(Some(slots))
    }

    /// Stores an explicit slot pair, as drawn by the user.
    pub fn pin(&mut self, key: &EdgeKey, slots: SlotPair) -> Result<(), StoreError> {
        self.table.insert(key, slots)
    }

    /// Forgets the assignment for `key` so a recreated edge starts fresh.
    pub fn release(&mut self, key: &EdgeKey) -> Result<bool, StoreError> {
        self.last_pass.remove(&key.to_string());
        self.table.remove(key)
    }

    /// Releases every edge of `before` that is missing from `after`.
    pub fn release_removed(
        &mut self,
        before: &Adjacency,
        after: &Adjacency,
    ) -> Result<usize, StoreError> {
        let mut released = 0;
        for (source, target) in before.edges() {
            if after.contains(source, target) {
                continue;
            }
            if self.release(&EdgeKey::new(source.clone(), target.clone()))? {
                debug!(%source, %target, "released slots of edge removed upstream");
                released += 1;
            }
        }
        Ok(released)
    }

    pub fn hint(&self, key: &EdgeKey) -> Option<SlotPair> {
        self.table.get(key)
    }

    pub fn table(&self) -> &SlotTable<S> {
        &self.table
    }

    pub fn into_table(self) -> SlotTable<S> {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use meshsync_core::Compass;

    fn id(s: &str) -> EntityId {
        EntityId::new(s)
    }

    fn positions(points: &[(&str, f64, f64)]) -> HashMap<EntityId, Point> {
        points
            .iter()
            .map(|(name, x, y)| (id(name), Point::new(*x, *y)))
            .collect()
    }

    fn allocator() -> EdgeAttachmentAllocator<MemoryStore> {
        EdgeAttachmentAllocator::load(MemoryStore::new()).unwrap()
    }

    #[test]
    fn three_parallel_edges_fan_out() {
        let mut alloc = allocator();
        let oracle = positions(&[("A", 0.0, 0.0), ("B", 100.0, 0.0)]);
        let hints = alloc
            .allocate_links([(id("A"), id("B")), (id("B"), id("A")), (id("A"), id("B"))], &oracle)
            .unwrap();

        let keys: Vec<_> = hints.iter().map(|h| h.key.to_string()).collect();
        assert_eq!(keys, vec!["A-B", "B-A", "A-B#1"]);

        let compasses: Vec<Compass> =
            hints.iter().map(|h| h.slots.unwrap().source.compass).collect();
        assert_eq!(compasses, vec![Compass::Right, Compass::Top, Compass::Left]);
        assert_eq!(alloc.table().len(), 3);
    }

    #[test]
    fn stored_assignment_ignores_later_moves() {
        let mut alloc = allocator();
        let adjacency = Adjacency::from_pairs([("A", "B")]);
        let first = alloc
            .allocate(&adjacency, &positions(&[("A", 0.0, 0.0), ("B", 100.0, 0.0)]))
            .unwrap();
        let moved = alloc
            .allocate(&adjacency, &positions(&[("A", 0.0, 0.0), ("B", 0.0, 100.0)]))
            .unwrap();
        assert_eq!(first, moved);
        assert_eq!(moved[0].slots, Some(SlotPair::base(0)));
    }

    #[test]
    fn no_positions_means_no_hint_and_nothing_stored() {
        let mut alloc = allocator();
        let adjacency = Adjacency::from_pairs([("A", "B")]);
        let hints = alloc
            .allocate(&adjacency, &positions(&[("A", 0.0, 0.0)]))
            .unwrap();
        assert_eq!(hints[0].slots, None);
        assert!(alloc.table().is_empty());
    }

    #[test]
    fn removed_edge_is_released_and_recreated_fresh() {
        let mut alloc = allocator();
        let oracle = positions(&[("A", 0.0, 0.0), ("B", 100.0, 0.0)]);
        alloc
            .pin(&EdgeKey::new(id("A"), id("B")), SlotPair::base(3))
            .unwrap();
        alloc
            .allocate(&Adjacency::from_pairs([("A", "B")]), &oracle)
            .unwrap();

        alloc.allocate(&Adjacency::new(), &oracle).unwrap();
        assert!(alloc.table().is_empty());

        let hints = alloc
            .allocate(&Adjacency::from_pairs([("A", "B")]), &oracle)
            .unwrap();
        assert_eq!(hints[0].slots, Some(SlotPair::base(0)));
    }

    #[test]
    fn persisted_table_is_not_wiped_by_first_pass() {
        let mut alloc = allocator();
        let oracle = positions(&[("A", 0.0, 0.0), ("B", 100.0, 0.0)]);
        alloc
            .pin(&EdgeKey::new(id("C"), id("D")), SlotPair::base(1))
            .unwrap();
        let store = alloc.into_table().into_store();

        let mut reopened = EdgeAttachmentAllocator::load(store).unwrap();
        reopened
            .allocate(&Adjacency::from_pairs([("A", "B")]), &oracle)
            .unwrap();
        assert_eq!(
            reopened.hint(&EdgeKey::new(id("C"), id("D"))),
            Some(SlotPair::base(1))
        );
    }

    #[test]
    fn added_parallel_edge_takes_next_direction() {
        let mut alloc = allocator();
        let oracle = positions(&[("A", 0.0, 0.0), ("B", 0.0, 100.0)]);
        alloc
            .allocate(&Adjacency::from_pairs([("A", "B")]), &oracle)
            .unwrap();
        let hints = alloc
            .allocate(&Adjacency::from_pairs([("A", "B"), ("B", "A")]), &oracle)
            .unwrap();
        assert_eq!(hints[0].slots, Some(SlotPair::base(1)));
        // B -> A points up (bucket 3), rotated once.
        assert_eq!(hints[1].slots, Some(SlotPair::base(0)));
    }

    #[test]
    fn upstream_removal_releases_before_next_pass() {
        let mut alloc = allocator();
        let key = EdgeKey::new(id("A"), id("B"));
        alloc.pin(&key, SlotPair::base(3)).unwrap();
        alloc.pin(&EdgeKey::new(id("B"), id("A")), SlotPair::base(1)).unwrap();

        let before = Adjacency::from_pairs([("A", "B"), ("B", "A")]);
        let after = Adjacency::from_pairs([("B", "A")]);
        assert_eq!(alloc.release_removed(&before, &after).unwrap(), 1);
        assert_eq!(alloc.hint(&key), None);
        assert_eq!(alloc.hint(&EdgeKey::new(id("B"), id("A"))), Some(SlotPair::base(1)));

        let oracle = positions(&[("A", 0.0, 0.0), ("B", 100.0, 0.0)]);
        let hints = alloc
            .allocate(&Adjacency::from_pairs([("A", "B")]), &oracle)
            .unwrap();
        assert_eq!(hints[0].slots, Some(SlotPair::base(0)));
    }

    #[test]
    fn explicit_release() {
        let mut alloc = allocator();
        let key = EdgeKey::new(id("A"), id("B"));
        alloc.pin(&key, SlotPair::base(2)).unwrap();
        assert!(alloc.release(&key).unwrap());
        assert!(!alloc.release(&key).unwrap());
        assert_eq!(alloc.hint(&key), None);
    }
}
