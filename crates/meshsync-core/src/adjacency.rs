//! Directed reachability between mesh nodes.
//!
//! Stored as `source -> ordered set of targets`. The set type enforces the
//! no-duplicate-target invariant, including on deserialization, so a
//! backend list like `["b", "b"]` collapses to one edge. Insertion order is
//! kept because the edge-slot rotation depends on a stable iteration order.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::id::EntityId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Adjacency(IndexMap<EntityId, IndexSet<EntityId>>);

impl Adjacency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from directed pairs, dropping repeats.
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<EntityId>,
        B: Into<EntityId>,
    {
        let mut adjacency = Adjacency::new();
        for (source, target) in pairs {
            adjacency.insert(source.into(), target.into());
        }
        adjacency
    }

    /// Adds `source -> target`. Returns `false` if it was already present.
    pub fn insert(&mut self, source: EntityId, target: EntityId) -> bool {
        self.0.entry(source).or_default().insert(target)
    }

    /// Removes `source -> target`. The source keeps an (empty) row, matching
    /// the backend which never drops a registered node from its topology.
    pub fn remove(&mut self, source: &EntityId, target: &EntityId) -> bool {
        self.0
            .get_mut(source)
            .map(|targets| targets.shift_remove(target))
            .unwrap_or(false)
    }

    pub fn contains(&self, source: &EntityId, target: &EntityId) -> bool {
        self.0
            .get(source)
            .is_some_and(|targets| targets.contains(target))
    }

    /// Targets reachable from `source`.
    pub fn outgoing(&self, source: &EntityId) -> impl Iterator<Item = &EntityId> {
        self.0.get(source).into_iter().flatten()
    }

    /// Sources that can reach `target`.
    pub fn incoming<'a>(&'a self, target: &'a EntityId) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.0
            .iter()
            .filter(move |(_, targets)| targets.contains(target))
            .map(|(source, _)| source)
    }

    /// Every directed edge, in source order then target insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&EntityId, &EntityId)> {
        self.0
            .iter()
            .flat_map(|(source, targets)| targets.iter().map(move |target| (source, target)))
    }

    /// Every id that appears as a source or a target.
    pub fn endpoints(&self) -> IndexSet<&EntityId> {
        let mut ids = IndexSet::new();
        for (source, targets) in &self.0 {
            ids.insert(source);
            ids.extend(targets.iter());
        }
        ids
    }

    pub fn edge_count(&self) -> usize {
        self.0.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0
    }
}
