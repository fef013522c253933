//! Dedup & merge engine.
//!
//! [`MergeEngine`] exclusively owns canonical session state: the entity
//! roster, the adjacency map, the retained event log, and the seen-set of
//! event ids. Snapshots and push frames both flow through it; every logical
//! event id is materialised at most once per session no matter how many
//! times, or through which source, it arrives.
//!
//! # Snapshot/delta ordering
//!
//! Until the first snapshot is applied the engine is *awaiting* and buffers
//! push frames instead of applying them. The snapshot is applied, then the
//! buffer is replayed through the normal dedup path. From then on the engine
//! is *live*: later snapshots replace the roster and adjacency wholesale
//! (last snapshot wins) while their event windows merge through dedup.
//!
//! # Log ordering
//!
//! The log is kept sorted by `(created_at, arrival)` where `arrival` is a
//! session-wide counter. Display order is therefore timestamp order with
//! arrival order breaking ties, and capping the log evicts the oldest
//! events by timestamp.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::adjacency::Adjacency;
use crate::entity::Entity;
use crate::event::Event;
use crate::frame::{InboundFrame, Snapshot};
use crate::id::{EntityId, EventId};

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of events kept in the log (most recent by timestamp).
    pub retained_events: usize,
    /// Maximum number of push frames held while awaiting the first snapshot.
    pub max_buffered_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retained_events: 100,
            max_buffered_frames: 1024,
        }
    }
}

/// Result of offering one event to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New id; the event is now in the log.
    Admitted,
    /// New id, but older than everything retained: registered as seen and
    /// immediately evicted by the cap.
    Expired,
    /// Id already seen; nothing changed.
    Duplicate,
}

/// Summary of what one merge step changed, for callers deciding what to redraw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub entities_changed: bool,
    pub adjacency_changed: bool,
    pub admitted: Vec<EventId>,
    pub duplicates: usize,
    /// The frame was buffered because no snapshot has been applied yet.
    pub buffered: bool,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        !self.entities_changed && !self.adjacency_changed && self.admitted.is_empty()
    }

    fn absorb(&mut self, other: MergeOutcome) {
        self.entities_changed |= other.entities_changed;
        self.adjacency_changed |= other.adjacency_changed;
        self.admitted.extend(other.admitted);
        self.duplicates += other.duplicates;
    }

    fn record(&mut self, id: EventId, admission: Admission) {
        match admission {
            Admission::Admitted => self.admitted.push(id),
            Admission::Expired => {}
            Admission::Duplicate => self.duplicates += 1,
        }
    }
}

/// One retained event and its arrival stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub arrival: u64,
    pub event: Event,
}

#[derive(Debug)]
enum Phase {
    AwaitingSnapshot(VecDeque<InboundFrame>),
    Live,
}

/// Canonical state store for one session.
#[derive(Debug)]
pub struct MergeEngine {
    config: EngineConfig,
    entities: IndexMap<EntityId, Entity>,
    adjacency: Adjacency,
    log: Vec<LoggedEvent>,
    seen: HashSet<EventId>,
    phase: Phase,
    next_arrival: u64,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl MergeEngine {
    pub fn new(config: EngineConfig) -> Self {
        MergeEngine {
            config,
            entities: IndexMap::new(),
            adjacency: Adjacency::new(),
            log: Vec::new(),
            seen: HashSet::new(),
            phase: Phase::AwaitingSnapshot(VecDeque::new()),
            next_arrival: 0,
        }
    }

    /// True once a snapshot has been applied.
    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Live)
    }

    // -------------------------------------------------------------------
    // Inputs
    // -------------------------------------------------------------------

    /// Applies any decoded frame: snapshots go through [`Self::apply_snapshot`],
    /// everything else through [`Self::apply_delta`].
    pub fn apply_frame(&mut self, frame: InboundFrame) -> MergeOutcome {
        match frame {
            InboundFrame::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            delta => self.apply_delta(delta),
        }
    }

    /// Seeds or refreshes state from a full snapshot, then replays any
    /// frames buffered while awaiting it.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> MergeOutcome {
        let mut outcome = MergeOutcome {
            entities_changed: self.replace_entities(snapshot.entities),
            adjacency_changed: self.replace_adjacency(snapshot.adjacency),
            ..MergeOutcome::default()
        };

        let mut window = snapshot.events;
        window.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for event in window {
            let id = event.id.clone();
            let admission = self.admit(event);
            outcome.record(id, admission);
        }

        if let Phase::AwaitingSnapshot(buffered) =
            std::mem::replace(&mut self.phase, Phase::Live)
        {
            if !buffered.is_empty() {
                debug!(frames = buffered.len(), "replaying frames buffered before snapshot");
            }
            for frame in buffered {
                let replayed = self.apply_frame(frame);
                outcome.absorb(replayed);
            }
        }
        outcome
    }

    /// Applies one incremental frame, or buffers it if no snapshot has been
    /// applied yet.
    pub fn apply_delta(&mut self, frame: InboundFrame) -> MergeOutcome {
        if let Phase::AwaitingSnapshot(buffer) = &mut self.phase {
            if buffer.len() >= self.config.max_buffered_frames {
                warn!(
                    limit = self.config.max_buffered_frames,
                    "pre-snapshot buffer full; dropping oldest frame"
                );
                buffer.pop_front();
            }
            buffer.push_back(frame);
            return MergeOutcome {
                buffered: true,
                ..MergeOutcome::default()
            };
        }

        let mut outcome = MergeOutcome::default();
        match frame {
            InboundFrame::Snapshot(snapshot) => return self.apply_snapshot(snapshot),
            InboundFrame::EntityUpsert(entity) => {
                outcome.entities_changed = self.upsert_entity(entity);
            }
            InboundFrame::EntitySetReplace(roster) => {
                outcome.entities_changed = self.replace_entities(roster.entities);
                if let Some(adjacency) = roster.adjacency {
                    outcome.adjacency_changed = self.replace_adjacency(adjacency);
                }
            }
            InboundFrame::AdjacencyReplace(adjacency) => {
                outcome.adjacency_changed = self.replace_adjacency(adjacency);
            }
            InboundFrame::NewEvent(event) => {
                let id = event.id.clone();
                let known_before = self.entities.len();
                let admission = self.admit(event);
                outcome.entities_changed = self.entities.len() != known_before;
                outcome.record(id, admission);
            }
        }
        outcome
    }

    /// Inserts a new entity or merges updatable fields into a known one.
    pub fn upsert_entity(&mut self, entity: Entity) -> bool {
        match self.entities.get_mut(&entity.id) {
            Some(existing) => existing.merge(entity),
            None => {
                self.entities.insert(entity.id.clone(), entity);
                true
            }
        }
    }

    /// Replaces the roster wholesale.
    pub fn replace_entities(&mut self, entities: Vec<Entity>) -> bool {
        let mut next: IndexMap<EntityId, Entity> = IndexMap::with_capacity(entities.len());
        for entity in entities {
            match next.get_mut(&entity.id) {
                Some(existing) => {
                    existing.merge(entity);
                }
                None => {
                    next.insert(entity.id.clone(), entity);
                }
            }
        }
        let changed = next != self.entities;
        self.entities = next;
        changed
    }

    /// Replaces the adjacency map wholesale.
    pub fn replace_adjacency(&mut self, adjacency: Adjacency) -> bool {
        let changed = adjacency != self.adjacency;
        self.adjacency = adjacency;
        changed
    }

    /// Offers one timed event. Duplicates (by id) are discarded.
    pub fn admit(&mut self, event: Event) -> Admission {
        let arrival = self.next_arrival();
        self.admit_at(event, arrival)
    }

    /// Offers a confirmed optimistic record, keeping the arrival stamp its
    /// temporary record had so ties order exactly as they were displayed.
    pub fn admit_confirmed(&mut self, event: Event, arrival: u64) -> Admission {
        self.admit_at(event, arrival)
    }

    fn admit_at(&mut self, event: Event, arrival: u64) -> Admission {
        if !self.seen.insert(event.id.clone()) {
            debug!(id = %event.id, "discarding duplicate event");
            return Admission::Duplicate;
        }

        self.adopt_sender(&event);

        let key = (event.created_at, arrival);
        let pos = self
            .log
            .partition_point(|logged| (logged.event.created_at, logged.arrival) <= key);
        self.log.insert(pos, LoggedEvent { arrival, event });

        let overflow = self.log.len().saturating_sub(self.config.retained_events);
        if overflow > 0 {
            self.log.drain(..overflow);
            if pos < overflow {
                return Admission::Expired;
            }
        }
        Admission::Admitted
    }

    /// A named sender we have never seen gets a minimal roster entry.
    fn adopt_sender(&mut self, event: &Event) {
        let Some(name) = event.sender_name.as_deref() else {
            return;
        };
        if !self.entities.contains_key(&event.sender) {
            debug!(id = %event.sender, name, "synthesizing entity from event metadata");
            self.entities.insert(
                event.sender.clone(),
                Entity::named(event.sender.clone(), name),
            );
        }
    }

    /// Hands out the next session-wide arrival stamp.
    pub fn next_arrival(&mut self) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        arrival
    }

    // -------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------

    pub fn is_seen(&self, id: &EventId) -> bool {
        self.seen.contains(id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    /// Retained events in display order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.log.iter().map(|logged| &logged.event)
    }

    pub(crate) fn logged(&self) -> &[LoggedEvent] {
        &self.log
    }

    pub fn retained_events(&self) -> usize {
        self.config.retained_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Timestamp;
    use crate::frame::Roster;
    use proptest::prelude::*;
    use serde_json::Map;

    fn event(id: &str, secs: i64) -> Event {
        Event {
            id: EventId::new(id),
            sender: EntityId::new("a"),
            recipient: Some(EntityId::new("b")),
            payload: format!("payload {id}"),
            created_at: Timestamp::from_micros(secs * 1_000_000).unwrap(),
            delivery: Default::default(),
            sender_name: None,
            attributes: Map::new(),
        }
    }

    fn live() -> MergeEngine {
        let mut engine = MergeEngine::default();
        engine.apply_snapshot(Snapshot::default());
        engine
    }

    fn ids(engine: &MergeEngine) -> Vec<String> {
        engine.events().map(|e| e.id.0.clone()).collect()
    }

    #[test]
    fn same_delta_twice_is_a_noop() {
        let mut engine = live();
        let first = engine.apply_delta(InboundFrame::NewEvent(event("1", 10)));
        let second = engine.apply_delta(InboundFrame::NewEvent(event("1", 10)));
        assert_eq!(first.admitted, vec![EventId::new("1")]);
        assert!(second.is_noop());
        assert_eq!(second.duplicates, 1);
        assert_eq!(ids(&engine), vec!["1"]);
    }

    #[test]
    fn out_of_order_delivery_displays_by_timestamp() {
        let mut engine = live();
        for (id, t) in [("t3", 3), ("t1", 1), ("t2", 2)] {
            engine.apply_delta(InboundFrame::NewEvent(event(id, t)));
        }
        assert_eq!(ids(&engine), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut engine = live();
        for id in ["x", "y", "z"] {
            engine.apply_delta(InboundFrame::NewEvent(event(id, 5)));
        }
        assert_eq!(ids(&engine), vec!["x", "y", "z"]);
    }

    #[test]
    fn frames_before_snapshot_are_buffered_then_deduped() {
        let mut engine = MergeEngine::default();
        let buffered = engine.apply_delta(InboundFrame::NewEvent(event("1", 1)));
        assert!(buffered.buffered);
        assert_eq!(engine.events().count(), 0);

        let outcome = engine.apply_snapshot(Snapshot {
            events: vec![event("1", 1), event("0", 0)],
            ..Snapshot::default()
        });
        assert!(engine.is_live());
        assert_eq!(outcome.admitted.len(), 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(ids(&engine), vec!["0", "1"]);
    }

    #[test]
    fn buffer_drops_oldest_when_full() {
        let mut engine = MergeEngine::new(EngineConfig {
            retained_events: 100,
            max_buffered_frames: 2,
        });
        for (id, t) in [("1", 1), ("2", 2), ("3", 3)] {
            engine.apply_delta(InboundFrame::NewEvent(event(id, t)));
        }
        engine.apply_snapshot(Snapshot::default());
        assert_eq!(ids(&engine), vec!["2", "3"]);
    }

    #[test]
    fn later_snapshot_replaces_roster_but_merges_events() {
        let mut engine = MergeEngine::default();
        engine.apply_snapshot(Snapshot {
            entities: vec![Entity::bare(EntityId::new("a")), Entity::bare(EntityId::new("b"))],
            adjacency: Adjacency::from_pairs([("a", "b")]),
            events: vec![event("1", 1)],
        });
        engine.apply_snapshot(Snapshot {
            entities: vec![Entity::bare(EntityId::new("c"))],
            adjacency: Adjacency::new(),
            events: vec![event("1", 1), event("2", 2)],
        });
        let roster: Vec<_> = engine.entities().map(|e| e.id.0.as_str()).collect();
        assert_eq!(roster, vec!["c"]);
        assert!(engine.adjacency().is_empty());
        assert_eq!(ids(&engine), vec!["1", "2"]);
    }

    #[test]
    fn upsert_renames_in_place() {
        let mut engine = live();
        engine.apply_delta(InboundFrame::EntitySetReplace(Roster {
            entities: vec![Entity::named(EntityId::new("n1"), "old")],
            adjacency: None,
        }));
        let upsert = InboundFrame::EntityUpsert(Entity::named(EntityId::new("n1"), "new"));
        let outcome = engine.apply_delta(upsert);
        assert!(outcome.entities_changed);
        assert_eq!(engine.entities().count(), 1);
        assert_eq!(engine.entity(&EntityId::new("n1")).unwrap().display_name, "new");
    }

    #[test]
    fn named_sender_is_synthesized() {
        let mut engine = live();
        let mut e = event("1", 1);
        e.sender = EntityId::new("0x0000BEEF");
        e.sender_name = Some("Hilltop".into());
        let outcome = engine.apply_delta(InboundFrame::NewEvent(e));
        assert!(outcome.entities_changed);
        assert_eq!(
            engine.entity(&EntityId::new("0x0000BEEF")).unwrap().display_name,
            "Hilltop"
        );
    }

    #[test]
    fn visualizer_roster_also_replaces_topology() {
        let mut engine = live();
        let outcome = engine.apply_delta(InboundFrame::EntitySetReplace(Roster {
            entities: vec![Entity::bare(EntityId::new("A"))],
            adjacency: Some(Adjacency::from_pairs([("A", "B")])),
        }));
        assert!(outcome.entities_changed && outcome.adjacency_changed);
        assert!(engine.adjacency().contains(&EntityId::new("A"), &EntityId::new("B")));
    }

    #[test]
    fn event_older_than_retained_window_expires() {
        let mut engine = MergeEngine::new(EngineConfig {
            retained_events: 2,
            ..EngineConfig::default()
        });
        engine.apply_snapshot(Snapshot::default());
        assert_eq!(engine.admit(event("b", 2)), Admission::Admitted);
        assert_eq!(engine.admit(event("c", 3)), Admission::Admitted);
        assert_eq!(engine.admit(event("a", 1)), Admission::Expired);
        assert!(engine.is_seen(&EventId::new("a")));
        assert_eq!(engine.admit(event("a", 1)), Admission::Duplicate);
        assert_eq!(ids(&engine), vec!["b", "c"]);
    }

    proptest! {
        #[test]
        fn applying_everything_twice_matches_applying_once(
            times in proptest::collection::vec(0i64..1_000, 1..60)
        ) {
            let events: Vec<Event> = times
                .iter()
                .enumerate()
                .map(|(i, t)| event(&format!("e{i}"), *t))
                .collect();

            let mut once = live();
            let mut twice = live();
            for e in &events {
                once.apply_delta(InboundFrame::NewEvent(e.clone()));
                twice.apply_delta(InboundFrame::NewEvent(e.clone()));
                twice.apply_delta(InboundFrame::NewEvent(e.clone()));
            }
            prop_assert_eq!(ids(&once), ids(&twice));
        }

        #[test]
        fn snapshot_and_delta_commute(t in 0i64..1_000, snapshot_first in any::<bool>()) {
            let shared = event("shared", t);
            let mut engine = live();
            let snapshot = Snapshot { events: vec![shared.clone()], ..Snapshot::default() };
            if snapshot_first {
                engine.apply_snapshot(snapshot);
                engine.apply_delta(InboundFrame::NewEvent(shared));
            } else {
                engine.apply_delta(InboundFrame::NewEvent(shared));
                engine.apply_snapshot(snapshot);
            }
            prop_assert_eq!(ids(&engine), vec!["shared".to_string()]);
        }

        #[test]
        fn bounded_log_keeps_most_recent(
            order in Just((0i64..150).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut engine = live();
            for t in &order {
                engine.apply_delta(InboundFrame::NewEvent(event(&format!("e{t}"), *t)));
            }
            let expected: Vec<String> = (50..150).map(|t| format!("e{t}")).collect();
            prop_assert_eq!(ids(&engine), expected);
            prop_assert_eq!(engine.seen_count(), 150);
        }
    }
}
