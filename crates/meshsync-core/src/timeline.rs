//! Display-ordered merge of canonical events and optimistic records.

use crate::engine::MergeEngine;
use crate::event::{DeliveryState, Timestamp};
use crate::id::{EntityId, RecordId};
use crate::tracker::OptimisticTracker;

/// One row of the merged view.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry<'a> {
    pub id: RecordId,
    pub sender: &'a EntityId,
    pub sender_name: Option<&'a str>,
    pub recipient: Option<&'a EntityId>,
    pub payload: &'a str,
    pub created_at: Timestamp,
    pub delivery: DeliveryState,
    pub failure: Option<&'a str>,
    arrival: u64,
}

impl TimelineEntry<'_> {
    pub fn is_between(&self, a: &EntityId, b: &EntityId) -> bool {
        (self.sender == a && self.recipient == Some(b))
            || (self.sender == b && self.recipient == Some(a))
    }
}

/// Canonical events and outstanding optimistic records ordered by
/// `(created_at, arrival)`. Each logical message appears at most once.
#[derive(Debug, Clone)]
pub struct Timeline<'a> {
    entries: Vec<TimelineEntry<'a>>,
}

impl<'a> Timeline<'a> {
    pub fn build(engine: &'a MergeEngine, tracker: &'a OptimisticTracker) -> Self {
        let canonical = engine.logged().iter().map(|logged| TimelineEntry {
            id: RecordId::Canonical(logged.event.id.clone()),
            sender: &logged.event.sender,
            sender_name: logged.event.sender_name.as_deref(),
            recipient: logged.event.recipient.as_ref(),
            payload: &logged.event.payload,
            created_at: logged.event.created_at,
            delivery: logged.event.delivery,
            failure: None,
            arrival: logged.arrival,
        });
        let optimistic = tracker.records().map(|record| TimelineEntry {
            id: RecordId::Temp(record.temp_id.clone()),
            sender: &record.draft.sender,
            sender_name: record.draft.sender_name.as_deref(),
            recipient: record.draft.recipient.as_ref(),
            payload: &record.draft.payload,
            created_at: record.created_at,
            delivery: record.state,
            failure: record.failure.as_deref(),
            arrival: record.arrival,
        });

        let mut entries: Vec<_> = canonical.chain(optimistic).collect();
        entries.sort_by_key(|entry| (entry.created_at, entry.arrival));
        Timeline { entries }
    }

    pub fn entries(&self) -> &[TimelineEntry<'a>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct exchange between `me` and `peer`, both directions.
    pub fn conversation(&self, me: &EntityId, peer: &EntityId) -> Vec<&TimelineEntry<'a>> {
        self.entries
            .iter()
            .filter(|entry| entry.is_between(me, peer))
            .collect()
    }
}
