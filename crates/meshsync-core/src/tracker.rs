//! Optimistic mutation tracker.
//!
//! Owns locally originated messages between submit and resolution. Each
//! record starts `Pending` under a temporary id and ends either
//! `Confirmed` (handed to the [`MergeEngine`] under its canonical id) or
//! `Failed` (kept here, visible, under its temporary id). Neither terminal
//! state is re-entered; resending a failed record creates a new record.

use chrono::TimeDelta;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::engine::{Admission, MergeEngine};
use crate::error::TrackerError;
use crate::event::{DeliveryState, Event, Timestamp};
use crate::id::{EntityId, EventId, TempId};

/// What the user asked to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub sender: EntityId,
    pub sender_name: Option<String>,
    pub recipient: Option<EntityId>,
    pub payload: String,
}

/// Write request body for one optimistic record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    #[serde(skip)]
    pub temp_id: TempId,
    pub sender: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<EntityId>,
    #[serde(rename = "content")]
    pub payload: String,
}

/// A not-yet-confirmed record.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub temp_id: TempId,
    pub draft: Draft,
    /// Display time: the local submit time shifted onto the backend's clock.
    pub created_at: Timestamp,
    /// Local clock at submit.
    pub submitted_at: Timestamp,
    pub state: DeliveryState,
    pub arrival: u64,
    /// Why the write failed, once it has.
    pub failure: Option<String>,
}

/// How a confirmation landed in the canonical store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The canonical record replaced the temporary one.
    Inserted(EventId),
    /// A delta for the same canonical id had already arrived; the temporary
    /// record was dropped so only one record remains.
    AlreadyPresent(EventId),
    /// The write succeeded, but its canonical timestamp is older than
    /// everything the bounded log retains, so no record stays visible. The
    /// id is still registered as seen.
    Expired(EventId),
}

impl Confirmation {
    pub fn id(&self) -> &EventId {
        match self {
            Confirmation::Inserted(id)
            | Confirmation::AlreadyPresent(id)
            | Confirmation::Expired(id) => id,
        }
    }

    /// True when the confirmed message is part of the retained log.
    pub fn is_visible(&self) -> bool {
        !matches!(self, Confirmation::Expired(_))
    }
}

/// Skews below this are round-trip noise, not a clock difference.
const MIN_CLOCK_SKEW_SECS: i64 = 30;

#[derive(Debug)]
pub struct OptimisticTracker {
    session_tag: String,
    issued: u64,
    records: IndexMap<TempId, PendingRecord>,
    /// Backend clock minus local clock, learned from confirmations. The chat
    /// backend stamps naive local wall-clock times, which parse as UTC.
    clock_offset: TimeDelta,
}

impl OptimisticTracker {
    /// `session_tag` must be unique per client session; temporary ids are
    /// `tmp-{session_tag}-{n}` with `n` never reused.
    pub fn new(session_tag: impl Into<String>) -> Self {
        OptimisticTracker {
            session_tag: session_tag.into(),
            issued: 0,
            records: IndexMap::new(),
            clock_offset: TimeDelta::zero(),
        }
    }

    /// Current estimate of backend clock minus local clock.
    pub fn clock_offset(&self) -> TimeDelta {
        self.clock_offset
    }

    fn learn_clock_offset(&mut self, submitted_at: Timestamp, canonical_at: Timestamp) {
        let skew = canonical_at.0 - submitted_at.0;
        let minutes = (skew.num_seconds() + 30).div_euclid(60);
        self.clock_offset = if skew.num_seconds().abs() < MIN_CLOCK_SKEW_SECS {
            TimeDelta::zero()
        } else {
            TimeDelta::minutes(minutes)
        };
        if !self.clock_offset.is_zero() {
            debug!(minutes, "backend clock differs from local clock");
        }
    }

    fn issue_temp_id(&mut self) -> TempId {
        self.issued += 1;
        TempId(format!("tmp-{}-{}", self.session_tag, self.issued))
    }

    /// Creates a pending record and returns the write request to issue.
    ///
    /// The record is visible immediately; it bypasses the engine's dedup set
    /// because its identity is new by construction.
    pub fn begin(
        &mut self,
        engine: &mut MergeEngine,
        draft: Draft,
        now: Timestamp,
    ) -> OutgoingMessage {
        let temp_id = self.issue_temp_id();
        let outgoing = OutgoingMessage {
            temp_id: temp_id.clone(),
            sender: draft.sender.clone(),
            sender_name: draft.sender_name.clone(),
            recipient: draft.recipient.clone(),
            payload: draft.payload.clone(),
        };
        self.records.insert(
            temp_id.clone(),
            PendingRecord {
                temp_id,
                draft,
                created_at: Timestamp(now.0 + self.clock_offset),
                submitted_at: now,
                state: DeliveryState::Pending,
                arrival: engine.next_arrival(),
                failure: None,
            },
        );
        outgoing
    }

    /// Resolves a pending record with the backend's canonical copy.
    pub fn confirm(
        &mut self,
        engine: &mut MergeEngine,
        temp_id: &TempId,
        mut canonical: Event,
    ) -> Result<Confirmation, TrackerError> {
        let record = self
            .records
            .get(temp_id)
            .ok_or_else(|| TrackerError::UnknownTempId(temp_id.clone()))?;
        if record.state == DeliveryState::Failed {
            return Err(TrackerError::AlreadyResolved {
                temp_id: temp_id.clone(),
                state: DeliveryState::Failed.as_str(),
            });
        }
        let arrival = record.arrival;
        let submitted_at = record.submitted_at;
        self.records.shift_remove(temp_id);
        self.learn_clock_offset(submitted_at, canonical.created_at);

        canonical.delivery = DeliveryState::Confirmed;
        let id = canonical.id.clone();
        match engine.admit_confirmed(canonical, arrival) {
            Admission::Duplicate => {
                debug!(%temp_id, %id, "canonical record already delivered by push");
                Ok(Confirmation::AlreadyPresent(id))
            }
            Admission::Admitted => Ok(Confirmation::Inserted(id)),
            Admission::Expired => {
                debug!(%temp_id, %id, "confirmed record is older than the retained window");
                Ok(Confirmation::Expired(id))
            }
        }
    }

    /// Marks a pending record failed. Its id is never registered as seen.
    pub fn fail(
        &mut self,
        temp_id: &TempId,
        reason: impl Into<String>,
    ) -> Result<(), TrackerError> {
        let record = self
            .records
            .get_mut(temp_id)
            .ok_or_else(|| TrackerError::UnknownTempId(temp_id.clone()))?;
        if record.state == DeliveryState::Failed {
            return Err(TrackerError::AlreadyResolved {
                temp_id: temp_id.clone(),
                state: DeliveryState::Failed.as_str(),
            });
        }
        record.state = DeliveryState::Failed;
        record.failure = Some(reason.into());
        Ok(())
    }

    /// User-initiated resend of a failed record: the failed record is
    /// replaced by a brand-new pending one with the same content.
    pub fn resend(
        &mut self,
        engine: &mut MergeEngine,
        temp_id: &TempId,
        now: Timestamp,
    ) -> Result<OutgoingMessage, TrackerError> {
        let record = self.take_failed(temp_id)?;
        Ok(self.begin(engine, record.draft, now))
    }

    /// Removes a failed record from view.
    pub fn dismiss(&mut self, temp_id: &TempId) -> Result<PendingRecord, TrackerError> {
        self.take_failed(temp_id)
    }

    fn take_failed(&mut self, temp_id: &TempId) -> Result<PendingRecord, TrackerError> {
        match self.records.get(temp_id) {
            None => Err(TrackerError::UnknownTempId(temp_id.clone())),
            Some(record) if record.state != DeliveryState::Failed => {
                Err(TrackerError::NotFailed(temp_id.clone()))
            }
            Some(_) => Ok(self
                .records
                .shift_remove(temp_id)
                .ok_or_else(|| TrackerError::UnknownTempId(temp_id.clone()))?),
        }
    }

    pub fn get(&self, temp_id: &TempId) -> Option<&PendingRecord> {
        self.records.get(temp_id)
    }

    /// Outstanding records (pending and failed) in submit order.
    pub fn records(&self) -> impl Iterator<Item = &PendingRecord> {
        self.records.values()
    }

    pub fn pending_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.state == DeliveryState::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::frame::{InboundFrame, Snapshot};
    use serde_json::Map;

    fn engine() -> MergeEngine {
        let mut engine = MergeEngine::default();
        engine.apply_snapshot(Snapshot::default());
        engine
    }

    fn draft(text: &str) -> Draft {
        Draft {
            sender: EntityId::new("node-1"),
            sender_name: Some("Base".into()),
            recipient: Some(EntityId::new("node-2")),
            payload: text.to_string(),
        }
    }

    fn canonical(id: &str, text: &str) -> Event {
        Event {
            id: EventId::new(id),
            sender: EntityId::new("node-1"),
            recipient: Some(EntityId::new("node-2")),
            payload: text.to_string(),
            created_at: Timestamp::from_micros(1_000_000).unwrap(),
            delivery: DeliveryState::Confirmed,
            sender_name: None,
            attributes: Map::new(),
        }
    }

    #[test]
    fn temp_ids_are_unique_and_never_reused() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s1");
        let a = tracker.begin(&mut engine, draft("a"), Timestamp::now());
        tracker.fail(&a.temp_id, "offline").unwrap();
        tracker.dismiss(&a.temp_id).unwrap();
        let b = tracker.begin(&mut engine, draft("b"), Timestamp::now());
        assert_ne!(a.temp_id, b.temp_id);
        assert_eq!(b.temp_id.as_str(), "tmp-s1-2");
    }

    #[test]
    fn confirm_hands_record_to_engine() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("hi"), Timestamp::now());
        assert_eq!(tracker.pending_count(), 1);

        let conf = tracker
            .confirm(&mut engine, &out.temp_id, canonical("m-42", "hi"))
            .unwrap();
        assert_eq!(conf, Confirmation::Inserted(EventId::new("m-42")));
        assert!(tracker.get(&out.temp_id).is_none());
        assert!(engine.is_seen(&EventId::new("m-42")));

        let later = engine.apply_delta(InboundFrame::NewEvent(canonical("m-42", "hi")));
        assert_eq!(later.duplicates, 1);
        assert_eq!(engine.events().count(), 1);
    }

    #[test]
    fn confirm_after_push_won_the_race_keeps_one_record() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("hi"), Timestamp::now());
        engine.apply_delta(InboundFrame::NewEvent(canonical("m-7", "hi")));

        let conf = tracker
            .confirm(&mut engine, &out.temp_id, canonical("m-7", "hi"))
            .unwrap();
        assert_eq!(conf, Confirmation::AlreadyPresent(EventId::new("m-7")));
        assert_eq!(engine.events().count(), 1);
        assert_eq!(tracker.records().count(), 0);
    }

    #[test]
    fn confirm_older_than_retained_window_reports_expired() {
        let mut engine = MergeEngine::new(EngineConfig {
            retained_events: 2,
            max_buffered_frames: 16,
        });
        let at = |id: &str, secs: i64| {
            let mut event = canonical(id, "old");
            event.created_at = Timestamp::from_micros(secs * 1_000_000).unwrap();
            event
        };
        engine.apply_snapshot(Snapshot {
            events: vec![at("m-100", 100), at("m-200", 200)],
            ..Snapshot::default()
        });

        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("late"), Timestamp::now());
        let conf = tracker
            .confirm(&mut engine, &out.temp_id, at("m-50", 50))
            .unwrap();

        assert_eq!(conf, Confirmation::Expired(EventId::new("m-50")));
        assert!(!conf.is_visible());
        assert_eq!(tracker.records().count(), 0);
        assert_eq!(engine.events().count(), 2);
        assert!(engine.is_seen(&EventId::new("m-50")));

        let echo = engine.apply_delta(InboundFrame::NewEvent(at("m-50", 50)));
        assert_eq!(echo.duplicates, 1);
    }

    #[test]
    fn confirm_inside_retained_window_is_visible() {
        let mut engine = MergeEngine::new(EngineConfig {
            retained_events: 2,
            max_buffered_frames: 16,
        });
        engine.apply_snapshot(Snapshot::default());
        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("hi"), Timestamp::now());
        let conf = tracker
            .confirm(&mut engine, &out.temp_id, canonical("m-1", "hi"))
            .unwrap();
        assert!(conf.is_visible());
        assert_eq!(engine.events().count(), 1);
    }

    #[test]
    fn pending_records_follow_backend_clock() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s");
        let local = |secs: i64| Timestamp::from_micros(secs * 1_000_000).unwrap();

        let first = tracker.begin(&mut engine, draft("a"), local(1_000));
        assert_eq!(tracker.get(&first.temp_id).unwrap().created_at, local(1_000));

        // Backend two hours ahead, reply stamped 400ms after submit.
        let mut reply = canonical("m-1", "a");
        reply.created_at = Timestamp::from_micros(1_000_400_000 + 7_200_000_000).unwrap();
        tracker.confirm(&mut engine, &first.temp_id, reply).unwrap();
        assert_eq!(tracker.clock_offset(), TimeDelta::hours(2));

        let second = tracker.begin(&mut engine, draft("b"), local(1_060));
        let record = tracker.get(&second.temp_id).unwrap();
        assert_eq!(record.created_at, local(1_060 + 7_200));
        assert_eq!(record.submitted_at, local(1_060));

        let timeline = crate::timeline::Timeline::build(&engine, &tracker);
        assert_eq!(timeline.entries().last().unwrap().payload, "b");
    }

    #[test]
    fn round_trip_latency_is_not_clock_skew() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("a"), Timestamp::from_micros(0).unwrap());
        let mut reply = canonical("m-1", "a");
        reply.created_at = Timestamp::from_micros(2_500_000).unwrap();
        tracker.confirm(&mut engine, &out.temp_id, reply).unwrap();
        assert!(tracker.clock_offset().is_zero());
    }

    #[test]
    fn failed_is_terminal() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("hi"), Timestamp::now());
        tracker.fail(&out.temp_id, "503").unwrap();

        let err = tracker
            .confirm(&mut engine, &out.temp_id, canonical("m-1", "hi"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyResolved { .. }));
        assert!(matches!(
            tracker.fail(&out.temp_id, "again"),
            Err(TrackerError::AlreadyResolved { .. })
        ));
        let record = tracker.get(&out.temp_id).unwrap();
        assert_eq!(record.state, DeliveryState::Failed);
        assert_eq!(record.failure.as_deref(), Some("503"));
        assert_eq!(engine.seen_count(), 0);
    }

    #[test]
    fn confirmed_cannot_fail() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("hi"), Timestamp::now());
        tracker
            .confirm(&mut engine, &out.temp_id, canonical("m-1", "hi"))
            .unwrap();
        assert!(matches!(
            tracker.fail(&out.temp_id, "late error"),
            Err(TrackerError::UnknownTempId(_))
        ));
    }

    #[test]
    fn resend_requires_failure_and_issues_new_id() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("hi"), Timestamp::now());
        assert!(matches!(
            tracker.resend(&mut engine, &out.temp_id, Timestamp::now()),
            Err(TrackerError::NotFailed(_))
        ));

        tracker.fail(&out.temp_id, "offline").unwrap();
        let again = tracker
            .resend(&mut engine, &out.temp_id, Timestamp::now())
            .unwrap();
        assert_ne!(again.temp_id, out.temp_id);
        assert_eq!(again.payload, "hi");
        assert_eq!(tracker.records().count(), 1);
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn outgoing_body_matches_backend_contract() {
        let mut engine = engine();
        let mut tracker = OptimisticTracker::new("s");
        let out = tracker.begin(&mut engine, draft("hi"), Timestamp::now());
        insta::assert_json_snapshot!(out, @r#"
        {
          "sender": "node-1",
          "sender_name": "Base",
          "recipient": "node-2",
          "content": "hi"
        }
        "#);
    }
}
