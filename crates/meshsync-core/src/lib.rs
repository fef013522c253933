//! Client-side state model for the mesh dashboards.
//!
//! Holds everything that is pure and synchronous: the entity/adjacency/event
//! data model, inbound frame parsing, the dedup-and-merge engine, the
//! optimistic send tracker, the merged timeline view, and the compass-slot
//! math used for edge attachment.

pub mod adjacency;
pub mod engine;
pub mod entity;
pub mod error;
pub mod event;
pub mod frame;
pub mod id;
pub mod slot;
pub mod timeline;
pub mod tracker;

// Re-export commonly used types
pub use adjacency::Adjacency;
pub use engine::{Admission, EngineConfig, MergeEngine, MergeOutcome};
pub use entity::Entity;
pub use error::{FrameError, SlotParseError, TrackerError};
pub use event::{DeliveryState, Event, Timestamp};
pub use frame::{InboundFrame, Roster, Snapshot};
pub use id::{EntityId, EventId, RecordId, TempId};
pub use slot::{Compass, EdgeKey, Role, Slot, SlotPair};
pub use timeline::{Timeline, TimelineEntry};
pub use tracker::{Confirmation, Draft, OptimisticTracker, OutgoingMessage, PendingRecord};
