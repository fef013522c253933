//! Local persistence and edge-attachment allocation for mesh dashboards.
//!
//! Provides the [`KeyValueStore`] trait (the local-storage contract) with
//! [`MemoryStore`] and [`SqliteStore`] backends, the persisted
//! [`SlotTable`], and the [`EdgeAttachmentAllocator`] that fills it.
//!
//! # Modules
//!
//! - [`error`]: StoreError enum with all failure modes
//! - [`traits`]: KeyValueStore trait definition
//! - [`memory`]: MemoryStore implementation
//! - [`schema`]: migration setup for the SQLite backend
//! - [`sqlite`]: SqliteStore implementation
//! - [`slot_table`]: persisted `edge key -> slot pair` mapping
//! - [`allocator`]: slot assignment from positions and adjacency
//! - [`layout`]: deterministic circular position oracle

pub mod allocator;
pub mod error;
pub mod layout;
pub mod memory;
pub mod schema;
pub mod slot_table;
pub mod sqlite;
pub mod traits;

// Re-export key types for ergonomic use.
pub use allocator::{EdgeAttachmentAllocator, EdgeHint, Point, PositionOracle};
pub use error::StoreError;
pub use layout::{circular_layout, CircularLayout};
pub use memory::MemoryStore;
pub use slot_table::{SlotTable, SLOT_TABLE_KEY};
pub use sqlite::SqliteStore;
pub use traits::KeyValueStore;
