//! Realtime sync client for the mesh dashboards.
//!
//! Wires the pure state model from `meshsync-core` and the local
//! persistence from `meshsync-store` to the backend: a reconnecting push
//! transport, the REST snapshot loader, the write client, and the
//! [`SyncSession`] that owns all per-session state.
//!
//! # Modules
//!
//! - [`config`]: SyncConfig and the Dashboard presets
//! - [`error`]: ClientError and TransportError
//! - [`transport`]: connection state machine and WebSocket driver
//! - [`snapshot`]: SnapshotLoader
//! - [`backend`]: REST write calls and identity lookup
//! - [`session`]: SyncSession event loop

pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use backend::{Backend, Identity};
pub use config::{Dashboard, SyncConfig};
pub use error::{ClientError, TransportError};
pub use session::{LinkStatus, SessionEvent, SyncSession};
pub use snapshot::SnapshotLoader;
pub use transport::{ConnectionMachine, ConnectionState, TransportEvent, TransportHandle};
