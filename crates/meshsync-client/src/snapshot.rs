//! Snapshot Loader.
//!
//! One-shot read of current backend truth. The chat backend serves the
//! roster and message window from separate endpoints, fetched concurrently;
//! the fields may come from slightly different moments. The testbed serves
//! everything from one endpoint.

use meshsync_core::{Entity, Event, Snapshot};

use crate::backend::Backend;
use crate::config::Dashboard;
use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    backend: Backend,
}

impl SnapshotLoader {
    pub fn new(backend: Backend) -> Self {
        SnapshotLoader { backend }
    }

    /// Fetches a fresh snapshot. The first failing fetch is returned as the
    /// error; retrying is up to the caller.
    pub async fn load(&self) -> Result<Snapshot, ClientError> {
        match self.backend.dashboard() {
            Dashboard::Chat => {
                let (entities, events) = tokio::try_join!(
                    self.backend.get_json::<Vec<Entity>>("/api/nodes"),
                    self.backend.get_json::<Vec<Event>>("/api/messages"),
                )?;
                Ok(Snapshot {
                    entities,
                    adjacency: Default::default(),
                    events,
                })
            }
            Dashboard::Visualizer => self.backend.get_json("/state").await,
        }
    }
}
