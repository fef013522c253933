//! Per-session owner of all sync state.
//!
//! [`SyncSession`] holds the merge engine, the optimistic tracker, the edge
//! allocator, and the transport handle. Everything that mutates that state
//! runs on the caller's task inside [`SyncSession::next`] or one of the
//! operations below, so no two merges interleave. Write requests run on
//! spawned tasks and report back through a completion channel that `next`
//! drains alongside the transport.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use meshsync_core::{
    Adjacency, Confirmation, Draft, EdgeKey, EntityId, Event, InboundFrame, MergeEngine,
    MergeOutcome, OptimisticTracker, OutgoingMessage, PendingRecord, SlotPair, TempId, Timeline,
    TimelineEntry, Timestamp,
};
use meshsync_store::{
    EdgeAttachmentAllocator, EdgeHint, KeyValueStore, MemoryStore, PositionOracle, SqliteStore,
};

use crate::backend::{Backend, Identity};
use crate::config::{Dashboard, SyncConfig};
use crate::error::ClientError;
use crate::snapshot::SnapshotLoader;
use crate::transport::{self, TransportEvent, TransportHandle, WsConnector};

/// Backing store for the slot table, chosen at runtime.
pub type SlotStore = Box<dyn KeyValueStore + Send>;

/// Connectivity indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Online,
    Offline,
}

/// What changed, as reported by [`SyncSession::next`].
#[derive(Debug)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// A push frame was merged.
    Merged(MergeOutcome),
    /// A write succeeded and its record now carries the canonical id.
    Confirmed {
        temp_id: TempId,
        confirmation: Confirmation,
    },
    /// A write failed; the record stays visible as failed.
    Failed { temp_id: TempId, reason: String },
}

struct WriteCompletion {
    temp_id: TempId,
    result: Result<Event, ClientError>,
}

pub struct SyncSession {
    config: SyncConfig,
    engine: MergeEngine,
    tracker: OptimisticTracker,
    allocator: EdgeAttachmentAllocator<SlotStore>,
    backend: Backend,
    loader: SnapshotLoader,
    transport: TransportHandle,
    identity: Option<Identity>,
    link: LinkStatus,
    connected_before: bool,
    completions_tx: mpsc::UnboundedSender<WriteCompletion>,
    completions_rx: mpsc::UnboundedReceiver<WriteCompletion>,
}

/// Opens the slot store named by the config: SQLite when a path is set,
/// memory otherwise.
pub fn open_slot_store(config: &SyncConfig) -> Result<SlotStore, ClientError> {
    Ok(match &config.slot_db {
        Some(path) => Box::new(SqliteStore::new(path)?),
        None => Box::new(MemoryStore::new()),
    })
}

impl SyncSession {
    /// Opens a session with the slot store named by the config.
    pub async fn connect(config: SyncConfig) -> Result<Self, ClientError> {
        let store = open_slot_store(&config)?;
        Self::open(config, store).await
    }

    /// Starts the transport, resolves the local identity (chat only), and
    /// seeds state from a snapshot. A snapshot failure is returned.
    pub async fn open(config: SyncConfig, store: SlotStore) -> Result<Self, ClientError> {
        config.validate()?;
        let backend = Backend::new(&config);
        let loader = SnapshotLoader::new(backend.clone());
        let allocator = EdgeAttachmentAllocator::load(store)?;
        let connector = WsConnector::new(config.ws_url());
        let transport = transport::spawn(connector, config.reconnect_delay);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let mut session = SyncSession {
            engine: MergeEngine::new(config.engine_config()),
            tracker: OptimisticTracker::new(Uuid::new_v4().simple().to_string()),
            allocator,
            backend,
            loader,
            transport,
            identity: None,
            link: LinkStatus::Offline,
            connected_before: false,
            completions_tx,
            completions_rx,
            config,
        };

        if session.config.dashboard == Dashboard::Chat {
            match session.backend.fetch_identity().await {
                Ok(identity) => {
                    info!(
                        node = %identity.node_id,
                        name = %identity.node_name,
                        "local identity"
                    );
                    session.identity = Some(identity);
                }
                Err(e) => {
                    warn!(error = %e, "could not resolve local identity; sending disabled")
                }
            }
        }

        if let Err(e) = session.refresh().await {
            session.transport.close();
            return Err(e);
        }
        Ok(session)
    }

    /// Waits for the next state change. Returns `None` once the transport
    /// has shut down after [`Self::close`].
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            tokio::select! {
                event = self.transport.recv() => match event? {
                    TransportEvent::Connected => {
                        self.link = LinkStatus::Online;
                        if self.connected_before && self.config.dashboard == Dashboard::Chat {
                            // The chat feed has no initial_state push; catch up on
                            // anything missed while offline.
                            if let Err(e) = self.refresh().await {
                                warn!(error = %e, "snapshot refresh after reconnect failed");
                            }
                        }
                        self.connected_before = true;
                        return Some(SessionEvent::Connected);
                    }
                    TransportEvent::Disconnected => {
                        self.link = LinkStatus::Offline;
                        return Some(SessionEvent::Disconnected);
                    }
                    TransportEvent::Frame(frame) => {
                        debug!(kind = frame.kind(), "merging push frame");
                        return Some(SessionEvent::Merged(self.merge_frame(frame)));
                    }
                },
                Some(done) = self.completions_rx.recv() => {
                    if let Some(event) = self.resolve(done) {
                        return Some(event);
                    }
                }
            }
        }
    }

    /// Applies a push frame. Frames that can replace the adjacency are
    /// diffed so slots of edges removed upstream are released right away.
    fn merge_frame(&mut self, frame: InboundFrame) -> MergeOutcome {
        let replaces_adjacency = matches!(
            frame,
            InboundFrame::Snapshot(_)
                | InboundFrame::EntitySetReplace(_)
                | InboundFrame::AdjacencyReplace(_)
        );
        if !replaces_adjacency {
            return self.engine.apply_frame(frame);
        }
        let before = self.engine.adjacency().clone();
        let outcome = self.engine.apply_frame(frame);
        self.release_removed_edges(&before, &outcome);
        outcome
    }

    fn release_removed_edges(&mut self, before: &Adjacency, outcome: &MergeOutcome) {
        if !outcome.adjacency_changed {
            return;
        }
        if let Err(e) = self.allocator.release_removed(before, self.engine.adjacency()) {
            warn!(error = %e, "could not release slots of removed edges");
        }
    }

    fn resolve(&mut self, done: WriteCompletion) -> Option<SessionEvent> {
        let WriteCompletion { temp_id, result } = done;
        match result {
            Ok(canonical) => {
                match self.tracker.confirm(&mut self.engine, &temp_id, canonical) {
                    Ok(confirmation) => Some(SessionEvent::Confirmed {
                        temp_id,
                        confirmation,
                    }),
                    Err(e) => {
                        warn!(error = %e, "discarding write confirmation");
                        None
                    }
                }
            }
            Err(error) => {
                warn!(%temp_id, error = %error, "write failed");
                let reason = error.to_string();
                match self.tracker.fail(&temp_id, reason.clone()) {
                    Ok(()) => Some(SessionEvent::Failed { temp_id, reason }),
                    Err(e) => {
                        warn!(error = %e, "discarding write failure");
                        None
                    }
                }
            }
        }
    }

    /// Optimistically records a message and issues the write in the background.
    pub fn submit(
        &mut self,
        recipient: Option<EntityId>,
        text: impl Into<String>,
    ) -> Result<TempId, ClientError> {
        let identity = self.identity.as_ref().ok_or(ClientError::NoIdentity)?;
        let draft = Draft {
            sender: identity.node_id.clone(),
            sender_name: Some(identity.node_name.clone()),
            recipient,
            payload: text.into(),
        };
        let outgoing = self.tracker.begin(&mut self.engine, draft, Timestamp::now());
        Ok(self.dispatch(outgoing))
    }

    /// User-initiated resend of a failed message under a new temporary id.
    pub fn resend(&mut self, temp_id: &TempId) -> Result<TempId, ClientError> {
        let outgoing = self.tracker.resend(&mut self.engine, temp_id, Timestamp::now())?;
        Ok(self.dispatch(outgoing))
    }

    /// Removes a failed message from view.
    pub fn dismiss(&mut self, temp_id: &TempId) -> Result<PendingRecord, ClientError> {
        Ok(self.tracker.dismiss(temp_id)?)
    }

    fn dispatch(&self, outgoing: OutgoingMessage) -> TempId {
        let temp_id = outgoing.temp_id.clone();
        let backend = self.backend.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = backend.post_message(&outgoing).await;
            let _ = completions.send(WriteCompletion {
                temp_id: outgoing.temp_id,
                result,
            });
        });
        temp_id
    }

    /// Reloads the snapshot and merges it. On failure prior state is kept.
    pub async fn refresh(&mut self) -> Result<MergeOutcome, ClientError> {
        let snapshot = self.loader.load().await?;
        let before = self.engine.adjacency().clone();
        let outcome = self.engine.apply_snapshot(snapshot);
        self.release_removed_edges(&before, &outcome);
        Ok(outcome)
    }

    /// Toggles the directed link `from -> to`. The adjacency itself changes
    /// when the backend pushes the new topology; a failed request reverts by
    /// reloading the snapshot.
    pub async fn toggle_link(
        &mut self,
        from: &EntityId,
        to: &EntityId,
    ) -> Result<(), ClientError> {
        if self.engine.adjacency().contains(from, to) {
            self.allocator.release(&EdgeKey::new(from.clone(), to.clone()))?;
        }
        if let Err(e) = self.backend.toggle_link(from, to).await {
            warn!(%from, %to, error = %e, "link toggle failed; reverting to backend state");
            if let Err(reload) = self.refresh().await {
                warn!(error = %reload, "revert snapshot failed");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stores an explicit slot pair for an edge the user drew.
    pub fn pin_edge(
        &mut self,
        from: &EntityId,
        to: &EntityId,
        slots: SlotPair,
    ) -> Result<(), ClientError> {
        Ok(self.allocator.pin(&EdgeKey::new(from.clone(), to.clone()), slots)?)
    }

    /// Slot hints for every current edge.
    pub fn edge_hints(
        &mut self,
        oracle: &impl PositionOracle,
    ) -> Result<Vec<EdgeHint>, ClientError> {
        Ok(self.allocator.allocate(self.engine.adjacency(), oracle)?)
    }

    /// The stored slot pair for `from -> to`, if one has been assigned.
    pub fn slot_hint(&self, from: &EntityId, to: &EntityId) -> Option<SlotPair> {
        self.allocator.hint(&EdgeKey::new(from.clone(), to.clone()))
    }

    /// Stops reconnecting and closes the channel. [`Self::next`] returns
    /// `None` once the transport is down; writes still in flight then go
    /// unreported.
    pub fn close(&self) {
        self.transport.close();
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.engine
    }

    pub fn tracker(&self) -> &OptimisticTracker {
        &self.tracker
    }

    pub fn timeline(&self) -> Timeline<'_> {
        Timeline::build(&self.engine, &self.tracker)
    }

    /// Messages exchanged between the local node and `peer`.
    pub fn conversation(&self, peer: &EntityId) -> Result<Vec<TimelineEntry<'_>>, ClientError> {
        let me = &self.identity.as_ref().ok_or(ClientError::NoIdentity)?.node_id;
        Ok(self
            .timeline()
            .conversation(me, peer)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}
