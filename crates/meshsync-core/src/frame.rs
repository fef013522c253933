//! Inbound push frames.
//!
//! The realtime channel delivers `{ "type": <kind>, "data": <payload> }`
//! JSON text frames. [`InboundFrame::parse`] turns one into a typed value or
//! a [`FrameError`]; callers log and drop errors without touching the channel.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adjacency::Adjacency;
use crate::entity::Entity;
use crate::error::FrameError;
use crate::event::Event;

/// Point-in-time view of backend state, from REST or an `initial_state` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, alias = "nodes")]
    pub entities: Vec<Entity>,
    #[serde(default, alias = "topology")]
    pub adjacency: Adjacency,
    /// Recent-event window (bounded by the backend).
    #[serde(default, alias = "traffic", alias = "messages")]
    pub events: Vec<Event>,
}

/// Full roster push. The visualizer form also carries the topology.
#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    pub entities: Vec<Entity>,
    pub adjacency: Option<Adjacency>,
}

/// A decoded push frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `initial_state`: a snapshot delivered over the push channel.
    Snapshot(Snapshot),
    /// `entity_upsert`: one entity created or renamed.
    EntityUpsert(Entity),
    /// `nodes_updated` / `nodes_update`: wholesale roster replacement.
    EntitySetReplace(Roster),
    /// `topology_update`: wholesale adjacency replacement.
    AdjacencyReplace(Adjacency),
    /// `new_message` / `traffic_update`: one new timed event.
    NewEvent(Event),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterPayload {
    List(Vec<Entity>),
    WithTopology {
        #[serde(alias = "entities")]
        nodes: Vec<Entity>,
        #[serde(default, alias = "adjacency")]
        topology: Option<Adjacency>,
    },
}

#[derive(Deserialize)]
struct TopologyPayload {
    #[serde(alias = "adjacency")]
    topology: Adjacency,
}

impl InboundFrame {
    /// Decodes one text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_parts(&envelope.kind, envelope.data)
    }

    /// Decodes a frame whose envelope has already been split.
    pub fn from_parts(kind: &str, data: Value) -> Result<Self, FrameError> {
        match kind {
            "initial_state" | "snapshot" => payload(kind, data).map(InboundFrame::Snapshot),
            "entity_upsert" | "node_upsert" => payload(kind, data).map(InboundFrame::EntityUpsert),
            "nodes_updated" | "nodes_update" => {
                let roster = match payload::<RosterPayload>(kind, data)? {
                    RosterPayload::List(entities) => Roster {
                        entities,
                        adjacency: None,
                    },
                    RosterPayload::WithTopology { nodes, topology } => Roster {
                        entities: nodes,
                        adjacency: topology,
                    },
                };
                Ok(InboundFrame::EntitySetReplace(roster))
            }
            "topology_update" => {
                // Tolerate both `{topology: {...}}` and a bare map.
                let adjacency = match payload::<TopologyPayload>(kind, data.clone()) {
                    Ok(wrapped) => wrapped.topology,
                    Err(_) => payload::<Adjacency>(kind, data)?,
                };
                Ok(InboundFrame::AdjacencyReplace(adjacency))
            }
            "new_message" | "traffic_update" => payload(kind, data).map(InboundFrame::NewEvent),
            other => Err(FrameError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Snapshot(_) => "snapshot",
            InboundFrame::EntityUpsert(_) => "entity_upsert",
            InboundFrame::EntitySetReplace(_) => "entity_set_replace",
            InboundFrame::AdjacencyReplace(_) => "adjacency_replace",
            InboundFrame::NewEvent(_) => "new_event",
        }
    }
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, FrameError> {
    serde_json::from_value(data).map_err(|source| FrameError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}
