//! Identifier newtypes.
//!
//! Entity and event ids are opaque strings assigned by the backend. Radio
//! node ids sometimes arrive as raw integers; those are normalised to the
//! `0x%08X` form the backend uses everywhere else so a node seen both ways
//! maps to one entity.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Stable mesh participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

/// Canonical (backend-assigned) event identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EventId(pub String);

/// Locally generated identity of an optimistic record. Never sent as an
/// event id and never registered in the dedup set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(pub String);

/// Identity of a record as shown in the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    Temp(TempId),
    Canonical(EventId),
}

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Formats a numeric radio id the way the backend does.
    pub fn from_numeric(raw: u64) -> Self {
        EntityId(format!("0x{raw:08X}"))
    }
}

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        EventId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TempId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        EventId(s.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Temp(id) => write!(f, "{id}"),
            RecordId::Canonical(id) => write!(f, "{id}"),
        }
    }
}

/// Wire form shared by both id kinds: JSON string or JSON integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => EntityId(s),
            RawId::Number(n) => EntityId::from_numeric(n),
        })
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Traffic packets carry sequential integers; chat messages carry strings.
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => EventId(s),
            RawId::Number(n) => EventId(n.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_entity_id_is_hex_normalised() {
        let id: EntityId = serde_json::from_str("2751011906").unwrap();
        assert_eq!(id.as_str(), "0xA3F91C42");
    }

    #[test]
    fn string_entity_id_is_kept_verbatim() {
        let id: EntityId = serde_json::from_str("\"node-2\"").unwrap();
        assert_eq!(id, EntityId::new("node-2"));
    }

    #[test]
    fn numeric_event_id_becomes_decimal_string() {
        let id: EventId = serde_json::from_str("17").unwrap();
        assert_eq!(id.as_str(), "17");
    }

    #[test]
    fn record_id_display() {
        assert_eq!(RecordId::Canonical(EventId::from("m-42")).to_string(), "m-42");
        assert_eq!(
            RecordId::Temp(TempId("tmp-abc-1".into())).to_string(),
            "tmp-abc-1"
        );
    }
}
