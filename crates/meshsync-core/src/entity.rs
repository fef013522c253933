//! Mesh participants.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::id::EntityId;

/// A mesh node as seen by the client. Created on first sighting, updated in
/// place, never removed during a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(rename = "name")]
    pub display_name: String,
    /// Everything else the backend reported (`last_seen`, `signal_strength`,
    /// `status`, ...). Kept opaque.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Entity {
    /// Minimal record for an id we only know by reference.
    pub fn bare(id: EntityId) -> Self {
        let display_name = id.0.clone();
        Entity {
            id,
            display_name,
            attributes: Map::new(),
        }
    }

    pub fn named(id: EntityId, display_name: impl Into<String>) -> Self {
        Entity {
            id,
            display_name: display_name.into(),
            attributes: Map::new(),
        }
    }

    /// Folds an update into this record. Only fields the update actually
    /// carries overwrite existing ones.
    pub fn merge(&mut self, update: Entity) -> bool {
        let mut changed = false;
        if update.display_name != update.id.0 && update.display_name != self.display_name {
            self.display_name = update.display_name;
            changed = true;
        }
        for (key, value) in update.attributes {
            if self.attributes.get(&key) != Some(&value) {
                self.attributes.insert(key, value);
                changed = true;
            }
        }
        changed
    }
}

#[derive(Deserialize)]
struct EntityObject {
    id: EntityId,
    #[serde(default, alias = "display_name", alias = "node_name")]
    name: Option<String>,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntity {
    Object(EntityObject),
    Id(EntityId),
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The visualizer roster is a bare list of ids; the chat roster is objects.
        Ok(match RawEntity::deserialize(deserializer)? {
            RawEntity::Id(id) => Entity::bare(id),
            RawEntity::Object(obj) => {
                let display_name = obj.name.unwrap_or_else(|| obj.id.0.clone());
                Entity {
                    id: obj.id,
                    display_name,
                    attributes: obj.attributes,
                }
            }
        })
    }
}
