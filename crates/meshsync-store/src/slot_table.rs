//! Persisted `edge key -> slot pair` side table.
//!
//! The whole table lives as one JSON object under [`SLOT_TABLE_KEY`] and is
//! rewritten on every change. Entries that fail to parse are dropped with a
//! warning rather than poisoning the rest of the table.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

use meshsync_core::{EdgeKey, SlotPair};

use crate::error::StoreError;
use crate::traits::KeyValueStore;

/// Storage key shared with the browser dashboard.
pub const SLOT_TABLE_KEY: &str = "edgeHandles";

pub struct SlotTable<S> {
    store: S,
    entries: BTreeMap<String, SlotPair>,
}

impl<S: KeyValueStore> SlotTable<S> {
    /// Loads the table from `store`. A missing or unreadable value yields an
    /// empty table.
    pub fn load(store: S) -> Result<Self, StoreError> {
        let entries = match store.get(SLOT_TABLE_KEY)? {
            Some(raw) => parse_entries(&raw),
            None => BTreeMap::new(),
        };
        Ok(SlotTable { store, entries })
    }

    pub fn get(&self, key: &EdgeKey) -> Option<SlotPair> {
        self.entries.get(&key.to_string()).copied()
    }

    /// Stores `slots` for `key` and writes the table through.
    pub fn insert(&mut self, key: &EdgeKey, slots: SlotPair) -> Result<(), StoreError> {
        if self.entries.insert(key.to_string(), slots) == Some(slots) {
            return Ok(());
        }
        self.flush()
    }

    /// Drops the entry for `key`, writing through if it existed.
    pub fn remove(&mut self, key: &EdgeKey) -> Result<bool, StoreError> {
        if self.entries.remove(&key.to_string()).is_none() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Drops an entry by its persisted key string.
    pub(crate) fn remove_raw(&mut self, key: &str) -> Result<bool, StoreError> {
        if self.entries.remove(key).is_none() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SlotPair)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let json = serde_json::to_string(&self.entries)?;
        self.store.set(SLOT_TABLE_KEY, &json)
    }
}

fn parse_entries(raw: &str) -> BTreeMap<String, SlotPair> {
    let object: Map<String, Value> = match serde_json::from_str(raw) {
        Ok(object) => object,
        Err(e) => {
            warn!(error = %e, "persisted slot table is corrupt; starting empty");
            return BTreeMap::new();
        }
    };

    object
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(slots) => Some((key, slots)),
            Err(e) => {
                warn!(key = %key, error = %e, "dropping unreadable slot entry");
                None
            }
        })
        .collect()
}
