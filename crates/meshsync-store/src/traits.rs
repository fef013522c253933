//! The [`KeyValueStore`] trait: string keys to string values, the same
//! contract a browser's local storage offers.
//!
//! All backends implement this trait so the slot table does not care where
//! its JSON lands. The trait is synchronous; every call is a single small
//! read or write issued from the session's event loop.

use crate::error::StoreError;

pub trait KeyValueStore {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes `key`. Returns whether it was present.
    fn remove(&mut self, key: &str) -> Result<bool, StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        (**self).remove(key)
    }
}
