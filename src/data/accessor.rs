//! Convenience wrappers used by session and project code.
//!
//! Every write goes through with a fixed author naming the calling
//! subsystem, so provenance in the store always says who wrote a value.

use super::models::{now_timestamp, StateEntry, StateValue};
use super::state::{StateError, StateStore};

/// Author recorded for writes made on behalf of a session
pub const SESSION_AUTHOR: &str = "session";
/// Author recorded for writes made on behalf of a project
pub const PROJECT_AUTHOR: &str = "project";

/// Borrowing view over a [`StateStore`] with a default author
#[derive(Clone, Copy)]
pub struct StateAccessor<'a> {
    store: &'a dyn StateStore,
    author: &'a str,
}

impl<'a> StateAccessor<'a> {
    pub fn new(store: &'a dyn StateStore, author: &'a str) -> Self {
        Self { store, author }
    }

    pub fn for_session(store: &'a dyn StateStore) -> Self {
        Self::new(store, SESSION_AUTHOR)
    }

    pub fn for_project(store: &'a dyn StateStore) -> Self {
        Self::new(store, PROJECT_AUTHOR)
    }

    pub fn author(&self) -> &str {
        self.author
    }

    pub fn store(&self) -> &'a dyn StateStore {
        self.store
    }

    /// Value for `key`, or `None` when absent
    pub fn get(&self, key: &str) -> Result<Option<StateValue>, StateError> {
        match self.store.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(StateError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_or(&self, key: &str, default: StateValue) -> Result<StateValue, StateError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn entry(&self, key: &str) -> Result<Option<StateEntry>, StateError> {
        self.store.get_entry(key)
    }

    pub fn set(&self, key: &str, value: impl Into<StateValue>) -> Result<(), StateError> {
        self.store.set(key, value.into(), Some(self.author))
    }

    /// Write with an explicit author instead of the default
    pub fn set_as(
        &self,
        key: &str,
        value: impl Into<StateValue>,
        author: &str,
    ) -> Result<(), StateError> {
        self.store.set(key, value.into(), Some(author))
    }

    pub fn increment(&self, key: &str, amount: i64) -> Result<i64, StateError> {
        self.store.atomic_increment(key, amount, Some(self.author))
    }

    /// Set `key` only if it has no entry. Returns whether a write happened.
    ///
    /// Not atomic across processes; two callers racing on a fresh key may
    /// both write, last one wins.
    pub fn set_if_absent(
        &self,
        key: &str,
        value: impl Into<StateValue>,
    ) -> Result<bool, StateError> {
        if self.store.contains(key)? {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }

    /// Store the current UTC time as ISO-8601 text and return it
    pub fn set_timestamp(&self, key: &str) -> Result<String, StateError> {
        let now = now_timestamp();
        self.set(key, now.clone())?;
        Ok(now)
    }

    /// Store the current time unless `key` already exists; returns the
    /// value now held by `key`
    pub fn set_timestamp_if_absent(&self, key: &str) -> Result<StateValue, StateError> {
        if let Some(existing) = self.get(key)? {
            return Ok(existing);
        }
        Ok(StateValue::Text(self.set_timestamp(key)?))
    }
}
