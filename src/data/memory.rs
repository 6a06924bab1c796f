//! In-memory state store used to test consumers without touching disk

use std::collections::HashMap;

use parking_lot::Mutex;

use super::models::{now_timestamp, StateEntry, StateValue};
use super::state::{validate_key, KeyIter, StateError, StateStore};

#[derive(Default)]
struct Inner {
    entries: HashMap<String, StateEntry>,
    /// Insertion order, so iteration is stable within a run
    order: Vec<String>,
}

/// Non-persistent store with the same contract as the SQLite store
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(inner: &mut Inner, key: &str, value: StateValue, author: Option<&str>) {
        let now = now_timestamp();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                if now > entry.updated_at {
                    entry.updated_at = now;
                }
                if let Some(author) = author {
                    entry.updated_by = Some(author.to_string());
                }
            }
            None => {
                inner.entries.insert(
                    key.to_string(),
                    StateEntry {
                        key: key.to_string(),
                        value,
                        created_at: now.clone(),
                        created_by: author.map(str::to_string),
                        updated_at: now,
                        updated_by: author.map(str::to_string),
                    },
                );
                inner.order.push(key.to_string());
            }
        }
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<StateValue, StateError> {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| StateError::KeyNotFound(key.to_string()))
    }

    fn contains(&self, key: &str) -> Result<bool, StateError> {
        Ok(!key.is_empty() && self.inner.lock().entries.contains_key(key))
    }

    fn set(&self, key: &str, value: StateValue, author: Option<&str>) -> Result<(), StateError> {
        validate_key(key)?;
        let mut inner = self.inner.lock();
        Self::upsert(&mut inner, key, value, author);
        Ok(())
    }

    fn atomic_increment(
        &self,
        key: &str,
        amount: i64,
        author: Option<&str>,
    ) -> Result<i64, StateError> {
        validate_key(key)?;
        let mut inner = self.inner.lock();
        let base = inner
            .entries
            .get(key)
            .map(|entry| entry.value.increment_base())
            .unwrap_or(0);
        let next = base
            .checked_add(amount)
            .ok_or_else(|| StateError::Overflow {
                key: key.to_string(),
                amount,
            })?;
        Self::upsert(&mut inner, key, StateValue::Int(next), author);
        Ok(next)
    }

    fn delete(&self, key: &str) -> Result<bool, StateError> {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_none() {
            return Ok(false);
        }
        inner.order.retain(|k| k != key);
        Ok(true)
    }

    fn clear(&self) -> Result<(), StateError> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, StateError> {
        Ok(self.inner.lock().entries.len())
    }

    fn keys(&self) -> KeyIter<'_> {
        let snapshot = self.inner.lock().order.clone();
        Box::new(snapshot.into_iter().map(Ok))
    }

    fn get_entry(&self, key: &str) -> Result<Option<StateEntry>, StateError> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }
}
