//! The state store contract shared by the durable and in-memory backends

use thiserror::Error;

use super::models::{StateEntry, StateValue};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Unknown value type tag {tag:?} for key {key}")]
    CorruptEntry { key: String, tag: String },
    #[error("Incrementing {key} by {amount} overflows a 64-bit integer")]
    Overflow { key: String, amount: i64 },
    #[error("Database busy after {attempts} attempts")]
    Busy { attempts: u32 },
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create data directory: {0}")]
    CreateDir(std::io::Error),
    #[error("Lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Whether the caller may reasonably retry the whole operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StateError::Busy { .. })
    }
}

/// Iterator over the keys of a store
pub type KeyIter<'a> = Box<dyn Iterator<Item = Result<String, StateError>> + 'a>;

/// Key-value store with per-key provenance.
///
/// Implementations must make every single-key write atomic with respect to
/// other writers of the same store, including writers in other processes
/// for durable backends.
pub trait StateStore: Send + Sync {
    /// Current value for `key`, or `StateError::KeyNotFound`.
    fn get(&self, key: &str) -> Result<StateValue, StateError>;

    /// Whether `key` has an entry. The empty key is never contained.
    fn contains(&self, key: &str) -> Result<bool, StateError>;

    /// Create or replace `key`.
    ///
    /// When `author` is `None` an existing `updated_by` is kept.
    fn set(&self, key: &str, value: StateValue, author: Option<&str>) -> Result<(), StateError>;

    /// Add `amount` to the integer view of `key` in one atomic step and
    /// return the stored result.
    fn atomic_increment(
        &self,
        key: &str,
        amount: i64,
        author: Option<&str>,
    ) -> Result<i64, StateError>;

    /// Remove `key`, returning whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StateError>;

    fn clear(&self) -> Result<(), StateError>;

    fn len(&self) -> Result<usize, StateError>;

    fn is_empty(&self) -> Result<bool, StateError> {
        Ok(self.len()? == 0)
    }

    /// Lazily iterate over all keys. Each call starts a new listing.
    fn keys(&self) -> KeyIter<'_>;

    /// Full record for `key`, or `None` when absent.
    fn get_entry(&self, key: &str) -> Result<Option<StateEntry>, StateError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), StateError> {
    if key.is_empty() {
        return Err(StateError::InvalidKey(key.to_string()));
    }
    Ok(())
}
