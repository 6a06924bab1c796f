//! Data persistence layer for Trellis
//!
//! Key-value state with per-key provenance, behind one [`StateStore`] trait
//! with a SQLite-backed durable store and an in-memory store for tests.

mod accessor;
mod database;
mod memory;
mod migrations;
mod models;
mod state;
mod state_store;

pub use accessor::{StateAccessor, PROJECT_AUTHOR, SESSION_AUTHOR};
pub use database::{validate_identifier, Database, DatabaseOptions};
pub use memory::MemoryStateStore;
pub use models::{now_timestamp, StateEntry, StateValue, ValueType};
pub use state::{KeyIter, StateError, StateStore};
pub use state_store::{default_store_path, SqliteStateStore, StoreOptions, DEFAULT_TABLE};
