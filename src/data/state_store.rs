//! Durable state store backed by SQLite

use rusqlite::types::{FromSqlError, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, OptionalExtension, Row, ToSql};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::database::{Database, DatabaseOptions};
use super::models::{now_timestamp, StateEntry, StateValue, ValueType};
use super::state::{validate_key, KeyIter, StateError, StateStore};

/// Default table name for a state file
pub const DEFAULT_TABLE: &str = "state";

/// Number of keys fetched per round trip while iterating
const KEY_PAGE_SIZE: usize = 256;

/// Options for opening a [`SqliteStateStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Table holding the entries. Must be a plain SQL identifier.
    pub table: String,
    pub database: DatabaseOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            database: DatabaseOptions::default(),
        }
    }
}

/// State store persisted in a single SQLite file.
///
/// Any number of processes may open the same file. Writes run in
/// `BEGIN IMMEDIATE` transactions and are durable once the call returns.
#[derive(Debug)]
pub struct SqliteStateStore {
    db: Database,
    table: String,
}

impl SqliteStateStore {
    /// Open or create a store at `path` using the default table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        Self::open_with_options(path, StoreOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: StoreOptions,
    ) -> Result<Self, StateError> {
        let db = Database::open(path.as_ref(), &options.table, options.database)?;
        Ok(Self {
            db,
            table: options.table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db.path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn select_entry_sql(&self) -> String {
        format!(
            "SELECT key, value, value_type, created_at, created_by, updated_at, updated_by
             FROM {} WHERE key = ?1",
            self.table
        )
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {t} (key, value, value_type, created_at, created_by, updated_at, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 value_type = excluded.value_type,
                 updated_at = MAX(updated_at, excluded.updated_at),
                 updated_by = COALESCE(excluded.updated_by, updated_by)",
            t = self.table
        )
    }

    /// Read-modify-write in one statement: the existing row is coerced to
    /// an integer inside the engine, so there is no window between the read
    /// and the write for another process to slip into.
    fn increment_sql(&self) -> String {
        format!(
            "INSERT INTO {t} (key, value, value_type, created_at, created_by, updated_at, updated_by)
             VALUES (?1, ?2, 'int', ?3, ?4, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 value = (CASE value_type
                              WHEN 'int' THEN COALESCE(CAST(value AS INTEGER), 0)
                              WHEN 'bool' THEN COALESCE(CAST(value AS INTEGER), 0)
                              WHEN 'float' THEN COALESCE(CAST(value AS INTEGER), 0)
                              ELSE 0
                          END) + excluded.value,
                 value_type = 'int',
                 updated_at = MAX(updated_at, excluded.updated_at),
                 updated_by = COALESCE(excluded.updated_by, updated_by)
             RETURNING value",
            t = self.table
        )
    }

    /// Keys strictly after `after`, in byte order, at most `limit` of them
    fn key_page(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StateError> {
        let sql = format!(
            "SELECT key FROM {} WHERE (?1 IS NULL OR key > ?1) ORDER BY key LIMIT ?2",
            self.table
        );
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let keys = stmt
                .query_map(params![after, limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> Result<StateValue, StateError> {
        self.get_entry(key)?
            .map(|entry| entry.value)
            .ok_or_else(|| StateError::KeyNotFound(key.to_string()))
    }

    fn contains(&self, key: &str) -> Result<bool, StateError> {
        if key.is_empty() {
            return Ok(false);
        }
        let sql = format!("SELECT 1 FROM {} WHERE key = ?1", self.table);
        self.db.with_connection(|conn| {
            conn.query_row(&sql, [key], |_| Ok(()))
                .optional()
                .map(|found| found.is_some())
        })
    }

    fn set(&self, key: &str, value: StateValue, author: Option<&str>) -> Result<(), StateError> {
        validate_key(key)?;
        let sql = self.upsert_sql();
        let now = now_timestamp();
        let tag = value.value_type().as_str();
        self.db.with_write(|tx| {
            tx.execute(&sql, params![key, value, tag, now, author])?;
            Ok(())
        })
    }

    fn atomic_increment(
        &self,
        key: &str,
        amount: i64,
        author: Option<&str>,
    ) -> Result<i64, StateError> {
        validate_key(key)?;
        let sql = self.increment_sql();
        let now = now_timestamp();
        let result = self.db.with_write(|tx| {
            tx.query_row(&sql, params![key, amount, now, author], |row| {
                match row.get_ref(0)? {
                    ValueRef::Integer(n) => Ok(n),
                    // SQLite promotes an overflowing sum to REAL; failing
                    // here rolls the upsert back
                    ValueRef::Real(_) => Err(rusqlite::Error::IntegralValueOutOfRange(0, amount)),
                    other => Err(rusqlite::Error::FromSqlConversionFailure(
                        0,
                        other.data_type(),
                        Box::new(FromSqlError::InvalidType),
                    )),
                }
            })
        });
        let value = match result {
            Err(StateError::Sqlite(rusqlite::Error::IntegralValueOutOfRange(..))) => {
                return Err(StateError::Overflow {
                    key: key.to_string(),
                    amount,
                });
            }
            other => other?,
        };
        tracing::trace!(key, amount, value, "Incremented state counter");
        Ok(value)
    }

    fn delete(&self, key: &str) -> Result<bool, StateError> {
        let sql = format!("DELETE FROM {} WHERE key = ?1", self.table);
        self.db
            .with_write(|tx| tx.execute(&sql, [key]).map(|changed| changed > 0))
    }

    fn clear(&self) -> Result<(), StateError> {
        let sql = format!("DELETE FROM {}", self.table);
        let removed = self.db.with_write(|tx| tx.execute(&sql, []))?;
        tracing::debug!(table = %self.table, removed, "Cleared state table");
        Ok(())
    }

    fn len(&self) -> Result<usize, StateError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        self.db.with_connection(|conn| {
            conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }

    fn keys(&self) -> KeyIter<'_> {
        Box::new(KeyPager {
            store: self,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    fn get_entry(&self, key: &str) -> Result<Option<StateEntry>, StateError> {
        let sql = self.select_entry_sql();
        let raw = self.db.with_connection(|conn| {
            conn.query_row(&sql, [key], RawEntry::from_row).optional()
        })?;
        raw.map(RawEntry::into_entry).transpose()
    }
}

/// Keyset-paginated key listing; each page is a separate short read so no
/// read transaction stays open while the caller consumes keys.
struct KeyPager<'a> {
    store: &'a SqliteStateStore,
    after: Option<String>,
    buffer: VecDeque<String>,
    exhausted: bool,
}

impl Iterator for KeyPager<'_> {
    type Item = Result<String, StateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.key_page(self.after.as_deref(), KEY_PAGE_SIZE) {
                Ok(page) => {
                    self.exhausted = page.len() < KEY_PAGE_SIZE;
                    self.after = page.last().cloned();
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Row as read from SQLite, before the type tag is checked
struct RawEntry {
    key: String,
    value: Option<StateValue>,
    tag: String,
    created_at: String,
    created_by: Option<String>,
    updated_at: String,
    updated_by: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tag: String = row.get(2)?;
        let raw = row.get_ref(1)?;
        let value = decode_value(&tag, raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, raw.data_type(), Box::new(e))
        })?;
        Ok(Self {
            key: row.get(0)?,
            value,
            tag,
            created_at: row.get(3)?,
            created_by: row.get(4)?,
            updated_at: row.get(5)?,
            updated_by: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<StateEntry, StateError> {
        let Some(value) = self.value else {
            return Err(StateError::CorruptEntry {
                key: self.key,
                tag: self.tag,
            });
        };
        Ok(StateEntry {
            key: self.key,
            value,
            created_at: self.created_at,
            created_by: self.created_by,
            updated_at: self.updated_at,
            updated_by: self.updated_by,
        })
    }
}

/// Decode the `value` column according to its tag. `Ok(None)` means the
/// tag itself is unknown.
fn decode_value(tag: &str, raw: ValueRef<'_>) -> Result<Option<StateValue>, FromSqlError> {
    let Some(value_type) = ValueType::parse(tag) else {
        return Ok(None);
    };
    let value = match (value_type, raw) {
        (ValueType::Null, _) => StateValue::Null,
        (ValueType::Bool, raw) => StateValue::Bool(raw.as_i64()? != 0),
        (ValueType::Int, raw) => StateValue::Int(raw.as_i64()?),
        // SQLite stores NaN as NULL
        (ValueType::Float, ValueRef::Null) => StateValue::Float(f64::NAN),
        (ValueType::Float, ValueRef::Integer(i)) => StateValue::Float(i as f64),
        (ValueType::Float, raw) => StateValue::Float(raw.as_f64()?),
        (ValueType::Text, ValueRef::Null) => StateValue::Text(String::new()),
        (ValueType::Text, raw) => StateValue::Text(raw.as_str()?.to_string()),
        (ValueType::Bytes, ValueRef::Null) => StateValue::Bytes(Vec::new()),
        (ValueType::Bytes, raw) => StateValue::Bytes(raw.as_blob()?.to_vec()),
    };
    Ok(Some(value))
}

impl ToSql for StateValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            StateValue::Null => ToSqlOutput::Owned(Value::Null),
            StateValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            StateValue::Int(n) => ToSqlOutput::Owned(Value::Integer(*n)),
            StateValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            StateValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            StateValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Default store file for a project: one database per project under the
/// data directory, kept outside both repositories so checkpoints never
/// pick up live database files.
pub fn default_store_path(data_dir: &Path, project_dir: &Path) -> PathBuf {
    let slug: String = project_dir
        .to_string_lossy()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    data_dir.join("state").join(format!("{slug}.db"))
}
