//! SQLite database management

use regex::Regex;
use rusqlite::{Connection, ErrorCode, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use super::migrations;
use super::state::StateError;

/// Tunables for lock contention between processes sharing one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// How long SQLite itself waits on a locked file before reporting busy
    pub busy_timeout: Duration,
    /// Extra attempts after a busy/locked error
    pub max_retries: u32,
    /// First backoff delay, doubled on each retry
    pub retry_backoff: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_retries: 5,
            retry_backoff: Duration::from_millis(25),
        }
    }
}

/// Database connection wrapper
pub struct Database {
    conn: Mutex<Connection>,
    options: DatabaseOptions,
    /// Path to the database file
    pub path: PathBuf,
}

impl Database {
    /// Open or create a database at the specified path and bring `table`
    /// up to the current schema.
    pub fn open(path: &Path, table: &str, options: DatabaseOptions) -> Result<Self, StateError> {
        validate_identifier(table)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StateError::CreateDir)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(options.busy_timeout)?;

        // journal_mode returns a row, so it cannot go through execute_batch
        with_busy_retry(&options, || {
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
        })?;
        conn.execute_batch("PRAGMA synchronous = FULL;")?;

        with_busy_retry(&options, || migrations::run_migrations(&mut conn, table))?;

        tracing::debug!(path = %path.display(), table, "Opened state database");

        Ok(Self {
            conn: Mutex::new(conn),
            options,
            path: path.to_path_buf(),
        })
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Execute a read-only closure with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T, StateError>
    where
        F: FnMut(&Connection) -> rusqlite::Result<T>,
    {
        let mut f = f;
        let conn = self.conn.lock().map_err(|_| StateError::LockPoisoned)?;
        with_busy_retry(&self.options, || f(&conn))
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so a read inside `f` cannot be
    /// invalidated by another writer before `f` commits. Busy errors roll
    /// the whole transaction back and retry it.
    pub fn with_write<F, T>(&self, f: F) -> Result<T, StateError>
    where
        F: FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
    {
        let mut f = f;
        let mut conn = self.conn.lock().map_err(|_| StateError::LockPoisoned)?;
        with_busy_retry(&self.options, || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Retry `op` with exponential backoff while SQLite reports busy/locked.
pub(crate) fn with_busy_retry<T>(
    options: &DatabaseOptions,
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T, StateError> {
    let mut delay = options.retry_backoff;
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) => {
                if attempt >= options.max_retries {
                    tracing::warn!(attempts = attempt + 1, error = %err, "Giving up on busy database");
                    return Err(StateError::Busy {
                        attempts: attempt + 1,
                    });
                }
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Database busy, retrying");
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(err) => return Err(StateError::Sqlite(err)),
        }
    }
}

/// Reject anything that is not a plain SQL identifier.
///
/// Table names are interpolated into SQL text, so quotes, semicolons,
/// comment markers and backslashes must never get through.
pub fn validate_identifier(name: &str) -> Result<(), StateError> {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let re = IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
    });
    if re.is_match(name) && !name.to_ascii_lowercase().starts_with("sqlite_") {
        Ok(())
    } else {
        Err(StateError::InvalidIdentifier(name.to_string()))
    }
}
