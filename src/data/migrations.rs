//! Versioned schema migrations for state tables.
//!
//! One database file can hold several state tables, so every migration is
//! tracked per table in `schema_migrations`. Each migration runs exactly once
//! per table and migrations are applied in order by version number.
//! Migration SQL uses `{table}` as a placeholder for the (already validated)
//! table name.

use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::HashSet;

/// A database migration with a version number, name, and SQL to execute.
pub struct Migration {
    /// Unique version number (migrations run in order)
    pub version: i64,
    /// Human-readable name for the migration
    pub name: &'static str,
    /// SQL template to execute (can be multiple statements)
    pub sql: &'static str,
}

/// All migrations in order. New migrations should be added at the end.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_state_table",
    // `value` has no declared type so each row keeps the storage class it
    // was written with; `value_type` disambiguates bool from int.
    sql: r#"
            CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY NOT NULL,
                value,
                value_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                created_by TEXT,
                updated_at TEXT NOT NULL,
                updated_by TEXT
            );
        "#,
}];

fn render(migration: &Migration, table: &str) -> String {
    migration.sql.replace("{table}", table)
}

/// Create the schema_migrations table if it doesn't exist.
fn ensure_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            table_name TEXT NOT NULL,
            version INTEGER NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            PRIMARY KEY (table_name, version)
        );
        "#,
    )
}

/// Get the set of already-applied migration versions for `table`.
pub fn get_applied_versions(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations WHERE table_name = ?1")?;
    let versions = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<i64>>>()?;
    Ok(versions)
}

/// Check if a table exists.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

/// Check if a column exists in a table.
fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

/// Whether the effect of `migration` is already present for `table`.
///
/// Lets a file whose state table was created outside the migration system
/// (same layout, no bookkeeping rows) be adopted without re-running DDL.
fn already_present(conn: &Connection, migration: &Migration, table: &str) -> rusqlite::Result<bool> {
    match migration.version {
        1 => Ok(table_exists(conn, table)? && column_exists(conn, table, "value_type")?),
        _ => Ok(false),
    }
}

/// Run all pending migrations for `table`.
///
/// Everything happens inside one `BEGIN IMMEDIATE` transaction so that
/// processes opening the same fresh file at the same time serialise here
/// instead of racing on the DDL.
pub fn run_migrations(conn: &mut Connection, table: &str) -> rusqlite::Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_migrations_table(&tx)?;

    let applied = get_applied_versions(&tx, table)?;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        let now = chrono::Utc::now().to_rfc3339();
        if already_present(&tx, migration, table)? {
            tracing::info!(
                table,
                version = migration.version,
                name = migration.name,
                "Adopting existing schema into migration system"
            );
        } else {
            tracing::info!(
                table,
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            if let Err(e) = tx.execute_batch(&render(migration, table)) {
                tracing::error!(
                    table,
                    version = migration.version,
                    name = migration.name,
                    error = %e,
                    "Migration failed"
                );
                return Err(e);
            }
        }

        tx.execute(
            "INSERT INTO schema_migrations (table_name, version, name, applied_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![table, migration.version, migration.name, now],
        )?;
    }

    tx.commit()
}
