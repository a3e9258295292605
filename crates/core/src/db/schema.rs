//! Starter schema for freshly created branch databases.
//!
//! Migrations are plain SQL applied in order, tracked through the SQLite
//! `user_version` pragma.

use rusqlite::Connection;
use tracing::debug;

use crate::errors::DatabaseError;

/// Table holding Branchlore's own bookkeeping inside each database.
pub const METADATA_TABLE: &str = "_branchlore_metadata";

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "starter schema",
    r#"
    CREATE TABLE IF NOT EXISTS demo (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        msg         TEXT NOT NULL,
        created_at  DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS _branchlore_metadata (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    INSERT OR IGNORE INTO _branchlore_metadata (key, value)
    VALUES ('schema_version', '1.0');
    "#,
)];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            debug!(version, description, "applying migration");
            conn.execute_batch(sql)?;
            set_schema_version(conn, version)?;
        }
    }
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
