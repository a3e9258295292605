//! SQLite access to a single branch's database file.
//!
//! A [`BranchDatabase`] wraps one `rusqlite` connection behind a `Mutex` so
//! it can be shared through an `Arc` (see [`crate::cache::BranchCache`]).
//! The default rollback journal is used rather than WAL, so the database
//! file alone is a complete snapshot whenever no statement is running. That
//! is what gets committed to the branch.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::DatabaseError;
use crate::telemetry;

/// Result of running one SQL statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum QueryOutcome {
    /// The statement produced a result set.
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        count: usize,
    },
    /// The statement modified data or schema.
    Modified {
        rows_affected: usize,
        last_insert_id: i64,
    },
}

/// Handle to one branch's SQLite file.
pub struct BranchDatabase {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl BranchDatabase {
    /// Open the database at `path`, creating it with the starter schema if
    /// the file does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let fresh = !path.exists();
        debug!(path = %path.display(), fresh, "opening branch database");
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        if fresh {
            schema::run_migrations(&conn)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Obtain a lock on the underlying connection, recovering from poison.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run a single SQL statement.
    pub fn execute(&self, sql: &str) -> Result<QueryOutcome, DatabaseError> {
        let started = Instant::now();
        let outcome = self.run_statement(sql);
        telemetry::record_query(started, outcome.is_ok());
        outcome
    }

    fn run_statement(&self, sql: &str) -> Result<QueryOutcome, DatabaseError> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(DatabaseError::EmptyStatement);
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;

        if stmt.column_count() == 0 {
            let rows_affected = stmt.execute([])?;
            return Ok(QueryOutcome::Modified {
                rows_affected,
                last_insert_id: conn.last_insert_rowid(),
            });
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(json_value(row.get_ref(i)?));
            }
            rows.push(values);
        }
        let count = rows.len();
        Ok(QueryOutcome::Rows {
            columns,
            rows,
            count,
        })
    }

    /// User tables, sorted by name, excluding SQLite internals.
    pub fn tables(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tables)
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
