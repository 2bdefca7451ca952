//! SQLite connection handling.
//!
//! Uses a simple `Arc<Mutex<Connection>>` pattern. WAL mode allows concurrent
//! readers while the single writer (the campaign scheduler) holds the lock
//! for the duration of its transaction.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{SqliteError, SqliteResult};
use crate::schema;

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Thread-safe SQLite connection wrapper.
#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePool {
    /// Open (or create) a database file and apply pending migrations.
    pub fn open(path: &Path) -> SqliteResult<Self> {
        info!(path = %path.display(), "opening SQLite database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SqliteError::Connection(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
        }

        Self::init(Connection::open(path)?)
    }

    /// In-memory database, used by tests.
    pub fn memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        let pool = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        pool.with_connection(|conn| {
            configure_pragmas(conn)?;
            schema::apply_migrations(conn)
        })?;
        Ok(pool)
    }

    /// Execute a closure with the connection.
    pub fn with_connection<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Connection) -> T,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure with mutable access to the connection (required for
    /// transactions).
    pub fn with_connection_mut<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut Connection) -> T,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

fn configure_pragmas(conn: &Connection) -> SqliteResult<()> {
    debug!("configuring SQLite pragmas");

    // WAL for concurrent readers; NORMAL sync is safe with WAL.
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"))?;
    conn.execute_batch("PRAGMA temp_store = MEMORY;")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_pool_answers_queries() {
        let pool = SqlitePool::memory().expect("failed to create memory pool");

        let result: i64 = pool
            .with_connection(|conn| conn.query_row("SELECT 1 + 1", [], |row| row.get(0)))
            .expect("query failed");
        assert_eq!(result, 2);
    }

    #[test]
    fn file_pool_enables_wal() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::open(&dir.path().join("mast.db")).expect("failed to open pool");

        let mode: String = pool
            .with_connection(|conn| conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0)))
            .expect("query failed");
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn schema_is_applied() {
        let pool = SqlitePool::memory().expect("failed to create pool");

        let tables: Vec<String> = pool.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            let rows = stmt.query_map([], |row| row.get(0)).unwrap();
            rows.filter_map(Result::ok).collect()
        });

        for table in [
            "changesets",
            "changeset_stakeholders",
            "repositories",
            "commits",
            "commit_changesets",
            "pending_changes",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }
}
