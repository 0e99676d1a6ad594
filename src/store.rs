//! SQLite-backed persistence store with WAL for crash durability
//!
//! Several stores may share one database file; each is confined to its own
//! namespace, so a harvester's snapshots and every listener's correlation
//! map never see each other's keys.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::traits::{PersistenceError, PersistenceStore};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    namespace: String,
}

impl SqliteStore {
    /// Open or create a store database confined to `namespace`
    pub fn open(path: &Path, namespace: &str) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(db_error)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_error)?;

        Self::init_table(&conn)?;
        tracing::debug!(path = %path.display(), namespace = %namespace, "Opened persistence store");

        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(namespace: &str) -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::init_table(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn init_table(conn: &Connection) -> Result<(), PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS persisted_blob (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )
        .map_err(db_error)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|_| PersistenceError::DatabaseError("connection lock poisoned".to_string()))
    }
}

fn db_error(e: rusqlite::Error) -> PersistenceError {
    PersistenceError::DatabaseError(e.to_string())
}

impl PersistenceStore for SqliteStore {
    fn store(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO persisted_blob (namespace, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.namespace, key, blob, now],
        )
        .map_err(db_error)?;

        tracing::trace!(namespace = %self.namespace, key = %key, bytes = blob.len(), "Stored blob");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM persisted_blob WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)
    }

    fn delete(&self, key: &str) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "DELETE FROM persisted_blob WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
            )
            .map_err(db_error)?;
        Ok(rows > 0)
    }

    fn list_keys(&self) -> Result<BTreeSet<String>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM persisted_blob WHERE namespace = ?1")
            .map_err(db_error)?;
        let keys = stmt
            .query_map(params![self.namespace], |row| row.get::<_, String>(0))
            .map_err(db_error)?
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(db_error)?;
        Ok(keys)
    }
}
