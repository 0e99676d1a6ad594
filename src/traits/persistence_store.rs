//! Durable key/blob store trait

use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Codec error: {0}")]
    CodecError(String),
}

/// Trait for crash-durable key to blob storage
///
/// Keys are always derived by the caller, usually as a hash of a logical
/// name. Each write touches exactly one key.
///
/// Production: SQLite with WAL mode
/// Testing: In-memory map
#[cfg_attr(test, mockall::automock)]
pub trait PersistenceStore: Send + Sync {
    /// Insert or replace the blob stored under `key`
    fn store(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError>;

    /// Load the blob stored under `key`
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Remove `key`, returning whether it existed
    fn delete(&self, key: &str) -> Result<bool, PersistenceError>;

    /// All keys currently stored
    fn list_keys(&self) -> Result<BTreeSet<String>, PersistenceError>;
}
