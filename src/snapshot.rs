//! Versioned snapshot of one poll's view of a resource tree
//!
//! A snapshot is a path → fingerprint table. It is persisted as a single
//! JSON blob carrying a format version so a future layout change can be
//! detected instead of silently misread.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current on-disk snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Unsupported snapshot version {found} (expected {SNAPSHOT_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("Snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Cheap, comparable summary of a resource used to detect change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch
    pub modified_ms: i64,
}

impl Fingerprint {
    pub fn new(size: u64, modified_ms: i64) -> Self {
        Self { size, modified_ms }
    }
}

/// One entry of a raw tree listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    /// Path relative to the harvested root, `/`-separated
    pub path: String,
    pub fingerprint: Fingerprint,
}

impl ListingEntry {
    pub fn new(path: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.into(),
            fingerprint,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    entries: BTreeMap<String, Fingerprint>,
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Immutable path → fingerprint table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    entries: BTreeMap<String, Fingerprint>,
}

impl TreeSnapshot {
    /// Build a snapshot from a listing. A path listed twice keeps its last fingerprint.
    pub fn from_listing(listing: impl IntoIterator<Item = ListingEntry>) -> Self {
        let entries = listing
            .into_iter()
            .map(|entry| (entry.path, entry.fingerprint))
            .collect();
        Self { entries }
    }

    pub fn get(&self, path: &str) -> Option<&Fingerprint> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths in ascending order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let envelope = Envelope {
            version: SNAPSHOT_VERSION,
            entries: self.entries.clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let probe: VersionProbe = serde_json::from_slice(bytes)?;
        if probe.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: probe.version,
            });
        }
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        Ok(Self {
            entries: envelope.entries,
        })
    }
}
