//! Local directory tree lister

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::resource::{ContentError, ResourceContent};
use crate::snapshot::{Fingerprint, ListingEntry};
use crate::traits::{ListerError, TreeLister};

const FILE_SCHEME: &str = "file://";

/// Lists regular files under a local directory, recursively
#[derive(Debug, Clone, Default)]
pub struct DirectoryLister;

impl DirectoryLister {
    pub fn new() -> Self {
        Self
    }
}

/// Accept either a plain path or a `file://` URI as root
fn root_path(root: &str) -> PathBuf {
    PathBuf::from(root.strip_prefix(FILE_SCHEME).unwrap_or(root))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

fn vanished(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::NotFound
}

/// Any unreadable entry fails the whole scan: a partial listing would turn
/// the missing paths into deletions. Entries that vanish mid-walk are simply
/// gone.
fn scan(root: &Path) -> Result<Vec<ListingEntry>, ListerError> {
    if !root.is_dir() {
        return Err(ListerError::Unreachable(format!("{} is not available", root.display())));
    }

    let mut listing = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() > 0 && e.io_error().is_some_and(vanished) => {
                tracing::debug!(root = %root.display(), error = %e, "Entry vanished during scan");
                continue;
            }
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Unreadable entry, abandoning scan");
                return Err(ListerError::Unreachable(e.to_string()));
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.io_error().is_some_and(vanished) => continue,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Unreadable metadata, abandoning scan");
                return Err(ListerError::Unreachable(e.to_string()));
            }
        };
        let Some(path) = relative_path(root, entry.path()) else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 path");
            continue;
        };
        let modified_ms = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or(0);

        listing.push(ListingEntry::new(path, Fingerprint::new(metadata.len(), modified_ms)));
    }
    Ok(listing)
}

#[async_trait::async_trait]
impl TreeLister for DirectoryLister {
    async fn check_root(&self, root: &str) -> Result<(), ListerError> {
        let path = root_path(root);
        let invalid = |reason: &str| ListerError::InvalidRoot {
            root: root.to_string(),
            reason: reason.to_string(),
        };

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| invalid("does not exist"))?;
        if !metadata.is_dir() {
            return Err(invalid("is not a directory"));
        }
        let _entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|_| invalid("is not readable"))?;
        Ok(())
    }

    async fn list(&self, root: &str) -> Result<Vec<ListingEntry>, ListerError> {
        let path = root_path(root);
        tokio::task::spawn_blocking(move || scan(&path))
            .await
            .map_err(|e| ListerError::Unreachable(format!("scan task failed: {}", e)))?
    }

    fn locate(&self, root: &str, path: &str) -> String {
        let root = root_path(root);
        let absolute = std::path::absolute(&root).unwrap_or(root);
        let absolute = absolute.to_string_lossy();
        format!("{}{}/{}", FILE_SCHEME, absolute.trim_end_matches('/'), path)
    }

    async fn fetch(&self, location: &str) -> Result<ResourceContent, ContentError> {
        let path = location
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| ContentError::ReadFailed {
                location: location.to_string(),
                reason: "not a file location".to_string(),
            })?;

        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let name = path.rsplit('/').next().unwrap_or(path);
                Ok(ResourceContent::new(name, bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(location = %location, "File was deleted before it could be read");
                Err(ContentError::Unavailable(location.to_string()))
            }
            Err(e) => Err(ContentError::ReadFailed {
                location: location.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
