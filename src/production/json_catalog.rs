//! File-per-record JSON catalog
//!
//! Each record lives at `<dir>/<uuid>.json`. Writes go to a temp file first
//! and are renamed into place, so a crash never leaves a half-written record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::catalog::{Catalog, Record};
use crate::traits::IngestError;

pub struct JsonDirCatalog {
    dir: PathBuf,
}

fn storage_error(e: impl std::fmt::Display) -> IngestError {
    IngestError::Storage(e.to_string())
}

impl JsonDirCatalog {
    /// Open a catalog directory, creating it if needed
    pub fn open(dir: &Path) -> Result<Self, IngestError> {
        std::fs::create_dir_all(dir).map_err(storage_error)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Only ids this catalog issued map to a file
    fn record_path(&self, id: &str) -> Result<PathBuf, IngestError> {
        let uuid = Uuid::parse_str(id)
            .map_err(|_| IngestError::Rejected(format!("unknown record id {}", id)))?;
        Ok(self.dir.join(format!("{}.json", uuid.hyphenated())))
    }

    async fn write(&self, path: &Path, record: &Record) -> Result<(), IngestError> {
        let json = serde_json::to_vec_pretty(record).map_err(storage_error)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(storage_error)?;
        tokio::fs::rename(&tmp, path).await.map_err(storage_error)
    }

    /// Read a record back
    pub async fn get(&self, id: &str) -> Result<Option<Record>, IngestError> {
        let path = self.record_path(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(storage_error),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(e)),
        }
    }

    /// Ids of every stored record, sorted
    pub async fn ids(&self) -> Result<Vec<String>, IngestError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(storage_error)?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(storage_error)? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait::async_trait]
impl Catalog for JsonDirCatalog {
    async fn create(&self, mut record: Record) -> Result<String, IngestError> {
        let id = Uuid::new_v4().to_string();
        record.id = Some(id.clone());
        self.write(&self.record_path(&id)?, &record).await?;
        tracing::debug!(id = %id, dir = %self.dir.display(), "Catalog record created");
        Ok(id)
    }

    async fn update(&self, id: &str, mut record: Record) -> Result<String, IngestError> {
        let path = self.record_path(id)?;
        if !tokio::fs::try_exists(&path).await.map_err(storage_error)? {
            return Err(IngestError::Rejected(format!("no record {}", id)));
        }
        record.id = Some(id.to_string());
        self.write(&path, &record).await?;
        tracing::debug!(id = %id, "Catalog record updated");
        Ok(id.to_string())
    }

    async fn delete(&self, id: &str) -> Result<(), IngestError> {
        let path = self.record_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(id = %id, "Catalog record deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(IngestError::Rejected(format!("no record {}", id)))
            }
            Err(e) => Err(storage_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(title: &str) -> Record {
        let mut record = Record::new();
        record.set("title", title);
        record
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonDirCatalog::open(&dir.path().join("catalog")).unwrap();

        let id = catalog.create(record("first")).await.unwrap();
        let stored = catalog.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.id.as_deref(), Some(id.as_str()));
        assert_eq!(stored.get("title").unwrap(), "first");

        let same = catalog.update(&id, record("second")).await.unwrap();
        assert_eq!(same, id);
        assert_eq!(catalog.get(&id).await.unwrap().unwrap().get("title").unwrap(), "second");
        assert_eq!(catalog.ids().await.unwrap(), vec![id.clone()]);

        catalog.delete(&id).await.unwrap();
        assert!(catalog.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_records_are_rejected() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonDirCatalog::open(dir.path()).unwrap();
        let unknown = Uuid::new_v4().to_string();

        assert!(matches!(catalog.delete(&unknown).await, Err(IngestError::Rejected(_))));
        assert!(matches!(
            catalog.update(&unknown, record("x")).await,
            Err(IngestError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_foreign_ids_never_touch_the_filesystem() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonDirCatalog::open(dir.path()).unwrap();

        assert!(matches!(
            catalog.delete("../../etc/passwd").await,
            Err(IngestError::Rejected(_))
        ));
    }
}
