//! Transformer that describes a file by its metadata only

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::catalog::{Record, Transformer, TITLE};
use crate::resource::{HarvestedResource, ResourceContent};
use crate::traits::IngestError;

pub const CHECKSUM: &str = "checksum";
pub const CHECKSUM_ALGORITHM: &str = "checksum-algorithm";
pub const MEDIA_TYPE: &str = "media-type";

/// Guess a media type from a file extension
pub fn guess_media_type(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "geojson" => "application/geo+json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataTransformer;

impl MetadataTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transformer for MetadataTransformer {
    fn transform(
        &self,
        resource: &HarvestedResource,
        content: &ResourceContent,
        existing_id: Option<&str>,
    ) -> Result<Record, IngestError> {
        let name = if content.name.is_empty() {
            resource.name()
        } else {
            content.name.as_str()
        };

        let mut record = Record::new();
        record.id = existing_id.map(str::to_string);
        record.set_if_absent(TITLE, name);
        record.set(CHECKSUM, hex::encode(Sha256::digest(&content.bytes)));
        record.set(CHECKSUM_ALGORITHM, "SHA-256");
        let media_type = content
            .mime_type
            .clone()
            .unwrap_or_else(|| guess_media_type(name).to_string());
        record.set(MEDIA_TYPE, media_type);
        Ok(record)
    }
}
