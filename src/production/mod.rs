//! Production implementations of traits

mod directory_lister;
mod json_catalog;
mod metadata_transformer;

pub use directory_lister::DirectoryLister;
pub use json_catalog::JsonDirCatalog;
pub use metadata_transformer::{guess_media_type, MetadataTransformer};
