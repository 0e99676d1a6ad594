//! Tree listing trait for walking a resource tree once per poll

use thiserror::Error;

use crate::resource::{ContentError, ResourceContent};
use crate::snapshot::ListingEntry;

#[derive(Debug, Clone, Error)]
pub enum ListerError {
    /// Transient: the tree could not be reached this time round.
    #[error("Root unreachable: {0}")]
    Unreachable(String),
    /// Fatal: the root does not exist, is not a container, or cannot be read.
    #[error("Invalid root [{root}]: {reason}")]
    InvalidRoot { root: String, reason: String },
}

/// Trait for producing one poll's view of a resource tree
///
/// Production: local directories via `walkdir`
/// Testing: `StaticTreeLister` with a scripted listing
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TreeLister: Send + Sync {
    /// Check that the root exists, is a container and is readable
    async fn check_root(&self, root: &str) -> Result<(), ListerError>;

    /// List every resource under the root with its change fingerprint
    async fn list(&self, root: &str) -> Result<Vec<ListingEntry>, ListerError>;

    /// Resolve a listed relative path to the resource's canonical location
    fn locate(&self, root: &str, path: &str) -> String;

    /// Read the bytes behind a location produced by [`TreeLister::locate`]
    async fn fetch(&self, location: &str) -> Result<ResourceContent, ContentError>;
}
