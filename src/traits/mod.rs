//! Trait definitions for dependency injection
//!
//! Every collaborator the harvest engine talks to sits behind one of these
//! traits so tests can swap in the in-memory doubles from [`crate::mocks`].

mod adapter;
mod listener;
mod persistence_store;
mod tree_lister;

pub use adapter::{Adapter, IngestError};
pub use listener::{Listener, ListenerError};
pub use persistence_store::{PersistenceError, PersistenceStore};
pub use tree_lister::{ListerError, TreeLister};

#[cfg(test)]
pub use adapter::MockAdapter;
#[cfg(test)]
pub use persistence_store::MockPersistenceStore;
#[cfg(test)]
pub use tree_lister::MockTreeLister;
