//! Main document store interface.
//!
//! A [`DocumentStore`] owns a store client and hands out [`Repository`] views over it.
//!
//! - [`DocumentStore`] - Store bound to a specific backend implementation
//! - [`DynDocumentStore`] - Store over a boxed backend, for runtime backend selection
//!
//! # Example
//!
//! ```ignore
//! use docgraph::store::DocumentStore;
//!
//! let store = DocumentStore::new(backend);
//! let notes = store.repository::<Note>();
//! ```

use crate::{
    backend::{DynStoreBackend, StoreBackend},
    entity::Entity,
    error::DocumentStoreResult,
    repository::Repository,
};

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

/// A document store whose backend is chosen at runtime.
pub type DynDocumentStore = DocumentStore<Box<dyn DynStoreBackend>>;

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying store client.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets the repository for an entity type.
    ///
    /// The collection name is determined by the entity type's `collection_name()` method.
    pub fn repository<'a, E: Entity>(&'a self) -> Repository<'a, B, E> {
        Repository::new(E::collection_name().to_string(), &self.backend)
    }

    /// Gets a repository for an entity type stored in the named collection.
    pub fn repository_in<'a, E: Entity>(&'a self, name: &str) -> Repository<'a, B, E> {
        Repository::new(name.to_string(), &self.backend)
    }

    /// Shuts down the store and releases backend resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown operation fails.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await?;

        Ok(())
    }
}

/// Conversion of a document store into a [`DynDocumentStore`].
pub trait IntoDynDocumentStore {
    fn into_dyn(self) -> DynDocumentStore;
}

impl<B: StoreBackend + 'static> IntoDynDocumentStore for DocumentStore<B> {
    fn into_dyn(self) -> DynDocumentStore {
        DocumentStore::new(Box::new(self.backend))
    }
}
