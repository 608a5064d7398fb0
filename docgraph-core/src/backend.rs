//! Document store client abstraction.
//!
//! Repositories never talk to a database directly. Everything they need from a store is
//! captured by [`StoreBackend`]: look up one document, list documents, insert one document
//! and replace one document. Filters and options are plain BSON documents passed through
//! unmodified, so their vocabulary is whatever the concrete store understands.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The client contract implemented by every backend
//! - [`DynStoreBackend`]: An object-safe mirror used for runtime backend selection
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Example
//!
//! ```ignore
//! use docgraph::backend::StoreBackend;
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! let inserted = backend.insert_one(doc! { "name": "Alice" }, "users").await?;
//! let found = backend.find_one(doc! { "_id": inserted.inserted_id }, "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::error::DocumentStoreResult;

/// Outcome of [`StoreBackend::insert_one`].
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// Identity the store assigned to, or accepted for, the new document.
    pub inserted_id: Bson,
}

/// Outcome of [`StoreBackend::replace_one`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaceOneResult {
    /// Number of documents the filter matched, at most one.
    pub matched_count: u64,
    /// Number of documents actually changed.
    pub modified_count: u64,
}

/// Abstract interface for document store clients.
///
/// # Thread Safety
///
/// Implementations must be thread-safe. The concurrency model is implementation-specific.
///
/// # Error Handling
///
/// Transient failures (network, unavailability) are reported as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend). Callers in
/// this crate never retry them.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the first document matching `filter`, if any.
    async fn find_one(
        &self,
        filter: Document,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Returns every document matching `filter`.
    ///
    /// `options` carries store-specific modifiers such as `sort`, `skip` and `limit`.
    async fn find(
        &self,
        filter: Document,
        options: Document,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Inserts a new document and reports the identity it was stored under.
    ///
    /// A document without an `_id` gets one assigned by the store.
    async fn insert_one(
        &self,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<InsertOneResult>;

    /// Replaces the first document matching `filter` with `document`.
    async fn replace_one(
        &self,
        filter: Document,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<ReplaceOneResult>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Object-safe counterpart of [`StoreBackend`], implemented for every sized backend.
///
/// Its methods share their names with [`StoreBackend`]'s, so keep only one of the two
/// traits in scope when calling a concrete backend.
#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    async fn find_one(
        &self,
        filter: Document,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>>;
    async fn find(
        &self,
        filter: Document,
        options: Document,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;
    async fn insert_one(
        &self,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<InsertOneResult>;
    async fn replace_one(
        &self,
        filter: Document,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<ReplaceOneResult>;
    /// [`StoreBackend::shutdown`] for a boxed backend.
    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()>;
}

#[async_trait]
impl<B: StoreBackend + 'static> DynStoreBackend for B {
    async fn find_one(
        &self,
        filter: Document,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        StoreBackend::find_one(self, filter, collection).await
    }

    async fn find(
        &self,
        filter: Document,
        options: Document,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        StoreBackend::find(self, filter, options, collection).await
    }

    async fn insert_one(
        &self,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<InsertOneResult> {
        StoreBackend::insert_one(self, document, collection).await
    }

    async fn replace_one(
        &self,
        filter: Document,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<ReplaceOneResult> {
        StoreBackend::replace_one(self, filter, document, collection).await
    }

    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()> {
        StoreBackend::shutdown(*self).await
    }
}

#[async_trait]
impl StoreBackend for Box<dyn DynStoreBackend> {
    async fn find_one(
        &self,
        filter: Document,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        DynStoreBackend::find_one(&**self, filter, collection).await
    }

    async fn find(
        &self,
        filter: Document,
        options: Document,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        DynStoreBackend::find(&**self, filter, options, collection).await
    }

    async fn insert_one(
        &self,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<InsertOneResult> {
        DynStoreBackend::insert_one(&**self, document, collection).await
    }

    async fn replace_one(
        &self,
        filter: Document,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<ReplaceOneResult> {
        DynStoreBackend::replace_one(&**self, filter, document, collection).await
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        <dyn DynStoreBackend as DynStoreBackend>::shutdown_boxed(self).await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
