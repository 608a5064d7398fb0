//! Convenient re-exports of commonly used types from docgraph.
//!
//! ```ignore
//! use docgraph::prelude::*;
//! ```

pub use docgraph_core::{
    backend::{InsertOneResult, ReplaceOneResult, StoreBackend, StoreBackendBuilder},
    decode::from_external_view,
    entity::{Entity, EntityRef, FieldValue, Identified, Schema, ToFieldValue},
    error::{DocumentStoreError, DocumentStoreResult},
    repository::Repository,
    serializer::{GraphSerializer, Projection, to_external_view},
    store::{DocumentStore, DynDocumentStore, IntoDynDocumentStore},
    value::{ExternalDateTime, StoreDateTime},
};
pub use docgraph_macros::Entity;
