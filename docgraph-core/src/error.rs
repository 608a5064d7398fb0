//! Error types and result types for mapping and persistence operations.
//!
//! Everything fallible in the crate returns [`DocumentStoreResult<T>`]. Mapping errors
//! (unconvertible values, merge shape conflicts, undecodable stored values, binding
//! failures) describe programmer-visible invariant violations and are never retried.
//! Errors raised by a store client are wrapped in [`DocumentStoreError::Backend`] and
//! passed through unchanged in meaning.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while mapping or persisting entities.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The document has an invalid structure for the requested operation.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An identity string could not be converted to a store identity.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
    /// A temporal value could not be constructed from its input.
    #[error("Temporal value error: {0}")]
    Temporal(String),
    /// A field holds a value the graph serializer cannot convert.
    #[error("Cannot convert {field} = {value} to a document value")]
    UnconvertibleValue {
        /// Path of the offending field.
        field: String,
        /// Rendering of the offending value.
        value: String,
    },
    /// The stored and incoming documents disagree on the shape of a key.
    #[error("Cannot merge {key}: stored value {old} and incoming value {new} have incompatible shapes")]
    MergeShapeConflict {
        /// Path of the conflicting key.
        key: String,
        /// Rendering of the stored value.
        old: String,
        /// Rendering of the incoming value.
        new: String,
    },
    /// A stored document contains a value the decoder cannot classify.
    #[error("Value wasn't converted: {key} = {value}")]
    DecodeShape {
        /// Path of the offending key.
        key: String,
        /// Rendering of the offending value.
        value: String,
    },
    /// The decoded tree could not be bound onto the target entity.
    #[error("Binding error: {0}")]
    Binding(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for mapping and persistence operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
