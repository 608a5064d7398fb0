//! Deep merge of a stored document with its freshly serialized replacement.
//!
//! The merge walks the union of both key sets. Keys of the stored document keep their
//! order and keys only present in the incoming document are appended in incoming order.
//! A key missing on one side is treated as null on that side. Per key:
//!
//! | stored   | incoming | result            |
//! |----------|----------|-------------------|
//! | null     | null     | null              |
//! | null     | any      | incoming          |
//! | any      | null     | stored            |
//! | scalar   | scalar   | incoming          |
//! | document | document | recursive merge   |
//! | array    | array    | incoming          |
//!
//! Every other pairing is a [`DocumentStoreError::MergeShapeConflict`].

use bson::{Bson, Document};
use tracing::trace;

use crate::error::{DocumentStoreError, DocumentStoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Null,
    Scalar,
    Document,
    Array,
}

impl Shape {
    fn of(value: &Bson) -> Self {
        match value {
            Bson::Null => Shape::Null,
            Bson::Document(_) => Shape::Document,
            Bson::Array(_) => Shape::Array,
            _ => Shape::Scalar,
        }
    }
}

/// Merges `new` over `old`, preserving stored values the incoming document leaves null.
pub fn deep_merge(old: Document, new: Document) -> DocumentStoreResult<Document> {
    merge_documents(old, new, "")
}

fn merge_documents(old: Document, mut new: Document, path: &str) -> DocumentStoreResult<Document> {
    let mut merged = Document::new();

    for (key, old_value) in old {
        let new_value = new.remove(&key).unwrap_or(Bson::Null);
        let key_path = join(path, &key);
        let value = merge_values(old_value, new_value, &key_path)?;
        merged.insert(key, value);
    }

    for (key, new_value) in new {
        let key_path = join(path, &key);
        let value = merge_values(Bson::Null, new_value, &key_path)?;
        merged.insert(key, value);
    }

    Ok(merged)
}

fn merge_values(old: Bson, new: Bson, path: &str) -> DocumentStoreResult<Bson> {
    match (Shape::of(&old), Shape::of(&new)) {
        (Shape::Null, _) => Ok(new),
        (_, Shape::Null) => {
            trace!(target: "docgraph::merge", key = path, "keeping stored value over null");
            Ok(old)
        }
        (Shape::Scalar, Shape::Scalar) | (Shape::Array, Shape::Array) => Ok(new),
        (Shape::Document, Shape::Document) => match (old, new) {
            (Bson::Document(old), Bson::Document(new)) => {
                merge_documents(old, new, path).map(Bson::Document)
            }
            (old, new) => Err(conflict(path, &old, &new)),
        },
        _ => Err(conflict(path, &old, &new)),
    }
}

fn conflict(path: &str, old: &Bson, new: &Bson) -> DocumentStoreError {
    DocumentStoreError::MergeShapeConflict {
        key: path.to_owned(),
        old: old.to_string(),
        new: new.to_string(),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}
