//! Conversion of stored documents back into entities.
//!
//! Decoding happens in two steps. [`decode_store_document`] turns a stored document into a
//! plain tree in which store-native identities are strings under `id`, so the binder only
//! ever sees plain scalars. [`bind`] then maps that tree onto a fresh entity instance
//! through its `Deserialize` implementation, which ignores unknown keys and fails on shape
//! mismatches.
//!
//! Within one [`bind`] call every nested entity bound through an
//! [`EntityRef`](crate::entity::EntityRef) is remembered by type and identity, so a later
//! `dup_<identity>` marker resolves to the same shared handle.

use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::HashMap,
};

use bson::{Bson, Document, deserialize_from_document, doc};
use serde::de::DeserializeOwned;

use crate::{
    entity::{Entity, EntityRef},
    error::{DocumentStoreError, DocumentStoreResult},
    identity::{ID_FIELD, STORE_ID_FIELD},
    serializer::DUPLICATE_PREFIX,
};

type BoundNodes = HashMap<(TypeId, String), Box<dyn Any>>;

thread_local! {
    static BOUND_NODES: RefCell<Option<BoundNodes>> = const { RefCell::new(None) };
}

/// Marks the extent of one top-level bind call. Nested scopes share the outer registry.
struct BindScope {
    owner: bool,
}

impl BindScope {
    fn enter() -> Self {
        BOUND_NODES.with(|nodes| {
            let mut nodes = nodes.borrow_mut();
            if nodes.is_some() {
                Self { owner: false }
            } else {
                *nodes = Some(HashMap::new());
                Self { owner: true }
            }
        })
    }
}

impl Drop for BindScope {
    fn drop(&mut self) {
        if self.owner {
            BOUND_NODES.with(|nodes| nodes.borrow_mut().take());
        }
    }
}

fn remember<E: Entity>(node: &EntityRef<E>) {
    let Some(identity) = node.id() else {
        return;
    };

    BOUND_NODES.with(|nodes| {
        if let Some(nodes) = nodes.borrow_mut().as_mut() {
            nodes
                .entry((TypeId::of::<E>(), identity))
                .or_insert_with(|| Box::new(node.clone()));
        }
    });
}

fn recall<E: Entity>(identity: &str) -> Option<EntityRef<E>> {
    BOUND_NODES.with(|nodes| {
        nodes
            .borrow()
            .as_ref()?
            .get(&(TypeId::of::<E>(), identity.to_owned()))?
            .downcast_ref::<EntityRef<E>>()
            .cloned()
    })
}

/// Decodes a stored document into a plain tree suitable for binding.
///
/// Nested documents and arrays are decoded recursively. An object id found under the
/// store identity key is rendered as a string and moved to `id`. Any other value that is
/// not a scalar or null is rejected.
pub fn decode_store_document(document: Document) -> DocumentStoreResult<Document> {
    decode_document(document, "")
}

fn decode_document(document: Document, path: &str) -> DocumentStoreResult<Document> {
    let mut decoded = Document::new();
    let mut identity = None;

    for (key, value) in document {
        let key_path = join(path, &key);

        if key == STORE_ID_FIELD {
            identity = Some(match value {
                Bson::ObjectId(oid) => Bson::String(oid.to_hex()),
                other => decode_value(other, &key_path)?,
            });
            continue;
        }

        decoded.insert(key, decode_value(value, &key_path)?);
    }

    // The store identity is authoritative over any plain `id` key.
    if let Some(identity) = identity {
        decoded.insert(ID_FIELD, identity);
    }

    Ok(decoded)
}

fn decode_value(value: Bson, path: &str) -> DocumentStoreResult<Bson> {
    match value {
        Bson::Document(document) => decode_document(document, path).map(Bson::Document),
        Bson::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| decode_value(item, &join(path, &index.to_string())))
            .collect::<DocumentStoreResult<Vec<_>>>()
            .map(Bson::Array),
        Bson::ObjectId(oid) => Ok(Bson::String(oid.to_hex())),
        scalar @ (Bson::Null
        | Bson::Boolean(_)
        | Bson::Int32(_)
        | Bson::Int64(_)
        | Bson::Double(_)
        | Bson::String(_)
        | Bson::Decimal128(_)
        | Bson::DateTime(_)) => Ok(scalar),
        other => Err(DocumentStoreError::DecodeShape {
            key: path.to_owned(),
            value: format!("{other:?}"),
        }),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

/// Binds a decoded tree onto a fresh instance of `T`.
pub fn bind<T: DeserializeOwned>(tree: Document) -> DocumentStoreResult<T> {
    let _scope = BindScope::enter();
    deserialize_from_document(tree).map_err(|e| DocumentStoreError::Binding(e.to_string()))
}

/// Binds a decoded tree onto a fresh entity.
///
/// The generic `id` key is moved to the entity's declared identity field first.
pub fn bind_entity<E: Entity>(mut tree: Document) -> DocumentStoreResult<E> {
    if E::IDENTITY_FIELD != ID_FIELD {
        if let Some(identity) = tree.remove(ID_FIELD) {
            tree.insert(E::IDENTITY_FIELD, identity);
        }
    }

    bind(tree)
}

/// Binds one nested node: either a full entity document or a duplicate marker.
///
/// A marker resolves to the handle bound earlier in the same call under that identity.
/// A marker pointing at an enclosing entity, which is still being bound, falls back to an
/// instance carrying only the identity, and fails if the entity cannot be built from it.
pub(crate) fn bind_node<E: Entity>(value: Bson) -> DocumentStoreResult<EntityRef<E>> {
    match value {
        Bson::Document(tree) => {
            let node = EntityRef::new(bind_entity::<E>(tree)?);
            remember(&node);
            Ok(node)
        }
        Bson::String(marker) => {
            let identity = marker
                .strip_prefix(DUPLICATE_PREFIX)
                .filter(|identity| !identity.is_empty())
                .ok_or_else(|| {
                    DocumentStoreError::Binding(format!(
                        "expected a {} document or a duplicate marker, found {marker:?}",
                        E::TYPE_NAME
                    ))
                })?;

            if let Some(node) = recall::<E>(identity) {
                return Ok(node);
            }

            bind_entity::<E>(doc! { ID_FIELD: identity })
                .map(EntityRef::new)
                .map_err(|_| {
                    DocumentStoreError::Binding(format!(
                        "{marker} does not refer to a {} bound before it",
                        E::TYPE_NAME
                    ))
                })
        }
        other => Err(DocumentStoreError::Binding(format!(
            "expected a {} document, found {other}",
            E::TYPE_NAME
        ))),
    }
}

/// Rebuilds an entity from its external JSON view, the inverse of
/// [`to_external_view`](crate::serializer::to_external_view).
///
/// The `id` key becomes the identity. Temporal fields accept the ISO-8601 strings the view
/// renders them as.
pub fn from_external_view<E: Entity>(view: serde_json::Value) -> DocumentStoreResult<E> {
    match bson::serialize_to_bson(&view)? {
        Bson::Document(tree) => bind_entity(tree),
        other => Err(DocumentStoreError::Binding(format!(
            "expected a JSON object for {}, found {other}",
            E::TYPE_NAME
        ))),
    }
}
