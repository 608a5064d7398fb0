//! Conversion of entity graphs into serializable documents.
//!
//! The [`GraphSerializer`] walks an entity's [`Schema`](crate::entity::Schema) in
//! declaration order and converts every [`FieldValue`] into a BSON value. Nested entities
//! are serialized recursively; a [`TraversalSet`] threaded through the whole walk makes
//! sure every entity instance is written at most once per top-level call. Later
//! encounters of the same instance are replaced by a `dup_<identity>` marker. An instance
//! without identity cannot be referenced that way, so repeating one is an error;
//! [`Repository::save`](crate::repository::Repository::save) assigns identities across the
//! whole graph before serializing.
//!
//! Two projections are available:
//!
//! - [`Projection::Store`] writes the identity as a store-native `_id` and temporal values
//!   in the form their type asks for. This is what repositories persist.
//! - [`Projection::External`] writes the identity as a plain `id` string, renders every
//!   temporal value as ISO-8601 and drops null fields and null collection items. See
//!   [`to_external_view`].

use std::collections::HashMap;

use bson::{Bson, Document};
use tracing::trace;

use crate::{
    entity::{Entity, FieldValue, identity_of},
    error::{DocumentStoreError, DocumentStoreResult},
    identity::{ID_FIELD, STORE_ID_FIELD, parse_identity},
};

/// Suffix appended to a field name when it holds a foreign reference.
const FOREIGN_KEY_SUFFIX: &str = "Id";

/// Prefix of the marker replacing a repeated entity instance.
pub(crate) const DUPLICATE_PREFIX: &str = "dup_";

/// The (type, identity) pair a visited entity is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    type_name: &'static str,
    identity: Option<String>,
}

impl NodeKey {
    /// Builds the key of an entity of type `type_name`.
    pub fn new(type_name: &'static str, identity: Option<&str>) -> Self {
        Self { type_name, identity: identity.map(str::to_owned) }
    }

    /// The entity's `TYPE_NAME`.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The entity's identity, `None` while unsaved.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// The back-reference token written in place of a repeated instance, if the instance
    /// has an identity to point at.
    pub fn duplicate_marker(&self) -> Option<String> {
        self.identity()
            .map(|identity| format!("{DUPLICATE_PREFIX}{identity}"))
    }
}

/// Entities visited during one top-level serialization call.
///
/// Several distinct instances may share a key (for example two unsaved entities of the
/// same type), so each key maps to the addresses of every instance registered under it.
#[derive(Debug, Default)]
pub struct TraversalSet {
    visited: HashMap<NodeKey, Vec<usize>>,
}

impl TraversalSet {
    /// Creates an empty set, scoped to one top-level serialization call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instance. Returns `false` if it was already present.
    pub fn register(&mut self, key: NodeKey, address: usize) -> bool {
        let addresses = self.visited.entry(key).or_default();
        if addresses.contains(&address) {
            return false;
        }
        addresses.push(address);
        true
    }

    /// Whether the instance at `address` was registered under `key`.
    pub fn contains(&self, key: &NodeKey, address: usize) -> bool {
        self.visited
            .get(key)
            .is_some_and(|addresses| addresses.contains(&address))
    }

    /// Number of distinct instances registered.
    pub fn len(&self) -> usize {
        self.visited.values().map(Vec::len).sum()
    }

    /// Whether no instance has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

/// Which wire shape the serializer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Store-native identity and temporal values, nulls kept.
    #[default]
    Store,
    /// Plain `id`, ISO-8601 temporal values, nulls dropped.
    External,
}

/// Walks entity graphs and produces serializable documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphSerializer {
    projection: Projection,
}

impl GraphSerializer {
    /// Creates a serializer producing `projection`.
    pub fn new(projection: Projection) -> Self {
        Self { projection }
    }

    /// A serializer for the documents repositories persist.
    pub fn store() -> Self {
        Self::new(Projection::Store)
    }

    /// A serializer for the JSON-facing view.
    pub fn external() -> Self {
        Self::new(Projection::External)
    }

    /// The projection this serializer produces.
    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Serializes an entity with a fresh traversal set.
    pub fn serialize<E: Entity>(&self, entity: &E) -> DocumentStoreResult<Document> {
        let mut traversal = TraversalSet::new();
        self.serialize_with(entity, &mut traversal)
    }

    /// Serializes an entity, registering it in `traversal` before descending into its fields.
    pub fn serialize_with<E: Entity>(
        &self,
        entity: &E,
        traversal: &mut TraversalSet,
    ) -> DocumentStoreResult<Document> {
        let identity = identity_of(entity);
        traversal.register(
            NodeKey::new(E::TYPE_NAME, identity),
            entity as *const E as usize,
        );

        let mut document = Document::new();

        if let Some(identity) = identity {
            match self.projection {
                Projection::Store => {
                    document.insert(STORE_ID_FIELD, parse_identity(identity)?);
                }
                Projection::External => {
                    document.insert(ID_FIELD, identity);
                }
            }
        }

        for field in E::schema().fields() {
            if field.is_skipped() {
                continue;
            }

            let name = field.name();
            self.write_field(&mut document, name, field.resolve(entity), name, traversal)?;
        }

        Ok(document)
    }

    /// Writes a named value into a document-shaped output.
    fn write_field(
        &self,
        document: &mut Document,
        name: &str,
        value: FieldValue,
        path: &str,
        traversal: &mut TraversalSet,
    ) -> DocumentStoreResult<()> {
        if let FieldValue::Foreign(identity) = value {
            document.insert(format!("{name}{FOREIGN_KEY_SUFFIX}"), identity);
            return Ok(());
        }

        let value = self.convert(value, path, traversal)?;
        if value == Bson::Null && self.projection == Projection::External {
            return Ok(());
        }

        document.insert(name, value);
        Ok(())
    }

    fn convert(
        &self,
        value: FieldValue,
        path: &str,
        traversal: &mut TraversalSet,
    ) -> DocumentStoreResult<Bson> {
        Ok(match value {
            FieldValue::Null => Bson::Null,
            FieldValue::Scalar(scalar) => scalar.into(),
            FieldValue::StoreTime(time) => match self.projection {
                Projection::Store => Bson::DateTime(time.to_store_form()),
                Projection::External => Bson::String(time.to_external_form()),
            },
            FieldValue::ExternalTime(time) => Bson::String(time.to_external_form()),
            FieldValue::Calendar(time) => Bson::Int64(time.timestamp()),
            FieldValue::Collection(items) => {
                let mut array = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let item_path = format!("{path}.{index}");
                    let item = self.convert(item, &item_path, traversal)?;
                    if item == Bson::Null && self.projection == Projection::External {
                        continue;
                    }
                    array.push(item);
                }
                Bson::Array(array)
            }
            FieldValue::Map(entries) => {
                let mut nested = Document::new();
                for (key, entry) in entries {
                    let entry_path = format!("{path}.{key}");
                    self.write_field(&mut nested, &key, entry, &entry_path, traversal)?;
                }
                Bson::Document(nested)
            }
            FieldValue::Entity(node) => {
                let key = node.node_key();
                if traversal.contains(&key, node.address()) {
                    let marker = key.duplicate_marker().ok_or_else(|| {
                        DocumentStoreError::UnconvertibleValue {
                            field: path.to_owned(),
                            value: format!("repeated {} instance without identity", key.type_name()),
                        }
                    })?;
                    trace!(
                        target: "docgraph::serializer",
                        type_name = key.type_name(),
                        identity = ?key.identity(),
                        path,
                        "collapsing repeated entity reference"
                    );
                    Bson::String(marker)
                } else {
                    Bson::Document(node.serialize_node(self, traversal)?)
                }
            }
            FieldValue::Foreign(identity) => Bson::String(identity),
            FieldValue::Unconvertible(rendering) => {
                return Err(DocumentStoreError::UnconvertibleValue {
                    field: path.to_owned(),
                    value: rendering,
                });
            }
        })
    }
}

/// Produces the JSON-facing view of an entity.
///
/// The identity appears as `id`, null fields and null collection items are dropped, and
/// temporal values are rendered as ISO-8601 strings. [`from_external_view`] reverses it.
///
/// [`from_external_view`]: crate::decode::from_external_view
pub fn to_external_view<E: Entity>(entity: &E) -> DocumentStoreResult<serde_json::Value> {
    let document = GraphSerializer::external().serialize(entity)?;
    Ok(serde_json::to_value(&document)?)
}
