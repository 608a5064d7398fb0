//! Entities, their declarative schemas, and the values their fields can hold.
//!
//! An entity describes itself through a [`Schema`]: an ordered list of field descriptors,
//! each pairing a field name with a reader that produces a [`FieldValue`]. The graph
//! serializer walks that list instead of inspecting the type at runtime.
//!
//! Entities that take part in a graph are shared through [`EntityRef`], which gives them
//! reference identity. Two handles point at the same instance exactly when
//! [`EntityRef::ptr_eq`] holds, regardless of field contents.
//!
//! # Example
//!
//! ```ignore
//! use docgraph::prelude::*;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! pub struct Author {
//!     pub id: Option<String>,
//!     pub name: String,
//!     pub books: Vec<EntityRef<Book>>,
//! }
//!
//! impl Entity for Author {
//!     const TYPE_NAME: &'static str = "Author";
//!
//!     fn collection_name() -> &'static str { "authors" }
//!     fn id(&self) -> Option<&str> { self.id.as_deref() }
//!     fn set_id(&mut self, id: String) { self.id = Some(id); }
//!
//!     fn schema() -> Schema<Self> {
//!         Schema::new()
//!             .field("name", |a| a.name.to_field_value())
//!             .field("books", |a| a.books.to_field_value())
//!     }
//! }
//! ```

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::Arc,
};

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};

use crate::{
    decode::{bind_entity, bind_node, decode_store_document},
    error::DocumentStoreResult,
    identity::{ID_FIELD, generate_identity},
    serializer::{GraphSerializer, NodeKey, TraversalSet},
    value::{ExternalDateTime, StoreDateTime},
};

/// A persistable node of an object graph.
///
/// Implementations are usually generated with `#[derive(Entity)]`. The identity is an
/// opaque string that stays `None` until the entity is first saved and never changes
/// afterwards.
pub trait Entity: DeserializeOwned + Send + Sync + 'static {
    /// Type tag used, together with the identity, to key the traversal set.
    const TYPE_NAME: &'static str;

    /// Name of the field the identity binds to when the entity is rebuilt.
    const IDENTITY_FIELD: &'static str = ID_FIELD;

    /// Returns the name of the collection this entity is stored in.
    fn collection_name() -> &'static str;

    /// Returns the identity, if one has been assigned.
    fn id(&self) -> Option<&str>;

    /// Assigns the identity.
    fn set_id(&mut self, id: String);

    /// Returns the ordered field declarations used by the graph serializer.
    fn schema() -> Schema<Self>;

    /// Rebuilds an entity from a stored document.
    ///
    /// The default decodes the document into a plain tree and binds it onto a fresh
    /// instance. Override it to run post-construction steps after binding.
    fn wake_up(document: Document) -> DocumentStoreResult<Self> {
        bind_entity(decode_store_document(document)?)
    }
}

/// Returns the identity of an entity, treating an empty string as unassigned.
pub(crate) fn identity_of<E: Entity>(entity: &E) -> Option<&str> {
    entity.id().filter(|id| !id.is_empty())
}

/// Produces the value of a field for a given entity.
pub type FieldReader<E> = fn(&E) -> FieldValue;

/// Declaration of a single entity field.
pub struct FieldDescriptor<E> {
    name: &'static str,
    read: FieldReader<E>,
    compute: Option<FieldReader<E>>,
    skip: bool,
}

impl<E> FieldDescriptor<E> {
    /// The key the field is written under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the field is elided from serialized output.
    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    /// Whether a compute function backs the field when its value is absent.
    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }

    /// Reads the field, falling back to the compute function when the stored value is absent.
    pub fn resolve(&self, entity: &E) -> FieldValue {
        let value = (self.read)(entity);

        match (&value, self.compute) {
            (FieldValue::Null, Some(compute)) => compute(entity),
            _ => value,
        }
    }
}

impl<E> fmt::Debug for FieldDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("computed", &self.compute.is_some())
            .field("skip", &self.skip)
            .finish()
    }
}

/// Ordered field declarations of an entity type.
pub struct Schema<E> {
    fields: Vec<FieldDescriptor<E>>,
}

impl<E> Schema<E> {
    /// Creates a schema without fields.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Declares a field read directly from the entity.
    pub fn field(mut self, name: &'static str, read: FieldReader<E>) -> Self {
        self.fields.push(FieldDescriptor { name, read, compute: None, skip: false });
        self
    }

    /// Declares a field whose value is computed when the stored value is absent.
    pub fn computed(
        mut self,
        name: &'static str,
        read: FieldReader<E>,
        compute: FieldReader<E>,
    ) -> Self {
        self.fields.push(FieldDescriptor { name, read, compute: Some(compute), skip: false });
        self
    }

    /// Marks the most recently declared field as skipped on serialize.
    pub fn skip_on_serialize(mut self) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.skip = true;
        }
        self
    }

    /// The declared fields, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor<E>] {
        &self.fields
    }

    /// Looks a field up by name.
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor<E>> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Number of declared fields, skipped ones included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field has been declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<E> Default for Schema<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Schema<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.fields).finish()
    }
}

/// Shared, lockable handle to an entity.
///
/// Cloning the handle does not clone the entity. Graph cycles are built by storing
/// clones of handles inside other entities.
pub struct EntityRef<E>(Arc<RwLock<E>>);

impl<E: Entity> EntityRef<E> {
    /// Wraps an entity in a new shared handle.
    pub fn new(entity: E) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    /// Locks the entity for reading.
    ///
    /// Guards must not be held across an `.await` on a repository call that takes the
    /// same handle, since saving needs the write lock.
    pub fn read(&self) -> RwLockReadGuard<'_, E> {
        self.0.read()
    }

    /// Locks the entity for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, E> {
        self.0.write()
    }

    /// Returns `true` when both handles point at the same instance.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }

    /// Returns the identity of the referenced entity.
    pub fn id(&self) -> Option<String> {
        self.0.read().id().map(str::to_owned)
    }

    /// Assigns a generated identity to this entity and to every unsaved entity reachable
    /// from it. Returns how many identities were assigned.
    pub fn assign_identities(&self) -> usize {
        self.0.assign_identities(&mut HashSet::new())
    }

    /// Unwraps the entity if this is the only handle left.
    pub fn try_unwrap(self) -> Result<E, Self> {
        Arc::try_unwrap(self.0)
            .map(|lock| lock.into_inner())
            .map_err(Self)
    }
}

impl<E> Clone for EntityRef<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

// Prints the node key only, since referenced entities may point back at this one.
impl<E: Entity> fmt::Debug for EntityRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identity = self.0.try_read_recursive().map(|entity| entity.id().map(str::to_owned));
        match identity {
            Some(Some(identity)) => write!(f, "EntityRef<{}>({identity})", E::TYPE_NAME),
            Some(None) => write!(f, "EntityRef<{}>(unsaved)", E::TYPE_NAME),
            None => write!(f, "EntityRef<{}>(<locked>)", E::TYPE_NAME),
        }
    }
}

// Accepts a nested entity document or a `dup_<identity>` marker. See `decode::bind_node`.
impl<'de, E: Entity> Deserialize<'de> for EntityRef<E> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        bind_node(Bson::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}

/// Type-erased view of a shared entity, used by the serializer to walk nested nodes.
pub trait GraphNode: Send + Sync {
    /// The entity's `TYPE_NAME`.
    fn type_name(&self) -> &'static str;

    /// The (type, identity) key of this node.
    fn node_key(&self) -> NodeKey;

    /// Address of the entity value, stable for the node's lifetime.
    fn address(&self) -> usize;

    /// Serializes the entity through `serializer`, sharing the caller's traversal set.
    fn serialize_node(
        &self,
        serializer: &GraphSerializer,
        traversal: &mut TraversalSet,
    ) -> DocumentStoreResult<Document>;

    /// Assigns identities to this node and the unsaved nodes below it, visiting every
    /// instance once. Returns how many identities were assigned.
    fn assign_identities(&self, visited: &mut HashSet<usize>) -> usize;
}

fn assign_identities_in(value: FieldValue, visited: &mut HashSet<usize>) -> usize {
    match value {
        FieldValue::Entity(node) => node.assign_identities(visited),
        FieldValue::Collection(items) => items
            .into_iter()
            .map(|item| assign_identities_in(item, visited))
            .sum(),
        FieldValue::Map(entries) => entries
            .into_iter()
            .map(|(_, entry)| assign_identities_in(entry, visited))
            .sum(),
        _ => 0,
    }
}

impl<E: Entity> GraphNode for RwLock<E> {
    fn type_name(&self) -> &'static str {
        E::TYPE_NAME
    }

    fn node_key(&self) -> NodeKey {
        NodeKey::new(E::TYPE_NAME, identity_of(&*self.read_recursive()))
    }

    fn address(&self) -> usize {
        self.data_ptr() as *const () as usize
    }

    fn serialize_node(
        &self,
        serializer: &GraphSerializer,
        traversal: &mut TraversalSet,
    ) -> DocumentStoreResult<Document> {
        serializer.serialize_with(&*self.read_recursive(), traversal)
    }

    fn assign_identities(&self, visited: &mut HashSet<usize>) -> usize {
        if !visited.insert(self.address()) {
            return 0;
        }

        let mut assigned = 0;
        {
            let mut entity = self.write();
            if identity_of(&*entity).is_none() {
                entity.set_id(generate_identity());
                assigned += 1;
            }
        }

        // Field values hold handles, not guards, so the lock is released before descending.
        let values: Vec<FieldValue> = {
            let entity = self.read();
            E::schema()
                .fields()
                .iter()
                .filter(|field| !field.is_skipped())
                .map(|field| field.resolve(&entity))
                .collect()
        };

        assigned
            + values
                .into_iter()
                .map(|value| assign_identities_in(value, visited))
                .sum::<usize>()
    }
}

impl fmt::Debug for dyn GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.type_name(), self.address())
    }
}

/// An object outside the entity hierarchy that exposes an identity.
///
/// Fields holding such objects are serialized as a foreign key named `<field>Id`.
pub trait Identified: Send + Sync {
    /// The identity written under the `<field>Id` key.
    fn identity(&self) -> String;
}

/// A scalar field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
}

impl From<Scalar> for Bson {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(value) => Bson::Boolean(value),
            Scalar::Int32(value) => Bson::Int32(value),
            Scalar::Int64(value) => Bson::Int64(value),
            Scalar::Double(value) => Bson::Double(value),
            Scalar::String(value) => Bson::String(value),
        }
    }
}

/// The value held by an entity field, as seen by the graph serializer.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Scalar(Scalar),
    /// Temporal value written in the store-native form.
    StoreTime(StoreDateTime),
    /// Temporal value written in the external ISO-8601 form.
    ExternalTime(ExternalDateTime),
    /// Plain calendar value, written as a Unix timestamp.
    Calendar(DateTime<Utc>),
    /// Positional collection.
    Collection(Vec<FieldValue>),
    /// Keyed collection.
    Map(Vec<(String, FieldValue)>),
    Entity(Arc<dyn GraphNode>),
    /// Identity of an object outside the entity hierarchy.
    Foreign(String),
    /// A value with no document representation, carrying a rendering of it.
    Unconvertible(String),
}

impl FieldValue {
    /// Whether this is [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Builds a foreign reference from an identity-bearing object.
    pub fn foreign<T: Identified + ?Sized>(value: &T) -> Self {
        FieldValue::Foreign(value.identity())
    }

    /// Converts a raw BSON value. Kinds without a field representation become
    /// [`FieldValue::Unconvertible`].
    pub fn from_bson(value: Bson) -> Self {
        match value {
            Bson::Null => FieldValue::Null,
            Bson::Boolean(value) => FieldValue::Scalar(Scalar::Bool(value)),
            Bson::Int32(value) => FieldValue::Scalar(Scalar::Int32(value)),
            Bson::Int64(value) => FieldValue::Scalar(Scalar::Int64(value)),
            Bson::Double(value) => FieldValue::Scalar(Scalar::Double(value)),
            Bson::String(value) => FieldValue::Scalar(Scalar::String(value)),
            Bson::ObjectId(oid) => FieldValue::Scalar(Scalar::String(oid.to_hex())),
            Bson::DateTime(value) => FieldValue::StoreTime(StoreDateTime::from_store_form(value)),
            Bson::Array(items) => {
                FieldValue::Collection(items.into_iter().map(FieldValue::from_bson).collect())
            }
            Bson::Document(document) => FieldValue::Map(
                document
                    .into_iter()
                    .map(|(key, value)| (key, FieldValue::from_bson(value)))
                    .collect(),
            ),
            other => FieldValue::Unconvertible(format!("{other:?}")),
        }
    }
}

/// Conversion of a field's Rust value into a [`FieldValue`].
pub trait ToFieldValue {
    /// Produces the field value. Must not lock the entity holding the field for writing.
    fn to_field_value(&self) -> FieldValue;
}

macro_rules! scalar_field_value {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl ToFieldValue for $ty {
                fn to_field_value(&self) -> FieldValue {
                    FieldValue::Scalar(Scalar::$variant(<$target>::from(*self)))
                }
            }
        )*
    };
}

scalar_field_value! {
    bool => Bool as bool,
    i8 => Int32 as i32,
    i16 => Int32 as i32,
    i32 => Int32 as i32,
    u8 => Int32 as i32,
    u16 => Int32 as i32,
    i64 => Int64 as i64,
    u32 => Int64 as i64,
    f32 => Double as f64,
    f64 => Double as f64,
}

impl ToFieldValue for str {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Scalar(Scalar::String(self.to_owned()))
    }
}

impl ToFieldValue for String {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Scalar(Scalar::String(self.clone()))
    }
}

impl<T: ToFieldValue + ?Sized> ToFieldValue for &T {
    fn to_field_value(&self) -> FieldValue {
        (**self).to_field_value()
    }
}

impl<T: ToFieldValue> ToFieldValue for Option<T> {
    fn to_field_value(&self) -> FieldValue {
        match self {
            Some(value) => value.to_field_value(),
            None => FieldValue::Null,
        }
    }
}

impl<T: ToFieldValue> ToFieldValue for [T] {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Collection(self.iter().map(ToFieldValue::to_field_value).collect())
    }
}

impl<T: ToFieldValue> ToFieldValue for Vec<T> {
    fn to_field_value(&self) -> FieldValue {
        self.as_slice().to_field_value()
    }
}

impl<T: ToFieldValue> ToFieldValue for BTreeMap<String, T> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Map(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_field_value()))
                .collect(),
        )
    }
}

impl ToFieldValue for StoreDateTime {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::StoreTime(*self)
    }
}

impl ToFieldValue for ExternalDateTime {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::ExternalTime(*self)
    }
}

impl ToFieldValue for DateTime<Utc> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Calendar(*self)
    }
}

impl<E: Entity> ToFieldValue for EntityRef<E> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Entity(self.0.clone())
    }
}

impl<T: Identified + ?Sized> ToFieldValue for Arc<T> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::foreign(&**self)
    }
}

impl ToFieldValue for Bson {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::from_bson(self.clone())
    }
}

impl ToFieldValue for FieldValue {
    fn to_field_value(&self) -> FieldValue {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Tag {
        id: Option<String>,
        label: Option<String>,
    }

    impl Entity for Tag {
        const TYPE_NAME: &'static str = "Tag";

        fn collection_name() -> &'static str {
            "tags"
        }

        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }

        fn set_id(&mut self, id: String) {
            self.id = Some(id);
        }

        fn schema() -> Schema<Self> {
            Schema::<Self>::new()
                .computed(
                    "label",
                    |t| t.label.to_field_value(),
                    |_| "untitled".to_field_value(),
                )
                .field("internal", |_| FieldValue::Null)
                .skip_on_serialize()
        }
    }

    fn tag(label: Option<&str>) -> Tag {
        Tag { id: None, label: label.map(str::to_owned) }
    }

    #[test]
    fn test_schema_preserves_declaration_order() {
        let schema = Tag::schema();
        let names: Vec<_> = schema.fields().iter().map(FieldDescriptor::name).collect();
        assert_eq!(names, vec!["label", "internal"]);
        assert!(schema.get("internal").unwrap().is_skipped());
        assert!(!schema.get("label").unwrap().is_skipped());
    }

    #[test]
    fn test_compute_runs_only_when_absent() {
        let schema = Tag::schema();
        let label = schema.get("label").unwrap();
        assert!(label.is_computed());

        match label.resolve(&tag(None)) {
            FieldValue::Scalar(Scalar::String(s)) => assert_eq!(s, "untitled"),
            other => panic!("unexpected {other:?}"),
        }
        match label.resolve(&tag(Some("rust"))) {
            FieldValue::Scalar(Scalar::String(s)) => assert_eq!(s, "rust"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_entity_ref_identity_is_by_instance() {
        let a = EntityRef::new(tag(Some("same")));
        let b = EntityRef::new(tag(Some("same")));
        let a2 = a.clone();

        assert!(EntityRef::ptr_eq(&a, &a2));
        assert!(!EntityRef::ptr_eq(&a, &b));

        a.write().set_id("abc".into());
        assert_eq!(a2.id().as_deref(), Some("abc"));
    }

    #[test]
    fn test_assign_identities_keeps_existing_ones() {
        let unsaved = EntityRef::new(tag(None));
        assert_eq!(unsaved.assign_identities(), 1);
        let assigned = unsaved.id().unwrap();
        assert!(!assigned.is_empty());

        assert_eq!(unsaved.assign_identities(), 0);
        assert_eq!(unsaved.id().unwrap(), assigned);
    }

    #[test]
    fn test_graph_node_address_matches_guard() {
        let a = EntityRef::new(tag(None));
        let node: Arc<dyn GraphNode> = a.0.clone();
        let guard = a.read();
        assert_eq!(node.address(), &*guard as *const Tag as usize);
    }

    #[test]
    fn test_from_bson_flags_unsupported_kinds() {
        let code = Bson::JavaScriptCode("function() {}".into());
        assert!(matches!(FieldValue::from_bson(code), FieldValue::Unconvertible(_)));
        assert!(matches!(
            FieldValue::from_bson(Bson::Array(vec![Bson::Int32(1)])),
            FieldValue::Collection(items) if items.len() == 1
        ));
    }

    #[test]
    fn test_option_and_collections() {
        assert!(None::<i32>.to_field_value().is_null());
        assert!(matches!(Vec::<String>::new().to_field_value(), FieldValue::Collection(v) if v.is_empty()));

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 1i64);
        assert!(matches!(map.to_field_value(), FieldValue::Map(entries) if entries.len() == 1));
    }
}
