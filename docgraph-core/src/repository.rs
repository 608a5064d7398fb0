//! Typed access to the entities of one collection.
//!
//! A [`Repository`] pairs an entity type with a collection name and a store client. Reads
//! wake entities up from stored documents; [`Repository::save`] runs the merge-upsert flow.
//!
//! # Example
//!
//! ```ignore
//! let notes = store.repository::<Note>();
//!
//! let note = EntityRef::new(Note::new("groceries"));
//! let note = notes.save(&note).await?;
//!
//! let again = notes.get_by_id(&note.id().unwrap()).await?;
//! ```

use std::marker::PhantomData;

use bson::Document;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    entity::{Entity, EntityRef, identity_of},
    error::DocumentStoreResult,
    identity::{identity_filter, identity_to_string},
    merge::deep_merge,
    serializer::GraphSerializer,
};

/// Entities of type `E` stored in one collection.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the backend reference
/// * `B` - The store client type
/// * `E` - The entity type
#[derive(Debug)]
pub struct Repository<'a, B: StoreBackend, E: Entity> {
    name: String,
    backend: &'a B,
    _marker: PhantomData<fn() -> E>,
}

impl<'a, B: StoreBackend, E: Entity> Repository<'a, B, E> {
    pub(crate) fn new(name: String, backend: &'a B) -> Self {
        Self { name, backend, _marker: PhantomData }
    }

    /// Returns the name of the underlying collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetches one entity by identity.
    pub async fn get_by_id(&self, id: &str) -> DocumentStoreResult<Option<EntityRef<E>>> {
        let filter = identity_filter(id)?;

        match self.backend.find_one(filter, &self.name).await? {
            Some(document) => Ok(Some(EntityRef::new(E::wake_up(document)?))),
            None => Ok(None),
        }
    }

    /// Fetches every entity matching `filter`. Both `filter` and `options` reach the store
    /// client unmodified.
    pub async fn get_list_by_filter(
        &self,
        filter: Document,
        options: Document,
    ) -> DocumentStoreResult<Vec<EntityRef<E>>> {
        let documents = self
            .backend
            .find(filter, options, &self.name)
            .await?;

        self.wake_up_all(documents)
    }

    /// Wakes up a batch of stored documents, in order.
    pub fn wake_up_all(&self, documents: Vec<Document>) -> DocumentStoreResult<Vec<EntityRef<E>>> {
        documents
            .into_iter()
            .map(|document| E::wake_up(document).map(EntityRef::new))
            .collect()
    }

    /// Persists an entity with merge-upsert semantics.
    ///
    /// Every unsaved entity in the graph gets a fresh identity first. An entity without
    /// identity is then inserted. An entity with identity is looked up: if a stored document
    /// exists, the freshly serialized document is deep-merged over it, the merged document
    /// is woken up into a new entity, and only then does the merged document replace the
    /// stored one, so a document that cannot be rebuilt is never written. Otherwise the
    /// entity is inserted, it adopts the identity reported by the store, and the same handle
    /// is returned.
    ///
    /// The lookup and the write are separate round trips, so a concurrent writer's change
    /// made in between can be overwritten.
    pub async fn save(&self, entity: &EntityRef<E>) -> DocumentStoreResult<EntityRef<E>> {
        let existing_id = identity_of(&*entity.read()).map(str::to_owned);

        let assigned = entity.assign_identities();
        if assigned > 0 {
            debug!(
                target: "docgraph::repository",
                collection = %self.name,
                assigned,
                "assigned identities to unsaved entities"
            );
        }

        let stored = match &existing_id {
            Some(id) => {
                self.backend
                    .find_one(identity_filter(id)?, &self.name)
                    .await?
            }
            None => None,
        };

        let incoming = GraphSerializer::store().serialize(&*entity.read())?;

        match (stored, existing_id) {
            (Some(stored), Some(id)) => {
                let merged = deep_merge(stored, incoming)?;
                let rebuilt = E::wake_up(merged.clone())?;
                let result = self
                    .backend
                    .replace_one(identity_filter(&id)?, merged.clone(), &self.name)
                    .await?;

                debug!(
                    target: "docgraph::repository",
                    collection = %self.name,
                    id = %id,
                    matched = result.matched_count,
                    modified = result.modified_count,
                    "replaced stored document with merged document"
                );

                Ok(EntityRef::new(rebuilt))
            }
            _ => {
                let result = self.backend.insert_one(incoming, &self.name).await?;
                let id = identity_to_string(&result.inserted_id);

                debug!(
                    target: "docgraph::repository",
                    collection = %self.name,
                    id = %id,
                    "inserted new document"
                );

                entity.write().set_id(id);
                Ok(entity.clone())
            }
        }
    }
}
