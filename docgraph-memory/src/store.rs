//! In-memory storage implementation for document stores.
//!
//! Documents are kept per collection in insertion order behind an async-aware
//! read-write lock.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::{debug, trace};

use docgraph_core::{
    backend::{InsertOneResult, ReplaceOneResult, StoreBackend, StoreBackendBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
    identity::{STORE_ID_FIELD, identity_to_string},
};

use crate::evaluator::{Comparable, DocumentEvaluator, lookup};

type CollectionMap = Vec<Document>;
type StoreMap = HashMap<String, CollectionMap>;

/// Thread-safe in-memory document store client.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones share
/// the same underlying data.
///
/// Queries scan every document of a collection. Filters are evaluated with the
/// MongoDB operator subset documented in [`crate::evaluator`]. The `find` options
/// understood are `sort`, `skip` and `limit`; other option keys are ignored.
///
/// # Example
///
/// ```ignore
/// use docgraph_memory::InMemoryStore;
/// use docgraph::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let inserted = store.insert_one(doc! { "name": "Alice" }, "users").await?;
/// let found = store.find_one(doc! { "name": "Alice" }, "users").await?;
/// assert!(found.is_some());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self { store: Arc::new(RwLock::new(StoreMap::new())) }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns the number of documents stored in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.store
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

/// Parsed `find` options.
#[derive(Debug, Default)]
struct FindOptions {
    sort: Vec<(String, bool)>,
    skip: usize,
    limit: Option<usize>,
}

impl FindOptions {
    fn parse(options: &Document) -> DocumentStoreResult<Self> {
        let mut parsed = FindOptions::default();

        if let Some(sort) = options.get("sort") {
            let sort = sort.as_document().ok_or_else(|| {
                DocumentStoreError::Backend(format!("sort must be a document, got {sort}"))
            })?;

            for (field, direction) in sort {
                let ascending = match integer(direction) {
                    Some(1) => true,
                    Some(-1) => false,
                    _ => {
                        return Err(DocumentStoreError::Backend(format!(
                            "sort direction for {field} must be 1 or -1, got {direction}"
                        )));
                    }
                };
                parsed.sort.push((field.clone(), ascending));
            }
        }

        if let Some(skip) = options.get("skip") {
            parsed.skip = count("skip", skip)?;
        }

        if let Some(limit) = options.get("limit") {
            parsed.limit = match count("limit", limit)? {
                0 => None,
                limit => Some(limit),
            };
        }

        Ok(parsed)
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, ascending) in &self.sort {
            let left = lookup(a, field).map_or(Comparable::Null, Comparable::from);
            let right = lookup(b, field).map_or(Comparable::Null, Comparable::from);

            let ordering = left.partial_cmp(&right).unwrap_or(Ordering::Equal);
            let ordering = if *ascending { ordering } else { ordering.reverse() };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    }
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        Bson::Double(value) if value.fract() == 0.0 => Some(*value as i64),
        _ => None,
    }
}

fn count(option: &str, value: &Bson) -> DocumentStoreResult<usize> {
    integer(value)
        .map(|value| value.unsigned_abs() as usize)
        .ok_or_else(|| DocumentStoreError::Backend(format!("{option} must be an integer, got {value}")))
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find_one(
        &self,
        filter: Document,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let store = self.store.read().await;
        let collection_map = match store.get(collection) {
            Some(col) => col,
            None => return Ok(None),
        };

        for document in collection_map {
            if DocumentEvaluator::new(document).evaluate(&filter)? {
                return Ok(Some(document.clone()));
            }
        }

        Ok(None)
    }

    async fn find(
        &self,
        filter: Document,
        options: Document,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        let options = FindOptions::parse(&options)?;

        let store = self.store.read().await;
        let collection_map = match store.get(collection) {
            Some(col) => col,
            None => return Ok(vec![]),
        };

        let mut matched = DocumentEvaluator::filter_documents(collection_map, &filter)?;

        if !options.sort.is_empty() {
            matched.sort_by(|a, b| options.compare(a, b));
        }

        trace!(
            target: "docgraph::memory",
            collection,
            matched = matched.len(),
            skip = options.skip,
            limit = ?options.limit,
            "evaluated find"
        );

        Ok(matched
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn insert_one(
        &self,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<InsertOneResult> {
        let document = if document.contains_key(STORE_ID_FIELD) {
            document
        } else {
            let mut with_id = Document::new();
            with_id.insert(STORE_ID_FIELD, ObjectId::new());
            for (key, value) in document {
                with_id.insert(key, value);
            }
            with_id
        };

        let inserted_id = document
            .get(STORE_ID_FIELD)
            .cloned()
            .unwrap_or(Bson::Null);

        let mut store = self.store.write().await;
        let collection_map = store
            .entry(collection.to_string())
            .or_default();

        if collection_map
            .iter()
            .any(|stored| stored.get(STORE_ID_FIELD) == Some(&inserted_id))
        {
            return Err(DocumentStoreError::DocumentAlreadyExists(
                identity_to_string(&inserted_id),
                collection.to_string(),
            ));
        }

        collection_map.push(document);

        debug!(
            target: "docgraph::memory",
            collection,
            id = %identity_to_string(&inserted_id),
            "inserted document"
        );

        Ok(InsertOneResult { inserted_id })
    }

    async fn replace_one(
        &self,
        filter: Document,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<ReplaceOneResult> {
        let mut store = self.store.write().await;
        let collection_map = match store.get_mut(collection) {
            Some(col) => col,
            None => return Ok(ReplaceOneResult::default()),
        };

        let mut position = None;
        for (index, stored) in collection_map.iter().enumerate() {
            if DocumentEvaluator::new(stored).evaluate(&filter)? {
                position = Some(index);
                break;
            }
        }

        let Some(index) = position else {
            return Ok(ReplaceOneResult::default());
        };

        let stored = &mut collection_map[index];
        let stored_id = stored
            .get(STORE_ID_FIELD)
            .cloned()
            .unwrap_or(Bson::Null);

        if let Some(new_id) = document.get(STORE_ID_FIELD) {
            if new_id != &stored_id {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "cannot change {STORE_ID_FIELD} from {stored_id} to {new_id}"
                )));
            }
        }

        let mut replacement = Document::new();
        replacement.insert(STORE_ID_FIELD, stored_id);
        for (key, value) in document {
            if key != STORE_ID_FIELD {
                replacement.insert(key, value);
            }
        }

        let modified = *stored != replacement;
        *stored = replacement;

        Ok(ReplaceOneResult {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
