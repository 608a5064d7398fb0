use async_trait::async_trait;
use bson::Document;
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    options::{ClientOptions, FindOptions},
};
use tracing::debug;

use docgraph_core::{
    backend::{InsertOneResult, ReplaceOneResult, StoreBackend, StoreBackendBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// MongoDB-backed store client.
///
/// Filters are forwarded to the server unchanged. `find` options use the driver's
/// camel-cased option names (`sort`, `skip`, `limit`, `projection`, `hint`, `batchSize`,
/// `collation` and so on) and are all forwarded.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    /// Wraps a connected client, storing collections in `database`.
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    /// Returns a builder connecting to `dsn`.
    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

fn backend_error(e: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(e.to_string())
}

/// Reads an options document into driver find options. Keys the driver does not know are
/// ignored.
pub(crate) fn find_options(options: Document) -> DocumentStoreResult<FindOptions> {
    bson::deserialize_from_document(options)
        .map_err(|e| DocumentStoreError::Backend(format!("invalid find options: {e}")))
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find_one(
        &self,
        filter: Document,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(filter)
            .await
            .map_err(backend_error)
    }

    async fn find(
        &self,
        filter: Document,
        options: Document,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .find(filter)
            .with_options(find_options(options)?)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn insert_one(
        &self,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<InsertOneResult> {
        let result = self
            .get_collection(collection)
            .insert_one(document)
            .await
            .map_err(backend_error)?;

        debug!(
            target: "docgraph::mongodb",
            collection,
            id = %result.inserted_id,
            "inserted document"
        );

        Ok(InsertOneResult { inserted_id: result.inserted_id })
    }

    async fn replace_one(
        &self,
        filter: Document,
        document: Document,
        collection: &str,
    ) -> DocumentStoreResult<ReplaceOneResult> {
        let result = self
            .get_collection(collection)
            .replace_one(filter, document)
            .await
            .map_err(backend_error)?;

        Ok(ReplaceOneResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Connects a [`MongoDbStore`].
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    /// Creates a builder for `database` on the server at `dsn`.
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        debug!(target: "docgraph::mongodb", database = %self.database, "connecting");

        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn test_find_options_pass_through() {
        let options = find_options(doc! {
            "sort": { "name": 1, "age": -1 },
            "skip": 5,
            "limit": 10_i64,
            "projection": { "name": 1 },
            "hint": "name_1",
            "batchSize": 50,
            "comment": "listing",
            "unknownOption": true,
        })
        .unwrap();

        assert_eq!(options.sort, Some(doc! { "name": 1, "age": -1 }));
        assert_eq!(options.skip, Some(5));
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.projection, Some(doc! { "name": 1 }));
        assert!(options.hint.is_some());
        assert_eq!(options.batch_size, Some(50));
    }

    #[test]
    fn test_empty_options_leave_defaults() {
        let options = find_options(doc! {}).unwrap();
        assert!(options.sort.is_none());
        assert!(options.skip.is_none());
        assert!(options.limit.is_none());
        assert!(options.projection.is_none());
    }

    #[test]
    fn test_malformed_options_are_rejected() {
        assert!(matches!(
            find_options(doc! { "sort": "name" }),
            Err(DocumentStoreError::Backend(_))
        ));
        assert!(matches!(
            find_options(doc! { "limit": "ten" }),
            Err(DocumentStoreError::Backend(_))
        ));
    }
}
