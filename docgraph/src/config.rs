//! Configuration-driven store construction.
//!
//! A [`StoreConfig`] names a backend and its connection settings. It is usually read
//! from a JSON document:
//!
//! ```json
//! { "backend": "mongodb", "dsn": "mongodb://localhost:27017", "database": "app" }
//! ```
//!
//! and turned into a [`DynDocumentStore`] with [`StoreConfig::connect`].

use serde::{Deserialize, Serialize};

use docgraph_core::{
    backend::StoreBackendBuilder,
    error::{DocumentStoreError, DocumentStoreResult},
    store::{DocumentStore, DynDocumentStore, IntoDynDocumentStore},
};
use docgraph_memory::InMemoryStore;

/// Backend selection and connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local in-memory store.
    #[default]
    Memory,
    /// MongoDB server. Requires the `mongodb` feature.
    MongoDb { dsn: String, database: String },
}

impl StoreConfig {
    /// Parses a configuration from JSON.
    pub fn from_json(input: &str) -> DocumentStoreResult<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Builds the configured backend and wraps it in a document store.
    pub async fn connect(self) -> DocumentStoreResult<DynDocumentStore> {
        match self {
            StoreConfig::Memory => {
                let backend = InMemoryStore::builder().build().await?;
                Ok(DocumentStore::new(backend).into_dyn())
            }
            #[cfg(feature = "mongodb")]
            StoreConfig::MongoDb { dsn, database } => {
                let backend = docgraph_mongodb::MongoDbStore::builder(&dsn, &database)
                    .build()
                    .await?;
                Ok(DocumentStore::new(backend).into_dyn())
            }
            #[cfg(not(feature = "mongodb"))]
            StoreConfig::MongoDb { .. } => Err(DocumentStoreError::Initialization(
                "the mongodb backend requires the `mongodb` feature".to_string(),
            )),
        }
    }
}
