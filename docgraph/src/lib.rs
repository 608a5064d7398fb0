//! Main docgraph crate: an object-document mapper for entity graphs.
//!
//! This crate is the primary entry point for users of the docgraph framework. It re-exports
//! the core types from the sub-crates, the `#[derive(Entity)]` macro, and the bundled
//! store clients.
//!
//! # Features
//!
//! - **Entity graphs** - Entities reference each other through shared handles, cycles included
//! - **Cycle-safe serialization** - Repeated instances collapse to `dup_<identity>` markers
//! - **Merge-upsert saves** - Stored fields the entity no longer carries are preserved
//! - **Multiple backends** - In-memory and MongoDB store clients behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docgraph::{prelude::*, memory::InMemoryStore};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, Entity)]
//! #[entity(collection = "users")]
//! pub struct User {
//!     #[entity(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//!     #[serde(default)]
//!     pub friends: Vec<EntityRef<User>>,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await.unwrap());
//!     let users = store.repository::<User>();
//!
//!     let alice = EntityRef::new(User { id: None, name: "Alice".into(), friends: vec![] });
//!     let alice = users.save(&alice).await.unwrap();
//!
//!     let found = users
//!         .get_list_by_filter(bson::doc! { "name": "Alice" }, bson::doc! {})
//!         .await
//!         .unwrap();
//!
//!     println!("Found users: {:?}", found);
//!
//!     store.shutdown().await.unwrap();
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! A typed `DocumentStore` converts into a [`DynDocumentStore`](store::DynDocumentStore)
//! with `into_dyn`, and [`StoreConfig`](config::StoreConfig) builds one from configuration:
//!
//! ```ignore
//! use docgraph::{prelude::*, config::StoreConfig};
//!
//! let store = StoreConfig::from_json(r#"{ "backend": "memory" }"#)?.connect().await?;
//! let users = store.repository::<User>();
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docgraph;

pub mod config;
pub mod prelude;

pub use docgraph_core::{
    backend, decode, entity, error, identity, merge, repository, serializer, store, value,
};

pub use docgraph_core::entity::{Entity, EntityRef};
pub use docgraph_core::store::DocumentStore;
pub use docgraph_macros::Entity;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docgraph_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docgraph_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
