//! In-memory document store client for docgraph.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development
//! and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **MongoDB-style filters** - Equality, comparison, membership and logical operators
//! - **Find options** - `sort`, `skip` and `limit`
//!
//! # Quick Start
//!
//! ```ignore
//! use docgraph::{DocumentStore, Entity, EntityRef, memory::InMemoryStore};
//! use docgraph::backend::StoreBackendBuilder;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, Entity)]
//! pub struct User {
//!     #[entity(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!     let users = store.repository::<User>();
//!
//!     let user = users.save(&EntityRef::new(User { id: None, name: "Alice".into() })).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgraph_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
