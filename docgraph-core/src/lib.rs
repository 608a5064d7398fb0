//! An object-document mapper that persists entity graphs into document stores.
//!
//! This crate is the core of the docgraph project and provides:
//!
//! - **Entity model** ([`entity`]) - Entities, shared entity handles and declarative field schemas
//! - **Temporal values** ([`value`]) - Date/time wrappers with store-native and external projections
//! - **Graph serializer** ([`serializer`]) - Entity graph to document conversion with cycle collapsing
//! - **Decoding** ([`decode`]) - Stored document to entity conversion
//! - **Deep merge** ([`merge`]) - Reconciliation of stored and incoming documents
//! - **Identities** ([`identity`]) - Identity generation and filter construction
//! - **Store client abstraction** ([`backend`]) - Traits for implementing different store clients
//! - **Repositories** ([`repository`]) - Typed reads and merge-upsert saves for one collection
//! - **Document store** ([`store`]) - Main interface handing out repositories
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docgraph::{Entity, EntityRef};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, Entity)]
//! #[entity(collection = "users")]
//! pub struct User {
//!     #[entity(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! let users = store.repository::<User>();
//! let user = users.save(&EntityRef::new(User { id: None, name: "Alice".into() })).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgraph_core;

pub mod backend;
pub mod decode;
pub mod entity;
pub mod error;
pub mod identity;
pub mod merge;
pub mod repository;
pub mod serializer;
pub mod store;
pub mod value;
