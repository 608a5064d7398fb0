//! Entity identities and their store representation.
//!
//! Identities are opaque strings on the entity side and BSON object ids on the store side.
//! The store keeps them under [`STORE_ID_FIELD`]; decoded trees and external views expose
//! them under [`ID_FIELD`].

use bson::{Bson, Document, doc, oid::ObjectId};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Name of the identity field in stored documents.
pub const STORE_ID_FIELD: &str = "_id";

/// Name of the identity field in decoded trees and external views.
pub const ID_FIELD: &str = "id";

/// Produces a new globally unique identity.
pub fn generate_identity() -> String {
    ObjectId::new().to_hex()
}

/// Converts an identity string into its store-native form.
pub fn parse_identity(id: &str) -> DocumentStoreResult<ObjectId> {
    ObjectId::parse_str(id)
        .map_err(|e| DocumentStoreError::InvalidIdentity(format!("{id}: {e}")))
}

/// Renders a store-reported identity (for example an inserted id) as a string.
pub fn identity_to_string(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builds the filter matching a single document by identity.
pub fn identity_filter(id: &str) -> DocumentStoreResult<Document> {
    Ok(doc! { STORE_ID_FIELD: parse_identity(id)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_parses_back() {
        let id = generate_identity();
        assert_eq!(id.len(), 24);
        assert_eq!(parse_identity(&id).unwrap().to_hex(), id);
        assert_ne!(generate_identity(), id);
    }

    #[test]
    fn test_invalid_identity_is_rejected() {
        assert!(matches!(
            parse_identity("not-an-object-id"),
            Err(DocumentStoreError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_identity_filter_uses_store_field() {
        let id = generate_identity();
        let filter = identity_filter(&id).unwrap();
        assert_eq!(filter.get_object_id(STORE_ID_FIELD).unwrap().to_hex(), id);
    }

    #[test]
    fn test_identity_to_string() {
        let oid = ObjectId::new();
        assert_eq!(identity_to_string(&Bson::ObjectId(oid)), oid.to_hex());
        assert_eq!(identity_to_string(&Bson::String("abc".into())), "abc");
    }
}
