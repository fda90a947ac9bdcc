//! Storage seams: the document store and its collections.
//!
//! The configuration engine only talks to these traits. [`crate::MongoStore`]
//! implements them over the official driver and [`crate::MemoryStore`] keeps
//! everything in process.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;

use crate::config::CollectionSettings;
use crate::error::{MongoError, MongoResult};
use crate::index::IndexDefinition;
use crate::mapping::MappingRegistry;

/// Result of a replace or update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually modified.
    pub modified: u64,
}

/// A database that hands out collections and owns the mapping registry.
pub trait DocumentStore: Send + Sync {
    /// Database name.
    fn database_name(&self) -> &str;

    /// Resolve (or create) a collection handle.
    fn collection(
        &self,
        name: &str,
        settings: Option<&CollectionSettings>,
    ) -> MongoResult<Arc<dyn CollectionBackend>>;

    /// Document maps registered against this store.
    fn mappings(&self) -> &MappingRegistry;
}

impl fmt::Debug for dyn DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("database", &self.database_name())
            .finish()
    }
}

/// One collection of raw documents.
#[async_trait]
pub trait CollectionBackend: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Insert documents, returning how many were inserted.
    async fn insert_many(&self, docs: Vec<Document>) -> MongoResult<u64>;

    /// All documents matching the filter.
    async fn find(&self, filter: Document) -> MongoResult<Vec<Document>>;

    /// First document matching the filter.
    async fn find_one(&self, filter: Document) -> MongoResult<Option<Document>>;

    /// Replace the first matching document.
    async fn replace_one(&self, filter: Document, replacement: Document)
    -> MongoResult<UpdateOutcome>;

    /// Apply an update document (`$set`, `$unset`, ...) to the first match.
    async fn update_one(&self, filter: Document, update: Document) -> MongoResult<UpdateOutcome>;

    /// Delete the first matching document, returning the number deleted.
    async fn delete_one(&self, filter: Document) -> MongoResult<u64>;

    /// Count documents matching the filter.
    async fn count(&self, filter: Document) -> MongoResult<u64>;

    /// Create indexes, returning their names.
    async fn create_indexes(&self, indexes: Vec<IndexDefinition>) -> MongoResult<Vec<String>>;
}

impl fmt::Debug for dyn CollectionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionBackend")
            .field("name", &self.name())
            .finish()
    }
}

/// Check a collection name against the server's naming rules.
pub fn validate_collection_name(name: &str) -> MongoResult<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains('$') {
        Some("name contains '$'")
    } else if name.contains('\0') {
        Some("name contains a null character")
    } else if name.starts_with("system.") {
        Some("the 'system.' prefix is reserved")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(MongoError::collection_resolution(name, reason)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("Orders").is_ok());
        assert!(validate_collection_name("audit.log").is_ok());

        for bad in ["", "pay$", "a\0b", "system.users"] {
            let err = validate_collection_name(bad).unwrap_err();
            assert!(err.is_collection_resolution_failed(), "{bad:?}");
        }
    }
}
