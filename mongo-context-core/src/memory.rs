//! In-memory document store.
//!
//! Suitable for tests and offline use. Filters support equality, `$eq`,
//! `$ne`, `$in` and `$and`; updates support `$set` and `$unset`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::config::CollectionSettings;
use crate::error::{MongoError, MongoResult};
use crate::filter::{matches_filter, values_equal};
use crate::index::IndexDefinition;
use crate::mapping::{ID_ELEMENT, MappingRegistry};
use crate::store::{CollectionBackend, DocumentStore, UpdateOutcome, validate_collection_name};

/// A database held entirely in memory.
///
/// # Example
///
/// ```rust
/// use mongo_context_core::{DocumentStore, MemoryStore};
///
/// let store = MemoryStore::new("shop");
/// let orders = store.collection("orders", None).unwrap();
/// assert_eq!(orders.name(), "orders");
/// assert_eq!(store.collection_names(), vec!["orders".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    database: String,
    collections: RwLock<IndexMap<String, Arc<MemoryCollection>>>,
    mappings: MappingRegistry,
    resolutions: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty database.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Names of the collections created so far, in creation order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Copy of the documents stored in a collection.
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.read().clone())
            .unwrap_or_default()
    }

    /// Names of the indexes created on a collection.
    #[must_use]
    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.read().iter().map(IndexDefinition::index_name).collect())
            .unwrap_or_default()
    }

    /// How many times a collection handle was requested.
    #[must_use]
    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Drop every collection. Registered mappings are kept.
    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn collection(
        &self,
        name: &str,
        _settings: Option<&CollectionSettings>,
    ) -> MongoResult<Arc<dyn CollectionBackend>> {
        validate_collection_name(name)?;
        self.resolutions.fetch_add(1, Ordering::SeqCst);

        let mut collections = self.collections.write();
        let collection: Arc<dyn CollectionBackend> = collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name)))
            .clone();
        Ok(collection)
    }

    fn mappings(&self) -> &MappingRegistry {
        &self.mappings
    }
}

/// A collection of [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    documents: RwLock<Vec<Document>>,
    indexes: RwLock<Vec<IndexDefinition>>,
}

impl MemoryCollection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: RwLock::new(Vec::new()),
            indexes: RwLock::new(Vec::new()),
        }
    }
}

/// Give the document an `_id` (first element) if it has none.
fn with_id(doc: Document) -> Document {
    if doc.contains_key(ID_ELEMENT) {
        return doc;
    }
    let mut out = Document::new();
    out.insert(ID_ELEMENT, ObjectId::new());
    out.extend(doc);
    out
}

fn apply_update(doc: &mut Document, update: &Document) -> MongoResult<bool> {
    let before = doc.clone();
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(MongoError::query(format!("'{}' expects a document", op)));
        };
        match op.as_str() {
            "$set" => {
                for (field, value) in fields {
                    if field == ID_ELEMENT {
                        return Err(MongoError::query("cannot modify '_id'"));
                    }
                    doc.insert(field.clone(), value.clone());
                }
            }
            "$unset" => {
                for field in fields.keys() {
                    doc.remove(field);
                }
            }
            other => {
                return Err(MongoError::query(format!(
                    "unsupported update operator '{}'",
                    other
                )));
            }
        }
    }
    Ok(*doc != before)
}

#[async_trait]
impl CollectionBackend for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_many(&self, docs: Vec<Document>) -> MongoResult<u64> {
        let mut documents = self.documents.write();
        let mut inserted = Vec::with_capacity(docs.len());
        for doc in docs.into_iter().map(with_id) {
            let id = doc.get(ID_ELEMENT).cloned().unwrap_or(Bson::Null);
            let duplicate = documents
                .iter()
                .chain(inserted.iter())
                .any(|existing: &Document| existing.get(ID_ELEMENT).is_some_and(|v| values_equal(v, &id)));
            if duplicate {
                return Err(MongoError::query(format!(
                    "duplicate key in '{}': _id {}",
                    self.name, id
                )));
            }
            inserted.push(doc);
        }
        let count = inserted.len() as u64;
        documents.extend(inserted);
        trace!(collection = %self.name, count, "Inserted documents");
        Ok(count)
    }

    async fn find(&self, filter: Document) -> MongoResult<Vec<Document>> {
        Ok(self
            .documents
            .read()
            .iter()
            .filter(|doc| matches_filter(&filter, doc))
            .cloned()
            .collect())
    }

    async fn find_one(&self, filter: Document) -> MongoResult<Option<Document>> {
        Ok(self
            .documents
            .read()
            .iter()
            .find(|doc| matches_filter(&filter, doc))
            .cloned())
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
    ) -> MongoResult<UpdateOutcome> {
        let mut documents = self.documents.write();
        let Some(doc) = documents.iter_mut().find(|doc| matches_filter(&filter, doc)) else {
            return Ok(UpdateOutcome::default());
        };

        let mut next = Document::new();
        if let Some(id) = doc.get(ID_ELEMENT) {
            if replacement.get(ID_ELEMENT).is_some_and(|new_id| !values_equal(new_id, id)) {
                return Err(MongoError::query("replacement would change '_id'"));
            }
            next.insert(ID_ELEMENT, id.clone());
        }
        for (field, value) in replacement {
            if field != ID_ELEMENT {
                next.insert(field, value);
            }
        }

        let modified = u64::from(*doc != next);
        *doc = next;
        Ok(UpdateOutcome {
            matched: 1,
            modified,
        })
    }

    async fn update_one(&self, filter: Document, update: Document) -> MongoResult<UpdateOutcome> {
        let mut documents = self.documents.write();
        let Some(doc) = documents.iter_mut().find(|doc| matches_filter(&filter, doc)) else {
            return Ok(UpdateOutcome::default());
        };
        let changed = apply_update(doc, &update)?;
        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(changed),
        })
    }

    async fn delete_one(&self, filter: Document) -> MongoResult<u64> {
        let mut documents = self.documents.write();
        match documents.iter().position(|doc| matches_filter(&filter, doc)) {
            Some(index) => {
                documents.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn count(&self, filter: Document) -> MongoResult<u64> {
        Ok(self
            .documents
            .read()
            .iter()
            .filter(|doc| matches_filter(&filter, doc))
            .count() as u64)
    }

    async fn create_indexes(&self, indexes: Vec<IndexDefinition>) -> MongoResult<Vec<String>> {
        let mut existing = self.indexes.write();
        let mut names = Vec::with_capacity(indexes.len());
        for index in indexes {
            let name = index.index_name();
            if !existing.iter().any(|i| i.index_name() == name) {
                existing.push(index);
            }
            names.push(name);
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn orders(store: &MemoryStore) -> Arc<dyn CollectionBackend> {
        store.collection("orders", None).unwrap()
    }

    #[test]
    fn test_collection_is_shared_by_name() {
        let store = MemoryStore::new("shop");
        let a = orders(&store);
        let b = orders(&store);
        assert_eq!(a.name(), b.name());
        assert_eq!(store.collection_names(), vec!["orders".to_string()]);
        assert_eq!(store.resolution_count(), 2);
        assert_eq!(store.database_name(), "shop");
    }

    #[test]
    fn test_invalid_collection_name() {
        let store = MemoryStore::new("shop");
        let err = store.collection("system.profile", None).unwrap_err();
        assert!(err.is_collection_resolution_failed());
        assert_eq!(store.resolution_count(), 0);
    }

    #[tokio::test]
    async fn test_insert_assigns_missing_ids_and_rejects_duplicates() {
        let store = MemoryStore::new("shop");
        let orders = orders(&store);

        assert_eq!(
            orders
                .insert_many(vec![doc! { "_id": 1, "total": 5 }, doc! { "total": 7 }])
                .await
                .unwrap(),
            2
        );
        let stored = store.documents("orders");
        assert_eq!(stored[1].keys().next().map(String::as_str), Some("_id"));

        let err = orders
            .insert_many(vec![doc! { "_id": 1_i64 }])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate key"));
        assert_eq!(orders.count(doc! {}).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_update_delete() {
        let store = MemoryStore::new("shop");
        let orders = orders(&store);
        orders
            .insert_many(vec![doc! { "_id": 1, "status": "new", "total": 5 }])
            .await
            .unwrap();

        let outcome = orders
            .replace_one(doc! { "_id": 1 }, doc! { "status": "paid" })
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1 });
        assert_eq!(store.documents("orders"), vec![doc! { "_id": 1, "status": "paid" }]);

        let outcome = orders
            .update_one(doc! { "_id": 1 }, doc! { "$set": { "total": 9 }, "$unset": { "status": "" } })
            .await
            .unwrap();
        assert_eq!(outcome.modified, 1);
        assert_eq!(store.documents("orders"), vec![doc! { "_id": 1, "total": 9 }]);

        let missing = orders
            .update_one(doc! { "_id": 2 }, doc! { "$set": { "total": 1 } })
            .await
            .unwrap();
        assert_eq!(missing, UpdateOutcome::default());

        assert!(orders.update_one(doc! { "_id": 1 }, doc! { "$inc": { "total": 1 } }).await.is_err());

        assert_eq!(orders.delete_one(doc! { "_id": 1 }).await.unwrap(), 1);
        assert_eq!(orders.delete_one(doc! { "_id": 1 }).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_indexes_is_idempotent() {
        let store = MemoryStore::new("shop");
        let orders = orders(&store);
        let names = orders
            .create_indexes(vec![IndexDefinition::ascending("sku")])
            .await
            .unwrap();
        orders
            .create_indexes(vec![IndexDefinition::ascending("sku")])
            .await
            .unwrap();
        assert_eq!(names, vec!["sku_1".to_string()]);
        assert_eq!(store.index_names("orders"), names);
    }
}
