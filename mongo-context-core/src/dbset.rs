//! Typed collection members.

use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};
use serde::Serialize;
use tracing::trace;

use crate::entity::KeyDescriptor;
use crate::error::{MongoError, MongoResult};
use crate::field::{Entity, entity_name};
use crate::filter::{KeyFilter, build_key_filter, build_keys_filter};
use crate::mapping::{DocumentMap, ID_ELEMENT};
use crate::store::{CollectionBackend, UpdateOutcome};

struct Wired<T> {
    collection: Arc<dyn CollectionBackend>,
    key: Option<KeyDescriptor>,
    map: Arc<DocumentMap<T>>,
}

/// The collection of one entity type, as seen from a context.
///
/// A default `DbSet` is unwired; every operation on it fails with a
/// configuration error until a [`crate::ContextConfiguration`] assigns a wired
/// one.
pub struct DbSet<T> {
    wired: Option<Arc<Wired<T>>>,
}

impl<T> Default for DbSet<T> {
    fn default() -> Self {
        Self { wired: None }
    }
}

impl<T> Clone for DbSet<T> {
    fn clone(&self) -> Self {
        Self {
            wired: self.wired.clone(),
        }
    }
}

impl<T> fmt::Debug for DbSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSet")
            .field("entity", &entity_name::<T>())
            .field("collection", &self.name())
            .field("key", &self.wired.as_ref().and_then(|w| w.key))
            .finish()
    }
}

impl<T> DbSet<T> {
    /// Collection name, if wired.
    pub fn name(&self) -> Option<&str> {
        self.wired.as_ref().map(|w| w.collection.name())
    }

    /// Whether a context wired this set.
    pub fn is_wired(&self) -> bool {
        self.wired.is_some()
    }
}

impl<T: Entity> DbSet<T> {
    pub(crate) fn new(
        collection: Arc<dyn CollectionBackend>,
        key: Option<KeyDescriptor>,
        map: Arc<DocumentMap<T>>,
    ) -> Self {
        Self {
            wired: Some(Arc::new(Wired {
                collection,
                key,
                map,
            })),
        }
    }

    fn wired(&self) -> MongoResult<&Wired<T>> {
        self.wired.as_deref().ok_or_else(|| {
            MongoError::config(format!(
                "DbSet<{}> is not wired to a context",
                entity_name::<T>()
            ))
        })
    }

    /// Underlying collection.
    pub fn collection(&self) -> MongoResult<&Arc<dyn CollectionBackend>> {
        Ok(&self.wired()?.collection)
    }

    /// Declared key, if any.
    pub fn key(&self) -> Option<&KeyDescriptor> {
        self.wired.as_ref().and_then(|w| w.key.as_ref())
    }

    /// Serialize an entity into its stored document.
    pub fn to_document(&self, entity: &T) -> MongoResult<Document> {
        self.wired()?.map.to_document(entity)
    }

    /// Deserialize an entity from its stored document.
    pub fn from_document(&self, doc: &Document) -> MongoResult<T> {
        self.wired()?.map.from_document(doc)
    }

    fn decode_all(&self, docs: Vec<Document>) -> MongoResult<Vec<T>> {
        let map = &self.wired()?.map;
        docs.iter().map(|doc| map.from_document(doc)).collect()
    }

    /// Equality filter on the declared key.
    pub fn key_filter<K>(&self, key: &K) -> MongoResult<KeyFilter>
    where
        K: Serialize + ?Sized,
    {
        build_key_filter(self.wired()?.key.as_ref(), entity_name::<T>(), key)
    }

    /// Insert one entity.
    pub async fn insert_one(&self, entity: &T) -> MongoResult<()> {
        let doc = self.to_document(entity)?;
        self.wired()?.collection.insert_many(vec![doc]).await?;
        Ok(())
    }

    /// Insert entities, returning how many were inserted.
    pub async fn insert_many(&self, entities: &[T]) -> MongoResult<u64> {
        let docs = entities
            .iter()
            .map(|entity| self.to_document(entity))
            .collect::<MongoResult<Vec<_>>>()?;
        self.wired()?.collection.insert_many(docs).await
    }

    /// Entities matching a raw filter.
    pub async fn find(&self, filter: Document) -> MongoResult<Vec<T>> {
        let docs = self.wired()?.collection.find(filter).await?;
        self.decode_all(docs)
    }

    /// First entity matching a raw filter.
    pub async fn find_one(&self, filter: Document) -> MongoResult<Option<T>> {
        match self.wired()?.collection.find_one(filter).await? {
            Some(doc) => Ok(Some(self.from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Count entities matching a raw filter.
    pub async fn count(&self, filter: Document) -> MongoResult<u64> {
        self.wired()?.collection.count(filter).await
    }

    /// Entity with the given key.
    pub async fn find_by_key<K>(&self, key: &K) -> MongoResult<Option<T>>
    where
        K: Serialize + ?Sized,
    {
        let filter = self.key_filter(key)?;
        trace!(entity = entity_name::<T>(), key = %filter.value(), "Find by key");
        self.find_one(filter.into()).await
    }

    /// Entities with any of the given keys.
    pub async fn find_by_keys<K: Serialize>(&self, keys: &[K]) -> MongoResult<Vec<T>> {
        let filter = build_keys_filter(self.wired()?.key.as_ref(), entity_name::<T>(), keys)?;
        self.find(filter).await
    }

    /// Replace the stored entity that has the same key as `entity`.
    pub async fn replace_by_key(&self, entity: &T) -> MongoResult<UpdateOutcome> {
        let wired = self.wired()?;
        let mut doc = wired.map.to_document(entity)?;
        let id = doc.remove(ID_ELEMENT).unwrap_or(Bson::Null);
        let filter = build_key_filter(wired.key.as_ref(), entity_name::<T>(), &id)?;
        wired.collection.replace_one(filter.into(), doc).await
    }

    /// Apply an update document to the entity with the given key.
    pub async fn update_by_key<K>(&self, key: &K, update: Document) -> MongoResult<UpdateOutcome>
    where
        K: Serialize + ?Sized,
    {
        let filter = self.key_filter(key)?;
        self.wired()?.collection.update_one(filter.into(), update).await
    }

    /// Delete the entity with the given key. Returns whether one was deleted.
    pub async fn delete_by_key<K>(&self, key: &K) -> MongoResult<bool>
    where
        K: Serialize + ?Sized,
    {
        let filter = self.key_filter(key)?;
        Ok(self.wired()?.collection.delete_one(filter.into()).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field;
    use crate::memory::MemoryStore;
    use crate::store::DocumentStore;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Account {
        login: String,
        balance: i64,
    }

    fn account(login: &str, balance: i64) -> Account {
        Account {
            login: login.to_string(),
            balance,
        }
    }

    fn accounts(keyed: bool) -> (Arc<MemoryStore>, DbSet<Account>) {
        let store = Arc::new(MemoryStore::new("bank"));
        let mut map = DocumentMap::new();
        let key = keyed.then(|| {
            map.map_id(field!(Account, login).name());
            KeyDescriptor::new("Account", "login")
        });
        let collection = store.collection("accounts", None).unwrap();
        (store, DbSet::new(collection, key, Arc::new(map)))
    }

    #[tokio::test]
    async fn test_unwired_set_reports_configuration_error() {
        let set = DbSet::<Account>::default();
        assert!(!set.is_wired());
        assert_eq!(set.name(), None);
        let err = set.count(doc! {}).await.unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Account"));
    }

    #[tokio::test]
    async fn test_by_key_operations() {
        let (store, set) = accounts(true);
        set.insert_many(&[account("ann", 10), account("bob", 20), account("cy", 30)])
            .await
            .unwrap();
        assert_eq!(store.documents("accounts")[0], doc! { "_id": "ann", "balance": 10_i64 });

        assert_eq!(set.find_by_key("bob").await.unwrap(), Some(account("bob", 20)));
        assert_eq!(set.find_by_key("dan").await.unwrap(), None);

        let mut found = set.find_by_keys(&["cy", "ann"]).await.unwrap();
        found.sort_by(|a, b| a.login.cmp(&b.login));
        assert_eq!(found, vec![account("ann", 10), account("cy", 30)]);

        let outcome = set.replace_by_key(&account("bob", 25)).await.unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(set.find_by_key("bob").await.unwrap(), Some(account("bob", 25)));

        let outcome = set
            .update_by_key("cy", doc! { "$set": { "balance": 31_i64 } })
            .await
            .unwrap();
        assert_eq!(outcome.modified, 1);
        assert_eq!(set.find_by_key("cy").await.unwrap().map(|a| a.balance), Some(31));

        assert!(set.delete_by_key("ann").await.unwrap());
        assert!(!set.delete_by_key("ann").await.unwrap());
        assert_eq!(set.count(doc! {}).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_by_key_without_declared_key() {
        let (_, set) = accounts(false);
        set.insert_one(&account("ann", 1)).await.unwrap();

        assert!(set.find_by_key("ann").await.unwrap_err().is_key_not_declared());
        assert!(set.delete_by_key("ann").await.unwrap_err().is_key_not_declared());
        assert!(
            set.replace_by_key(&account("ann", 2))
                .await
                .unwrap_err()
                .is_key_not_declared()
        );
        assert_eq!(
            set.find(doc! { "login": "ann" }).await.unwrap(),
            vec![account("ann", 1)]
        );
    }
}
