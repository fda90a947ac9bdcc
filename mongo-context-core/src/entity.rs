//! Per-entity configuration.
//!
//! An [`EntityConfiguration`] accumulates everything a context knows about one
//! entity type: the collection it lives in, its key field, reference fields,
//! a custom document mapper and indexes waiting for the collection to exist.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codec::{FieldCodec, ReferenceCodec};
use crate::config::CollectionSettings;
use crate::error::{MongoError, MongoResult};
use crate::field::{Entity, Field, entity_name};
use crate::index::IndexDefinition;
use crate::mapping::{DocumentMap, MappingRegistry};
use crate::store::{CollectionBackend, DocumentStore};

/// The declared key of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDescriptor {
    entity: &'static str,
    field: &'static str,
}

impl KeyDescriptor {
    /// Describe `field` as the key of `entity`.
    pub const fn new(entity: &'static str, field: &'static str) -> Self {
        Self { entity, field }
    }

    /// Entity type name.
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Key field name.
    pub fn field(&self) -> &'static str {
        self.field
    }
}

/// Field types that can hold related entities stored as a key list.
pub trait ReferenceCollection<R> {}

impl<R> ReferenceCollection<R> for Vec<R> {}
impl<R> ReferenceCollection<R> for Option<Vec<R>> {}

/// A field of the entity that stores related entities by key.
#[derive(Clone)]
pub struct ReferenceMapping {
    target: &'static str,
    target_key: &'static str,
    source_field: &'static str,
    element: String,
    codec: Arc<dyn FieldCodec>,
}

impl ReferenceMapping {
    /// Related entity type name.
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Key field of the related entity.
    pub fn target_key(&self) -> &'static str {
        self.target_key
    }

    /// Field on this entity holding the related entities.
    pub fn source_field(&self) -> &'static str {
        self.source_field
    }

    /// Element name in stored documents.
    pub fn element(&self) -> &str {
        &self.element
    }

    /// Codec applied to the field.
    pub fn codec(&self) -> &Arc<dyn FieldCodec> {
        &self.codec
    }
}

impl fmt::Debug for ReferenceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceMapping")
            .field("target", &self.target)
            .field("target_key", &self.target_key)
            .field("source_field", &self.source_field)
            .field("element", &self.element)
            .finish()
    }
}

type DocumentMapper<T> = Arc<dyn Fn(&mut DocumentMap<T>) + Send + Sync>;

/// Indexes drained from a configuration, ready to submit.
#[derive(Debug)]
pub struct PendingIndexes {
    entity: &'static str,
    collection: Arc<dyn CollectionBackend>,
    indexes: Vec<IndexDefinition>,
}

impl PendingIndexes {
    /// Entity the indexes belong to.
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Indexes to create.
    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    /// Create the indexes, returning their names.
    pub async fn submit(self) -> MongoResult<Vec<String>> {
        debug!(
            entity = self.entity,
            collection = %self.collection.name(),
            count = self.indexes.len(),
            "Creating indexes"
        );
        self.collection.create_indexes(self.indexes).await
    }
}

/// Configuration of one entity type.
pub struct EntityConfiguration<T> {
    store: Arc<dyn DocumentStore>,
    collection: Option<Arc<dyn CollectionBackend>>,
    key: Option<KeyDescriptor>,
    references: Vec<ReferenceMapping>,
    mapper: Option<DocumentMapper<T>>,
    pending_indexes: Vec<IndexDefinition>,
}

impl<T: Entity> EntityConfiguration<T> {
    /// Create an empty configuration against a store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            collection: None,
            key: None,
            references: Vec::new(),
            mapper: None,
            pending_indexes: Vec::new(),
        }
    }

    /// Entity type name.
    pub fn entity_name(&self) -> &'static str {
        entity_name::<T>()
    }

    /// Resolve the collection `T` is stored in.
    ///
    /// The handle is cached; later calls return it without resolving again,
    /// whatever name they pass.
    pub fn bind_collection(
        &mut self,
        name: &str,
        settings: Option<&CollectionSettings>,
    ) -> MongoResult<Arc<dyn CollectionBackend>> {
        if let Some(collection) = &self.collection {
            if collection.name() != name {
                debug!(
                    entity = self.entity_name(),
                    bound = %collection.name(),
                    requested = %name,
                    "Collection already bound, keeping existing handle"
                );
            }
            return Ok(collection.clone());
        }

        let collection = self.store.collection(name, settings)?;
        debug!(
            entity = self.entity_name(),
            collection = %name,
            database = %self.store.database_name(),
            "Bound collection"
        );
        self.collection = Some(collection.clone());
        Ok(collection)
    }

    /// Declare the key field. A later declaration replaces an earlier one.
    pub fn declare_key<K>(&mut self, key: Field<T, K>) -> &mut Self {
        self.key = Some(KeyDescriptor::new(entity_name::<T>(), key.name()));
        self
    }

    /// Customize the document map. A later callback replaces an earlier one.
    pub fn declare_document_mapping<F>(&mut self, mapper: F) -> &mut Self
    where
        F: Fn(&mut DocumentMap<T>) + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Store `source` as the list of `target_key` values of its entities.
    ///
    /// `element` renames the stored element; it defaults to the field name.
    pub fn declare_reference<R, K, S>(
        &mut self,
        target_key: Field<R, K>,
        source: Field<T, S>,
        element: Option<&str>,
    ) -> &mut Self
    where
        R: Entity + Default,
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        S: ReferenceCollection<R>,
    {
        let element = element.unwrap_or(source.name()).to_string();
        let codec = ReferenceCodec::new(target_key).for_element(element.clone());
        self.references.push(ReferenceMapping {
            target: entity_name::<R>(),
            target_key: target_key.name(),
            source_field: source.name(),
            element,
            codec: Arc::new(codec),
        });
        self
    }

    /// Request indexes, created once the collection is resolved.
    pub fn declare_index(&mut self, indexes: impl IntoIterator<Item = IndexDefinition>) -> &mut Self {
        self.pending_indexes.extend(indexes);
        self
    }

    fn has_mappings(&self) -> bool {
        self.key.is_some() || !self.references.is_empty() || self.mapper.is_some()
    }

    /// Build the document map from the declarations.
    ///
    /// Order: key, references, then the custom mapper.
    pub fn build_document_map(&self) -> DocumentMap<T> {
        let mut map = DocumentMap::new();
        if let Some(key) = &self.key {
            map.map_id(key.field());
        }
        for reference in &self.references {
            map.map_member(reference.source_field)
                .set_element_name(reference.element.clone())
                .set_codec(reference.codec.clone());
        }
        if let Some(mapper) = &self.mapper {
            mapper(&mut map);
        }
        map
    }

    /// Register the document map with the registry, replacing any previous
    /// map for `T`. Does nothing when no mapping was declared.
    ///
    /// Returns whether a map was registered.
    pub fn apply_mappings(&self, registry: &MappingRegistry) -> MongoResult<bool> {
        if !self.has_mappings() {
            return Ok(false);
        }
        registry.unregister::<T>();
        registry.register(self.build_document_map())?;
        Ok(true)
    }

    /// The pending indexes, ready to submit to the bound collection.
    ///
    /// Index keys name entity members; they are mapped to stored element
    /// names (the key member becomes `_id`). The requests stay pending until
    /// [`EntityConfiguration::acknowledge_indexes`] confirms them.
    ///
    /// Fails with [`MongoError::CollectionNotResolved`] if indexes are pending
    /// but no collection was bound.
    pub fn pending_batch(&self) -> MongoResult<Option<PendingIndexes>> {
        if self.pending_indexes.is_empty() {
            return Ok(None);
        }
        let collection = self
            .collection
            .clone()
            .ok_or_else(|| MongoError::CollectionNotResolved {
                entity: self.entity_name().to_string(),
            })?;
        let map = self.build_document_map();
        let indexes = self
            .pending_indexes
            .iter()
            .map(|index| index.with_renamed_keys(|member| map.element_name(member).to_string()))
            .collect();
        Ok(Some(PendingIndexes {
            entity: self.entity_name(),
            collection,
            indexes,
        }))
    }

    /// Drop the first `count` pending requests once they were created.
    pub fn acknowledge_indexes(&mut self, count: usize) {
        let count = count.min(self.pending_indexes.len());
        self.pending_indexes.drain(..count);
    }

    /// Create all pending indexes, returning their names.
    ///
    /// Requests are only dropped after the collection accepted them.
    pub async fn apply_indexes(&mut self) -> MongoResult<Vec<String>> {
        let Some(pending) = self.pending_batch()? else {
            return Ok(Vec::new());
        };
        let count = pending.indexes().len();
        let names = pending.submit().await?;
        self.acknowledge_indexes(count);
        Ok(names)
    }

    /// Resolved collection, if any.
    pub fn collection(&self) -> Option<&Arc<dyn CollectionBackend>> {
        self.collection.as_ref()
    }

    /// Declared key, if any.
    pub fn key(&self) -> Option<&KeyDescriptor> {
        self.key.as_ref()
    }

    /// Declared key field name, if any.
    pub fn key_field(&self) -> Option<&'static str> {
        self.key.map(|key| key.field())
    }

    /// Declared reference mappings in declaration order.
    pub fn references(&self) -> &[ReferenceMapping] {
        &self.references
    }

    /// Indexes not yet submitted.
    pub fn pending_indexes(&self) -> &[IndexDefinition] {
        &self.pending_indexes
    }

    /// Store this configuration resolves collections against.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }
}

impl<T> Clone for EntityConfiguration<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            collection: self.collection.clone(),
            key: self.key,
            references: self.references.clone(),
            mapper: self.mapper.clone(),
            pending_indexes: self.pending_indexes.clone(),
        }
    }
}

impl<T> fmt::Debug for EntityConfiguration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityConfiguration")
            .field("entity", &entity_name::<T>())
            .field("collection", &self.collection.as_ref().map(|c| c.name().to_string()))
            .field("key", &self.key)
            .field("references", &self.references)
            .field("has_mapper", &self.mapper.is_some())
            .field("pending_indexes", &self.pending_indexes.len())
            .finish()
    }
}

/// Object-safe view of an [`EntityConfiguration`] of any entity type.
pub trait ErasedEntityConfiguration: Send + Sync {
    /// Entity type name.
    fn entity_name(&self) -> &'static str;

    /// Declared key, if any.
    fn key(&self) -> Option<&KeyDescriptor>;

    /// Name of the resolved collection, if any.
    fn collection_name(&self) -> Option<&str>;

    /// See [`EntityConfiguration::apply_mappings`].
    fn apply_mappings(&self, registry: &MappingRegistry) -> MongoResult<bool>;

    /// See [`EntityConfiguration::pending_batch`].
    fn pending_batch(&self) -> MongoResult<Option<PendingIndexes>>;

    /// See [`EntityConfiguration::acknowledge_indexes`].
    fn acknowledge_indexes(&mut self, count: usize);

    /// Boxed copy, used to roll back a failed configuration pass.
    fn clone_box(&self) -> Box<dyn ErasedEntityConfiguration>;

    /// Upcast for downcasting to the concrete configuration.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Entity> ErasedEntityConfiguration for EntityConfiguration<T> {
    fn entity_name(&self) -> &'static str {
        entity_name::<T>()
    }

    fn key(&self) -> Option<&KeyDescriptor> {
        self.key.as_ref()
    }

    fn collection_name(&self) -> Option<&str> {
        self.collection.as_ref().map(|c| c.name())
    }

    fn apply_mappings(&self, registry: &MappingRegistry) -> MongoResult<bool> {
        EntityConfiguration::apply_mappings(self, registry)
    }

    fn pending_batch(&self) -> MongoResult<Option<PendingIndexes>> {
        EntityConfiguration::pending_batch(self)
    }

    fn acknowledge_indexes(&mut self, count: usize) {
        EntityConfiguration::acknowledge_indexes(self, count)
    }

    fn clone_box(&self) -> Box<dyn ErasedEntityConfiguration> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl fmt::Debug for dyn ErasedEntityConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityConfiguration")
            .field("entity", &self.entity_name())
            .field("collection", &self.collection_name())
            .field("key", &self.key())
            .finish()
    }
}
