//! Document store over the official MongoDB driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{debug, info};

use crate::config::{CollectionSettings, MongoConfig, MongoConfigBuilder};
use crate::error::{MongoError, MongoResult};
use crate::index::IndexDefinition;
use crate::mapping::MappingRegistry;
use crate::store::{CollectionBackend, DocumentStore, UpdateOutcome, validate_collection_name};

/// A MongoDB database with its own mapping registry.
///
/// The driver pools connections internally; share one store (behind an
/// `Arc`) across contexts.
pub struct MongoStore {
    client: Client,
    database: Database,
    config: Arc<MongoConfig>,
    collection_settings: HashMap<String, CollectionSettings>,
    mappings: MappingRegistry,
}

impl MongoStore {
    /// Connect using the given configuration.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let options = config.to_client_options().await?;

        let client = Client::with_options(options)
            .map_err(|e| MongoError::connection(format!("failed to create client: {}", e)))?;
        let database = client.database(&config.database);

        info!(
            uri = %config.uri,
            database = %config.database,
            "MongoDB store connected"
        );

        Ok(Self {
            client,
            database,
            config: Arc::new(config),
            collection_settings: HashMap::new(),
            mappings: MappingRegistry::new(),
        })
    }

    /// Create a builder.
    pub fn builder() -> MongoStoreBuilder {
        MongoStoreBuilder::default()
    }

    /// Default settings for a collection, used when a binding passes none.
    pub fn with_collection_settings(
        mut self,
        collection: impl Into<String>,
        settings: CollectionSettings,
    ) -> Self {
        self.collection_settings.insert(collection.into(), settings);
        self
    }

    /// Underlying database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Connection configuration.
    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// Ping the server.
    pub async fn is_healthy(&self) -> bool {
        self.database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .is_ok()
    }

    /// Names of the collections in the database.
    pub async fn list_collections(&self) -> MongoResult<Vec<String>> {
        Ok(self.database.list_collection_names(None).await?)
    }

    /// Drop a collection.
    pub async fn drop_collection(&self, name: &str) -> MongoResult<()> {
        debug!(collection = %name, "Dropping collection");
        self.database
            .collection::<Document>(name)
            .drop(None)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for MongoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStore")
            .field("database", &self.config.database)
            .field("collection_settings", &self.collection_settings)
            .field("mappings", &self.mappings)
            .finish()
    }
}

impl DocumentStore for MongoStore {
    fn database_name(&self) -> &str {
        &self.config.database
    }

    fn collection(
        &self,
        name: &str,
        settings: Option<&CollectionSettings>,
    ) -> MongoResult<Arc<dyn CollectionBackend>> {
        validate_collection_name(name)?;

        let settings = settings.or_else(|| self.collection_settings.get(name));
        let inner = match settings {
            Some(settings) if !settings.is_empty() => self
                .database
                .collection_with_options::<Document>(name, settings.to_collection_options()),
            _ => self.database.collection::<Document>(name),
        };
        Ok(Arc::new(MongoCollection { inner }))
    }

    fn mappings(&self) -> &MappingRegistry {
        &self.mappings
    }
}

/// Builder for [`MongoStore`].
#[derive(Debug, Default)]
pub struct MongoStoreBuilder {
    config: MongoConfigBuilder,
    collection_settings: HashMap<String, CollectionSettings>,
}

impl MongoStoreBuilder {
    /// Set the connection URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.config = self.config.uri(uri);
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config = self.config.database(database);
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.app_name(name);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.config = self.config.max_pool_size(size);
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.config = self.config.min_pool_size(size);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    /// Enable direct connection.
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.config = self.config.direct_connection(enabled);
        self
    }

    /// Default settings for a collection.
    pub fn collection_settings(
        mut self,
        collection: impl Into<String>,
        settings: CollectionSettings,
    ) -> Self {
        self.collection_settings.insert(collection.into(), settings);
        self
    }

    /// Connect.
    pub async fn build(self) -> MongoResult<MongoStore> {
        let config = self.config.build()?;
        let mut store = MongoStore::connect(config).await?;
        store.collection_settings = self.collection_settings;
        Ok(store)
    }
}

/// A collection of [`MongoStore`].
#[derive(Debug, Clone)]
pub struct MongoCollection {
    inner: Collection<Document>,
}

impl MongoCollection {
    /// Underlying driver collection.
    pub fn inner(&self) -> &Collection<Document> {
        &self.inner
    }
}

fn index_model(index: IndexDefinition) -> IndexModel {
    let mut options = IndexOptions::default();
    options.name = index.name().map(str::to_string);
    if index.is_unique() {
        options.unique = Some(true);
    }
    if index.is_sparse() {
        options.sparse = Some(true);
    }
    options.expire_after = index.ttl();

    let mut model = IndexModel::default();
    model.keys = index.keys().clone();
    model.options = Some(options);
    model
}

#[async_trait]
impl CollectionBackend for MongoCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn insert_many(&self, docs: Vec<Document>) -> MongoResult<u64> {
        if docs.is_empty() {
            return Ok(0);
        }
        let result = self.inner.insert_many(docs, None).await?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn find(&self, filter: Document) -> MongoResult<Vec<Document>> {
        let cursor = self.inner.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_one(&self, filter: Document) -> MongoResult<Option<Document>> {
        Ok(self.inner.find_one(filter, None).await?)
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
    ) -> MongoResult<UpdateOutcome> {
        let result = self.inner.replace_one(filter, replacement, None).await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn update_one(&self, filter: Document, update: Document) -> MongoResult<UpdateOutcome> {
        let result = self.inner.update_one(filter, update, None).await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_one(&self, filter: Document) -> MongoResult<u64> {
        Ok(self.inner.delete_one(filter, None).await?.deleted_count)
    }

    async fn count(&self, filter: Document) -> MongoResult<u64> {
        Ok(self.inner.count_documents(filter, None).await?)
    }

    async fn create_indexes(&self, indexes: Vec<IndexDefinition>) -> MongoResult<Vec<String>> {
        if indexes.is_empty() {
            return Ok(Vec::new());
        }
        let models: Vec<_> = indexes.into_iter().map(index_model).collect();
        let result = self.inner.create_indexes(models, None).await?;
        Ok(result.index_names)
    }
}
