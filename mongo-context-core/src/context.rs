//! Context configuration engine.
//!
//! A context type implements [`MongoContext`]: it declares its collection
//! members and, optionally, configures entities in
//! [`MongoContext::on_configuring`]. The [`ContextConfiguration`] for that type
//! runs the configuration callback and registers document maps exactly once,
//! then wires the members of every instance it constructs.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mongo_context_core::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Order {
//!     id: i64,
//!     total: i64,
//! }
//!
//! #[derive(Default)]
//! struct ShopContext {
//!     orders: DbSet<Order>,
//! }
//!
//! impl MongoContext for ShopContext {
//!     fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
//!         config.entity::<Order, _>(|order| {
//!             order.declare_key(field!(Order, id));
//!             Ok(())
//!         })
//!     }
//!
//!     fn members(members: &mut ContextMembers<Self>) {
//!         members.collection("orders", |ctx, set| ctx.orders = set);
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::new("shop"));
//! let config = ContextConfiguration::new::<ShopContext>(store);
//! let shop: ShopContext = config.create().await?;
//!
//! shop.orders.insert_one(&Order { id: 1, total: 20 }).await?;
//! assert_eq!(shop.orders.find_by_key(&1_i64).await?.map(|o| o.total), Some(20));
//! # Ok::<(), MongoError>(())
//! # }).unwrap();
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::assembly::{ConfigurationAssembly, TypeEntry};
use crate::dbset::DbSet;
use crate::entity::{EntityConfiguration, ErasedEntityConfiguration, PendingIndexes};
use crate::error::{MongoError, MongoResult};
use crate::field::{Entity, entity_name};
use crate::filter::{KeyFilter, build_key_filter};
use crate::store::DocumentStore;

/// Lifecycle of a [`ContextConfiguration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationState {
    /// The configuration callback has not run.
    Unconfigured,
    /// Entities and mappings are configured; the first instance is being wired.
    Configuring,
    /// At least one instance was fully wired.
    Configured,
}

impl ConfigurationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unconfigured,
            1 => Self::Configuring,
            _ => Self::Configured,
        }
    }
}

/// A context type: a set of typed collection members.
pub trait MongoContext: Default + Send + Sync + 'static {
    /// Configure entities. Runs once per [`ContextConfiguration`], on the
    /// first instance constructed.
    ///
    /// Other constructions wait until it returns. If it fails, every entity
    /// configuration is rolled back to its state before the call and the next
    /// construction runs it again.
    fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
        let _ = config;
        Ok(())
    }

    /// Declare the collection members of the context.
    fn members(members: &mut ContextMembers<Self>);
}

type Wire<C> = Box<dyn Fn(&ContextConfiguration, &str, &mut C) -> MongoResult<()> + Send + Sync>;

struct MemberBinding<C> {
    name: String,
    entity: &'static str,
    wire: Wire<C>,
}

/// Collection members declared by a context.
pub struct ContextMembers<C> {
    members: Vec<MemberBinding<C>>,
}

impl<C: MongoContext> ContextMembers<C> {
    fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// Declare a member holding the `DbSet<T>` for `name`.
    ///
    /// Unless the entity was bound to a collection during configuration, its
    /// collection is named after the member.
    pub fn collection<T: Entity>(&mut self, name: &str, assign: fn(&mut C, DbSet<T>)) -> &mut Self {
        self.members.push(MemberBinding {
            name: name.to_string(),
            entity: entity_name::<T>(),
            wire: Box::new(move |config: &ContextConfiguration, member: &str, context: &mut C| {
                let set = config.wire_member::<T>(member)?;
                assign(context, set);
                Ok(())
            }),
        });
        self
    }

    /// Declared member names, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// Sort by member name and reject duplicates.
    fn into_sorted(mut self) -> MongoResult<Vec<MemberBinding<C>>> {
        self.members.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = self.members.windows(2).find(|pair| pair[0].name == pair[1].name) {
            return Err(MongoError::config(format!(
                "context {} declares member '{}' more than once",
                entity_name::<C>(),
                pair[0].name
            )));
        }
        Ok(self.members)
    }
}

impl<C> fmt::Debug for ContextMembers<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.members.iter().map(|m| (&m.name, m.entity)))
            .finish()
    }
}

type SharedKey = (TypeId, String);

type EntityMap = IndexMap<TypeId, Box<dyn ErasedEntityConfiguration>>;

static SHARED: LazyLock<Mutex<HashMap<SharedKey, Arc<ContextConfiguration>>>> =
    LazyLock::new(Default::default);

/// Configuration shared by every instance of one context type against one
/// store.
pub struct ContextConfiguration {
    context_type: TypeId,
    context_name: &'static str,
    store: Arc<dyn DocumentStore>,
    state: AtomicU8,
    configuring: Mutex<()>,
    index_submission: futures::lock::Mutex<()>,
    entities: RwLock<EntityMap>,
}

impl ContextConfiguration {
    /// Create a configuration for context type `C`.
    pub fn new<C: MongoContext>(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            context_type: TypeId::of::<C>(),
            context_name: entity_name::<C>(),
            store,
            state: AtomicU8::new(ConfigurationState::Unconfigured as u8),
            configuring: Mutex::new(()),
            index_submission: futures::lock::Mutex::new(()),
            entities: RwLock::new(IndexMap::new()),
        }
    }

    /// The process-wide configuration for `C` and the store's database.
    ///
    /// Built on first use; later calls for the same database return it,
    /// whatever store they pass.
    pub fn shared<C: MongoContext>(store: Arc<dyn DocumentStore>) -> Arc<Self> {
        let key = (TypeId::of::<C>(), store.database_name().to_string());
        SHARED
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Self::new::<C>(store)))
            .clone()
    }

    /// Current state.
    pub fn state(&self) -> ConfigurationState {
        ConfigurationState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConfigurationState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Store the context's collections live in.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Context type name.
    pub fn context_name(&self) -> &'static str {
        self.context_name
    }

    /// Number of configured entity types.
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    /// Configured entity type names, in configuration order.
    pub fn entity_names(&self) -> Vec<&'static str> {
        self.entities.read().values().map(|e| e.entity_name()).collect()
    }

    /// Build a context instance and wire its members.
    pub async fn create<C: MongoContext>(&self) -> MongoResult<C> {
        let mut context = C::default();
        self.configure(&mut context).await?;
        Ok(context)
    }

    /// Wire the members of a context instance.
    ///
    /// The first call runs [`MongoContext::on_configuring`] and registers
    /// document maps; if that fails the configuration stays
    /// [`ConfigurationState::Unconfigured`] and the next call retries.
    /// Pending indexes are created before any call returns; requests that
    /// fail stay pending and are retried by the next call.
    pub async fn configure<C: MongoContext>(&self, context: &mut C) -> MongoResult<()> {
        if TypeId::of::<C>() != self.context_type {
            return Err(MongoError::config(format!(
                "configuration for {} cannot configure {}",
                self.context_name,
                entity_name::<C>()
            )));
        }

        if self.state() == ConfigurationState::Unconfigured {
            let _configuring = self.configuring.lock();
            if self.state() == ConfigurationState::Unconfigured {
                let registered = self.run_configuring(context)?;
                self.set_state(ConfigurationState::Configuring);
                info!(
                    context = self.context_name,
                    database = %self.store.database_name(),
                    entities = self.entity_count(),
                    mappings = registered,
                    "Context configured"
                );
            }
        }

        let mut members = ContextMembers::<C>::new();
        C::members(&mut members);
        for member in members.into_sorted()? {
            (member.wire)(self, &member.name, context)?;
            debug!(
                context = self.context_name,
                member = %member.name,
                entity = member.entity,
                "Wired member"
            );
        }

        self.submit_pending_indexes().await?;

        self.set_state(ConfigurationState::Configured);
        Ok(())
    }

    /// Configure entity `T`, creating its configuration on first use.
    ///
    /// `build` runs under the entity lock; it must not call back into this
    /// configuration.
    pub fn entity<T, R>(
        &self,
        build: impl FnOnce(&mut EntityConfiguration<T>) -> MongoResult<R>,
    ) -> MongoResult<R>
    where
        T: Entity,
    {
        let mut entities = self.entities.write();
        let entity = Self::entry::<T>(&mut entities, &self.store)?;
        build(entity)
    }

    /// Inspect the configuration of `T`, if it exists.
    pub fn with_entity<T, R>(&self, inspect: impl FnOnce(&EntityConfiguration<T>) -> R) -> Option<R>
    where
        T: Entity,
    {
        let entities = self.entities.read();
        let entity = entities
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<EntityConfiguration<T>>()?;
        Some(inspect(entity))
    }

    /// Equality filter on the key of `T`.
    ///
    /// Fails with [`MongoError::KeyNotDeclared`] if `T` has no declared key.
    pub fn filter_by_key<T, K>(&self, key: &K) -> MongoResult<KeyFilter>
    where
        T: Entity,
        K: Serialize + ?Sized,
    {
        let entities = self.entities.read();
        let descriptor = entities.get(&TypeId::of::<T>()).and_then(|e| e.key().copied());
        build_key_filter(descriptor.as_ref(), entity_name::<T>(), key)
    }

    /// Apply every qualifying entity configuration in `assembly`.
    ///
    /// Entries are visited in full-name order. Entries that cannot be
    /// constructed without arguments, that `predicate` rejects, or that are
    /// not entity configurations are skipped. Returns how many were applied.
    pub fn apply_configurations_from_assembly(
        &self,
        assembly: &ConfigurationAssembly,
        predicate: Option<&dyn Fn(&TypeEntry) -> bool>,
    ) -> MongoResult<usize> {
        let mut applied = 0;
        for entry in assembly.entries() {
            if !entry.is_constructible() {
                continue;
            }
            if predicate.is_some_and(|accept| !accept(&entry)) {
                continue;
            }
            if ConfigurationAssembly::apply_entry(&entry, self)? {
                debug!(
                    assembly = %assembly.name(),
                    configuration = entry.full_name(),
                    "Applied entity configuration"
                );
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn entry<'a, T: Entity>(
        entities: &'a mut EntityMap,
        store: &Arc<dyn DocumentStore>,
    ) -> MongoResult<&'a mut EntityConfiguration<T>> {
        entities
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(EntityConfiguration::<T>::new(store.clone())))
            .as_any_mut()
            .downcast_mut::<EntityConfiguration<T>>()
            .ok_or_else(|| {
                MongoError::internal(format!(
                    "entity configuration for {} has the wrong type",
                    entity_name::<T>()
                ))
            })
    }

    /// Run the user callback and register document maps, restoring the
    /// entity configurations if either fails.
    fn run_configuring<C: MongoContext>(&self, context: &C) -> MongoResult<usize> {
        let snapshot: EntityMap = self
            .entities
            .read()
            .iter()
            .map(|(id, entity)| (*id, entity.clone_box()))
            .collect();

        let result = context
            .on_configuring(self)
            .and_then(|()| self.apply_mappings());
        if result.is_err() {
            debug!(context = self.context_name, "Configuration failed, rolling back entities");
            *self.entities.write() = snapshot;
        }
        result
    }

    fn apply_mappings(&self) -> MongoResult<usize> {
        let entities = self.entities.read();
        let mut registered = 0;
        for entity in entities.values() {
            if entity.apply_mappings(self.store.mappings())? {
                registered += 1;
            }
        }
        Ok(registered)
    }

    /// Create every entity's pending indexes.
    ///
    /// One submission runs at a time, so a construction that finds nothing
    /// pending still waits for an earlier one to finish.
    async fn submit_pending_indexes(&self) -> MongoResult<()> {
        let _submission = self.index_submission.lock().await;
        for (entity, pending) in self.pending_batches()? {
            let count = pending.indexes().len();
            pending.submit().await?;
            self.acknowledge_indexes(entity, count);
        }
        Ok(())
    }

    fn acknowledge_indexes(&self, entity: TypeId, count: usize) {
        if let Some(configuration) = self.entities.write().get_mut(&entity) {
            configuration.acknowledge_indexes(count);
        }
    }

    fn pending_batches(&self) -> MongoResult<Vec<(TypeId, PendingIndexes)>> {
        let entities = self.entities.read();
        let mut pending = Vec::new();
        for (id, entity) in entities.iter() {
            if let Some(batch) = entity.pending_batch()? {
                pending.push((*id, batch));
            }
        }
        Ok(pending)
    }

    fn wire_member<T: Entity>(&self, member: &str) -> MongoResult<DbSet<T>> {
        let mut entities = self.entities.write();
        let entity = Self::entry::<T>(&mut entities, &self.store)?;
        let collection = entity.bind_collection(member, None)?;
        let key = entity.key().copied();
        let map = self.store.mappings().lookup_or_default::<T>();
        Ok(DbSet::new(collection, key, map))
    }
}

impl fmt::Debug for ContextConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextConfiguration")
            .field("context", &self.context_name)
            .field("database", &self.store.database_name())
            .field("state", &self.state())
            .field("entities", &self.entity_names())
            .finish()
    }
}

/// Build a context against the shared configuration for its type and the
/// store's database.
pub async fn create_context<C: MongoContext>(store: Arc<dyn DocumentStore>) -> MongoResult<C> {
    ContextConfiguration::shared::<C>(store).create::<C>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionSettings;
    use crate::field;
    use crate::index::IndexDefinition;
    use crate::mapping::MappingRegistry;
    use crate::memory::MemoryStore;
    use crate::store::{CollectionBackend, UpdateOutcome};
    use async_trait::async_trait;
    use bson::{Document, doc};
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Customer {
        email: String,
        name: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Invoice {
        number: i64,
    }

    static CONFIGURING_RUNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct CrmContext {
        customers: DbSet<Customer>,
        invoices: DbSet<Invoice>,
    }

    impl MongoContext for CrmContext {
        fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
            CONFIGURING_RUNS.fetch_add(1, Ordering::SeqCst);
            config.entity::<Customer, _>(|customer| {
                customer
                    .declare_key(field!(Customer, email))
                    .declare_index([IndexDefinition::ascending("name")]);
                customer.bind_collection("people", None)?;
                Ok(())
            })
        }

        fn members(members: &mut ContextMembers<Self>) {
            members
                .collection("invoices", |ctx, set| ctx.invoices = set)
                .collection("customers", |ctx, set| ctx.customers = set);
        }
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new("crm"))
    }

    #[tokio::test]
    async fn test_configure_wires_members() {
        let store = store();
        let config = ContextConfiguration::new::<CrmContext>(store.clone());
        assert_eq!(config.state(), ConfigurationState::Unconfigured);

        let before = CONFIGURING_RUNS.load(Ordering::SeqCst);
        let first: CrmContext = config.create().await.unwrap();
        let second: CrmContext = config.create().await.unwrap();
        assert_eq!(CONFIGURING_RUNS.load(Ordering::SeqCst), before + 1);
        assert_eq!(config.state(), ConfigurationState::Configured);

        assert_eq!(first.customers.name(), Some("people"));
        assert_eq!(second.customers.name(), Some("people"));
        assert_eq!(first.invoices.name(), Some("invoices"));
        assert_eq!(
            store.collection_names(),
            vec!["people".to_string(), "invoices".to_string()]
        );
        assert_eq!(store.index_names("people"), vec!["name_1".to_string()]);
        assert_eq!(config.entity_names(), vec!["Customer", "Invoice"]);
    }

    #[test]
    fn test_filter_by_key() {
        let config = ContextConfiguration::new::<CrmContext>(store());
        config
            .entity::<Customer, _>(|customer| {
                customer.declare_key(field!(Customer, email));
                Ok(())
            })
            .unwrap();
        config.entity::<Invoice, _>(|_| Ok(())).unwrap();
        assert_eq!(config.entity_count(), 2);

        let filter = config.filter_by_key::<Customer, _>("ann@example.com").unwrap();
        assert_eq!(filter.to_document(), doc! { "_id": "ann@example.com" });

        let err = config.filter_by_key::<Invoice, _>(&5_i64).unwrap_err();
        assert!(err.is_key_not_declared());

        #[derive(Debug, Serialize, Deserialize)]
        struct Unknown;
        assert!(config.filter_by_key::<Unknown, _>(&1).is_err());
    }

    #[tokio::test]
    async fn test_configure_rejects_other_context_type() {
        #[derive(Debug, Default)]
        struct Other;
        impl MongoContext for Other {
            fn members(_: &mut ContextMembers<Self>) {}
        }

        let config = ContextConfiguration::new::<CrmContext>(store());
        let err = config.create::<Other>().await.unwrap_err();
        assert!(err.is_config());
        assert_eq!(config.state(), ConfigurationState::Unconfigured);
    }

    #[tokio::test]
    async fn test_duplicate_member_names() {
        #[derive(Debug, Default)]
        struct Twice {
            a: DbSet<Invoice>,
            b: DbSet<Invoice>,
        }
        impl MongoContext for Twice {
            fn members(members: &mut ContextMembers<Self>) {
                members
                    .collection("invoices", |ctx, set| ctx.a = set)
                    .collection("invoices", |ctx, set| ctx.b = set);
            }
        }

        let config = ContextConfiguration::new::<Twice>(store());
        let err = config.create::<Twice>().await.unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("invoices"));
    }

    #[tokio::test]
    async fn test_failed_configuring_stays_unconfigured() {
        static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug, Default)]
        struct Flaky;
        impl MongoContext for Flaky {
            fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
                if ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                    return config.entity::<Invoice, _>(|invoice| {
                        invoice.bind_collection("system.invoices", None).map(drop)
                    });
                }
                Ok(())
            }
            fn members(_: &mut ContextMembers<Self>) {}
        }

        let config = ContextConfiguration::new::<Flaky>(store());
        let err = config.create::<Flaky>().await.unwrap_err();
        assert!(err.is_collection_resolution_failed());
        assert_eq!(config.state(), ConfigurationState::Unconfigured);

        config.create::<Flaky>().await.unwrap();
        assert_eq!(config.state(), ConfigurationState::Configured);
        assert_eq!(ATTEMPTS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shared_configuration_per_database() {
        #[derive(Default)]
        struct Solo;
        impl MongoContext for Solo {
            fn members(_: &mut ContextMembers<Self>) {}
        }

        let a = ContextConfiguration::shared::<Solo>(Arc::new(MemoryStore::new("one")));
        let b = ContextConfiguration::shared::<Solo>(Arc::new(MemoryStore::new("one")));
        let c = ContextConfiguration::shared::<Solo>(Arc::new(MemoryStore::new("two")));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.store().database_name(), "two");
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: i64,
        total: i64,
    }

    #[derive(Debug, Default)]
    struct LedgerContext {
        entries: DbSet<Entry>,
    }

    impl MongoContext for LedgerContext {
        fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
            config.entity::<Entry, _>(|entry| {
                entry
                    .declare_key(field!(Entry, id))
                    .declare_index([IndexDefinition::ascending("total")]);
                Ok(())
            })
        }

        fn members(members: &mut ContextMembers<Self>) {
            members.collection("entries", |ctx, set| ctx.entries = set);
        }
    }

    /// Memory store whose collections fail or stall index creation.
    struct ScriptedStore {
        memory: MemoryStore,
        script: Arc<Script>,
    }

    struct Script {
        index_failures: AtomicUsize,
        index_delay: Duration,
        index_calls: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(index_failures: usize, index_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                memory: MemoryStore::new("ledger"),
                script: Arc::new(Script {
                    index_failures: AtomicUsize::new(index_failures),
                    index_delay,
                    index_calls: AtomicUsize::new(0),
                }),
            })
        }

        fn index_calls(&self) -> usize {
            self.script.index_calls.load(Ordering::SeqCst)
        }
    }

    impl DocumentStore for ScriptedStore {
        fn database_name(&self) -> &str {
            self.memory.database_name()
        }

        fn collection(
            &self,
            name: &str,
            settings: Option<&CollectionSettings>,
        ) -> MongoResult<Arc<dyn CollectionBackend>> {
            Ok(Arc::new(ScriptedCollection {
                inner: self.memory.collection(name, settings)?,
                script: self.script.clone(),
            }))
        }

        fn mappings(&self) -> &MappingRegistry {
            self.memory.mappings()
        }
    }

    struct ScriptedCollection {
        inner: Arc<dyn CollectionBackend>,
        script: Arc<Script>,
    }

    #[async_trait]
    impl CollectionBackend for ScriptedCollection {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn insert_many(&self, docs: Vec<Document>) -> MongoResult<u64> {
            self.inner.insert_many(docs).await
        }

        async fn find(&self, filter: Document) -> MongoResult<Vec<Document>> {
            self.inner.find(filter).await
        }

        async fn find_one(&self, filter: Document) -> MongoResult<Option<Document>> {
            self.inner.find_one(filter).await
        }

        async fn replace_one(
            &self,
            filter: Document,
            replacement: Document,
        ) -> MongoResult<UpdateOutcome> {
            self.inner.replace_one(filter, replacement).await
        }

        async fn update_one(&self, filter: Document, update: Document) -> MongoResult<UpdateOutcome> {
            self.inner.update_one(filter, update).await
        }

        async fn delete_one(&self, filter: Document) -> MongoResult<u64> {
            self.inner.delete_one(filter).await
        }

        async fn count(&self, filter: Document) -> MongoResult<u64> {
            self.inner.count(filter).await
        }

        async fn create_indexes(&self, indexes: Vec<IndexDefinition>) -> MongoResult<Vec<String>> {
            self.script.index_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.script.index_delay).await;
            let fail = self
                .script
                .index_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(MongoError::connection("transient"));
            }
            self.inner.create_indexes(indexes).await
        }
    }

    #[tokio::test]
    async fn test_failed_index_creation_is_retried() {
        let store = ScriptedStore::new(1, Duration::ZERO);
        let config = ContextConfiguration::new::<LedgerContext>(store.clone());

        let err = config.create::<LedgerContext>().await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(config.state(), ConfigurationState::Configuring);
        assert_eq!(
            config.with_entity::<Entry, _>(|entry| entry.pending_indexes().len()),
            Some(1)
        );
        assert!(store.memory.index_names("entries").is_empty());

        let ledger: LedgerContext = config.create().await.unwrap();
        assert_eq!(ledger.entries.name(), Some("entries"));
        assert_eq!(config.state(), ConfigurationState::Configured);
        assert_eq!(store.index_calls(), 2);
        assert_eq!(store.memory.index_names("entries"), vec!["total_1".to_string()]);
        assert_eq!(
            config.with_entity::<Entry, _>(|entry| entry.pending_indexes().len()),
            Some(0)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_construction_waits_for_indexes() {
        let store = ScriptedStore::new(0, Duration::from_millis(50));
        let config = Arc::new(ContextConfiguration::new::<LedgerContext>(store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let config = config.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    config.create::<LedgerContext>().await?;
                    Ok::<_, MongoError>(store.memory.index_names("entries"))
                })
            })
            .collect();

        for handle in handles {
            let indexes = handle.await.unwrap().unwrap();
            assert_eq!(indexes, vec!["total_1".to_string()]);
        }
        assert_eq!(store.index_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_configuring_rolls_back_entities() {
        static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        struct Tag {
            label: String,
        }

        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        struct Post {
            id: i64,
            tags: Vec<Tag>,
        }

        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        struct Audit {
            id: i64,
        }

        #[derive(Default)]
        struct Blog {
            posts: DbSet<Post>,
        }

        impl MongoContext for Blog {
            fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
                let attempt = ATTEMPTS.fetch_add(1, Ordering::SeqCst);
                config.entity::<Post, _>(|post| {
                    post.declare_key(field!(Post, id))
                        .declare_reference(field!(Tag, label), field!(Post, tags), None)
                        .declare_index([IndexDefinition::ascending("tags")]);
                    Ok(())
                })?;
                if attempt == 0 {
                    config.entity::<Audit, _>(|audit| {
                        audit.bind_collection("bad$name", None).map(drop)
                    })?;
                }
                Ok(())
            }

            fn members(members: &mut ContextMembers<Self>) {
                members.collection("posts", |ctx, set| ctx.posts = set);
            }
        }

        let config = ContextConfiguration::new::<Blog>(store());
        assert!(config.create::<Blog>().await.is_err());
        assert_eq!(config.entity_count(), 0);

        let blog: Blog = config.create().await.unwrap();
        assert_eq!(blog.posts.name(), Some("posts"));
        assert_eq!(config.entity_names(), vec!["Post"]);
        assert_eq!(
            config.with_entity::<Post, _>(|post| post.references().len()),
            Some(1)
        );
        assert_eq!(
            config.with_entity::<Post, _>(|post| post.pending_indexes().len()),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_on_configuring_can_inspect_configuration() {
        #[derive(Default)]
        struct Introspective;
        impl MongoContext for Introspective {
            fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
                assert_eq!(config.state(), ConfigurationState::Unconfigured);
                assert!(format!("{:?}", config).contains("Unconfigured"));
                Ok(())
            }
            fn members(_: &mut ContextMembers<Self>) {}
        }

        let config = ContextConfiguration::new::<Introspective>(store());
        config.create::<Introspective>().await.unwrap();
        assert_eq!(config.state(), ConfigurationState::Configured);
    }

    #[test]
    fn test_members_debug_and_names() {
        let mut members = ContextMembers::<CrmContext>::new();
        CrmContext::members(&mut members);
        assert_eq!(members.names(), vec!["invoices", "customers"]);
        assert!(format!("{:?}", members).contains("Customer"));
    }
}
