//! # mongo-context-core
//!
//! Binds typed entities to MongoDB collections through a context object.
//!
//! This crate provides:
//! - Per-entity configuration: collection binding, key declaration, reference
//!   fields, custom document maps and deferred indexes
//! - A context engine that configures once per context type and wires the
//!   typed [`DbSet`] members of every instance
//! - Discovery of reusable entity configurations from a [`ConfigurationAssembly`]
//! - A reference codec that stores related entities as key lists and still
//!   reads documents that embed them
//! - By-key filters and operations
//! - A MongoDB store over the official driver and an in-memory store
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mongo_context_core::prelude::*;
//!
//! #[derive(Default)]
//! struct ShopContext {
//!     orders: DbSet<Order>,
//! }
//!
//! impl MongoContext for ShopContext {
//!     fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
//!         config.entity::<Order, _>(|order| {
//!             order
//!                 .declare_key(field!(Order, id))
//!                 .declare_reference(field!(Item, sku), field!(Order, items), Some("itemSkus"));
//!             Ok(())
//!         })
//!     }
//!
//!     fn members(members: &mut ContextMembers<Self>) {
//!         members.collection("orders", |ctx, set| ctx.orders = set);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> MongoResult<()> {
//!     let store = MongoStore::builder()
//!         .uri("mongodb://localhost:27017")
//!         .database("shop")
//!         .build()
//!         .await?;
//!
//!     let shop: ShopContext = create_context(Arc::new(store)).await?;
//!     let order = shop.orders.find_by_key(&42_i64).await?;
//!     Ok(())
//! }
//! ```

pub mod assembly;
pub mod codec;
pub mod config;
pub mod context;
pub mod dbset;
pub mod entity;
pub mod error;
pub mod field;
pub mod filter;
pub mod index;
pub mod logging;
pub mod mapping;
pub mod memory;
pub mod mongo;
pub mod reader;
pub mod settings;
pub mod store;

pub use bson::oid::ObjectId;
pub use bson::{Bson, Document, doc};
pub use assembly::{ConfigurationAssembly, EntityTypeConfiguration, TypeEntry};
pub use codec::{FieldCodec, ReferenceCodec};
pub use config::{
    CollectionSettings, MongoConfig, MongoConfigBuilder, ReadPreference, WriteConcern,
};
pub use context::{
    ConfigurationState, ContextConfiguration, ContextMembers, MongoContext, create_context,
};
pub use dbset::DbSet;
pub use entity::{
    EntityConfiguration, ErasedEntityConfiguration, KeyDescriptor, PendingIndexes,
    ReferenceCollection, ReferenceMapping,
};
pub use error::{MongoError, MongoResult};
pub use field::{Entity, Field, entity_name};
pub use filter::{FilterBuilder, KeyFilter, build_key_filter, build_keys_filter, matches_filter};
pub use index::IndexDefinition;
pub use mapping::{DocumentMap, ID_ELEMENT, MappingRegistry, MemberMap};
pub use memory::{MemoryCollection, MemoryStore};
pub use mongo::{MongoCollection, MongoStore, MongoStoreBuilder};
pub use reader::{Bookmark, BsonReader, DecodeAttempt};
pub use settings::{ConnectionSettings, ContextSettings};
pub use store::{CollectionBackend, DocumentStore, UpdateOutcome};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::assembly::{ConfigurationAssembly, EntityTypeConfiguration};
    pub use crate::config::{CollectionSettings, MongoConfig, ReadPreference, WriteConcern};
    pub use crate::context::{ContextConfiguration, ContextMembers, MongoContext, create_context};
    pub use crate::dbset::DbSet;
    pub use crate::entity::EntityConfiguration;
    pub use crate::error::{MongoError, MongoResult};
    pub use crate::field;
    pub use crate::field::{Entity, Field};
    pub use crate::filter::FilterBuilder;
    pub use crate::index::IndexDefinition;
    pub use crate::memory::MemoryStore;
    pub use crate::mongo::MongoStore;
    pub use crate::store::DocumentStore;
    pub use bson::oid::ObjectId;
    pub use bson::{Bson, Document, doc};
}
