//! # mongo-context
//!
//! Context-based configuration of typed MongoDB collections.
//!
//! mongo-context provides:
//! - Typed collection members wired from a context type
//! - One-time, thread-safe configuration per context type
//! - Key declarations with by-key find, replace, update and delete
//! - Reference fields stored as key lists, readable from embedded documents
//! - Reusable entity configurations discovered from an assembly
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mongo_context::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Item {
//!     sku: String,
//!     price: i64,
//! }
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Order {
//!     id: i64,
//!     items: Vec<Item>,
//! }
//!
//! #[derive(Default)]
//! struct Shop {
//!     orders: DbSet<Order>,
//! }
//!
//! impl MongoContext for Shop {
//!     fn on_configuring(&self, config: &ContextConfiguration) -> MongoResult<()> {
//!         config.entity::<Order, _>(|order| {
//!             order
//!                 .declare_key(field!(Order, id))
//!                 .declare_reference(field!(Item, sku), field!(Order, items), None);
//!             Ok(())
//!         })
//!     }
//!
//!     fn members(members: &mut ContextMembers<Self>) {
//!         members.collection("orders", |shop, set| shop.orders = set);
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::new("shop"));
//! let shop: Shop = ContextConfiguration::new::<Shop>(store).create().await?;
//!
//! let item = Item { sku: "A1".into(), price: 3 };
//! shop.orders.insert_one(&Order { id: 1, items: vec![item] }).await?;
//!
//! let order = shop.orders.find_by_key(&1_i64).await?.unwrap();
//! assert_eq!(order.items[0].sku, "A1");
//! assert_eq!(order.items[0].price, 0);
//! # Ok::<(), MongoError>(())
//! # }).unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use mongo_context_core::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use mongo_context_core::prelude::*;
}
