//! Entity marker trait and typed field selectors.
//!
//! A [`Field`] pairs the serialized name of a struct field with a getter and
//! setter, so configuration code can point at a member without spelling the
//! name at every call site:
//!
//! ```rust
//! use mongo_context_core::{field, Field};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Item {
//!     sku: String,
//!     price: i64,
//! }
//!
//! let sku: Field<Item, String> = field!(Item, sku);
//! let mut item = Item::default();
//! sku.set(&mut item, "A1".to_string());
//! assert_eq!(sku.name(), "sku");
//! assert_eq!(sku.get(&item), "A1");
//! ```

use std::fmt;

use serde::{Serialize, de::DeserializeOwned};

/// An application type persisted as one document.
///
/// Implemented for every serde-serializable, thread-safe `'static` type.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Entity for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Short, human-readable name of a type (`my_app::model::Order` -> `Order`).
pub fn entity_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Selector for one field of an entity.
pub struct Field<T, V> {
    name: &'static str,
    get: fn(&T) -> &V,
    set: fn(&mut T, V),
}

impl<T, V> Field<T, V> {
    /// Create a selector from the field's serialized name and accessors.
    pub const fn new(name: &'static str, get: fn(&T) -> &V, set: fn(&mut T, V)) -> Self {
        Self { name, get, set }
    }

    /// Serialized field name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Read the field from an entity.
    pub fn get<'a>(&self, entity: &'a T) -> &'a V {
        (self.get)(entity)
    }

    /// Write the field on an entity.
    pub fn set(&self, entity: &mut T, value: V) {
        (self.set)(entity, value)
    }
}

impl<T, V> Clone for Field<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for Field<T, V> {}

impl<T, V> fmt::Debug for Field<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("entity", &entity_name::<T>())
            .field("name", &self.name)
            .finish()
    }
}

/// Build a [`Field`] selector for a struct field.
///
/// `field!(Order, id)` uses the Rust field name; `field!(Order, id, "orderId")`
/// supplies the serialized name when the field is renamed with serde.
#[macro_export]
macro_rules! field {
    ($entity:ty, $name:ident) => {
        $crate::field!($entity, $name, stringify!($name))
    };
    ($entity:ty, $name:ident, $wire:expr) => {
        $crate::Field::<$entity, _>::new(
            $wire,
            |entity: &$entity| &entity.$name,
            |entity: &mut $entity, value| entity.$name = value,
        )
    };
}
