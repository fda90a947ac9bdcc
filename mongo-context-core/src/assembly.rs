//! Discovery of entity configuration types.
//!
//! A [`ConfigurationAssembly`] is an explicit, named list of types. Applying it
//! to a context visits the types in full-name order and runs every one that
//! can be constructed without arguments and implements
//! [`EntityTypeConfiguration`].

use std::any::{Any, type_name};
use std::fmt;

use crate::context::ContextConfiguration;
use crate::entity::EntityConfiguration;
use crate::error::{MongoError, MongoResult};
use crate::field::Entity;

/// A reusable configuration for one entity type.
///
/// # Example
///
/// ```rust
/// use mongo_context_core::{EntityConfiguration, EntityTypeConfiguration, MongoResult, field};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Customer {
///     email: String,
/// }
///
/// #[derive(Default)]
/// struct CustomerConfiguration;
///
/// impl EntityTypeConfiguration for CustomerConfiguration {
///     type Entity = Customer;
///
///     fn configure(&self, entity: &mut EntityConfiguration<Customer>) -> MongoResult<()> {
///         entity.declare_key(field!(Customer, email));
///         Ok(())
///     }
/// }
/// ```
pub trait EntityTypeConfiguration: Send + Sync + 'static {
    /// Entity this configuration applies to.
    type Entity: Entity;

    /// Apply the configuration.
    fn configure(&self, entity: &mut EntityConfiguration<Self::Entity>) -> MongoResult<()>;
}

type Construct = fn() -> Box<dyn Any + Send>;
type Apply = fn(Box<dyn Any + Send>, &ContextConfiguration) -> MongoResult<()>;

/// One type of an assembly.
#[derive(Clone, Copy)]
pub struct TypeEntry {
    full_name: &'static str,
    construct: Option<Construct>,
    apply: Option<Apply>,
}

impl TypeEntry {
    /// Fully qualified type name.
    pub fn full_name(&self) -> &'static str {
        self.full_name
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        let base = self.full_name.split('<').next().unwrap_or(self.full_name);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Whether the type has a zero-argument constructor.
    pub fn is_constructible(&self) -> bool {
        self.construct.is_some()
    }

    /// Whether the type implements [`EntityTypeConfiguration`].
    pub fn is_entity_configuration(&self) -> bool {
        self.apply.is_some()
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("full_name", &self.full_name)
            .field("constructible", &self.is_constructible())
            .field("entity_configuration", &self.is_entity_configuration())
            .finish()
    }
}

fn construct<X: Default + Send + 'static>() -> Box<dyn Any + Send> {
    Box::new(X::default())
}

fn apply<C: EntityTypeConfiguration>(
    instance: Box<dyn Any + Send>,
    context: &ContextConfiguration,
) -> MongoResult<()> {
    let configuration = instance.downcast::<C>().map_err(|_| {
        MongoError::internal(format!("assembly entry is not a {}", type_name::<C>()))
    })?;
    context.entity::<C::Entity, _>(|entity| configuration.configure(entity))
}

/// A named set of types scanned for entity configurations.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationAssembly {
    name: String,
    entries: Vec<TypeEntry>,
}

impl ConfigurationAssembly {
    /// Create an empty assembly.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Assembly name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn push(&mut self, entry: TypeEntry) -> &mut Self {
        if !self.entries.iter().any(|e| e.full_name == entry.full_name) {
            self.entries.push(entry);
        }
        self
    }

    /// Add an entity configuration with a zero-argument constructor.
    pub fn register<C>(&mut self) -> &mut Self
    where
        C: EntityTypeConfiguration + Default,
    {
        self.push(TypeEntry {
            full_name: type_name::<C>(),
            construct: Some(construct::<C>),
            apply: Some(apply::<C>),
        })
    }

    /// Add an entity configuration that needs constructor arguments.
    ///
    /// Scans skip it.
    pub fn register_without_default<C: EntityTypeConfiguration>(&mut self) -> &mut Self {
        self.push(TypeEntry {
            full_name: type_name::<C>(),
            construct: None,
            apply: Some(apply::<C>),
        })
    }

    /// Add a type that is not an entity configuration.
    ///
    /// Scans skip it.
    pub fn register_type<X: Default + Send + 'static>(&mut self) -> &mut Self {
        self.push(TypeEntry {
            full_name: type_name::<X>(),
            construct: Some(construct::<X>),
            apply: None,
        })
    }

    /// Entries sorted by full name.
    pub fn entries(&self) -> Vec<TypeEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.full_name.cmp(b.full_name));
        entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the assembly has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate and apply an entry, if it qualifies.
    pub(crate) fn apply_entry(
        entry: &TypeEntry,
        context: &ContextConfiguration,
    ) -> MongoResult<bool> {
        match (entry.construct, entry.apply) {
            (Some(construct), Some(apply)) => {
                apply(construct(), context)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
