//! Deferred index definitions.

use std::time::Duration;

use bson::{Bson, Document, doc};

/// An index to create on an entity's collection once it is resolved.
///
/// ```rust
/// use mongo_context_core::IndexDefinition;
///
/// let index = IndexDefinition::ascending("sku").unique();
/// assert_eq!(index.index_name(), "sku_1");
/// assert!(index.is_unique());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    keys: Document,
    name: Option<String>,
    unique: bool,
    sparse: bool,
    expire_after: Option<Duration>,
}

impl IndexDefinition {
    /// Create an index over the given key specification.
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            name: None,
            unique: false,
            sparse: false,
            expire_after: None,
        }
    }

    /// Single-field ascending index.
    pub fn ascending(field: &str) -> Self {
        Self::new(doc! { field: 1 })
    }

    /// Single-field descending index.
    pub fn descending(field: &str) -> Self {
        Self::new(doc! { field: -1 })
    }

    /// Add another ascending key (compound index).
    pub fn then_ascending(mut self, field: &str) -> Self {
        self.keys.insert(field, 1);
        self
    }

    /// Add another descending key (compound index).
    pub fn then_descending(mut self, field: &str) -> Self {
        self.keys.insert(field, -1);
        self
    }

    /// Set an explicit index name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Only index documents that contain the indexed fields.
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Expire documents after the given duration (TTL index).
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// Key specification.
    pub fn keys(&self) -> &Document {
        &self.keys
    }

    /// Explicit name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the index is unique.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether the index is sparse.
    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// TTL, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.expire_after
    }

    /// Copy with the first segment of every key path passed through `rename`.
    ///
    /// Used to turn entity member names into stored element names
    /// (`id` becomes `_id`, `items.sku` becomes `itemSkus.sku`).
    pub fn with_renamed_keys(&self, rename: impl Fn(&str) -> String) -> Self {
        let keys = self
            .keys
            .iter()
            .map(|(path, direction)| {
                let path = match path.split_once('.') {
                    Some((head, rest)) => format!("{}.{}", rename(head), rest),
                    None => rename(path),
                };
                (path, direction.clone())
            })
            .collect();
        Self {
            keys,
            ..self.clone()
        }
    }

    /// Explicit name, or the server's default `field_direction` naming.
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(field, direction)| {
                let direction = match direction {
                    Bson::Int32(v) => v.to_string(),
                    Bson::Int64(v) => v.to_string(),
                    Bson::Double(v) => v.to_string(),
                    Bson::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}_{}", field, direction)
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(IndexDefinition::ascending("sku").index_name(), "sku_1");
        assert_eq!(
            IndexDefinition::descending("created")
                .then_ascending("status")
                .index_name(),
            "created_-1_status_1"
        );
        assert_eq!(
            IndexDefinition::new(doc! { "body": "text" }).index_name(),
            "body_text"
        );
    }

    #[test]
    fn test_renamed_keys() {
        let index = IndexDefinition::ascending("id")
            .then_descending("items.sku")
            .then_ascending("status")
            .unique();
        let renamed = index.with_renamed_keys(|member| match member {
            "id" => "_id".to_string(),
            "items" => "itemSkus".to_string(),
            other => other.to_string(),
        });

        assert_eq!(
            renamed.keys(),
            &doc! { "_id": 1, "itemSkus.sku": -1, "status": 1 }
        );
        assert_eq!(renamed.index_name(), "_id_1_itemSkus.sku_-1_status_1");
        assert!(renamed.is_unique());
        assert_eq!(index.keys(), &doc! { "id": 1, "items.sku": -1, "status": 1 });
    }

    #[test]
    fn test_options() {
        let index = IndexDefinition::ascending("expires")
            .named("ttl")
            .sparse()
            .expire_after(Duration::from_secs(60));

        assert_eq!(index.index_name(), "ttl");
        assert_eq!(index.name(), Some("ttl"));
        assert!(index.is_sparse());
        assert!(!index.is_unique());
        assert_eq!(index.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(index.keys(), &doc! { "expires": 1 });
    }
}
