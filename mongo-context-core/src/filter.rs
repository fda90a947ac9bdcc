//! Filter documents and the by-key filter builder.

use bson::{Bson, Document, doc};
use serde::Serialize;

use crate::entity::KeyDescriptor;
use crate::error::{MongoError, MongoResult};
use crate::mapping::ID_ELEMENT;

/// Builder for MongoDB filter documents.
///
/// # Example
///
/// ```rust
/// use mongo_context_core::FilterBuilder;
///
/// let filter = FilterBuilder::new()
///     .eq("status", "active")
///     .in_array("tier", vec!["gold", "silver"])
///     .build();
///
/// assert_eq!(filter.get_str("status").unwrap(), "active");
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    doc: Document,
}

impl FilterBuilder {
    /// Create a new empty filter builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter builder from an existing document.
    pub fn from_doc(doc: Document) -> Self {
        Self { doc }
    }

    /// Add an equality condition.
    pub fn eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.doc.insert(field, value.into());
        self
    }

    /// Add an "in" condition (value in array).
    pub fn in_array(mut self, field: &str, values: Vec<impl Into<Bson>>) -> Self {
        let bson_values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.doc.insert(field, doc! { "$in": bson_values });
        self
    }

    /// Combine with AND ($and).
    pub fn and(mut self, conditions: Vec<Document>) -> Self {
        self.doc.insert("$and", conditions);
        self
    }

    /// Build the filter document.
    pub fn build(self) -> Document {
        self.doc
    }

    /// Check if the filter is empty.
    pub fn is_empty(&self) -> bool {
        self.doc.is_empty()
    }
}

/// Equality predicate over an entity's key field.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFilter {
    entity: String,
    field: String,
    value: Bson,
}

impl KeyFilter {
    /// Entity type name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Key field on the entity.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Element the key is stored under.
    pub fn element(&self) -> &str {
        ID_ELEMENT
    }

    /// Key value, as stored.
    pub fn value(&self) -> &Bson {
        &self.value
    }

    /// Filter document (`{ "_id": value }`).
    pub fn to_document(&self) -> Document {
        FilterBuilder::new()
            .eq(ID_ELEMENT, self.value.clone())
            .build()
    }

    /// Check a stored document against this filter.
    pub fn matches(&self, doc: &Document) -> bool {
        doc.get(ID_ELEMENT)
            .is_some_and(|stored| values_equal(stored, &self.value))
    }
}

impl From<KeyFilter> for Document {
    fn from(filter: KeyFilter) -> Self {
        filter.to_document()
    }
}

/// Build the equality filter for an entity key.
///
/// Fails with [`MongoError::KeyNotDeclared`] when no key descriptor exists.
pub fn build_key_filter<K>(
    key: Option<&KeyDescriptor>,
    entity: &str,
    value: &K,
) -> MongoResult<KeyFilter>
where
    K: Serialize + ?Sized,
{
    let key = key.ok_or_else(|| MongoError::key_not_declared(entity))?;
    let value = bson::to_bson(value)?;
    Ok(KeyFilter {
        entity: entity.to_string(),
        field: key.field().to_string(),
        value,
    })
}

/// Filter matching any of the given keys.
pub fn build_keys_filter<K>(
    key: Option<&KeyDescriptor>,
    entity: &str,
    values: &[K],
) -> MongoResult<Document>
where
    K: Serialize,
{
    key.ok_or_else(|| MongoError::key_not_declared(entity))?;
    let values = values
        .iter()
        .map(bson::to_bson)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FilterBuilder::new().in_array(ID_ELEMENT, values).build())
}

/// Evaluate a filter against a document.
///
/// Supports top-level equality, `$eq`, `$ne`, `$in` and `$and`; other
/// operators never match.
pub fn matches_filter(filter: &Document, doc: &Document) -> bool {
    filter.iter().all(|(field, condition)| {
        if field == "$and" {
            return match condition {
                Bson::Array(clauses) => clauses.iter().all(|clause| match clause {
                    Bson::Document(clause) => matches_filter(clause, doc),
                    _ => false,
                }),
                _ => false,
            };
        }

        let stored = doc.get(field);
        match condition {
            Bson::Document(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                ops.iter().all(|(op, operand)| match op.as_str() {
                    "$eq" => stored.is_some_and(|v| values_equal(v, operand)),
                    "$ne" => !stored.is_some_and(|v| values_equal(v, operand)),
                    "$in" => match operand {
                        Bson::Array(candidates) => stored.is_some_and(|v| {
                            candidates.iter().any(|candidate| values_equal(v, candidate))
                        }),
                        _ => false,
                    },
                    _ => false,
                })
            }
            expected => stored.is_some_and(|v| values_equal(v, expected)),
        }
    })
}

/// Compare two BSON values the way the server does for equality, treating
/// numeric types as interchangeable.
pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    fn as_number(value: &Bson) -> Option<f64> {
        match value {
            Bson::Int32(v) => Some(f64::from(*v)),
            Bson::Int64(v) => Some(*v as f64),
            Bson::Double(v) => Some(*v),
            _ => None,
        }
    }

    match (left, right) {
        (Bson::Int32(a), Bson::Int64(b)) | (Bson::Int64(b), Bson::Int32(a)) => i64::from(*a) == *b,
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => left == right,
        },
    }
}
