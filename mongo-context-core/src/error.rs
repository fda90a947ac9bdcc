//! Error types for context configuration and collection operations.

use thiserror::Error;

/// Result type for mongo-context operations.
pub type MongoResult<T> = Result<T, MongoError>;

/// Errors that can occur while configuring a context or operating on its collections.
#[derive(Error, Debug)]
pub enum MongoError {
    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// BSON serialization error.
    #[error("bson error: {0}")]
    Bson(#[from] bson::ser::Error),

    /// BSON deserialization error.
    #[error("bson deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),

    /// A by-key operation targeted an entity without a declared key field.
    #[error(
        "no key declared for {entity}; call declare_key on its entity configuration before using by-key operations"
    )]
    KeyNotDeclared {
        /// Entity type name.
        entity: String,
    },

    /// The store could not produce a collection handle.
    #[error("failed to resolve collection '{collection}': {reason}")]
    CollectionResolutionFailed {
        /// Requested collection name.
        collection: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Indexes were submitted for an entity whose collection was never resolved.
    #[error("collection for {entity} is not resolved")]
    CollectionNotResolved {
        /// Entity type name.
        entity: String,
    },

    /// A reference field did not hold a key list.
    #[error("reference field '{field}' is not a key list: {reason}")]
    ReferenceDecodeFormatMismatch {
        /// Wire element name.
        field: String,
        /// Description of the mismatch.
        reason: String,
    },

    /// A document map is already registered for the entity type.
    #[error("a document map is already registered for {entity}")]
    DuplicateMappingRegistration {
        /// Entity type name.
        entity: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Document serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MongoError {
    /// Create a key-not-declared error.
    pub fn key_not_declared(entity: impl Into<String>) -> Self {
        Self::KeyNotDeclared {
            entity: entity.into(),
        }
    }

    /// Create a collection resolution error.
    pub fn collection_resolution(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CollectionResolutionFailed {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a missing-key error.
    pub fn is_key_not_declared(&self) -> bool {
        matches!(self, Self::KeyNotDeclared { .. })
    }

    /// Check if this is a collection resolution error.
    pub fn is_collection_resolution_failed(&self) -> bool {
        matches!(self, Self::CollectionResolutionFailed { .. })
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::KeyNotDeclared { .. }
                | Self::CollectionNotResolved { .. }
                | Self::DuplicateMappingRegistration { .. }
        )
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MongoError::key_not_declared("Order");
        assert!(err.is_key_not_declared());
        assert!(err.is_config());

        let err = MongoError::collection_resolution("$bad", "invalid name");
        assert!(err.is_collection_resolution_failed());
        assert!(!err.is_config());

        let err = MongoError::connection("connection refused");
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_error_display() {
        let err = MongoError::config("test error");
        assert_eq!(err.to_string(), "configuration error: test error");

        let err = MongoError::DuplicateMappingRegistration {
            entity: "Order".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "a document map is already registered for Order"
        );

        let err = MongoError::collection_resolution("", "name is empty");
        assert_eq!(
            err.to_string(),
            "failed to resolve collection '': name is empty"
        );
    }
}
