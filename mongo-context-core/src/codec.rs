//! Field codecs applied by document maps.
//!
//! The [`ReferenceCodec`] persists a field that holds related entities as the
//! list of their key values, and reads it back as placeholder entities that
//! carry only their key. Documents written before the reference mapping was
//! introduced hold fully embedded entities; those are still readable through a
//! bookmark-and-retry fallback.

use std::fmt;

use bson::Bson;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use crate::error::{MongoError, MongoResult};
use crate::field::{Entity, Field, entity_name};
use crate::reader::{BsonReader, DecodeAttempt};

/// Type-erased transformation of one document field.
pub trait FieldCodec: Send + Sync {
    /// Convert the serde form of the field into its wire form.
    fn encode(&self, value: Bson) -> MongoResult<Bson>;

    /// Read the wire value at the reader position and return the serde form.
    fn decode(&self, reader: &mut BsonReader<'_>) -> MongoResult<Bson>;

    /// Short description for diagnostics.
    fn describe(&self) -> String;
}

impl fmt::Debug for dyn FieldCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Persists related entities `R` as a list of their keys `K`.
pub struct ReferenceCodec<R, K> {
    key: Field<R, K>,
    element: Option<String>,
}

impl<R, K> ReferenceCodec<R, K>
where
    R: Entity + Default,
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a codec keyed by the given field of the related entity.
    pub fn new(key: Field<R, K>) -> Self {
        Self { key, element: None }
    }

    /// Name the wire element this codec is attached to (used in diagnostics).
    pub fn for_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    /// Key field of the related entity.
    pub fn key_field(&self) -> &'static str {
        self.key.name()
    }

    fn element(&self) -> &str {
        self.element.as_deref().unwrap_or("<reference>")
    }

    /// Encode related entities as their ordered key values.
    ///
    /// `None` is written as `null`, the absent-collection marker.
    pub fn encode(&self, related: Option<&[R]>) -> MongoResult<Bson> {
        let Some(related) = related else {
            return Ok(Bson::Null);
        };
        let keys = related
            .iter()
            .map(|entity| bson::to_bson(self.key.get(entity)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Bson::Array(keys))
    }

    /// Encode a field that serde already turned into an array of embedded documents.
    pub fn encode_value(&self, value: Bson) -> MongoResult<Bson> {
        match value {
            Bson::Null => Ok(Bson::Null),
            Bson::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Bson::Document(mut doc) => doc.remove(self.key.name()).ok_or_else(|| {
                        MongoError::serialization(format!(
                            "{} item {} has no '{}' field",
                            entity_name::<R>(),
                            index,
                            self.key.name()
                        ))
                    }),
                    other => Err(MongoError::serialization(format!(
                        "{} item {} is a {:?}, not a document",
                        entity_name::<R>(),
                        index,
                        other.element_type()
                    ))),
                })
                .collect::<MongoResult<Vec<_>>>()
                .map(Bson::Array),
            other => Err(MongoError::serialization(format!(
                "reference field '{}' must serialize to an array or null, found {:?}",
                self.element(),
                other.element_type()
            ))),
        }
    }

    /// Try to read the current value as a key list.
    ///
    /// On a mismatch the reader may have advanced into the value; callers
    /// that want to retry must bookmark first.
    pub fn try_decode_keys(
        &self,
        reader: &mut BsonReader<'_>,
    ) -> MongoResult<DecodeAttempt<Option<Vec<K>>>> {
        match reader.peek_value() {
            None => Err(MongoError::serialization(format!(
                "reference field '{}' has no value to read",
                self.element()
            ))),
            Some(Bson::Null) => {
                reader.skip_value()?;
                Ok(DecodeAttempt::Decoded(None))
            }
            Some(Bson::Array(_)) => {
                reader.read_start_array()?;
                let mut keys = Vec::new();
                while !reader.is_at_end() {
                    let value = reader.read_value()?;
                    match bson::from_bson::<K>(value.clone()) {
                        Ok(key) => keys.push(key),
                        Err(e) => {
                            return Ok(DecodeAttempt::FormatMismatch(format!(
                                "item {}: {}",
                                keys.len(),
                                e
                            )));
                        }
                    }
                }
                reader.read_end_array()?;
                Ok(DecodeAttempt::Decoded(Some(keys)))
            }
            Some(other) => Ok(DecodeAttempt::FormatMismatch(format!(
                "expected an array, found {:?}",
                other.element_type()
            ))),
        }
    }

    /// Read the current value as a key list, failing on any other shape.
    pub fn decode_keys(&self, reader: &mut BsonReader<'_>) -> MongoResult<Option<Vec<K>>> {
        match self.try_decode_keys(reader)? {
            DecodeAttempt::Decoded(keys) => Ok(keys),
            DecodeAttempt::FormatMismatch(reason) => {
                Err(MongoError::ReferenceDecodeFormatMismatch {
                    field: self.element().to_string(),
                    reason,
                })
            }
        }
    }

    /// Read related entities.
    ///
    /// Key lists produce placeholders carrying only their key. Arrays of
    /// embedded entities (the legacy layout) are decoded as full entities.
    pub fn decode(&self, reader: &mut BsonReader<'_>) -> MongoResult<Option<Vec<R>>> {
        let bookmark = reader.bookmark();
        match self.try_decode_keys(reader)? {
            DecodeAttempt::Decoded(None) => Ok(None),
            DecodeAttempt::Decoded(Some(keys)) => {
                trace!(field = %self.element(), count = keys.len(), "Decoded reference keys");
                Ok(Some(keys.into_iter().map(|key| self.placeholder(key)).collect()))
            }
            DecodeAttempt::FormatMismatch(reason) => {
                warn!(
                    field = %self.element(),
                    target = entity_name::<R>(),
                    reason = %reason,
                    "Reference field is not a key list, decoding embedded entities"
                );
                reader.return_to_bookmark(bookmark);
                self.decode_embedded(reader)
            }
        }
    }

    fn decode_embedded(&self, reader: &mut BsonReader<'_>) -> MongoResult<Option<Vec<R>>> {
        match reader.read_value()? {
            Bson::Null => Ok(None),
            value => Ok(Some(bson::from_bson::<Vec<R>>(value.clone())?)),
        }
    }

    /// A default entity with only its key set.
    pub fn placeholder(&self, key: K) -> R {
        let mut entity = R::default();
        self.key.set(&mut entity, key);
        entity
    }
}

impl<R, K> FieldCodec for ReferenceCodec<R, K>
where
    R: Entity + Default,
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(&self, value: Bson) -> MongoResult<Bson> {
        self.encode_value(value)
    }

    fn decode(&self, reader: &mut BsonReader<'_>) -> MongoResult<Bson> {
        match ReferenceCodec::decode(self, reader)? {
            None => Ok(Bson::Null),
            Some(related) => Ok(bson::to_bson(&related)?),
        }
    }

    fn describe(&self) -> String {
        format!(
            "ReferenceCodec<{}>(key = {})",
            entity_name::<R>(),
            self.key.name()
        )
    }
}

impl<R, K> fmt::Debug for ReferenceCodec<R, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceCodec")
            .field("target", &entity_name::<R>())
            .field("key", &self.key.name())
            .field("element", &self.element)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Item {
        sku: String,
        price: i64,
    }

    fn item(sku: &str, price: i64) -> Item {
        Item {
            sku: sku.to_string(),
            price,
        }
    }

    fn codec() -> ReferenceCodec<Item, String> {
        ReferenceCodec::new(field!(Item, sku)).for_element("items")
    }

    #[test]
    fn test_encode_preserves_order_and_duplicates() {
        let items = vec![item("A1", 10), item("B2", 20), item("B2", 30)];
        let wire = codec().encode(Some(items.as_slice())).unwrap();
        assert_eq!(wire, Bson::Array(vec!["A1".into(), "B2".into(), "B2".into()]));
    }

    #[test]
    fn test_encode_absent_collection() {
        assert_eq!(codec().encode(None).unwrap(), Bson::Null);
    }

    #[test]
    fn test_encode_value_from_serialized_documents() {
        let serialized = bson::to_bson(&vec![item("A1", 1), item("C3", 2)]).unwrap();
        let wire = codec().encode_value(serialized).unwrap();
        assert_eq!(wire, Bson::Array(vec!["A1".into(), "C3".into()]));

        assert!(codec().encode_value(Bson::Int32(3)).is_err());
        assert!(codec().encode_value(Bson::Array(vec![Bson::Int32(3)])).is_err());
    }

    #[test]
    fn test_decode_key_list_into_placeholders() {
        let doc = doc! { "items": ["A1", "B2", "B2"] };
        let mut reader = BsonReader::new(&doc);

        let decoded = codec().decode(&mut reader).unwrap().unwrap();
        assert_eq!(decoded, vec![item("A1", 0), item("B2", 0), item("B2", 0)]);
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_decode_null_is_absent() {
        let doc = doc! { "items": Bson::Null, "next": 1 };
        let mut reader = BsonReader::new(&doc);

        assert_eq!(codec().decode(&mut reader).unwrap(), None);
        assert_eq!(reader.read_name(), Some("next"));
    }

    #[test]
    fn test_decode_falls_back_to_embedded_entities() {
        let doc = doc! {
            "items": [{ "sku": "A1", "price": 5 }, { "sku": "B2", "price": 7 }],
            "next": "kept",
        };
        let mut reader = BsonReader::new(&doc);

        let decoded = codec().decode(&mut reader).unwrap().unwrap();
        assert_eq!(decoded, vec![item("A1", 5), item("B2", 7)]);
        assert_eq!(reader.depth(), 1);
        assert_eq!(reader.read_name(), Some("next"));
        assert_eq!(reader.read_value().unwrap().as_str(), Some("kept"));
    }

    #[test]
    fn test_fallback_failure_propagates() {
        let doc = doc! { "items": [{ "sku": 12 }] };
        let mut reader = BsonReader::new(&doc);
        let err = codec().decode(&mut reader).unwrap_err();
        assert!(matches!(err, MongoError::BsonDe(_)));
    }

    #[test]
    fn test_strict_key_decode_reports_mismatch() {
        let doc = doc! { "items": [{ "sku": "A1", "price": 1 }] };
        let mut reader = BsonReader::new(&doc);
        let err = codec().decode_keys(&mut reader).unwrap_err();
        assert!(matches!(
            err,
            MongoError::ReferenceDecodeFormatMismatch { ref field, .. } if field == "items"
        ));
    }

    #[test]
    fn test_field_codec_round_trip_through_bson() {
        let codec = codec();
        let serialized = bson::to_bson(&vec![item("A1", 9)]).unwrap();
        let wire = FieldCodec::encode(&codec, serialized).unwrap();

        let doc = doc! { "items": wire };
        let mut reader = BsonReader::new(&doc);
        let value = FieldCodec::decode(&codec, &mut reader).unwrap();
        let items: Vec<Item> = bson::from_bson(value).unwrap();
        assert_eq!(items, vec![item("A1", 0)]);
        assert!(codec.describe().contains("Item"));
    }
}
