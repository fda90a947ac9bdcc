//! Document maps and the per-store mapping registry.
//!
//! Entities are first serialized with serde; a [`DocumentMap`] then reshapes
//! the resulting document: the key member becomes `_id`, members can be
//! renamed or dropped, and individual members can be routed through a
//! [`FieldCodec`]. Reading applies the same map in reverse through a
//! [`BsonReader`], so codecs that need to rewind stay inside their own value.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bson::Document;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::codec::FieldCodec;
use crate::error::{MongoError, MongoResult};
use crate::field::{Entity, entity_name};
use crate::reader::BsonReader;

/// Element name MongoDB uses for the primary key.
pub const ID_ELEMENT: &str = "_id";

/// Mapping of one entity member to a document element.
#[derive(Clone)]
pub struct MemberMap {
    member: String,
    element: String,
    codec: Option<Arc<dyn FieldCodec>>,
}

impl MemberMap {
    fn new(member: &str) -> Self {
        Self {
            member: member.to_string(),
            element: member.to_string(),
            codec: None,
        }
    }

    /// Store the member under a different element name.
    pub fn set_element_name(&mut self, element: impl Into<String>) -> &mut Self {
        self.element = element.into();
        self
    }

    /// Route the member through a codec.
    pub fn set_codec(&mut self, codec: Arc<dyn FieldCodec>) -> &mut Self {
        self.codec = Some(codec);
        self
    }

    /// Member (serde field) name.
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Element name in stored documents.
    pub fn element(&self) -> &str {
        &self.element
    }

    /// Whether a codec is attached.
    pub fn has_codec(&self) -> bool {
        self.codec.is_some()
    }
}

impl fmt::Debug for MemberMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberMap")
            .field("member", &self.member)
            .field("element", &self.element)
            .field("codec", &self.codec.as_ref().map(|c| c.describe()))
            .finish()
    }
}

/// Describes how an entity maps to a stored document.
pub struct DocumentMap<T> {
    id_member: Option<String>,
    members: IndexMap<String, MemberMap>,
    unmapped: HashSet<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Default for DocumentMap<T> {
    fn default() -> Self {
        Self {
            id_member: None,
            members: IndexMap::new(),
            unmapped: HashSet::new(),
            _entity: PhantomData,
        }
    }
}

impl<T> Clone for DocumentMap<T> {
    fn clone(&self) -> Self {
        Self {
            id_member: self.id_member.clone(),
            members: self.members.clone(),
            unmapped: self.unmapped.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DocumentMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentMap")
            .field("entity", &entity_name::<T>())
            .field("id_member", &self.id_member)
            .field("members", &self.members.values().collect::<Vec<_>>())
            .field("unmapped", &self.unmapped)
            .finish()
    }
}

impl<T> DocumentMap<T> {
    /// Create a map where every member is stored under its own name.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the given member as `_id`.
    pub fn map_id(&mut self, member: &str) -> &mut Self {
        self.unmapped.remove(member);
        self.id_member = Some(member.to_string());
        self
    }

    /// Configure how a member is stored.
    pub fn map_member(&mut self, member: &str) -> &mut MemberMap {
        self.unmapped.remove(member);
        self.members
            .entry(member.to_string())
            .or_insert_with(|| MemberMap::new(member))
    }

    /// Leave a member out of stored documents.
    pub fn unmap_member(&mut self, member: &str) -> &mut Self {
        self.members.shift_remove(member);
        if self.id_member.as_deref() == Some(member) {
            self.id_member = None;
        }
        self.unmapped.insert(member.to_string());
        self
    }

    /// Member stored as `_id`.
    pub fn id_member(&self) -> Option<&str> {
        self.id_member.as_deref()
    }

    /// Explicit member mappings in declaration order.
    pub fn members(&self) -> impl Iterator<Item = &MemberMap> {
        self.members.values()
    }

    /// Check if a member is excluded from stored documents.
    pub fn is_unmapped(&self, member: &str) -> bool {
        self.unmapped.contains(member)
    }

    /// Element name a member is stored under.
    pub fn element_name<'a>(&'a self, member: &'a str) -> &'a str {
        if self.id_member.as_deref() == Some(member) {
            return ID_ELEMENT;
        }
        self.members
            .get(member)
            .map(|m| m.element.as_str())
            .unwrap_or(member)
    }

    fn member_for_element(&self, element: &str) -> Option<&MemberMap> {
        self.members.values().find(|m| m.element == element)
    }
}

impl<T: Entity> DocumentMap<T> {
    /// Serialize an entity into its stored document.
    pub fn to_document(&self, entity: &T) -> MongoResult<Document> {
        let mut raw = bson::to_document(entity)?;
        let mut out = Document::new();

        if let Some(id_member) = &self.id_member {
            if let Some(id) = raw.remove(id_member) {
                out.insert(ID_ELEMENT, id);
            }
        }

        for (member, value) in raw {
            if self.unmapped.contains(&member) {
                continue;
            }
            match self.members.get(&member) {
                Some(map) => {
                    let value = match &map.codec {
                        Some(codec) => codec.encode(value)?,
                        None => value,
                    };
                    out.insert(map.element.clone(), value);
                }
                None => {
                    out.insert(member, value);
                }
            }
        }

        Ok(out)
    }

    /// Deserialize an entity from its stored document.
    pub fn from_document(&self, doc: &Document) -> MongoResult<T> {
        let mut reader = BsonReader::new(doc);
        let mut raw = Document::new();

        while let Some(element) = reader.read_name() {
            if element == ID_ELEMENT {
                if let Some(id_member) = &self.id_member {
                    raw.insert(id_member.clone(), reader.read_value()?.clone());
                    continue;
                }
            }

            match self.member_for_element(element) {
                Some(map) => {
                    let value = match &map.codec {
                        Some(codec) => {
                            let position = reader.position();
                            let value = codec.decode(&mut reader)?;
                            if reader.depth() != 1 || reader.position() != position + 1 {
                                return Err(MongoError::internal(format!(
                                    "codec for '{}' did not consume exactly one element",
                                    map.element
                                )));
                            }
                            value
                        }
                        None => reader.read_value()?.clone(),
                    };
                    raw.insert(map.member.clone(), value);
                }
                None if self.unmapped.contains(element) => reader.skip_value()?,
                None => {
                    raw.insert(element, reader.read_value()?.clone());
                }
            }
        }

        Ok(bson::from_document(raw)?)
    }
}

struct RegisteredMap {
    entity: &'static str,
    map: Arc<dyn Any + Send + Sync>,
}

/// Registry of document maps, keyed by entity type.
#[derive(Default)]
pub struct MappingRegistry {
    maps: RwLock<HashMap<TypeId, RegisteredMap>>,
}

impl MappingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a map is registered for `T`.
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.maps.read().contains_key(&TypeId::of::<T>())
    }

    /// Remove the map for `T`. Returns whether one was registered.
    pub fn unregister<T: 'static>(&self) -> bool {
        let removed = self.maps.write().remove(&TypeId::of::<T>()).is_some();
        if removed {
            debug!(entity = entity_name::<T>(), "Unregistered document map");
        }
        removed
    }

    /// Register the map for `T`.
    ///
    /// Fails with [`MongoError::DuplicateMappingRegistration`] if `T` already
    /// has a map; unregister it first.
    pub fn register<T: Entity>(&self, map: DocumentMap<T>) -> MongoResult<()> {
        let mut maps = self.maps.write();
        let type_id = TypeId::of::<T>();
        if maps.contains_key(&type_id) {
            return Err(MongoError::DuplicateMappingRegistration {
                entity: entity_name::<T>().to_string(),
            });
        }
        debug!(entity = entity_name::<T>(), map = ?map, "Registered document map");
        maps.insert(
            type_id,
            RegisteredMap {
                entity: entity_name::<T>(),
                map: Arc::new(map),
            },
        );
        Ok(())
    }

    /// Map registered for `T`.
    pub fn lookup<T: Entity>(&self) -> Option<Arc<DocumentMap<T>>> {
        let map = self.maps.read().get(&TypeId::of::<T>())?.map.clone();
        map.downcast::<DocumentMap<T>>().ok()
    }

    /// Map registered for `T`, or the identity map.
    pub fn lookup_or_default<T: Entity>(&self) -> Arc<DocumentMap<T>> {
        self.lookup::<T>().unwrap_or_default()
    }

    /// Names of the entities with registered maps, sorted.
    pub fn registered_entities(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.maps.read().values().map(|m| m.entity).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered maps.
    pub fn len(&self) -> usize {
        self.maps.read().len()
    }

    /// Check if no maps are registered.
    pub fn is_empty(&self) -> bool {
        self.maps.read().is_empty()
    }
}

impl fmt::Debug for MappingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingRegistry")
            .field("entities", &self.registered_entities())
            .finish()
    }
}
