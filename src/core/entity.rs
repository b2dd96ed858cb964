// ============================================================================
// Dynamic object model
// ============================================================================
//
// Entities are shared handles over a named field map. Mappings reach into the
// map through property names registered at configuration time, which is what
// replaces runtime reflection.
//
// ============================================================================

use super::{Identifier, PersistError, Result, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Value object persisted inside its owner's row (embedded mapping) or as one
/// row of an element collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.set(property, value);
        self
    }

    pub fn set(&mut self, property: &str, value: impl Into<Value>) {
        self.values.insert(property.to_string(), value.into());
    }

    pub fn get(&self, property: &str) -> Value {
        self.values.get(property).cloned().unwrap_or(Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(Value::is_null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// One item of an element collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Element {
    Value(Value),
    Record(Record),
}

impl From<Value> for Element {
    fn from(v: Value) -> Self {
        Element::Value(v)
    }
}

impl From<Record> for Element {
    fn from(r: Record) -> Self {
        Element::Record(r)
    }
}

impl From<&str> for Element {
    fn from(s: &str) -> Self {
        Element::Value(Value::from(s))
    }
}

impl From<i64> for Element {
    fn from(i: i64) -> Self {
        Element::Value(Value::Integer(i))
    }
}

/// Content of one mapped property.
#[derive(Debug, Clone)]
pub enum Field {
    Value(Value),
    Embedded(Option<Record>),
    One(Option<Entity>),
    Many(Vec<Entity>),
    Elements(Vec<Element>),
    Map(BTreeMap<Value, Value>),
}

#[derive(Debug, Clone)]
struct EntityData {
    type_name: String,
    identifier: Identifier,
    fields: BTreeMap<String, Field>,
}

/// Shared handle on an entity instance.
///
/// Cloning the handle does not copy the instance: both clones observe the same
/// state, which is how generated identifiers and bumped versions become visible
/// to the caller after an operation.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<RwLock<EntityData>>,
}

impl Entity {
    pub fn new(type_name: &str) -> Self {
        Self {
            inner: Arc::new(RwLock::new(EntityData {
                type_name: type_name.to_string(),
                identifier: Identifier::unassigned(),
                fields: BTreeMap::new(),
            })),
        }
    }

    /// Entity whose identifier is assigned up front (already-assigned policy).
    pub fn with_id(type_name: &str, id: impl Into<Value>) -> Self {
        let entity = Self::new(type_name);
        entity.write().identifier = Identifier::assigned(id);
        entity
    }

    fn read(&self) -> RwLockReadGuard<'_, EntityData> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityData> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn type_name(&self) -> String {
        self.read().type_name.clone()
    }

    pub fn id(&self) -> Option<Value> {
        self.read().identifier.value().cloned()
    }

    pub fn identifier(&self) -> Identifier {
        self.read().identifier.clone()
    }

    pub fn is_persisted(&self) -> bool {
        self.read().identifier.is_persisted()
    }

    pub fn assign_id(&self, value: Value) -> Result<()> {
        let mut data = self.write();
        let type_name = data.type_name.clone();
        data.identifier
            .assign(value.clone())
            .map_err(|current| PersistError::IdentifierReassigned {
                entity: type_name,
                current,
                requested: value,
            })
    }

    pub fn mark_persisted(&self) -> bool {
        self.write().identifier.mark_persisted()
    }

    /// Consuming setter for building instances.
    pub fn with(self, property: &str, value: impl Into<Value>) -> Self {
        self.set(property, value);
        self
    }

    pub fn set(&self, property: &str, value: impl Into<Value>) {
        self.set_field(property, Field::Value(value.into()));
    }

    pub fn get(&self, property: &str) -> Value {
        match self.read().fields.get(property) {
            Some(Field::Value(v)) => v.clone(),
            _ => Value::Null,
        }
    }

    pub fn set_embedded(&self, property: &str, record: Option<Record>) {
        self.set_field(property, Field::Embedded(record));
    }

    pub fn embedded(&self, property: &str) -> Option<Record> {
        match self.read().fields.get(property) {
            Some(Field::Embedded(r)) => r.clone(),
            _ => None,
        }
    }

    pub fn set_one(&self, property: &str, target: Option<Entity>) {
        self.set_field(property, Field::One(target));
    }

    pub fn one(&self, property: &str) -> Option<Entity> {
        match self.read().fields.get(property) {
            Some(Field::One(e)) => e.clone(),
            _ => None,
        }
    }

    pub fn set_many(&self, property: &str, targets: Vec<Entity>) {
        self.set_field(property, Field::Many(targets));
    }

    pub fn many(&self, property: &str) -> Vec<Entity> {
        match self.read().fields.get(property) {
            Some(Field::Many(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    pub fn push_many(&self, property: &str, target: Entity) {
        let mut data = self.write();
        let slot = data
            .fields
            .entry(property.to_string())
            .or_insert_with(|| Field::Many(Vec::new()));
        match slot {
            Field::Many(items) => items.push(target),
            other => *other = Field::Many(vec![target]),
        }
    }

    pub fn set_elements(&self, property: &str, elements: Vec<Element>) {
        self.set_field(property, Field::Elements(elements));
    }

    pub fn elements(&self, property: &str) -> Vec<Element> {
        match self.read().fields.get(property) {
            Some(Field::Elements(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    pub fn set_map(&self, property: &str, entries: BTreeMap<Value, Value>) {
        self.set_field(property, Field::Map(entries));
    }

    pub fn map(&self, property: &str) -> BTreeMap<Value, Value> {
        match self.read().fields.get(property) {
            Some(Field::Map(entries)) => entries.clone(),
            _ => BTreeMap::new(),
        }
    }

    pub fn field(&self, property: &str) -> Option<Field> {
        self.read().fields.get(property).cloned()
    }

    pub fn set_field(&self, property: &str, field: Field) {
        self.write().fields.insert(property.to_string(), field);
    }

    pub fn same_instance(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Handle identity, stable while the instance lives.
    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Independent copy of the whole reachable graph. A target reached twice
    /// is copied once, so shared references stay shared in the copy.
    pub fn deep_copy(&self) -> Entity {
        let mut copies = HashMap::new();
        self.deep_copy_into(&mut copies)
    }

    fn deep_copy_into(&self, copies: &mut HashMap<usize, Entity>) -> Entity {
        if let Some(copy) = copies.get(&self.address()) {
            return copy.clone();
        }
        let data = self.read().clone();
        let copy = Entity {
            inner: Arc::new(RwLock::new(EntityData {
                type_name: data.type_name.clone(),
                identifier: data.identifier.clone(),
                fields: BTreeMap::new(),
            })),
        };
        copies.insert(self.address(), copy.clone());
        let mut fields = BTreeMap::new();
        for (name, field) in data.fields {
            let copied = match field {
                Field::One(target) => Field::One(target.map(|t| t.deep_copy_into(copies))),
                Field::Many(targets) => Field::Many(
                    targets.iter().map(|t| t.deep_copy_into(copies)).collect(),
                ),
                other => other,
            };
            fields.insert(name, copied);
        }
        copy.write().fields = fields;
        copy
    }

    /// Cycle-safe structural image of the graph reachable from this entity.
    pub fn snapshot(&self) -> EntitySnapshot {
        let mut path = HashSet::new();
        self.snapshot_with(&mut path)
    }

    fn snapshot_with(&self, path: &mut HashSet<usize>) -> EntitySnapshot {
        path.insert(self.address());
        let data = self.read().clone();
        let mut fields = BTreeMap::new();
        for (name, field) in data.fields {
            let image = match field {
                Field::Value(v) if !v.is_null() => FieldSnapshot::Value(v),
                Field::Embedded(Some(r)) if !r.is_empty() => FieldSnapshot::Embedded(r),
                Field::One(Some(target)) => FieldSnapshot::One(Box::new(target.related(path))),
                Field::Many(targets) if !targets.is_empty() => {
                    FieldSnapshot::Many(targets.iter().map(|t| t.related(path)).collect())
                }
                Field::Elements(items) if !items.is_empty() => FieldSnapshot::Elements(items),
                Field::Map(entries) if !entries.is_empty() => FieldSnapshot::Map(entries),
                _ => continue,
            };
            fields.insert(name, image);
        }
        path.remove(&self.address());
        EntitySnapshot {
            type_name: data.type_name,
            id: data.identifier.value().cloned(),
            fields,
        }
    }

    fn related(&self, path: &mut HashSet<usize>) -> RelatedSnapshot {
        if path.contains(&self.address()) {
            RelatedSnapshot::Cycle {
                type_name: self.type_name(),
                id: self.id(),
            }
        } else {
            RelatedSnapshot::Entity(self.snapshot_with(path))
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: bidirectional graphs would recurse forever.
        let data = self.read();
        f.debug_struct("Entity")
            .field("type", &data.type_name)
            .field("id", &data.identifier.value())
            .field("state", &data.identifier.state())
            .field("fields", &data.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Structural image produced by [`Entity::snapshot`]. Null values and empty
/// relations are left out so that a freshly built instance compares equal to
/// the same instance read back from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub type_name: String,
    pub id: Option<Value>,
    pub fields: BTreeMap<String, FieldSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSnapshot {
    Value(Value),
    Embedded(Record),
    One(Box<RelatedSnapshot>),
    Many(Vec<RelatedSnapshot>),
    Elements(Vec<Element>),
    Map(BTreeMap<Value, Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelatedSnapshot {
    Entity(EntitySnapshot),
    /// Back reference to an entity already on the traversal path.
    Cycle {
        type_name: String,
        id: Option<Value>,
    },
}

/// Conversion between a typed user struct and the dynamic entity model.
pub trait Persistable: Sized {
    fn to_entity(&self) -> Entity;
    fn from_entity(entity: &Entity) -> Result<Self>;
}
