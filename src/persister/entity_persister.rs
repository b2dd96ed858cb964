use super::hierarchy::{Hierarchy, Registry};
use super::join_tree::JoinTree;
use super::listener::PersisterListeners;
use super::load::{Filter, Loader};
use super::session::Session;
use super::writer::Writer;
use crate::connection::Connection;
use crate::core::{Entity, Persistable, Result, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info_span;

/// Persister of one entity hierarchy, addressed by its root entity.
///
/// Every operation runs on the connection handed in by the caller. Nothing
/// is committed or rolled back here: a failed operation leaves its partial
/// writes to the caller's transaction.
///
/// # Examples
///
/// ```
/// use relmap::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let context = PersistenceContext::builder(PersistenceConfig::default())
///     .map(
///         EntityMapping::new("Country")
///             .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::already_assigned()))
///             .with_property("name", DataType::Text),
///     )
///     .build()?;
///
/// let database = InMemoryDatabase::new();
/// let mut connection = database.connect();
/// context.deploy_schema(&mut connection)?;
///
/// let countries = context.persister("Country")?;
/// countries.insert(&mut connection, &Entity::with_id("Country", 1).with("name", "France"))?;
///
/// let loaded = countries.select(&mut connection, Value::Integer(1))?;
/// assert_eq!(loaded.map(|c| c.get("name")), Some(Value::Text("France".into())));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EntityPersister {
    registry: Arc<Registry>,
    root: String,
}

impl EntityPersister {
    pub(crate) fn new(registry: Arc<Registry>, root: &str) -> Self {
        Self {
            registry,
            root: root.to_string(),
        }
    }

    fn hierarchy(&self) -> Result<&Hierarchy> {
        self.registry.hierarchy(&self.root)
    }

    /// Name of the root entity.
    pub fn entity(&self) -> &str {
        &self.root
    }

    pub fn listeners(&self) -> Result<&PersisterListeners> {
        Ok(&self.hierarchy()?.listeners)
    }

    /// Query shape used to load instances of the hierarchy.
    pub fn join_tree(&self) -> Result<&JoinTree> {
        Ok(&self.hierarchy()?.join_tree)
    }

    fn write<T>(
        &self,
        connection: &mut dyn Connection,
        body: impl FnOnce(&mut Writer<'_, '_, '_>) -> Result<T>,
    ) -> Result<T> {
        let mut session = Session::new(&self.registry, connection);
        let mut writer = Writer::new(&self.registry, &mut session);
        body(&mut writer)
    }

    pub fn insert(&self, connection: &mut dyn Connection, entity: &Entity) -> Result<()> {
        self.insert_all(connection, std::slice::from_ref(entity))
    }

    /// Inserts `entities` and whatever their relations cascade to. Insert
    /// listeners see the whole batch once.
    pub fn insert_all(&self, connection: &mut dyn Connection, entities: &[Entity]) -> Result<()> {
        self.write(connection, |w| w.insert(&self.root, entities))
    }

    /// Writes the differences between `entity` and `previous`, its state as
    /// last read. With `full`, every column is written.
    pub fn update(
        &self,
        connection: &mut dyn Connection,
        entity: &Entity,
        previous: &Entity,
        full: bool,
    ) -> Result<()> {
        self.update_all(connection, &[(entity.clone(), previous.clone())], full)
    }

    pub fn update_all(
        &self,
        connection: &mut dyn Connection,
        pairs: &[(Entity, Entity)],
        full: bool,
    ) -> Result<()> {
        let pairs = pairs
            .iter()
            .map(|(entity, previous)| (entity.clone(), Some(previous.clone())))
            .collect();
        self.write(connection, |w| w.update(&self.root, pairs, full))
    }

    pub fn delete(&self, connection: &mut dyn Connection, entity: &Entity) -> Result<()> {
        self.delete_all(connection, std::slice::from_ref(entity))
    }

    pub fn delete_all(&self, connection: &mut dyn Connection, entities: &[Entity]) -> Result<()> {
        self.write(connection, |w| w.delete(&self.root, entities))
    }

    pub fn delete_by_id(&self, connection: &mut dyn Connection, id: Value) -> Result<()> {
        self.delete_all_by_id(connection, &[id])
    }

    /// Deletes the stored instances of `ids`. Unknown identifiers are skipped.
    pub fn delete_all_by_id(&self, connection: &mut dyn Connection, ids: &[Value]) -> Result<()> {
        self.write(connection, |w| w.delete_by_id(&self.root, ids))
    }

    pub fn persist(&self, connection: &mut dyn Connection, entity: &Entity) -> Result<()> {
        self.persist_all(connection, std::slice::from_ref(entity))
    }

    /// Inserts new instances and updates persisted ones against their stored
    /// state.
    pub fn persist_all(&self, connection: &mut dyn Connection, entities: &[Entity]) -> Result<()> {
        self.write(connection, |w| w.persist(&self.root, entities))
    }

    pub fn select(&self, connection: &mut dyn Connection, id: Value) -> Result<Option<Entity>> {
        Ok(self.select_by_ids(connection, &[id])?.into_iter().next())
    }

    /// Instances of `ids` in the requested order. Missing identifiers are
    /// left out.
    pub fn select_by_ids(&self, connection: &mut dyn Connection, ids: &[Value]) -> Result<Vec<Entity>> {
        let span = info_span!("persister.select", entity = %self.root, batch = ids.len());
        let _enter = span.enter();
        self.select_with(connection, ids, Filter::Ids(ids.to_vec()), |mut loaded| {
            let mut by_id: HashMap<Value, Entity> = loaded
                .drain(..)
                .filter_map(|e| e.id().map(|id| (id, e)))
                .collect();
            ids.iter().filter_map(|id| by_id.remove(id)).collect()
        })
    }

    /// Every stored instance of the hierarchy, by ascending identifier within
    /// each table-per-class branch.
    pub fn select_all(&self, connection: &mut dyn Connection) -> Result<Vec<Entity>> {
        let span = info_span!("persister.select_all", entity = %self.root);
        let _enter = span.enter();
        self.select_with(connection, &[], Filter::All, |loaded| loaded)
    }

    fn select_with(
        &self,
        connection: &mut dyn Connection,
        ids: &[Value],
        filter: Filter,
        arrange: impl FnOnce(Vec<Entity>) -> Vec<Entity>,
    ) -> Result<Vec<Entity>> {
        let listeners = &self.hierarchy()?.listeners.select;
        listeners.fire_before(ids);
        let mut session = Session::new(&self.registry, connection);
        let result = Loader::new(&self.registry, &mut session)
            .fetch(&self.root, filter, &[])
            .map(|loaded| arrange(loaded.into_iter().map(|l| l.entity).collect()));
        match &result {
            Ok(entities) => listeners.fire_after(ids, entities.as_slice()),
            Err(e) => listeners.fire_error(ids, e),
        }
        result
    }

    /// Loads one instance and converts it into a typed value.
    pub fn select_as<T: Persistable>(&self, connection: &mut dyn Connection, id: Value) -> Result<Option<T>> {
        self.select(connection, id)?
            .map(|entity| T::from_entity(&entity))
            .transpose()
    }
}

impl fmt::Debug for EntityPersister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityPersister")
            .field("root", &self.root)
            .field("hierarchy", &self.registry.hierarchies.get(&self.root))
            .finish()
    }
}
