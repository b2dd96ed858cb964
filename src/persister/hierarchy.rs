// ============================================================================
// Compiled hierarchies
// ============================================================================
//
// What the builder produces for each mapped root entity: the class tree, the
// tables of every concrete type in write order, the compiled relations and
// collections. The registry holds all of them and is shared by the persisters.
//
// ============================================================================

use super::identifier::IdentifierRuntime;
use super::join_tree::JoinTree;
use super::listener::PersisterListeners;
use super::polymorphism::ClassTree;
use super::relation::{CompiledCollection, CompiledMap, CompiledRelation};
use super::versioning::VersionRuntime;
use crate::core::{ConfigurationError, DataType, Entity, PersistError, Result, Value};
use crate::schema::ddl::Dialect;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Source of one column value of an entity row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Binding {
    Property {
        property: String,
        column: String,
        mandatory: bool,
    },
    Embedded {
        property: String,
        sub_property: String,
        column: String,
    },
    /// Key of the target of a source-owned relation.
    JoinColumn { relation: usize, column: String },
    Version { column: String },
    /// Reverse or index column written on behalf of another entity's
    /// relation, present only on insert.
    Shadow { column: String },
    Discriminator { column: String, value: String },
}

impl Binding {
    pub fn column(&self) -> &str {
        match self {
            Binding::Property { column, .. }
            | Binding::Embedded { column, .. }
            | Binding::JoinColumn { column, .. }
            | Binding::Version { column }
            | Binding::Shadow { column }
            | Binding::Discriminator { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableLayout {
    pub table: String,
    pub bindings: Vec<Binding>,
}

/// Tables of one concrete type, parents first.
#[derive(Debug, Clone)]
pub(crate) struct ConcreteLayout {
    pub node: usize,
    pub tables: Vec<TableLayout>,
}

pub(crate) struct Hierarchy {
    pub root: String,
    pub identifier: IdentifierRuntime,
    pub id_column: String,
    pub id_type: DataType,
    pub version: Option<VersionRuntime>,
    pub tree: ClassTree,
    /// Layouts of instantiable types, by entity name.
    pub layouts: BTreeMap<String, ConcreteLayout>,
    /// Tables holding every instance: reverse columns of relations targeting
    /// this hierarchy go there.
    pub main_tables: Vec<String>,
    /// Table referenced by foreign keys to this hierarchy. None under
    /// table-per-class.
    pub reference_table: Option<String>,
    pub relations: Vec<CompiledRelation>,
    pub collections: Vec<CompiledCollection>,
    pub maps: Vec<CompiledMap>,
    pub join_tree: JoinTree,
    pub listeners: Arc<PersisterListeners>,
}

impl Hierarchy {
    /// Layout of the concrete type of `entity`.
    pub fn layout(&self, entity: &Entity) -> Result<&ConcreteLayout> {
        let type_name = entity.type_name();
        if let Some(layout) = self.layouts.get(&type_name) {
            return Ok(layout);
        }
        if self.tree.find(&type_name).is_some() {
            return Err(PersistError::AbstractEntity { entity: type_name });
        }
        Err(PersistError::UnknownSubtype {
            root: self.root.clone(),
            entity: type_name,
        })
    }

    pub fn is_persisted(&self, entity: &Entity) -> bool {
        self.identifier.is_persisted(entity)
    }

    /// Relations applying to instances of `node`, with their index.
    pub fn relations_of(&self, node: usize) -> impl Iterator<Item = (usize, &CompiledRelation)> {
        self.relations
            .iter()
            .enumerate()
            .filter(move |(_, r)| self.tree.is_a(node, r.owner_node))
    }

    pub fn collections_of(&self, node: usize) -> impl Iterator<Item = &CompiledCollection> {
        self.collections
            .iter()
            .filter(move |c| self.tree.is_a(node, c.owner_node))
    }

    pub fn maps_of(&self, node: usize) -> impl Iterator<Item = &CompiledMap> {
        self.maps
            .iter()
            .filter(move |m| self.tree.is_a(node, m.owner_node))
    }

    pub fn id_of(&self, entity: &Entity) -> Result<Value> {
        entity.id().ok_or_else(|| PersistError::NotPersisted {
            entity: entity.type_name(),
        })
    }
}

impl fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hierarchy")
            .field("root", &self.root)
            .field("id_column", &self.id_column)
            .field("types", &self.layouts.keys().collect::<Vec<_>>())
            .field("relations", &self.relations.len())
            .finish()
    }
}

/// Every compiled hierarchy of a context plus runtime settings.
pub(crate) struct Registry {
    pub hierarchies: BTreeMap<String, Hierarchy>,
    /// Entity name to (root, node).
    pub by_entity: HashMap<String, (String, usize)>,
    pub dialect: Arc<dyn Dialect>,
    pub log_statements: bool,
    pub in_clause_size: usize,
}

impl Registry {
    pub fn hierarchy(&self, root: &str) -> Result<&Hierarchy> {
        self.hierarchies
            .get(root)
            .ok_or_else(|| ConfigurationError::UnknownEntity(root.to_string()).into())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("hierarchies", &self.hierarchies.values().collect::<Vec<_>>())
            .field("in_clause_size", &self.in_clause_size)
            .finish()
    }
}
