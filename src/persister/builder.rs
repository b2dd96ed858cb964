// ============================================================================
// Persister builder
// ============================================================================
//
// Compiles entity mappings into hierarchies in two passes. The first lays out
// the tables and class tree of every root so that the second can wire
// relations to any mapped entity, whatever the declaration order.
//
// ============================================================================

use super::hierarchy::{Binding, ConcreteLayout, Hierarchy, Registry, TableLayout};
use super::identifier::{
    IdentifierPolicy, IdentifierRuntime, PooledHiLoSequence, SequenceHighValues,
};
use super::join_tree::{JoinNode, JoinTree};
use super::listener::PersisterListeners;
use super::polymorphism::{
    ClassNode, ClassTree, DEFAULT_DISCRIMINATOR, NodePolicy, check_composition,
};
use super::relation::{
    CompiledCollection, CompiledMap, CompiledRelation, RelationStorage, SchemaWriter, Side,
    configure_collection, configure_map, configure_relation,
};
use super::versioning::VersionRuntime;
use crate::config::PersistenceConfig;
use crate::core::{ConfigResult, ConfigurationError, DataType};
use crate::mapping::{
    CollectionKind, EntityMapping, IdentifierMapping, PolymorphismKind, PropertyMapping,
    RelationMapping,
};
use crate::naming::{Naming, NamingScope};
use crate::schema::{Column, Schema, Sequence, Table};
use crate::statement::JoinKind;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Column produced by one mapped property.
#[derive(Debug, Clone)]
struct ColumnSpec {
    column: Column,
    origin: String,
    binding: Binding,
    unique: bool,
}

/// Mapping whose relations and collections are compiled for one class node.
struct Source<'a> {
    node: usize,
    entity: String,
    mapping: &'a EntityMapping,
    naming: Naming,
    /// Name relation tables and columns are derived from.
    table_name: String,
    /// Tables receiving the join columns of this mapping.
    tables: Vec<String>,
}

/// A hierarchy being compiled.
struct Draft<'a> {
    root: String,
    /// Inheritance chain, top-most ancestor first.
    levels: Vec<&'a EntityMapping>,
    level_scopes: Vec<NamingScope>,
    /// Table of each level, None under table-per-class.
    level_tables: Vec<Option<String>>,
    group_tables: Vec<String>,
    group_owners: Vec<String>,
    table_per_class: bool,
    /// Columns every table-per-class table repeats.
    inherited: Vec<ColumnSpec>,
    id_column: String,
    id_origin: String,
    id_type: DataType,
    identifier: IdentifierRuntime,
    version: Option<VersionRuntime>,
    tree: ClassTree,
    node_mappings: Vec<&'a EntityMapping>,
    node_scopes: Vec<NamingScope>,
    node_names: Vec<String>,
    contributions: Vec<Vec<TableLayout>>,
    layouts: BTreeMap<String, ConcreteLayout>,
    main_tables: Vec<String>,
    reference_table: Option<String>,
    relations: Vec<CompiledRelation>,
    collections: Vec<CompiledCollection>,
    maps: Vec<CompiledMap>,
    /// Relation nodes of the join tree, by owner table.
    relation_nodes: HashMap<String, Vec<JoinNode>>,
}

impl<'a> Draft<'a> {
    fn sources(&self) -> Vec<Source<'a>> {
        let mut sources = Vec::new();
        for (i, level) in self.levels.iter().enumerate() {
            let naming = self.level_scopes[i].resolve();
            let (table_name, tables) = match &self.level_tables[i] {
                Some(table) => (table.clone(), vec![table.clone()]),
                None => (nominal_table(level, &naming), self.main_tables.clone()),
            };
            sources.push(Source {
                node: 0,
                entity: level.entity.clone(),
                mapping: level,
                naming,
                table_name,
                tables,
            });
        }
        for (node, mapping) in self.node_mappings.iter().enumerate().skip(1) {
            let Some(home) = &self.tree.node(node).home_table else {
                continue;
            };
            sources.push(Source {
                node,
                entity: mapping.entity.clone(),
                mapping,
                naming: self.node_scopes[node].resolve(),
                table_name: self.node_names[node].clone(),
                tables: vec![home.clone()],
            });
        }
        sources
    }

    /// Whether instances of `node` map `property` as a relation.
    fn maps_relation(&self, node: usize, property: &str) -> bool {
        self.tree.path(node).into_iter().any(|n| {
            if n == 0 {
                self.levels.iter().any(|l| l.maps_relation(property))
            } else {
                self.node_mappings[n].maps_relation(property)
            }
        })
    }

    /// Adds `binding` to `tables` in the layout of every type under `node`.
    fn bind(&mut self, node: usize, tables: &[String], binding: Binding) {
        let tree = &self.tree;
        for layout in self.layouts.values_mut() {
            if !tree.is_a(layout.node, node) {
                continue;
            }
            for table in layout.tables.iter_mut() {
                if tables.contains(&table.table) {
                    table.bindings.push(binding.clone());
                }
            }
        }
    }

    fn compute_layouts(&mut self) {
        for (index, class) in self.tree.nodes().iter().enumerate() {
            if !class.instantiable {
                continue;
            }
            let mut tables: Vec<TableLayout> = Vec::new();
            for node in self.tree.path(index) {
                for contribution in &self.contributions[node] {
                    match tables.iter_mut().find(|t| t.table == contribution.table) {
                        Some(table) => table.bindings.extend(contribution.bindings.iter().cloned()),
                        None => tables.push(contribution.clone()),
                    }
                }
            }
            for (table, column, value) in self.tree.discriminator_for(index) {
                if let Some(layout) = tables.iter_mut().find(|t| t.table == table) {
                    layout.bindings.push(Binding::Discriminator { column, value });
                }
            }
            self.layouts.insert(
                class.entity.clone(),
                ConcreteLayout {
                    node: index,
                    tables,
                },
            );
        }
    }

    fn join_tree(&self, schema: &Schema) -> JoinTree {
        let mut counter = 0;
        if self.table_per_class {
            let branches = self
                .tree
                .nodes()
                .iter()
                .skip(1)
                .filter_map(|class| {
                    class.home_table.as_ref().map(|table| {
                        self.join_node(schema, table, &class.entity, JoinKind::Inner, &mut counter)
                    })
                })
                .collect();
            return JoinTree::new(branches, &self.id_column, true);
        }
        let root = self.join_node(
            schema,
            &self.group_tables[0],
            &self.group_owners[0],
            JoinKind::Inner,
            &mut counter,
        );
        JoinTree::new(vec![root], &self.id_column, false)
    }

    fn join_node(
        &self,
        schema: &Schema,
        table: &str,
        entity: &str,
        kind: JoinKind,
        counter: &mut usize,
    ) -> JoinNode {
        let mut node = JoinNode::table(table, format!("t{}", counter), kind, entity);
        *counter += 1;
        node.columns = schema
            .table(table)
            .map(|t| t.columns().iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();
        if let Some(group) = self.group_tables.iter().position(|t| t == table)
            && let Some(next) = self.group_tables.get(group + 1)
        {
            let owner = &self.group_owners[group + 1];
            node.children
                .push(self.join_node(schema, next, owner, JoinKind::Inner, counter));
        }
        for class in self.tree.nodes().iter().skip(1) {
            let parent_home = class
                .parent
                .and_then(|p| self.tree.node(p).home_table.as_deref());
            match &class.home_table {
                Some(home) if parent_home == Some(table) && home != table => {
                    node.children.push(self.join_node(
                        schema,
                        home,
                        &class.entity,
                        JoinKind::LeftOuter,
                        counter,
                    ));
                }
                _ => {}
            }
        }
        if let Some(relations) = self.relation_nodes.get(table) {
            node.children.extend(relations.iter().cloned());
        }
        node
    }

    fn into_hierarchy(self, schema: &Schema) -> Hierarchy {
        let join_tree = self.join_tree(schema);
        Hierarchy {
            root: self.root,
            identifier: self.identifier,
            id_column: self.id_column,
            id_type: self.id_type,
            version: self.version,
            tree: self.tree,
            layouts: self.layouts,
            main_tables: self.main_tables,
            reference_table: self.reference_table,
            relations: self.relations,
            collections: self.collections,
            maps: self.maps,
            join_tree,
            listeners: Arc::new(PersisterListeners::new()),
        }
    }
}

fn invalid(entity: &str, reason: String) -> ConfigurationError {
    ConfigurationError::InvalidMapping {
        entity: entity.to_string(),
        reason,
    }
}

fn nominal_table(mapping: &EntityMapping, naming: &Naming) -> String {
    mapping
        .table
        .clone()
        .unwrap_or_else(|| naming.table.table_name(&mapping.entity))
}

fn node_policy(mapping: &EntityMapping) -> Option<NodePolicy> {
    mapping.polymorphism.as_ref().map(|policy| match policy.kind {
        PolymorphismKind::SingleTable => NodePolicy::SingleTable {
            column: policy
                .discriminator_column
                .clone()
                .unwrap_or_else(|| DEFAULT_DISCRIMINATOR.to_string()),
        },
        PolymorphismKind::JoinedTables => NodePolicy::JoinedTables,
        PolymorphismKind::TablePerClass => NodePolicy::TablePerClass,
    })
}

fn instantiable(mapping: &EntityMapping) -> bool {
    mapping
        .polymorphism
        .as_ref()
        .is_none_or(|p| p.kind == PolymorphismKind::JoinedTables)
}

/// `mapping` and its `inherits` ancestors, top-most first, each flagged with
/// whether it is joined to the previous one.
fn inheritance_chain(mapping: &EntityMapping) -> ConfigResult<Vec<(&EntityMapping, bool)>> {
    let mut chain = Vec::new();
    let mut current = mapping;
    loop {
        if current.mapped_super_class.is_some() && current.parent.is_some() {
            return Err(ConfigurationError::InheritanceConflict(current.entity.clone()));
        }
        match &current.parent {
            Some(parent) => {
                chain.push((current, parent.joined));
                current = &parent.mapping;
            }
            None => {
                chain.push((current, false));
                break;
            }
        }
    }
    chain.reverse();
    Ok(chain)
}

fn property_spec(entity: &str, property: &PropertyMapping, naming: &Naming) -> ColumnSpec {
    let column = property
        .column
        .clone()
        .unwrap_or_else(|| naming.column.column_name(&property.name));
    let mut definition = Column::new(&column, property.data_type);
    definition.nullable = property.nullable;
    ColumnSpec {
        column: definition,
        origin: format!("{}::{}", entity, property.name),
        binding: Binding::Property {
            property: property.name.clone(),
            column,
            mandatory: property.mandatory,
        },
        unique: property.unique,
    }
}

/// Columns of the simple, super-class and embedded properties of `mapping`.
fn entity_columns(mapping: &EntityMapping, scope: &NamingScope, naming: &Naming) -> Vec<ColumnSpec> {
    let mut specs = Vec::new();
    if let Some(super_class) = &mapping.mapped_super_class {
        let inner = super_class.naming.over(scope).resolve();
        for property in &super_class.properties {
            specs.push(property_spec(&mapping.entity, property, &inner));
        }
    }
    for property in &mapping.properties {
        specs.push(property_spec(&mapping.entity, property, naming));
    }
    for embedded in &mapping.embedded {
        let inner = embedded.embeddable.naming.over(scope).resolve();
        let included = embedded
            .embeddable
            .properties
            .iter()
            .filter(|p| !embedded.excluded.contains(&p.name));
        for property in included {
            let column = embedded
                .column_override(&property.name)
                .map(str::to_string)
                .or_else(|| property.column.clone())
                .unwrap_or_else(|| inner.column.column_name(&property.name));
            specs.push(ColumnSpec {
                column: Column::new(&column, property.data_type),
                origin: format!("{}::{}.{}", mapping.entity, embedded.property, property.name),
                binding: Binding::Embedded {
                    property: embedded.property.clone(),
                    sub_property: property.name.clone(),
                    column,
                },
                unique: false,
            });
        }
    }
    specs
}

fn add_spec(
    writer: &mut SchemaWriter<'_>,
    table: &str,
    spec: ColumnSpec,
    bindings: &mut Vec<Binding>,
) -> ConfigResult<()> {
    let name = spec.column.name.clone();
    writer.add_column(table, spec.column, &spec.origin)?;
    if spec.unique {
        writer.unique(table, vec![name])?;
    }
    bindings.push(spec.binding);
    Ok(())
}

fn primary_key(writer: &mut SchemaWriter<'_>, table: &str, id_column: &str) -> ConfigResult<()> {
    if let Some(target) = writer.schema.table_mut(table) {
        target.set_primary_key(vec![id_column.to_string()])?;
    }
    Ok(())
}

/// Compiles mappings into a schema and a registry of hierarchies.
pub(crate) struct PersisterBuilder<'a> {
    config: &'a PersistenceConfig,
    schema: Schema,
    /// Hi-lo generators declared by name, shared by every entity using the name.
    hilo: HashMap<String, Arc<PooledHiLoSequence>>,
    drafts: Vec<Draft<'a>>,
    by_entity: HashMap<String, (usize, usize)>,
}

impl<'a> PersisterBuilder<'a> {
    pub fn new(config: &'a PersistenceConfig) -> Self {
        Self {
            config,
            schema: Schema::new(),
            hilo: HashMap::new(),
            drafts: Vec::new(),
            by_entity: HashMap::new(),
        }
    }

    pub fn build(mut self, mappings: &'a [EntityMapping]) -> ConfigResult<(Schema, Registry)> {
        self.config
            .validate()
            .map_err(|reason| invalid("PersistenceConfig", reason))?;
        if let Some(issue) = mappings.iter().find_map(EntityMapping::first_issue) {
            return Err(issue);
        }

        for mapping in mappings {
            let draft = self.lay_out(mapping)?;
            let index = self.drafts.len();
            for (node, class) in draft.tree.nodes().iter().enumerate() {
                if self.by_entity.insert(class.entity.clone(), (index, node)).is_some() {
                    return Err(invalid(&class.entity, "is mapped more than once".into()));
                }
            }
            self.drafts.push(draft);
        }

        for index in 0..self.drafts.len() {
            let sources = self.drafts[index].sources();
            for source in &sources {
                for relation in &source.mapping.relations {
                    self.relate(index, source, relation)?;
                }
                for collection in &source.mapping.element_collections {
                    let (owner, reference) = self.owner_side(index);
                    let side = source_side(source, &owner, reference.as_deref());
                    let mut writer = self.writer(&source.naming);
                    let compiled = configure_collection(&mut writer, &side, source.node, collection)?;
                    self.drafts[index].collections.push(compiled);
                }
                for map in &source.mapping.maps {
                    let (owner, reference) = self.owner_side(index);
                    let side = source_side(source, &owner, reference.as_deref());
                    let mut writer = self.writer(&source.naming);
                    let compiled = configure_map(&mut writer, &side, source.node, map)?;
                    self.drafts[index].maps.push(compiled);
                }
            }
        }

        let mut hierarchies = BTreeMap::new();
        let mut by_entity = HashMap::new();
        for draft in std::mem::take(&mut self.drafts) {
            for (node, class) in draft.tree.nodes().iter().enumerate() {
                by_entity.insert(class.entity.clone(), (draft.root.clone(), node));
            }
            let hierarchy = draft.into_hierarchy(&self.schema);
            info!(
                "Compiled '{}': {} concrete type(s), {} relation(s), tables {:?}",
                hierarchy.root,
                hierarchy.layouts.len(),
                hierarchy.relations.len(),
                hierarchy.join_tree.tables()
            );
            hierarchies.insert(hierarchy.root.clone(), hierarchy);
        }
        let registry = Registry {
            hierarchies,
            by_entity,
            dialect: Arc::clone(&self.config.dialect),
            log_statements: self.config.log_statements,
            in_clause_size: self.config.in_clause_size,
        };
        Ok((self.schema, registry))
    }

    fn writer<'w>(&'w mut self, naming: &'w Naming) -> SchemaWriter<'w> {
        SchemaWriter {
            schema: &mut self.schema,
            naming,
            max_identifier_length: self.config.max_identifier_length,
        }
    }

    fn identifier_runtime(
        &mut self,
        entity: &str,
        identifier: &IdentifierMapping,
        table_per_class: bool,
    ) -> ConfigResult<IdentifierRuntime> {
        let policy = &identifier.policy;
        let unsupported = |reason: &str| ConfigurationError::UnsupportedIdentifierPolicy {
            entity: entity.to_string(),
            policy: policy.label().to_string(),
            reason: reason.to_string(),
        };
        if !matches!(policy, IdentifierPolicy::AlreadyAssigned(_))
            && identifier.data_type != DataType::Integer
        {
            return Err(unsupported("generated identifiers are integers"));
        }
        let runtime = match policy {
            IdentifierPolicy::AlreadyAssigned(marker) => {
                IdentifierRuntime::AlreadyAssigned(marker.clone())
            }
            IdentifierPolicy::AutoIncrement if table_per_class => {
                return Err(unsupported(
                    "table-per-class rows are spread over several tables",
                ));
            }
            IdentifierPolicy::AutoIncrement => IdentifierRuntime::AutoIncrement,
            IdentifierPolicy::Sequence(name) => {
                self.schema.add_sequence(Sequence {
                    name: name.clone(),
                    start: 1,
                    increment: 1,
                });
                IdentifierRuntime::Sequence(name.clone())
            }
            IdentifierPolicy::PooledHiLo(sequence) => {
                if let Some(backing) = sequence.database_sequence() {
                    self.schema.add_sequence(backing);
                }
                IdentifierRuntime::PooledHiLo(Arc::clone(sequence))
            }
            IdentifierPolicy::NamedHiLo(name) => {
                let pool_size = self.config.hilo_pool_size;
                let sequence = Arc::clone(self.hilo.entry(name.clone()).or_insert_with(|| {
                    Arc::new(PooledHiLoSequence::with_source(
                        name,
                        pool_size,
                        SequenceHighValues::new(name),
                    ))
                }));
                if let Some(backing) = sequence.database_sequence() {
                    self.schema.add_sequence(backing);
                }
                IdentifierRuntime::PooledHiLo(sequence)
            }
        };
        Ok(runtime)
    }

    /// Tables, columns and class tree of the hierarchy rooted at `mapping`.
    fn lay_out(&mut self, mapping: &'a EntityMapping) -> ConfigResult<Draft<'a>> {
        let chain = inheritance_chain(mapping)?;
        let levels: Vec<&'a EntityMapping> = chain.iter().map(|(m, _)| *m).collect();
        let top = levels[0];
        let identifier = top
            .identifier
            .as_ref()
            .ok_or_else(|| ConfigurationError::MissingIdentifier(mapping.entity.clone()))?;
        if let Some(level) = levels[1..].iter().find(|l| l.identifier.is_some()) {
            return Err(ConfigurationError::IdentifierRedefinition {
                entity: level.entity.clone(),
                defined_by: top.entity.clone(),
            });
        }
        if let Some(level) = levels[..levels.len() - 1]
            .iter()
            .find(|l| l.polymorphism.is_some())
        {
            return Err(invalid(
                &level.entity,
                format!("is inherited by '{}' and cannot declare sub-entities", mapping.entity),
            ));
        }

        let mut scopes: Vec<NamingScope> = Vec::with_capacity(levels.len());
        for (i, level) in levels.iter().enumerate() {
            let scope = match i {
                0 => level.naming.over(&self.config.naming),
                _ => level.naming.over(&scopes[i - 1]),
            };
            scopes.push(scope);
        }
        let namings: Vec<Naming> = scopes.iter().map(NamingScope::resolve).collect();

        let id_column = identifier
            .column
            .clone()
            .unwrap_or_else(|| namings[0].column.column_name(&identifier.property));
        let id_origin = format!("{}::{}", top.entity, identifier.property);
        let id_type = identifier.data_type;
        let table_per_class = mapping
            .polymorphism
            .as_ref()
            .is_some_and(|p| p.kind == PolymorphismKind::TablePerClass);
        let runtime = self.identifier_runtime(&mapping.entity, identifier, table_per_class)?;

        let mut version = None;
        for (i, level) in levels.iter().enumerate() {
            let Some(declared) = &level.version else {
                continue;
            };
            if version.is_some() {
                return Err(invalid(
                    &level.entity,
                    format!("declares version '{}' under a versioned ancestor", declared.property),
                ));
            }
            let column = declared
                .column
                .clone()
                .unwrap_or_else(|| namings[i].column.column_name(&declared.property));
            let spec = ColumnSpec {
                column: Column::new(&column, declared.data_type()).not_null(),
                origin: format!("{}::{}", level.entity, declared.property),
                binding: Binding::Version {
                    column: column.clone(),
                },
                unique: false,
            };
            version = Some((
                VersionRuntime {
                    mapping: declared.clone(),
                    column,
                },
                spec,
            ));
        }

        // Consecutive merged levels share the table of the most derived one.
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (i, (_, joined)) in chain.iter().enumerate() {
            match groups.last_mut() {
                Some(group) if !joined => group.push(i),
                _ => groups.push(vec![i]),
            }
        }

        let mut level_tables = vec![None; levels.len()];
        let mut group_tables: Vec<String> = Vec::new();
        let mut group_owners = Vec::new();
        let mut inherited = Vec::new();
        let mut root_layouts = Vec::new();
        for (g, group) in groups.iter().enumerate() {
            let last = group[group.len() - 1];
            let owner = levels[last];
            let specs: Vec<ColumnSpec> = group
                .iter()
                .flat_map(|&i| entity_columns(levels[i], &scopes[i], &namings[i]))
                .collect();
            if table_per_class {
                inherited.extend(specs);
                continue;
            }
            let table = nominal_table(owner, &namings[last]);
            let max_identifier_length = self.config.max_identifier_length;
            let mut writer = self.writer(&namings[last]);
            writer.ensure_table(Table::new(&table), &owner.entity)?;
            let mut id = Column::new(&id_column, id_type).not_null();
            if g == 0 && runtime.generated_by_database() {
                id = id.auto_increment();
            }
            writer.add_column(&table, id, &id_origin)?;
            primary_key(&mut writer, &table, &id_column)?;
            if let Some(previous) = group_tables.last() {
                writer.schema.add_foreign_key(
                    &table,
                    &[id_column.clone()],
                    previous,
                    &[id_column.clone()],
                    namings[last].foreign_key.as_ref(),
                    max_identifier_length,
                )?;
            }
            let mut layout = TableLayout {
                table: table.clone(),
                bindings: Vec::new(),
            };
            for spec in specs {
                add_spec(&mut writer, &table, spec, &mut layout.bindings)?;
            }
            if g == 0
                && let Some((_, spec)) = &version
            {
                add_spec(&mut writer, &table, spec.clone(), &mut layout.bindings)?;
            }
            for &i in group {
                level_tables[i] = Some(table.clone());
            }
            debug!("Levels {:?} of '{}' stored in '{}'", group, mapping.entity, table);
            group_tables.push(table);
            group_owners.push(owner.entity.clone());
            root_layouts.push(layout);
        }
        if table_per_class && let Some((_, spec)) = &version {
            inherited.push(spec.clone());
        }

        let root_scope = scopes[scopes.len() - 1].clone();
        let root_name = nominal_table(mapping, &namings[namings.len() - 1]);
        let mut tree = ClassTree::new();
        tree.push(ClassNode {
            entity: mapping.entity.clone(),
            parent: None,
            children: Vec::new(),
            policy: node_policy(mapping),
            discriminator: None,
            home_table: group_tables.last().cloned(),
            instantiable: instantiable(mapping),
        });

        let mut draft = Draft {
            root: mapping.entity.clone(),
            levels,
            level_scopes: scopes,
            level_tables,
            group_tables,
            group_owners,
            table_per_class,
            inherited,
            id_column,
            id_origin,
            id_type,
            identifier: runtime,
            version: version.map(|(runtime, _)| runtime),
            tree,
            node_mappings: vec![mapping],
            node_scopes: vec![root_scope],
            node_names: vec![root_name],
            contributions: vec![root_layouts],
            layouts: BTreeMap::new(),
            main_tables: Vec::new(),
            reference_table: None,
            relations: Vec::new(),
            collections: Vec::new(),
            maps: Vec::new(),
            relation_nodes: HashMap::new(),
        };
        self.place_subclasses(&mut draft, 0, None)?;

        if table_per_class {
            draft.main_tables = draft
                .tree
                .nodes()
                .iter()
                .skip(1)
                .filter_map(|n| n.home_table.clone())
                .collect();
            if draft.main_tables.is_empty() {
                return Err(invalid(
                    &mapping.entity,
                    "table-per-class needs at least one sub-entity".into(),
                ));
            }
        } else {
            draft.main_tables = vec![draft.group_tables[0].clone()];
            draft.reference_table = Some(draft.group_tables[0].clone());
        }
        draft.compute_layouts();
        Ok(draft)
    }

    /// Places the sub-entities of `node` according to its polymorphism policy.
    fn place_subclasses(
        &mut self,
        draft: &mut Draft<'a>,
        node: usize,
        placed_by: Option<PolymorphismKind>,
    ) -> ConfigResult<()> {
        let mapping = draft.node_mappings[node];
        let Some(policy) = &mapping.polymorphism else {
            return Ok(());
        };
        if let Some(parent) = placed_by {
            check_composition(&mapping.entity, parent, policy.kind)?;
        }
        let scope = draft.node_scopes[node].clone();
        let naming = scope.resolve();
        let home = draft.tree.node(node).home_table.clone();

        if let (Some(NodePolicy::SingleTable { column }), Some(table)) =
            (draft.tree.node(node).policy.clone(), &home)
        {
            let origin = format!("{}::<discriminator>", mapping.entity);
            self.writer(&naming).add_column(
                table,
                Column::new(&column, DataType::Text).not_null(),
                &origin,
            )?;
        }

        for sub in &policy.subclasses {
            let child = &sub.mapping;
            if child.identifier.is_some() {
                return Err(ConfigurationError::IdentifierRedefinition {
                    entity: child.entity.clone(),
                    defined_by: draft.levels[0].entity.clone(),
                });
            }
            if child.parent.is_some() {
                return Err(invalid(
                    &child.entity,
                    format!("is a sub-entity of '{}' and cannot also inherit", mapping.entity),
                ));
            }
            if child.version.is_some() {
                return Err(invalid(
                    &child.entity,
                    "a sub-entity cannot declare its own version".into(),
                ));
            }
            let child_scope = child.naming.over(&scope);
            let child_naming = child_scope.resolve();
            let nominal = nominal_table(child, &child_naming);
            let specs = entity_columns(child, &child_scope, &child_naming);
            let max_identifier_length = self.config.max_identifier_length;
            let mut writer = self.writer(&child_naming);

            let table = match policy.kind {
                PolymorphismKind::SingleTable => home.clone().ok_or_else(|| {
                    invalid(&mapping.entity, "has no table to share with sub-entities".into())
                })?,
                PolymorphismKind::JoinedTables | PolymorphismKind::TablePerClass => {
                    writer.ensure_table(Table::new(&nominal), &child.entity)?;
                    writer.add_column(
                        &nominal,
                        Column::new(&draft.id_column, draft.id_type).not_null(),
                        &draft.id_origin,
                    )?;
                    primary_key(&mut writer, &nominal, &draft.id_column)?;
                    nominal.clone()
                }
            };
            let mut layout = TableLayout {
                table: table.clone(),
                bindings: Vec::new(),
            };
            match policy.kind {
                PolymorphismKind::JoinedTables => {
                    if let Some(parent_table) = &home {
                        writer.schema.add_foreign_key(
                            &table,
                            &[draft.id_column.clone()],
                            parent_table,
                            &[draft.id_column.clone()],
                            child_naming.foreign_key.as_ref(),
                            max_identifier_length,
                        )?;
                    }
                }
                PolymorphismKind::TablePerClass => {
                    for spec in &draft.inherited {
                        add_spec(&mut writer, &table, spec.clone(), &mut layout.bindings)?;
                    }
                }
                PolymorphismKind::SingleTable => {}
            }
            for mut spec in specs {
                if policy.kind == PolymorphismKind::SingleTable {
                    spec.column.nullable = true;
                }
                add_spec(&mut writer, &table, spec, &mut layout.bindings)?;
            }

            let discriminator = (policy.kind == PolymorphismKind::SingleTable)
                .then(|| sub.discriminator.clone().unwrap_or_else(|| child.entity.clone()));
            let index = draft.tree.push(ClassNode {
                entity: child.entity.clone(),
                parent: Some(node),
                children: Vec::new(),
                policy: node_policy(child),
                discriminator,
                home_table: Some(table.clone()),
                instantiable: instantiable(child),
            });
            draft.node_mappings.push(child);
            draft.node_scopes.push(child_scope);
            draft.node_names.push(nominal);
            draft.contributions.push(vec![layout]);
            debug!(
                "Placed '{}' under '{}' ({}) in table '{}'",
                child.entity, mapping.entity, policy.kind, table
            );
            self.place_subclasses(draft, index, Some(policy.kind))?;
        }
        Ok(())
    }

    /// Owner id column and type plus reference table of draft `index`.
    fn owner_side(&self, index: usize) -> ((String, DataType), Option<String>) {
        let draft = &self.drafts[index];
        (
            (draft.id_column.clone(), draft.id_type),
            draft.reference_table.clone(),
        )
    }

    fn relate(
        &mut self,
        owner_index: usize,
        source: &Source<'a>,
        relation: &RelationMapping,
    ) -> ConfigResult<()> {
        let &(target_index, target_node) = self
            .by_entity
            .get(&relation.target)
            .ok_or_else(|| ConfigurationError::UnknownEntity(relation.target.clone()))?;
        let target = &self.drafts[target_index];
        if let Some(back) = &relation.mapped_by
            && target.maps_relation(target_node, back)
        {
            return Err(invalid(
                &source.entity,
                format!(
                    "'{}' is mapped by '{}::{}', which cannot be a mapped relation itself",
                    relation.property, relation.target, back
                ),
            ));
        }
        let target_root = target.root.clone();
        let target_name = target.node_names[target_node].clone();
        let target_tables = target.main_tables.clone();
        let target_reference = target.reference_table.clone();
        let target_id = (target.id_column.clone(), target.id_type);
        let (owner_id, owner_reference) = self.owner_side(owner_index);

        let owner_side = source_side(source, &owner_id, owner_reference.as_deref());
        let target_side = Side {
            entity: &relation.target,
            table_name: &target_name,
            tables: &target_tables,
            reference_table: target_reference.as_deref(),
            id_column: &target_id.0,
            id_type: target_id.1,
        };
        let storage = {
            let mut writer = self.writer(&source.naming);
            configure_relation(&mut writer, &owner_side, &target_side, relation)?
        };

        let position = self.drafts[owner_index].relations.len();
        match &storage {
            RelationStorage::SourceColumn { column } => {
                self.drafts[owner_index].bind(
                    source.node,
                    &source.tables,
                    Binding::JoinColumn {
                        relation: position,
                        column: column.clone(),
                    },
                );
            }
            RelationStorage::TargetColumn { column, index } => {
                let target = &mut self.drafts[target_index];
                let shadows = std::iter::once(column).chain(index.iter());
                for shadow in shadows {
                    target.bind(
                        target_node,
                        &target_tables,
                        Binding::Shadow {
                            column: shadow.clone(),
                        },
                    );
                }
            }
            RelationStorage::Association(_) => {}
        }

        let owner = &mut self.drafts[owner_index];
        if let Some(table) = target_tables.first() {
            for owner_table in &source.tables {
                owner.relation_nodes.entry(owner_table.clone()).or_default().push(
                    JoinNode::relation(
                        table,
                        format!("r{}", position),
                        &relation.target,
                        &relation.property,
                    ),
                );
            }
        }
        owner.relations.push(CompiledRelation {
            owner_node: source.node,
            property: relation.property.clone(),
            kind: relation.kind,
            mode: relation.mode,
            list: relation.collection == CollectionKind::List,
            mapped_by: relation.mapped_by.clone(),
            mandatory: relation.mandatory,
            target_root,
            target_node,
            storage,
        });
        Ok(())
    }
}

fn source_side<'s>(
    source: &'s Source<'_>,
    id: &'s (String, DataType),
    reference_table: Option<&'s str>,
) -> Side<'s> {
    Side {
        entity: &source.entity,
        table_name: &source.table_name,
        tables: &source.tables,
        reference_table,
        id_column: &id.0,
        id_type: id.1,
    }
}
