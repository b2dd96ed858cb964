// ============================================================================
// Row materialization
// ============================================================================
//
// Loads entities through their hierarchy joins, then fills relations and
// collections with one batched query per relation. An identity map keyed by
// (root, id) makes shared targets and cycles load once.
//
// ============================================================================

use super::hierarchy::{Binding, Hierarchy, Registry};
use super::relation::{ElementColumns, RelationStorage};
use super::session::Session;
use crate::core::{Element, Entity, PersistError, Record, Result, Value};
use crate::mapping::RelationKind;
use crate::result::ResultRow;
use crate::statement::{Condition, Select};
use log::trace;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Rows to load from a hierarchy.
#[derive(Debug, Clone)]
pub(crate) enum Filter {
    All,
    Ids(Vec<Value>),
    /// Values of a column of the main tables.
    Column { column: String, values: Vec<Value> },
}

/// A loaded entity with the requested extra columns of its main table row.
#[derive(Debug, Clone)]
pub(crate) struct Loaded {
    pub entity: Entity,
    pub extras: Vec<Value>,
}

#[derive(Debug, Default)]
pub(crate) struct LoadContext {
    identity: HashMap<(String, Value), Entity>,
    /// Join column values read for (entity address, relation index).
    join_values: HashMap<(usize, usize), Value>,
}

pub(crate) struct Loader<'s, 'r, 'c> {
    registry: &'r Registry,
    session: &'s mut Session<'r, 'c>,
    context: LoadContext,
}

impl<'s, 'r, 'c> Loader<'s, 'r, 'c> {
    pub fn new(registry: &'r Registry, session: &'s mut Session<'r, 'c>) -> Self {
        Self {
            registry,
            session,
            context: LoadContext::default(),
        }
    }

    /// Entities of `root` matching `filter`, relations included.
    pub fn fetch(&mut self, root: &str, filter: Filter, extras: &[String]) -> Result<Vec<Loaded>> {
        let registry = self.registry;
        let hierarchy = registry.hierarchy(root)?;
        let chunks: Vec<Option<Vec<Value>>> = match &filter {
            Filter::All => vec![None],
            Filter::Ids(values) | Filter::Column { values, .. } => {
                if values.is_empty() {
                    return Ok(Vec::new());
                }
                values
                    .chunks(registry.in_clause_size.max(1))
                    .map(|c| Some(c.to_vec()))
                    .collect()
            }
        };

        let mut loaded = Vec::new();
        let mut fresh = Vec::new();
        for branch in 0..hierarchy.join_tree.branches().len() {
            let root_alias = hierarchy.join_tree.branches()[branch].alias.clone();
            let main_alias = hierarchy
                .main_tables
                .iter()
                .find_map(|t| hierarchy.join_tree.alias_of(branch, t))
                .unwrap_or(&root_alias)
                .to_string();
            for chunk in &chunks {
                let mut select = hierarchy.join_tree.to_select(branch);
                match (&filter, chunk) {
                    (Filter::Ids(_), Some(values)) => {
                        select = select.filter(
                            &root_alias,
                            Condition::is_in(&hierarchy.id_column, values.clone()),
                        );
                    }
                    (Filter::Column { column, .. }, Some(values)) => {
                        select = select.filter(&main_alias, Condition::is_in(column, values.clone()));
                    }
                    _ => {}
                }
                select = select.order_by(&root_alias, &hierarchy.id_column);
                let rows = self.session.query(&select)?;
                for row in rows.iter() {
                    let id = row.get(&root_alias, &hierarchy.id_column);
                    if id.is_null() {
                        continue;
                    }
                    let values = extras.iter().map(|c| row.get(&main_alias, c)).collect();
                    let key = (hierarchy.root.clone(), id.clone());
                    let entity = match self.context.identity.get(&key) {
                        Some(known) => known.clone(),
                        None => {
                            let entity = self.materialize(hierarchy, branch, &row, id)?;
                            self.context.identity.insert(key, entity.clone());
                            fresh.push(entity.clone());
                            entity
                        }
                    };
                    loaded.push(Loaded {
                        entity,
                        extras: values,
                    });
                }
            }
        }
        trace!("Loaded {} '{}' row(s), {} new", loaded.len(), root, fresh.len());
        self.load_relations(hierarchy, &fresh)?;
        Ok(loaded)
    }

    fn materialize(
        &mut self,
        hierarchy: &Hierarchy,
        branch: usize,
        row: &ResultRow<'_>,
        id: Value,
    ) -> Result<Entity> {
        let tree = &hierarchy.join_tree;
        let node = match tree.branch_type(branch) {
            Some(entity) => hierarchy.tree.find(entity),
            None => hierarchy.tree.resolve(&hierarchy.id_column, |table, column| {
                tree.alias_of(branch, table)
                    .map(|alias| row.get(alias, column))
                    .unwrap_or(Value::Null)
            }),
        };
        let unresolvable = || PersistError::UnresolvableRow {
            root: hierarchy.root.clone(),
            id: id.clone(),
        };
        let node = node.ok_or_else(unresolvable)?;
        let type_name = &hierarchy.tree.node(node).entity;
        let layout = hierarchy.layouts.get(type_name).ok_or_else(unresolvable)?;

        let entity = Entity::with_id(type_name, id.clone());
        hierarchy.identifier.mark_persisted(&entity);
        let mut embedded: BTreeMap<&str, Record> = BTreeMap::new();
        for table in &layout.tables {
            let Some(alias) = tree.alias_of(branch, &table.table) else {
                continue;
            };
            for binding in &table.bindings {
                match binding {
                    Binding::Property {
                        property, column, ..
                    } => entity.set(property, row.get(alias, column)),
                    Binding::Embedded {
                        property,
                        sub_property,
                        column,
                    } => embedded
                        .entry(property)
                        .or_default()
                        .set(sub_property, row.get(alias, column)),
                    Binding::JoinColumn { relation, column } => {
                        let value = row.get(alias, column);
                        if !value.is_null() {
                            self.context
                                .join_values
                                .insert((entity.address(), *relation), value);
                        }
                    }
                    Binding::Version { column } => {
                        if let Some(version) = &hierarchy.version {
                            entity.set(version.property(), row.get(alias, column));
                        }
                    }
                    Binding::Shadow { .. } | Binding::Discriminator { .. } => {}
                }
            }
        }
        for (property, record) in embedded {
            entity.set_embedded(property, (!record.is_empty()).then_some(record));
        }
        Ok(entity)
    }

    fn node_of(&self, hierarchy: &Hierarchy, entity: &Entity) -> Option<usize> {
        hierarchy.layouts.get(&entity.type_name()).map(|l| l.node)
    }

    fn load_relations(&mut self, hierarchy: &Hierarchy, fresh: &[Entity]) -> Result<()> {
        if fresh.is_empty() {
            return Ok(());
        }
        let nodes: Vec<Option<usize>> = fresh.iter().map(|e| self.node_of(hierarchy, e)).collect();
        let owners_of = |owner_node: usize| -> Vec<Entity> {
            fresh
                .iter()
                .zip(&nodes)
                .filter(|(_, node)| node.is_some_and(|n| hierarchy.tree.is_a(n, owner_node)))
                .map(|(e, _)| e.clone())
                .collect()
        };

        for (index, relation) in hierarchy.relations.iter().enumerate() {
            let owners = owners_of(relation.owner_node);
            if owners.is_empty() {
                continue;
            }
            match &relation.storage {
                RelationStorage::SourceColumn { .. } => {
                    let mut seen = HashSet::new();
                    let keys: Vec<Value> = owners
                        .iter()
                        .filter_map(|o| self.context.join_values.get(&(o.address(), index)).cloned())
                        .filter(|k| seen.insert(k.clone()))
                        .collect();
                    let targets = self.by_id(&relation.target_root, keys)?;
                    for owner in &owners {
                        let target = self
                            .context
                            .join_values
                            .get(&(owner.address(), index))
                            .and_then(|k| targets.get(k).cloned());
                        owner.set_one(&relation.property, target);
                    }
                }
                RelationStorage::TargetColumn { column, index: idx } => {
                    let mut extras = vec![column.clone()];
                    extras.extend(idx.iter().cloned());
                    let owner_ids: Vec<Value> = owners.iter().filter_map(Entity::id).collect();
                    let loaded = self.fetch(
                        &relation.target_root,
                        Filter::Column {
                            column: column.clone(),
                            values: owner_ids,
                        },
                        &extras,
                    )?;
                    let mut grouped: HashMap<Value, Vec<(Option<i64>, Entity)>> = HashMap::new();
                    for item in loaded {
                        let position = item.extras.get(1).and_then(Value::as_i64);
                        grouped
                            .entry(item.extras[0].clone())
                            .or_default()
                            .push((position, item.entity));
                    }
                    for owner in &owners {
                        let id = owner.id().unwrap_or(Value::Null);
                        let items = grouped.remove(&id).unwrap_or_default();
                        let targets = ordered(owner, &relation.property, items, relation.list)?;
                        if let Some(back) = &relation.mapped_by {
                            for target in &targets {
                                target.set_one(back, Some(owner.clone()));
                            }
                        }
                        if relation.kind == RelationKind::OneToOne {
                            owner.set_one(&relation.property, targets.into_iter().next());
                        } else {
                            owner.set_many(&relation.property, targets);
                        }
                    }
                }
                RelationStorage::Association(association) => {
                    let mut columns = vec![
                        association.owner_column.as_str(),
                        association.target_column.as_str(),
                    ];
                    columns.extend(association.index.as_deref());
                    let rows = self.owned_rows(&association.table, &association.owner_column, &columns, &owners)?;
                    let mut seen = HashSet::new();
                    let keys: Vec<Value> = rows
                        .iter()
                        .map(|r| r[1].clone())
                        .filter(|k| seen.insert(k.clone()))
                        .collect();
                    let targets = self.by_id(&relation.target_root, keys)?;
                    let mut grouped: HashMap<Value, Vec<(Option<i64>, Entity)>> = HashMap::new();
                    for row in rows {
                        if let Some(target) = targets.get(&row[1]) {
                            grouped
                                .entry(row[0].clone())
                                .or_default()
                                .push((row.get(2).and_then(Value::as_i64), target.clone()));
                        }
                    }
                    for owner in &owners {
                        let id = owner.id().unwrap_or(Value::Null);
                        let items = grouped.remove(&id).unwrap_or_default();
                        let targets = ordered(owner, &relation.property, items, relation.list)?;
                        owner.set_many(&relation.property, targets);
                    }
                }
            }
        }

        for collection in &hierarchy.collections {
            let owners = owners_of(collection.owner_node);
            if owners.is_empty() {
                continue;
            }
            let mut columns = vec![collection.owner_column.as_str()];
            match &collection.element {
                ElementColumns::Value(column) => columns.push(column),
                ElementColumns::Record(fields) => columns.extend(fields.iter().map(|(_, c)| c.as_str())),
            }
            let index_slot = columns.len();
            columns.extend(collection.index.as_deref());
            let rows = self.owned_rows(&collection.table, &collection.owner_column, &columns, &owners)?;
            let mut grouped: HashMap<Value, Vec<(Option<i64>, Element)>> = HashMap::new();
            for row in rows {
                let element = match &collection.element {
                    ElementColumns::Value(_) => Element::Value(row[1].clone()),
                    ElementColumns::Record(fields) => {
                        let mut record = Record::new();
                        for (slot, (property, _)) in fields.iter().enumerate() {
                            record.set(property, row[slot + 1].clone());
                        }
                        Element::Record(record)
                    }
                };
                let position = row.get(index_slot).and_then(Value::as_i64);
                grouped.entry(row[0].clone()).or_default().push((position, element));
            }
            for owner in &owners {
                let id = owner.id().unwrap_or(Value::Null);
                let items = grouped.remove(&id).unwrap_or_default();
                let elements = ordered(owner, &collection.property, items, collection.index.is_some())?;
                owner.set_elements(&collection.property, elements);
            }
        }

        for map in &hierarchy.maps {
            let owners = owners_of(map.owner_node);
            if owners.is_empty() {
                continue;
            }
            let columns = [
                map.owner_column.as_str(),
                map.key_column.as_str(),
                map.value_column.as_str(),
            ];
            let rows = self.owned_rows(&map.table, &map.owner_column, &columns, &owners)?;
            let mut grouped: HashMap<Value, BTreeMap<Value, Value>> = HashMap::new();
            for row in rows {
                grouped
                    .entry(row[0].clone())
                    .or_default()
                    .insert(row[1].clone(), row[2].clone());
            }
            for owner in &owners {
                let id = owner.id().unwrap_or(Value::Null);
                owner.set_map(&map.property, grouped.remove(&id).unwrap_or_default());
            }
        }
        Ok(())
    }

    /// Entities of `root` by identifier.
    fn by_id(&mut self, root: &str, ids: Vec<Value>) -> Result<HashMap<Value, Entity>> {
        let loaded = self.fetch(root, Filter::Ids(ids), &[])?;
        Ok(loaded
            .into_iter()
            .filter_map(|l| l.entity.id().map(|id| (id, l.entity)))
            .collect())
    }

    /// `columns` of the rows of `table` whose `owner_column` holds one of the
    /// owners' identifiers.
    fn owned_rows(
        &mut self,
        table: &str,
        owner_column: &str,
        columns: &[&str],
        owners: &[Entity],
    ) -> Result<Vec<Vec<Value>>> {
        let ids: Vec<Value> = owners.iter().filter_map(Entity::id).collect();
        let mut rows = Vec::new();
        for chunk in ids.chunks(self.registry.in_clause_size.max(1)) {
            let select = Select::from(table, "c")
                .columns("c", columns.iter().copied())
                .filter("c", Condition::is_in(owner_column, chunk.to_vec()));
            let result = self.session.query(&select)?;
            rows.extend(
                result
                    .iter()
                    .map(|row| columns.iter().map(|c| row.get("c", c)).collect::<Vec<_>>()),
            );
        }
        Ok(rows)
    }
}

/// Items of one owner, sorted by index when the collection is a list. Two
/// items at the same index mean the stored list is corrupted.
fn ordered<T>(
    owner: &Entity,
    property: &str,
    mut items: Vec<(Option<i64>, T)>,
    list: bool,
) -> Result<Vec<T>> {
    if list {
        items.sort_by_key(|(position, _)| *position);
        for pair in items.windows(2) {
            if let (Some(a), Some(b)) = (pair[0].0, pair[1].0)
                && a == b
            {
                return Err(PersistError::CorruptedIndex {
                    entity: owner.type_name(),
                    property: property.to_string(),
                    owner: owner.id().unwrap_or(Value::Null),
                    index: a,
                });
            }
        }
    }
    Ok(items.into_iter().map(|(_, item)| item).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_sorts_by_index() {
        let owner = Entity::with_id("Person", 1i64);
        let items = vec![(Some(3), "c"), (Some(1), "a"), (Some(2), "b")];
        assert_eq!(ordered(&owner, "names", items, true).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ordered_rejects_duplicate_index() {
        let owner = Entity::with_id("Person", 1i64);
        let items = vec![(Some(1), "a"), (Some(1), "b")];
        let err = ordered(&owner, "names", items, true).unwrap_err();
        assert!(matches!(err, PersistError::CorruptedIndex { index: 1, .. }));
    }

    #[test]
    fn test_sets_keep_row_order() {
        let owner = Entity::with_id("Person", 1i64);
        let items = vec![(None, "b"), (None, "a")];
        assert_eq!(ordered(&owner, "names", items, false).unwrap(), vec!["b", "a"]);
    }
}
