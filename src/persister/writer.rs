// ============================================================================
// Write path
// ============================================================================
//
// Insert, update and delete of whole aggregates. Foreign keys are checked per
// statement, so writes follow the key direction:
//
//   insert / update: source-owned targets, owner rows (parent tables first),
//                    target-owned targets, association and collection rows
//   delete:          association and collection rows, target-owned targets,
//                    owner rows (child tables first), source-owned targets
//
// A join column whose target is still being inserted higher up the same
// operation (a reference cycle) is written as NULL and fixed once the
// outermost batch completes. Orphans are deleted at the same point, minus
// those another owner of the operation took over.
//
// ============================================================================

use super::cascade::{CascadeOperation, RemovedTarget, decide};
use super::hierarchy::{Binding, Hierarchy, Registry};
use super::listener::ListenerSet;
use super::load::{Filter, Loader};
use super::relation::{AssociationTable, CompiledCollection, CompiledMap, CompiledRelation, ElementColumns, RelationStorage};
use super::session::Session;
use crate::core::{ConfigurationError, Element, Entity, PersistError, Result, Value};
use crate::statement::{Condition, Delete, Insert, Update};
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info_span;

/// Column update postponed until its referenced entity is persisted.
#[derive(Debug)]
struct Fixup {
    /// Root of the hierarchy owning the row to update.
    root: String,
    row: Entity,
    table: String,
    column: String,
    /// Entity whose identifier goes into `column`.
    target: Entity,
    extra: Vec<(String, Value)>,
}

/// Targets currently held by `relation` on `entity`.
fn targets(entity: &Entity, relation: &CompiledRelation) -> Vec<Entity> {
    if relation.is_to_many() {
        entity.many(&relation.property)
    } else {
        entity.one(&relation.property).into_iter().collect()
    }
}

/// Same instance, or same persistent identity.
fn same(a: &Entity, b: &Entity) -> bool {
    a.same_instance(b) || a.id().is_some_and(|id| b.id().as_ref() == Some(&id))
}

fn embedded_value(entity: &Entity, property: &str, sub_property: &str) -> Value {
    entity
        .embedded(property)
        .map(|record| record.get(sub_property))
        .unwrap_or(Value::Null)
}

fn has_version(bindings: &[Binding]) -> bool {
    bindings.iter().any(|b| matches!(b, Binding::Version { .. }))
}

/// Condition matching `value` in `column`, NULL included.
fn matching(column: &str, value: &Value) -> Condition {
    if value.is_null() {
        Condition::IsNull(column.to_string())
    } else {
        Condition::eq(column, value.clone())
    }
}

fn position_value(position: usize) -> Value {
    Value::Integer(position as i64 + 1)
}

/// One owner of a batch with its state as last read.
struct Owner<'e> {
    entity: &'e Entity,
    previous: Option<&'e Entity>,
    id: Value,
    node: usize,
}

/// Targets of `relation` held by `owner` now and before the change.
fn held_targets(owner: &Owner<'_>, relation: &CompiledRelation) -> (Vec<Entity>, Vec<Entity>) {
    let current = targets(owner.entity, relation);
    let before = owner
        .previous
        .map(|p| targets(p, relation))
        .unwrap_or_default();
    (current, before)
}

fn removed<'b>(current: &[Entity], before: &'b [Entity]) -> impl Iterator<Item = &'b Entity> {
    before
        .iter()
        .filter(|b| !current.iter().any(|c| same(c, b)))
}

pub(crate) struct Writer<'s, 'r, 'c> {
    registry: &'r Registry,
    session: &'s mut Session<'r, 'c>,
    /// Entities already handled by this operation, by handle address.
    visited: HashSet<usize>,
    /// Reverse and index column values to write when an entity is inserted
    /// as the target of a target-owned relation.
    shadows: HashMap<(usize, String), Value>,
    fixups: Vec<Fixup>,
    /// Targets referenced by some owner of this operation, by root and id.
    claimed: HashSet<(String, Value)>,
    /// Entities dropped from an orphan-removing relation, by root.
    orphans: Vec<(String, Entity)>,
    depth: usize,
}

impl<'s, 'r, 'c> Writer<'s, 'r, 'c> {
    pub fn new(registry: &'r Registry, session: &'s mut Session<'r, 'c>) -> Self {
        Self {
            registry,
            session,
            visited: HashSet::new(),
            shadows: HashMap::new(),
            fixups: Vec::new(),
            claimed: HashSet::new(),
            orphans: Vec::new(),
            depth: 0,
        }
    }

    /// Runs one logical batch between its listeners. The outermost batch
    /// applies the pending fixups before reporting success.
    fn run<I: ?Sized>(
        &mut self,
        listeners: &ListenerSet<I, ()>,
        input: &I,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        listeners.fire_before(input);
        self.depth += 1;
        let mut result = body(self);
        self.depth -= 1;
        if result.is_ok() && self.depth == 0 {
            result = self.apply_fixups().and_then(|()| self.remove_orphans());
        }
        match &result {
            Ok(()) => listeners.fire_after(input, &()),
            Err(e) => listeners.fire_error(input, e),
        }
        result
    }

    fn apply_fixups(&mut self) -> Result<()> {
        for fixup in std::mem::take(&mut self.fixups) {
            let hierarchy = self.registry.hierarchy(&fixup.root)?;
            let value = hierarchy_of(self.registry, &fixup.target)
                .and_then(|h| h.id_of(&fixup.target))?;
            debug!(
                "Fixing {}.{} of {:?} to {}",
                fixup.table, fixup.column, fixup.row, value
            );
            let mut update = Update::new(&fixup.table).set(&fixup.column, value);
            for (column, value) in fixup.extra {
                update = update.set(&column, value);
            }
            let update = update.filter(Condition::eq(
                &hierarchy.id_column,
                hierarchy.id_of(&fixup.row)?,
            ));
            self.session.execute(update)?;
        }
        Ok(())
    }

    /// Deletes the pending orphans that no owner of the operation claimed.
    fn remove_orphans(&mut self) -> Result<()> {
        let mut by_root: BTreeMap<String, Vec<Entity>> = BTreeMap::new();
        for (root, orphan) in std::mem::take(&mut self.orphans) {
            if let Some(id) = orphan.id()
                && self.claimed.contains(&(root.clone(), id))
            {
                debug!("Keeping {:?}, claimed by another owner", orphan);
                continue;
            }
            let group = by_root.entry(root).or_default();
            if !group.iter().any(|o| same(o, &orphan)) {
                group.push(orphan);
            }
        }
        for (root, orphans) in by_root {
            self.delete(&root, &orphans)?;
        }
        Ok(())
    }

    fn claim(&mut self, root: &str, targets: &[Entity]) {
        for target in targets {
            if let Some(id) = target.id() {
                self.claimed.insert((root.to_string(), id));
            }
        }
    }

    /// Entities of `root` by identifier, loaded with their relations.
    pub fn load(&mut self, root: &str, ids: Vec<Value>) -> Result<HashMap<Value, Entity>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut loader = Loader::new(self.registry, &mut *self.session);
        let loaded = loader.fetch(root, Filter::Ids(ids), &[])?;
        Ok(loaded
            .into_iter()
            .filter_map(|l| l.entity.id().map(|id| (id, l.entity)))
            .collect())
    }

    // ------------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------------

    pub fn insert(&mut self, root: &str, entities: &[Entity]) -> Result<()> {
        let batch: Vec<Entity> = entities
            .iter()
            .filter(|e| self.visited.insert(e.address()))
            .cloned()
            .collect();
        if batch.is_empty() {
            return Ok(());
        }
        let registry = self.registry;
        let hierarchy = registry.hierarchy(root)?;
        let span = info_span!("persister.insert", entity = %root, batch = batch.len());
        let _enter = span.enter();
        self.run(&hierarchy.listeners.insert, batch.as_slice(), |w| {
            w.insert_batch(hierarchy, &batch)
        })
    }

    fn insert_batch(&mut self, hierarchy: &'r Hierarchy, batch: &[Entity]) -> Result<()> {
        for entity in batch {
            self.check_mandatory(hierarchy, entity)?;
        }
        self.cascade_source_targets(hierarchy, CascadeOperation::Insert, batch, &[])?;
        for entity in batch {
            hierarchy
                .identifier
                .before_insert(entity, self.session.connection())?;
            if let Some(version) = &hierarchy.version {
                version.initialize(entity);
            }
            self.insert_rows(hierarchy, entity)?;
        }
        self.write_dependents(hierarchy, CascadeOperation::Insert, batch, &[])
    }

    fn insert_rows(&mut self, hierarchy: &'r Hierarchy, entity: &Entity) -> Result<()> {
        let layout = hierarchy.layout(entity)?;
        for (position, table) in layout.tables.iter().enumerate() {
            let mut insert = Insert::new(&table.table);
            match entity.id() {
                Some(id) => insert = insert.value(&hierarchy.id_column, id),
                None if position == 0 && hierarchy.identifier.generated_by_database() => {}
                None => {
                    return Err(PersistError::NotPersisted {
                        entity: entity.type_name(),
                    });
                }
            }
            for binding in &table.bindings {
                if let Some(value) = self.insert_value(hierarchy, &table.table, entity, binding)? {
                    insert = insert.value(binding.column(), value);
                }
            }
            let outcome = self.session.execute(insert)?;
            if entity.id().is_none()
                && let Some(key) = outcome.generated_keys.into_iter().next()
            {
                entity.assign_id(key)?;
            }
        }
        hierarchy.identifier.after_insert(entity, None)
    }

    /// Value written for `binding` on insert, None to leave the column out.
    fn insert_value(
        &mut self,
        hierarchy: &'r Hierarchy,
        table: &str,
        entity: &Entity,
        binding: &Binding,
    ) -> Result<Option<Value>> {
        let value = match binding {
            Binding::Property { property, .. } => entity.get(property),
            Binding::Embedded {
                property,
                sub_property,
                ..
            } => embedded_value(entity, property, sub_property),
            Binding::JoinColumn { relation, column } => {
                self.join_value(hierarchy, table, entity, *relation, column)?
            }
            Binding::Version { .. } => match &hierarchy.version {
                Some(version) => version.current(entity),
                None => Value::Null,
            },
            Binding::Shadow { column } => {
                return Ok(self.shadows.remove(&(entity.address(), column.clone())));
            }
            Binding::Discriminator { value, .. } => Value::Text(value.clone()),
        };
        Ok(Some(value))
    }

    /// Key of the target of a source-owned relation. A target still waiting
    /// for its own insert yields NULL plus a fixup.
    fn join_value(
        &mut self,
        hierarchy: &'r Hierarchy,
        table: &str,
        entity: &Entity,
        relation: usize,
        column: &str,
    ) -> Result<Value> {
        let relation = &hierarchy.relations[relation];
        let Some(target) = entity.one(&relation.property) else {
            return Ok(Value::Null);
        };
        let target_hierarchy = self.registry.hierarchy(&relation.target_root)?;
        let cascades = decide(CascadeOperation::Insert, relation.mode).propagate;
        if target_hierarchy.is_persisted(&target) || !cascades {
            return target_hierarchy.id_of(&target);
        }
        self.fixups.push(Fixup {
            root: hierarchy.root.clone(),
            row: entity.clone(),
            table: table.to_string(),
            column: column.to_string(),
            target,
            extra: Vec::new(),
        });
        Ok(Value::Null)
    }

    fn check_mandatory(&self, hierarchy: &Hierarchy, entity: &Entity) -> Result<()> {
        let layout = hierarchy.layout(entity)?;
        for table in &layout.tables {
            for binding in &table.bindings {
                if let Binding::Property {
                    property,
                    mandatory: true,
                    ..
                } = binding
                    && entity.get(property).is_null()
                {
                    return Err(PersistError::MandatoryPropertyMissing {
                        entity: entity.type_name(),
                        property: property.clone(),
                    });
                }
            }
        }
        for (_, relation) in hierarchy.relations_of(layout.node) {
            if relation.mandatory
                && !relation.is_to_many()
                && entity.one(&relation.property).is_none()
            {
                return Err(PersistError::MandatoryRelationMissing {
                    entity: entity.type_name(),
                    property: relation.property.clone(),
                });
            }
        }
        Ok(())
    }

    /// Inserts or updates the targets of source-owned relations before their
    /// owners' rows reference them.
    fn cascade_source_targets(
        &mut self,
        hierarchy: &'r Hierarchy,
        operation: CascadeOperation,
        batch: &[Entity],
        previous: &[Option<Entity>],
    ) -> Result<()> {
        for relation in &hierarchy.relations {
            if !matches!(relation.storage, RelationStorage::SourceColumn { .. })
                || !decide(operation, relation.mode).propagate
            {
                continue;
            }
            let target_hierarchy = self.registry.hierarchy(&relation.target_root)?;
            let mut inserts = Vec::new();
            let mut updates = Vec::new();
            for (position, entity) in batch.iter().enumerate() {
                let Ok(layout) = hierarchy.layout(entity) else {
                    continue;
                };
                if !hierarchy.tree.is_a(layout.node, relation.owner_node) {
                    continue;
                }
                let Some(target) = entity.one(&relation.property) else {
                    continue;
                };
                if self.visited.contains(&target.address()) {
                    continue;
                }
                if !target_hierarchy.is_persisted(&target) {
                    inserts.push(target);
                } else if operation == CascadeOperation::Update {
                    let before = previous
                        .get(position)
                        .and_then(Option::as_ref)
                        .and_then(|old| old.one(&relation.property))
                        .filter(|old| same(old, &target));
                    updates.push((target, before));
                }
            }
            self.insert(&relation.target_root, &inserts)?;
            self.update(&relation.target_root, updates, false)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Relations, collections and maps of an owner batch
    // ------------------------------------------------------------------------

    /// Writes what hangs off owners whose rows are in place. `previous` holds
    /// the state read before the change, empty for new owners. Targets of one
    /// relation are cascaded in a single batch for all owners.
    fn write_dependents(
        &mut self,
        hierarchy: &'r Hierarchy,
        operation: CascadeOperation,
        batch: &[Entity],
        previous: &[Option<Entity>],
    ) -> Result<()> {
        let mut owners = Vec::with_capacity(batch.len());
        for (position, entity) in batch.iter().enumerate() {
            owners.push(Owner {
                entity,
                previous: previous.get(position).and_then(Option::as_ref),
                id: hierarchy.id_of(entity)?,
                node: hierarchy.layout(entity)?.node,
            });
        }
        for relation in &hierarchy.relations {
            let members: Vec<&Owner<'_>> = owners
                .iter()
                .filter(|o| hierarchy.tree.is_a(o.node, relation.owner_node))
                .collect();
            if members.is_empty() {
                continue;
            }
            match &relation.storage {
                RelationStorage::SourceColumn { .. } => {
                    for owner in &members {
                        self.remove_source_orphan(relation, operation, owner);
                    }
                }
                RelationStorage::TargetColumn { column, index } => {
                    self.write_reverse(relation, operation, column, index.as_deref(), &members)?;
                }
                RelationStorage::Association(association) => {
                    self.write_association(relation, operation, association, &members)?;
                }
            }
        }
        for owner in &owners {
            for collection in hierarchy.collections_of(owner.node) {
                self.write_elements(collection, &owner.id, owner.entity, owner.previous)?;
            }
            for map in hierarchy.maps_of(owner.node) {
                self.write_map(map, &owner.id, owner.entity, owner.previous)?;
            }
        }
        Ok(())
    }

    fn remove_source_orphan(
        &mut self,
        relation: &CompiledRelation,
        operation: CascadeOperation,
        owner: &Owner<'_>,
    ) {
        let current = owner.entity.one(&relation.property);
        self.claim(&relation.target_root, current.as_slice());
        let Some(before) = owner.previous.and_then(|p| p.one(&relation.property)) else {
            return;
        };
        if decide(operation, relation.mode).removed != RemovedTarget::DeleteOrphan {
            return;
        }
        if current.is_some_and(|now| same(&now, &before)) {
            return;
        }
        self.orphans.push((relation.target_root.clone(), before));
    }

    /// Inserts new targets, updates known ones and returns the targets that
    /// were inserted by this call.
    fn cascade_targets(
        &mut self,
        relation: &CompiledRelation,
        current: &[Entity],
        before: &[Entity],
    ) -> Result<Vec<Entity>> {
        let target_hierarchy = self.registry.hierarchy(&relation.target_root)?;
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for target in current {
            if self.visited.contains(&target.address()) {
                continue;
            }
            if target_hierarchy.is_persisted(target) {
                let old = before.iter().find(|b| same(b, target)).cloned();
                updates.push((target.clone(), old));
            } else {
                inserts.push(target.clone());
            }
        }
        self.insert(&relation.target_root, &inserts)?;
        self.update(&relation.target_root, updates, false)?;
        Ok(inserts)
    }

    fn write_reverse(
        &mut self,
        relation: &CompiledRelation,
        operation: CascadeOperation,
        column: &str,
        index: Option<&str>,
        owners: &[&Owner<'_>],
    ) -> Result<()> {
        let decision = decide(operation, relation.mode);
        let target_hierarchy = self.registry.hierarchy(&relation.target_root)?;
        let sides: Vec<(Vec<Entity>, Vec<Entity>)> =
            owners.iter().map(|owner| held_targets(owner, relation)).collect();

        // Removed targets let go of the owner first: a one-to-one reverse
        // column is unique. Another owner may already have taken them.
        if decision.removed != RemovedTarget::Keep {
            for (owner, (current, before)) in owners.iter().zip(&sides) {
                for target in removed(current, before) {
                    let table = shadow_table(target_hierarchy, target, column)?;
                    let mut update = Update::new(&table).set(column, Value::Null);
                    if let Some(index) = index {
                        update = update.set(index, Value::Null);
                    }
                    let update = update
                        .filter(Condition::eq(
                            &target_hierarchy.id_column,
                            target_hierarchy.id_of(target)?,
                        ))
                        .filter(Condition::eq(column, owner.id.clone()));
                    self.session.execute(update)?;
                    if decision.removed == RemovedTarget::DeleteOrphan {
                        self.orphans
                            .push((relation.target_root.clone(), target.clone()));
                    }
                }
            }
        }

        let mut inserted = Vec::new();
        if decision.propagate {
            let mut all_current = Vec::new();
            let mut all_before = Vec::new();
            for (owner, (current, before)) in owners.iter().zip(&sides) {
                for (position, target) in current.iter().enumerate() {
                    if self.visited.contains(&target.address())
                        || target_hierarchy.is_persisted(target)
                    {
                        continue;
                    }
                    self.shadows
                        .insert((target.address(), column.to_string()), owner.id.clone());
                    if let Some(index) = index {
                        self.shadows
                            .insert((target.address(), index.to_string()), position_value(position));
                    }
                }
                all_current.extend(current.iter().cloned());
                all_before.extend(before.iter().cloned());
            }
            inserted = self.cascade_targets(relation, &all_current, &all_before)?;
        }
        for (current, _) in &sides {
            self.claim(&relation.target_root, current);
        }
        if !decision.links {
            return Ok(());
        }

        for (owner, (current, before)) in owners.iter().zip(&sides) {
            for (position, target) in current.iter().enumerate() {
                if inserted.iter().any(|i| i.same_instance(target)) {
                    continue;
                }
                let moved = match before.iter().position(|b| same(b, target)) {
                    None => true,
                    Some(was) => index.is_some() && was != position,
                };
                if !moved {
                    continue;
                }
                let extra: Vec<(String, Value)> = index
                    .map(|i| (i.to_string(), position_value(position)))
                    .into_iter()
                    .collect();
                let table = shadow_table(target_hierarchy, target, column)?;
                if target_hierarchy.is_persisted(target) {
                    let mut update = Update::new(&table).set(column, owner.id.clone());
                    for (c, v) in extra {
                        update = update.set(&c, v);
                    }
                    let update = update.filter(Condition::eq(
                        &target_hierarchy.id_column,
                        target_hierarchy.id_of(target)?,
                    ));
                    self.session.execute(update)?;
                } else {
                    self.fixups.push(Fixup {
                        root: target_hierarchy.root.clone(),
                        row: target.clone(),
                        table,
                        column: column.to_string(),
                        target: owner.entity.clone(),
                        extra,
                    });
                }
            }
        }
        Ok(())
    }

    fn write_association(
        &mut self,
        relation: &CompiledRelation,
        operation: CascadeOperation,
        association: &AssociationTable,
        owners: &[&Owner<'_>],
    ) -> Result<()> {
        let decision = decide(operation, relation.mode);
        let sides: Vec<(Vec<Entity>, Vec<Entity>)> =
            owners.iter().map(|owner| held_targets(owner, relation)).collect();
        if decision.propagate {
            let all_current: Vec<Entity> = sides.iter().flat_map(|(c, _)| c.iter().cloned()).collect();
            let all_before: Vec<Entity> = sides.iter().flat_map(|(_, b)| b.iter().cloned()).collect();
            self.cascade_targets(relation, &all_current, &all_before)?;
        }
        for (current, _) in &sides {
            self.claim(&relation.target_root, current);
        }
        if !decision.links {
            return Ok(());
        }

        for (owner, (current, before)) in owners.iter().zip(&sides) {
            self.write_links(relation, association, &owner.id, current, before)?;
            if decision.removed == RemovedTarget::DeleteOrphan {
                for was in removed(current, before) {
                    self.orphans.push((relation.target_root.clone(), was.clone()));
                }
            }
        }
        Ok(())
    }

    /// Association rows of one owner: links added, moved and removed.
    fn write_links(
        &mut self,
        relation: &CompiledRelation,
        association: &AssociationTable,
        owner_id: &Value,
        current: &[Entity],
        before: &[Entity],
    ) -> Result<()> {
        let target_hierarchy = self.registry.hierarchy(&relation.target_root)?;
        let table = &association.table;
        let owner_filter = || Condition::eq(&association.owner_column, owner_id.clone());
        let link = |target_id: Value, position: usize| {
            let mut insert = Insert::new(table)
                .value(&association.owner_column, owner_id.clone())
                .value(&association.target_column, target_id);
            if let Some(index) = &association.index {
                insert = insert.value(index, position_value(position));
            }
            insert
        };

        match (&association.index, association.keyed_by_index) {
            (Some(index), true) => {
                for position in 0..current.len().max(before.len()) {
                    let key = Condition::eq(index, position_value(position));
                    match (current.get(position), before.get(position)) {
                        (Some(now), Some(was)) if same(now, was) => {}
                        (Some(now), Some(_)) => {
                            let update = Update::new(table)
                                .set(&association.target_column, target_hierarchy.id_of(now)?)
                                .filter(owner_filter())
                                .filter(key);
                            self.session.execute(update)?;
                        }
                        (Some(now), None) => {
                            self.session.execute(link(target_hierarchy.id_of(now)?, position))?;
                        }
                        (None, Some(_)) => {
                            self.session
                                .execute(Delete::new(table).filter(owner_filter()).filter(key))?;
                        }
                        (None, None) => {}
                    }
                }
            }
            _ => {
                for (position, target) in current.iter().enumerate() {
                    match before.iter().position(|b| same(b, target)) {
                        None => {
                            self.session.execute(link(target_hierarchy.id_of(target)?, position))?;
                        }
                        Some(was) if was != position => {
                            if let Some(index) = &association.index {
                                let update = Update::new(table)
                                    .set(index, position_value(position))
                                    .filter(owner_filter())
                                    .filter(Condition::eq(
                                        &association.target_column,
                                        target_hierarchy.id_of(target)?,
                                    ));
                                self.session.execute(update)?;
                            }
                        }
                        Some(_) => {}
                    }
                }
                for was in removed(current, before) {
                    let delete = Delete::new(table).filter(owner_filter()).filter(Condition::eq(
                        &association.target_column,
                        target_hierarchy.id_of(was)?,
                    ));
                    self.session.execute(delete)?;
                }
            }
        }
        Ok(())
    }

    fn element_values(
        &self,
        collection: &CompiledCollection,
        entity: &Entity,
        element: &Element,
    ) -> Result<Vec<(String, Value)>> {
        match (&collection.element, element) {
            (ElementColumns::Value(column), Element::Value(value)) => {
                Ok(vec![(column.clone(), value.clone())])
            }
            (ElementColumns::Record(columns), Element::Record(record)) => Ok(columns
                .iter()
                .map(|(property, column)| (column.clone(), record.get(property)))
                .collect()),
            _ => Err(PersistError::Conversion {
                entity: entity.type_name(),
                property: collection.property.clone(),
                reason: format!("element {:?} does not match the collection shape", element),
            }),
        }
    }

    fn write_elements(
        &mut self,
        collection: &CompiledCollection,
        owner_id: &Value,
        entity: &Entity,
        previous: Option<&Entity>,
    ) -> Result<()> {
        let current = entity.elements(&collection.property);
        let before = previous
            .map(|p| p.elements(&collection.property))
            .unwrap_or_default();
        if current == before {
            return Ok(());
        }
        let table = &collection.table;
        let owner_filter = || Condition::eq(&collection.owner_column, owner_id.clone());

        if let Some(index) = &collection.index {
            for position in 0..current.len().max(before.len()) {
                let key = Condition::eq(index, position_value(position));
                match (current.get(position), before.get(position)) {
                    (Some(now), Some(was)) if now == was => {}
                    (Some(now), Some(_)) => {
                        let mut update = Update::new(table);
                        for (column, value) in self.element_values(collection, entity, now)? {
                            update = update.set(&column, value);
                        }
                        self.session
                            .execute(update.filter(owner_filter()).filter(key))?;
                    }
                    (Some(now), None) => {
                        let mut insert = Insert::new(table)
                            .value(&collection.owner_column, owner_id.clone())
                            .value(index, position_value(position));
                        for (column, value) in self.element_values(collection, entity, now)? {
                            insert = insert.value(&column, value);
                        }
                        self.session.execute(insert)?;
                    }
                    (None, Some(_)) => {
                        self.session
                            .execute(Delete::new(table).filter(owner_filter()).filter(key))?;
                    }
                    (None, None) => {}
                }
            }
            return Ok(());
        }

        let mut written: Vec<&Element> = Vec::new();
        for element in &current {
            if before.contains(element) || written.contains(&element) {
                continue;
            }
            let mut insert = Insert::new(table).value(&collection.owner_column, owner_id.clone());
            for (column, value) in self.element_values(collection, entity, element)? {
                insert = insert.value(&column, value);
            }
            self.session.execute(insert)?;
            written.push(element);
        }
        for element in before.iter().filter(|e| !current.contains(e)) {
            let mut delete = Delete::new(table).filter(owner_filter());
            for (column, value) in self.element_values(collection, entity, element)? {
                delete = delete.filter(matching(&column, &value));
            }
            self.session.execute(delete)?;
        }
        Ok(())
    }

    fn write_map(
        &mut self,
        map: &CompiledMap,
        owner_id: &Value,
        entity: &Entity,
        previous: Option<&Entity>,
    ) -> Result<()> {
        let current = entity.map(&map.property);
        let before = previous.map(|p| p.map(&map.property)).unwrap_or_default();
        let owner_filter = || Condition::eq(&map.owner_column, owner_id.clone());
        for (key, value) in &current {
            match before.get(key) {
                Some(was) if was == value => {}
                Some(_) => {
                    let update = Update::new(&map.table)
                        .set(&map.value_column, value.clone())
                        .filter(owner_filter())
                        .filter(Condition::eq(&map.key_column, key.clone()));
                    self.session.execute(update)?;
                }
                None => {
                    let insert = Insert::new(&map.table)
                        .value(&map.owner_column, owner_id.clone())
                        .value(&map.key_column, key.clone())
                        .value(&map.value_column, value.clone());
                    self.session.execute(insert)?;
                }
            }
        }
        for key in before.keys().filter(|k| !current.contains_key(*k)) {
            let delete = Delete::new(&map.table)
                .filter(owner_filter())
                .filter(Condition::eq(&map.key_column, key.clone()));
            self.session.execute(delete)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    /// Updates `(current, previous)` pairs. A missing previous state is read
    /// from the database first.
    pub fn update(
        &mut self,
        root: &str,
        pairs: Vec<(Entity, Option<Entity>)>,
        full: bool,
    ) -> Result<()> {
        let pairs: Vec<(Entity, Option<Entity>)> = pairs
            .into_iter()
            .filter(|(e, _)| self.visited.insert(e.address()))
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }
        let registry = self.registry;
        let hierarchy = registry.hierarchy(root)?;
        let batch: Vec<Entity> = pairs.iter().map(|(e, _)| e.clone()).collect();
        let span = info_span!("persister.update", entity = %root, batch = batch.len(), full);
        let _enter = span.enter();
        self.run(&hierarchy.listeners.update, batch.as_slice(), |w| {
            w.update_batch(hierarchy, pairs, full)
        })
    }

    fn update_batch(
        &mut self,
        hierarchy: &'r Hierarchy,
        pairs: Vec<(Entity, Option<Entity>)>,
        full: bool,
    ) -> Result<()> {
        let mut missing = Vec::new();
        for (entity, previous) in &pairs {
            let id = hierarchy.id_of(entity)?;
            if previous.is_none() {
                missing.push(id);
            }
            self.check_mandatory(hierarchy, entity)?;
        }
        let mut stored = self.load(&hierarchy.root, missing)?;
        let (batch, previous): (Vec<Entity>, Vec<Option<Entity>>) = pairs
            .into_iter()
            .map(|(entity, previous)| {
                let previous =
                    previous.or_else(|| entity.id().and_then(|id| stored.remove(&id)));
                (entity, previous)
            })
            .unzip();

        self.cascade_source_targets(hierarchy, CascadeOperation::Update, &batch, &previous)?;
        for (entity, before) in batch.iter().zip(&previous) {
            self.update_rows(hierarchy, entity, before.as_ref(), full)?;
        }
        self.write_dependents(hierarchy, CascadeOperation::Update, &batch, &previous)
    }

    fn update_rows(
        &mut self,
        hierarchy: &'r Hierarchy,
        entity: &Entity,
        previous: Option<&Entity>,
        full: bool,
    ) -> Result<()> {
        let layout = hierarchy.layout(entity)?;
        let id = hierarchy.id_of(entity)?;
        let mut changes = Vec::with_capacity(layout.tables.len());
        for table in &layout.tables {
            let mut set = Vec::new();
            for binding in &table.bindings {
                let (now, was) = match binding {
                    Binding::Property { property, .. } => {
                        (entity.get(property), previous.map(|p| p.get(property)))
                    }
                    Binding::Embedded {
                        property,
                        sub_property,
                        ..
                    } => (
                        embedded_value(entity, property, sub_property),
                        previous.map(|p| embedded_value(p, property, sub_property)),
                    ),
                    Binding::JoinColumn { relation, column } => {
                        let property = &hierarchy.relations[*relation].property;
                        let was = previous.map(|p| {
                            p.one(property)
                                .and_then(|target| target.id())
                                .unwrap_or(Value::Null)
                        });
                        let now = self.join_value(hierarchy, &table.table, entity, *relation, column)?;
                        (now, was)
                    }
                    Binding::Version { .. }
                    | Binding::Shadow { .. }
                    | Binding::Discriminator { .. } => continue,
                };
                if full || was.as_ref() != Some(&now) {
                    set.push((binding.column().to_string(), now));
                }
            }
            changes.push((table, set));
        }
        if changes.iter().all(|(_, set)| set.is_empty()) {
            return Ok(());
        }

        let bump = hierarchy
            .version
            .as_ref()
            .map(|version| (version, version.bump(entity, self.session.connection())));
        for (table, set) in changes {
            let versioned = bump.as_ref().filter(|_| has_version(&table.bindings));
            if set.is_empty() && versioned.is_none() {
                continue;
            }
            let mut update = Update::new(&table.table);
            for (column, value) in set {
                update = update.set(&column, value);
            }
            update = update.filter(Condition::eq(&hierarchy.id_column, id.clone()));
            match versioned {
                Some((version, bump)) => {
                    let update = update
                        .set(&version.column, bump.next.clone())
                        .filter(version.predicate(&bump.expected));
                    let outcome = self.session.execute(update)?;
                    version.check(entity, &bump.expected, outcome.affected)?;
                }
                None => {
                    self.session.execute(update)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    pub fn delete(&mut self, root: &str, entities: &[Entity]) -> Result<()> {
        let batch: Vec<Entity> = entities
            .iter()
            .filter(|e| self.visited.insert(e.address()))
            .cloned()
            .collect();
        if batch.is_empty() {
            return Ok(());
        }
        let registry = self.registry;
        let hierarchy = registry.hierarchy(root)?;
        let span = info_span!("persister.delete", entity = %root, batch = batch.len());
        let _enter = span.enter();
        self.run(&hierarchy.listeners.delete, batch.as_slice(), |w| {
            w.delete_batch(hierarchy, &batch)
        })
    }

    fn delete_batch(&mut self, hierarchy: &'r Hierarchy, batch: &[Entity]) -> Result<()> {
        let mut owners = Vec::with_capacity(batch.len());
        for entity in batch {
            owners.push((entity, hierarchy.layout(entity)?, hierarchy.id_of(entity)?));
        }

        // Rows referencing the owners go first, one cascade per relation
        let mut source_targets = Vec::new();
        for relation in &hierarchy.relations {
            let decision = decide(CascadeOperation::Delete, relation.mode);
            let mut cascaded = Vec::new();
            for (entity, layout, id) in &owners {
                if !hierarchy.tree.is_a(layout.node, relation.owner_node) {
                    continue;
                }
                if let RelationStorage::Association(association) = &relation.storage {
                    self.session.execute(
                        Delete::new(&association.table)
                            .filter(Condition::eq(&association.owner_column, id.clone())),
                    )?;
                }
                if decision.propagate {
                    cascaded.extend(targets(entity, relation));
                }
            }
            match relation.storage {
                RelationStorage::SourceColumn { .. } => source_targets.push((relation, cascaded)),
                _ => self.delete(&relation.target_root, &cascaded)?,
            }
        }

        for (entity, layout, id) in &owners {
            let owner_of = |column: &str| Condition::eq(column, id.clone());
            for collection in hierarchy.collections_of(layout.node) {
                self.session
                    .execute(Delete::new(&collection.table).filter(owner_of(&collection.owner_column)))?;
            }
            for map in hierarchy.maps_of(layout.node) {
                self.session
                    .execute(Delete::new(&map.table).filter(owner_of(&map.owner_column)))?;
            }
            for table in layout.tables.iter().rev() {
                let delete = Delete::new(&table.table).filter(owner_of(&hierarchy.id_column));
                match hierarchy.version.as_ref().filter(|_| has_version(&table.bindings)) {
                    Some(version) => {
                        let expected = version.current(entity);
                        let outcome = self
                            .session
                            .execute(delete.filter(version.predicate(&expected)))?;
                        version.check(entity, &expected, outcome.affected)?;
                    }
                    None => {
                        self.session.execute(delete)?;
                    }
                }
            }
        }

        for (relation, targets) in source_targets {
            self.delete(&relation.target_root, &targets)?;
        }
        Ok(())
    }

    /// Loads the entities of `ids` and deletes them with their cascades.
    pub fn delete_by_id(&mut self, root: &str, ids: &[Value]) -> Result<()> {
        let registry = self.registry;
        let hierarchy = registry.hierarchy(root)?;
        let span = info_span!("persister.delete_by_id", entity = %root, batch = ids.len());
        let _enter = span.enter();
        self.run(&hierarchy.listeners.delete_by_id, ids, |w| {
            let mut stored = w.load(root, ids.to_vec())?;
            let entities: Vec<Entity> = ids.iter().filter_map(|id| stored.remove(id)).collect();
            w.delete(root, &entities)
        })
    }

    // ------------------------------------------------------------------------
    // Persist
    // ------------------------------------------------------------------------

    /// Inserts new entities and updates persisted ones against their stored
    /// state. A persisted entity without a stored row is inserted.
    pub fn persist(&mut self, root: &str, entities: &[Entity]) -> Result<()> {
        let registry = self.registry;
        let hierarchy = registry.hierarchy(root)?;
        let span = info_span!("persister.persist", entity = %root, batch = entities.len());
        let _enter = span.enter();
        self.run(&hierarchy.listeners.persist, entities, |w| {
            let (known, new): (Vec<Entity>, Vec<Entity>) = entities
                .iter()
                .cloned()
                .partition(|e| hierarchy.is_persisted(e));
            let ids = known
                .iter()
                .map(|e| hierarchy.id_of(e))
                .collect::<Result<Vec<_>>>()?;
            let mut stored = w.load(root, ids)?;
            let mut inserts = new;
            let mut updates = Vec::new();
            for entity in known {
                match entity.id().and_then(|id| stored.remove(&id)) {
                    Some(previous) => updates.push((entity, Some(previous))),
                    None => inserts.push(entity),
                }
            }
            w.insert(root, &inserts)?;
            w.update(root, updates, false)
        })
    }
}

/// Hierarchy holding the concrete type of `entity`.
fn hierarchy_of<'r>(registry: &'r Registry, entity: &Entity) -> Result<&'r Hierarchy> {
    let type_name = entity.type_name();
    let (root, _) = registry
        .by_entity
        .get(&type_name)
        .ok_or(ConfigurationError::UnknownEntity(type_name.clone()))?;
    registry.hierarchy(root)
}

/// Table of `target`'s layout holding the reverse column `column`.
fn shadow_table(hierarchy: &Hierarchy, target: &Entity, column: &str) -> Result<String> {
    hierarchy
        .layout(target)?
        .tables
        .iter()
        .find(|t| {
            t.bindings
                .iter()
                .any(|b| matches!(b, Binding::Shadow { column: c } if c == column))
        })
        .map(|t| t.table.clone())
        .ok_or_else(|| {
            ConfigurationError::UnknownProperty {
                entity: target.type_name(),
                property: column.to_string(),
            }
            .into()
        })
}
